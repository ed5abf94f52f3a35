//! 8-ball rules.
//!
//! [`ShotTracker`] turns the physics signals of one shot into a single
//! `shot-end {pocketed}` once the table settles. [`EightBall`] and
//! [`EightBallSolo`] judge that result.

use crate::bus::{Component, EventKind, GameEvent, Outbox};
use crate::config::RulesConfig;
use crate::model::{Ball, MatchContext, PlayerId};
use std::time::Duration;

/// Records what a running shot pocketed.
#[derive(Default)]
pub struct ShotTracker {
    pocketed: Vec<Ball>,
}

impl Component for ShotTracker {
    fn name(&self) -> &'static str {
        "shot-tracker"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[
            EventKind::CueShot,
            EventKind::BallInPocket,
            EventKind::Settled,
            EventKind::NewGame,
        ]
    }

    fn handle(&mut self, event: &GameEvent, ctx: &mut MatchContext, out: &mut Outbox) {
        match event {
            // Physics runs first and wakes the table if the impulse landed
            GameEvent::CueShot(_) if !ctx.sleep => {
                ctx.shot_in_progress = true;
                self.pocketed.clear();
            }
            GameEvent::BallInPocket { ball, pocket } => {
                if let Some(ball) = ctx.remove_ball(ball) {
                    tracing::debug!("{} ({}) dropped into {}", ball.key, ball.color, pocket);
                    self.pocketed.push(ball);
                    out.emit(GameEvent::Update);
                }
            }
            GameEvent::Settled if ctx.shot_in_progress => {
                ctx.shot_in_progress = false;
                out.emit(GameEvent::ShotEnd {
                    pocketed: std::mem::take(&mut self.pocketed),
                });
            }
            GameEvent::NewGame => self.pocketed.clear(),
            _ => {}
        }
    }
}

/// What a finished shot means for the game.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Black went down; `winner` is decided by the clean-clear rule
    GameOver { winner: Option<PlayerId> },
    /// Cue ball went down: pass and respot
    Scratch,
    /// Shooter pocketed one of their own balls
    Continue,
    Pass,
}

/// Judge a settled shot for the current shooter. `ctx.balls` no longer holds
/// the pocketed balls.
pub fn judge(ctx: &MatchContext, pocketed: &[Ball]) -> Verdict {
    let shooter = ctx.shooter();
    let group = shooter.and_then(|p| p.group);
    let scratched = pocketed.iter().any(|b| b.color.is_cue());

    if pocketed.iter().any(|b| b.color.is_eight()) {
        let cleared = group.is_some_and(|g| ctx.remaining_in_group(g) == 0);
        let winner = if cleared && !scratched {
            shooter.map(|p| p.id.clone())
        } else {
            let shooter_id = shooter.map(|p| &p.id);
            ctx.players
                .iter()
                .find(|p| Some(&p.id) != shooter_id)
                .map(|p| p.id.clone())
        };
        return Verdict::GameOver { winner };
    }
    if scratched {
        return Verdict::Scratch;
    }
    if group.is_some_and(|g| pocketed.iter().any(|b| b.color.group() == Some(g))) {
        return Verdict::Continue;
    }
    Verdict::Pass
}

/// Two-player 8-ball.
pub struct EightBall {
    config: RulesConfig,
}

impl EightBall {
    pub fn new(config: RulesConfig) -> Self {
        Self { config }
    }

    fn respot_delay(&self) -> Duration {
        Duration::from_millis(self.config.respot_delay_ms as u64)
    }

    fn init_game(&self, ctx: &mut MatchContext, out: &mut Outbox) {
        let groups = self.config.rack_style.groups();
        for (player, group) in ctx.players.iter_mut().zip(groups) {
            player.group = Some(group);
        }
        ctx.game_started = true;
        ctx.game_over = false;
        ctx.winner = None;
        out.emit(GameEvent::InitCueBall);
        out.emit(GameEvent::Update);
    }

    fn new_game(&self, ctx: &mut MatchContext, out: &mut Outbox) {
        ctx.balls.clear();
        ctx.cue = None;
        ctx.shot_in_progress = false;
        ctx.game_over = false;
        ctx.winner = None;
        ctx.sleep = true;
        out.emit(GameEvent::RackBalls);
        out.emit(GameEvent::InitGame);
    }

    fn shot_end(&self, pocketed: &[Ball], ctx: &mut MatchContext, out: &mut Outbox) {
        match judge(ctx, pocketed) {
            Verdict::GameOver { winner } => {
                tracing::info!(
                    "game over, winner {}",
                    winner.as_ref().map_or("none", |w| w.0.as_str())
                );
                ctx.game_over = true;
                ctx.winner = winner;
                ctx.balls.clear();
                out.emit(GameEvent::GameOver);
            }
            Verdict::Scratch => {
                out.emit(GameEvent::PassTurn);
                out.schedule(self.respot_delay(), GameEvent::InitCueBall);
            }
            Verdict::Continue => {}
            Verdict::Pass => out.emit(GameEvent::PassTurn),
        }
        out.emit(GameEvent::Update);
    }
}

impl Component for EightBall {
    fn name(&self) -> &'static str {
        "eight-ball"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[
            EventKind::Activate,
            EventKind::InitGame,
            EventKind::NewGame,
            EventKind::ShotEnd,
        ]
    }

    fn handle(&mut self, event: &GameEvent, ctx: &mut MatchContext, out: &mut Outbox) {
        match event {
            GameEvent::Activate => {
                out.emit(GameEvent::InitTable);
                out.emit(GameEvent::RackBalls);
            }
            GameEvent::InitGame => self.init_game(ctx, out),
            GameEvent::NewGame => self.new_game(ctx, out),
            GameEvent::ShotEnd { pocketed } => self.shot_end(pocketed, ctx, out),
            _ => {}
        }
    }
}

/// Single-player practice rules: anything but the black keeps play going.
pub struct EightBallSolo {
    config: RulesConfig,
}

impl EightBallSolo {
    pub fn new(config: RulesConfig) -> Self {
        Self { config }
    }

    fn start(ctx: &mut MatchContext, out: &mut Outbox) {
        ctx.game_started = true;
        ctx.game_over = false;
        ctx.winner = None;
        out.emit(GameEvent::InitCueBall);
        out.emit(GameEvent::Update);
    }
}

impl Component for EightBallSolo {
    fn name(&self) -> &'static str {
        "eight-ball-solo"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[EventKind::Activate, EventKind::NewGame, EventKind::ShotEnd]
    }

    fn handle(&mut self, event: &GameEvent, ctx: &mut MatchContext, out: &mut Outbox) {
        match event {
            GameEvent::Activate => {
                out.emit(GameEvent::InitTable);
                out.emit(GameEvent::RackBalls);
                Self::start(ctx, out);
            }
            GameEvent::NewGame => {
                ctx.balls.clear();
                ctx.shot_in_progress = false;
                ctx.sleep = true;
                out.emit(GameEvent::RackBalls);
                Self::start(ctx, out);
            }
            GameEvent::ShotEnd { pocketed } => {
                if pocketed.iter().any(|b| b.color.is_eight()) {
                    ctx.game_over = true;
                    // Clean finish: everything else was already down
                    ctx.winner = ctx
                        .balls
                        .iter()
                        .all(|b| b.color.is_cue())
                        .then(|| ctx.local_player.clone())
                        .flatten();
                    ctx.balls.clear();
                    out.emit(GameEvent::GameOver);
                } else if pocketed.iter().any(|b| b.color.is_cue()) {
                    out.schedule(
                        Duration::from_millis(self.config.respot_delay_ms as u64),
                        GameEvent::InitCueBall,
                    );
                }
                out.emit(GameEvent::Update);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BallColor, EntityKey, Group, Hue, Player, Turn, TurnToken};
    use glam::Vec2;

    fn ball(n: u32, color: BallColor) -> Ball {
        Ball {
            key: EntityKey(format!("ball-{}", n)),
            position: Vec2::ZERO,
            radius: 0.031,
            color,
        }
    }

    /// Two seated players, `a` (striped) to shoot.
    fn seated() -> MatchContext {
        let mut ctx = MatchContext::new();
        ctx.turn = Turn::seats(&["turn-one", "turn-two"]);
        ctx.turn.pass();
        for (id, token, group) in [
            ("a", "turn-one", Group::Striped),
            ("b", "turn-two", Group::Solid),
        ] {
            let mut p = Player::new(PlayerId(id.into()));
            p.turn = Some(TurnToken(token.into()));
            p.group = Some(group);
            ctx.players.push(p);
        }
        ctx
    }

    #[test]
    fn nothing_pocketed_passes() {
        assert_eq!(judge(&seated(), &[]), Verdict::Pass);
    }

    #[test]
    fn own_group_continues() {
        let pocketed = [ball(3, BallColor::Stripe(Hue::Blue))];
        assert_eq!(judge(&seated(), &pocketed), Verdict::Continue);
    }

    #[test]
    fn opponent_group_passes() {
        let pocketed = [ball(3, BallColor::Solid(Hue::Blue))];
        assert_eq!(judge(&seated(), &pocketed), Verdict::Pass);
    }

    #[test]
    fn scratch_beats_own_group() {
        let pocketed = [
            ball(3, BallColor::Stripe(Hue::Blue)),
            ball(1, BallColor::White),
        ];
        assert_eq!(judge(&seated(), &pocketed), Verdict::Scratch);
    }

    #[test]
    fn black_after_clearing_group_wins() {
        let mut ctx = seated();
        ctx.balls.push(ball(5, BallColor::Solid(Hue::Red)));
        let pocketed = [ball(4, BallColor::Black)];
        assert_eq!(
            judge(&ctx, &pocketed),
            Verdict::GameOver {
                winner: Some(PlayerId("a".into()))
            }
        );
    }

    #[test]
    fn early_black_loses() {
        let mut ctx = seated();
        ctx.balls.push(ball(5, BallColor::Stripe(Hue::Red)));
        let pocketed = [ball(4, BallColor::Black)];
        assert_eq!(
            judge(&ctx, &pocketed),
            Verdict::GameOver {
                winner: Some(PlayerId("b".into()))
            }
        );
    }

    #[test]
    fn black_with_scratch_loses() {
        let pocketed = [ball(4, BallColor::Black), ball(1, BallColor::White)];
        assert_eq!(
            judge(&seated(), &pocketed),
            Verdict::GameOver {
                winner: Some(PlayerId("b".into()))
            }
        );
    }

    #[test]
    fn game_over_clears_table_and_keeps_turn() {
        let mut ctx = seated();
        ctx.balls.push(ball(1, BallColor::White));
        ctx.balls.push(ball(5, BallColor::Solid(Hue::Red)));
        let turn_before = ctx.turn.clone();
        let mut rules = EightBall::new(RulesConfig::default());
        let mut out = Outbox::default();
        let pocketed = vec![
            ball(3, BallColor::Stripe(Hue::Green)),
            ball(6, BallColor::Stripe(Hue::Purple)),
            ball(4, BallColor::Black),
        ];
        rules.handle(&GameEvent::ShotEnd { pocketed }, &mut ctx, &mut out);

        assert!(ctx.game_over);
        assert!(ctx.balls.is_empty());
        assert_eq!(ctx.turn, turn_before);
        assert_eq!(ctx.winner, Some(PlayerId("a".into())));
        assert_eq!(out.into_emitted(), vec![GameEvent::GameOver, GameEvent::Update]);
    }

    #[test]
    fn tracker_reports_pocketed_balls_on_settle() {
        let mut ctx = seated();
        ctx.balls.push(ball(1, BallColor::White));
        ctx.balls.push(ball(2, BallColor::Solid(Hue::Orange)));
        ctx.sleep = false;
        let mut tracker = ShotTracker::default();
        let mut out = Outbox::default();
        let shot = crate::bus::Shot {
            ball: EntityKey::from("ball-1"),
            impulse: Vec2::X,
        };
        tracker.handle(&GameEvent::CueShot(shot), &mut ctx, &mut out);
        assert!(ctx.shot_in_progress);

        let pocket = EntityKey::from("pocket-1");
        let drop = GameEvent::BallInPocket {
            ball: EntityKey::from("ball-2"),
            pocket,
        };
        tracker.handle(&drop, &mut ctx, &mut out);
        tracker.handle(&drop, &mut ctx, &mut out);
        assert_eq!(ctx.balls.len(), 1);

        tracker.handle(&GameEvent::Settled, &mut ctx, &mut out);
        assert!(!ctx.shot_in_progress);
        let emitted = out.into_emitted();
        assert_eq!(
            emitted.last(),
            Some(&GameEvent::ShotEnd {
                pocketed: vec![ball(2, BallColor::Solid(Hue::Orange))]
            })
        );
    }

    #[test]
    fn settle_without_shot_is_quiet() {
        let mut ctx = seated();
        let mut tracker = ShotTracker::default();
        let mut out = Outbox::default();
        tracker.handle(&GameEvent::Settled, &mut ctx, &mut out);
        assert!(out.into_emitted().is_empty());
    }

    #[test]
    fn solo_scratch_keeps_game_going() {
        let mut ctx = MatchContext::new();
        let mut rules = EightBallSolo::new(RulesConfig::default());
        let mut out = Outbox::default();
        let pocketed = vec![ball(1, BallColor::White)];
        rules.handle(&GameEvent::ShotEnd { pocketed }, &mut ctx, &mut out);
        assert!(!ctx.game_over);
    }

    #[test]
    fn solo_black_ends_game() {
        let mut ctx = MatchContext::new();
        ctx.balls.push(ball(2, BallColor::Red));
        let mut rules = EightBallSolo::new(RulesConfig::default());
        let mut out = Outbox::default();
        let pocketed = vec![ball(4, BallColor::Black)];
        rules.handle(&GameEvent::ShotEnd { pocketed }, &mut ctx, &mut out);
        assert!(ctx.game_over);
        assert!(ctx.balls.is_empty());
        assert_eq!(ctx.winner, None);
    }
}
