use crate::bus::{Component, EventKind, GameEvent, Outbox};
use crate::model::{MatchContext, Turn};

pub const SEAT_TOKENS: [&str; 2] = ["turn-one", "turn-two"];

/// Owns the turn order. Nothing else writes `ctx.turn`.
#[derive(Default)]
pub struct TurnBased;

impl TurnBased {
    fn init_game(ctx: &mut MatchContext) {
        let MatchContext { turn, players, .. } = ctx;
        for (player, token) in players.iter_mut().zip(&turn.turns) {
            player.turn = Some(token.clone());
        }
        turn.current = turn.turns.first().cloned();
    }
}

impl Component for TurnBased {
    fn name(&self) -> &'static str {
        "turn"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[EventKind::Activate, EventKind::InitGame, EventKind::PassTurn]
    }

    fn handle(&mut self, event: &GameEvent, ctx: &mut MatchContext, out: &mut Outbox) {
        match event {
            GameEvent::Activate => {
                ctx.turn = Turn::seats(&SEAT_TOKENS);
                ctx.turn.current = ctx.turn.turns.first().cloned();
            }
            GameEvent::InitGame => Self::init_game(ctx),
            GameEvent::PassTurn => {
                ctx.turn.pass();
                out.emit(GameEvent::Update);
            }
            _ => {}
        }
    }
}
