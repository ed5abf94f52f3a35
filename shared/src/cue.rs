//! Drag-to-shoot input: pointer gestures become a cue-shot impulse.

use crate::bus::{Component, EventKind, GameEvent, Outbox, Shot};
use crate::config::CueConfig;
use crate::model::{CueStick, MatchContext};
use glam::Vec2;

/// Impulse for a drag from `start` to `end`, or `None` when the drag is too
/// short to count as a shot.
pub fn shot_impulse(config: &CueConfig, start: Vec2, end: Vec2) -> Option<Vec2> {
    let delta = end - start;
    let distance = delta.length();
    if !distance.is_finite() || distance < config.min_shot_distance {
        return None;
    }
    let power = (distance / config.max_shot_distance).min(1.0);
    Some(delta / distance * power * config.max_impulse)
}

pub struct CueInput {
    config: CueConfig,
}

impl CueInput {
    pub fn new(config: CueConfig) -> Self {
        Self { config }
    }

    fn start(&self, point: Vec2, ctx: &mut MatchContext) {
        if !ctx.is_my_turn() {
            return;
        }
        let Some(cue_ball) = ctx.cue_ball() else {
            return;
        };
        ctx.cue = Some(CueStick {
            ball: cue_ball.key.clone(),
            start: cue_ball.position,
            end: point,
        });
    }

    fn drag(&self, point: Vec2, ctx: &mut MatchContext) {
        if let Some(cue) = ctx.cue.as_mut() {
            cue.end = point;
        }
    }

    fn release(&self, point: Vec2, ctx: &mut MatchContext, out: &mut Outbox) {
        let Some(cue) = ctx.cue.take() else {
            return;
        };
        let Some(impulse) = shot_impulse(&self.config, cue.start, point) else {
            return;
        };
        // The turn may have changed while aiming
        if !ctx.is_my_turn() {
            return;
        }
        out.emit(GameEvent::CueShot(Shot {
            ball: cue.ball,
            impulse,
        }));
    }

    fn pin(&self, ctx: &mut MatchContext) {
        let Some(cue) = &ctx.cue else {
            return;
        };
        match ctx.ball(&cue.ball).map(|b| b.position) {
            Some(position) => {
                if let Some(cue) = ctx.cue.as_mut() {
                    cue.start = position;
                }
            }
            // Cue ball left the table mid-drag
            None => ctx.cue = None,
        }
    }
}

impl Component for CueInput {
    fn name(&self) -> &'static str {
        "cue"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[
            EventKind::PointerStart,
            EventKind::PointerMove,
            EventKind::PointerEnd,
            EventKind::FrameLoop,
        ]
    }

    fn handle(&mut self, event: &GameEvent, ctx: &mut MatchContext, out: &mut Outbox) {
        match event {
            GameEvent::PointerStart(point) => self.start(*point, ctx),
            GameEvent::PointerMove(point) => self.drag(*point, ctx),
            GameEvent::PointerEnd(point) => self.release(*point, ctx, out),
            GameEvent::FrameLoop { .. } => self.pin(ctx),
            _ => {}
        }
    }
}
