//! Match assembly: which components make up a game, in dispatch order.

use crate::bus::Coordinator;
use crate::config::GameConfig;
use crate::cue::CueInput;
use crate::model::MatchContext;
use crate::physics::TablePhysics;
use crate::rack::Rack;
use crate::rules::{EightBall, EightBallSolo, ShotTracker};
use crate::table::PoolTable;
use crate::turn::TurnBased;
use rand_chacha::ChaCha8Rng;

/// Server-side two-player match. Shots arrive as `cue-shot` events, so there is
/// no pointer input. Physics is registered before the shot tracker so a shot
/// has woken the table by the time it is tracked.
pub fn two_player_match(config: &GameConfig, rng: ChaCha8Rng) -> Coordinator {
    Coordinator::new(MatchContext::new())
        .with(PoolTable::new(config.table))
        .with(Rack::new(config.rules.rack_style, rng))
        .with(TablePhysics::new(config.physics))
        .with(TurnBased)
        .with(ShotTracker::default())
        .with(EightBall::new(config.rules))
}

/// Local single-player game driven by pointer input.
pub fn offline_match(config: &GameConfig, rng: ChaCha8Rng) -> Coordinator {
    Coordinator::new(MatchContext::new())
        .with(PoolTable::new(config.table))
        .with(Rack::new(config.rules.rack_style, rng))
        .with(TablePhysics::new(config.physics))
        .with(CueInput::new(config.cue))
        .with(ShotTracker::default())
        .with(EightBallSolo::new(config.rules))
}
