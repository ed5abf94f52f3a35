pub mod bus;
pub mod config;
pub mod cue;
pub mod game;
pub mod model;
pub mod physics;
pub mod protocol;
pub mod rack;
pub mod rules;
pub mod table;
pub mod turn;
