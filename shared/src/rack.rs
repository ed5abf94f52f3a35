//! Triangular rack of the 15 object balls.
//!
//! Layout (apex on the foot spot, rows growing towards +x):
//! ```text
//!  0
//!  1  2
//!  3  4  5        <- slot 4 is the center, always the black
//!  6  7  8  9
//! 10 11 12 13 14
//! ```

use crate::bus::{Component, EventKind, GameEvent, Outbox};
use crate::config::RackStyle;
use crate::model::{Ball, BallColor, Group, KeyGen, MatchContext, Table};
use glam::Vec2;
use rand::Rng;

pub const RACK_SIZE: usize = 15;
const ROWS: usize = 5;
/// Slot that always gets the black
pub const CENTER_SLOT: usize = 4;
/// Per-axis jitter as a fraction of the ball radius
const JITTER: f32 = 0.02;
/// Gap between neighbouring balls as a fraction of the ball radius; larger than
/// twice the jitter so racked balls never start overlapped.
const GAP: f32 = 0.08;

/// Regional slot map: back corners differ, black in the center.
const REGIONAL_SLOTS: [BallColor; RACK_SIZE] = [
    BallColor::Yellow,
    BallColor::Red,
    BallColor::Yellow,
    BallColor::Yellow,
    BallColor::Black,
    BallColor::Red,
    BallColor::Red,
    BallColor::Yellow,
    BallColor::Red,
    BallColor::Yellow,
    BallColor::Yellow,
    BallColor::Red,
    BallColor::Yellow,
    BallColor::Red,
    BallColor::Red,
];

impl RackStyle {
    /// Groups handed to the first and second seat.
    pub fn groups(self) -> [Group; 2] {
        match self {
            RackStyle::Shuffled => [Group::Striped, Group::Solid],
            RackStyle::Regional => [Group::Yellow, Group::Red],
        }
    }
}

/// Fisher-Yates shuffle into a new sequence.
pub fn shuffle<T>(mut items: Vec<T>, rng: &mut impl Rng) -> Vec<T> {
    for i in (1..items.len()).rev() {
        let j = rng.gen_range(0..=i);
        items.swap(i, j);
    }
    items
}

/// Slot centers relative to the apex, before jitter.
pub fn triangle(ball_radius: f32) -> Vec<Vec2> {
    let d = ball_radius * (2.0 + GAP);
    let l = (std::f32::consts::PI / 3.0).sin() * d;
    let mut points = Vec::with_capacity(RACK_SIZE);
    for i in 0..ROWS {
        for j in 0..=i {
            points.push(Vec2::new(i as f32 * l, (j as f32 - i as f32 * 0.5) * d));
        }
    }
    points
}

/// Colors per slot for the given style.
pub fn slot_colors(style: RackStyle, rng: &mut impl Rng) -> Vec<BallColor> {
    match style {
        RackStyle::Shuffled => {
            let mut colors = shuffle(BallColor::group_colors(), rng);
            colors.insert(CENTER_SLOT, BallColor::Black);
            colors
        }
        RackStyle::Regional => REGIONAL_SLOTS.to_vec(),
    }
}

/// A fresh rack of 15 balls for `table`.
pub fn rack(table: &Table, style: RackStyle, rng: &mut impl Rng, keys: &mut KeyGen) -> Vec<Ball> {
    let r = table.ball_radius;
    let apex = table.foot_spot();
    let colors = slot_colors(style, rng);

    triangle(r)
        .into_iter()
        .zip(colors)
        .map(|(slot, color)| {
            let jitter = Vec2::new(rng.gen::<f32>(), rng.gen::<f32>()) * r * JITTER;
            Ball {
                key: keys.next("ball"),
                position: apex + slot + jitter,
                radius: r,
                color,
            }
        })
        .collect()
}

/// Racks the balls on `rack-balls`. Owns the match's random source.
pub struct Rack<R> {
    style: RackStyle,
    rng: R,
}

impl<R: Rng + Send> Rack<R> {
    pub fn new(style: RackStyle, rng: R) -> Self {
        Self { style, rng }
    }
}

impl<R: Rng + Send> Component for Rack<R> {
    fn name(&self) -> &'static str {
        "rack"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[EventKind::RackBalls]
    }

    fn handle(&mut self, _event: &GameEvent, ctx: &mut MatchContext, out: &mut Outbox) {
        let Some(table) = ctx.table.clone() else {
            tracing::warn!("rack requested before the table was set up");
            return;
        };
        ctx.balls = rack(&table, self.style, &mut self.rng, &mut ctx.keys);
        out.emit(GameEvent::Update);
    }
}
