//! Pool table geometry: rails, pockets and the cue-ball spot.
//!
//! The table is centered on the origin, x along the long side.

use crate::bus::{Component, EventKind, GameEvent, Outbox};
use crate::config::TableConfig;
use crate::model::{Ball, BallColor, KeyGen, MatchContext, Pocket, Rail, Table};
use glam::Vec2;
use std::f32::consts::FRAC_PI_4;

/// Build the table record, the six rails and the six pockets.
pub fn build_table(config: &TableConfig, keys: &mut KeyGen) -> (Table, Vec<Rail>, Vec<Pocket>) {
    let w = config.width;
    let h = config.height;
    let pr = config.pocket_radius;
    // Rail thickness
    let rw = 1.5 * pr;
    let s = FRAC_PI_4.sin();

    let table = Table {
        key: keys.next("table"),
        width: w,
        height: h,
        ball_radius: config.ball_radius,
        pocket_radius: pr,
    };

    // Long rail between a corner pocket and the side pocket (bottom right)
    let hrail = [
        Vec2::new(pr, h * 0.5),
        Vec2::new(pr, h * 0.5 + rw),
        Vec2::new(w * 0.5 - pr / s + rw, h * 0.5 + rw),
        Vec2::new(w * 0.5 - pr / s, h * 0.5),
    ];
    // Short rail between two corner pockets (right)
    let vrail = [
        Vec2::new(w * 0.5, -(h * 0.5 - pr / s)),
        Vec2::new(w * 0.5 + rw, -(h * 0.5 - pr / s + rw)),
        Vec2::new(w * 0.5 + rw, h * 0.5 - pr / s + rw),
        Vec2::new(w * 0.5, h * 0.5 - pr / s),
    ];

    let mirrored = |points: &[Vec2], sx: f32, sy: f32| -> Vec<Vec2> {
        points.iter().map(|p| Vec2::new(p.x * sx, p.y * sy)).collect()
    };

    let rails = [
        mirrored(&vrail, 1.0, 1.0),
        mirrored(&vrail, -1.0, 1.0),
        mirrored(&hrail, 1.0, 1.0),
        mirrored(&hrail, -1.0, 1.0),
        mirrored(&hrail, 1.0, -1.0),
        mirrored(&hrail, -1.0, -1.0),
    ]
    .into_iter()
    .map(|vertices| Rail {
        key: keys.next("rail"),
        vertices,
    })
    .collect();

    let pockets = [
        Vec2::new(0.0, -h * 0.5 - pr * 1.1),
        Vec2::new(0.0, h * 0.5 + pr * 1.1),
        Vec2::new(w * 0.5 + pr * 0.2, h * 0.5 + pr * 0.2),
        Vec2::new(-w * 0.5 - pr * 0.2, h * 0.5 + pr * 0.2),
        Vec2::new(w * 0.5 + pr * 0.2, -h * 0.5 - pr * 0.2),
        Vec2::new(-w * 0.5 - pr * 0.2, -h * 0.5 - pr * 0.2),
    ]
    .into_iter()
    .map(|position| Pocket {
        key: keys.next("pocket"),
        position,
        radius: pr,
    })
    .collect();

    (table, rails, pockets)
}

/// Owns table setup and cue-ball placement.
pub struct PoolTable {
    config: TableConfig,
}

impl PoolTable {
    pub fn new(config: TableConfig) -> Self {
        Self { config }
    }

    fn init_table(&self, ctx: &mut MatchContext) {
        let (table, rails, pockets) = build_table(&self.config, &mut ctx.keys);
        ctx.table = Some(table);
        ctx.rails = rails;
        ctx.pockets = pockets;
    }

    fn init_cue_ball(&self, ctx: &mut MatchContext, out: &mut Outbox) {
        let Some(table) = &ctx.table else {
            return;
        };
        if ctx.cue_ball().is_some() {
            return;
        }
        let ball = Ball {
            key: ctx.keys.next("ball"),
            position: table.cue_spot(),
            radius: table.ball_radius,
            color: BallColor::White,
        };
        ctx.balls.push(ball);
        out.emit(GameEvent::Update);
    }
}

impl Component for PoolTable {
    fn name(&self) -> &'static str {
        "pool-table"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[EventKind::InitTable, EventKind::InitCueBall]
    }

    fn handle(&mut self, event: &GameEvent, ctx: &mut MatchContext, out: &mut Outbox) {
        match event {
            GameEvent::InitTable => self.init_table(ctx),
            GameEvent::InitCueBall => self.init_cue_ball(ctx, out),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn six_rails_and_six_pockets() {
        let (table, rails, pockets) = build_table(&TableConfig::default(), &mut KeyGen::default());
        assert_eq!(rails.len(), 6);
        assert_eq!(pockets.len(), 6);
        assert!(rails.iter().all(|r| r.vertices.len() == 4));
        assert!((table.width - 2.24).abs() < 1e-6);
    }

    #[test]
    fn pockets_sit_outside_the_playing_surface() {
        let config = TableConfig::default();
        let (_, _, pockets) = build_table(&config, &mut KeyGen::default());
        for p in &pockets {
            let inside_x = p.position.x.abs() < config.width * 0.5;
            let inside_y = p.position.y.abs() < config.height * 0.5;
            assert!(!(inside_x && inside_y), "pocket {} is on the cloth", p.key);
        }
    }

    #[test]
    fn keys_are_unique() {
        let (table, rails, pockets) = build_table(&TableConfig::default(), &mut KeyGen::default());
        let mut keys: Vec<_> = rails.iter().map(|r| r.key.clone()).collect();
        keys.extend(pockets.iter().map(|p| p.key.clone()));
        keys.push(table.key);
        let count = keys.len();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), count);
    }

    #[test]
    fn cue_ball_placed_once_at_spot() {
        let mut table = PoolTable::new(TableConfig::default());
        let mut ctx = MatchContext::new();
        let mut out = Outbox::default();
        table.handle(&GameEvent::InitTable, &mut ctx, &mut out);
        table.handle(&GameEvent::InitCueBall, &mut ctx, &mut out);
        table.handle(&GameEvent::InitCueBall, &mut ctx, &mut out);

        assert_eq!(ctx.balls.len(), 1);
        let cue = ctx.cue_ball().unwrap();
        assert_eq!(cue.position, Vec2::new(-2.24 / 4.0, 0.0));
    }
}
