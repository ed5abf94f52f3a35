use crate::bus::{Component, EventKind, GameEvent, Outbox, Shot};
use crate::config::PhysicsConfig;
use crate::model::{EntityKey, MatchContext};
use glam::Vec2;
use rapier2d::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

fn to_vector(v: Vec2) -> Vector<Real> {
    vector![v.x, v.y]
}

fn to_vec2(v: &Vector<Real>) -> Vec2 {
    Vec2::new(v.x, v.y)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Ball,
    Rail,
    Pocket,
}

#[derive(Debug, Clone, Copy)]
struct BodyRef {
    kind: BodyKind,
    body: RigidBodyHandle,
    collider: Option<ColliderHandle>,
}

/// Collects collision events raised during a step. Nothing is dispatched from
/// inside the pipeline; the queue is drained once the step returns.
#[derive(Default)]
struct CollisionQueue {
    events: Mutex<Vec<CollisionEvent>>,
}

impl CollisionQueue {
    fn drain(&mut self) -> Vec<CollisionEvent> {
        self.events
            .get_mut()
            .map(std::mem::take)
            .unwrap_or_default()
    }
}

impl EventHandler for CollisionQueue {
    fn handle_collision_event(
        &self,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        event: CollisionEvent,
        _contact_pair: Option<&ContactPair>,
    ) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    fn handle_contact_force_event(
        &self,
        _dt: Real,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        _contact_pair: &ContactPair,
        _total_force_magnitude: Real,
    ) {
    }
}

/// Rapier world mirroring the table entities of one match.
pub struct PhysicsWorld {
    config: PhysicsConfig,
    integration_parameters: IntegrationParameters,
    pipeline: PhysicsPipeline,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,
    queue: CollisionQueue,
    entities: HashMap<EntityKey, BodyRef>,
    owners: HashMap<ColliderHandle, EntityKey>,
}

impl PhysicsWorld {
    pub fn new(config: PhysicsConfig) -> Self {
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = config.step_seconds();
        Self {
            config,
            integration_parameters,
            pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            queue: CollisionQueue::default(),
            entities: HashMap::new(),
            owners: HashMap::new(),
        }
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entities.contains_key(key)
    }

    fn attach(&mut self, key: &EntityKey, kind: BodyKind, body: RigidBody, collider: Option<Collider>) {
        let body = self.bodies.insert(body);
        let collider = collider.map(|c| {
            let handle = self
                .colliders
                .insert_with_parent(c, body, &mut self.bodies);
            self.owners.insert(handle, key.clone());
            handle
        });
        self.entities.insert(
            key.clone(),
            BodyRef {
                kind,
                body,
                collider,
            },
        );
    }

    pub fn add_ball(&mut self, key: &EntityKey, position: Vec2, radius: f32) {
        let c = &self.config;
        let body = RigidBodyBuilder::dynamic()
            .translation(to_vector(position))
            .linear_damping(c.ball_linear_damping)
            .angular_damping(c.ball_angular_damping)
            .ccd_enabled(true)
            .build();
        let collider = ColliderBuilder::ball(radius)
            .friction(c.ball_friction)
            .restitution(c.ball_restitution)
            .density(c.ball_density)
            .build();
        self.attach(key, BodyKind::Ball, body, Some(collider));
    }

    pub fn add_rail(&mut self, key: &EntityKey, vertices: &[Vec2]) {
        let points: Vec<Point<Real>> = vertices.iter().map(|v| point![v.x, v.y]).collect();
        let collider = match ColliderBuilder::convex_hull(&points) {
            Some(builder) => Some(
                builder
                    .friction(self.config.rail_friction)
                    .restitution(self.config.rail_restitution)
                    .build(),
            ),
            None => {
                tracing::warn!("rail {} has a degenerate polygon, no collider", key);
                None
            }
        };
        self.attach(key, BodyKind::Rail, RigidBodyBuilder::fixed().build(), collider);
    }

    pub fn add_pocket(&mut self, key: &EntityKey, position: Vec2, radius: f32) {
        let body = RigidBodyBuilder::fixed()
            .translation(to_vector(position))
            .build();
        let collider = ColliderBuilder::ball(radius)
            .sensor(true)
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .build();
        self.attach(key, BodyKind::Pocket, body, Some(collider));
    }

    pub fn remove(&mut self, key: &EntityKey) {
        let Some(entry) = self.entities.remove(key) else {
            return;
        };
        if let Some(collider) = entry.collider {
            self.owners.remove(&collider);
        }
        self.bodies.remove(
            entry.body,
            &mut self.island_manager,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
    }

    pub fn clear(&mut self) {
        let keys: Vec<EntityKey> = self.entities.keys().cloned().collect();
        for key in keys {
            self.remove(&key);
        }
    }

    /// Apply an impulse to a ball. Returns false if the ball has no body.
    pub fn apply_impulse(&mut self, key: &EntityKey, impulse: Vec2) -> bool {
        let Some(entry) = self.entities.get(key) else {
            return false;
        };
        match self.bodies.get_mut(entry.body) {
            Some(rb) if entry.kind == BodyKind::Ball => {
                rb.apply_impulse(to_vector(impulse), true);
                true
            }
            _ => false,
        }
    }

    pub fn position(&self, key: &EntityKey) -> Option<Vec2> {
        let entry = self.entities.get(key)?;
        self.bodies.get(entry.body).map(|rb| to_vec2(rb.translation()))
    }

    pub fn velocity(&self, key: &EntityKey) -> Option<Vec2> {
        let entry = self.entities.get(key)?;
        self.bodies.get(entry.body).map(|rb| to_vec2(rb.linvel()))
    }

    /// Run one fixed step. Returns `(ball, pocket)` pairs whose contact started
    /// during the step.
    pub fn step(&mut self) -> Vec<(EntityKey, EntityKey)> {
        self.pipeline.step(
            &vector![0.0, 0.0],
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &(),
            &self.queue,
        );

        let mut captures = Vec::new();
        for event in self.queue.drain() {
            let CollisionEvent::Started(h1, h2, _) = event else {
                continue;
            };
            let (Some(a), Some(b)) = (self.owners.get(&h1), self.owners.get(&h2)) else {
                continue;
            };
            let kind = |key: &EntityKey| self.entities.get(key).map(|e| e.kind);
            match (kind(a), kind(b)) {
                (Some(BodyKind::Ball), Some(BodyKind::Pocket)) => {
                    captures.push((a.clone(), b.clone()))
                }
                (Some(BodyKind::Pocket), Some(BodyKind::Ball)) => {
                    captures.push((b.clone(), a.clone()))
                }
                _ => {}
            }
        }
        captures
    }

    /// Whether every ball is below the rest thresholds (or asleep).
    pub fn is_at_rest(&self) -> bool {
        self.ball_bodies().all(|rb| {
            rb.is_sleeping()
                || (rb.linvel().norm() <= self.config.rest_speed
                    && rb.angvel().abs() <= self.config.rest_angular_speed)
        })
    }

    /// Zero residual velocities on every ball.
    pub fn halt(&mut self) {
        for entry in self.entities.values() {
            if entry.kind != BodyKind::Ball {
                continue;
            }
            if let Some(rb) = self.bodies.get_mut(entry.body) {
                rb.set_linvel(vector![0.0, 0.0], false);
                rb.set_angvel(0.0, false);
            }
        }
    }

    fn ball_bodies(&self) -> impl Iterator<Item = &RigidBody> + '_ {
        self.entities
            .values()
            .filter(|e| e.kind == BodyKind::Ball)
            .filter_map(|e| self.bodies.get(e.body))
    }

    fn ball_keys(&self) -> Vec<EntityKey> {
        self.entities
            .iter()
            .filter(|(_, e)| e.kind == BodyKind::Ball)
            .map(|(k, _)| k.clone())
            .collect()
    }
}

/// Drives the physics world from frame-loop and cue-shot events.
pub struct TablePhysics {
    world: PhysicsWorld,
    accumulator: f32,
    /// Half extents beyond which a ball has left the table
    bounds: Option<Vec2>,
    /// Balls already reported as pocketed
    captured: HashSet<EntityKey>,
}

impl TablePhysics {
    pub fn new(config: PhysicsConfig) -> Self {
        Self {
            world: PhysicsWorld::new(config),
            accumulator: 0.0,
            bounds: None,
            captured: HashSet::new(),
        }
    }

    pub fn world(&self) -> &PhysicsWorld {
        &self.world
    }

    /// Bring the world in line with the context, keyed by entity key.
    fn sync(&mut self, ctx: &MatchContext) {
        if let Some(table) = &ctx.table {
            let margin = table.pocket_radius * 2.0;
            self.bounds = Some(Vec2::new(
                table.width * 0.5 + margin,
                table.height * 0.5 + margin,
            ));
        }

        let mut live: HashSet<&EntityKey> = HashSet::new();
        for rail in &ctx.rails {
            live.insert(&rail.key);
            if !self.world.contains(&rail.key) {
                self.world.add_rail(&rail.key, &rail.vertices);
            }
        }
        for pocket in &ctx.pockets {
            live.insert(&pocket.key);
            if !self.world.contains(&pocket.key) {
                self.world.add_pocket(&pocket.key, pocket.position, pocket.radius);
            }
        }
        for ball in &ctx.balls {
            if self.captured.contains(&ball.key) {
                continue;
            }
            live.insert(&ball.key);
            if !self.world.contains(&ball.key) {
                self.world.add_ball(&ball.key, ball.position, ball.radius);
            }
        }

        let gone: Vec<EntityKey> = self
            .world
            .entities
            .keys()
            .filter(|k| !live.contains(k))
            .cloned()
            .collect();
        for key in gone {
            self.world.remove(&key);
        }
        self.captured
            .retain(|key| ctx.balls.iter().any(|b| &b.key == key));
    }

    fn capture(&mut self, ball: EntityKey, pocket: EntityKey, out: &mut Outbox) {
        if !self.captured.insert(ball.clone()) {
            return;
        }
        self.world.remove(&ball);
        out.emit(GameEvent::BallInPocket { ball, pocket });
    }

    /// Balls that tunnelled through a rail count as pocketed in the nearest pocket.
    fn escaped(&self, ctx: &MatchContext) -> Vec<(EntityKey, EntityKey)> {
        let Some(bounds) = self.bounds else {
            return Vec::new();
        };
        self.world
            .ball_keys()
            .into_iter()
            .filter_map(|key| {
                let p = self.world.position(&key)?;
                if p.x.abs() <= bounds.x && p.y.abs() <= bounds.y {
                    return None;
                }
                let pocket = ctx.pockets.iter().min_by(|a, b| {
                    a.position
                        .distance_squared(p)
                        .total_cmp(&b.position.distance_squared(p))
                })?;
                tracing::debug!("ball {} left the table at {:?}", key, p);
                Some((key, pocket.key.clone()))
            })
            .collect()
    }

    fn frame(&mut self, dt: f32, ctx: &mut MatchContext, out: &mut Outbox) {
        self.sync(ctx);

        if ctx.sleep {
            self.accumulator = 0.0;
            return;
        }

        let step = self.world.config.step_seconds();
        let cap = step * self.world.config.max_steps_per_frame as f32;
        self.accumulator = (self.accumulator + dt.max(0.0)).min(cap);

        while self.accumulator >= step {
            self.accumulator -= step;
            let mut captures = self.world.step();
            captures.extend(self.escaped(ctx));
            for (ball, pocket) in captures {
                self.capture(ball, pocket, out);
            }

            if self.world.is_at_rest() {
                self.world.halt();
                ctx.sleep = true;
                self.accumulator = 0.0;
                out.emit(GameEvent::Settled);
                break;
            }
        }

        for ball in ctx.balls.iter_mut() {
            if let Some(position) = self.world.position(&ball.key) {
                ball.position = position;
            }
        }
    }

    fn shoot(&mut self, shot: &Shot, ctx: &mut MatchContext) {
        self.sync(ctx);
        if !self.world.apply_impulse(&shot.ball, shot.impulse) {
            tracing::debug!("impulse for {} ignored, no live body", shot.ball);
            return;
        }
        ctx.sleep = false;
    }
}

impl Component for TablePhysics {
    fn name(&self) -> &'static str {
        "physics"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[EventKind::FrameLoop, EventKind::CueShot, EventKind::Deactivate]
    }

    fn handle(&mut self, event: &GameEvent, ctx: &mut MatchContext, out: &mut Outbox) {
        match event {
            GameEvent::FrameLoop { dt } => self.frame(*dt, ctx, out),
            GameEvent::CueShot(shot) => self.shoot(shot, ctx),
            GameEvent::Deactivate => {
                self.world.clear();
                self.captured.clear();
                self.accumulator = 0.0;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableConfig;
    use crate::model::{Ball, BallColor, Hue};
    use crate::table::build_table;

    const STEP: f32 = 1.0 / 60.0;

    fn table_context() -> MatchContext {
        let mut ctx = MatchContext::new();
        let (table, rails, pockets) = build_table(&TableConfig::default(), &mut ctx.keys);
        ctx.table = Some(table);
        ctx.rails = rails;
        ctx.pockets = pockets;
        ctx
    }

    fn add_ball(ctx: &mut MatchContext, position: Vec2, color: BallColor) -> EntityKey {
        let key = ctx.keys.next("ball");
        ctx.balls.push(Ball {
            key: key.clone(),
            position,
            radius: 0.031,
            color,
        });
        key
    }

    fn shoot(physics: &mut TablePhysics, ctx: &mut MatchContext, ball: &EntityKey, impulse: Vec2) {
        let shot = Shot {
            ball: ball.clone(),
            impulse,
        };
        physics.handle(&GameEvent::CueShot(shot), ctx, &mut Outbox::default());
    }

    fn run(physics: &mut TablePhysics, ctx: &mut MatchContext, frames: usize) -> Vec<GameEvent> {
        let mut events = Vec::new();
        for _ in 0..frames {
            let mut out = Outbox::default();
            physics.handle(&GameEvent::FrameLoop { dt: STEP }, ctx, &mut out);
            events.extend(out.into_emitted());
        }
        events
    }

    #[test]
    fn sync_creates_one_body_per_entity() {
        let mut ctx = table_context();
        add_ball(&mut ctx, Vec2::ZERO, BallColor::White);
        let mut physics = TablePhysics::new(PhysicsConfig::default());
        run(&mut physics, &mut ctx, 1);
        assert_eq!(physics.world().body_count(), 6 + 6 + 1);
    }

    #[test]
    fn removed_ball_loses_its_body() {
        let mut ctx = table_context();
        let key = add_ball(&mut ctx, Vec2::ZERO, BallColor::White);
        let mut physics = TablePhysics::new(PhysicsConfig::default());
        run(&mut physics, &mut ctx, 1);
        ctx.remove_ball(&key);
        run(&mut physics, &mut ctx, 1);
        assert!(!physics.world().contains(&key));
    }

    #[test]
    fn untouched_table_settles_within_one_step_and_stays_settled() {
        let mut ctx = table_context();
        add_ball(&mut ctx, Vec2::new(-0.5, 0.0), BallColor::White);
        add_ball(&mut ctx, Vec2::new(0.5, 0.0), BallColor::Black);
        ctx.sleep = false;
        let mut physics = TablePhysics::new(PhysicsConfig::default());

        let first = run(&mut physics, &mut ctx, 1);
        assert_eq!(first, vec![GameEvent::Settled]);
        assert!(ctx.sleep);

        let later = run(&mut physics, &mut ctx, 30);
        assert!(later.is_empty());
        assert!(ctx.sleep);
    }

    #[test]
    fn impulse_moves_the_ball_until_it_settles() {
        let mut ctx = table_context();
        let cue = add_ball(&mut ctx, Vec2::new(-0.5, 0.0), BallColor::White);
        let mut physics = TablePhysics::new(PhysicsConfig::default());
        run(&mut physics, &mut ctx, 1);

        shoot(&mut physics, &mut ctx, &cue, Vec2::new(0.005, 0.0));
        assert!(!ctx.sleep);
        run(&mut physics, &mut ctx, 10);
        assert!(ctx.ball(&cue).unwrap().position.x > -0.5);

        let events = run(&mut physics, &mut ctx, 60 * 20);
        assert_eq!(events.iter().filter(|e| **e == GameEvent::Settled).count(), 1);
        assert!(ctx.sleep);
        assert_eq!(physics.world().velocity(&cue), Some(Vec2::ZERO));
    }

    #[test]
    fn impulse_for_unknown_ball_is_ignored() {
        let mut ctx = table_context();
        let mut physics = TablePhysics::new(PhysicsConfig::default());
        run(&mut physics, &mut ctx, 1);
        shoot(&mut physics, &mut ctx, &EntityKey::from("ball-404"), Vec2::X);
        assert!(ctx.sleep);
    }

    #[test]
    fn ball_driven_into_corner_pocket_is_reported_once() {
        let mut ctx = table_context();
        // Top right corner pocket, approached along the diagonal of its mouth
        let pocket = ctx.pockets[2].position;
        let start = pocket - Vec2::new(0.2, 0.2);
        let ball = add_ball(&mut ctx, start, BallColor::Stripe(Hue::Red));
        let mut physics = TablePhysics::new(PhysicsConfig::default());
        run(&mut physics, &mut ctx, 1);

        shoot(&mut physics, &mut ctx, &ball, Vec2::ONE.normalize() * 0.005);
        let events = run(&mut physics, &mut ctx, 60 * 5);
        let pocketed: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, GameEvent::BallInPocket { ball: b, .. } if *b == ball))
            .collect();
        assert_eq!(pocketed.len(), 1);
        let settled_at = events.iter().position(|e| *e == GameEvent::Settled).unwrap();
        let pocketed_at = events
            .iter()
            .position(|e| matches!(e, GameEvent::BallInPocket { .. }))
            .unwrap();
        assert!(pocketed_at < settled_at);
    }

    #[test]
    fn no_steps_while_settled() {
        let mut ctx = table_context();
        let key = add_ball(&mut ctx, Vec2::new(0.1, 0.1), BallColor::White);
        let mut physics = TablePhysics::new(PhysicsConfig::default());
        run(&mut physics, &mut ctx, 5);
        assert_eq!(ctx.ball(&key).unwrap().position, Vec2::new(0.1, 0.1));
    }

    #[test]
    fn deactivate_clears_world() {
        let mut ctx = table_context();
        add_ball(&mut ctx, Vec2::ZERO, BallColor::White);
        let mut physics = TablePhysics::new(PhysicsConfig::default());
        run(&mut physics, &mut ctx, 1);
        physics.handle(&GameEvent::Deactivate, &mut ctx, &mut Outbox::default());
        assert_eq!(physics.world().body_count(), 0);
    }
}
