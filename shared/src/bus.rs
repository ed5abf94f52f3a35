//! Per-match event bus.
//!
//! A [`Coordinator`] owns the [`MatchContext`] and an ordered list of
//! [`Component`]s. Each component subscribes to event kinds; publishing an event
//! runs the subscribed handlers in registration order. Events a handler emits are
//! queued and dispatched after the current handler returns, so dispatch is never
//! re-entrant. Delayed events are kept as timers on the match clock and fire from
//! [`Coordinator::advance`].

use crate::model::{Ball, EntityKey, MatchContext};
use glam::Vec2;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Upper bound on events dispatched by a single publish. Hitting it means two
/// components keep re-triggering each other.
const MAX_EVENTS_PER_PUBLISH: usize = 4096;

/// A shot: impulse applied to one ball.
#[derive(Debug, Clone, PartialEq)]
pub struct Shot {
    pub ball: EntityKey,
    pub impulse: Vec2,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    Activate,
    Deactivate,
    /// One frame of wall-clock time, in seconds
    FrameLoop { dt: f32 },
    InitTable,
    RackBalls,
    InitCueBall,
    /// Both seats are filled (or the offline game starts)
    InitGame,
    /// Re-rack after a finished game
    NewGame,
    PointerStart(Vec2),
    PointerMove(Vec2),
    PointerEnd(Vec2),
    CueShot(Shot),
    BallInPocket { ball: EntityKey, pocket: EntityKey },
    /// All balls came to rest
    Settled,
    ShotEnd { pocketed: Vec<Ball> },
    PassTurn,
    GameOver,
    /// State changed, observers should resync
    Update,
    TerminateRoom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Activate,
    Deactivate,
    FrameLoop,
    InitTable,
    RackBalls,
    InitCueBall,
    InitGame,
    NewGame,
    PointerStart,
    PointerMove,
    PointerEnd,
    CueShot,
    BallInPocket,
    Settled,
    ShotEnd,
    PassTurn,
    GameOver,
    Update,
    TerminateRoom,
}

impl GameEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            GameEvent::Activate => EventKind::Activate,
            GameEvent::Deactivate => EventKind::Deactivate,
            GameEvent::FrameLoop { .. } => EventKind::FrameLoop,
            GameEvent::InitTable => EventKind::InitTable,
            GameEvent::RackBalls => EventKind::RackBalls,
            GameEvent::InitCueBall => EventKind::InitCueBall,
            GameEvent::InitGame => EventKind::InitGame,
            GameEvent::NewGame => EventKind::NewGame,
            GameEvent::PointerStart(_) => EventKind::PointerStart,
            GameEvent::PointerMove(_) => EventKind::PointerMove,
            GameEvent::PointerEnd(_) => EventKind::PointerEnd,
            GameEvent::CueShot(_) => EventKind::CueShot,
            GameEvent::BallInPocket { .. } => EventKind::BallInPocket,
            GameEvent::Settled => EventKind::Settled,
            GameEvent::ShotEnd { .. } => EventKind::ShotEnd,
            GameEvent::PassTurn => EventKind::PassTurn,
            GameEvent::GameOver => EventKind::GameOver,
            GameEvent::Update => EventKind::Update,
            GameEvent::TerminateRoom => EventKind::TerminateRoom,
        }
    }
}

/// Events produced by a handler, dispatched once it returns.
#[derive(Debug, Default)]
pub struct Outbox {
    emitted: Vec<GameEvent>,
    scheduled: Vec<(Duration, GameEvent)>,
}

impl Outbox {
    pub fn emit(&mut self, event: GameEvent) {
        self.emitted.push(event);
    }

    /// Dispatch `event` once the match clock has advanced by `delay`.
    pub fn schedule(&mut self, delay: Duration, event: GameEvent) {
        self.scheduled.push((delay, event));
    }

    /// Immediate events, in emission order.
    pub fn into_emitted(self) -> Vec<GameEvent> {
        self.emitted
    }
}

/// A unit of match behavior.
pub trait Component: Send {
    fn name(&self) -> &'static str;

    /// Event kinds this component handles.
    fn subscriptions(&self) -> &'static [EventKind];

    fn handle(&mut self, event: &GameEvent, ctx: &mut MatchContext, out: &mut Outbox);
}

struct Timer {
    due: Duration,
    event: GameEvent,
}

/// Root of one match: owns the context, the components and the timers.
pub struct Coordinator {
    ctx: MatchContext,
    components: Vec<Box<dyn Component>>,
    routes: HashMap<EventKind, Vec<usize>>,
    timers: Vec<Timer>,
    clock: Duration,
}

impl Coordinator {
    pub fn new(ctx: MatchContext) -> Self {
        Self {
            ctx,
            components: Vec::new(),
            routes: HashMap::new(),
            timers: Vec::new(),
            clock: Duration::ZERO,
        }
    }

    /// Register a component. Handlers run in registration order.
    pub fn with(mut self, component: impl Component + 'static) -> Self {
        let index = self.components.len();
        for &kind in component.subscriptions() {
            self.routes.entry(kind).or_default().push(index);
        }
        self.components.push(Box::new(component));
        self
    }

    pub fn context(&self) -> &MatchContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut MatchContext {
        &mut self.ctx
    }

    pub fn component_names(&self) -> Vec<&'static str> {
        self.components.iter().map(|c| c.name()).collect()
    }

    /// Match clock: total time advanced so far.
    pub fn clock(&self) -> Duration {
        self.clock
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Drop every scheduled event.
    pub fn cancel_timers(&mut self) {
        self.timers.clear();
    }

    /// Dispatch `event` and everything it triggers. Returns the dispatched events
    /// in order, starting with `event` itself.
    pub fn publish(&mut self, event: GameEvent) -> Vec<GameEvent> {
        let mut queue = VecDeque::from([event]);
        let mut dispatched = Vec::new();

        while let Some(event) = queue.pop_front() {
            if dispatched.len() >= MAX_EVENTS_PER_PUBLISH {
                tracing::error!(
                    "event cascade exceeded {} events, dropping {:?} and {} queued",
                    MAX_EVENTS_PER_PUBLISH,
                    event.kind(),
                    queue.len()
                );
                break;
            }

            let mut out = Outbox::default();
            if let Some(handlers) = self.routes.get(&event.kind()) {
                for &index in handlers {
                    self.components[index].handle(&event, &mut self.ctx, &mut out);
                }
            }

            queue.extend(out.emitted);
            for (delay, scheduled) in out.scheduled {
                self.timers.push(Timer {
                    due: self.clock + delay,
                    event: scheduled,
                });
            }
            dispatched.push(event);
        }

        dispatched
    }

    /// Advance the match clock by `dt` seconds: fire due timers, then run one
    /// frame loop.
    pub fn advance(&mut self, dt: f32) -> Vec<GameEvent> {
        self.clock += Duration::from_secs_f32(dt.max(0.0));

        let mut dispatched = Vec::new();
        let (due, pending): (Vec<Timer>, Vec<Timer>) = std::mem::take(&mut self.timers)
            .into_iter()
            .partition(|t| t.due <= self.clock);
        self.timers = pending;
        for timer in due {
            dispatched.extend(self.publish(timer.event));
        }

        dispatched.extend(self.publish(GameEvent::FrameLoop { dt }));
        dispatched
    }
}
