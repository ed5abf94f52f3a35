//! Room authority: one task per room owns the match and is the only writer.

use crate::config::ServerConfig;
use crate::lobby::RoomRegistry;
use eightball_shared::bus::{Coordinator, GameEvent, Shot};
use eightball_shared::config::GameConfig;
use eightball_shared::game::two_player_match;
use eightball_shared::model::{EntityKey, Player, PlayerId};
use eightball_shared::protocol::{CueShotMsg, RoomUpdateMsg, WelcomeMsg, PROTOCOL_VERSION};
use glam::Vec2;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

pub const SEATS: usize = 2;

/// Who a connection claims to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub player: PlayerId,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("room is full")]
    RoomFull,
    #[error("player {0} is seated with a different token")]
    BadToken(PlayerId),
    #[error("room is closed")]
    RoomClosed,
}

/// Commands from connections to the room task
pub enum RoomCommand {
    Join {
        identity: Identity,
        response: oneshot::Sender<Result<(), JoinError>>,
    },
    Connect {
        identity: Identity,
        response: oneshot::Sender<Result<(WelcomeMsg, RoomUpdateMsg), JoinError>>,
    },
    CueShot {
        player: PlayerId,
        shot: CueShotMsg,
    },
    NewGame {
        player: PlayerId,
    },
    Disconnect {
        player: PlayerId,
    },
}

/// Broadcasts from the room task to its connections
#[derive(Debug, Clone)]
pub enum RoomBroadcast {
    Update(RoomUpdateMsg),
    Closed { reason: String },
}

/// Idle lease: renewed by accepted shots, expires once.
#[derive(Debug)]
struct Lease {
    timeout: Duration,
    deadline: Instant,
    expired: bool,
}

impl Lease {
    fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            timeout,
            deadline: now + timeout,
            expired: false,
        }
    }

    fn extend(&mut self, now: Instant) {
        if !self.expired {
            self.deadline = now + self.timeout;
        }
    }

    /// True exactly once, the first time it is polled past the deadline.
    fn poll(&mut self, now: Instant) -> bool {
        if self.expired || now < self.deadline {
            return false;
        }
        self.expired = true;
        true
    }
}

/// State of one room, owned by its task.
pub struct RoomState {
    pub id: String,
    config: GameConfig,
    game: Coordinator,
    tokens: HashMap<PlayerId, String>,
    lease: Lease,
    connections: usize,
}

impl RoomState {
    /// Create and activate a room: table built, balls racked, turn order set.
    pub fn new(
        id: String,
        config: GameConfig,
        rng: ChaCha8Rng,
        idle_timeout: Duration,
        now: Instant,
    ) -> Self {
        let mut game = two_player_match(&config, rng);
        game.publish(GameEvent::Activate);
        Self {
            id,
            config,
            game,
            tokens: HashMap::new(),
            lease: Lease::new(idle_timeout, now),
            connections: 0,
        }
    }

    pub fn game(&self) -> &Coordinator {
        &self.game
    }

    /// Seat a player. Returns whether the seating changed anything; re-joining
    /// with the same identity is a no-op. Filling the last seat starts the game.
    pub fn join(&mut self, identity: Identity) -> Result<bool, JoinError> {
        if let Some(token) = self.tokens.get(&identity.player) {
            return if *token == identity.token {
                Ok(false)
            } else {
                Err(JoinError::BadToken(identity.player))
            };
        }
        if self.tokens.len() >= SEATS {
            return Err(JoinError::RoomFull);
        }

        tracing::info!("Room {}: {} took seat {}", self.id, identity.player, self.tokens.len() + 1);
        self.game
            .context_mut()
            .players
            .push(Player::new(identity.player.clone()));
        self.tokens.insert(identity.player, identity.token);

        if self.tokens.len() == SEATS {
            self.game.publish(GameEvent::InitGame);
            tracing::info!("Room {}: game started", self.id);
        }
        Ok(true)
    }

    pub fn authenticate(&self, identity: &Identity) -> bool {
        self.tokens
            .get(&identity.player)
            .is_some_and(|token| *token == identity.token)
    }

    pub fn welcome(&self, player: &PlayerId) -> WelcomeMsg {
        WelcomeMsg {
            protocol_version: PROTOCOL_VERSION,
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            room_id: self.id.clone(),
            player_id: player.0.clone(),
            config: self.config,
        }
    }

    /// Validate and apply a shot. Invalid shots are dropped without a reply.
    pub fn handle_cue_shot(&mut self, player: &PlayerId, shot: &CueShotMsg, now: Instant) -> bool {
        let ctx = self.game.context();
        if !ctx.game_started || ctx.game_over || ctx.shot_in_progress || !ctx.sleep {
            tracing::debug!("Room {}: shot from {} dropped, table busy", self.id, player);
            return false;
        }
        if ctx.shooter().map(|p| &p.id) != Some(player) {
            tracing::debug!("Room {}: shot from {} dropped, not their turn", self.id, player);
            return false;
        }
        let Some(cue_ball) = ctx.cue_ball() else {
            return false;
        };
        if cue_ball.key.as_str() != shot.ball_key {
            tracing::debug!("Room {}: shot on {} is not the cue ball", self.id, shot.ball_key);
            return false;
        }
        let impulse = Vec2::new(shot.impulse.x as f32, shot.impulse.y as f32);
        if !impulse.is_finite() || impulse == Vec2::ZERO {
            return false;
        }

        let shot = Shot {
            ball: EntityKey(shot.ball_key.clone()),
            impulse: impulse.clamp_length_max(self.config.cue.max_impulse),
        };
        self.game.publish(GameEvent::CueShot(shot));
        self.lease.extend(now);
        true
    }

    /// Re-rack after game over. Only seated players may ask.
    pub fn new_game(&mut self, player: &PlayerId) -> bool {
        if !self.game.context().game_over || !self.tokens.contains_key(player) {
            return false;
        }
        tracing::info!("Room {}: {} started a new game", self.id, player);
        self.game.publish(GameEvent::NewGame);
        true
    }

    /// Advance the match by one tick. Returns true if state changed in a way
    /// observers should see right away.
    pub fn tick(&mut self, dt: f32) -> bool {
        self.game
            .advance(dt)
            .iter()
            .any(|e| matches!(e, GameEvent::Update))
    }

    pub fn snapshot(&self) -> RoomUpdateMsg {
        RoomUpdateMsg::from_context(self.game.context())
    }

    pub fn is_settled(&self) -> bool {
        self.game.context().sleep
    }

    /// Sockets currently attached to this room
    pub fn connections(&self) -> usize {
        self.connections
    }

    pub fn lease_deadline(&self) -> Instant {
        self.lease.deadline
    }

    /// Poll the idle lease. Requests termination exactly once.
    pub fn poll_lease(&mut self, now: Instant) -> bool {
        if !self.lease.poll(now) {
            return false;
        }
        self.game.publish(GameEvent::TerminateRoom);
        true
    }

    /// Cancel scheduled work and drop the simulation.
    pub fn deactivate(&mut self) {
        self.game.cancel_timers();
        self.game.publish(GameEvent::Deactivate);
    }

    /// Apply one command. Returns true if a snapshot should go out now.
    pub fn handle_command(&mut self, cmd: RoomCommand, now: Instant) -> bool {
        match cmd {
            RoomCommand::Join { identity, response } => {
                let result = self.join(identity);
                let changed = matches!(result, Ok(true));
                let _ = response.send(result.map(|_| ()));
                changed
            }
            RoomCommand::Connect { identity, response } => {
                let result = if self.authenticate(&identity) {
                    self.connections += 1;
                    tracing::info!(
                        "Room {}: {} connected ({} open)",
                        self.id,
                        identity.player,
                        self.connections
                    );
                    Ok((self.welcome(&identity.player), self.snapshot()))
                } else {
                    Err(JoinError::BadToken(identity.player))
                };
                let _ = response.send(result);
                false
            }
            RoomCommand::CueShot { player, shot } => self.handle_cue_shot(&player, &shot, now),
            RoomCommand::NewGame { player } => self.new_game(&player),
            RoomCommand::Disconnect { player } => {
                self.connections = self.connections.saturating_sub(1);
                tracing::info!(
                    "Room {}: {} disconnected ({} open)",
                    self.id,
                    player,
                    self.connections
                );
                false
            }
        }
    }
}

/// Run a room until its lease expires. Owns the room state.
pub async fn run_room(
    mut state: RoomState,
    mut cmd_rx: mpsc::Receiver<RoomCommand>,
    broadcast_tx: broadcast::Sender<RoomBroadcast>,
    registry: RoomRegistry,
    config: Arc<ServerConfig>,
) {
    let dt = 1.0 / config.tick_rate_hz as f32;
    let mut tick_interval = tokio::time::interval(config.tick_duration());
    tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tick_count: u64 = 0;

    let reason = loop {
        tokio::select! {
            _ = tick_interval.tick() => {
                let changed = state.tick(dt);
                tick_count += 1;
                let every = if state.is_settled() {
                    config.idle_broadcast_every()
                } else {
                    config.broadcast_every()
                };
                if changed || tick_count % every == 0 {
                    let _ = broadcast_tx.send(RoomBroadcast::Update(state.snapshot()));
                }
            }

            _ = tokio::time::sleep_until(state.lease_deadline()) => {
                if state.poll_lease(Instant::now()) {
                    break "idle timeout";
                }
            }

            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    break "shutdown";
                };
                if state.handle_command(cmd, Instant::now()) {
                    let _ = broadcast_tx.send(RoomBroadcast::Update(state.snapshot()));
                }
            }
        }
    };

    tracing::info!("Room {} terminated: {}", state.id, reason);
    state.deactivate();
    registry.remove(&state.id).await;
    let _ = broadcast_tx.send(RoomBroadcast::Closed {
        reason: reason.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use eightball_shared::protocol::Vec2Wire;
    use rand::SeedableRng;

    const DT: f32 = 1.0 / 60.0;
    const IDLE: Duration = Duration::from_secs(30 * 60);

    fn identity(player: &str) -> Identity {
        Identity {
            player: PlayerId(player.to_string()),
            token: format!("{}-token", player),
        }
    }

    fn room(now: Instant) -> RoomState {
        RoomState::new(
            "abc-def-ghj".to_string(),
            GameConfig::default(),
            ChaCha8Rng::seed_from_u64(5),
            IDLE,
            now,
        )
    }

    fn full_room(now: Instant) -> RoomState {
        let mut room = room(now);
        room.join(identity("alice")).unwrap();
        room.join(identity("bob")).unwrap();
        room
    }

    fn cue_shot(room: &RoomState, x: f64, y: f64) -> CueShotMsg {
        CueShotMsg {
            ball_key: room.game().context().cue_ball().unwrap().key.0.clone(),
            impulse: Vec2Wire { x, y },
        }
    }

    fn settle(room: &mut RoomState) {
        for _ in 0..60 * 30 {
            room.tick(DT);
            let ctx = room.game().context();
            if ctx.sleep && !ctx.shot_in_progress {
                return;
            }
        }
        panic!("table never settled");
    }

    #[test]
    fn activation_racks_and_orders_turns() {
        let room = room(Instant::now());
        let snapshot = room.snapshot();
        assert_eq!(snapshot.balls.len(), 15);
        assert_eq!(snapshot.rails.len(), 6);
        assert!(snapshot.table.is_some());
        assert_eq!(room.game().context().turn.turns.len(), 2);
        assert_eq!(snapshot.turn.as_deref(), Some("turn-one"));
        assert!(!snapshot.game_started);
    }

    #[test]
    fn second_seat_starts_the_game() {
        let room = full_room(Instant::now());
        let snapshot = room.snapshot();
        assert!(snapshot.game_started);
        assert_eq!(snapshot.balls.len(), 16);
        assert_eq!(snapshot.turn.as_deref(), Some("turn-one"));
        assert_eq!(snapshot.players[0].group.as_deref(), Some("striped"));
    }

    #[test]
    fn rejoin_is_idempotent_and_third_player_is_refused() {
        let mut room = full_room(Instant::now());
        assert_eq!(room.join(identity("alice")), Ok(false));
        assert_eq!(room.join(identity("carol")), Err(JoinError::RoomFull));
        let impostor = Identity {
            player: PlayerId("bob".into()),
            token: "guess".into(),
        };
        assert!(matches!(room.join(impostor.clone()), Err(JoinError::BadToken(_))));
        assert!(!room.authenticate(&impostor));
        assert!(room.authenticate(&identity("bob")));
        assert_eq!(room.game().context().players.len(), 2);
    }

    #[test]
    fn shot_from_non_turn_holder_changes_nothing() {
        let now = Instant::now();
        let mut room = full_room(now);
        let before = room.snapshot();
        let shot = cue_shot(&room, 0.05, 0.0);
        assert!(!room.handle_cue_shot(&PlayerId("bob".into()), &shot, now));
        assert!(!room.handle_cue_shot(&PlayerId("mallory".into()), &shot, now));
        room.tick(DT);
        assert_eq!(room.snapshot(), before);
    }

    #[test]
    fn shot_before_game_start_is_dropped() {
        let now = Instant::now();
        let mut room = room(now);
        room.join(identity("alice")).unwrap();
        let shot = CueShotMsg {
            ball_key: "ball-1".into(),
            impulse: Vec2Wire { x: 0.05, y: 0.0 },
        };
        assert!(!room.handle_cue_shot(&PlayerId("alice".into()), &shot, now));
    }

    #[test]
    fn second_shot_while_rolling_is_dropped() {
        let now = Instant::now();
        let mut room = full_room(now);
        let shot = cue_shot(&room, 0.0, 0.002);
        assert!(room.handle_cue_shot(&PlayerId("alice".into()), &shot, now));
        assert!(!room.handle_cue_shot(&PlayerId("alice".into()), &shot, now));
    }

    #[test]
    fn shot_on_object_ball_is_dropped() {
        let now = Instant::now();
        let mut room = full_room(now);
        let shot = CueShotMsg {
            ball_key: room.game().context().balls[0].key.0.clone(),
            impulse: Vec2Wire { x: 0.05, y: 0.0 },
        };
        assert!(!room.handle_cue_shot(&PlayerId("alice".into()), &shot, now));
    }

    #[test]
    fn non_finite_impulse_is_dropped() {
        let now = Instant::now();
        let mut room = full_room(now);
        let shot = cue_shot(&room, f64::NAN, 0.0);
        assert!(!room.handle_cue_shot(&PlayerId("alice".into()), &shot, now));
    }

    #[test]
    fn missed_shot_passes_the_turn() {
        let now = Instant::now();
        let mut room = full_room(now);
        let shot = cue_shot(&room, 0.0, 0.002);
        assert!(room.handle_cue_shot(&PlayerId("alice".into()), &shot, now));
        settle(&mut room);
        let snapshot = room.snapshot();
        assert_eq!(snapshot.turn.as_deref(), Some("turn-two"));
        assert_eq!(snapshot.balls.len(), 16);

        // Now it is bob's shot, not alice's
        let shot = cue_shot(&room, 0.0, -0.002);
        assert!(!room.handle_cue_shot(&PlayerId("alice".into()), &shot, now));
        assert!(room.handle_cue_shot(&PlayerId("bob".into()), &shot, now));
    }

    #[test]
    fn snapshots_without_tick_are_identical() {
        let room = full_room(Instant::now());
        assert_eq!(room.snapshot(), room.snapshot());
    }

    #[test]
    fn idle_lease_requests_termination_exactly_once() {
        let start = Instant::now();
        let mut room = full_room(start);
        assert!(!room.poll_lease(start + IDLE - Duration::from_secs(1)));
        assert!(room.poll_lease(start + IDLE));
        assert!(!room.poll_lease(start + IDLE + Duration::from_secs(1)));
        assert!(!room.poll_lease(start + IDLE * 2));
    }

    #[test]
    fn accepted_shot_extends_the_lease() {
        let start = Instant::now();
        let mut room = full_room(start);
        let later = start + Duration::from_secs(20 * 60);
        let shot = cue_shot(&room, 0.0, 0.002);
        assert!(room.handle_cue_shot(&PlayerId("alice".into()), &shot, later));
        assert!(!room.poll_lease(start + IDLE));
        assert_eq!(room.lease_deadline(), later + IDLE);
    }

    #[test]
    fn rejected_shot_does_not_extend_the_lease() {
        let start = Instant::now();
        let mut room = full_room(start);
        let shot = cue_shot(&room, 0.0, 0.002);
        let later = start + Duration::from_secs(60);
        room.handle_cue_shot(&PlayerId("bob".into()), &shot, later);
        assert_eq!(room.lease_deadline(), start + IDLE);
    }

    #[test]
    fn new_game_only_after_game_over() {
        let mut room = full_room(Instant::now());
        assert!(!room.new_game(&PlayerId("alice".into())));
    }

    #[test]
    fn connect_returns_welcome_for_seated_player() {
        let mut room = full_room(Instant::now());
        let (tx, mut rx) = oneshot::channel();
        room.handle_command(
            RoomCommand::Connect {
                identity: identity("bob"),
                response: tx,
            },
            Instant::now(),
        );
        let (welcome, update) = rx.try_recv().unwrap().unwrap();
        assert_eq!(welcome.player_id, "bob");
        assert_eq!(welcome.room_id, "abc-def-ghj");
        assert_eq!(update.balls.len(), 16);

        let (tx, mut rx) = oneshot::channel();
        room.handle_command(
            RoomCommand::Connect {
                identity: identity("eve"),
                response: tx,
            },
            Instant::now(),
        );
        assert!(rx.try_recv().unwrap().is_err());
        assert_eq!(room.connections(), 1);
    }

    #[test]
    fn connect_and_disconnect_track_open_sockets() {
        let mut room = full_room(Instant::now());
        for player in ["alice", "bob"] {
            let (tx, _rx) = oneshot::channel();
            room.handle_command(
                RoomCommand::Connect {
                    identity: identity(player),
                    response: tx,
                },
                Instant::now(),
            );
        }
        assert_eq!(room.connections(), 2);

        let leave = |player: &str| RoomCommand::Disconnect {
            player: PlayerId(player.into()),
        };
        room.handle_command(leave("alice"), Instant::now());
        assert_eq!(room.connections(), 1);
        room.handle_command(leave("bob"), Instant::now());
        room.handle_command(leave("bob"), Instant::now());
        assert_eq!(room.connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_room_terminates_and_leaves_the_registry() {
        let config = Arc::new(ServerConfig {
            idle_timeout: Duration::from_secs(2),
            rng_seed: Some(1),
            ..Default::default()
        });
        let registry = RoomRegistry::new(config.clone(), GameConfig::default());
        let id = registry.create_room(identity("alice")).await.unwrap();
        let handle = registry.get(&id).await.unwrap();
        let mut rx = handle.broadcast_tx.subscribe();
        drop(handle);

        let mut closed = 0;
        loop {
            match rx.recv().await {
                Ok(RoomBroadcast::Closed { reason }) => {
                    assert_eq!(reason, "idle timeout");
                    closed += 1;
                }
                Ok(RoomBroadcast::Update(_)) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        assert_eq!(closed, 1);
        assert!(registry.get(&id).await.is_none());
    }
}
