//! Registry of live rooms and the create/join operations behind `/lobby`.

use crate::config::ServerConfig;
use crate::room::{run_room, Identity, JoinError, RoomBroadcast, RoomCommand, RoomState};
use crate::room_id::{is_valid_room_id, normalize_room_id, random_room_id};
use eightball_shared::config::GameConfig;
use eightball_shared::model::PlayerId;
use eightball_shared::protocol::LobbyErrorCode;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};

/// Longest accepted player id or token
const MAX_IDENTITY_LEN: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("bad room id: {0}")]
    BadRoomId(String),
    #[error("room not found: {0}")]
    RoomNotFound(String),
    #[error("server is at its room limit")]
    ServerFull,
    #[error(transparent)]
    Join(#[from] JoinError),
}

impl LobbyError {
    pub fn code(&self) -> LobbyErrorCode {
        match self {
            LobbyError::BadRequest(_) => LobbyErrorCode::BadRequest,
            LobbyError::BadRoomId(_) => LobbyErrorCode::BadRoomId,
            LobbyError::RoomNotFound(_) | LobbyError::Join(JoinError::RoomClosed) => {
                LobbyErrorCode::RoomNotFound
            }
            LobbyError::ServerFull => LobbyErrorCode::ServerFull,
            LobbyError::Join(JoinError::RoomFull) => LobbyErrorCode::RoomFull,
            LobbyError::Join(JoinError::BadToken(_)) => LobbyErrorCode::BadToken,
        }
    }
}

/// Channels into a running room.
#[derive(Clone)]
pub struct RoomHandle {
    pub id: String,
    pub cmd_tx: mpsc::Sender<RoomCommand>,
    pub broadcast_tx: broadcast::Sender<RoomBroadcast>,
}

#[derive(Clone)]
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<String, RoomHandle>>>,
    config: Arc<ServerConfig>,
    game_config: GameConfig,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

/// Reject empty or oversized identity fields.
pub fn identity(player: &str, token: &str) -> Result<Identity, LobbyError> {
    for (name, value) in [("player", player), ("token", token)] {
        if value.is_empty() || value.len() > MAX_IDENTITY_LEN {
            return Err(LobbyError::BadRequest(format!(
                "{} must be 1..={} bytes",
                name, MAX_IDENTITY_LEN
            )));
        }
    }
    Ok(Identity {
        player: PlayerId(player.to_string()),
        token: token.to_string(),
    })
}

impl RoomRegistry {
    pub fn new(config: Arc<ServerConfig>, game_config: GameConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            config,
            game_config,
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    /// Fresh room id and rack source. A fixed seed gives every room the same rack.
    fn draw(&self) -> (String, ChaCha8Rng) {
        let mut rng = match self.rng.lock() {
            Ok(rng) => rng,
            Err(poisoned) => poisoned.into_inner(),
        };
        let id = random_room_id(&mut *rng);
        let rack_rng = match self.config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(&mut *rng).unwrap_or_else(|_| ChaCha8Rng::from_entropy()),
        };
        (id, rack_rng)
    }

    /// Create and activate a room with `creator` in the first seat.
    pub async fn create_room(&self, creator: Identity) -> Result<String, LobbyError> {
        let mut rooms = self.rooms.write().await;
        if rooms.len() >= self.config.max_rooms {
            tracing::warn!("Room limit {} reached", self.config.max_rooms);
            return Err(LobbyError::ServerFull);
        }

        let (mut id, rack_rng) = self.draw();
        while rooms.contains_key(&id) {
            id = self.draw().0;
        }

        let mut state = RoomState::new(
            id.clone(),
            self.game_config,
            rack_rng,
            self.config.idle_timeout,
            tokio::time::Instant::now(),
        );
        state.join(creator)?;

        let (cmd_tx, cmd_rx) = mpsc::channel::<RoomCommand>(256);
        let (broadcast_tx, _) = broadcast::channel::<RoomBroadcast>(64);
        let handle = RoomHandle {
            id: id.clone(),
            cmd_tx,
            broadcast_tx: broadcast_tx.clone(),
        };
        rooms.insert(id.clone(), handle);
        drop(rooms);

        let registry = self.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            run_room(state, cmd_rx, broadcast_tx, registry, config).await;
        });

        tracing::info!("Room {} created", id);
        Ok(id)
    }

    /// Seat `player` in an existing room. Returns the canonical room id.
    pub async fn join_room(&self, room: &str, player: Identity) -> Result<String, LobbyError> {
        let id = normalize_room_id(room);
        if !is_valid_room_id(&id) {
            return Err(LobbyError::BadRoomId(room.to_string()));
        }
        let handle = self
            .get(&id)
            .await
            .ok_or_else(|| LobbyError::RoomNotFound(id.clone()))?;

        let (response, result) = oneshot::channel();
        handle
            .cmd_tx
            .send(RoomCommand::Join {
                identity: player,
                response,
            })
            .await
            .map_err(|_| LobbyError::RoomNotFound(id.clone()))?;
        result.await.map_err(|_| JoinError::RoomClosed)??;
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Option<RoomHandle> {
        self.rooms.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) {
        if self.rooms.write().await.remove(id).is_some() {
            tracing::info!("Room {} released", id);
        }
    }

    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(max_rooms: usize) -> RoomRegistry {
        let config = ServerConfig {
            max_rooms,
            rng_seed: Some(3),
            ..Default::default()
        };
        RoomRegistry::new(Arc::new(config), GameConfig::default())
    }

    fn who(player: &str) -> Identity {
        identity(player, "secret").unwrap()
    }

    #[tokio::test]
    async fn create_then_join() {
        let registry = registry(10);
        let id = registry.create_room(who("alice")).await.unwrap();
        assert!(is_valid_room_id(&id));
        let joined = registry
            .join_room(&id.to_uppercase(), who("bob"))
            .await
            .unwrap();
        assert_eq!(joined, id);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn third_player_gets_room_full() {
        let registry = registry(10);
        let id = registry.create_room(who("alice")).await.unwrap();
        registry.join_room(&id, who("bob")).await.unwrap();
        let err = registry.join_room(&id, who("carol")).await.unwrap_err();
        assert_eq!(err.code(), LobbyErrorCode::RoomFull);
    }

    #[tokio::test]
    async fn rejoin_with_same_identity_is_ok() {
        let registry = registry(10);
        let id = registry.create_room(who("alice")).await.unwrap();
        registry.join_room(&id, who("alice")).await.unwrap();
        let err = registry
            .join_room(&id, identity("alice", "other").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.code(), LobbyErrorCode::BadToken);
    }

    #[tokio::test]
    async fn unknown_and_malformed_rooms() {
        let registry = registry(10);
        let err = registry.join_room("abc-def-ghj", who("bob")).await.unwrap_err();
        assert_eq!(err.code(), LobbyErrorCode::RoomNotFound);
        let err = registry.join_room("nope", who("bob")).await.unwrap_err();
        assert_eq!(err.code(), LobbyErrorCode::BadRoomId);
    }

    #[tokio::test]
    async fn room_limit_is_enforced() {
        let registry = registry(1);
        registry.create_room(who("alice")).await.unwrap();
        let err = registry.create_room(who("bob")).await.unwrap_err();
        assert_eq!(err.code(), LobbyErrorCode::ServerFull);
    }

    #[test]
    fn identity_fields_are_bounded() {
        assert!(identity("", "t").is_err());
        assert!(identity("p", "").is_err());
        assert!(identity(&"x".repeat(65), "t").is_err());
        assert!(identity("p", "t").is_ok());
    }
}
