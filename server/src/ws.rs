use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use eightball_shared::model::PlayerId;
use eightball_shared::protocol::{
    ClientMsg, LobbyRequest, LobbyResponse, RoomClosedMsg, ServerMsg,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, oneshot, OwnedSemaphorePermit, Semaphore};
use tower_http::cors::CorsLayer;

use crate::config::ServerConfig;
use crate::lobby::{identity, LobbyError, RoomHandle, RoomRegistry};
use crate::room::{Identity, JoinError, RoomBroadcast, RoomCommand};
use crate::room_id::normalize_room_id;

/// Shared app state passed to each WebSocket handler
#[derive(Clone)]
pub struct AppState {
    pub registry: RoomRegistry,
    pub connection_semaphore: Arc<Semaphore>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(registry: RoomRegistry, config: Arc<ServerConfig>) -> Self {
        Self {
            registry,
            connection_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            config,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/lobby", get(lobby_handler))
        .route("/room/{id}", get(room_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct RoomQuery {
    pub player: String,
    pub token: String,
}

fn to_json<T: Serialize>(msg: &T) -> Option<Message> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!("Failed to serialize message: {}", e);
            None
        }
    }
}

/// Sliding one-second window over accepted shots.
struct ShotLimiter {
    max_per_sec: usize,
    recent: VecDeque<Instant>,
}

impl ShotLimiter {
    fn new(max_per_sec: u32) -> Self {
        Self {
            max_per_sec: max_per_sec as usize,
            recent: VecDeque::new(),
        }
    }

    fn allow(&mut self, now: Instant) -> bool {
        while let Some(&t) = self.recent.front() {
            if now.duration_since(t) >= Duration::from_secs(1) {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        if self.recent.len() >= self.max_per_sec {
            return false;
        }
        self.recent.push_back(now);
        true
    }
}

fn try_permit(app_state: &AppState) -> Option<OwnedSemaphorePermit> {
    let permit = app_state.connection_semaphore.clone().try_acquire_owned().ok();
    if permit.is_none() {
        tracing::warn!(
            "Connection limit {} reached, refusing",
            app_state.config.max_connections
        );
    }
    permit
}

// === Lobby ===

pub async fn lobby_handler(ws: WebSocketUpgrade, State(app_state): State<AppState>) -> Response {
    let Some(permit) = try_permit(&app_state) else {
        return (StatusCode::SERVICE_UNAVAILABLE, "server full").into_response();
    };
    ws.max_message_size(app_state.config.max_message_bytes)
        .on_upgrade(move |socket| handle_lobby_socket(socket, app_state, permit))
}

async fn lobby_request(registry: &RoomRegistry, request: LobbyRequest) -> Result<String, LobbyError> {
    match request {
        LobbyRequest::CreateRoom { player, token } => {
            registry.create_room(identity(&player, &token)?).await
        }
        LobbyRequest::JoinRoom {
            room,
            player,
            token,
        } => registry.join_room(&room, identity(&player, &token)?).await,
    }
}

async fn handle_lobby_socket(socket: WebSocket, app_state: AppState, _permit: OwnedSemaphorePermit) {
    let (mut sink, mut stream) = socket.split();
    let mut parse_errors = 0u32;

    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => {
                parse_errors += 1;
                if parse_errors > app_state.config.max_parse_errors {
                    tracing::warn!("Lobby client exceeded parse error budget");
                    break;
                }
                continue;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("Lobby socket error: {}", e);
                break;
            }
        };

        let response = match serde_json::from_str::<LobbyRequest>(text.as_str()) {
            Ok(request) => match lobby_request(&app_state.registry, request).await {
                Ok(id) => LobbyResponse::RoomReady { id },
                Err(e) => {
                    tracing::debug!("Lobby request refused: {}", e);
                    LobbyResponse::Error {
                        code: e.code(),
                        message: e.to_string(),
                    }
                }
            },
            Err(e) => {
                parse_errors += 1;
                if parse_errors > app_state.config.max_parse_errors {
                    tracing::warn!("Lobby client exceeded parse error budget");
                    break;
                }
                let e = LobbyError::BadRequest(e.to_string());
                LobbyResponse::Error {
                    code: e.code(),
                    message: e.to_string(),
                }
            }
        };

        let Some(reply) = to_json(&response) else {
            continue;
        };
        if sink.send(reply).await.is_err() {
            break;
        }
    }
}

// === Room ===

pub async fn room_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    Query(query): Query<RoomQuery>,
    State(app_state): State<AppState>,
) -> Response {
    let Some(permit) = try_permit(&app_state) else {
        return (StatusCode::SERVICE_UNAVAILABLE, "server full").into_response();
    };

    let id = normalize_room_id(&id);
    let Some(room) = app_state.registry.get(&id).await else {
        return (StatusCode::NOT_FOUND, "room not found").into_response();
    };
    let identity = Identity {
        player: PlayerId(query.player),
        token: query.token,
    };

    // Subscribe before connecting so no update between snapshot and loop is lost
    let broadcast_rx = room.broadcast_tx.subscribe();
    let (response, result) = oneshot::channel();
    let sent = room
        .cmd_tx
        .send(RoomCommand::Connect {
            identity: identity.clone(),
            response,
        })
        .await;
    if sent.is_err() {
        return (StatusCode::NOT_FOUND, "room not found").into_response();
    }
    let (welcome, snapshot) = match result.await {
        Ok(Ok(hello)) => hello,
        Ok(Err(JoinError::BadToken(player))) => {
            tracing::warn!("Room {}: refused connection as {}", id, player);
            return (StatusCode::UNAUTHORIZED, "unknown player or token").into_response();
        }
        Ok(Err(e)) => return (StatusCode::UNAUTHORIZED, e.to_string()).into_response(),
        Err(_) => return (StatusCode::NOT_FOUND, "room not found").into_response(),
    };

    ws.max_message_size(app_state.config.max_message_bytes)
        .on_upgrade(move |socket| async move {
            let hello = (ServerMsg::Welcome(welcome), ServerMsg::RoomUpdate(snapshot));
            handle_room_socket(socket, app_state, room, identity.player, hello, broadcast_rx)
                .await;
            drop(permit);
        })
}

async fn handle_room_socket(
    socket: WebSocket,
    app_state: AppState,
    room: RoomHandle,
    player: PlayerId,
    hello: (ServerMsg, ServerMsg),
    mut broadcast_rx: broadcast::Receiver<RoomBroadcast>,
) {
    let (mut sink, mut stream) = socket.split();

    let mut greeted = true;
    for msg in [hello.0, hello.1] {
        let Some(msg) = to_json(&msg) else {
            greeted = false;
            break;
        };
        if sink.send(msg).await.is_err() {
            greeted = false;
            break;
        }
    }
    if !greeted {
        let _ = room.cmd_tx.send(RoomCommand::Disconnect { player }).await;
        return;
    }

    let mut parse_errors = 0u32;
    let mut shots = ShotLimiter::new(app_state.config.max_shots_per_sec);

    loop {
        tokio::select! {
            // Client -> Server
            msg = stream.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(_))) => {
                        parse_errors += 1;
                        if parse_errors > app_state.config.max_parse_errors {
                            tracing::warn!("Room {}: {} exceeded parse error budget", room.id, player);
                            break;
                        }
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue, // ping/pong
                    Some(Err(e)) => {
                        tracing::warn!("Room {}: socket error from {}: {}", room.id, player, e);
                        break;
                    }
                };

                match serde_json::from_str::<ClientMsg>(text.as_str()) {
                    Ok(ClientMsg::CueShot(shot)) => {
                        if !shots.allow(Instant::now()) {
                            tracing::warn!("Room {}: {} exceeded shot rate", room.id, player);
                            break;
                        }
                        let cmd = RoomCommand::CueShot { player: player.clone(), shot };
                        if room.cmd_tx.send(cmd).await.is_err() {
                            break;
                        }
                    }
                    Ok(ClientMsg::NewGame) => {
                        let cmd = RoomCommand::NewGame { player: player.clone() };
                        if room.cmd_tx.send(cmd).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        parse_errors += 1;
                        tracing::debug!("Room {}: unparseable frame from {}: {}", room.id, player, e);
                        if parse_errors > app_state.config.max_parse_errors {
                            tracing::warn!("Room {}: {} exceeded parse error budget", room.id, player);
                            break;
                        }
                    }
                }
            }

            // Server -> Client (broadcast)
            result = broadcast_rx.recv() => {
                match result {
                    Ok(RoomBroadcast::Update(update)) => {
                        let Some(msg) = to_json(&ServerMsg::RoomUpdate(update)) else {
                            continue;
                        };
                        if sink.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Ok(RoomBroadcast::Closed { reason }) => {
                        if let Some(msg) = to_json(&ServerMsg::RoomClosed(RoomClosedMsg { reason })) {
                            let _ = sink.send(msg).await;
                        }
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Snapshots are full state, the next one catches up
                        tracing::warn!("Room {}: {} lagged by {} messages", room.id, player, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    let _ = room.cmd_tx.send(RoomCommand::Disconnect { player }).await;
}
