use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::config::GameConfig;
use crate::model::MatchContext;

/// Protocol version - increment when making breaking changes.
pub const PROTOCOL_VERSION: u32 = 1;

// === Server -> Client ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMsg {
    Welcome(WelcomeMsg),
    RoomUpdate(RoomUpdateMsg),
    RoomClosed(RoomClosedMsg),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeMsg {
    pub protocol_version: u32,
    pub server_version: String,
    pub room_id: String,
    pub player_id: String,
    pub config: GameConfig,
}

/// Full snapshot of a room's match context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct RoomUpdateMsg {
    /// Current turn token
    pub turn: Option<String>,
    pub players: Vec<PlayerWire>,
    pub balls: Vec<BallWire>,
    pub rails: Vec<RailWire>,
    pub pockets: Vec<PocketWire>,
    pub table: Option<TableWire>,
    #[serde(default)]
    pub shot_in_progress: bool,
    #[serde(default)]
    pub game_started: bool,
    #[serde(default)]
    pub game_over: bool,
    #[serde(default)]
    pub winner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RoomClosedMsg {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PlayerWire {
    pub id: String,
    pub name: Option<String>,
    pub group: Option<String>,
    pub turn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BallWire {
    pub key: String,
    pub x: f64,
    pub y: f64,
    pub r: f64,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RailWire {
    pub key: String,
    pub vertices: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PocketWire {
    pub key: String,
    pub x: f64,
    pub y: f64,
    pub r: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct TableWire {
    pub key: String,
    pub width: f64,
    pub height: f64,
    pub ball_radius: f64,
    pub pocket_radius: f64,
}

// === Client -> Server (room) ===

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Vec2Wire {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CueShotMsg {
    pub ball_key: String,
    pub impulse: Vec2Wire,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMsg {
    CueShot(CueShotMsg),
    NewGame,
}

// === Lobby ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LobbyRequest {
    CreateRoom {
        player: String,
        token: String,
    },
    JoinRoom {
        room: String,
        player: String,
        token: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LobbyResponse {
    RoomReady { id: String },
    Error { code: LobbyErrorCode, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "kebab-case")]
pub enum LobbyErrorCode {
    BadRequest,
    BadRoomId,
    RoomNotFound,
    RoomFull,
    BadToken,
    ServerFull,
}

// === Conversion helpers ===

/// Round to 4 decimal places (sub-millimeter on the table, keeps JSON small)
#[inline]
pub fn round4(v: f64) -> f64 {
    (v * 10000.0).round() / 10000.0
}

#[inline]
fn wire(v: f32) -> f64 {
    round4(v as f64)
}

impl RoomUpdateMsg {
    pub fn from_context(ctx: &MatchContext) -> Self {
        Self {
            turn: ctx.turn.current.as_ref().map(|t| t.0.clone()),
            players: ctx
                .players
                .iter()
                .map(|p| PlayerWire {
                    id: p.id.0.clone(),
                    name: p.name.clone(),
                    group: p.group.map(|g| g.as_str().to_string()),
                    turn: p.turn.as_ref().map(|t| t.0.clone()),
                })
                .collect(),
            balls: ctx
                .balls
                .iter()
                .map(|b| BallWire {
                    key: b.key.0.clone(),
                    x: wire(b.position.x),
                    y: wire(b.position.y),
                    r: wire(b.radius),
                    color: b.color.to_string(),
                })
                .collect(),
            rails: ctx
                .rails
                .iter()
                .map(|r| RailWire {
                    key: r.key.0.clone(),
                    vertices: r.vertices.iter().map(|v| [wire(v.x), wire(v.y)]).collect(),
                })
                .collect(),
            pockets: ctx
                .pockets
                .iter()
                .map(|p| PocketWire {
                    key: p.key.0.clone(),
                    x: wire(p.position.x),
                    y: wire(p.position.y),
                    r: wire(p.radius),
                })
                .collect(),
            table: ctx.table.as_ref().map(|t| TableWire {
                key: t.key.0.clone(),
                width: wire(t.width),
                height: wire(t.height),
                ball_radius: wire(t.ball_radius),
                pocket_radius: wire(t.pocket_radius),
            }),
            shot_in_progress: ctx.shot_in_progress,
            game_started: ctx.game_started,
            game_over: ctx.game_over,
            winner: ctx.winner.as_ref().map(|w| w.0.clone()),
        }
    }
}
