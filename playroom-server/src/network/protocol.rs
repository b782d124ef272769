//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is a JSON text message tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::game::{GameRecord, GameSource};
use crate::room::{Identity, RoomCode};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate the connection.
    Auth {
        /// Bearer token issued by the account service.
        token: String,
    },

    /// Create a room. Answered by `room_created` or `error`.
    CreateRoom {
        /// Echoed in the response.
        request_id: u64,
        /// Game to play in the room.
        source: GameSource,
    },

    /// Join a room by code. Answered by `room_joined` or `error`.
    JoinRoom {
        /// Echoed in the response.
        request_id: u64,
        /// Room code as typed.
        code: RoomCode,
    },

    /// Attach this connection to a room topic (used after reconnecting).
    Subscribe {
        /// Room code.
        code: RoomCode,
    },

    /// Leave a room.
    Leave {
        /// Room code.
        code: RoomCode,
    },

    /// Key event for the other members of a room.
    Input {
        /// Room code.
        code: RoomCode,
        /// Key transition.
        event: InputEvent,
    },

    /// Latency check.
    Ping {
        /// Client timestamp (ms).
        timestamp: u64,
    },
}

/// Direction of a key transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    /// Key went down.
    Press,
    /// Key went up.
    Release,
}

/// One physical key transition, already expressed in the sender's control
/// scheme. The server forwards it without looking inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEvent {
    /// Press or release.
    pub kind: KeyKind,
    /// Key value (e.g. `"w"`, `"ArrowUp"`).
    pub key: String,
    /// Physical key code (e.g. `"KeyW"`, `"ArrowUp"`).
    pub code: String,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// Room created.
    RoomCreated(RoomInfo),

    /// Room joined.
    RoomJoined(RoomInfo),

    /// Current members of a room.
    MembershipUpdate(MembershipUpdate),

    /// Key event from another member.
    Input {
        /// Room code.
        code: RoomCode,
        /// Key transition.
        event: InputEvent,
    },

    /// Pong response.
    Pong { timestamp: u64, server_time: u64 },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown { reason: String },
}

/// Authentication result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether auth succeeded.
    pub success: bool,
    /// Identity bound to the connection.
    pub identity: Option<Identity>,
    /// Error message if failed.
    pub error: Option<String>,
    /// Server version.
    pub server_version: String,
}

/// Response to a create or join request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomInfo {
    /// Request this answers.
    pub request_id: u64,
    /// Room code.
    pub code: RoomCode,
    /// Game played in the room.
    pub game: GameRecord,
    /// Members in join order.
    pub members: Vec<Identity>,
}

/// Membership snapshot pushed to every connection in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipUpdate {
    /// Room code.
    pub code: RoomCode,
    /// Members in join order.
    pub members: Vec<Identity>,
    /// Increases with every membership change; older snapshots can be ignored.
    pub revision: u64,
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Request this answers, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Not authenticated.
    NotAuthenticated,
    /// Malformed or incomplete request.
    InvalidInput,
    /// Room code does not name an active room.
    RoomNotFound,
    /// Room reached its member limit.
    RoomFull,
    /// Transient failure; retrying may succeed.
    TryAgain,
    /// Game content could not be resolved.
    GameUnavailable,
    /// Game is not a two-player game.
    NotTwoPlayer,
    /// Internal error.
    InternalError,
}

impl ServerMessage {
    /// Build an error frame.
    pub fn error(request_id: Option<u64>, code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError {
            request_id,
            code,
            message: message.into(),
        })
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
