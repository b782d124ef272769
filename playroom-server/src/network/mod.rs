//! Network Layer
//!
//! WebSocket server, wire protocol, authentication, and the topic hub that
//! fans frames out to the connections of a room.

pub mod auth;
pub mod hub;
pub mod protocol;
pub mod server;

pub use auth::{validate_token, AuthConfig, AuthError, Authenticator, JwtAuthenticator, TokenClaims};
pub use hub::{ConnectionId, Outbound, OutboundReceiver, RelayOutcome, Subscriber, TopicHub};
pub use protocol::{
    ClientMessage, ErrorCode, InputEvent, KeyKind, MembershipUpdate, RoomInfo, ServerMessage,
};
pub use server::{RoomServer, RoomServerError};
