//! # Playroom Client
//!
//! Client side of a two-player room: the WebSocket connection to the room
//! server, the readiness gate that decides when the game may run, and the
//! input relay that mirrors key presses between the two players.
//!
//! ```text
//! keyboard ──► TwoPlayerSession ──► InputRelay ──┬──► GameContext (local)
//!                    ▲                           └──► RoomClient ──► server
//!                    │
//! server ──► RoomClient ──► ClientEvent ──► ReadinessGate / InputRelay
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection;
pub mod gate;
pub mod keys;
pub mod relay;
pub mod session;

pub use connection::{ClientConfig, ClientError, ClientEvent, RoomClient};
pub use gate::{GateState, GateTransition, ReadinessGate};
pub use keys::{canonical_event, control_for_key, is_control_key, Control};
pub use relay::{GameContext, InputRelay, KeyEvent};
pub use session::TwoPlayerSession;

pub use playroom::network::{InputEvent, KeyKind, MembershipUpdate};
pub use playroom::{Identity, Role, RoomCode};
