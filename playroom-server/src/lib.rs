//! # Playroom Server
//!
//! Room coordination and input relay for two-player browser games.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PLAYROOM SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game.rs         - Game records, store and generator traits │
//! │  config.rs       - Environment configuration                │
//! │                                                             │
//! │  room/           - Session semantics                        │
//! │  ├── code.rs     - Room code alphabet and generator         │
//! │  ├── directory.rs- Concurrency-safe session directory       │
//! │  └── coordinator.rs - Create / join / leave / reclaim       │
//! │                                                             │
//! │  network/        - Transport                                │
//! │  ├── server.rs   - WebSocket server                         │
//! │  ├── protocol.rs - Message types                            │
//! │  ├── hub.rs      - Room topics and input relay              │
//! │  └── auth.rs     - JWT validation                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Membership
//!
//! Every membership change bumps the room's revision and is pushed to all
//! connections attached to the room. Roles are positional: the first member
//! is player 1 and the second is player 2. Removing a member never reorders
//! the others.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod game;
pub mod network;
pub mod room;

// Re-export commonly used types
pub use config::{ConfigError, ServerConfig};
pub use game::{GameMode, GameRecord, GameRef, GameSource, GameStore, MemoryGameStore};
pub use room::{Identity, Role, RoomCode, RoomCoordinator, RoomError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
