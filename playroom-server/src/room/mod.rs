//! Room Layer
//!
//! Everything that interprets room semantics: codes, the session directory,
//! and the coordinator that owns session lifecycle.

pub mod code;
pub mod coordinator;
pub mod directory;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use code::{CodeGenerator, RandomCodeGenerator, RoomCode, CODE_ALPHABET, CODE_LENGTH};
pub use coordinator::{CoordinatorConfig, RoomCoordinator, RoomError, RoomView};
pub use directory::{DirectoryError, MemberUpdate, MemoryDirectory, Session, SessionDirectory};

/// Display name of a connected user, stable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Build an identity from a display name. Blank names are rejected.
    pub fn new(name: impl Into<String>) -> Option<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    /// Display name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Positional player designation.
///
/// Derived from member order at read time and never stored, so it stays
/// correct only while removals preserve the order of survivors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// First member of the room.
    PlayerOne,
    /// Second member of the room.
    PlayerTwo,
}

impl Role {
    /// Role of `me` in `members`, or `None` for spectators and non-members.
    pub fn from_members(members: &[Identity], me: &Identity) -> Option<Self> {
        match members.iter().position(|m| m == me) {
            Some(0) => Some(Role::PlayerOne),
            Some(1) => Some(Role::PlayerTwo),
            _ => None,
        }
    }

    /// 1-based player number.
    pub fn number(self) -> u8 {
        match self {
            Role::PlayerOne => 1,
            Role::PlayerTwo => 2,
        }
    }
}
