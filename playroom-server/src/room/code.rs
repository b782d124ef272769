//! Room Codes
//!
//! Short identifiers meant to be read aloud and typed by hand.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Characters a room code is drawn from: uppercase letters and digits
/// without the easily confused `0/O` and `1/I`.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Number of characters in a room code.
pub const CODE_LENGTH: usize = 6;

/// Room code naming one session.
///
/// Deserialization normalizes what a user typed (surrounding whitespace is
/// trimmed and letters are upper-cased) so lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    /// Normalize user input into a code.
    pub fn parse(input: &str) -> Self {
        Self(input.trim().to_ascii_uppercase())
    }

    /// Code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the code has the generated shape (length and alphabet).
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == CODE_LENGTH && self.0.bytes().all(|b| CODE_ALPHABET.contains(&b))
    }
}

impl From<String> for RoomCode {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of candidate room codes.
///
/// Candidates are not assumed unique; the coordinator checks each one against
/// the directory and redraws on collision.
pub trait CodeGenerator: Send + Sync {
    /// Draw one candidate code.
    fn generate(&self) -> RoomCode;
}

/// Uniformly random codes from the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> RoomCode {
        let mut rng = rand::thread_rng();
        let code = (0..CODE_LENGTH)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        RoomCode(code)
    }
}
