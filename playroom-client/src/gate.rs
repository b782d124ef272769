//! Readiness Gate
//!
//! A two-player game runs only while its room holds exactly two members.
//! The gate changes state on membership broadcasts alone and ignores any
//! broadcast older than one it has already applied.

use playroom::network::MembershipUpdate;
use playroom::{Identity, Role, RoomCode};

/// Required member count.
pub const PLAYERS: usize = 2;

/// Whether the game may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Showing the room code, waiting for the second player.
    Waiting,
    /// Both players present; the game is mounted.
    Active,
}

/// Edge produced by applying a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateTransition {
    /// Waiting -> Active.
    Mount,
    /// Active -> Waiting.
    Unmount,
}

/// Readiness gate for one room.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    code: RoomCode,
    members: Vec<Identity>,
    revision: Option<u64>,
    state: GateState,
}

impl ReadinessGate {
    /// Gate for `code`, initially waiting.
    pub fn new(code: RoomCode) -> Self {
        Self {
            code,
            members: Vec::new(),
            revision: None,
            state: GateState::Waiting,
        }
    }

    /// Room code to show while waiting.
    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    /// Current state.
    pub fn state(&self) -> GateState {
        self.state
    }

    /// Whether the game is mounted.
    pub fn is_active(&self) -> bool {
        self.state == GateState::Active
    }

    /// Members from the newest applied broadcast.
    pub fn members(&self) -> &[Identity] {
        &self.members
    }

    /// Revision of the newest applied broadcast.
    pub fn revision(&self) -> Option<u64> {
        self.revision
    }

    /// Role of `me` under the current membership.
    pub fn role_of(&self, me: &Identity) -> Option<Role> {
        Role::from_members(&self.members, me)
    }

    /// Apply a broadcast. Broadcasts for other rooms or older revisions are
    /// ignored.
    pub fn apply(&mut self, update: &MembershipUpdate) -> Option<GateTransition> {
        if update.code != self.code {
            return None;
        }
        if matches!(self.revision, Some(seen) if update.revision < seen) {
            return None;
        }

        self.revision = Some(update.revision);
        self.members = update.members.clone();

        let next = if self.members.len() == PLAYERS {
            GateState::Active
        } else {
            GateState::Waiting
        };

        let transition = match (self.state, next) {
            (GateState::Waiting, GateState::Active) => Some(GateTransition::Mount),
            (GateState::Active, GateState::Waiting) => Some(GateTransition::Unmount),
            _ => None,
        };
        self.state = next;
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> Identity {
        Identity::new(name).unwrap()
    }

    fn update(members: &[&str], revision: u64) -> MembershipUpdate {
        MembershipUpdate {
            code: RoomCode::parse("Q7F2KD"),
            members: members.iter().map(|m| id(m)).collect(),
            revision,
        }
    }

    #[test]
    fn test_mounts_at_two_and_unmounts_below() {
        let mut gate = ReadinessGate::new(RoomCode::parse("Q7F2KD"));
        assert_eq!(gate.apply(&update(&["alice"], 1)), None);
        assert_eq!(gate.state(), GateState::Waiting);

        assert_eq!(gate.apply(&update(&["alice", "bob"], 2)), Some(GateTransition::Mount));
        assert!(gate.is_active());
        assert_eq!(gate.role_of(&id("bob")), Some(Role::PlayerTwo));

        assert_eq!(gate.apply(&update(&["alice"], 3)), Some(GateTransition::Unmount));
        assert_eq!(gate.state(), GateState::Waiting);
    }

    #[test]
    fn test_stale_broadcast_ignored() {
        let mut gate = ReadinessGate::new(RoomCode::parse("Q7F2KD"));
        gate.apply(&update(&["alice", "bob"], 4));

        // Older snapshot arriving late must not unmount the game.
        assert_eq!(gate.apply(&update(&["alice"], 3)), None);
        assert!(gate.is_active());
        assert_eq!(gate.revision(), Some(4));
    }

    #[test]
    fn test_same_revision_reapplied_is_harmless() {
        let mut gate = ReadinessGate::new(RoomCode::parse("Q7F2KD"));
        assert_eq!(gate.apply(&update(&["alice", "bob"], 2)), Some(GateTransition::Mount));
        assert_eq!(gate.apply(&update(&["alice", "bob"], 2)), None);
        assert!(gate.is_active());
    }

    #[test]
    fn test_third_member_reverts_to_waiting() {
        let mut gate = ReadinessGate::new(RoomCode::parse("Q7F2KD"));
        gate.apply(&update(&["alice", "bob"], 2));
        assert_eq!(
            gate.apply(&update(&["alice", "bob", "carol"], 3)),
            Some(GateTransition::Unmount)
        );
        assert_eq!(gate.role_of(&id("carol")), None);
    }

    #[test]
    fn test_other_room_ignored() {
        let mut gate = ReadinessGate::new(RoomCode::parse("Q7F2KD"));
        let mut other = update(&["alice", "bob"], 9);
        other.code = RoomCode::parse("XYZ789");
        assert_eq!(gate.apply(&other), None);
        assert_eq!(gate.revision(), None);
    }
}
