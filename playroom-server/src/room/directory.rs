//! Session Directory
//!
//! Maps room codes to live sessions. Every session sits behind its own lock:
//! joins and leaves on one room are linearized, while the map-level lock is
//! only held long enough to find, insert, or remove an entry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::game::GameRef;
use crate::room::code::RoomCode;
use crate::room::Identity;

/// One active pairing around a game.
#[derive(Debug, Clone)]
pub struct Session {
    code: RoomCode,
    game_ref: GameRef,
    owner: Identity,
    members: Vec<Identity>,
    created_at: DateTime<Utc>,
    revision: u64,
    last_activity: Instant,
}

impl Session {
    /// New session whose only member is its owner.
    pub fn new(code: RoomCode, game_ref: GameRef, owner: Identity) -> Self {
        Self {
            code,
            game_ref,
            members: vec![owner.clone()],
            owner,
            created_at: Utc::now(),
            revision: 1,
            last_activity: Instant::now(),
        }
    }

    /// Room code.
    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    /// Game played in this room. Fixed at creation.
    pub fn game_ref(&self) -> &GameRef {
        &self.game_ref
    }

    /// Creator of the room.
    pub fn owner(&self) -> &Identity {
        &self.owner
    }

    /// Members in join order.
    pub fn members(&self) -> &[Identity] {
        &self.members
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Membership revision, bumped on every change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Last membership change.
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Whether `identity` is a member.
    pub fn contains(&self, identity: &Identity) -> bool {
        self.members.contains(identity)
    }

    /// Current membership as an unchanged update.
    pub fn snapshot(&self) -> MemberUpdate {
        self.update(false)
    }

    fn add_member(&mut self, identity: &Identity) -> bool {
        if self.contains(identity) {
            return false;
        }
        self.members.push(identity.clone());
        self.touch();
        true
    }

    fn remove_member(&mut self, identity: &Identity) -> bool {
        let before = self.members.len();
        // Stable filter: survivors keep their relative order, and with it their roles.
        self.members.retain(|m| m != identity);
        if self.members.len() == before {
            return false;
        }
        self.touch();
        true
    }

    fn touch(&mut self) {
        self.revision += 1;
        self.last_activity = Instant::now();
    }

    fn update(&self, changed: bool) -> MemberUpdate {
        MemberUpdate {
            code: self.code.clone(),
            game_ref: self.game_ref.clone(),
            members: self.members.clone(),
            revision: self.revision,
            changed,
        }
    }
}

/// Membership after a directory mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberUpdate {
    /// Room code.
    pub code: RoomCode,
    /// Game played in the room.
    pub game_ref: GameRef,
    /// Members in join order.
    pub members: Vec<Identity>,
    /// Revision of this membership.
    pub revision: u64,
    /// Whether the mutation changed anything.
    pub changed: bool,
}

/// Directory errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// A session with this code already exists.
    #[error("Room code {0} already in use")]
    CodeCollision(RoomCode),

    /// No session with this code.
    #[error("Room {0} not found")]
    NotFound(RoomCode),

    /// The member limit would be exceeded.
    #[error("Room {0} is full")]
    Full(RoomCode),
}

/// Concurrency-safe store of sessions keyed by room code.
///
/// Only the room coordinator writes to it.
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    /// Insert a new session, failing if its code is taken.
    async fn create(&self, session: Session) -> Result<(), DirectoryError>;

    /// Snapshot of a session.
    async fn get(&self, code: &RoomCode) -> Result<Session, DirectoryError>;

    /// Append `identity` to the members. Adding a present member changes
    /// nothing. With `max_members` set, a new member is refused once the room
    /// holds that many.
    async fn add_member(
        &self,
        code: &RoomCode,
        identity: &Identity,
        max_members: Option<usize>,
    ) -> Result<MemberUpdate, DirectoryError>;

    /// Remove `identity` unless `keep` returns true. `keep` is evaluated under
    /// the session lock, so it is atomic with respect to concurrent joins.
    async fn remove_member_unless(
        &self,
        code: &RoomCode,
        identity: &Identity,
        keep: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<MemberUpdate, DirectoryError>;

    /// Remove `identity` from the members.
    async fn remove_member(
        &self,
        code: &RoomCode,
        identity: &Identity,
    ) -> Result<MemberUpdate, DirectoryError> {
        self.remove_member_unless(code, identity, &|| false).await
    }

    /// Drop a session. Returns whether it existed.
    async fn delete(&self, code: &RoomCode) -> bool;

    /// Drop a session only if it has no members.
    async fn delete_if_empty(&self, code: &RoomCode) -> bool;

    /// Every session code with its last activity.
    async fn activity(&self) -> Vec<(RoomCode, Instant)>;

    /// Number of tracked sessions.
    async fn len(&self) -> usize;
}

struct Entry {
    session: Session,
    /// Set when the entry leaves the map; holders of a stale handle must not mutate it.
    closed: bool,
}

type SharedEntry = Arc<Mutex<Entry>>;

/// In-memory session directory.
#[derive(Default)]
pub struct MemoryDirectory {
    sessions: RwLock<BTreeMap<RoomCode, SharedEntry>>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, code: &RoomCode) -> Result<SharedEntry, DirectoryError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(code)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(code.clone()))
    }
}

#[async_trait]
impl SessionDirectory for MemoryDirectory {
    async fn create(&self, session: Session) -> Result<(), DirectoryError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.code) {
            return Err(DirectoryError::CodeCollision(session.code));
        }
        let code = session.code.clone();
        sessions.insert(code, Arc::new(Mutex::new(Entry { session, closed: false })));
        Ok(())
    }

    async fn get(&self, code: &RoomCode) -> Result<Session, DirectoryError> {
        let entry = self.entry(code).await?;
        let entry = entry.lock().await;
        if entry.closed {
            return Err(DirectoryError::NotFound(code.clone()));
        }
        Ok(entry.session.clone())
    }

    async fn add_member(
        &self,
        code: &RoomCode,
        identity: &Identity,
        max_members: Option<usize>,
    ) -> Result<MemberUpdate, DirectoryError> {
        let entry = self.entry(code).await?;
        add_to_entry(&entry, code, identity, max_members).await
    }

    async fn remove_member_unless(
        &self,
        code: &RoomCode,
        identity: &Identity,
        keep: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<MemberUpdate, DirectoryError> {
        let entry = self.entry(code).await?;
        remove_from_entry(&entry, code, identity, keep).await
    }

    async fn delete(&self, code: &RoomCode) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.remove(code) {
            Some(entry) => {
                entry.lock().await.closed = true;
                true
            }
            None => false,
        }
    }

    async fn delete_if_empty(&self, code: &RoomCode) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get(code).cloned() else {
            return false;
        };

        let mut entry = entry.lock().await;
        if !entry.session.members.is_empty() {
            return false;
        }
        entry.closed = true;
        sessions.remove(code);
        true
    }

    async fn activity(&self) -> Vec<(RoomCode, Instant)> {
        let sessions = self.sessions.read().await;
        let mut out = Vec::with_capacity(sessions.len());
        for (code, entry) in sessions.iter() {
            let entry = entry.lock().await;
            out.push((code.clone(), entry.session.last_activity));
        }
        out
    }

    async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Add under the entry lock. A closed entry reads as missing, whatever the
/// caller's handle says.
async fn add_to_entry(
    entry: &SharedEntry,
    code: &RoomCode,
    identity: &Identity,
    max_members: Option<usize>,
) -> Result<MemberUpdate, DirectoryError> {
    let mut entry = entry.lock().await;
    if entry.closed {
        return Err(DirectoryError::NotFound(code.clone()));
    }

    let session = &mut entry.session;
    if !session.contains(identity) {
        if let Some(max) = max_members {
            if session.members.len() >= max {
                return Err(DirectoryError::Full(code.clone()));
            }
        }
    }
    let changed = session.add_member(identity);
    Ok(session.update(changed))
}

async fn remove_from_entry(
    entry: &SharedEntry,
    code: &RoomCode,
    identity: &Identity,
    keep: &(dyn Fn() -> bool + Send + Sync),
) -> Result<MemberUpdate, DirectoryError> {
    let mut entry = entry.lock().await;
    if entry.closed {
        return Err(DirectoryError::NotFound(code.clone()));
    }

    let session = &mut entry.session;
    let changed = !keep() && session.remove_member(identity);
    Ok(session.update(changed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> Identity {
        Identity::new(name).unwrap()
    }

    fn code(s: &str) -> RoomCode {
        RoomCode::parse(s)
    }

    async fn directory_with_room(owner: &str) -> MemoryDirectory {
        let directory = MemoryDirectory::new();
        let session = Session::new(code("ABC234"), GameRef::from("game-1"), id(owner));
        directory.create(session).await.unwrap();
        directory
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_code() {
        let directory = directory_with_room("alice").await;
        let again = Session::new(code("ABC234"), GameRef::from("game-2"), id("bob"));
        let result = directory.create(again).await;
        assert_eq!(result, Err(DirectoryError::CodeCollision(code("ABC234"))));

        // The original session is untouched.
        let session = directory.get(&code("ABC234")).await.unwrap();
        assert_eq!(session.game_ref(), &GameRef::from("game-1"));
        assert_eq!(session.owner(), &id("alice"));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let directory = MemoryDirectory::new();
        let result = directory.get(&code("ZZZZZZ")).await;
        assert!(matches!(result, Err(DirectoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_add_member_is_idempotent() {
        let directory = directory_with_room("alice").await;

        let first = directory.add_member(&code("ABC234"), &id("bob"), None).await.unwrap();
        assert!(first.changed);
        assert_eq!(first.members, vec![id("alice"), id("bob")]);

        let second = directory.add_member(&code("ABC234"), &id("bob"), None).await.unwrap();
        assert!(!second.changed);
        assert_eq!(second.members, first.members);
        assert_eq!(second.revision, first.revision);
    }

    #[tokio::test]
    async fn test_add_member_respects_limit() {
        let directory = directory_with_room("alice").await;
        directory.add_member(&code("ABC234"), &id("bob"), Some(2)).await.unwrap();

        let result = directory.add_member(&code("ABC234"), &id("carol"), Some(2)).await;
        assert_eq!(result, Err(DirectoryError::Full(code("ABC234"))));

        // Existing members may always rejoin.
        let rejoin = directory.add_member(&code("ABC234"), &id("bob"), Some(2)).await.unwrap();
        assert!(!rejoin.changed);
    }

    #[tokio::test]
    async fn test_remove_keeps_survivor_order() {
        let directory = directory_with_room("alice").await;
        for name in ["bob", "carol", "dave"] {
            directory.add_member(&code("ABC234"), &id(name), None).await.unwrap();
        }

        let update = directory.remove_member(&code("ABC234"), &id("bob")).await.unwrap();
        assert!(update.changed);
        assert_eq!(update.members, vec![id("alice"), id("carol"), id("dave")]);
    }

    #[tokio::test]
    async fn test_remove_non_member_is_noop() {
        let directory = directory_with_room("alice").await;
        let before = directory.get(&code("ABC234")).await.unwrap();

        let update = directory.remove_member(&code("ABC234"), &id("mallory")).await.unwrap();
        assert!(!update.changed);
        assert_eq!(update.members, vec![id("alice")]);
        assert_eq!(update.revision, before.revision());
    }

    #[tokio::test]
    async fn test_remove_unless_keeps_member() {
        let directory = directory_with_room("alice").await;
        let update = directory
            .remove_member_unless(&code("ABC234"), &id("alice"), &|| true)
            .await
            .unwrap();
        assert!(!update.changed);
        assert_eq!(update.members, vec![id("alice")]);
    }

    #[tokio::test]
    async fn test_revision_increases_on_change() {
        let directory = directory_with_room("alice").await;
        let r1 = directory.get(&code("ABC234")).await.unwrap().revision();
        let r2 = directory.add_member(&code("ABC234"), &id("bob"), None).await.unwrap().revision;
        let r3 = directory.remove_member(&code("ABC234"), &id("bob")).await.unwrap().revision;
        assert!(r1 < r2 && r2 < r3);
    }

    #[tokio::test]
    async fn test_delete_if_empty() {
        let directory = directory_with_room("alice").await;
        assert!(!directory.delete_if_empty(&code("ABC234")).await);

        directory.remove_member(&code("ABC234"), &id("alice")).await.unwrap();
        assert!(directory.delete_if_empty(&code("ABC234")).await);
        assert_eq!(directory.len().await, 0);
        assert!(!directory.delete_if_empty(&code("ABC234")).await);
    }

    #[tokio::test]
    async fn test_stale_handle_cannot_mutate_deleted_session() {
        let directory = directory_with_room("alice").await;
        let stale = directory.entry(&code("ABC234")).await.unwrap();

        assert!(directory.delete(&code("ABC234")).await);
        assert!(stale.lock().await.closed);

        // Go through the handle itself; the map lookup would fail first.
        let added = add_to_entry(&stale, &code("ABC234"), &id("bob"), None).await;
        assert!(matches!(added, Err(DirectoryError::NotFound(_))));
        let removed = remove_from_entry(&stale, &code("ABC234"), &id("alice"), &|| false).await;
        assert!(matches!(removed, Err(DirectoryError::NotFound(_))));

        let entry = stale.lock().await;
        assert_eq!(entry.session.members(), &[id("alice")]);
        assert_eq!(entry.session.revision(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_joins_are_not_lost() {
        let directory = Arc::new(directory_with_room("owner").await);
        let mut handles = Vec::new();
        for i in 0..32 {
            let directory = directory.clone();
            handles.push(tokio::spawn(async move {
                let name = format!("player{}", i);
                directory.add_member(&code("ABC234"), &id(&name), None).await.unwrap()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().changed);
        }

        let session = directory.get(&code("ABC234")).await.unwrap();
        assert_eq!(session.members().len(), 33);
        assert_eq!(session.members()[0], id("owner"));
        assert_eq!(session.revision(), 33);
    }

    #[tokio::test]
    async fn test_activity_lists_sessions() {
        let directory = directory_with_room("alice").await;
        let other = Session::new(code("XYZ789"), GameRef::from("game-2"), id("bob"));
        directory.create(other).await.unwrap();

        let activity = directory.activity().await;
        let codes: Vec<_> = activity.iter().map(|(c, _)| c.clone()).collect();
        assert_eq!(codes, vec![code("ABC234"), code("XYZ789")]);
    }
}
