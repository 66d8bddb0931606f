//! Persistence seam for session records and its backends.

/// CouchDB-backed store.
#[cfg(feature = "couch-store")]
pub mod couchdb;
/// In-process store used by default and in tests.
pub mod memory;
/// MongoDB-backed store.
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::time::SystemTime;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::dao::models::SessionEntity;
use crate::dao::storage::StorageResult;

/// Outcome of a write that only lands on an active session.
///
/// Backends decide activity and apply the write as one step, so a session
/// ended concurrently is never written again.
#[derive(Debug, Clone)]
pub enum ActiveWrite {
    /// The write landed; carries the session as stored afterwards.
    Applied(SessionEntity),
    /// The session exists but has ended. Nothing was written.
    Ended,
    /// No session has this id.
    Missing,
}

impl ActiveWrite {
    /// Classify a session that a guarded write did not touch.
    pub fn untouched(existing: Option<&SessionEntity>) -> Self {
        match existing {
            Some(_) => ActiveWrite::Ended,
            None => ActiveWrite::Missing,
        }
    }
}

/// Abstraction over the persistence layer for shared session records.
///
/// Implementations must enforce uniqueness of `session_code` on insert and
/// report collisions as [`StorageError::Conflict`](crate::dao::storage::StorageError::Conflict).
pub trait SessionStore: Send + Sync {
    /// Insert a brand-new session.
    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Look a session up by its (normalized) code, active or not.
    fn find_by_code(&self, code: String) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Look a session up by its identifier.
    fn find_by_id(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Shallow-merge `patch` into the game state of an active session and
    /// bump `updated_at`.
    fn merge_game_state(
        &self,
        id: Uuid,
        patch: Map<String, Value>,
        updated_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<ActiveWrite>>;
    /// Flag an active session as inactive.
    fn deactivate(&self, id: Uuid, updated_at: SystemTime) -> BoxFuture<'static, StorageResult<ActiveWrite>>;
    /// Delete every session whose `updated_at` is strictly older than `cutoff`.
    fn delete_stale(&self, cutoff: SystemTime) -> BoxFuture<'static, StorageResult<Vec<Uuid>>>;
    /// Cheap round trip proving the backend still answers.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the backend connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
