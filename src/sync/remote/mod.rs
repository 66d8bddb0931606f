//! Provider contract: record persistence with a unique session code plus a
//! push channel keyed by record id.

/// Provider reached over REST and SSE.
#[cfg(feature = "http-remote")]
pub mod http;
/// Provider in the same process.
pub mod local;

use futures::{future::BoxFuture, stream::BoxStream};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    dto::session::{CreateSessionRequest, SessionRecord, Writer},
    sync::error::RemoteError,
};

#[cfg(feature = "http-remote")]
pub use self::http::HttpRemote;
pub use self::local::LocalRemote;

/// Result alias for provider calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Push notifications for one record. The current record is delivered first,
/// then every subsequent write. The stream ends when the channel closes.
pub type RecordStream = BoxStream<'static, RemoteResult<SessionRecord>>;

/// Everything a device needs from a session provider.
pub trait SessionRemote: Send + Sync {
    /// Insert a new record; a taken code yields [`RemoteError::Conflict`].
    fn insert(&self, request: CreateSessionRequest) -> BoxFuture<'static, RemoteResult<SessionRecord>>;
    /// Active record by normalized code.
    fn find_by_code(&self, code: String) -> BoxFuture<'static, RemoteResult<Option<SessionRecord>>>;
    /// Record by id, active or not.
    fn find_by_id(&self, id: Uuid) -> BoxFuture<'static, RemoteResult<Option<SessionRecord>>>;
    /// Shallow merge into `gameState`.
    fn update(
        &self,
        id: Uuid,
        writer: Writer,
        patch: Map<String, Value>,
    ) -> BoxFuture<'static, RemoteResult<SessionRecord>>;
    /// Mark the session ended; only its host may.
    fn deactivate(&self, id: Uuid, host_id: String) -> BoxFuture<'static, RemoteResult<SessionRecord>>;
    /// Open the push channel for one record.
    fn subscribe(&self, id: Uuid) -> BoxFuture<'static, RemoteResult<RecordStream>>;
}
