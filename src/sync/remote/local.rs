//! In-process provider backed by the session services.

use futures::{StreamExt, future::BoxFuture};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    dto::session::{CreateSessionRequest, SessionRecord, Writer},
    error::ServiceError,
    services::{session_service, sse_service},
    state::SharedState,
    sync::{
        error::RemoteError,
        remote::{RecordStream, RemoteResult, SessionRemote},
    },
};

/// Provider living in the same process: calls straight into the session
/// service of a running [`AppState`](crate::state::AppState).
#[derive(Clone)]
pub struct LocalRemote {
    state: SharedState,
}

impl LocalRemote {
    /// Provider over `state`.
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

impl From<ServiceError> for RemoteError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Conflict(_) => RemoteError::Conflict,
            ServiceError::NotFound(_) => RemoteError::NotFound,
            ServiceError::SessionEnded => RemoteError::SessionEnded,
            ServiceError::Unauthorized(message) | ServiceError::InvalidInput(message) => {
                RemoteError::Rejected(message)
            }
            other @ (ServiceError::Unavailable(_) | ServiceError::Degraded) => {
                RemoteError::Transport(other.to_string())
            }
        }
    }
}

fn found(result: Result<SessionRecord, ServiceError>) -> RemoteResult<Option<SessionRecord>> {
    match result {
        Ok(record) => Ok(Some(record)),
        Err(ServiceError::NotFound(_)) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

impl SessionRemote for LocalRemote {
    fn insert(&self, request: CreateSessionRequest) -> BoxFuture<'static, RemoteResult<SessionRecord>> {
        let state = self.state.clone();
        Box::pin(async move { Ok(session_service::create(&state, request).await?) })
    }

    fn find_by_code(&self, code: String) -> BoxFuture<'static, RemoteResult<Option<SessionRecord>>> {
        let state = self.state.clone();
        Box::pin(async move { found(session_service::fetch_by_code(&state, &code).await) })
    }

    fn find_by_id(&self, id: Uuid) -> BoxFuture<'static, RemoteResult<Option<SessionRecord>>> {
        let state = self.state.clone();
        Box::pin(async move { found(session_service::fetch_by_id(&state, id).await) })
    }

    fn update(
        &self,
        id: Uuid,
        writer: Writer,
        patch: Map<String, Value>,
    ) -> BoxFuture<'static, RemoteResult<SessionRecord>> {
        let state = self.state.clone();
        Box::pin(async move { Ok(session_service::update_state(&state, id, writer, patch).await?) })
    }

    fn deactivate(&self, id: Uuid, host_id: String) -> BoxFuture<'static, RemoteResult<SessionRecord>> {
        let state = self.state.clone();
        Box::pin(async move { Ok(session_service::deactivate(&state, id, &host_id).await?) })
    }

    fn subscribe(&self, id: Uuid) -> BoxFuture<'static, RemoteResult<RecordStream>> {
        let state = self.state.clone();
        Box::pin(async move {
            let updates = sse_service::session_updates(&state, id).await?;
            Ok(updates.map(Ok).boxed())
        })
    }
}
