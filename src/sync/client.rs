//! Session operations with code generation and error mapping.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::session::{CreateSessionRequest, SessionRecord, Writer},
    sync::{
        error::{RemoteError, SyncError, SyncResult},
        remote::SessionRemote,
        session_code::{self, SessionCodec},
    },
};

/// Thin client over a [`SessionRemote`].
///
/// Only `create` retries (on code collisions); every other failure is passed
/// through for the caller to handle.
#[derive(Clone)]
pub struct SessionClient {
    remote: Arc<dyn SessionRemote>,
    codec: SessionCodec,
    create_attempts: u32,
}

impl SessionClient {
    /// Client making at most `create_attempts` insert attempts per session.
    pub fn new(remote: Arc<dyn SessionRemote>, codec: SessionCodec, create_attempts: u32) -> Self {
        Self {
            remote,
            codec,
            create_attempts: create_attempts.max(1),
        }
    }

    /// Code rules this client generates and parses with.
    pub fn codec(&self) -> &SessionCodec {
        &self.codec
    }

    /// Insert a new session under a freshly generated code.
    pub async fn create(
        &self,
        host_id: &str,
        initial_state: Map<String, Value>,
    ) -> SyncResult<SessionRecord> {
        let id = Uuid::new_v4();

        for attempt in 1..=self.create_attempts {
            let request = CreateSessionRequest {
                id: Some(id),
                session_code: self.codec.generate(),
                host_id: host_id.to_string(),
                game_state: initial_state.clone(),
            };
            let code = request.session_code.clone();

            match self.remote.insert(request).await {
                Ok(record) => {
                    info!(session_id = %record.id, code = %record.session_code, "session created");
                    return Ok(record);
                }
                Err(RemoteError::Conflict) => {
                    debug!(code = %code, attempt, "session code taken; regenerating");
                }
                Err(err) => return Err(err.into()),
            }
        }

        warn!(attempts = self.create_attempts, "no free session code");
        Err(SyncError::CodeSpaceExhausted {
            attempts: self.create_attempts,
        })
    }

    /// Active session by code. Inactive sessions read as absent.
    pub async fn fetch(&self, code: &str) -> SyncResult<Option<SessionRecord>> {
        let code = session_code::normalize(code);
        let record = self.remote.find_by_code(code).await?;
        Ok(record.filter(|record| record.is_active))
    }

    /// Session by id, active or not.
    pub async fn fetch_by_id(&self, id: Uuid) -> SyncResult<Option<SessionRecord>> {
        Ok(self.remote.find_by_id(id).await?)
    }

    /// Shallow-merge `patch` into the session's game state.
    pub async fn update(
        &self,
        id: Uuid,
        writer: Writer,
        patch: Map<String, Value>,
    ) -> SyncResult<SessionRecord> {
        Ok(self.remote.update(id, writer, patch).await?)
    }

    /// End the session as its host.
    pub async fn deactivate(&self, id: Uuid, host_id: &str) -> SyncResult<SessionRecord> {
        let record = self.remote.deactivate(id, host_id.to_string()).await?;
        info!(session_id = %id, "session deactivated");
        Ok(record)
    }
}
