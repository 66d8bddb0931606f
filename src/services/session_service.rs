//! Provider-side session operations: create, fetch, merge, deactivate.
//!
//! Every successful write is published on the session's push hub.

use std::time::SystemTime;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::{models::SessionEntity, session_store::ActiveWrite},
    dto::session::{CreateSessionRequest, JoinLinkResponse, SessionRecord, Writer},
    error::ServiceError,
    state::SharedState,
    sync::{envelope::is_mailbox_key, session_code},
};

/// Insert a new session under the code chosen by the host device.
pub async fn create(
    state: &SharedState,
    request: CreateSessionRequest,
) -> Result<SessionRecord, ServiceError> {
    request
        .validate()
        .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;
    let code = state
        .codec()
        .parse(&request.session_code)
        .ok_or_else(|| {
            ServiceError::InvalidInput(format!(
                "session code must look like {}-1234",
                state.codec().prefix()
            ))
        })?;

    let store = state.require_session_store().await?;
    let entity = SessionEntity::new(
        request.id.unwrap_or_else(Uuid::new_v4),
        code,
        request.host_id,
        request.game_state,
        SystemTime::now(),
    );
    store.insert_session(entity.clone()).await.map_err(|err| {
        if err.is_conflict() {
            debug!(code = %entity.session_code, "session code collision");
        }
        ServiceError::from(err)
    })?;

    info!(session_id = %entity.id, code = %entity.session_code, "session created");
    Ok(entity.into())
}

/// Active session by code; ended sessions read as not found.
pub async fn fetch_by_code(state: &SharedState, code: &str) -> Result<SessionRecord, ServiceError> {
    let entity = active_by_code(state, code).await?;
    Ok(entity.into())
}

/// Session by id, whether active or not.
pub async fn fetch_by_id(state: &SharedState, id: Uuid) -> Result<SessionRecord, ServiceError> {
    Ok(load(state, id).await?.into())
}

/// Shallow-merge `patch` into the game state.
///
/// Hosts must present the id that created the session. Controllers may only
/// write the command mailbox keys.
pub async fn update_state(
    state: &SharedState,
    id: Uuid,
    writer: Writer,
    patch: Map<String, Value>,
) -> Result<SessionRecord, ServiceError> {
    let store = state.require_session_store().await?;
    let current = load(state, id).await?;
    if !current.is_active {
        return Err(ServiceError::SessionEnded);
    }

    match &writer {
        Writer::Host(host_id) if *host_id != current.host_id => {
            warn!(session_id = %id, "state write with a foreign host id");
            return Err(ServiceError::Unauthorized(
                "only the session host may write the game state".into(),
            ));
        }
        Writer::Host(_) => {}
        Writer::Controller => {
            if let Some(key) = patch.keys().find(|key| !is_mailbox_key(key)) {
                return Err(ServiceError::Unauthorized(format!(
                    "controllers may only write the command mailbox (got `{key}`)"
                )));
            }
        }
    }

    let updated = applied(id, store.merge_game_state(id, patch, SystemTime::now()).await?)?;
    let record = SessionRecord::from(updated);
    state.hubs().publish(&record);
    Ok(record)
}

/// End the session. Only its host may do so, and only once.
pub async fn deactivate(
    state: &SharedState,
    id: Uuid,
    host_id: &str,
) -> Result<SessionRecord, ServiceError> {
    let store = state.require_session_store().await?;
    let current = load(state, id).await?;
    if current.host_id != host_id.trim() {
        return Err(ServiceError::Unauthorized(
            "only the session host may end the session".into(),
        ));
    }
    if !current.is_active {
        return Err(ServiceError::SessionEnded);
    }

    let updated = applied(id, store.deactivate(id, SystemTime::now()).await?)?;
    let record = SessionRecord::from(updated);
    state.hubs().publish(&record);
    info!(session_id = %id, code = %record.session_code, "session deactivated");
    Ok(record)
}

/// URL a controller opens to join the session behind `code`.
pub async fn join_link(state: &SharedState, code: &str) -> Result<JoinLinkResponse, ServiceError> {
    let entity = active_by_code(state, code).await?;
    let url = session_code::join_url(&state.config().public_base_url, &entity.session_code);
    Ok(JoinLinkResponse::new(&entity, url))
}

async fn active_by_code(state: &SharedState, code: &str) -> Result<SessionEntity, ServiceError> {
    let code = state
        .codec()
        .parse(code)
        .ok_or_else(|| ServiceError::InvalidInput(format!("`{}` is not a session code", code.trim())))?;
    let store = state.require_session_store().await?;
    store
        .find_by_code(code.clone())
        .await?
        .filter(|entity| entity.is_active)
        .ok_or_else(|| ServiceError::NotFound(format!("no active session `{code}`")))
}

async fn load(state: &SharedState, id: Uuid) -> Result<SessionEntity, ServiceError> {
    let store = state.require_session_store().await?;
    store.find_by_id(id).await?.ok_or_else(|| not_found(id))
}

/// The activity check above is advisory; the store's guarded write decides.
fn applied(id: Uuid, write: ActiveWrite) -> Result<SessionEntity, ServiceError> {
    match write {
        ActiveWrite::Applied(entity) => Ok(entity),
        ActiveWrite::Ended => {
            debug!(session_id = %id, "write raced with the end of the session");
            Err(ServiceError::SessionEnded)
        }
        ActiveWrite::Missing => Err(not_found(id)),
    }
}

fn not_found(id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("session {id} not found"))
}
