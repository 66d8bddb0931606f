use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::SessionEntity,
    dto::{
        epoch_millis, format_system_time,
        validation::{validate_host_id, validate_session_code_shape},
    },
};

/// Shared session record as exchanged with host and controller devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Record identifier, also the push channel key.
    pub id: Uuid,
    /// Normalized join code, unique among active records.
    pub session_code: String,
    /// Identity of the host device that owns the record.
    pub host_id: String,
    /// Cleared once the host ends the session.
    pub is_active: bool,
    /// Game state envelope; opaque to the provider.
    #[schema(value_type = Object)]
    pub game_state: Map<String, Value>,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    /// Milliseconds since the Unix epoch.
    pub updated_at: i64,
}

impl From<SessionEntity> for SessionRecord {
    fn from(entity: SessionEntity) -> Self {
        Self {
            id: entity.id,
            session_code: entity.session_code,
            host_id: entity.host_id,
            is_active: entity.is_active,
            game_state: entity.game_state,
            created_at: epoch_millis(entity.created_at),
            updated_at: epoch_millis(entity.updated_at),
        }
    }
}

/// Payload inserting a new session record.
///
/// The device picks the code; a collision is answered with `409 Conflict` so
/// the caller can regenerate and retry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Optional client-chosen identifier; generated when omitted.
    #[serde(default)]
    pub id: Option<Uuid>,
    /// Normalized code chosen by the device.
    #[validate(custom(function = "validate_session_code_shape"))]
    pub session_code: String,
    /// Persistent identity of the creating host.
    #[validate(custom(function = "validate_host_id"))]
    pub host_id: String,
    /// Initial envelope.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub game_state: Map<String, Value>,
}

/// Join information for a session code, rendered as a QR code by the host.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JoinLinkResponse {
    /// Code controllers type in.
    pub session_code: String,
    /// Deep link encoded in the QR code.
    pub url: String,
    /// RFC 3339 creation time of the session.
    pub created_at: String,
}

impl JoinLinkResponse {
    /// Join information for `entity` under the given link.
    pub fn new(entity: &SessionEntity, url: String) -> Self {
        Self {
            session_code: entity.session_code.clone(),
            url,
            created_at: format_system_time(entity.created_at),
        }
    }
}

/// Role a write to the game state is performed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Writer {
    /// The authoritative host, identified by its host id.
    Host(String),
    /// Any controller; may only touch the command mailbox.
    Controller,
}

impl Writer {
    /// Interpret the optional `x-host-id` header value.
    pub fn from_header(host_id: Option<&str>) -> Self {
        match host_id.map(str::trim) {
            Some(id) if !id.is_empty() => Writer::Host(id.to_string()),
            _ => Writer::Controller,
        }
    }
}
