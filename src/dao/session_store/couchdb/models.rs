use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::dao::models::SessionEntity;

pub const SESSION_PREFIX: &str = "session::";
pub const CODE_PREFIX: &str = "session_code::";
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    #[allow(dead_code)]
    pub id: String,
    #[serde(default)]
    pub doc: Option<Value>,
}

/// Session document keyed by `session::{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchSessionDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub session: SessionBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionBody {
    pub session_id: Uuid,
    pub session_code: String,
    pub host_id: String,
    pub is_active: bool,
    #[serde(default)]
    pub game_state: Map<String, Value>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

/// Reservation document keyed by `session_code::{code}`.
///
/// CouchDB rejects a second PUT on the same id without a revision, which gives
/// the uniqueness constraint on codes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchCodeDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub session_id: Uuid,
}

impl CouchSessionDocument {
    pub fn from_entity(entity: SessionEntity, rev: Option<String>) -> Self {
        Self {
            id: session_doc_id(entity.id),
            rev,
            session: SessionBody {
                session_id: entity.id,
                session_code: entity.session_code,
                host_id: entity.host_id,
                is_active: entity.is_active,
                game_state: entity.game_state,
                created_at: entity.created_at,
                updated_at: entity.updated_at,
            },
        }
    }

    pub fn into_entity(self) -> SessionEntity {
        let body = self.session;
        SessionEntity {
            id: body.session_id,
            session_code: body.session_code,
            host_id: body.host_id,
            is_active: body.is_active,
            game_state: body.game_state,
            created_at: body.created_at,
            updated_at: body.updated_at,
        }
    }
}

impl CouchCodeDocument {
    pub fn new(code: &str, session_id: Uuid) -> Self {
        Self {
            id: code_doc_id(code),
            rev: None,
            session_id,
        }
    }
}

pub fn session_doc_id(id: Uuid) -> String {
    format!("{SESSION_PREFIX}{id}")
}

pub fn code_doc_id(code: &str) -> String {
    format!("{CODE_PREFIX}{code}")
}
