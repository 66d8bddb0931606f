use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::error::{MongoDaoError, MongoResult};
use crate::dao::models::SessionEntity;

pub const FIELD_SESSION_CODE: &str = "session_code";
pub const FIELD_IS_ACTIVE: &str = "is_active";
pub const FIELD_GAME_STATE: &str = "game_state";
pub const FIELD_UPDATED_AT: &str = "updated_at";

/// Session document as stored in the `sessions` collection.
///
/// The identifier is kept in its hyphenated string form so filters stay
/// readable from the mongo shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    id: String,
    session_code: String,
    host_id: String,
    is_active: bool,
    #[serde(default)]
    game_state: Map<String, Value>,
    created_at: DateTime,
    updated_at: DateTime,
}

impl From<SessionEntity> for MongoSessionDocument {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: value.id.to_string(),
            session_code: value.session_code,
            host_id: value.host_id,
            is_active: value.is_active,
            game_state: value.game_state,
            created_at: DateTime::from_system_time(value.created_at),
            updated_at: DateTime::from_system_time(value.updated_at),
        }
    }
}

impl TryFrom<MongoSessionDocument> for SessionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoSessionDocument) -> MongoResult<Self> {
        let id = Uuid::parse_str(&value.id)
            .map_err(|_| MongoDaoError::MalformedId { key: value.id.clone() })?;
        Ok(Self {
            id,
            session_code: value.session_code,
            host_id: value.host_id,
            is_active: value.is_active,
            game_state: value.game_state,
            created_at: value.created_at.to_system_time(),
            updated_at: value.updated_at.to_system_time(),
        })
    }
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": id.to_string()}
}

/// Dotted path addressing one top-level key of the embedded game state.
pub fn game_state_path(key: &str) -> String {
    format!("{FIELD_GAME_STATE}.{key}")
}
