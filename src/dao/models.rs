use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::SystemTime;
use uuid::Uuid;

/// Aggregate session entity persisted by the storage layer.
///
/// `game_state` is kept as an untyped JSON object: the storage layer only
/// merges its top-level keys and never interprets their content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionEntity {
    /// Primary key of the session.
    pub id: Uuid,
    /// Short human-typable code (`PREFIX-NNNN`), unique across sessions.
    pub session_code: String,
    /// Identifier of the device that created the session.
    pub host_id: String,
    /// False once the host ended the game.
    pub is_active: bool,
    /// Shared game state document.
    pub game_state: Map<String, Value>,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Last write timestamp, drives garbage collection.
    pub updated_at: SystemTime,
}

impl SessionEntity {
    /// Build a fresh active session stamped with `now`.
    pub fn new(
        id: Uuid,
        session_code: String,
        host_id: String,
        game_state: Map<String, Value>,
        now: SystemTime,
    ) -> Self {
        Self {
            id,
            session_code,
            host_id,
            is_active: true,
            game_state,
            created_at: now,
            updated_at: now,
        }
    }

    /// Shallow merge `patch` into the game state: each top-level key of the
    /// patch replaces the stored key wholesale.
    pub fn merge_game_state(&mut self, patch: Map<String, Value>, now: SystemTime) {
        for (key, value) in patch {
            self.game_state.insert(key, value);
        }
        self.updated_at = now;
    }

    /// Whether the session was last touched before `cutoff`.
    pub fn is_stale(&self, cutoff: SystemTime) -> bool {
        self.updated_at < cutoff
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn entity(state: Value) -> SessionEntity {
        let Value::Object(map) = state else {
            panic!("expected object");
        };
        SessionEntity::new(
            Uuid::new_v4(),
            "KOLO-1234".into(),
            "host".into(),
            map,
            SystemTime::UNIX_EPOCH,
        )
    }

    #[test]
    fn merge_replaces_top_level_keys_only() {
        let mut session = entity(json!({
            "players": [{"name": "A"}],
            "round": 1,
            "_pendingCommand": {"type": "toggle-sound"}
        }));
        let Value::Object(patch) = json!({ "round": 2, "players": [] }) else {
            unreachable!()
        };
        let later = SystemTime::UNIX_EPOCH + Duration::from_secs(5);

        session.merge_game_state(patch, later);

        assert_eq!(session.game_state["round"], json!(2));
        assert_eq!(session.game_state["players"], json!([]));
        assert_eq!(
            session.game_state["_pendingCommand"],
            json!({"type": "toggle-sound"})
        );
        assert_eq!(session.updated_at, later);
    }

    #[test]
    fn stale_compares_updated_at() {
        let session = entity(json!({}));
        assert!(session.is_stale(SystemTime::UNIX_EPOCH + Duration::from_secs(1)));
        assert!(!session.is_stale(SystemTime::UNIX_EPOCH));
    }
}
