//! Process-local session store used for tests and single-node deployments.

use std::{sync::Arc, time::SystemTime};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::dao::{
    models::SessionEntity,
    session_store::{ActiveWrite, SessionStore},
    storage::{StorageError, StorageResult},
};

/// Session store keeping every record in memory.
///
/// The code index is the uniqueness constraint: a code is claimed through the
/// map entry API before the session itself is stored.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    sessions: DashMap<Uuid, SessionEntity>,
    codes: DashMap<String, Uuid>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Whether the store holds no session.
    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    fn insert(&self, session: SessionEntity) -> StorageResult<()> {
        match self.inner.codes.entry(session.session_code.clone()) {
            Entry::Occupied(_) => Err(StorageError::conflict(format!(
                "session code `{}` already in use",
                session.session_code
            ))),
            Entry::Vacant(slot) => {
                slot.insert(session.id);
                self.inner.sessions.insert(session.id, session);
                Ok(())
            }
        }
    }

    fn lookup_code(&self, code: &str) -> Option<SessionEntity> {
        let id = *self.inner.codes.get(code)?;
        self.inner.sessions.get(&id).map(|entry| entry.clone())
    }

    /// Apply `change` under the entry's write guard, only while active.
    fn write_active<F>(&self, id: Uuid, change: F) -> ActiveWrite
    where
        F: FnOnce(&mut SessionEntity),
    {
        let Some(mut entry) = self.inner.sessions.get_mut(&id) else {
            return ActiveWrite::Missing;
        };
        if !entry.is_active {
            return ActiveWrite::Ended;
        }
        change(entry.value_mut());
        ActiveWrite::Applied(entry.clone())
    }

    fn sweep(&self, cutoff: SystemTime) -> Vec<Uuid> {
        let stale: Vec<(Uuid, String)> = self
            .inner
            .sessions
            .iter()
            .filter(|entry| entry.is_stale(cutoff))
            .map(|entry| (entry.id, entry.session_code.clone()))
            .collect();

        stale
            .into_iter()
            .filter_map(|(id, code)| {
                self.inner
                    .sessions
                    .remove_if(&id, |_, session| session.is_stale(cutoff))?;
                self.inner.codes.remove_if(&code, |_, owner| *owner == id);
                Some(id)
            })
            .collect()
    }
}

impl SessionStore for MemorySessionStore {
    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert(session) })
    }

    fn find_by_code(&self, code: String) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.lookup_code(&code)) })
    }

    fn find_by_id(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.sessions.get(&id).map(|entry| entry.clone())) })
    }

    fn merge_game_state(
        &self,
        id: Uuid,
        patch: Map<String, Value>,
        updated_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<ActiveWrite>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store.write_active(id, |session| session.merge_game_state(patch, updated_at)))
        })
    }

    fn deactivate(&self, id: Uuid, updated_at: SystemTime) -> BoxFuture<'static, StorageResult<ActiveWrite>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store.write_active(id, |session| {
                session.is_active = false;
                session.updated_at = updated_at;
            }))
        })
    }

    fn delete_stale(&self, cutoff: SystemTime) -> BoxFuture<'static, StorageResult<Vec<Uuid>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.sweep(cutoff)) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn session(code: &str, updated_at: SystemTime) -> SessionEntity {
        SessionEntity::new(
            Uuid::new_v4(),
            code.into(),
            "host-1".into(),
            Map::new(),
            updated_at,
        )
    }

    #[tokio::test]
    async fn duplicate_code_is_a_conflict() {
        let store = MemorySessionStore::new();
        let now = SystemTime::now();
        store.insert_session(session("KOLO-1111", now)).await.unwrap();

        let err = store
            .insert_session(session("KOLO-1111", now))
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn merge_on_unknown_id_is_missing() {
        let store = MemorySessionStore::new();
        let updated = store
            .merge_game_state(Uuid::new_v4(), Map::new(), SystemTime::now())
            .await
            .unwrap();
        assert!(matches!(updated, ActiveWrite::Missing));
    }

    #[tokio::test]
    async fn ended_sessions_refuse_merges_and_second_deactivation() {
        let store = MemorySessionStore::new();
        let now = SystemTime::now();
        let entity = session("KOLO-3333", now);
        let id = entity.id;
        store.insert_session(entity).await.unwrap();

        assert!(matches!(
            store.deactivate(id, now).await.unwrap(),
            ActiveWrite::Applied(ended) if !ended.is_active
        ));

        let mut patch = Map::new();
        patch.insert("round".into(), Value::from(2));
        assert!(matches!(
            store.merge_game_state(id, patch, now).await.unwrap(),
            ActiveWrite::Ended
        ));
        assert!(matches!(store.deactivate(id, now).await.unwrap(), ActiveWrite::Ended));
        let stored = store.find_by_id(id).await.unwrap().unwrap();
        assert!(!stored.game_state.contains_key("round"));
    }

    #[tokio::test]
    async fn delete_stale_releases_code() {
        let store = MemorySessionStore::new();
        let now = SystemTime::now();
        let old = session("KOLO-2222", now - Duration::from_secs(3_600));
        let old_id = old.id;
        store.insert_session(old).await.unwrap();

        let deleted = store.delete_stale(now).await.unwrap();

        assert_eq!(deleted, vec![old_id]);
        assert!(store.is_empty());
        store
            .insert_session(session("KOLO-2222", now))
            .await
            .unwrap();
    }
}
