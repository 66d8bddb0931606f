use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database,
    bson::{DateTime, Document, doc, serialize_to_bson},
    error::{ErrorKind, WriteError, WriteFailure},
    options::{ClientOptions, IndexOptions, ReturnDocument},
};
use serde_json::{Map, Value};
use tokio::{sync::RwLock, time::sleep};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    config::MongoConfig,
    error::{MongoDaoError, MongoResult},
    models::{
        FIELD_IS_ACTIVE, FIELD_SESSION_CODE, FIELD_UPDATED_AT, MongoSessionDocument, doc_id,
        game_state_path,
    },
};
use crate::dao::{
    models::SessionEntity,
    session_store::{ActiveWrite, SessionStore},
    storage::StorageResult,
};

const SESSION_COLLECTION_NAME: &str = "sessions";
const DUPLICATE_KEY_CODE: i32 = 11000;
const CONNECT_ATTEMPTS: u32 = 8;
const CONNECT_FIRST_DELAY: Duration = Duration::from_millis(200);
const CONNECT_MAX_DELAY: Duration = Duration::from_secs(4);

/// Build a client and wait until the server answers a ping, backing off
/// between failed pings.
async fn dial(options: &ClientOptions, database_name: &str) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(database_name);

    let mut delay = CONNECT_FIRST_DELAY;
    let mut attempt = 1;
    loop {
        match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => return Ok((client, database)),
            Err(source) if attempt >= CONNECT_ATTEMPTS => {
                return Err(MongoDaoError::InitialPing {
                    attempts: attempt,
                    source,
                });
            }
            Err(err) => {
                warn!(attempt, database = database_name, error = %err, "MongoDB not answering yet");
                sleep(delay).await;
                delay = (delay * 2).min(CONNECT_MAX_DELAY);
                attempt += 1;
            }
        }
    }
}

/// `$set` document writing each patch key under `game_state` and bumping
/// `updated_at`.
fn merge_update(id: Uuid, patch: Map<String, Value>, updated_at: SystemTime) -> MongoResult<Document> {
    let mut set = Document::new();
    for (key, value) in patch {
        let encoded =
            serialize_to_bson(&value).map_err(|source| MongoDaoError::EncodePatch { id, source })?;
        set.insert(game_state_path(&key), encoded);
    }
    set.insert(FIELD_UPDATED_AT, DateTime::from_system_time(updated_at));
    Ok(doc! {"$set": set})
}

/// [`SessionStore`] over the `sessions` collection, reconnecting on demand.
#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            dial(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoSessionStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            dial(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let collection = self.collection().await;

        let code_index = mongodb::IndexModel::builder()
            .keys(doc! {FIELD_SESSION_CODE: 1})
            .options(
                IndexOptions::builder()
                    .name(Some("session_code_unique_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();

        collection
            .create_index(code_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SESSION_COLLECTION_NAME,
                index: FIELD_SESSION_CODE,
                source,
            })?;

        // Garbage collection scans by last write time.
        let updated_index = mongodb::IndexModel::builder()
            .keys(doc! {FIELD_UPDATED_AT: 1})
            .options(
                IndexOptions::builder()
                    .name(Some("session_updated_at_idx".to_owned()))
                    .build(),
            )
            .build();

        collection
            .create_index(updated_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SESSION_COLLECTION_NAME,
                index: FIELD_UPDATED_AT,
                source,
            })?;

        Ok(())
    }

    async fn collection(&self) -> Collection<MongoSessionDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoSessionDocument>(SESSION_COLLECTION_NAME)
    }

    async fn insert_session(&self, session: SessionEntity) -> MongoResult<()> {
        let id = session.id;
        let code = session.session_code.clone();
        let document: MongoSessionDocument = session.into();

        match self.collection().await.insert_one(&document).await {
            Ok(_) => Ok(()),
            Err(source) if is_duplicate_key(&source) => Err(MongoDaoError::DuplicateCode { code }),
            Err(source) => Err(MongoDaoError::InsertSession { id, source }),
        }
    }

    async fn find_one(&self, filter: Document, key: String) -> MongoResult<Option<SessionEntity>> {
        let document = self
            .collection()
            .await
            .find_one(filter)
            .await
            .map_err(|source| MongoDaoError::LoadSession {
                key: key.clone(),
                source,
            })?;

        document.map(SessionEntity::try_from).transpose()
    }

    /// Apply `update` only if the session is still active.
    async fn update_active(&self, id: Uuid, update: Document) -> MongoResult<ActiveWrite> {
        let mut filter = doc_id(id);
        filter.insert(FIELD_IS_ACTIVE, true);

        let document = self
            .collection()
            .await
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|source| MongoDaoError::UpdateSession { id, source })?;

        match document {
            Some(document) => Ok(ActiveWrite::Applied(SessionEntity::try_from(document)?)),
            None => {
                let existing = self.find_one(doc_id(id), id.to_string()).await?;
                Ok(ActiveWrite::untouched(existing.as_ref()))
            }
        }
    }

    async fn merge_game_state(
        &self,
        id: Uuid,
        patch: Map<String, Value>,
        updated_at: SystemTime,
    ) -> MongoResult<ActiveWrite> {
        self.update_active(id, merge_update(id, patch, updated_at)?).await
    }

    async fn deactivate(&self, id: Uuid, updated_at: SystemTime) -> MongoResult<ActiveWrite> {
        self.update_active(
            id,
            doc! {"$set": {
                FIELD_IS_ACTIVE: false,
                FIELD_UPDATED_AT: DateTime::from_system_time(updated_at),
            }},
        )
        .await
    }

    async fn delete_stale(&self, cutoff: SystemTime) -> MongoResult<Vec<Uuid>> {
        let collection = self.collection().await;
        let filter = doc! {FIELD_UPDATED_AT: {"$lt": DateTime::from_system_time(cutoff)}};

        let stale: Vec<MongoSessionDocument> = collection
            .find(filter.clone())
            .await
            .map_err(|source| MongoDaoError::DeleteStale { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::DeleteStale { source })?;

        // Re-applying the cutoff in the delete keeps sessions touched between
        // the scan and the delete.
        let result = collection
            .delete_many(filter)
            .await
            .map_err(|source| MongoDaoError::DeleteStale { source })?;
        debug!(deleted = result.deleted_count, "deleted stale sessions");

        stale
            .into_iter()
            .map(|document| SessionEntity::try_from(document).map(|entity| entity.id))
            .collect()
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(WriteError {
            code: DUPLICATE_KEY_CODE,
            ..
        }))
    )
}

impl SessionStore for MongoSessionStore {
    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_session(session).await.map_err(Into::into) })
    }

    fn find_by_code(&self, code: String) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_one(doc! {FIELD_SESSION_CODE: code.as_str()}, code)
                .await
                .map_err(Into::into)
        })
    }

    fn find_by_id(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_one(doc_id(id), id.to_string())
                .await
                .map_err(Into::into)
        })
    }

    fn merge_game_state(
        &self,
        id: Uuid,
        patch: Map<String, Value>,
        updated_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<ActiveWrite>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .merge_game_state(id, patch, updated_at)
                .await
                .map_err(Into::into)
        })
    }

    fn deactivate(&self, id: Uuid, updated_at: SystemTime) -> BoxFuture<'static, StorageResult<ActiveWrite>> {
        let store = self.clone();
        Box::pin(async move { store.deactivate(id, updated_at).await.map_err(Into::into) })
    }

    fn delete_stale(&self, cutoff: SystemTime) -> BoxFuture<'static, StorageResult<Vec<Uuid>>> {
        let store = self.clone();
        Box::pin(async move { store.delete_stale(cutoff).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use mongodb::bson::Bson;
    use serde_json::json;

    use super::*;

    #[test]
    fn merge_update_nests_patch_keys_under_game_state() {
        let patch = json!({
            "_pendingCommand": {"type": "spin-wheel", "power": 7},
            "_commandTimestamp": null,
            "usedLetters": ["A", "E"],
        });
        let Value::Object(patch) = patch else {
            unreachable!()
        };
        let at = UNIX_EPOCH + Duration::from_millis(1_700_000_000_000);

        let update = merge_update(Uuid::new_v4(), patch, at).unwrap();
        let set = update.get_document("$set").unwrap();

        let command = set.get_document("game_state._pendingCommand").unwrap();
        assert_eq!(command.get_str("type").unwrap(), "spin-wheel");
        assert_eq!(set.get("game_state._commandTimestamp"), Some(&Bson::Null));
        let letters = set.get_array("game_state.usedLetters").unwrap();
        assert_eq!(letters, &vec![Bson::String("A".into()), Bson::String("E".into())]);
        assert_eq!(
            set.get_datetime(FIELD_UPDATED_AT).unwrap(),
            &DateTime::from_system_time(at)
        );
        assert_eq!(set.len(), 4);
    }
}
