use std::{sync::Arc, time::SystemTime};

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value, from_value};
use tracing::warn;
use uuid::Uuid;

use crate::dao::{
    models::SessionEntity,
    session_store::{ActiveWrite, SessionStore},
    storage::StorageResult,
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, CouchCodeDocument, CouchSessionDocument, END_SUFFIX, SESSION_PREFIX,
        code_doc_id, session_doc_id,
    },
};

const MAX_UPDATE_ATTEMPTS: usize = 3;

/// Outcome of a PUT against a document id.
enum PutOutcome {
    Written,
    Conflict,
}

/// Session store over the CouchDB HTTP API.
#[derive(Clone)]
pub struct CouchSessionStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchSessionStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .credentials
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth {
            Some((ref user, ref pass)) => builder.basic_auth(user.as_ref(), Some(pass.as_ref())),
            None => builder,
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, self.database, path);
        self.authorized(self.client.request(method, url))
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = format!("{}/{}", self.base_url, self.database);

        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorized(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                if create.status().is_success() {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<PutOutcome>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Ok(PutOutcome::Conflict),
            status if status.is_success() => Ok(PutOutcome::Written),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn delete_document(&self, doc_id: &str, rev: &str) -> CouchResult<()> {
        let response = self
            .request(Method::DELETE, doc_id)
            .query(&[("rev", rev)])
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            // Already gone or concurrently rewritten; both leave nothing to do.
            StatusCode::NOT_FOUND | StatusCode::CONFLICT => Ok(()),
            status if status.is_success() => Ok(()),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn list_documents<T>(&self, prefix: &str) -> CouchResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        const ALL_DOCS: &str = "_all_docs";
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{}\"", prefix)),
            ("endkey", format!("\"{}{}\"", prefix, END_SUFFIX)),
        ];

        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;

        payload
            .rows
            .into_iter()
            .filter_map(|row| row.doc)
            .map(|doc| {
                from_value(doc).map_err(|source| CouchDaoError::DeserializeValue {
                    path: ALL_DOCS.to_string(),
                    source,
                })
            })
            .collect()
    }

    async fn insert_session(&self, session: SessionEntity) -> CouchResult<()> {
        let code = session.session_code.clone();
        let reservation = CouchCodeDocument::new(&code, session.id);

        if let PutOutcome::Conflict = self.put_document(&reservation.id, &reservation).await? {
            return Err(CouchDaoError::DuplicateCode { code });
        }

        let doc = CouchSessionDocument::from_entity(session, None);
        match self.put_document(&doc.id, &doc).await? {
            PutOutcome::Written => Ok(()),
            PutOutcome::Conflict => Err(CouchDaoError::UpdateContention { path: doc.id }),
        }
    }

    async fn find_by_code(&self, code: &str) -> CouchResult<Option<SessionEntity>> {
        let Some(reservation) = self
            .get_document::<CouchCodeDocument>(&code_doc_id(code))
            .await?
        else {
            return Ok(None);
        };
        self.find_by_id(reservation.session_id).await
    }

    async fn find_by_id(&self, id: Uuid) -> CouchResult<Option<SessionEntity>> {
        let doc = self
            .get_document::<CouchSessionDocument>(&session_doc_id(id))
            .await?;
        Ok(doc.map(CouchSessionDocument::into_entity))
    }

    /// Read-modify-write loop retried on revision conflicts. The write
    /// carries the revision that was read as active, so a deactivation in
    /// between turns it into a conflict and the next read sees the end.
    async fn modify_active<F>(&self, id: Uuid, apply: F) -> CouchResult<ActiveWrite>
    where
        F: Fn(&mut SessionEntity),
    {
        let doc_id = session_doc_id(id);

        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let Some(current) = self.get_document::<CouchSessionDocument>(&doc_id).await? else {
                return Ok(ActiveWrite::Missing);
            };
            let rev = current.rev.clone();
            let mut entity = current.into_entity();
            if !entity.is_active {
                return Ok(ActiveWrite::Ended);
            }
            apply(&mut entity);

            let doc = CouchSessionDocument::from_entity(entity.clone(), rev);
            match self.put_document(&doc_id, &doc).await? {
                PutOutcome::Written => return Ok(ActiveWrite::Applied(entity)),
                PutOutcome::Conflict => {
                    warn!(doc_id = %doc_id, attempt, "CouchDB revision conflict; retrying");
                }
            }
        }

        Err(CouchDaoError::UpdateContention { path: doc_id })
    }

    async fn delete_stale(&self, cutoff: SystemTime) -> CouchResult<Vec<Uuid>> {
        let docs = self
            .list_documents::<CouchSessionDocument>(SESSION_PREFIX)
            .await?;

        let mut deleted = Vec::new();
        for doc in docs {
            if doc.session.updated_at >= cutoff {
                continue;
            }
            let Some(rev) = doc.rev.as_deref() else {
                continue;
            };
            self.delete_document(&doc.id, rev).await?;

            let code_id = code_doc_id(&doc.session.session_code);
            match self.get_document::<CouchCodeDocument>(&code_id).await? {
                Some(CouchCodeDocument {
                    rev: Some(rev),
                    session_id,
                    ..
                }) if session_id == doc.session.session_id => {
                    self.delete_document(&code_id, &rev).await?;
                }
                _ => {}
            }
            deleted.push(doc.session.session_id);
        }

        Ok(deleted)
    }
}

impl SessionStore for CouchSessionStore {
    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_session(session).await.map_err(Into::into) })
    }

    fn find_by_code(&self, code: String) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_by_code(&code).await.map_err(Into::into) })
    }

    fn find_by_id(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_by_id(id).await.map_err(Into::into) })
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
                .modify_active(id, |session| {
                    session.merge_game_state(patch.clone(), updated_at)
                })
                .await
                .map_err(Into::into)
        })
    }

    fn deactivate(&self, id: Uuid, updated_at: SystemTime) -> BoxFuture<'static, StorageResult<ActiveWrite>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .modify_active(id, |session| {
                    session.is_active = false;
                    session.updated_at = updated_at;
                })
                .await
                .map_err(Into::into)
        })
    }

    fn delete_stale(&self, cutoff: SystemTime) -> BoxFuture<'static, StorageResult<Vec<Uuid>>> {
        let store = self.clone();
        Box::pin(async move { store.delete_stale(cutoff).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let url = format!("{}/{}", store.base_url, store.database);
            let response = store
                .authorized(store.client.get(&url))
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: url.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path: url,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
