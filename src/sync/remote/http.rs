//! Provider reached over the REST + SSE surface of a remote server.

use std::{fmt::Display, sync::Arc};

use async_stream::stream;
use futures::{Stream, StreamExt, future::BoxFuture};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

pub use crate::{routes::session::HOST_ID_HEADER, services::sse_service::SESSION_UPDATED_EVENT};
use crate::{
    dto::session::{CreateSessionRequest, SessionRecord, Writer},
    sync::{
        error::RemoteError,
        remote::{RecordStream, RemoteResult, SessionRemote},
    },
};

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Provider behind `base_url`, sharing one reqwest client.
#[derive(Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: Arc<str>,
}

impl HttpRemote {
    /// Provider with a default client.
    pub fn new(base_url: impl AsRef<str>) -> RemoteResult<Self> {
        let client = Client::builder().build().map_err(transport)?;
        Ok(Self::with_client(client, base_url))
    }

    /// Provider reusing `client`.
    pub fn with_client(client: Client, base_url: impl AsRef<str>) -> Self {
        Self {
            client,
            base_url: Arc::from(base_url.as_ref().trim_end_matches('/')),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_optional(&self, path: String) -> RemoteResult<Option<SessionRecord>> {
        let response = self
            .client
            .get(self.url(&path))
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => decode(response).await.map(Some),
            _ => Err(failure(response, RemoteError::SessionEnded).await),
        }
    }
}

fn transport(err: reqwest::Error) -> RemoteError {
    RemoteError::Transport(err.to_string())
}

async fn decode<T: DeserializeOwned>(response: Response) -> RemoteResult<T> {
    response.json::<T>().await.map_err(transport)
}

/// Map an unsuccessful response; what a 409 means depends on the call.
async fn failure(response: Response, on_conflict: RemoteError) -> RemoteError {
    let status = response.status();
    let message = response
        .json::<ErrorBody>()
        .await
        .map(|body| body.message)
        .unwrap_or_else(|_| status.to_string());

    match status {
        StatusCode::NOT_FOUND => RemoteError::NotFound,
        StatusCode::CONFLICT => on_conflict,
        status if status.is_server_error() => RemoteError::Transport(message),
        _ => RemoteError::Rejected(message),
    }
}

async fn expect_record(response: Response, on_conflict: RemoteError) -> RemoteResult<SessionRecord> {
    if response.status().is_success() {
        decode(response).await
    } else {
        Err(failure(response, on_conflict).await)
    }
}

impl SessionRemote for HttpRemote {
    fn insert(&self, request: CreateSessionRequest) -> BoxFuture<'static, RemoteResult<SessionRecord>> {
        let remote = self.clone();
        Box::pin(async move {
            let response = remote
                .client
                .post(remote.url("/sessions"))
                .json(&request)
                .send()
                .await
                .map_err(transport)?;
            expect_record(response, RemoteError::Conflict).await
        })
    }

    fn find_by_code(&self, code: String) -> BoxFuture<'static, RemoteResult<Option<SessionRecord>>> {
        let remote = self.clone();
        Box::pin(async move { remote.get_optional(format!("/sessions/{code}")).await })
    }

    fn find_by_id(&self, id: Uuid) -> BoxFuture<'static, RemoteResult<Option<SessionRecord>>> {
        let remote = self.clone();
        Box::pin(async move { remote.get_optional(format!("/sessions/id/{id}")).await })
    }

    fn update(
        &self,
        id: Uuid,
        writer: Writer,
        patch: Map<String, Value>,
    ) -> BoxFuture<'static, RemoteResult<SessionRecord>> {
        let remote = self.clone();
        Box::pin(async move {
            let mut request = remote
                .client
                .patch(remote.url(&format!("/sessions/id/{id}/state")))
                .json(&patch);
            if let Writer::Host(host_id) = &writer {
                request = request.header(HOST_ID_HEADER, host_id.as_str());
            }
            let response = request.send().await.map_err(transport)?;
            expect_record(response, RemoteError::SessionEnded).await
        })
    }

    fn deactivate(&self, id: Uuid, host_id: String) -> BoxFuture<'static, RemoteResult<SessionRecord>> {
        let remote = self.clone();
        Box::pin(async move {
            let response = remote
                .client
                .post(remote.url(&format!("/sessions/id/{id}/deactivate")))
                .header(HOST_ID_HEADER, host_id.as_str())
                .send()
                .await
                .map_err(transport)?;
            expect_record(response, RemoteError::SessionEnded).await
        })
    }

    fn subscribe(&self, id: Uuid) -> BoxFuture<'static, RemoteResult<RecordStream>> {
        let remote = self.clone();
        Box::pin(async move {
            let response = remote
                .client
                .get(remote.url(&format!("/sessions/id/{id}/events")))
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .send()
                .await
                .map_err(transport)?;

            if !response.status().is_success() {
                return Err(failure(response, RemoteError::SessionEnded).await);
            }
            debug!(session_id = %id, "push stream opened");
            Ok(record_stream(response.bytes_stream()))
        })
    }
}

/// Turn a raw `text/event-stream` body into session records.
///
/// Comments (keep-alives) and events other than [`SESSION_UPDATED_EVENT`] are
/// skipped; a body error ends the stream after yielding it.
pub fn record_stream<S, B, E>(body: S) -> RecordStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let stream = stream! {
        let mut body = Box::pin(body);
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    yield Err(RemoteError::Transport(err.to_string()));
                    return;
                }
            };
            buffer.extend_from_slice(chunk.as_ref());
            while let Some(end) = buffer.windows(2).position(|pair| pair == b"\n\n") {
                let block: Vec<u8> = buffer.drain(..end + 2).collect();
                if let Some(event) = parse_event(&String::from_utf8_lossy(&block)) {
                    yield event;
                }
            }
        }
    };
    stream.boxed()
}

fn parse_event(block: &str) -> Option<RemoteResult<SessionRecord>> {
    let mut event = None;
    let mut data = Vec::new();

    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value),
            "data" => data.push(value),
            _ => {}
        }
    }

    if event != Some(SESSION_UPDATED_EVENT) || data.is_empty() {
        return None;
    }

    Some(
        serde_json::from_str::<SessionRecord>(&data.join("\n")).map_err(|err| {
            RemoteError::Transport(format!("malformed push payload: {err}"))
        }),
    )
}
