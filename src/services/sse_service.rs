use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt, stream::BoxStream};
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::{session::SessionRecord, sse::ServerEvent},
    error::ServiceError,
    services::session_service,
    state::SharedState,
};

/// SSE event name carrying a full session record.
pub const SESSION_UPDATED_EVENT: &str = "session.updated";

/// Hub subscription that hands its channel back once dropped.
struct Watch {
    receiver: Option<broadcast::Receiver<SessionRecord>>,
    state: SharedState,
    id: Uuid,
}

impl Watch {
    fn new(state: &SharedState, id: Uuid) -> Self {
        Self {
            receiver: Some(state.hubs().subscribe(id)),
            state: state.clone(),
            id,
        }
    }

    async fn recv(&mut self) -> Result<SessionRecord, RecvError> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => Err(RecvError::Closed),
        }
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        // the receiver has to go first or the channel still counts it
        self.receiver.take();
        self.state.hubs().release(&self.id);
    }
}

/// Push updates for one session: the current record first, then every write.
///
/// The hub subscription is taken before the current record is read so no
/// write can fall in between. Unknown sessions leave no channel behind, and
/// neither does a dropped stream. The stream ends when the session's channel
/// is closed (garbage collection).
pub async fn session_updates(
    state: &SharedState,
    id: Uuid,
) -> Result<BoxStream<'static, SessionRecord>, ServiceError> {
    let mut watch = Watch::new(state, id);
    let current = session_service::fetch_by_id(state, id).await?;

    let stream = async_stream::stream! {
        let mut newest = current.updated_at;
        yield current;
        loop {
            match watch.recv().await {
                Ok(record) => {
                    // Writes racing the initial read may arrive twice.
                    if record.updated_at < newest {
                        continue;
                    }
                    newest = record.updated_at;
                    yield record;
                }
                Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(skipped)) => {
                    // Later records are complete snapshots; keep going.
                    debug!(session_id = %id, skipped, "push subscriber lagged");
                    continue;
                }
            }
        }
    };
    Ok(stream.boxed())
}

/// Convert a record stream into an SSE response, forwarding events until
/// the client disconnects.
pub fn to_sse_stream(
    id: Uuid,
    mut records: BoxStream<'static, SessionRecord>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                next = records.next() => {
                    let Some(record) = next else {
                        break;
                    };
                    let payload = match ServerEvent::json(SESSION_UPDATED_EVENT.to_string(), &record) {
                        Ok(payload) => payload,
                        Err(err) => {
                            warn!(session_id = %id, error = %err, "failed to encode session record");
                            continue;
                        }
                    };
                    let mut event = Event::default().data(payload.data);
                    if let Some(name) = payload.event {
                        event = event.event(name);
                    }
                    if tx.send(Ok(event)).await.is_err() {
                        break;
                    }
                }
            }
        }
        info!(session_id = %id, "session SSE stream disconnected");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
