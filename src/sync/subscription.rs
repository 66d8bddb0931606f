//! Push subscription to one session record with bounded reconnects.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures::StreamExt;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{sleep, timeout},
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::session::SessionRecord,
    sync::{clock::SharedClock, remote::SessionRemote},
};

/// Lifecycle of the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Nothing subscribed yet.
    Idle,
    /// A subscribe call is in flight.
    Connecting,
    /// The push stream is delivering records.
    Connected,
    /// The subscription failed or timed out.
    Error(String),
    /// The provider ended the stream.
    Closed,
    /// Waiting `delay` before reconnect attempt number `attempt`.
    Reconnecting {
        /// One-based index into the reconnect schedule.
        attempt: usize,
        /// Pause before that attempt.
        delay: Duration,
    },
    /// Reconnect schedule exhausted; only a manual re-join recovers.
    Disconnected,
}

impl ConnectionStatus {
    /// Whether automatic reconnects have stopped for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionStatus::Disconnected)
    }
}

/// Last record received through the push channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncedRecord {
    /// The record as pushed.
    pub record: SessionRecord,
    /// Local clock reading when the record arrived.
    pub synced_at: i64,
}

struct SubscriptionInner {
    remote: Arc<dyn SessionRemote>,
    clock: SharedClock,
    schedule: Vec<Duration>,
    subscribe_timeout: Duration,
    status: watch::Sender<ConnectionStatus>,
    record: watch::Sender<Option<SyncedRecord>>,
}

/// Keeps exactly one push subscription alive and caches the latest record.
pub struct SubscriptionManager {
    inner: Arc<SubscriptionInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionManager {
    /// Idle manager; nothing happens until [`subscribe`](Self::subscribe).
    pub fn new(
        remote: Arc<dyn SessionRemote>,
        clock: SharedClock,
        schedule: Vec<Duration>,
        subscribe_timeout: Duration,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Idle);
        let (record, _) = watch::channel(None);
        Self {
            inner: Arc::new(SubscriptionInner {
                remote,
                clock,
                schedule,
                subscribe_timeout,
                status,
                record,
            }),
            task: Mutex::new(None),
        }
    }

    /// Subscribe to `id`, tearing down any previous subscription first.
    ///
    /// A record cached for another session is forgotten right away.
    pub fn subscribe(&self, id: Uuid) {
        let mut task = self.task_slot();
        if let Some(previous) = task.take() {
            previous.abort();
        }
        self.inner.record.send_if_modified(|cached| {
            let foreign = cached.as_ref().is_some_and(|synced| synced.record.id != id);
            if foreign {
                *cached = None;
            }
            foreign
        });
        let inner = self.inner.clone();
        *task = Some(tokio::spawn(run(inner, id)));
    }

    /// Drop the current subscription, if any.
    pub fn unsubscribe(&self) {
        if let Some(previous) = self.task_slot().take() {
            previous.abort();
        }
        self.inner.status.send_replace(ConnectionStatus::Idle);
    }

    /// Follow connection status changes.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Connection status right now.
    pub fn current_status(&self) -> ConnectionStatus {
        self.inner.status.borrow().clone()
    }

    /// Follow the cached record.
    pub fn records(&self) -> watch::Receiver<Option<SyncedRecord>> {
        self.inner.record.subscribe()
    }

    /// Last pushed record, if any.
    pub fn current(&self) -> Option<SyncedRecord> {
        self.inner.record.borrow().clone()
    }

    fn task_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        if let Some(task) = self.task_slot().take() {
            task.abort();
        }
    }
}

async fn run(inner: Arc<SubscriptionInner>, id: Uuid) {
    let mut failures = 0usize;

    loop {
        inner.status.send_replace(ConnectionStatus::Connecting);

        match timeout(inner.subscribe_timeout, inner.remote.subscribe(id)).await {
            Ok(Ok(mut stream)) => {
                failures = 0;
                inner.status.send_replace(ConnectionStatus::Connected);
                info!(session_id = %id, "push subscription established");

                loop {
                    match stream.next().await {
                        Some(Ok(record)) => {
                            let synced_at = inner.clock.now_millis();
                            inner
                                .record
                                .send_replace(Some(SyncedRecord { record, synced_at }));
                        }
                        Some(Err(err)) => {
                            warn!(session_id = %id, error = %err, "push subscription failed");
                            inner.status.send_replace(ConnectionStatus::Error(err.to_string()));
                            break;
                        }
                        None => {
                            warn!(session_id = %id, "push subscription closed");
                            inner.status.send_replace(ConnectionStatus::Closed);
                            break;
                        }
                    }
                }
            }
            Ok(Err(err)) => {
                warn!(session_id = %id, error = %err, "subscribe attempt failed");
                inner.status.send_replace(ConnectionStatus::Error(err.to_string()));
            }
            Err(_) => {
                warn!(session_id = %id, "subscribe attempt timed out");
                inner
                    .status
                    .send_replace(ConnectionStatus::Error("subscribe timed out".into()));
            }
        }

        let Some(&delay) = inner.schedule.get(failures) else {
            warn!(session_id = %id, attempts = failures, "reconnect schedule exhausted; giving up");
            inner.status.send_replace(ConnectionStatus::Disconnected);
            return;
        };
        failures += 1;
        inner.status.send_replace(ConnectionStatus::Reconnecting {
            attempt: failures,
            delay,
        });
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use futures::{
        future::BoxFuture,
        stream::{self, StreamExt},
    };
    use serde_json::{Map, Value};
    use tokio::time::Instant;

    use super::*;
    use crate::{
        dto::session::{CreateSessionRequest, Writer},
        sync::{
            clock::ManualClock,
            error::RemoteError,
            remote::{RecordStream, RemoteResult},
        },
    };

    fn schedule() -> Vec<Duration> {
        [1, 2, 4, 8, 16].into_iter().map(Duration::from_secs).collect()
    }

    fn record() -> SessionRecord {
        SessionRecord {
            id: Uuid::nil(),
            session_code: "KOLO-1234".into(),
            host_id: "host".into(),
            is_active: true,
            game_state: Map::new(),
            created_at: 0,
            updated_at: 0,
        }
    }

    /// Remote whose subscribe calls follow a script; once the script runs out
    /// every call fails.
    struct ScriptedRemote {
        calls: StdMutex<Vec<Instant>>,
        script: StdMutex<Vec<Option<Vec<SessionRecord>>>>,
    }

    impl ScriptedRemote {
        fn new(script: Vec<Option<Vec<SessionRecord>>>) -> Arc<Self> {
            Arc::new(Self {
                calls: StdMutex::new(Vec::new()),
                script: StdMutex::new(script.into_iter().rev().collect()),
            })
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl SessionRemote for ScriptedRemote {
        fn insert(&self, _request: CreateSessionRequest) -> BoxFuture<'static, RemoteResult<SessionRecord>> {
            Box::pin(async { Err(RemoteError::Conflict) })
        }

        fn find_by_code(&self, _code: String) -> BoxFuture<'static, RemoteResult<Option<SessionRecord>>> {
            Box::pin(async { Ok(None) })
        }

        fn find_by_id(&self, _id: Uuid) -> BoxFuture<'static, RemoteResult<Option<SessionRecord>>> {
            Box::pin(async { Ok(None) })
        }

        fn update(
            &self,
            _id: Uuid,
            _writer: Writer,
            _patch: Map<String, Value>,
        ) -> BoxFuture<'static, RemoteResult<SessionRecord>> {
            Box::pin(async { Err(RemoteError::NotFound) })
        }

        fn deactivate(&self, _id: Uuid, _host_id: String) -> BoxFuture<'static, RemoteResult<SessionRecord>> {
            Box::pin(async { Err(RemoteError::NotFound) })
        }

        fn subscribe(&self, _id: Uuid) -> BoxFuture<'static, RemoteResult<RecordStream>> {
            self.calls.lock().unwrap().push(Instant::now());
            let step = self.script.lock().unwrap().pop().flatten();
            Box::pin(async move {
                match step {
                    Some(records) => Ok(stream::iter(records.into_iter().map(Ok)).boxed()),
                    None => Err(RemoteError::Transport("unreachable".into())),
                }
            })
        }
    }

    fn manager(remote: Arc<ScriptedRemote>) -> SubscriptionManager {
        SubscriptionManager::new(
            remote,
            Arc::new(ManualClock::new(7)),
            schedule(),
            Duration::from_secs(10),
        )
    }

    async fn wait_for_terminal(manager: &SubscriptionManager) {
        let mut status = manager.status();
        status
            .wait_for(ConnectionStatus::is_terminal)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_delays_follow_the_schedule_then_give_up() {
        let remote = ScriptedRemote::new(Vec::new());
        let manager = manager(remote.clone());

        manager.subscribe(Uuid::nil());
        wait_for_terminal(&manager).await;

        let calls = remote.calls();
        assert_eq!(calls.len(), 6);
        let delays: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(delays, schedule());

        sleep(Duration::from_secs(120)).await;
        assert_eq!(remote.calls().len(), 6);
        assert_eq!(manager.current_status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_subscription_resets_the_counter() {
        // fail, fail, connect then close, then fail forever
        let remote = ScriptedRemote::new(vec![None, None, Some(vec![record()])]);
        let manager = manager(remote.clone());

        manager.subscribe(Uuid::nil());
        wait_for_terminal(&manager).await;

        let calls = remote.calls();
        let delays: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        let mut expected = vec![Duration::from_secs(1), Duration::from_secs(2)];
        expected.extend(schedule());
        assert_eq!(delays, expected);

        let cached = manager.current().unwrap();
        assert_eq!(cached.record.session_code, "KOLO-1234");
        assert_eq!(cached.synced_at, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribing_replaces_the_previous_task() {
        let remote = ScriptedRemote::new(Vec::new());
        let manager = manager(remote.clone());

        manager.subscribe(Uuid::nil());
        tokio::task::yield_now().await;
        manager.subscribe(Uuid::nil());
        wait_for_terminal(&manager).await;

        // first task made one call before being aborted, second ran the full schedule
        assert_eq!(remote.calls().len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn switching_sessions_forgets_the_cached_record() {
        let remote = ScriptedRemote::new(vec![Some(vec![record()])]);
        let manager = manager(remote.clone());

        manager.subscribe(Uuid::nil());
        let mut records = manager.records();
        records.wait_for(Option::is_some).await.unwrap();

        // same session: the cache survives a resubscribe
        manager.subscribe(Uuid::nil());
        assert!(manager.current().is_some());

        manager.subscribe(Uuid::new_v4());
        assert!(manager.current().is_none());
    }
}
