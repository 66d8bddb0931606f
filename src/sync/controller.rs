//! Controller device: observes a joined session and sends commands to its host.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval, interval_at},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::session::SessionRecord,
    sync::{
        SyncContext,
        client::SessionClient,
        command::CommandSender,
        envelope::Command,
        error::{SyncError, SyncResult},
        reconcile::{
            Confirmed, Controls, HostStatus, LocalIntent, Observation, Reconciler, StalenessProbe,
            ViewEvent,
        },
        subscription::{ConnectionStatus, SubscriptionManager, SyncedRecord},
    },
};

const EVENT_CAPACITY: usize = 64;

struct ViewInner {
    ctx: SyncContext,
    client: SessionClient,
    session_id: Uuid,
    reconciler: Mutex<Reconciler>,
    events: broadcast::Sender<ViewEvent>,
    sender: CommandSender,
    subscription: SubscriptionManager,
}

impl ViewInner {
    fn reconciler(&self) -> MutexGuard<'_, Reconciler> {
        self.reconciler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ViewEvent) {
        debug!(session_id = %self.session_id, event = ?event, "controller event");
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn emit_all(&self, events: Vec<ViewEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    /// Fetch the record again and replace the push subscription.
    async fn rejoin(&self) -> SyncResult<()> {
        let record = self
            .client
            .fetch_by_id(self.session_id)
            .await?
            .ok_or(SyncError::NotFound)?;
        let active = record.is_active;
        let reconciliation = self
            .reconciler()
            .rejoined(record, self.ctx.clock().now_millis())?;
        if active {
            self.subscription.subscribe(self.session_id);
        }
        info!(session_id = %self.session_id, "controller re-joined");
        self.emit_all(reconciliation.events);
        Ok(())
    }
}

/// A joined controller: confirmed session state plus local intent.
pub struct ControllerView {
    inner: Arc<ViewInner>,
    tasks: Vec<JoinHandle<()>>,
}

impl ControllerView {
    /// Join the session behind a typed or scanned code.
    ///
    /// Malformed codes fail before any request; ended sessions read as not
    /// found.
    pub async fn join(ctx: SyncContext, code: &str) -> SyncResult<Self> {
        let code = ctx
            .codec()
            .parse(code)
            .ok_or_else(|| SyncError::InvalidCode(code.trim().to_string()))?;
        let client = ctx.client();
        let record = client.fetch(&code).await?.ok_or(SyncError::NotFound)?;
        info!(session_id = %record.id, code = %code, "controller joined");
        Self::attach(ctx, client, record)
    }

    fn attach(ctx: SyncContext, client: SessionClient, record: SessionRecord) -> SyncResult<Self> {
        let timings = ctx.timings().clone();
        let session_id = record.id;
        let probe = StalenessProbe::new(timings.poll_staleness_threshold);
        let reconciler = Reconciler::new(record, ctx.clock().now_millis(), probe)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let sender = CommandSender::new(
            client.clone(),
            ctx.clock().clone(),
            timings.command_attempts,
            timings.command_retry_base,
        );
        let subscription = ctx.subscription();
        subscription.subscribe(session_id);

        let inner = Arc::new(ViewInner {
            ctx,
            client,
            session_id,
            reconciler: Mutex::new(reconciler),
            events,
            sender,
            subscription,
        });

        let tasks = vec![
            tokio::spawn(pump(inner.clone(), inner.subscription.records())),
            tokio::spawn(liveness(inner.clone())),
            tokio::spawn(poll(inner.clone())),
            tokio::spawn(watch_connection(inner.clone(), inner.subscription.status())),
        ];

        Ok(Self { inner, tasks })
    }

    /// Id of the joined session.
    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    /// Subscribe to UI events emitted from now on.
    pub fn events(&self) -> broadcast::Receiver<ViewEvent> {
        self.inner.events.subscribe()
    }

    /// Send `command` to the host.
    ///
    /// Emits [`ViewEvent::CommandSent`] at once; the host's answer arrives
    /// later as [`ViewEvent::CommandResult`], or [`ViewEvent::CommandUnanswered`]
    /// once the wait is given up.
    pub async fn submit(&self, command: Command) -> SyncResult<i64> {
        if self.inner.subscription.current_status().is_terminal() {
            return Err(SyncError::Disconnected);
        }
        let now = self.inner.ctx.clock().now_millis();
        let sent = self.inner.reconciler().begin(command.clone(), now);
        self.inner.emit(sent);

        match self.inner.sender.submit(self.inner.session_id, &command).await {
            Ok(timestamp) => {
                self.inner.reconciler().sent(timestamp);
                Ok(timestamp)
            }
            Err(err) => {
                let failed = self.inner.reconciler().failed(err.to_string());
                self.inner.emit(failed);
                Err(err)
            }
        }
    }

    /// Manual re-join, the way out of [`ConnectionStatus::Disconnected`].
    pub async fn refresh(&self) -> SyncResult<()> {
        self.inner.rejoin().await
    }

    /// Snapshot of the confirmed slice.
    pub fn confirmed(&self) -> Confirmed {
        self.inner.reconciler().confirmed().clone()
    }

    /// Controls to offer right now.
    pub fn controls(&self) -> Controls {
        self.inner.reconciler().controls()
    }

    /// Host liveness as of the last check.
    pub fn host_status(&self) -> Option<HostStatus> {
        self.inner.reconciler().host_status()
    }

    /// Snapshot of the local intent slice.
    pub fn intent(&self) -> LocalIntent {
        self.inner.reconciler().intent().clone()
    }

    /// Edit local-only input buffers (letter and phrase fields).
    pub fn edit_intent(&self, edit: impl FnOnce(&mut LocalIntent)) {
        edit(self.inner.reconciler().intent_mut());
    }

    /// Push channel status.
    pub fn connection(&self) -> ConnectionStatus {
        self.inner.subscription.current_status()
    }

    /// Stop every background task and the subscription.
    pub fn leave(self) {
        info!(session_id = %self.inner.session_id, "controller left");
        // Drop does the rest.
    }
}

impl Drop for ControllerView {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        self.inner.subscription.unsubscribe();
    }
}

async fn pump(inner: Arc<ViewInner>, mut records: watch::Receiver<Option<SyncedRecord>>) {
    while records.changed().await.is_ok() {
        let Some(synced) = records.borrow_and_update().clone() else {
            continue;
        };
        let observed = inner.reconciler().observe(Observation::Push {
            record: synced.record,
            synced_at: synced.synced_at,
        });
        match observed {
            Ok(reconciliation) => inner.emit_all(reconciliation.events),
            Err(err) => warn!(session_id = %inner.session_id, error = %err, "pushed record ignored"),
        }
    }
}

async fn liveness(inner: Arc<ViewInner>) {
    let timings = inner.ctx.timings().clone();
    let mut ticker = interval(timings.liveness_check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let now = inner.ctx.clock().now_millis();
        let events = inner.reconciler().tick(now, &timings);
        inner.emit_all(events);
    }
}

async fn poll(inner: Arc<ViewInner>) {
    let period = inner.ctx.timings().poll_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let record = match inner.client.fetch_by_id(inner.session_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(session_id = %inner.session_id, "poll found no session");
                continue;
            }
            Err(err) => {
                debug!(session_id = %inner.session_id, error = %err, "poll failed");
                continue;
            }
        };

        let polled_at = inner.ctx.clock().now_millis();
        let observed = inner
            .reconciler()
            .observe(Observation::Poll { record, polled_at });
        match observed {
            Ok(reconciliation) => {
                inner.emit_all(reconciliation.events);
                if reconciliation.rejoin {
                    warn!(session_id = %inner.session_id, "push channel looks stale; re-joining");
                    if let Err(err) = inner.rejoin().await {
                        warn!(session_id = %inner.session_id, error = %err, "re-join failed");
                    }
                }
            }
            Err(err) => warn!(session_id = %inner.session_id, error = %err, "polled record ignored"),
        }
    }
}

async fn watch_connection(inner: Arc<ViewInner>, mut status: watch::Receiver<ConnectionStatus>) {
    loop {
        if status.wait_for(ConnectionStatus::is_terminal).await.is_err() {
            return;
        }
        warn!(session_id = %inner.session_id, "controller lost its connection");
        inner.emit(ViewEvent::ConnectionLost);
        // Wait for a manual re-join before reporting again.
        if status.wait_for(|status| !status.is_terminal()).await.is_err() {
            return;
        }
    }
}
