//! Authoritative side: mirrors local game state into the session record and
//! answers mailbox commands.

use std::sync::Arc;

use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::session::{SessionRecord, Writer},
    sync::{
        SyncContext,
        client::SessionClient,
        clock::SharedClock,
        command::{CommandProcessor, InboundCommand},
        envelope::{CommandOutcome, CommandResult, GameStateEnvelope, GameStatePatch},
        error::{RemoteError, SyncError, SyncResult},
        game::WheelGame,
        settings::SettingsContext,
        subscription::{SubscriptionManager, SyncedRecord},
    },
};

/// Outcome waiting for the next sync, keyed by the command it answers.
#[derive(Debug, Clone)]
struct PendingOutcome {
    command_timestamp: i64,
    outcome: CommandOutcome,
}

/// Owns the authoritative game and turns every change into a record write.
pub struct HostSynchronizer {
    session_id: Uuid,
    host_id: String,
    client: SessionClient,
    clock: SharedClock,
    settings: SettingsContext,
    game: WheelGame,
    processor: CommandProcessor,
    pending_outcome: Option<PendingOutcome>,
    /// Mailbox timestamp of the last remote snapshot seen.
    remote_mailbox: Option<i64>,
    last_result: Option<CommandResult>,
}

impl HostSynchronizer {
    /// Synchronizer for an existing record owned by `host_id`.
    pub fn new(
        ctx: &SyncContext,
        session_id: Uuid,
        host_id: impl Into<String>,
        game: WheelGame,
        settings: SettingsContext,
    ) -> Self {
        Self {
            session_id,
            host_id: host_id.into(),
            client: ctx.client(),
            clock: ctx.clock().clone(),
            settings,
            game,
            processor: CommandProcessor::new(ctx.timings().processed_retention),
            pending_outcome: None,
            remote_mailbox: None,
            last_result: None,
        }
    }

    /// Record being mirrored.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Authoritative game.
    pub fn game(&self) -> &WheelGame {
        &self.game
    }

    /// Settings commands toggle.
    pub fn settings(&self) -> &SettingsContext {
        &self.settings
    }

    /// Last result delivered to controllers.
    pub fn last_result(&self) -> Option<&CommandResult> {
        self.last_result.as_ref()
    }

    /// Handle one pushed record: process a new mailbox command, then sync.
    ///
    /// Returns the processed command, if there was one.
    pub async fn on_remote(&mut self, record: &SessionRecord) -> SyncResult<Option<InboundCommand>> {
        let envelope = GameStateEnvelope::from_map(&record.game_state)?;
        self.remote_mailbox = envelope.command_timestamp;

        let now = self.clock.now_millis();
        let Some(inbound) = self.processor.accept(&envelope, now) else {
            return Ok(None);
        };

        let outcome = match &inbound.command {
            Ok(command) => {
                let outcome = self.game.apply(command, &self.settings);
                info!(
                    session_id = %self.session_id,
                    command = command.kind(),
                    timestamp = inbound.timestamp,
                    success = outcome.is_success(),
                    "command processed"
                );
                outcome
            }
            Err(reason) => {
                warn!(session_id = %self.session_id, timestamp = inbound.timestamp, reason = %reason, "command refused");
                CommandOutcome::error(reason.clone())
            }
        };
        self.pending_outcome = Some(PendingOutcome {
            command_timestamp: inbound.timestamp,
            outcome,
        });

        self.sync().await?;
        Ok(Some(inbound))
    }

    /// Apply a host-side change and sync it.
    pub async fn mutate<F, R>(&mut self, change: F) -> SyncResult<R>
    where
        F: FnOnce(&mut WheelGame) -> R,
    {
        let result = change(&mut self.game);
        self.sync().await?;
        Ok(result)
    }

    /// Write the full host-owned state plus a fresh heartbeat.
    ///
    /// Mailbox keys are only written when delivering an outcome for the
    /// command still sitting in the mailbox; otherwise they are left out of
    /// the patch and survive the merge.
    pub async fn sync(&mut self) -> SyncResult<SessionRecord> {
        let now = self.clock.now_millis();
        let settings = self.settings.get();
        let mut patch =
            GameStatePatch::snapshot(&self.game.snapshot(), &settings, &self.game.dialogs())?
                .heartbeat(now);

        let mut delivered = None;
        if let Some(pending) = self.pending_outcome.clone() {
            let result = pending.outcome.stamp(now);
            patch = patch.result(&result)?;
            if self.mailbox_still_holds(pending.command_timestamp).await? {
                patch = patch.clear_mailbox();
            } else {
                debug!(session_id = %self.session_id, "newer command in mailbox; keeping it");
            }
            delivered = Some(result);
        }

        let record = self
            .client
            .update(
                self.session_id,
                Writer::Host(self.host_id.clone()),
                patch.into_map(),
            )
            .await?;

        // Only forget the outcome once it is stored.
        if let Some(result) = delivered {
            self.pending_outcome = None;
            self.last_result = Some(result);
        }
        Ok(record)
    }

    /// Re-read the mailbox right before clearing it to narrow the window in
    /// which a freshly submitted command could be wiped.
    async fn mailbox_still_holds(&mut self, command_timestamp: i64) -> SyncResult<bool> {
        if self.remote_mailbox != Some(command_timestamp) {
            return Ok(false);
        }
        let Some(current) = self.client.fetch_by_id(self.session_id).await? else {
            return Err(RemoteError::NotFound.into());
        };
        let envelope = GameStateEnvelope::from_map(&current.game_state)?;
        self.remote_mailbox = envelope.command_timestamp;
        Ok(envelope.command_timestamp == Some(command_timestamp))
    }
}

/// A running host: session record, push subscription and background loops.
pub struct HostSession {
    ctx: SyncContext,
    record: SessionRecord,
    host_id: String,
    synchronizer: Arc<Mutex<HostSynchronizer>>,
    subscription: SubscriptionManager,
    driver: JoinHandle<()>,
}

impl HostSession {
    /// Create a new session for `game` and start synchronizing.
    pub async fn start(
        ctx: SyncContext,
        host_id: &str,
        game: WheelGame,
        settings: SettingsContext,
    ) -> SyncResult<Self> {
        let initial = GameStatePatch::snapshot(&game.snapshot(), &settings.get(), &game.dialogs())?
            .heartbeat(ctx.clock().now_millis())
            .into_map();
        let record = ctx.client().create(host_id, initial).await?;
        Ok(Self::run(ctx, record, host_id, game, settings))
    }

    /// Take a session over again after a reload. Only the host that created
    /// it may do so; the game is rebuilt from the stored snapshot.
    pub async fn resume(ctx: SyncContext, host_id: &str, code: &str) -> SyncResult<Self> {
        let record = ctx.client().fetch(code).await?.ok_or(SyncError::NotFound)?;
        if record.host_id != host_id {
            return Err(SyncError::NotHost);
        }

        let envelope = GameStateEnvelope::from_map(&record.game_state)?;
        let game = WheelGame::from_snapshot(&envelope.game, envelope.dialogs);
        let settings = SettingsContext::new(envelope.settings);
        info!(session_id = %record.id, code = %record.session_code, "host resumed session");
        Ok(Self::run(ctx, record, host_id, game, settings))
    }

    fn run(
        ctx: SyncContext,
        record: SessionRecord,
        host_id: &str,
        game: WheelGame,
        settings: SettingsContext,
    ) -> Self {
        let synchronizer = Arc::new(Mutex::new(HostSynchronizer::new(
            &ctx, record.id, host_id, game, settings,
        )));
        let subscription = ctx.subscription();
        subscription.subscribe(record.id);

        let driver = tokio::spawn(drive(
            synchronizer.clone(),
            subscription.records(),
            ctx.timings().heartbeat_interval,
        ));

        Self {
            ctx,
            record,
            host_id: host_id.to_string(),
            synchronizer,
            subscription,
            driver,
        }
    }

    /// Record as it was when the session started.
    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    /// Code shown to players.
    pub fn session_code(&self) -> &str {
        &self.record.session_code
    }

    /// URL controllers open (and the QR code encodes).
    pub fn join_url(&self, base_url: &str) -> String {
        crate::sync::session_code::join_url(base_url, &self.record.session_code)
    }

    /// Push subscription feeding the driver loop.
    pub fn subscription(&self) -> &SubscriptionManager {
        &self.subscription
    }

    /// Run `f` against the synchronizer, e.g. to inspect the game.
    pub async fn with<R>(&self, f: impl FnOnce(&HostSynchronizer) -> R) -> R {
        let guard = self.synchronizer.lock().await;
        f(&guard)
    }

    /// Apply a host-side change (dialogs, landing a spin...) and sync it.
    pub async fn mutate<F, R>(&self, change: F) -> SyncResult<R>
    where
        F: FnOnce(&mut WheelGame) -> R,
    {
        self.synchronizer.lock().await.mutate(change).await
    }

    /// Force a sync now.
    pub async fn sync(&self) -> SyncResult<SessionRecord> {
        self.synchronizer.lock().await.sync().await
    }

    /// End the game: stop the loops and deactivate the session.
    pub async fn end_game(self) -> SyncResult<SessionRecord> {
        self.stop();
        self.ctx
            .client()
            .deactivate(self.record.id, &self.host_id)
            .await
    }

    /// End the current session and open a fresh one for `game`.
    pub async fn new_game(self, game: WheelGame) -> SyncResult<Self> {
        let ctx = self.ctx.clone();
        let host_id = self.host_id.clone();
        let settings = self.synchronizer.lock().await.settings().clone();
        self.end_game().await?;
        Self::start(ctx, &host_id, game, settings).await
    }

    fn stop(&self) {
        self.driver.abort();
        self.subscription.unsubscribe();
    }
}

impl Drop for HostSession {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

async fn drive(
    synchronizer: Arc<Mutex<HostSynchronizer>>,
    mut records: watch::Receiver<Option<SyncedRecord>>,
    heartbeat: std::time::Duration,
) {
    let mut ticker = interval(heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = records.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(synced) = records.borrow_and_update().clone() else {
                    continue;
                };
                let mut host = synchronizer.lock().await;
                if let Err(err) = host.on_remote(&synced.record).await {
                    report(&host, err);
                }
            }
            _ = ticker.tick() => {
                let mut host = synchronizer.lock().await;
                if let Err(err) = host.sync().await {
                    report(&host, err);
                }
            }
        }
    }
}

fn report(host: &HostSynchronizer, err: SyncError) {
    match err {
        SyncError::Remote(RemoteError::SessionEnded) => {
            info!(session_id = %host.session_id(), "session ended; host sync skipped")
        }
        err => warn!(session_id = %host.session_id(), error = %err, "host sync failed"),
    }
}
