//! Command mailbox: controllers submit, the host drains each command once.

use std::{
    sync::atomic::{AtomicI64, Ordering},
    time::Duration,
};

use indexmap::IndexMap;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::session::Writer,
    sync::{
        client::SessionClient,
        clock::{SharedClock, millis},
        envelope::{Command, CommandResult, GameStatePatch, GameStateEnvelope},
        error::{RemoteError, SyncError, SyncResult},
    },
};

/// Controller side of the mailbox.
pub struct CommandSender {
    client: SessionClient,
    clock: SharedClock,
    attempts: u32,
    retry_base: Duration,
    last_timestamp: AtomicI64,
}

impl CommandSender {
    /// Sender trying each command at most `attempts` times.
    pub fn new(client: SessionClient, clock: SharedClock, attempts: u32, retry_base: Duration) -> Self {
        Self {
            client,
            clock,
            attempts: attempts.max(1),
            retry_base,
            last_timestamp: AtomicI64::new(i64::MIN),
        }
    }

    /// Next command identity: the current time, bumped past the previous one.
    fn next_timestamp(&self) -> i64 {
        let now = self.clock.now_millis();
        let previous = self
            .last_timestamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(i64::MIN);
        now.max(previous.saturating_add(1))
    }

    /// Drop `command` into the session mailbox, overwriting whatever is there.
    ///
    /// Every attempt re-reads the session first. Transport failures are retried
    /// with a linear backoff; a missing or ended session aborts at once. The
    /// same timestamp is reused across attempts so a write that landed despite
    /// a lost response cannot be applied twice.
    pub async fn submit(&self, session_id: Uuid, command: &Command) -> SyncResult<i64> {
        let timestamp = self.next_timestamp();
        let patch = GameStatePatch::mailbox(command, timestamp)?.into_map();
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            match self.deliver(session_id, patch.clone()).await {
                Ok(()) => {
                    info!(
                        session_id = %session_id,
                        command = command.kind(),
                        timestamp,
                        attempt,
                        "command submitted"
                    );
                    return Ok(timestamp);
                }
                Err(SyncError::Remote(err)) if err.is_transport() => {
                    warn!(
                        session_id = %session_id,
                        command = command.kind(),
                        attempt,
                        error = %err,
                        "command submission failed"
                    );
                    last_error = Some(err);
                    if attempt < self.attempts {
                        sleep(self.retry_base * attempt).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        Err(SyncError::RetriesExhausted {
            attempts: self.attempts,
            last: last_error.unwrap_or_else(|| RemoteError::Transport("not attempted".into())),
        })
    }

    async fn deliver(
        &self,
        session_id: Uuid,
        patch: serde_json::Map<String, serde_json::Value>,
    ) -> SyncResult<()> {
        let current = self
            .client
            .fetch_by_id(session_id)
            .await?
            .ok_or(SyncError::Remote(RemoteError::NotFound))?;
        if !current.is_active {
            return Err(RemoteError::SessionEnded.into());
        }
        self.client
            .update(session_id, Writer::Controller, patch)
            .await?;
        Ok(())
    }
}

/// Command taken out of the mailbox for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundCommand {
    /// Command identity, echoed in the result.
    pub timestamp: i64,
    /// `Err` carries the reason an unknown or malformed command was refused.
    pub command: Result<Command, String>,
}

/// Host side of the mailbox: remembers which command timestamps were handled.
#[derive(Debug)]
pub struct CommandProcessor {
    /// Command timestamp -> local time it was processed, oldest first.
    processed: IndexMap<i64, i64>,
    retention: i64,
}

impl CommandProcessor {
    /// Processor forgetting handled timestamps after `retention`.
    pub fn new(retention: Duration) -> Self {
        Self {
            processed: IndexMap::new(),
            retention: millis(retention),
        }
    }

    /// Whether `timestamp` was already dispatched.
    pub fn is_processed(&self, timestamp: i64) -> bool {
        self.processed.contains_key(&timestamp)
    }

    /// Timestamps currently remembered.
    pub fn processed_len(&self) -> usize {
        self.processed.len()
    }

    /// Take the mailbox command unless it is absent or already handled.
    ///
    /// The timestamp is marked processed before the command is returned, so
    /// redelivery of the same snapshot is a no-op.
    pub fn accept(&mut self, envelope: &GameStateEnvelope, now: i64) -> Option<InboundCommand> {
        self.prune(now, envelope.command_timestamp);

        let timestamp = envelope.command_timestamp?;
        if self.is_processed(timestamp) {
            debug!(timestamp, "command already processed");
            return None;
        }
        self.processed.insert(timestamp, now);

        let command = match envelope.command() {
            Some(Ok(command)) => Ok(command),
            Some(Err(err)) => Err(format!("unsupported command: {err}")),
            None => Err("command timestamp without a command".to_string()),
        };
        Some(InboundCommand { timestamp, command })
    }

    /// Forget entries older than the retention window, except the one still
    /// sitting in the mailbox.
    fn prune(&mut self, now: i64, in_mailbox: Option<i64>) {
        let retention = self.retention;
        self.processed.retain(|timestamp, processed_at| {
            Some(*timestamp) == in_mailbox || now.saturating_sub(*processed_at) <= retention
        });
    }
}

/// Controller-side correlation of results: only a result newer than every
/// one seen before is reported.
#[derive(Debug, Default, Clone)]
pub struct ResultTracker {
    newest: Option<i64>,
}

impl ResultTracker {
    /// Start from whatever result is already in the record so stale results
    /// are not replayed after joining.
    pub fn primed(existing: Option<&CommandResult>) -> Self {
        Self {
            newest: existing.map(|result| result.timestamp),
        }
    }

    /// The result if it is newer than any seen so far.
    pub fn observe(&mut self, result: Option<&CommandResult>) -> Option<CommandResult> {
        let result = result?;
        if self.newest.is_some_and(|newest| result.timestamp <= newest) {
            return None;
        }
        self.newest = Some(result.timestamp);
        Some(result.clone())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::sync::envelope::{CommandOutcome, OutcomeKind};

    fn envelope(command: Option<serde_json::Value>, timestamp: Option<i64>) -> GameStateEnvelope {
        GameStateEnvelope {
            pending_command: command,
            command_timestamp: timestamp,
            ..GameStateEnvelope::default()
        }
    }

    #[test]
    fn same_timestamp_is_processed_once() {
        let mut processor = CommandProcessor::new(Duration::from_secs(60));
        let snapshot = envelope(Some(json!({"type": "spin-wheel", "power": 70})), Some(100));

        let first = processor.accept(&snapshot, 1_000).unwrap();
        assert_eq!(first.command, Ok(Command::SpinWheel { power: 70 }));
        assert!(processor.accept(&snapshot, 1_001).is_none());
        assert!(processor.accept(&snapshot, 50_000).is_none());
    }

    #[test]
    fn empty_mailbox_is_ignored() {
        let mut processor = CommandProcessor::new(Duration::from_secs(60));
        assert!(processor.accept(&envelope(None, None), 0).is_none());
        assert_eq!(processor.processed_len(), 0);
    }

    #[test]
    fn old_entries_are_pruned_unless_still_in_the_mailbox() {
        let mut processor = CommandProcessor::new(Duration::from_secs(60));
        processor.accept(&envelope(Some(json!({"type": "toggle-sound"})), Some(1)), 0);
        processor.accept(&envelope(Some(json!({"type": "toggle-sound"})), Some(2)), 0);

        // 61 s later the mailbox still shows command 2
        assert!(processor.accept(&envelope(Some(json!({"type": "toggle-sound"})), Some(2)), 61_000).is_none());

        assert!(!processor.is_processed(1));
        assert!(processor.is_processed(2));
    }

    #[test]
    fn unknown_command_is_still_marked_processed() {
        let mut processor = CommandProcessor::new(Duration::from_secs(60));
        let snapshot = envelope(Some(json!({"type": "launch-confetti"})), Some(9));

        let inbound = processor.accept(&snapshot, 0).unwrap();

        assert!(inbound.command.is_err());
        assert!(processor.is_processed(9));
    }

    #[test]
    fn tracker_reports_only_newer_results() {
        let first = CommandOutcome::success("ok").stamp(10);
        let mut tracker = ResultTracker::primed(Some(&first));

        assert!(tracker.observe(Some(&first)).is_none());
        let newer = CommandOutcome::error("no").stamp(11);
        assert_eq!(
            tracker.observe(Some(&newer)).map(|r| r.kind),
            Some(OutcomeKind::Error)
        );
        assert!(tracker.observe(Some(&newer)).is_none());
        assert!(tracker.observe(None).is_none());
    }
}
