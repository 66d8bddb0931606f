//! Controller-side merge of local intent with host-confirmed state.
//!
//! Push updates are the primary source of confirmed state. Polling only
//! probes whether the push channel went stale. Both feed [`Reconciler::observe`].

use std::time::Duration;

use crate::{
    config::SyncTimings,
    dto::session::SessionRecord,
    sync::{
        clock::millis,
        command::ResultTracker,
        envelope::{Command, CommandResult, GameSnapshot, GameStateEnvelope},
        error::SyncResult,
        game::legality,
    },
};

/// Whether the host device still refreshes its heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    /// Heartbeat within the liveness threshold.
    Online,
    /// Heartbeat too old or missing.
    Offline,
}

/// Host is offline once its heartbeat is older than `threshold`, or when it
/// never sent one.
pub fn host_status(now: i64, heartbeat: Option<i64>, threshold: Duration) -> HostStatus {
    match heartbeat {
        Some(beat) if now.saturating_sub(beat) <= millis(threshold) => HostStatus::Online,
        _ => HostStatus::Offline,
    }
}

/// Something the controller UI should surface.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    /// Immediate local feedback for a command that is being sent.
    CommandSent(Command),
    /// The command never reached the session.
    CommandFailed(String),
    /// The host answered (the newest result seen so far).
    CommandResult(CommandResult),
    /// No answer came in time, or the host went offline while waiting; the
    /// controls are usable again.
    CommandUnanswered(Command),
    /// Host liveness changed.
    HostStatus(HostStatus),
    /// The session will be garbage-collected soon.
    SessionExpiring,
    /// The host ended the session.
    SessionEnded,
    /// Push channel gave up; the user has to reload.
    ConnectionLost,
    /// A fresh subscription replaced a stale one.
    Rejoined,
}

/// Detects a push channel that silently stopped delivering.
#[derive(Debug, Clone, Copy)]
pub struct StalenessProbe {
    threshold: i64,
}

impl StalenessProbe {
    /// Probe tolerating `threshold` of lag between poll and push.
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold: millis(threshold),
        }
    }

    /// Stale when the polled heartbeat is ahead of the push-observed one by
    /// more than the threshold.
    pub fn is_stale(&self, observed: Option<i64>, polled: Option<i64>) -> bool {
        match (observed, polled) {
            (Some(observed), Some(polled)) => polled.saturating_sub(observed) > self.threshold,
            (None, Some(_)) => true,
            _ => false,
        }
    }
}

/// Command sent from this controller and not yet answered.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingIntent {
    /// What was sent.
    pub command: Command,
    /// Set once the mailbox write went through.
    pub timestamp: Option<i64>,
    /// Local clock reading when the user triggered it.
    pub started_at: i64,
}

/// Local-only state: never written to the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalIntent {
    /// In-flight command, if any.
    pub pending: Option<PendingIntent>,
    /// Letter typed but not submitted.
    pub letter_input: String,
    /// Phrase typed but not submitted.
    pub phrase_input: String,
}

/// Last confirmed record and its decoded envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmed {
    /// Record as read from the provider.
    pub record: SessionRecord,
    /// Its decoded game state.
    pub envelope: GameStateEnvelope,
    /// Local clock reading when it was received.
    pub synced_at: i64,
}

/// A record seen by the controller, tagged with how it arrived.
pub enum Observation {
    /// Delivered by the push subscription.
    Push {
        /// The pushed record.
        record: SessionRecord,
        /// Local clock reading on arrival.
        synced_at: i64,
    },
    /// Fetched by the polling fallback.
    Poll {
        /// The fetched record.
        record: SessionRecord,
        /// Local clock reading when the fetch returned.
        polled_at: i64,
    },
}

/// What the UI layer has to do after an observation.
#[derive(Debug, Default, PartialEq)]
pub struct Reconciliation {
    /// Events to surface, in order.
    pub events: Vec<ViewEvent>,
    /// The push channel looks stale and should be re-established.
    pub rejoin: bool,
}

/// Controls a controller may offer, derived from confirmed state only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct Controls {
    pub spin: bool,
    pub letters: bool,
    pub place_token: bool,
    pub guess: bool,
    pub advance: bool,
    pub undo: bool,
    pub set_active_player: bool,
    pub toggles: bool,
    /// Letters already called this round, greyed out on the keyboard.
    pub used_letters: Vec<String>,
}

impl Controls {
    /// Everything is disabled while `busy`; otherwise each control follows
    /// the legality of its command.
    pub fn derive(snapshot: &GameSnapshot, busy: bool) -> Self {
        if busy {
            return Self {
                used_letters: snapshot.used_letters.clone(),
                ..Self::default()
            };
        }
        let allowed = |command: Command| legality(snapshot, &command).is_ok();
        Self {
            spin: allowed(Command::SpinWheel { power: 50 }),
            letters: snapshot.show_letter_selector,
            place_token: snapshot.is_placing_tokens,
            guess: allowed(Command::GuessPhrase { phrase: "?".into() }),
            advance: allowed(Command::AdvanceToNextPlayer),
            undo: allowed(Command::UndoLastStep),
            set_active_player: !snapshot.is_spinning,
            toggles: true,
            used_letters: snapshot.used_letters.clone(),
        }
    }
}

/// Controller state machine fed by push, poll and clock ticks.
pub struct Reconciler {
    confirmed: Confirmed,
    intent: LocalIntent,
    results: ResultTracker,
    probe: StalenessProbe,
    /// Newest heartbeat seen through push (or at join).
    observed_heartbeat: Option<i64>,
    host_status: Option<HostStatus>,
    expiry_warned: bool,
    ended_reported: bool,
}

impl Reconciler {
    /// Start from the record fetched at join time.
    pub fn new(record: SessionRecord, synced_at: i64, probe: StalenessProbe) -> SyncResult<Self> {
        let envelope = GameStateEnvelope::from_map(&record.game_state)?;
        Ok(Self {
            results: ResultTracker::primed(envelope.last_command_result.as_ref()),
            observed_heartbeat: envelope.host_heartbeat,
            confirmed: Confirmed {
                record,
                envelope,
                synced_at,
            },
            intent: LocalIntent::default(),
            probe,
            host_status: None,
            expiry_warned: false,
            ended_reported: false,
        })
    }

    /// Last confirmed record.
    pub fn confirmed(&self) -> &Confirmed {
        &self.confirmed
    }

    /// Local intent slice.
    pub fn intent(&self) -> &LocalIntent {
        &self.intent
    }

    /// Local intent slice, for input buffers.
    pub fn intent_mut(&mut self) -> &mut LocalIntent {
        &mut self.intent
    }

    /// Controls offered right now; none while a command is in flight or the
    /// session has ended.
    pub fn controls(&self) -> Controls {
        let busy = self.intent.pending.is_some() || !self.confirmed.record.is_active;
        Controls::derive(&self.confirmed.envelope.game, busy)
    }

    /// Fold one observed record into the view.
    pub fn observe(&mut self, observation: Observation) -> SyncResult<Reconciliation> {
        match observation {
            Observation::Push { record, synced_at } => self.apply_push(record, synced_at),
            Observation::Poll { record, polled_at } => self.apply_poll(record, polled_at),
        }
    }

    fn apply_push(&mut self, record: SessionRecord, synced_at: i64) -> SyncResult<Reconciliation> {
        let envelope = GameStateEnvelope::from_map(&record.game_state)?;
        let mut events = Vec::new();

        if let Some(result) = self.results.observe(envelope.last_command_result.as_ref()) {
            // Confirmed state wins: whatever we were waiting for is settled.
            self.intent.pending = None;
            events.push(ViewEvent::CommandResult(result));
        }
        if let Some(beat) = envelope.host_heartbeat {
            self.observed_heartbeat = Some(self.observed_heartbeat.map_or(beat, |seen| seen.max(beat)));
        }
        if !record.is_active {
            events.extend(self.report_ended());
        }

        self.confirmed = Confirmed {
            record,
            envelope,
            synced_at,
        };
        Ok(Reconciliation {
            events,
            rejoin: false,
        })
    }

    fn apply_poll(&mut self, record: SessionRecord, polled_at: i64) -> SyncResult<Reconciliation> {
        let envelope = GameStateEnvelope::from_map(&record.game_state)?;
        if !record.is_active {
            // push may be dead; the end must still reach the controls
            self.confirmed = Confirmed {
                record,
                envelope,
                synced_at: polled_at,
            };
            return Ok(Reconciliation {
                events: self.report_ended().into_iter().collect(),
                rejoin: false,
            });
        }
        Ok(Reconciliation {
            events: Vec::new(),
            rejoin: self
                .probe
                .is_stale(self.observed_heartbeat, envelope.host_heartbeat),
        })
    }

    /// Forget the push-observed heartbeat baseline after a re-join.
    pub fn rejoined(&mut self, record: SessionRecord, synced_at: i64) -> SyncResult<Reconciliation> {
        self.observed_heartbeat = None;
        let mut reconciliation = self.apply_push(record, synced_at)?;
        reconciliation.events.push(ViewEvent::Rejoined);
        Ok(reconciliation)
    }

    /// Periodic evaluation of host liveness, the pending command's wait and
    /// session expiry.
    pub fn tick(&mut self, now: i64, timings: &SyncTimings) -> Vec<ViewEvent> {
        let mut events = Vec::new();

        let status = host_status(
            now,
            self.confirmed.envelope.host_heartbeat,
            timings.liveness_threshold,
        );
        if self.host_status != Some(status) {
            self.host_status = Some(status);
            events.push(ViewEvent::HostStatus(status));
        }

        // an offline host cannot answer; neither can one that kept silent this long
        let overdue = self.intent.pending.as_ref().is_some_and(|pending| {
            now.saturating_sub(pending.started_at) > millis(timings.pending_timeout)
        });
        if status == HostStatus::Offline || overdue {
            events.extend(self.abandon_pending());
        }

        let age = now.saturating_sub(self.confirmed.record.created_at);
        if !self.expiry_warned && age > millis(timings.expiry_warning_after) {
            self.expiry_warned = true;
            events.push(ViewEvent::SessionExpiring);
        }
        events
    }

    /// Host status as of the last tick; `None` before the first one.
    pub fn host_status(&self) -> Option<HostStatus> {
        self.host_status
    }

    /// Mark a command as in flight; the returned event is the instant local
    /// feedback.
    pub fn begin(&mut self, command: Command, now: i64) -> ViewEvent {
        self.intent.pending = Some(PendingIntent {
            command: command.clone(),
            timestamp: None,
            started_at: now,
        });
        ViewEvent::CommandSent(command)
    }

    /// Record the timestamp the mailbox write went out with.
    pub fn sent(&mut self, timestamp: i64) {
        if let Some(pending) = self.intent.pending.as_mut() {
            pending.timestamp = Some(timestamp);
        }
    }

    /// The submission failed for good; controls come back at once.
    pub fn failed(&mut self, message: String) -> ViewEvent {
        self.intent.pending = None;
        ViewEvent::CommandFailed(message)
    }

    fn abandon_pending(&mut self) -> Option<ViewEvent> {
        let pending = self.intent.pending.take()?;
        Some(ViewEvent::CommandUnanswered(pending.command))
    }

    fn report_ended(&mut self) -> Option<ViewEvent> {
        if self.ended_reported {
            return None;
        }
        self.ended_reported = true;
        Some(ViewEvent::SessionEnded)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use uuid::Uuid;

    use super::*;
    use crate::sync::envelope::OutcomeKind;

    fn record(state: Value, created_at: i64) -> SessionRecord {
        let Value::Object(game_state) = state else {
            unreachable!()
        };
        SessionRecord {
            id: Uuid::nil(),
            session_code: "KOLO-4321".into(),
            host_id: "host".into(),
            is_active: true,
            game_state,
            created_at,
            updated_at: created_at,
        }
    }

    fn reconciler(state: Value) -> Reconciler {
        Reconciler::new(
            record(state, 0),
            0,
            StalenessProbe::new(Duration::from_secs(15)),
        )
        .unwrap()
    }

    #[test]
    fn liveness_threshold_is_exclusive() {
        let threshold = Duration::from_secs(10);
        assert_eq!(host_status(10_000, Some(0), threshold), HostStatus::Online);
        assert_eq!(host_status(10_001, Some(0), threshold), HostStatus::Offline);
        assert_eq!(host_status(0, None, threshold), HostStatus::Offline);
    }

    #[test]
    fn staleness_flags_heartbeats_far_ahead_of_push() {
        let probe = StalenessProbe::new(Duration::from_secs(15));
        assert!(!probe.is_stale(Some(1_000), Some(16_000)));
        assert!(probe.is_stale(Some(1_000), Some(16_001)));
        assert!(probe.is_stale(None, Some(5)));
        assert!(!probe.is_stale(Some(5), None));
    }

    #[test]
    fn result_settles_pending_intent() {
        let mut reconciler = reconciler(json!({"_hostHeartbeat": 0}));
        reconciler.begin(Command::SpinWheel { power: 70 }, 0);
        reconciler.sent(5);
        assert!(!reconciler.controls().spin);

        let outcome = reconciler
            .observe(Observation::Push {
                record: record(
                    json!({
                        "players": [{"id": "p1", "name": "Ana"}],
                        "puzzle": {"phrase": "KOLO"},
                        "isSpinning": true,
                        "_lastCommandResult": {"type": "success", "message": "spinning", "timestamp": 6}
                    }),
                    0,
                ),
                synced_at: 10,
            })
            .unwrap();

        assert!(matches!(
            outcome.events.as_slice(),
            [ViewEvent::CommandResult(CommandResult { kind: OutcomeKind::Success, .. })]
        ));
        assert!(reconciler.intent().pending.is_none());
        assert!(reconciler.confirmed().envelope.game.is_spinning);
        assert!(!reconciler.controls().spin);
    }

    #[test]
    fn result_present_at_join_is_not_replayed() {
        let mut reconciler = reconciler(json!({
            "_lastCommandResult": {"type": "error", "message": "old", "timestamp": 3}
        }));

        let outcome = reconciler
            .observe(Observation::Push {
                record: record(
                    json!({"_lastCommandResult": {"type": "error", "message": "old", "timestamp": 3}}),
                    0,
                ),
                synced_at: 1,
            })
            .unwrap();

        assert!(outcome.events.is_empty());
    }

    #[test]
    fn poll_requests_rejoin_only_when_push_lags() {
        let mut reconciler = reconciler(json!({"_hostHeartbeat": 1_000}));

        let fresh = reconciler
            .observe(Observation::Poll {
                record: record(json!({"_hostHeartbeat": 11_000}), 0),
                polled_at: 11_000,
            })
            .unwrap();
        assert!(!fresh.rejoin);

        let stale = reconciler
            .observe(Observation::Poll {
                record: record(json!({"_hostHeartbeat": 20_000}), 0),
                polled_at: 20_000,
            })
            .unwrap();
        assert!(stale.rejoin);
    }

    #[test]
    fn expiry_warning_fires_once_and_status_changes_are_reported() {
        let mut reconciler = reconciler(json!({"_hostHeartbeat": 0}));
        let timings = SyncTimings::default();

        assert_eq!(
            reconciler.tick(1_000, &timings),
            vec![ViewEvent::HostStatus(HostStatus::Online)]
        );
        assert!(reconciler.tick(2_000, &timings).is_empty());

        let late = 55 * 60 * 1_000 + 1;
        assert_eq!(
            reconciler.tick(late, &timings),
            vec![
                ViewEvent::HostStatus(HostStatus::Offline),
                ViewEvent::SessionExpiring
            ]
        );
        assert!(reconciler.tick(late + 2_000, &timings).is_empty());
    }

    #[test]
    fn unanswered_command_gives_the_controls_back() {
        let mut reconciler = reconciler(json!({"_hostHeartbeat": 0}));
        let timings = SyncTimings::default();
        reconciler.tick(0, &timings);
        reconciler.begin(Command::ToggleSound, 1_000);
        reconciler.sent(1_000);
        assert!(!reconciler.controls().toggles);

        // host still online (heartbeat refreshed by pushes) but silent
        let heartbeat = |at: i64| Observation::Push {
            record: record(json!({"_hostHeartbeat": at}), 0),
            synced_at: at,
        };
        reconciler.observe(heartbeat(15_000)).unwrap();
        assert!(reconciler.tick(16_000, &timings).is_empty());
        assert!(reconciler.intent().pending.is_some());

        reconciler.observe(heartbeat(16_000)).unwrap();
        assert_eq!(
            reconciler.tick(16_001, &timings),
            vec![ViewEvent::CommandUnanswered(Command::ToggleSound)]
        );
        assert!(reconciler.intent().pending.is_none());
        assert!(reconciler.controls().toggles);
    }

    #[test]
    fn offline_host_releases_a_pending_command() {
        let mut reconciler = reconciler(json!({"_hostHeartbeat": 0}));
        let timings = SyncTimings::default();
        reconciler.tick(0, &timings);
        reconciler.begin(Command::AdvanceToNextPlayer, 1_000);

        assert_eq!(
            reconciler.tick(10_001, &timings),
            vec![
                ViewEvent::HostStatus(HostStatus::Offline),
                ViewEvent::CommandUnanswered(Command::AdvanceToNextPlayer),
            ]
        );
        assert!(reconciler.controls().toggles);

        // commands sent while the host is still away are released on the next tick
        reconciler.begin(Command::ToggleEffects, 11_000);
        assert_eq!(
            reconciler.tick(12_000, &timings),
            vec![ViewEvent::CommandUnanswered(Command::ToggleEffects)]
        );
    }

    #[test]
    fn ended_session_is_reported_once_and_disables_controls() {
        let mut reconciler = reconciler(json!({}));
        let mut ended = record(json!({}), 0);
        ended.is_active = false;

        let first = reconciler
            .observe(Observation::Push {
                record: ended.clone(),
                synced_at: 1,
            })
            .unwrap();
        let second = reconciler
            .observe(Observation::Poll {
                record: ended,
                polled_at: 2,
            })
            .unwrap();

        assert_eq!(first.events, vec![ViewEvent::SessionEnded]);
        assert!(second.events.is_empty());
        assert!(!reconciler.controls().spin);
    }

    #[test]
    fn polled_end_disables_controls_without_push() {
        let mut reconciler = reconciler(json!({}));
        assert!(reconciler.controls().toggles);
        let mut ended = record(json!({}), 0);
        ended.is_active = false;

        let outcome = reconciler
            .observe(Observation::Poll {
                record: ended,
                polled_at: 9,
            })
            .unwrap();

        assert_eq!(outcome.events, vec![ViewEvent::SessionEnded]);
        assert!(!outcome.rejoin);
        assert!(!reconciler.confirmed().record.is_active);
        assert_eq!(reconciler.confirmed().synced_at, 9);
        assert_eq!(reconciler.controls(), Controls::default());
    }
}
