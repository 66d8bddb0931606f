//! Deletes sessions nobody has written to for a while.

use std::time::{Duration, SystemTime};

use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{dao::session_store::SessionStore, error::ServiceError, state::SharedState};

/// Delete every session whose last write is older than `now - max_age`,
/// active or not. Returns the deleted ids.
pub async fn sweep(
    store: &dyn SessionStore,
    now: SystemTime,
    max_age: Duration,
) -> Result<Vec<Uuid>, ServiceError> {
    let Some(cutoff) = now.checked_sub(max_age) else {
        return Ok(Vec::new());
    };
    Ok(store.delete_stale(cutoff).await?)
}

/// Sweep on the configured interval for as long as the process runs.
///
/// Skips rounds while degraded; push channels of deleted sessions are closed.
pub async fn run(state: SharedState) {
    let max_age = state.config().gc_max_age;
    let mut ticker = interval(state.config().gc_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(store) = state.session_store().await else {
            debug!("session GC skipped (degraded mode)");
            continue;
        };
        match sweep(store.as_ref(), SystemTime::now(), max_age).await {
            Ok(deleted) if deleted.is_empty() => {}
            Ok(deleted) => {
                for id in &deleted {
                    state.hubs().remove(id);
                }
                info!(count = deleted.len(), "expired sessions deleted");
            }
            Err(err) => warn!(error = %err, "session GC failed"),
        }
    }
}
