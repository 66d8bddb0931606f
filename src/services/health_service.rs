use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report storage health along with the number of watched sessions.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.session_store().await {
        Some(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "storage health check failed");
            }
        }
        None => warn!("storage unavailable (degraded mode)"),
    }

    let watched = state.hubs().watched();
    if state.is_degraded() {
        HealthResponse::degraded(watched)
    } else {
        HealthResponse::ok(watched)
    }
}
