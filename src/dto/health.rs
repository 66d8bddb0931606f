use serde::Serialize;
use utoipa::ToSchema;

/// Health payload returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Sessions that currently have at least one push subscriber.
    pub watched_sessions: usize,
}

impl HealthResponse {
    /// Storage reachable.
    pub fn ok(watched_sessions: usize) -> Self {
        Self {
            status: "ok".to_string(),
            watched_sessions,
        }
    }

    /// Running without a storage backend.
    pub fn degraded(watched_sessions: usize) -> Self {
        Self {
            status: "degraded".to_string(),
            watched_sessions,
        }
    }
}
