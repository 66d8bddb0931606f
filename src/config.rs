//! Application-level configuration loading, including the sync protocol timings.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "PARTY_WHEEL_CONFIG_PATH";

const DEFAULT_CODE_PREFIX: &str = "KOLO";
const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:8080";

#[serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Prefix of generated session codes (`PREFIX-NNNN`).
    pub session_code_prefix: String,
    /// Base URL controllers open to join (`{base}/remote/{CODE}`).
    pub public_base_url: String,
    /// Sessions untouched for longer than this are garbage-collected.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "gc_max_age_secs")]
    pub gc_max_age: Duration,
    /// Delay between two garbage-collection sweeps.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "gc_interval_secs")]
    pub gc_interval: Duration,
    /// Capacity of each per-session push channel.
    pub push_capacity: usize,
    /// Device-side protocol timings.
    pub sync: SyncTimings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session_code_prefix: DEFAULT_CODE_PREFIX.into(),
            public_base_url: DEFAULT_PUBLIC_BASE_URL.into(),
            gc_max_age: Duration::from_secs(60 * 60),
            gc_interval: Duration::from_secs(60),
            push_capacity: 32,
            sync: SyncTimings::default(),
        }
    }
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to baked-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<AppConfig>(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        prefix = %config.session_code_prefix,
                        "loaded configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

/// Timing constants of the host/controller synchronization protocol.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncTimings {
    /// Host forces a sync this often to refresh its heartbeat.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "heartbeat_interval_ms")]
    pub heartbeat_interval: Duration,
    /// Host is considered offline once its heartbeat is older than this.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "liveness_threshold_ms")]
    pub liveness_threshold: Duration,
    /// How often controllers re-evaluate host liveness.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "liveness_check_interval_ms")]
    pub liveness_check_interval: Duration,
    /// How often controllers poll the record directly.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "poll_interval_ms")]
    pub poll_interval: Duration,
    /// Polled heartbeat ahead of the pushed one by more than this means the
    /// push channel went stale.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "poll_staleness_threshold_ms")]
    pub poll_staleness_threshold: Duration,
    /// Age after which controllers warn that the session will expire soon.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "expiry_warning_after_secs")]
    pub expiry_warning_after: Duration,
    /// Delays between reconnect attempts; exhausting it is terminal.
    #[serde_as(as = "Vec<DurationMilliSeconds<u64>>")]
    #[serde(rename = "reconnect_schedule_ms")]
    pub reconnect_schedule: Vec<Duration>,
    /// Upper bound for establishing one subscription.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "subscribe_timeout_ms")]
    pub subscribe_timeout: Duration,
    /// Total attempts for one command submission.
    pub command_attempts: u32,
    /// Linear backoff unit between command attempts (`base * attempt`).
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "command_retry_base_ms")]
    pub command_retry_base: Duration,
    /// A controller stops waiting for the host's answer after this long and
    /// gives its controls back.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "pending_timeout_ms")]
    pub pending_timeout: Duration,
    /// How long processed command timestamps are remembered by the host.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "processed_retention_ms")]
    pub processed_retention: Duration,
    /// Attempts to find a free session code at creation.
    pub create_code_attempts: u32,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            liveness_threshold: Duration::from_secs(10),
            liveness_check_interval: Duration::from_secs(2),
            poll_interval: Duration::from_secs(10),
            poll_staleness_threshold: Duration::from_secs(15),
            expiry_warning_after: Duration::from_secs(55 * 60),
            reconnect_schedule: [1, 2, 4, 8, 16]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
            subscribe_timeout: Duration::from_secs(10),
            command_attempts: 3,
            command_retry_base: Duration::from_millis(500),
            pending_timeout: Duration::from_secs(15),
            processed_retention: Duration::from_secs(60),
            create_code_attempts: 5,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let timings = SyncTimings::default();
        assert_eq!(timings.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(timings.liveness_threshold, Duration::from_secs(10));
        assert_eq!(
            timings.reconnect_schedule,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
            ]
        );
        assert_eq!(timings.command_attempts, 3);
        assert_eq!(timings.pending_timeout, Duration::from_secs(15));
        assert_eq!(AppConfig::default().gc_max_age, Duration::from_secs(3_600));
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let config: AppConfig = serde_json::from_str(
            r#"{
                "session_code_prefix": "WHEEL",
                "gc_max_age_secs": 120,
                "sync": { "reconnect_schedule_ms": [100, 200], "command_attempts": 5 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.session_code_prefix, "WHEEL");
        assert_eq!(config.gc_max_age, Duration::from_secs(120));
        assert_eq!(config.gc_interval, Duration::from_secs(60));
        assert_eq!(
            config.sync.reconnect_schedule,
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
        assert_eq!(config.sync.command_attempts, 5);
        assert_eq!(config.sync.poll_interval, Duration::from_secs(10));
    }
}
