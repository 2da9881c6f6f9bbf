//! Application-level configuration loading: timers, lock policy, storage and backend.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::services::session_lock::LockScope;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "MATCHPLAY_SYNC_CONFIG_PATH";
/// Environment variable that overrides the HTTP backend base URL.
const BACKEND_URL_ENV: &str = "SCORING_BACKEND_URL";
const DEFAULT_BACKEND_URL: &str = "http://localhost:3000/api";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Where scoring views come from.
pub enum BackendConfig {
    /// Remote scoring service reached over HTTP.
    Http { base_url: String },
    /// In-process service seeded with a demo match.
    Memory,
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Interval between background refetches of an open session's view.
    pub poll_interval: Duration,
    /// Age after which a lock record may be reclaimed.
    pub lock_stale_after: Duration,
    /// Heartbeat interval of the lock holder.
    pub lock_refresh: Duration,
    /// Interval of the lock record watch.
    pub lock_watch_interval: Duration,
    /// Refresh interval of cached leaderboards.
    pub leaderboard_poll: Duration,
    /// Upper bound for one backend call.
    pub submit_timeout: Duration,
    /// Interval of the backend health probe.
    pub connectivity_probe: Duration,
    /// How lock records are partitioned.
    pub lock_scope: LockScope,
    /// Directory of the local key/value store.
    pub data_dir: PathBuf,
    /// Scoring service implementation.
    pub backend: BackendConfig,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let mut config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(path = %path.display(), "loaded configuration");
                    app_config
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
        };

        if let Some(base_url) = env::var(BACKEND_URL_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
        {
            config.backend = BackendConfig::Http { base_url };
        }
        config
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RawBackend {
    Http { base_url: String },
    Memory,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    poll_interval_secs: u64,
    lock_stale_after_secs: u64,
    lock_refresh_secs: u64,
    lock_watch_interval_ms: u64,
    leaderboard_poll_secs: u64,
    submit_timeout_secs: u64,
    connectivity_probe_secs: u64,
    lock_scope: LockScope,
    data_dir: PathBuf,
    backend: RawBackend,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            lock_stale_after_secs: 120,
            lock_refresh_secs: 30,
            lock_watch_interval_ms: 1_000,
            leaderboard_poll_secs: 30,
            submit_timeout_secs: 10,
            connectivity_probe_secs: 5,
            lock_scope: LockScope::Global,
            data_dir: PathBuf::from("data"),
            backend: RawBackend::Http {
                base_url: DEFAULT_BACKEND_URL.into(),
            },
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let secs = |value: u64| Duration::from_secs(value.max(1));
        let lock_stale_after = secs(value.lock_stale_after_secs);
        let mut lock_refresh = secs(value.lock_refresh_secs);
        if lock_refresh >= lock_stale_after {
            let clamped = lock_stale_after / 3;
            warn!(
                refresh_secs = value.lock_refresh_secs,
                stale_after_secs = value.lock_stale_after_secs,
                clamped_ms = clamped.as_millis() as u64,
                "lock refresh must be shorter than the staleness window; clamping"
            );
            lock_refresh = clamped;
        }

        Self {
            poll_interval: secs(value.poll_interval_secs),
            lock_stale_after,
            lock_refresh,
            lock_watch_interval: Duration::from_millis(value.lock_watch_interval_ms.max(50)),
            leaderboard_poll: secs(value.leaderboard_poll_secs),
            submit_timeout: secs(value.submit_timeout_secs),
            connectivity_probe: secs(value.connectivity_probe_secs),
            lock_scope: value.lock_scope,
            data_dir: value.data_dir,
            backend: match value.backend {
                RawBackend::Http { base_url } => BackendConfig::Http { base_url },
                RawBackend::Memory => BackendConfig::Memory,
            },
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

    fn parse(json: &str) -> AppConfig {
        serde_json::from_str::<RawConfig>(json).unwrap().into()
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = parse(r#"{ "poll_interval_secs": 3, "backend": { "kind": "memory" } }"#);
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.lock_stale_after, Duration::from_secs(120));
        assert_eq!(config.lock_refresh, Duration::from_secs(30));
        assert_eq!(config.lock_scope, LockScope::Global);
        assert_eq!(config.backend, BackendConfig::Memory);
    }

    #[test]
    fn refresh_is_clamped_below_staleness() {
        let config = parse(r#"{ "lock_stale_after_secs": 60, "lock_refresh_secs": 90 }"#);
        assert_eq!(config.lock_refresh, Duration::from_secs(20));
    }

    #[test]
    fn per_match_scope_and_http_backend_parse() {
        let config = parse(
            r#"{ "lock_scope": "per_match", "backend": { "kind": "http", "base_url": "https://golf.example/api" } }"#,
        );
        assert_eq!(config.lock_scope, LockScope::PerMatch);
        assert_eq!(
            config.backend,
            BackendConfig::Http {
                base_url: "https://golf.example/api".into()
            }
        );
    }
}
