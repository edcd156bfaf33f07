//! Daemon configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::poller::DEFAULT_POLL_INTERVAL;

/// Default token persistence file, relative to the working directory.
const DEFAULT_TOKEN_FILE: &str = "vmpanel-tokens.json";

/// Poller daemon configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Base URL of the backing API, e.g. `https://panel.example.com/api`.
    pub api_url: String,
    /// Delay between periodic status batches (default: 1 second).
    pub poll_interval: Duration,
    /// Where the access/refresh token pair is persisted.
    pub token_file: PathBuf,
    /// Credentials for a first login when no stored session exists.
    pub email: Option<String>,
    pub password: Option<String>,
}

impl PollerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                    | Required | Default                |
    /// |----------------------------|----------|------------------------|
    /// | `VMPANEL_API_URL`          | **yes**  | --                     |
    /// | `VMPANEL_POLL_INTERVAL_MS` | no       | `1000`                 |
    /// | `VMPANEL_TOKEN_FILE`       | no       | `vmpanel-tokens.json`  |
    /// | `VMPANEL_EMAIL`            | no       | --                     |
    /// | `VMPANEL_PASSWORD`         | no       | --                     |
    ///
    /// # Panics
    ///
    /// Panics if `VMPANEL_API_URL` is not set.
    pub fn from_env() -> Self {
        let api_url = std::env::var("VMPANEL_API_URL")
            .expect("VMPANEL_API_URL must be set in the environment");

        let poll_interval = std::env::var("VMPANEL_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL);

        let token_file = std::env::var("VMPANEL_TOKEN_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_TOKEN_FILE));

        let email = std::env::var("VMPANEL_EMAIL").ok();
        let password = std::env::var("VMPANEL_PASSWORD").ok();

        Self {
            api_url,
            poll_interval,
            token_file,
            email,
            password,
        }
    }
}
