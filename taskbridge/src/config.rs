//! Run configuration.
//!
//! Everything the core needs is threaded through an explicit
//! [`RunContext`] — there is no process-wide mode or session state.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Operating mode for a run. Selects the date-policy branch and the
/// endpoint/backing-store configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Posts into the test period and test backing store.
    Rehearsal,
    /// Posts as-is into the live system.
    Production,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Rehearsal => write!(f, "rehearsal"),
            Mode::Production => write!(f, "production"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Target URLs for one mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub login_url: String,
    pub form_url: String,
}

/// One backing-store connection option. Profiles are tried in order until
/// one answers; `url` is backend-specific (a file path for the SQLite
/// backend).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub name: String,
    pub url: String,
}

/// Cooperative-wait and settle intervals. All waits are bounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Upper bound on waiting for an element to appear.
    pub element_wait_ms: u64,
    /// Upper bound on waiting for the autocomplete suggestion list.
    pub suggestion_wait_ms: u64,
    /// Poll interval inside bounded waits.
    pub poll_interval_ms: u64,
    /// Fixed settle delay after submit, while the form resets itself.
    pub settle_after_submit_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            element_wait_ms: 15_000,
            suggestion_wait_ms: 4_000,
            poll_interval_ms: 250,
            settle_after_submit_ms: 2_000,
        }
    }
}

impl TimingConfig {
    pub fn element_wait(&self) -> Duration {
        Duration::from_millis(self.element_wait_ms)
    }
    pub fn suggestion_wait(&self) -> Duration {
        Duration::from_millis(self.suggestion_wait_ms)
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn settle_after_submit(&self) -> Duration {
        Duration::from_millis(self.settle_after_submit_ms)
    }
}

/// Explicit per-run context passed through every call.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub mode: Mode,
    pub endpoints: EndpointConfig,
    pub profiles: Vec<ConnectionProfile>,
    pub credentials: Credentials,
    pub ledger_path: PathBuf,
    pub timing: TimingConfig,
    pub retry: RetryPolicy,
}

/// Per-mode section of the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeConfig {
    pub endpoints: EndpointConfig,
    #[serde(default)]
    pub profiles: Vec<ConnectionProfile>,
}

/// On-disk configuration (JSON), one section per mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub webdriver_url: String,
    pub ledger_path: PathBuf,
    pub credentials: Credentials,
    pub rehearsal: ModeConfig,
    pub production: ModeConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

impl BridgeConfig {
    pub fn context(&self, mode: Mode) -> RunContext {
        let section = match mode {
            Mode::Rehearsal => &self.rehearsal,
            Mode::Production => &self.production,
        };
        RunContext {
            mode,
            endpoints: section.endpoints.clone(),
            profiles: section.profiles.clone(),
            credentials: self.credentials.clone(),
            ledger_path: self.ledger_path.clone(),
            timing: self.timing.clone(),
            retry: RetryPolicy::default(),
        }
    }
}
