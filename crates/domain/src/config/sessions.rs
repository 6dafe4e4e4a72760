use serde::{Deserialize, Serialize};

use super::ConfigError;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session registry lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// A session untouched for longer than this is destroyed by the sweeper.
    #[serde(default = "d_inactivity_threshold_ms")]
    pub inactivity_threshold_ms: u64,

    /// How often the background sweeper runs.
    #[serde(default = "d_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,

    /// Safety timeout for a dialogue state left dangling outside a turn.
    #[serde(default = "d_state_timeout_ms")]
    pub state_timeout_ms: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            inactivity_threshold_ms: d_inactivity_threshold_ms(),
            cleanup_interval_ms: d_cleanup_interval_ms(),
            state_timeout_ms: d_state_timeout_ms(),
        }
    }
}

impl SessionsConfig {
    pub(super) fn validate(&self, issues: &mut Vec<ConfigError>) {
        if self.cleanup_interval_ms == 0 {
            issues.push(ConfigError::error(
                "sessions.cleanup_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.inactivity_threshold_ms < self.cleanup_interval_ms {
            issues.push(ConfigError::warning(
                "sessions.inactivity_threshold_ms",
                "is below the cleanup interval — sessions may expire on their first sweep",
            ));
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_inactivity_threshold_ms() -> u64 {
    3_600_000
}
fn d_cleanup_interval_ms() -> u64 {
    300_000
}
fn d_state_timeout_ms() -> u64 {
    30_000
}
