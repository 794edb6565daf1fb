//! Exit status classification and connector connectivity states.
//!
//! A connector container reports its verdict through its process exit
//! status. [`RunOutcome::from_exit_status`] turns that number into a closed
//! outcome, and [`RunOutcome::connectivity_state`] decides what gets
//! written back to the resource store.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Run outcome
// ---------------------------------------------------------------------------

/// Classification of a finished container run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOutcome {
    /// Exit status `0`.
    Ok,
    /// Exit status `1`.
    Error,
    /// Any other exit status (signals, OOM kills, runtime-specific codes).
    Unknown,
}

impl RunOutcome {
    /// Map a raw process exit status to an outcome.
    ///
    /// Total: every `i64` maps to exactly one variant.
    pub fn from_exit_status(status: i64) -> Self {
        match status {
            0 => Self::Ok,
            1 => Self::Error,
            _ => Self::Unknown,
        }
    }

    /// Only [`RunOutcome::Ok`] counts as success. `Unknown` is never success.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Connectivity state persisted for this outcome.
    ///
    /// `Unknown` is handled exactly like `Error`.
    pub fn connectivity_state(self) -> ConnectorState {
        if self.is_success() {
            ConnectorState::Connected
        } else {
            ConnectorState::Error
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Error => "ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Connectivity state
// ---------------------------------------------------------------------------

/// Connectivity state of a connector as stored by the resource store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectorState {
    Disconnected,
    Connected,
    Error,
}

impl ConnectorState {
    /// Storage name (`STATE_CONNECTED`, ...).
    pub fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "STATE_DISCONNECTED",
            Self::Connected => "STATE_CONNECTED",
            Self::Error => "STATE_ERROR",
        }
    }

    /// Parse from the storage name.
    pub fn from_name(name: &str) -> Result<Self, CoreError> {
        match name {
            "STATE_DISCONNECTED" => Ok(Self::Disconnected),
            "STATE_CONNECTED" => Ok(Self::Connected),
            "STATE_ERROR" => Ok(Self::Error),
            other => Err(CoreError::Validation(format!(
                "Unknown connector state '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
