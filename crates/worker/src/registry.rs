//! Latest status of each submitted run, keyed by container name.
//!
//! Runs are fire-and-forget from the trigger's point of view, so the
//! worker records where each one ended up. Terminal entries are dropped by
//! the eviction tick once they are older than the retention period;
//! running entries are kept until they finish.

use std::time::{Duration, Instant};

use connector_core::run::OperationKind;
use dashmap::DashMap;
use serde::Serialize;

use crate::error::WorkflowError;
use crate::workflow::RunReport;

/// Where a run stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Running {
        operation: OperationKind,
    },
    Completed {
        report: RunReport,
    },
    Failed {
        operation: OperationKind,
        kind: &'static str,
        error: String,
    },
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running { .. })
    }
}

#[derive(Debug)]
struct Entry {
    status: RunStatus,
    updated_at: Instant,
}

/// Concurrent map of container name to [`RunStatus`].
#[derive(Debug, Default)]
pub struct RunRegistry {
    entries: DashMap<String, Entry>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn put(&self, name: &str, status: RunStatus) {
        self.entries.insert(
            name.to_string(),
            Entry {
                status,
                updated_at: Instant::now(),
            },
        );
    }

    /// Record that a run for `name` was spawned.
    pub fn started(&self, name: &str, operation: OperationKind) {
        self.put(name, RunStatus::Running { operation });
    }

    /// Record the terminal result of a run.
    pub fn finish(
        &self,
        name: &str,
        operation: OperationKind,
        result: &Result<RunReport, WorkflowError>,
    ) {
        let status = match result {
            Ok(report) => RunStatus::Completed {
                report: report.clone(),
            },
            Err(e) => RunStatus::Failed {
                operation,
                kind: e.kind(),
                error: e.to_string(),
            },
        };
        self.put(name, status);
    }

    /// Record a run whose task panicked.
    pub fn panicked(&self, name: &str, operation: OperationKind) {
        self.put(
            name,
            RunStatus::Failed {
                operation,
                kind: "Panic",
                error: "Run task panicked".to_string(),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<RunStatus> {
        self.entries.get(name).map(|entry| entry.status.clone())
    }

    /// Drop terminal entries last updated more than `retention` ago.
    /// Returns how many were dropped.
    pub fn evict_older_than(&self, retention: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            !entry.status.is_terminal() || entry.updated_at.elapsed() < retention
        });
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
