//! Ingestion run statistics and system readiness.
//!
//! One [`RunStats`] lives in a [`StatsTracker`]. The ingestion task is the only
//! writer; status queries take cheap snapshots at any time.

use std::path::Path;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{write_atomic, StoreError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    NotStarted,
    Running,
    Completed,
    Failed,
}

/// Outcome and progress of the latest ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub status: RunStatus,
    pub pages_processed: usize,
    pub journals_processed: usize,
    /// Notes that received an LLM summary chunk.
    pub enhanced_count: usize,
    pub errors: usize,
    /// Notes skipped because nothing relevant changed since they were indexed.
    #[serde(default)]
    pub unchanged: usize,
    #[serde(default)]
    pub chunks_indexed: usize,
    /// Notes dropped from the index because their file is gone.
    #[serde(default)]
    pub removed: usize,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    /// Fatal error of a failed run, or a non-fatal persistence problem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunStats {
    /// Fresh stats for a run starting at `now`.
    pub fn started(now: DateTime<Utc>) -> Self {
        Self {
            status: RunStatus::Running,
            start_time: Some(now),
            ..Self::default()
        }
    }

    pub fn finish(&mut self, status: RunStatus, now: DateTime<Utc>) {
        self.status = status;
        self.end_time = Some(now);
        self.duration_seconds = self
            .start_time
            .map(|start| (now - start).num_milliseconds() as f64 / 1000.0);
    }

    pub fn has_run(&self) -> bool {
        self.status != RunStatus::NotStarted
    }

    pub fn documents_processed(&self) -> usize {
        self.pages_processed + self.journals_processed
    }
}

/// Lock-guarded holder of the current [`RunStats`].
#[derive(Debug, Default)]
pub struct StatsTracker {
    current: RwLock<RunStats>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial(stats: RunStats) -> Self {
        Self {
            current: RwLock::new(stats),
        }
    }

    /// Copy of the current stats.
    pub fn snapshot(&self) -> RunStats {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Overwrite the stats with a fresh running record.
    pub fn begin(&self, now: DateTime<Utc>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = RunStats::started(now);
    }

    /// Apply an incremental change.
    pub fn update(&self, change: impl FnOnce(&mut RunStats)) {
        let mut stats = self.current.write().unwrap_or_else(PoisonError::into_inner);
        change(&mut stats);
    }
}

/// Restore the last persisted stats. A run that was still `running` when the
/// process died is reported as failed.
pub fn load_last_run(path: &Path) -> Option<RunStats> {
    let json = std::fs::read_to_string(path).ok()?;
    let mut stats: RunStats = match serde_json::from_str(&json) {
        Ok(stats) => stats,
        Err(e) => {
            tracing::warn!("ignoring unreadable run stats {}: {}", path.display(), e);
            return None;
        }
    };
    if stats.status == RunStatus::Running {
        stats.status = RunStatus::Failed;
        stats.error = Some("run was interrupted".to_string());
    }
    Some(stats)
}

pub async fn save_last_run(path: &Path, stats: &RunStats) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(stats)?;
    write_atomic(path, &json).await
}

/// Liveness of each collaborator, as shown on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ComponentStatus {
    pub parser: bool,
    pub llm: bool,
    pub vector_store: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SystemStatus {
    pub is_ready: bool,
    pub components: ComponentStatus,
}

impl From<ComponentStatus> for SystemStatus {
    fn from(components: ComponentStatus) -> Self {
        Self {
            is_ready: components.parser && components.llm && components.vector_store,
            components,
        }
    }
}
