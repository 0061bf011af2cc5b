//! Mutable scan state and the read-only snapshots published to observers.

use crate::scan::model::RepoSecurityResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Smallest batch size the control plane accepts.
pub const MIN_BATCH_SIZE: usize = 1;
/// Largest batch size the control plane accepts.
pub const MAX_BATCH_SIZE: usize = 50;
/// Batch size used when neither configuration nor caller supplies one.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Lifecycle of a scan.
///
/// `Starting` is the only entry state. `Completed`, `Cancelled`, and
/// `Failed` are terminal; once reached, no control request can change
/// scan settings again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Starting,
    Fetching,
    Scanning,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Fetching => "fetching",
            Self::Scanning => "scanning",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// All mutable data describing one scan.
///
/// The orchestrator loop is the single writer of the counters and
/// `status`. Control handlers touch only the request flags and the
/// validated `batch_size`; the loop reads the flags at batch boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanState {
    pub org: String,
    pub total_repos: usize,
    pub scanned_repos: usize,
    pub compliant_repos: usize,
    pub non_compliant_repos: usize,
    pub error_repos: usize,
    pub status: ScanStatus,
    pub batch_size: usize,
    pub cancel_requested: bool,
    pub cancel_reason: Option<String>,
    pub pause_requested: bool,
    pub pause_duration_secs: u64,
    pub timer_active: bool,
    pub continuation_count: u32,
}

impl ScanState {
    pub fn new(org: impl Into<String>, batch_size: usize) -> Self {
        Self {
            org: org.into(),
            total_repos: 0,
            scanned_repos: 0,
            compliant_repos: 0,
            non_compliant_repos: 0,
            error_repos: 0,
            status: ScanStatus::Starting,
            batch_size,
            cancel_requested: false,
            cancel_reason: None,
            pause_requested: false,
            pause_duration_secs: 0,
            timer_active: false,
            continuation_count: 0,
        }
    }

    /// Rebuild counters from results accumulated by earlier executions.
    pub fn restored(
        org: impl Into<String>,
        batch_size: usize,
        continuation_count: u32,
        total_repos: usize,
        results: &[RepoSecurityResult],
    ) -> Self {
        let mut state = Self::new(org, batch_size);
        state.status = ScanStatus::Scanning;
        state.total_repos = total_repos;
        state.continuation_count = continuation_count;
        for result in results {
            state.record_result(result);
        }
        state
    }

    /// Fold one check outcome into the counters.
    ///
    /// Error-carrying results increment only `error_repos`; they hold no
    /// compliance finding, so `scanned_repos` stays the sum of compliant
    /// and non-compliant.
    pub fn record_result(&mut self, result: &RepoSecurityResult) {
        if result.error.is_some() {
            self.error_repos += 1;
        } else {
            self.scanned_repos += 1;
            if result.is_fully_compliant() {
                self.compliant_repos += 1;
            } else {
                self.non_compliant_repos += 1;
            }
        }
    }

    /// Repositories with a recorded outcome, errors included.
    pub fn processed_repos(&self) -> usize {
        self.scanned_repos + self.error_repos
    }

    pub fn percent_complete(&self) -> f64 {
        if self.total_repos == 0 {
            0.0
        } else {
            self.processed_repos() as f64 / self.total_repos as f64 * 100.0
        }
    }
}

/// Point-in-time view of a scan, published over a watch channel after
/// every state transition and merged batch. Readers never wait on the
/// scan loop.
#[derive(Debug, Clone)]
pub struct ScanSnapshot {
    pub state: ScanState,
    pub results: Arc<Vec<RepoSecurityResult>>,
}

impl ScanSnapshot {
    pub fn initial(org: impl Into<String>, batch_size: usize) -> Self {
        Self {
            state: ScanState::new(org, batch_size),
            results: Arc::new(Vec::new()),
        }
    }
}
