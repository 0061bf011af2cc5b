//! Scan supervision across executions.
//!
//! A logical scan may span several executions of the orchestrator loop:
//! each one runs until the scan finishes or the work meter trips, and the
//! runner re-seeds the next execution from the checkpoint the last one
//! handed back. The control channels live here, outside any single
//! execution, which is what keeps a [`ScanHandle`] valid across
//! continuations.

use crate::client::SecurityClient;
use crate::scan::checkpoint::{Checkpoint, CheckpointManager};
use crate::scan::control::{ControlRequest, ScanHandle, CONTROL_QUEUE_DEPTH};
use crate::scan::orchestrator::{Orchestrator, RunOutcome, DEFAULT_CONTINUATION_THRESHOLD};
use crate::scan::report::ScanReport;
use crate::scan::retry::RetryPolicy;
use crate::scan::state::{ScanSnapshot, ScanState, DEFAULT_BATCH_SIZE};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tunables for one scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub batch_size: usize,
    pub continuation_threshold: u32,
    pub policy: RetryPolicy,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            continuation_threshold: DEFAULT_CONTINUATION_THRESHOLD,
            policy: RetryPolicy::default(),
        }
    }
}

enum Seed {
    Fresh,
    Restored(Box<Checkpoint>),
}

/// Factory for scans against one client and checkpoint store.
pub struct ScanRunner {
    client: Arc<dyn SecurityClient>,
    checkpoints: CheckpointManager,
    options: ScanOptions,
}

impl ScanRunner {
    pub fn new(
        client: Arc<dyn SecurityClient>,
        checkpoints: CheckpointManager,
        options: ScanOptions,
    ) -> Self {
        Self { client, checkpoints, options }
    }

    /// Prepare a fresh scan. The handle steers and observes it; the
    /// returned [`ActiveScan`] must be driven with [`ActiveScan::run`].
    pub fn start(&self, org: &str) -> (ScanHandle, ActiveScan) {
        let initial = ScanSnapshot::initial(org, self.options.batch_size);
        self.assemble(org, initial, Seed::Fresh)
    }

    /// Re-open a persisted scan from its checkpoint.
    pub async fn resume(&self, org: &str) -> Result<(ScanHandle, ActiveScan)> {
        let checkpoint = self.checkpoints.load(org).await?;
        let state = ScanState::restored(
            org,
            checkpoint.batch_size,
            checkpoint.continuation_count,
            checkpoint.total_repos(),
            &checkpoint.results,
        );
        info!(
            "Resuming scan for '{org}' at {}/{} repositories",
            state.processed_repos(),
            state.total_repos
        );
        let initial = ScanSnapshot { state, results: Arc::new(checkpoint.results.clone()) };
        Ok(self.assemble(org, initial, Seed::Restored(Box::new(checkpoint))))
    }

    /// Whether a saved scan exists for the organization.
    pub async fn has_checkpoint(&self, org: &str) -> bool {
        self.checkpoints.exists(org).await
    }

    fn assemble(&self, org: &str, initial: ScanSnapshot, seed: Seed) -> (ScanHandle, ActiveScan) {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE_DEPTH);
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);
        let handle = ScanHandle::new(control_tx, snapshot_rx);
        let active = ActiveScan {
            org: org.to_string(),
            client: Arc::clone(&self.client),
            checkpoints: self.checkpoints.clone(),
            options: self.options.clone(),
            control_rx,
            snapshot_tx,
            seed,
        };
        (handle, active)
    }
}

/// A scan ready to run. Owns the channel endpoints every execution
/// borrows, so dropping it closes the control plane.
pub struct ActiveScan {
    org: String,
    client: Arc<dyn SecurityClient>,
    checkpoints: CheckpointManager,
    options: ScanOptions,
    control_rx: mpsc::Receiver<ControlRequest>,
    snapshot_tx: watch::Sender<ScanSnapshot>,
    seed: Seed,
}

impl ActiveScan {
    /// Drive the scan to its final report, chaining executions as the
    /// work meter demands. The checkpoint is removed once the report
    /// exists; a failed scan leaves its last checkpoint behind.
    pub async fn run(mut self) -> Result<ScanReport> {
        let mut seed = self.seed;
        loop {
            let execution_id = Uuid::new_v4();
            debug!("Starting execution {execution_id} for '{}'", self.org);
            let orchestrator = match seed {
                Seed::Fresh => Orchestrator::fresh(
                    Arc::clone(&self.client),
                    self.options.policy.clone(),
                    self.options.continuation_threshold,
                    &self.checkpoints,
                    &mut self.control_rx,
                    &self.snapshot_tx,
                    &self.org,
                    self.options.batch_size,
                ),
                Seed::Restored(checkpoint) => Orchestrator::restored(
                    Arc::clone(&self.client),
                    self.options.policy.clone(),
                    self.options.continuation_threshold,
                    &self.checkpoints,
                    &mut self.control_rx,
                    &self.snapshot_tx,
                    *checkpoint,
                ),
            };

            match orchestrator.run().await? {
                RunOutcome::Complete(report) => {
                    if let Err(error) = self.checkpoints.delete(&self.org).await {
                        warn!("Could not remove finished checkpoint: {error:#}");
                    }
                    return Ok(*report);
                }
                RunOutcome::Continue(checkpoint) => {
                    self.checkpoints
                        .save(&checkpoint)
                        .await
                        .context("Failed to persist continuation checkpoint")?;
                    info!(
                        "Execution {execution_id} handed off at offset {} (continuation #{})",
                        checkpoint.offset, checkpoint.continuation_count
                    );
                    seed = Seed::Restored(checkpoint);
                }
            }
        }
    }
}
