//! The scan state machine.
//!
//! One [`Orchestrator`] value drives one execution of a scan. Every
//! decision comes from [`next_action`], a pure function of scan state,
//! remaining work, and the work meter, so a decision sequence is
//! reproducible from the same inputs; the clock, the network, and the
//! control queue are consulted only at the edges. While suspended (a
//! batch in flight or a pause timer pending) the orchestrator keeps
//! servicing control requests, but applies their flags only at batch
//! boundaries: an in-flight batch always lands whole.

use crate::client::SecurityClient;
use crate::scan::checkpoint::{Checkpoint, CheckpointManager, CheckpointPhase, CHECKPOINT_VERSION};
use crate::scan::control::{dispatch, ControlRequest};
use crate::scan::executor::run_batch;
use crate::scan::model::{RepoInfo, RepoSecurityResult};
use crate::scan::report::{finalize_report, generate_report, ScanReport};
use crate::scan::retry::{execute_with_retry, RetryPolicy};
use crate::scan::state::{ScanSnapshot, ScanState, ScanStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Work-unit cost of one substrate call. A fetch, a dispatched check, or
/// a timer each records a schedule event and a completion event.
pub const WORK_UNITS_PER_CALL: u32 = 2;

/// Work units an execution may accumulate before it must hand off to a
/// fresh one.
pub const DEFAULT_CONTINUATION_THRESHOLD: u32 = 500;

/// What the loop does next. Precedence is fixed: finishing beats
/// cancellation beats pausing beats continuation beats dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Finish,
    Cancel,
    Pause { duration_secs: u64 },
    ContinueAsNew,
    Dispatch { count: usize },
}

/// Decide the next step. Pure: no clock, no randomness, no I/O.
///
/// An exhausted repository list finishes the scan even when a cancel
/// flag is set; the flag still reaches the report. The work-meter
/// comparison is strict, so a scan sitting exactly at the threshold
/// dispatches one more batch before continuing as new.
pub fn next_action(state: &ScanState, remaining: usize, work_units: u32, threshold: u32) -> Action {
    if remaining == 0 {
        return Action::Finish;
    }
    if state.cancel_requested {
        return Action::Cancel;
    }
    if state.pause_requested {
        return Action::Pause { duration_secs: state.pause_duration_secs.max(1) };
    }
    if work_units > threshold {
        return Action::ContinueAsNew;
    }
    Action::Dispatch { count: state.batch_size.min(remaining) }
}

/// Outcome of one execution.
pub enum RunOutcome {
    /// The scan reached a terminal state; the finalized report is attached.
    Complete(Box<ScanReport>),
    /// The work-unit threshold was crossed; seed a successor execution
    /// from this checkpoint.
    Continue(Box<Checkpoint>),
}

/// One execution of a scan: owns the scan state, borrows the channels
/// and checkpoint store that outlive it.
pub struct Orchestrator<'a> {
    client: Arc<dyn SecurityClient>,
    policy: RetryPolicy,
    continuation_threshold: u32,
    checkpoints: &'a CheckpointManager,
    control_rx: &'a mut mpsc::Receiver<ControlRequest>,
    snapshot_tx: &'a watch::Sender<ScanSnapshot>,
    state: ScanState,
    results: Vec<RepoSecurityResult>,
    remaining: VecDeque<RepoInfo>,
    offset: usize,
    work_units: u32,
    resume_pause: Option<DateTime<Utc>>,
}

impl<'a> Orchestrator<'a> {
    /// An execution that will fetch its repository list first.
    #[allow(clippy::too_many_arguments)]
    pub fn fresh(
        client: Arc<dyn SecurityClient>,
        policy: RetryPolicy,
        continuation_threshold: u32,
        checkpoints: &'a CheckpointManager,
        control_rx: &'a mut mpsc::Receiver<ControlRequest>,
        snapshot_tx: &'a watch::Sender<ScanSnapshot>,
        org: &str,
        batch_size: usize,
    ) -> Self {
        Self {
            client,
            policy,
            continuation_threshold,
            checkpoints,
            control_rx,
            snapshot_tx,
            state: ScanState::new(org, batch_size),
            results: Vec::new(),
            remaining: VecDeque::new(),
            offset: 0,
            work_units: 0,
            resume_pause: None,
        }
    }

    /// An execution seeded from a checkpoint. Counters fold back out of
    /// the persisted results; the work meter starts fresh.
    #[allow(clippy::too_many_arguments)]
    pub fn restored(
        client: Arc<dyn SecurityClient>,
        policy: RetryPolicy,
        continuation_threshold: u32,
        checkpoints: &'a CheckpointManager,
        control_rx: &'a mut mpsc::Receiver<ControlRequest>,
        snapshot_tx: &'a watch::Sender<ScanSnapshot>,
        checkpoint: Checkpoint,
    ) -> Self {
        let state = ScanState::restored(
            &checkpoint.org,
            checkpoint.batch_size,
            checkpoint.continuation_count,
            checkpoint.total_repos(),
            &checkpoint.results,
        );
        let resume_pause = match checkpoint.phase {
            CheckpointPhase::Paused { resume_at } => Some(resume_at),
            CheckpointPhase::Scanning => None,
        };
        Self {
            client,
            policy,
            continuation_threshold,
            checkpoints,
            control_rx,
            snapshot_tx,
            state,
            results: checkpoint.results,
            remaining: checkpoint.remaining.into(),
            offset: checkpoint.offset,
            work_units: 0,
            resume_pause,
        }
    }

    /// Drive this execution until the scan finishes or must continue as
    /// a new execution.
    pub async fn run(mut self) -> Result<RunOutcome> {
        if self.state.status == ScanStatus::Starting {
            if let Err(error) = self.fetch().await {
                self.state.status = ScanStatus::Failed;
                self.publish();
                self.drain_control();
                self.publish();
                return Err(error);
            }
        }

        // A restored pause finishes its timer before any new decision.
        if let Some(resume_at) = self.resume_pause.take() {
            self.pause_until(resume_at).await?;
        }

        loop {
            let action = next_action(
                &self.state,
                self.remaining.len(),
                self.work_units,
                self.continuation_threshold,
            );
            match action {
                Action::Finish => break,
                Action::Cancel => {
                    info!(
                        "Scan cancelled at {}/{} repositories",
                        self.state.processed_repos(),
                        self.state.total_repos
                    );
                    self.state.status = ScanStatus::Cancelled;
                    break;
                }
                Action::Pause { duration_secs } => {
                    let resume_at = Utc::now() + chrono::Duration::seconds(duration_secs as i64);
                    self.pause_until(resume_at).await?;
                    self.work_units += WORK_UNITS_PER_CALL;
                }
                Action::ContinueAsNew => {
                    info!(
                        "Work meter at {} (threshold {}); continuing as a new execution at offset {}",
                        self.work_units, self.continuation_threshold, self.offset
                    );
                    return Ok(RunOutcome::Continue(Box::new(self.into_checkpoint())));
                }
                Action::Dispatch { count } => self.dispatch_batch(count).await?,
            }
        }

        if self.state.status != ScanStatus::Cancelled {
            self.state.status = ScanStatus::Completed;
        }
        self.publish();
        // Every queued request gets an answer before the report exists:
        // a late cancel still marks it, a late update gets its rejection.
        self.drain_control();
        self.publish();

        let report = finalize_report(generate_report(&self.state.org, &self.results), &self.state);
        info!(
            "Scan for '{}' {}: {}/{} fully compliant, {} errors",
            self.state.org,
            self.state.status,
            report.fully_compliant,
            report.total_repos,
            report.errors
        );
        Ok(RunOutcome::Complete(Box::new(report)))
    }

    /// Enumerate the organization's repositories, retrying transient
    /// failures, while keeping the control queue serviced.
    async fn fetch(&mut self) -> Result<()> {
        self.state.status = ScanStatus::Fetching;
        self.publish();
        info!("Fetching repository list for '{}'", self.state.org);

        let client = Arc::clone(&self.client);
        let policy = self.policy.clone();
        let org = self.state.org.clone();
        let fetch_future = async move {
            execute_with_retry(&policy, &format!("repository fetch for '{org}'"), || {
                client.fetch_org_repos(&org)
            })
            .await
        };
        tokio::pin!(fetch_future);

        let fetched = loop {
            tokio::select! {
                outcome = &mut fetch_future => break outcome,
                maybe = self.control_rx.recv() => match maybe {
                    Some(request) => self.apply_control(request),
                    None => break fetch_future.as_mut().await,
                },
            }
        };
        let repos = fetched
            .with_context(|| format!("Repository fetch for '{}' failed", self.state.org))?;

        self.work_units += WORK_UNITS_PER_CALL;
        self.state.total_repos = repos.len();
        self.remaining = repos.into();
        self.state.status = ScanStatus::Scanning;
        self.publish();
        Ok(())
    }

    /// Run one batch to completion and merge its results. The merge is
    /// the only place counters move, and the checkpoint written here
    /// makes the batch durable before the next decision.
    async fn dispatch_batch(&mut self, count: usize) -> Result<()> {
        let batch: Vec<RepoInfo> = self.remaining.drain(..count).collect();
        let client = Arc::clone(&self.client);
        let policy = self.policy.clone();
        let org = self.state.org.clone();
        let batch_future = async move { run_batch(&client, &policy, &org, &batch).await };
        tokio::pin!(batch_future);

        let outcomes = loop {
            tokio::select! {
                outcomes = &mut batch_future => break outcomes,
                maybe = self.control_rx.recv() => match maybe {
                    Some(request) => self.apply_control(request),
                    None => break batch_future.as_mut().await,
                },
            }
        };

        let merged = outcomes.len();
        for result in &outcomes {
            self.state.record_result(result);
        }
        self.results.extend(outcomes);
        self.offset += merged;
        self.work_units += WORK_UNITS_PER_CALL * merged as u32;
        debug!(
            "Merged batch of {merged}; {}/{} repositories processed",
            self.state.processed_repos(),
            self.state.total_repos
        );

        self.persist(CheckpointPhase::Scanning).await?;
        self.publish();
        Ok(())
    }

    /// Sleep out a pause deadline, durably. The deadline is persisted
    /// before sleeping, so a process killed mid-pause resumes with the
    /// remainder of the same timer rather than a fresh one.
    async fn pause_until(&mut self, resume_at: DateTime<Utc>) -> Result<()> {
        let remaining = (resume_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        self.state.status = ScanStatus::Paused;
        self.state.timer_active = true;
        self.publish();
        self.persist(CheckpointPhase::Paused { resume_at }).await?;
        info!("Paused; resuming at {resume_at} ({remaining:?} from now)");

        let timer = tokio::time::sleep(remaining);
        tokio::pin!(timer);
        loop {
            tokio::select! {
                _ = &mut timer => break,
                maybe = self.control_rx.recv() => match maybe {
                    Some(request) => self.apply_control(request),
                    None => {
                        timer.as_mut().await;
                        break;
                    }
                },
            }
        }

        self.state.timer_active = false;
        self.state.pause_requested = false;
        self.state.status = ScanStatus::Scanning;
        self.publish();
        info!("Pause complete; scan resuming");
        Ok(())
    }

    fn apply_control(&mut self, request: ControlRequest) {
        dispatch(&mut self.state, request);
        self.publish();
    }

    /// Answer everything still queued. Runs synchronously; anything
    /// arriving later finds the channel closed.
    fn drain_control(&mut self) {
        while let Ok(request) = self.control_rx.try_recv() {
            dispatch(&mut self.state, request);
        }
    }

    fn publish(&self) {
        let snapshot = ScanSnapshot {
            state: self.state.clone(),
            results: Arc::new(self.results.clone()),
        };
        let _ = self.snapshot_tx.send(snapshot);
    }

    async fn persist(&self, phase: CheckpointPhase) -> Result<()> {
        let checkpoint = Checkpoint {
            version: CHECKPOINT_VERSION,
            org: self.state.org.clone(),
            results: self.results.clone(),
            remaining: self.remaining.iter().cloned().collect(),
            offset: self.offset,
            batch_size: self.state.batch_size,
            continuation_count: self.state.continuation_count,
            phase,
            saved_at: Utc::now(),
        };
        self.checkpoints.save(&checkpoint).await
    }

    /// Package the execution for its successor. The batch size and
    /// continuation count carry over; the successor's work meter starts
    /// at zero.
    fn into_checkpoint(self) -> Checkpoint {
        Checkpoint {
            version: CHECKPOINT_VERSION,
            org: self.state.org.clone(),
            results: self.results,
            remaining: self.remaining.into_iter().collect(),
            offset: self.offset,
            batch_size: self.state.batch_size,
            continuation_count: self.state.continuation_count + 1,
            phase: CheckpointPhase::Scanning,
            saved_at: Utc::now(),
        }
    }
}
