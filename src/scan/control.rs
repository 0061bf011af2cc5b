//! Control plane for a running scan.
//!
//! Mutating operations are described by an explicit table pairing each
//! operation with its validator and its state change; the orchestrator
//! dispatches queued requests through the table at its suspension points.
//! A validator runs strictly before its apply function, so a rejected
//! request provably leaves state untouched. Reads are served from the
//! latest published snapshot and never wait on the scan loop.

use crate::scan::model::RepoSecurityResult;
use crate::scan::state::{ScanSnapshot, ScanState, ScanStatus, MAX_BATCH_SIZE, MIN_BATCH_SIZE};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Requests queued ahead of this depth block the sender until the
/// orchestrator reaches its next suspension point.
pub const CONTROL_QUEUE_DEPTH: usize = 32;

/// Rejection returned to a control-plane caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("batch size must be between {MIN_BATCH_SIZE} and {MAX_BATCH_SIZE}, got {0}")]
    BatchSizeOutOfRange(i64),
    #[error("scan is already {0}; settings can no longer change")]
    ScanFinished(ScanStatus),
    #[error("scan is no longer running")]
    ChannelClosed,
}

/// A mutating request delivered to the orchestrator.
#[derive(Debug)]
pub enum ControlRequest {
    Cancel { reason: String },
    Pause { duration_secs: u64 },
    UpdateBatchSize { size: i64, reply: oneshot::Sender<Result<String, ControlError>> },
}

impl ControlRequest {
    /// Operation name used for table lookup and log lines.
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::Cancel { .. } => "cancel",
            Self::Pause { .. } => "pause",
            Self::UpdateBatchSize { .. } => "update_batch_size",
        }
    }
}

/// One control-plane operation.
pub struct ControlOp {
    pub name: &'static str,
    pub validate: fn(&ScanState, &ControlRequest) -> Result<(), ControlError>,
    pub apply: fn(&mut ScanState, &ControlRequest) -> Option<String>,
}

/// Registry of every mutating control operation.
pub const CONTROL_OPS: &[ControlOp] = &[
    ControlOp { name: "cancel", validate: validate_always, apply: apply_cancel },
    ControlOp { name: "pause", validate: validate_always, apply: apply_pause },
    ControlOp {
        name: "update_batch_size",
        validate: validate_update_batch_size,
        apply: apply_update_batch_size,
    },
];

// Cancel and pause are idempotent flag writes; repeating them just
// overwrites the reason or duration.
fn validate_always(_state: &ScanState, _request: &ControlRequest) -> Result<(), ControlError> {
    Ok(())
}

fn validate_update_batch_size(
    state: &ScanState,
    request: &ControlRequest,
) -> Result<(), ControlError> {
    let ControlRequest::UpdateBatchSize { size, .. } = request else {
        return Ok(());
    };
    if state.status.is_terminal() {
        return Err(ControlError::ScanFinished(state.status));
    }
    if !(MIN_BATCH_SIZE as i64..=MAX_BATCH_SIZE as i64).contains(size) {
        return Err(ControlError::BatchSizeOutOfRange(*size));
    }
    Ok(())
}

fn apply_cancel(state: &mut ScanState, request: &ControlRequest) -> Option<String> {
    let ControlRequest::Cancel { reason } = request else {
        return None;
    };
    state.cancel_requested = true;
    state.cancel_reason = Some(reason.clone());
    info!("Cancellation requested: {reason}");
    None
}

fn apply_pause(state: &mut ScanState, request: &ControlRequest) -> Option<String> {
    let ControlRequest::Pause { duration_secs } = request else {
        return None;
    };
    state.pause_requested = true;
    state.pause_duration_secs = (*duration_secs).max(1);
    info!("Pause requested for {}s", state.pause_duration_secs);
    None
}

fn apply_update_batch_size(state: &mut ScanState, request: &ControlRequest) -> Option<String> {
    let ControlRequest::UpdateBatchSize { size, .. } = request else {
        return None;
    };
    let old = state.batch_size;
    state.batch_size = *size as usize;
    let confirmation = format!("Batch size updated from {old} to {size}");
    info!("{confirmation}");
    Some(confirmation)
}

/// Run one request through the operation table and answer its reply
/// channel if it carries one.
pub fn dispatch(state: &mut ScanState, request: ControlRequest) {
    let Some(op) = CONTROL_OPS.iter().find(|op| op.name == request.op_name()) else {
        warn!("No handler registered for control op '{}'", request.op_name());
        return;
    };
    let outcome = (op.validate)(state, &request).map(|()| (op.apply)(state, &request));
    match (request, outcome) {
        (ControlRequest::UpdateBatchSize { reply, .. }, Ok(confirmation)) => {
            let _ = reply.send(Ok(confirmation.unwrap_or_default()));
        }
        (ControlRequest::UpdateBatchSize { reply, .. }, Err(error)) => {
            debug!("Rejected update_batch_size: {error}");
            let _ = reply.send(Err(error));
        }
        (request, Err(error)) => warn!("Rejected {} request: {error}", request.op_name()),
        (_, Ok(_)) => {}
    }
}

/// Caller-side handle to a running scan.
///
/// Cloneable; every clone addresses the same scan, and the handle stays
/// valid across execution restarts because the channels outlive them.
#[derive(Clone)]
pub struct ScanHandle {
    control_tx: mpsc::Sender<ControlRequest>,
    snapshot_rx: watch::Receiver<ScanSnapshot>,
}

impl ScanHandle {
    pub(crate) fn new(
        control_tx: mpsc::Sender<ControlRequest>,
        snapshot_rx: watch::Receiver<ScanSnapshot>,
    ) -> Self {
        Self { control_tx, snapshot_rx }
    }

    /// Request cooperative cancellation. Fire-and-forget: the scan stops
    /// at the next batch boundary, so the in-flight batch still lands.
    /// Sending after the scan ended is a no-op.
    pub async fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.control_tx.send(ControlRequest::Cancel { reason }).await.is_err() {
            debug!("Cancel ignored; scan already finished");
        }
    }

    /// Request a pause of at least one second, taken at the next batch
    /// boundary.
    pub async fn pause(&self, duration_secs: u64) {
        if self
            .control_tx
            .send(ControlRequest::Pause { duration_secs })
            .await
            .is_err()
        {
            debug!("Pause ignored; scan already finished");
        }
    }

    /// Change the batch size for every batch dispatched after this call.
    /// The returned confirmation names the old and new sizes.
    pub async fn update_batch_size(&self, size: i64) -> Result<String, ControlError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control_tx
            .send(ControlRequest::UpdateBatchSize { size, reply: reply_tx })
            .await
            .map_err(|_| ControlError::ChannelClosed)?;
        reply_rx.await.map_err(|_| ControlError::ChannelClosed)?
    }

    /// Latest published scan state. Answers immediately even while a
    /// batch or pause timer is in flight.
    pub fn progress(&self) -> ScanState {
        self.snapshot_rx.borrow().state.clone()
    }

    /// Results recorded so far, in dispatch order.
    pub fn results_so_far(&self) -> Arc<Vec<RepoSecurityResult>> {
        Arc::clone(&self.snapshot_rx.borrow().results)
    }

    pub fn is_cancelled(&self) -> bool {
        self.snapshot_rx.borrow().state.cancel_requested
    }

    pub fn current_batch_size(&self) -> usize {
        self.snapshot_rx.borrow().state.batch_size
    }

    /// Wait for the next snapshot publication. Errors once the scan has
    /// ended and its final snapshot has been observed.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.snapshot_rx.changed().await
    }
}
