//! Integration tests for the scan lifecycle
//!
//! These tests verify that:
//! 1. A full scan produces the expected report and counters
//! 2. Cancellation stops at a batch boundary and is reflected in the report
//! 3. Pausing suspends dispatch and resumes after the requested duration
//! 4. Batch size updates validate, apply live, and reject bad input
//! 5. Per-repository failures become error results without failing the scan
//! 6. A failed repository fetch fails the scan with no report

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use vigil::client::mock::{
    compliant_result, errored_result, partial_result, FailureKind, MockSecurityClient,
};
use vigil::client::SecurityClient;
use vigil::scan::checkpoint::CheckpointManager;
use vigil::scan::retry::RetryPolicy;
use vigil::scan::{ControlError, ScanOptions, ScanRunner, ScanStatus};

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        initial_interval: Duration::from_millis(1),
        backoff_multiplier: 2.0,
        max_interval: Duration::from_millis(4),
        max_attempts: 5,
    }
}

fn options(batch_size: usize) -> ScanOptions {
    ScanOptions { batch_size, continuation_threshold: 100_000, policy: fast_policy() }
}

/// The five-repository organization used throughout: two compliant, two
/// partially configured, one unreachable.
fn canonical_client() -> MockSecurityClient {
    MockSecurityClient::new()
        .repo(compliant_result("repo-a"))
        .repo(compliant_result("repo-b"))
        .repo(partial_result("repo-c"))
        .repo(partial_result("repo-d"))
        .repo(errored_result("repo-e", "Repository not found"))
}

fn runner_with(client: MockSecurityClient, dir: &TempDir, batch_size: usize) -> ScanRunner {
    ScanRunner::new(
        Arc::new(client),
        CheckpointManager::new(dir.path(), None),
        options(batch_size),
    )
}

#[tokio::test]
async fn full_scan_produces_canonical_report() -> Result<()> {
    let dir = TempDir::new()?;
    let runner = runner_with(canonical_client(), &dir, 2);
    let (handle, active) = runner.start("acme");

    let report = active.run().await?;

    assert_eq!(report.org, "acme");
    assert_eq!(report.total_repos, 5);
    assert_eq!(report.fully_compliant, 2);
    assert_eq!(report.compliance_rate, "40.0%");
    assert_eq!(report.secret_scanning_enabled, 4);
    assert_eq!(report.dependabot_enabled, 2);
    assert_eq!(report.code_scanning_enabled, 2);
    assert_eq!(report.errors, 1);
    assert_eq!(report.non_compliant_repos, vec!["repo-c", "repo-d"]);
    assert!(!report.cancelled);

    let state = handle.progress();
    assert_eq!(state.status, ScanStatus::Completed);
    assert_eq!(state.total_repos, 5);
    assert_eq!(state.scanned_repos, 4);
    assert_eq!(state.compliant_repos, 2);
    assert_eq!(state.non_compliant_repos, 2);
    assert_eq!(state.error_repos, 1);
    assert_eq!(state.scanned_repos, state.compliant_repos + state.non_compliant_repos);

    // Results are observable through the handle even after completion.
    let results = handle.results_so_far();
    assert_eq!(results.len(), 5);
    assert_eq!(results[0].repository, "repo-a");
    assert_eq!(results[4].repository, "repo-e");

    // A finished scan leaves no checkpoint behind.
    assert!(!CheckpointManager::new(dir.path(), None).exists("acme").await);
    Ok(())
}

#[tokio::test]
async fn empty_org_completes_with_not_applicable_rate() -> Result<()> {
    let dir = TempDir::new()?;
    let runner = runner_with(MockSecurityClient::new(), &dir, 10);
    let (handle, active) = runner.start("empty-org");

    let report = active.run().await?;
    assert_eq!(report.total_repos, 0);
    assert_eq!(report.compliance_rate, "N/A");
    assert_eq!(handle.progress().status, ScanStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn cancel_mid_scan_stops_at_batch_boundary() -> Result<()> {
    let dir = TempDir::new()?;
    let client = canonical_client().check_delay(Duration::from_millis(100));
    let runner = runner_with(client, &dir, 1);
    let (handle, active) = runner.start("acme");

    let scan = tokio::spawn(active.run());

    // Wait for the first result to land, then cancel.
    let mut watcher = handle.clone();
    while watcher.progress().processed_repos() < 1 {
        if watcher.changed().await.is_err() {
            break;
        }
    }
    handle.cancel("stop requested").await;

    let report = scan.await??;
    assert!(report.cancelled);
    assert_eq!(report.cancel_reason.as_deref(), Some("stop requested"));
    assert!(report.repos_scanned_before_cancel.is_some());
    // The in-flight batch landed; later batches were never dispatched.
    assert!(report.total_repos >= 1);
    assert!(report.total_repos < 5, "cancel should stop the scan early");

    let state = handle.progress();
    assert_eq!(state.status, ScanStatus::Cancelled);
    assert!(state.cancel_requested);
    assert_eq!(state.processed_repos(), report.total_repos);
    Ok(())
}

#[tokio::test]
async fn pause_suspends_then_resumes_to_completion() -> Result<()> {
    let dir = TempDir::new()?;
    let client = canonical_client().check_delay(Duration::from_millis(20));
    let runner = runner_with(client, &dir, 1);
    let (handle, active) = runner.start("acme");

    let start = Instant::now();
    let scan = tokio::spawn(active.run());
    // Queued before the first batch boundary, so the pause is taken early.
    handle.pause(1).await;

    let mut watcher = handle.clone();
    let mut saw_paused = false;
    loop {
        let state = watcher.progress();
        if state.status == ScanStatus::Paused {
            saw_paused = true;
            assert!(state.timer_active);
        }
        if state.status.is_terminal() {
            break;
        }
        if watcher.changed().await.is_err() {
            break;
        }
    }

    let report = scan.await??;
    assert!(saw_paused, "scan should pass through the paused state");
    assert!(start.elapsed() >= Duration::from_secs(1), "pause must hold at least one second");
    assert_eq!(report.total_repos, 5);
    assert!(!report.cancelled);

    let state = handle.progress();
    assert_eq!(state.status, ScanStatus::Completed);
    assert!(!state.timer_active);
    assert!(!state.pause_requested);
    Ok(())
}

#[tokio::test]
async fn batch_size_updates_apply_live_and_validate() -> Result<()> {
    let dir = TempDir::new()?;
    let client = canonical_client().check_delay(Duration::from_millis(30));
    let runner = runner_with(client, &dir, 1);
    let (handle, active) = runner.start("acme");

    let scan = tokio::spawn(active.run());

    let confirmation = handle.update_batch_size(3).await?;
    assert_eq!(confirmation, "Batch size updated from 1 to 3");

    let error = handle.update_batch_size(0).await.unwrap_err();
    assert_eq!(error, ControlError::BatchSizeOutOfRange(0));
    assert!(error.to_string().contains("between 1 and 50"));

    let error = handle.update_batch_size(99).await.unwrap_err();
    assert_eq!(error, ControlError::BatchSizeOutOfRange(99));

    let report = scan.await??;
    assert_eq!(report.total_repos, 5);
    // The accepted update stuck; the rejected ones never applied.
    assert_eq!(handle.progress().batch_size, 3);
    Ok(())
}

#[tokio::test]
async fn updates_after_completion_are_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    let runner = runner_with(canonical_client(), &dir, 5);
    let (handle, active) = runner.start("acme");
    active.run().await?;

    let error = handle.update_batch_size(5).await.unwrap_err();
    assert_eq!(error, ControlError::ChannelClosed);
    Ok(())
}

#[tokio::test]
async fn progress_snapshots_stay_internally_consistent() -> Result<()> {
    let dir = TempDir::new()?;
    let client = canonical_client().check_delay(Duration::from_millis(10));
    let runner = runner_with(client, &dir, 2);
    let (handle, active) = runner.start("acme");

    let scan = tokio::spawn(active.run());

    let mut watcher = handle.clone();
    loop {
        let state = watcher.progress();
        assert_eq!(
            state.scanned_repos,
            state.compliant_repos + state.non_compliant_repos,
            "scanned must equal compliant plus non-compliant in every snapshot"
        );
        if state.status == ScanStatus::Scanning || state.status.is_terminal() {
            assert!(state.processed_repos() <= state.total_repos);
        }
        // Results visible so far always match the processed counter.
        assert_eq!(watcher.results_so_far().len(), state.processed_repos());
        if state.status.is_terminal() {
            break;
        }
        if watcher.changed().await.is_err() {
            break;
        }
    }

    scan.await??;
    Ok(())
}

#[tokio::test]
async fn unreachable_repo_becomes_error_result_not_scan_failure() -> Result<()> {
    let dir = TempDir::new()?;
    let client = MockSecurityClient::new()
        .repo(compliant_result("repo-a"))
        .broken_repo("repo-b", FailureKind::Timeout)
        .repo(compliant_result("repo-c"));
    let mock = Arc::new(client);
    let runner = ScanRunner::new(
        Arc::clone(&mock) as Arc<dyn SecurityClient>,
        CheckpointManager::new(dir.path(), None),
        options(3),
    );
    let (handle, active) = runner.start("acme");

    let report = active.run().await?;
    assert_eq!(report.total_repos, 3);
    assert_eq!(report.fully_compliant, 2);
    assert_eq!(report.errors, 1);
    assert!(report.non_compliant_repos.is_empty(), "an unreachable repo is not a finding");
    // The whole attempt budget was spent before recording the error.
    assert_eq!(mock.calls_for("repo-b"), 5);

    let state = handle.progress();
    assert_eq!(state.error_repos, 1);
    assert_eq!(state.scanned_repos, 2);

    let results = handle.results_so_far();
    assert_eq!(results[1].repository, "repo-b");
    assert!(results[1].error.as_deref().is_some_and(|e| e.contains("timeout")));
    Ok(())
}

#[tokio::test]
async fn flaky_repo_recovers_through_retries() -> Result<()> {
    let dir = TempDir::new()?;
    let client = MockSecurityClient::new()
        .flaky_repo(compliant_result("repo-a"), 2, FailureKind::Connection)
        .repo(compliant_result("repo-b"));
    let mock = Arc::new(client);
    let runner = ScanRunner::new(
        Arc::clone(&mock) as Arc<dyn SecurityClient>,
        CheckpointManager::new(dir.path(), None),
        options(2),
    );
    let (_handle, active) = runner.start("acme");

    let report = active.run().await?;
    assert_eq!(report.fully_compliant, 2);
    assert_eq!(report.errors, 0);
    assert_eq!(mock.calls_for("repo-a"), 3);
    Ok(())
}

#[tokio::test]
async fn fatal_fetch_error_fails_the_scan() -> Result<()> {
    let dir = TempDir::new()?;
    let client = MockSecurityClient::new().fetch_fails(FailureKind::OrgNotFound);
    let runner = runner_with(client, &dir, 10);
    let (handle, active) = runner.start("ghost-org");

    let error = active.run().await.unwrap_err();
    assert!(format!("{error:#}").contains("not found"));
    assert_eq!(handle.progress().status, ScanStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn bad_credentials_fail_without_retry() -> Result<()> {
    let dir = TempDir::new()?;
    let client = MockSecurityClient::new()
        .repo(compliant_result("repo-a"))
        .fetch_fails(FailureKind::BadCredentials);
    let runner = runner_with(client, &dir, 10);
    let (handle, active) = runner.start("acme");

    let error = active.run().await.unwrap_err();
    assert!(format!("{error:#}").contains("token"));
    assert_eq!(handle.progress().status, ScanStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn transient_fetch_errors_are_retried() -> Result<()> {
    let dir = TempDir::new()?;
    let client = canonical_client().fetch_flaky(2, FailureKind::RateLimited);
    let runner = runner_with(client, &dir, 2);
    let (_handle, active) = runner.start("acme");

    let report = active.run().await?;
    assert_eq!(report.total_repos, 5);
    Ok(())
}
