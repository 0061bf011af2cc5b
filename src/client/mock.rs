//! Scripted client for tests.
//!
//! Outcomes are declared up front and replayed deterministically:
//! results carry fixed timestamps, failures happen on the exact attempts
//! scripted for them, and call counts are observable afterwards. An
//! optional per-check delay keeps a scan in flight long enough for tests
//! to steer it through its control handle.

use super::{ClientError, SecurityClient};
use crate::scan::model::{RepoInfo, RepoSecurityResult, SecurityStatus};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Failure shape a script can produce. Mirrors the `ClientError`
/// variants that matter for retry classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Connection,
    RateLimited,
    OrgNotFound,
    BadCredentials,
}

impl FailureKind {
    fn to_error(self, context: &str) -> ClientError {
        match self {
            Self::Timeout => ClientError::Timeout(context.to_string()),
            Self::Connection => ClientError::Connection(context.to_string()),
            Self::RateLimited => ClientError::RateLimited,
            Self::OrgNotFound => ClientError::OrgNotFound(context.to_string()),
            Self::BadCredentials => ClientError::BadCredentials,
        }
    }
}

struct ScriptedCheck {
    failures_before_success: u32,
    failure_kind: FailureKind,
    result: RepoSecurityResult,
}

/// Deterministic in-memory [`SecurityClient`].
pub struct MockSecurityClient {
    repo_names: Vec<String>,
    checks: HashMap<String, ScriptedCheck>,
    check_delay: Option<Duration>,
    fetch_failures: AtomicU32,
    fetch_failure_kind: FailureKind,
    fetch_always_fails: bool,
    check_calls: AtomicUsize,
    attempts: Mutex<HashMap<String, u32>>,
}

impl Default for MockSecurityClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSecurityClient {
    pub fn new() -> Self {
        Self {
            repo_names: Vec::new(),
            checks: HashMap::new(),
            check_delay: None,
            fetch_failures: AtomicU32::new(0),
            fetch_failure_kind: FailureKind::Timeout,
            fetch_always_fails: false,
            check_calls: AtomicUsize::new(0),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Register a repository whose check succeeds with `result`.
    pub fn repo(mut self, result: RepoSecurityResult) -> Self {
        self.repo_names.push(result.repository.clone());
        self.checks.insert(
            result.repository.clone(),
            ScriptedCheck { failures_before_success: 0, failure_kind: FailureKind::Timeout, result },
        );
        self
    }

    /// Register a repository whose check fails `failures` times with
    /// `kind`, then succeeds with `result`.
    pub fn flaky_repo(mut self, result: RepoSecurityResult, failures: u32, kind: FailureKind) -> Self {
        self.repo_names.push(result.repository.clone());
        self.checks.insert(
            result.repository.clone(),
            ScriptedCheck { failures_before_success: failures, failure_kind: kind, result },
        );
        self
    }

    /// Register a repository whose check never succeeds.
    pub fn broken_repo(mut self, name: &str, kind: FailureKind) -> Self {
        self.repo_names.push(name.to_string());
        self.checks.insert(
            name.to_string(),
            ScriptedCheck {
                failures_before_success: u32::MAX,
                failure_kind: kind,
                result: RepoSecurityResult::new(name, fixed_time()),
            },
        );
        self
    }

    /// Make the repository fetch fail `failures` times before succeeding.
    pub fn fetch_flaky(self, failures: u32, kind: FailureKind) -> Self {
        self.fetch_failures.store(failures, Ordering::SeqCst);
        Self { fetch_failure_kind: kind, ..self }
    }

    /// Make every repository fetch fail with `kind`.
    pub fn fetch_fails(mut self, kind: FailureKind) -> Self {
        self.fetch_always_fails = true;
        self.fetch_failure_kind = kind;
        self
    }

    /// Hold each check open for `delay` before answering.
    pub fn check_delay(mut self, delay: Duration) -> Self {
        self.check_delay = Some(delay);
        self
    }

    /// Total number of `check_repo` calls observed, retries included.
    pub fn check_calls(&self) -> usize {
        self.check_calls.load(Ordering::SeqCst)
    }

    /// Number of `check_repo` calls observed for one repository.
    pub fn calls_for(&self, repo: &str) -> u32 {
        self.attempts.lock().unwrap().get(repo).copied().unwrap_or(0)
    }
}

#[async_trait]
impl SecurityClient for MockSecurityClient {
    async fn fetch_org_repos(&self, org: &str) -> Result<Vec<RepoInfo>, ClientError> {
        if self.fetch_always_fails {
            return Err(self.fetch_failure_kind.to_error(org));
        }
        let remaining = self.fetch_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fetch_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(self.fetch_failure_kind.to_error(org));
        }
        Ok(self
            .repo_names
            .iter()
            .map(|name| RepoInfo {
                name: name.clone(),
                full_name: format!("{org}/{name}"),
                private: false,
                archived: false,
            })
            .collect())
    }

    async fn check_repo(&self, _org: &str, repo: &str) -> Result<RepoSecurityResult, ClientError> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let entry = attempts.entry(repo.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        if let Some(delay) = self.check_delay {
            tokio::time::sleep(delay).await;
        }
        let Some(script) = self.checks.get(repo) else {
            return Err(ClientError::Malformed(format!("no scripted check for '{repo}'")));
        };
        if attempt <= script.failures_before_success {
            return Err(script.failure_kind.to_error(repo));
        }
        Ok(script.result.clone())
    }
}

/// Fixed timestamp shared by every scripted result, so equivalent scans
/// serialize identically.
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
}

/// A result with all three features enabled.
pub fn compliant_result(name: &str) -> RepoSecurityResult {
    let mut result = RepoSecurityResult::new(name, fixed_time());
    result.secret_scanning = SecurityStatus::Enabled;
    result.dependabot_alerts = SecurityStatus::Enabled;
    result.code_scanning = SecurityStatus::Enabled;
    result
}

/// A result with only secret scanning enabled.
pub fn partial_result(name: &str) -> RepoSecurityResult {
    let mut result = RepoSecurityResult::new(name, fixed_time());
    result.secret_scanning = SecurityStatus::Enabled;
    result.dependabot_alerts = SecurityStatus::Disabled;
    result.code_scanning = SecurityStatus::NotConfigured;
    result
}

/// A result recording a per-repository check error.
pub fn errored_result(name: &str, error: &str) -> RepoSecurityResult {
    RepoSecurityResult::failed(name, error, fixed_time())
}
