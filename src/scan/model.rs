//! Domain types shared by the client, the orchestrator, and reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of one security feature on one repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityStatus {
    Enabled,
    Disabled,
    NotConfigured,
    NoAccess,
    Unknown,
}

impl SecurityStatus {
    /// Parse the status string GitHub reports for a feature. Anything
    /// unrecognized reads as unknown rather than failing the check.
    pub fn from_api(value: &str) -> Self {
        match value {
            "enabled" => Self::Enabled,
            "disabled" => Self::Disabled,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for SecurityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::NotConfigured => "not_configured",
            Self::NoAccess => "no_access",
            Self::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

/// A repository discovered by the fetch step. Archived repositories are
/// included; they still carry security settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub archived: bool,
}

/// Outcome of the three security checks against one repository.
///
/// `error` is set when the repository could not be checked at all (deleted
/// between fetch and check, or retries exhausted). Such a result carries
/// no compliance finding: all three statuses stay `Unknown` and the
/// repository is counted as an error, not as non-compliant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoSecurityResult {
    pub repository: String,
    pub secret_scanning: SecurityStatus,
    pub dependabot_alerts: SecurityStatus,
    pub code_scanning: SecurityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl RepoSecurityResult {
    /// A result with every status unknown, ready for the checks to fill in.
    pub fn new(repository: impl Into<String>, checked_at: DateTime<Utc>) -> Self {
        Self {
            repository: repository.into(),
            secret_scanning: SecurityStatus::Unknown,
            dependabot_alerts: SecurityStatus::Unknown,
            code_scanning: SecurityStatus::Unknown,
            error: None,
            checked_at,
        }
    }

    /// A result recording that the repository could not be checked.
    pub fn failed(
        repository: impl Into<String>,
        error: impl Into<String>,
        checked_at: DateTime<Utc>,
    ) -> Self {
        let mut result = Self::new(repository, checked_at);
        result.error = Some(error.into());
        result
    }

    /// Fully compliant means all three features are enabled. A disabled,
    /// unconfigured, inaccessible, or unknown feature fails the test.
    pub fn is_fully_compliant(&self) -> bool {
        self.secret_scanning == SecurityStatus::Enabled
            && self.dependabot_alerts == SecurityStatus::Enabled
            && self.code_scanning == SecurityStatus::Enabled
    }
}
