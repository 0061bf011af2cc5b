//! Remote security-check client.
//!
//! The orchestrator reaches the outside world through exactly two
//! operations behind [`SecurityClient`], so tests swap in the scripted
//! implementation from [`mock`] and never touch the network.

pub mod github;
pub mod mock;

use crate::scan::model::{RepoInfo, RepoSecurityResult};
use crate::scan::retry::Retryable;
use async_trait::async_trait;
use thiserror::Error;

pub use github::GithubClient;

/// Classified failure from the remote API.
///
/// `OrgNotFound` and `BadCredentials` are fatal: retrying cannot change
/// the answer, so they abort the scan. Everything else is transient and
/// subject to the retry policy.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("organization '{0}' not found or not accessible")]
    OrgNotFound(String),
    #[error("invalid or expired API token")]
    BadCredentials,
    #[error("API rate limit exceeded")]
    RateLimited,
    #[error("timeout while {0}")]
    Timeout(String),
    #[error("connection error while {0}")]
    Connection(String),
    #[error("unexpected status {status} from {endpoint}")]
    UnexpectedStatus { status: u16, endpoint: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl Retryable for ClientError {
    fn is_retryable(&self) -> bool {
        !matches!(self, Self::OrgNotFound(_) | Self::BadCredentials)
    }
}

/// Narrow interface to the remote security API.
#[async_trait]
pub trait SecurityClient: Send + Sync {
    /// Enumerate every repository in the organization, archived included.
    async fn fetch_org_repos(&self, org: &str) -> Result<Vec<RepoInfo>, ClientError>;

    /// Run the three security checks against one repository. Per-item
    /// problems (a repository deleted mid-scan, a feature the token
    /// cannot see) are recorded inside the result, not raised.
    async fn check_repo(&self, org: &str, repo: &str) -> Result<RepoSecurityResult, ClientError>;
}
