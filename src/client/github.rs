//! GitHub implementation of the security-check client.

use super::{ClientError, SecurityClient};
use crate::scan::model::{RepoInfo, RepoSecurityResult, SecurityStatus};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const REPOS_PER_PAGE: usize = 100;
const DEFAULT_ACCEPT: &str = "application/vnd.github+json";
/// The vulnerability-alerts endpoint still answers only to its preview
/// media type.
const DEPENDABOT_ACCEPT: &str = "application/vnd.github.dorian-preview+json";

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// reqwest-backed client. The token lives here and only here; it is sent
/// as a request header and never copied into results, snapshots, or
/// checkpoints.
pub struct GithubClient {
    http: Client,
    api_base: String,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(api_base: impl Into<String>, token: Option<String>) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("vigil/", env!("CARGO_PKG_VERSION")))
            .build()?;
        if token.is_none() {
            warn!("No API token configured; unauthenticated requests are heavily rate limited");
        }
        let api_base = api_base.into().trim_end_matches('/').to_string();
        Ok(Self { http, api_base, token })
    }

    async fn get(&self, url: &str, accept: &str, doing: &str) -> Result<Response, ClientError> {
        let mut request = self.http.get(url).header("Accept", accept);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("token {token}"));
        }
        request
            .send()
            .await
            .map_err(|error| classify_transport_error(error, doing))
    }
}

/// Map transport-level failures onto the retry taxonomy.
fn classify_transport_error(error: reqwest::Error, doing: &str) -> ClientError {
    if error.is_timeout() {
        ClientError::Timeout(doing.to_string())
    } else if error.is_connect() {
        ClientError::Connection(doing.to_string())
    } else {
        ClientError::Http(error)
    }
}

/// Secret scanning status from the repository settings payload. A missing
/// or null `security_and_analysis` block means the feature set is not
/// available to this token, which reads as disabled.
pub(crate) fn secret_scanning_status(repo_payload: &Value) -> SecurityStatus {
    repo_payload
        .pointer("/security_and_analysis/secret_scanning/status")
        .and_then(Value::as_str)
        .map(SecurityStatus::from_api)
        .unwrap_or(SecurityStatus::Disabled)
}

/// 204 means vulnerability alerts are enabled, 404 means disabled; the
/// endpoint has no other documented answers.
pub(crate) fn dependabot_status(status: StatusCode) -> SecurityStatus {
    match status.as_u16() {
        204 => SecurityStatus::Enabled,
        404 => SecurityStatus::Disabled,
        _ => SecurityStatus::Unknown,
    }
}

/// Code scanning needs Advanced Security; a 403 is a finding about the
/// repository (no access), not a fault to retry.
pub(crate) fn code_scanning_status(status: StatusCode) -> SecurityStatus {
    match status.as_u16() {
        200 => SecurityStatus::Enabled,
        404 => SecurityStatus::NotConfigured,
        403 => SecurityStatus::NoAccess,
        _ => SecurityStatus::Unknown,
    }
}

#[async_trait]
impl SecurityClient for GithubClient {
    async fn fetch_org_repos(&self, org: &str) -> Result<Vec<RepoInfo>, ClientError> {
        let doing = format!("fetching repositories for '{org}'");
        let mut repos = Vec::new();
        let mut page = 1usize;
        loop {
            let url = format!(
                "{}/orgs/{org}/repos?per_page={REPOS_PER_PAGE}&page={page}",
                self.api_base
            );
            debug!("Fetching repository page {page} for '{org}'");
            let response = self.get(&url, DEFAULT_ACCEPT, &doing).await?;
            let status = response.status().as_u16();
            match status {
                404 => return Err(ClientError::OrgNotFound(org.to_string())),
                401 => return Err(ClientError::BadCredentials),
                403 => {
                    let body = response
                        .text()
                        .await
                        .map_err(|error| classify_transport_error(error, &doing))?;
                    if body.to_lowercase().contains("rate limit") {
                        return Err(ClientError::RateLimited);
                    }
                    return Err(ClientError::UnexpectedStatus { status, endpoint: url });
                }
                200..=299 => {}
                _ => return Err(ClientError::UnexpectedStatus { status, endpoint: url }),
            }

            let payload: Vec<Value> = response
                .json()
                .await
                .map_err(|error| classify_transport_error(error, &doing))?;
            if payload.is_empty() {
                break;
            }
            let page_len = payload.len();
            for entry in &payload {
                let name = entry
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        ClientError::Malformed(format!("repository entry without name on page {page}"))
                    })?
                    .to_string();
                let full_name = entry
                    .get("full_name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{org}/{name}"));
                repos.push(RepoInfo {
                    name,
                    full_name,
                    private: entry.get("private").and_then(Value::as_bool).unwrap_or(false),
                    archived: entry.get("archived").and_then(Value::as_bool).unwrap_or(false),
                });
            }
            if page_len < REPOS_PER_PAGE {
                break;
            }
            page += 1;
        }
        info!("Found {} repositories in '{org}'", repos.len());
        Ok(repos)
    }

    async fn check_repo(&self, org: &str, repo: &str) -> Result<RepoSecurityResult, ClientError> {
        let doing = format!("checking '{org}/{repo}'");
        let mut result = RepoSecurityResult::new(repo, Utc::now());

        // Repository settings carry the secret scanning block.
        let url = format!("{}/repos/{org}/{repo}", self.api_base);
        let response = self.get(&url, DEFAULT_ACCEPT, &doing).await?;
        match response.status().as_u16() {
            200 => {
                let payload: Value = response
                    .json()
                    .await
                    .map_err(|error| classify_transport_error(error, &doing))?;
                result.secret_scanning = secret_scanning_status(&payload);
            }
            404 => {
                // Deleted or renamed between fetch and check. Recorded on
                // the result so the scan keeps going.
                result.error = Some("Repository not found".to_string());
                return Ok(result);
            }
            _ => {}
        }

        let url = format!("{}/repos/{org}/{repo}/vulnerability-alerts", self.api_base);
        let response = self.get(&url, DEPENDABOT_ACCEPT, &doing).await?;
        result.dependabot_alerts = dependabot_status(response.status());

        let url = format!("{}/repos/{org}/{repo}/code-scanning/alerts", self.api_base);
        let response = self.get(&url, DEFAULT_ACCEPT, &doing).await?;
        result.code_scanning = code_scanning_status(response.status());

        debug!(
            "Checked '{repo}': secret_scanning={}, dependabot={}, code_scanning={}",
            result.secret_scanning, result.dependabot_alerts, result.code_scanning
        );
        Ok(result)
    }
}
