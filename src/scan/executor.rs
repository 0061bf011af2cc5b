//! Batch fan-out with per-item fault isolation.

use crate::client::SecurityClient;
use crate::scan::model::{RepoInfo, RepoSecurityResult};
use crate::scan::retry::{execute_with_retry, RetryPolicy};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

/// Run one batch of security checks concurrently.
///
/// Every repository resolves to exactly one result, in input order. An
/// item whose retries are exhausted resolves to an error-carrying result
/// and leaves its siblings untouched. The returned future completes only
/// once the whole batch has resolved, which is what makes batch
/// boundaries safe points for cancellation, pause, and checkpointing.
pub async fn run_batch(
    client: &Arc<dyn SecurityClient>,
    policy: &RetryPolicy,
    org: &str,
    batch: &[RepoInfo],
) -> Vec<RepoSecurityResult> {
    debug!("Dispatching batch of {} checks", batch.len());
    let checks = batch.iter().map(|repo| {
        let client = Arc::clone(client);
        async move {
            let description = format!("check of '{}'", repo.name);
            match execute_with_retry(policy, &description, || client.check_repo(org, &repo.name))
                .await
            {
                Ok(result) => result,
                Err(error) => {
                    warn!("Recording '{}' as errored: {error}", repo.name);
                    RepoSecurityResult::failed(&repo.name, error.to_string(), Utc::now())
                }
            }
        }
    });
    join_all(checks).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::{compliant_result, partial_result, FailureKind, MockSecurityClient};
    use std::time::Duration;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_millis(1),
            backoff_multiplier: 2.0,
            max_interval: Duration::from_millis(4),
            max_attempts: 3,
        }
    }

    fn batch_of(names: &[&str]) -> Vec<RepoInfo> {
        names
            .iter()
            .map(|name| RepoInfo {
                name: name.to_string(),
                full_name: format!("acme/{name}"),
                private: false,
                archived: false,
            })
            .collect()
    }

    #[tokio::test]
    async fn results_come_back_in_input_order() {
        let client: Arc<dyn SecurityClient> = Arc::new(
            MockSecurityClient::new()
                .repo(compliant_result("alpha"))
                .repo(partial_result("beta"))
                .repo(compliant_result("gamma")),
        );
        let batch = batch_of(&["gamma", "alpha", "beta"]);
        let results = run_batch(&client, &fast_policy(), "acme", &batch).await;
        let names: Vec<&str> = results.iter().map(|r| r.repository.as_str()).collect();
        assert_eq!(names, vec!["gamma", "alpha", "beta"]);
    }

    #[tokio::test]
    async fn exhausted_item_becomes_error_result_without_poisoning_batch() {
        let mock = Arc::new(
            MockSecurityClient::new()
                .repo(compliant_result("alpha"))
                .broken_repo("beta", FailureKind::Timeout)
                .repo(compliant_result("gamma")),
        );
        let client: Arc<dyn SecurityClient> = Arc::clone(&mock) as Arc<dyn SecurityClient>;
        let batch = batch_of(&["alpha", "beta", "gamma"]);
        let results = run_batch(&client, &fast_policy(), "acme", &batch).await;

        assert_eq!(results.len(), 3);
        assert!(results[0].is_fully_compliant());
        assert!(results[1].error.is_some());
        assert!(results[1].error.as_deref().unwrap().contains("timeout"));
        assert!(results[2].is_fully_compliant());
        // Retried up to the attempt budget before giving up.
        assert_eq!(mock.calls_for("beta"), 3);
    }

    #[tokio::test]
    async fn transient_failures_recover_within_the_batch() {
        let mock = Arc::new(MockSecurityClient::new().flaky_repo(
            compliant_result("alpha"),
            2,
            FailureKind::Connection,
        ));
        let client: Arc<dyn SecurityClient> = Arc::clone(&mock) as Arc<dyn SecurityClient>;
        let batch = batch_of(&["alpha"]);
        let results = run_batch(&client, &fast_policy(), "acme", &batch).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_fully_compliant());
        assert!(results[0].error.is_none());
        assert_eq!(mock.calls_for("alpha"), 3);
    }
}
