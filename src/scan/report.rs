//! Final report assembly and persistence.

use crate::scan::model::{RepoSecurityResult, SecurityStatus};
use crate::scan::state::ScanState;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

/// Wire-format scan report.
///
/// Field order is serialization order and is part of the contract: two
/// scans over the same inputs produce byte-identical JSON, whether or not
/// either was interrupted and resumed along the way. The trailing
/// optional fields only appear when set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub org: String,
    pub total_repos: usize,
    pub fully_compliant: usize,
    pub compliance_rate: String,
    pub secret_scanning_enabled: usize,
    pub dependabot_enabled: usize,
    pub code_scanning_enabled: usize,
    pub errors: usize,
    pub non_compliant_repos: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repos_scanned_before_cancel: Option<usize>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub continuations: u32,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

/// Summarize results into the report body.
///
/// Pure over its inputs. `total_repos` counts every recorded result, so a
/// cancelled scan reports the repositories it actually processed.
/// Error-carrying results land in `errors` and are never listed as
/// non-compliant: an unreachable repository is not a finding.
pub fn generate_report(org: &str, results: &[RepoSecurityResult]) -> ScanReport {
    let total = results.len();
    let fully_compliant = results.iter().filter(|r| r.is_fully_compliant()).count();
    let enabled = |pick: fn(&RepoSecurityResult) -> SecurityStatus| {
        results.iter().filter(|r| pick(r) == SecurityStatus::Enabled).count()
    };
    ScanReport {
        org: org.to_string(),
        total_repos: total,
        fully_compliant,
        compliance_rate: compliance_rate(fully_compliant, total),
        secret_scanning_enabled: enabled(|r| r.secret_scanning),
        dependabot_enabled: enabled(|r| r.dependabot_alerts),
        code_scanning_enabled: enabled(|r| r.code_scanning),
        errors: results.iter().filter(|r| r.error.is_some()).count(),
        non_compliant_repos: results
            .iter()
            .filter(|r| !r.is_fully_compliant() && r.error.is_none())
            .map(|r| r.repository.clone())
            .collect(),
        cancelled: false,
        cancel_reason: None,
        repos_scanned_before_cancel: None,
        continuations: 0,
    }
}

/// One-decimal percentage, or "N/A" when nothing was processed.
fn compliance_rate(compliant: usize, total: usize) -> String {
    if total == 0 {
        "N/A".to_string()
    } else {
        format!("{:.1}%", compliant as f64 / total as f64 * 100.0)
    }
}

/// Fold the terminal control flags into the report.
pub fn finalize_report(mut report: ScanReport, state: &ScanState) -> ScanReport {
    if state.cancel_requested {
        report.cancelled = true;
        report.cancel_reason = state.cancel_reason.clone();
        report.repos_scanned_before_cancel = Some(state.scanned_repos);
    }
    report.continuations = state.continuation_count;
    report
}

/// Write the report as pretty-printed JSON.
pub async fn save_report(report: &ScanReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    Ok(())
}

/// Human-readable summary printed at the end of a scan.
pub fn render_summary(report: &ScanReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "📊 Security scan report for '{}'", report.org);
    let _ = writeln!(out, "   Repositories checked:     {}", report.total_repos);
    let _ = writeln!(
        out,
        "   Fully compliant:          {} ({})",
        report.fully_compliant, report.compliance_rate
    );
    let _ = writeln!(out, "   Secret scanning enabled:  {}", report.secret_scanning_enabled);
    let _ = writeln!(out, "   Dependabot enabled:       {}", report.dependabot_enabled);
    let _ = writeln!(out, "   Code scanning enabled:    {}", report.code_scanning_enabled);
    let _ = writeln!(out, "   Check errors:             {}", report.errors);
    if !report.non_compliant_repos.is_empty() {
        let _ = writeln!(out, "   Non-compliant: {}", report.non_compliant_repos.join(", "));
    }
    if report.continuations > 0 {
        let _ = writeln!(out, "   Executions chained:       {}", report.continuations + 1);
    }
    if report.cancelled {
        let reason = report.cancel_reason.as_deref().unwrap_or("no reason given");
        let _ = write!(out, "⚠️  Scan cancelled: {reason}");
        if let Some(scanned) = report.repos_scanned_before_cancel {
            let _ = write!(out, " ({scanned} repositories scanned before cancel)");
        }
        let _ = writeln!(out);
    }
    out
}
