//! Finalized audit reports

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::overrides::Override;
use crate::result::{CheckResult, CheckStatus};
use crate::rule::{Category, Severity};

/// Overall outcome. Ordered so that `max` picks the worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Warn,
    Fail,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Warn => "WARN",
            Verdict::Fail => "FAIL",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Override state of a failing entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverrideStatus {
    NeverOverridden,
    Overridden,
    OverrideExpired,
}

impl OverrideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideStatus::NeverOverridden => "never overridden",
            OverrideStatus::Overridden => "overridden",
            OverrideStatus::OverrideExpired => "override expired",
        }
    }
}

/// Who approved the override that changed an entry, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OverrideProvenance {
    pub override_id: Uuid,
    pub approver: String,
    pub justification: String,
    pub created_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
}

impl From<&Override> for OverrideProvenance {
    fn from(o: &Override) -> Self {
        Self {
            override_id: o.id,
            approver: o.approver.clone(),
            justification: o.justification.clone(),
            created_at: o.created_at,
            expiry: o.expiry,
        }
    }
}

/// How an entry counted toward the verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Disposition {
    /// Rule held
    Passed,
    /// Gating failure: forces FAIL
    Failed,
    /// Gating problem that forces at least WARN
    Warned,
    /// Non-gating problem, reported only
    Noted,
    /// Failure suppressed to WARN by a valid override
    Overridden,
    /// Rule sits in a slot with an unresolved scope conflict
    Conflicted,
    /// Not applicable, excluded from gating
    Excluded,
}

/// One rule's line in the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReportEntry {
    pub result: CheckResult,
    pub category: Category,
    pub severity: Severity,
    /// Content hash of the rule definition that produced the result
    pub rule_hash: String,
    pub disposition: Disposition,
    pub contribution: Option<Verdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_status: Option<OverrideStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<OverrideProvenance>,
    /// Rival rule ids when the entry is conflicted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflict_with: Vec<String>,
    /// Result reused from a prior report instead of re-running the checker
    #[serde(default)]
    pub carried_forward: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReportSummary {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub overridden: usize,
    pub conflicts: usize,
    pub carried_forward: usize,
}

impl ReportSummary {
    fn tally(entries: &[ReportEntry]) -> Self {
        let mut summary = ReportSummary {
            total: entries.len(),
            ..Default::default()
        };
        for entry in entries {
            *summary
                .by_status
                .entry(entry.result.status.as_str().to_string())
                .or_default() += 1;
            match entry.disposition {
                Disposition::Overridden => summary.overridden += 1,
                Disposition::Conflicted => summary.conflicts += 1,
                _ => {}
            }
            if entry.carried_forward {
                summary.carried_forward += 1;
            }
        }
        summary
    }
}

/// An immutable evaluation record. There are no mutating methods; a correction is a
/// new report that names its predecessor in `previous_report`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuditReport {
    report_id: Uuid,
    artifact_fingerprint: String,
    ruleset_version: String,
    entries: Vec<ReportEntry>,
    verdict: Verdict,
    timestamp: DateTime<Utc>,
    previous_report: Option<Uuid>,
    summary: ReportSummary,
}

impl AuditReport {
    pub fn finalize(
        artifact_fingerprint: impl Into<String>,
        ruleset_version: impl Into<String>,
        entries: Vec<ReportEntry>,
        verdict: Verdict,
        timestamp: DateTime<Utc>,
        previous_report: Option<Uuid>,
    ) -> Self {
        let summary = ReportSummary::tally(&entries);
        Self {
            report_id: Uuid::new_v4(),
            artifact_fingerprint: artifact_fingerprint.into(),
            ruleset_version: ruleset_version.into(),
            entries,
            verdict,
            timestamp,
            previous_report,
            summary,
        }
    }

    pub fn report_id(&self) -> Uuid {
        self.report_id
    }

    pub fn artifact_fingerprint(&self) -> &str {
        &self.artifact_fingerprint
    }

    pub fn ruleset_version(&self) -> &str {
        &self.ruleset_version
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn previous_report(&self) -> Option<Uuid> {
        self.previous_report
    }

    pub fn summary(&self) -> &ReportSummary {
        &self.summary
    }

    /// Ordered check results
    pub fn results(&self) -> impl Iterator<Item = &CheckResult> {
        self.entries.iter().map(|e| &e.result)
    }

    pub fn entry(&self, rule_id: &str) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| e.result.rule_id == rule_id)
    }

    /// Any absolute rule that failed or errored, overridden or not
    pub fn has_absolute_failure(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.severity == Severity::Absolute && e.result.status.is_failure())
    }

    pub fn count_status(&self, status: CheckStatus) -> usize {
        self.entries
            .iter()
            .filter(|e| e.result.status == status)
            .count()
    }
}
