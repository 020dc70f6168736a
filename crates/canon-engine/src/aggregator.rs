//! Aggregator: reduces per-rule results and overrides to a verdict
//!
//! - FAIL: an `absolute` rule failed or errored with no valid override
//! - WARN: any `major` failure/error/warning, any overridden failure, any scope conflict
//! - PASS: otherwise
//!
//! Minor and advisory failures are reported but never gate. The reduction is a
//! maximum over per-entry contributions, so it does not depend on result order.

use canon_types::{
    ArtifactMetadata, CheckResult, CheckStatus, Disposition, OverrideProvenance, OverrideStatus,
    ReportEntry, Rule, Severity, Verdict,
};
use chrono::{DateTime, Utc};

use crate::overrides::{OverrideLookup, OverrideSnapshot};

/// A rule's result before aggregation
#[derive(Debug, Clone)]
pub struct RuleOutcome {
    pub rule: Rule,
    pub rule_hash: String,
    pub result: CheckResult,
    /// Tied rivals when the rule's slot is conflicted
    pub conflict_with: Vec<String>,
    pub carried_forward: bool,
}

/// Classify every outcome and compute the verdict. Overrides are read from the
/// snapshot taken when the evaluation started, as of `at`.
pub fn aggregate(
    outcomes: Vec<RuleOutcome>,
    overrides: &OverrideSnapshot,
    metadata: &ArtifactMetadata,
    at: DateTime<Utc>,
) -> (Vec<ReportEntry>, Verdict) {
    let entries: Vec<ReportEntry> = outcomes
        .into_iter()
        .map(|outcome| classify(outcome, overrides, metadata, at))
        .collect();
    let verdict = verdict_of(&entries);
    (entries, verdict)
}

/// Worst contribution across entries; PASS when nothing contributes
pub fn verdict_of(entries: &[ReportEntry]) -> Verdict {
    entries
        .iter()
        .filter_map(|e| e.contribution)
        .max()
        .unwrap_or(Verdict::Pass)
}

fn classify(
    outcome: RuleOutcome,
    overrides: &OverrideSnapshot,
    metadata: &ArtifactMetadata,
    at: DateTime<Utc>,
) -> ReportEntry {
    let RuleOutcome {
        rule,
        rule_hash,
        result,
        conflict_with,
        carried_forward,
    } = outcome;

    let mut entry = ReportEntry {
        category: rule.category,
        severity: rule.severity,
        rule_hash,
        disposition: Disposition::Passed,
        contribution: None,
        override_status: None,
        provenance: None,
        conflict_with,
        carried_forward,
        result,
    };

    if !entry.conflict_with.is_empty() {
        entry.disposition = Disposition::Conflicted;
        entry.contribution = Some(Verdict::Warn);
        return entry;
    }

    match entry.result.status {
        CheckStatus::NotApplicable => {
            entry.disposition = Disposition::Excluded;
        }
        CheckStatus::Pass => {
            entry.disposition = Disposition::Passed;
            entry.contribution = Some(Verdict::Pass);
        }
        CheckStatus::Warn => {
            if rule.severity.is_gating() {
                entry.disposition = Disposition::Warned;
                entry.contribution = Some(Verdict::Warn);
            } else {
                entry.disposition = Disposition::Noted;
            }
        }
        CheckStatus::Fail | CheckStatus::Error => {
            let lookup = overrides.lookup(&rule.id, metadata, at);
            let unsuppressed = match rule.severity {
                Severity::Absolute => (Disposition::Failed, Some(Verdict::Fail)),
                Severity::Major => (Disposition::Warned, Some(Verdict::Warn)),
                Severity::Minor | Severity::Advisory => (Disposition::Noted, None),
            };
            match lookup {
                OverrideLookup::Active(o) => {
                    entry.disposition = Disposition::Overridden;
                    entry.contribution = rule.severity.is_gating().then_some(Verdict::Warn);
                    entry.override_status = Some(OverrideStatus::Overridden);
                    entry.provenance = Some(OverrideProvenance::from(&o));
                }
                OverrideLookup::Expired(o) => {
                    (entry.disposition, entry.contribution) = unsuppressed;
                    entry.override_status = Some(OverrideStatus::OverrideExpired);
                    entry.provenance = Some(OverrideProvenance::from(&o));
                }
                OverrideLookup::None => {
                    (entry.disposition, entry.contribution) = unsuppressed;
                    entry.override_status = Some(OverrideStatus::NeverOverridden);
                }
            }
        }
    }

    entry
}
