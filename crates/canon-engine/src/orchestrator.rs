//! Orchestrator: one evaluation from artifact to persisted AuditReport
//!
//! 1. Snapshot the override table
//! 2. Resolve applicable rules for the artifact's metadata
//! 3. Carry forward unchanged results from a prior report (incremental mode)
//! 4. Run checkers layer by layer over the dependency DAG on a bounded worker pool
//! 5. Aggregate, finalize and persist
//!
//! A cancelled evaluation returns `EvaluationError::Cancelled` and stores nothing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use canon_types::{Artifact, AuditReport, CheckResult, CheckStatus, Outcome, Rule, Verdict};
use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::aggregator::{aggregate, RuleOutcome};
use crate::cancel::CancelToken;
use crate::checkers::{CheckContext, CheckerRegistry};
use crate::config::EngineConfig;
use crate::error::{CheckerError, EvaluationError};
use crate::overrides::OverrideStore;
use crate::retry::{retry_io, RetryPolicy};
use crate::ruleset::RuleSet;
use crate::scope::{self, Resolution};
use crate::store::ReportStore;

/// Tunables for a single orchestrator
#[derive(Debug, Clone)]
pub struct EvaluationSettings {
    /// Concurrent checker tasks
    pub workers: usize,
    /// Wall-clock limit per checker invocation
    pub checker_timeout: Duration,
    /// Reuse unchanged results from a prior report
    pub incremental: bool,
    /// Backoff for report store I/O
    pub retry: RetryPolicy,
    /// Oracle date; defaults to the evaluation date
    pub as_of: Option<NaiveDate>,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EvaluationSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            workers: config.workers(),
            checker_timeout: config.checker_timeout(),
            incremental: config.engine.incremental,
            retry: config.retry,
            as_of: config.engine.as_of,
        }
    }
}

/// Whether the report reached the report store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum Persistence {
    Persisted { sequence: u64 },
    Unpersisted { reason: String },
}

#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub report: AuditReport,
    pub persistence: Persistence,
}

impl EvaluationOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self.persistence, Persistence::Persisted { .. })
    }

    /// Verdict for CI gating. An unpersisted report with any absolute failure gates
    /// as FAIL, even when an override downgraded it.
    pub fn gate_verdict(&self) -> Verdict {
        if !self.is_persisted() && self.report.has_absolute_failure() {
            Verdict::Fail
        } else {
            self.report.verdict()
        }
    }

    /// 0 = PASS, 1 = WARN, 2 = FAIL. `strict` turns WARN into a failing exit.
    pub fn exit_code(&self, strict: bool) -> i32 {
        match self.gate_verdict() {
            Verdict::Pass => 0,
            Verdict::Warn if strict => 2,
            Verdict::Warn => 1,
            Verdict::Fail => 2,
        }
    }
}

pub struct Orchestrator {
    checkers: Arc<CheckerRegistry>,
    overrides: Arc<OverrideStore>,
    reports: Arc<dyn ReportStore>,
    settings: EvaluationSettings,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("checkers", &self.checkers)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        checkers: Arc<CheckerRegistry>,
        overrides: Arc<OverrideStore>,
        reports: Arc<dyn ReportStore>,
        settings: EvaluationSettings,
    ) -> Self {
        Self {
            checkers,
            overrides,
            reports,
            settings,
        }
    }

    pub fn settings(&self) -> &EvaluationSettings {
        &self.settings
    }

    pub fn overrides(&self) -> &Arc<OverrideStore> {
        &self.overrides
    }

    pub fn reports(&self) -> &Arc<dyn ReportStore> {
        &self.reports
    }

    /// Evaluate now, without external cancellation
    pub async fn evaluate(
        &self,
        ruleset: &RuleSet,
        artifact: &Artifact,
    ) -> Result<EvaluationOutcome, EvaluationError> {
        self.evaluate_with(ruleset, artifact, Utc::now(), &CancelToken::new())
            .await
    }

    /// Evaluate as of `at`. Overrides are judged against `at`; `cancel` aborts the run
    /// before anything is persisted.
    #[instrument(
        skip_all,
        fields(ruleset = %ruleset.short_version(), kind = artifact.kind.as_str())
    )]
    pub async fn evaluate_with(
        &self,
        ruleset: &RuleSet,
        artifact: &Artifact,
        at: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<EvaluationOutcome, EvaluationError> {
        if cancel.is_cancelled() {
            return Err(EvaluationError::Cancelled);
        }

        let overrides = self.overrides.snapshot();
        let fingerprint = artifact.fingerprint();
        let resolution = scope::resolve(ruleset, &artifact.metadata);
        info!(
            fingerprint = &fingerprint[..12],
            applicable = resolution.applicable.len(),
            superseded = resolution.superseded.len(),
            conflicts = resolution.conflicts.len(),
            "Resolved applicable rules"
        );
        for conflict in &resolution.conflicts {
            warn!(slot = %conflict.slot, rules = ?conflict.rules, "Scope conflict");
        }

        let prior = self.prior_report(&fingerprint).await;
        let mut results = self.carry_forward(ruleset, &resolution, prior.as_ref());
        let carried: HashSet<String> = results.keys().cloned().collect();
        if !carried.is_empty() {
            info!(carried = carried.len(), "Carried forward unchanged results");
        }

        let as_of = self.settings.as_of.unwrap_or_else(|| at.date_naive());
        let shared = Arc::new(artifact.clone());

        let mut layers: BTreeMap<usize, Vec<&Rule>> = BTreeMap::new();
        for rule in resolution
            .applicable
            .iter()
            .filter(|r| !carried.contains(&r.id))
        {
            layers.entry(ruleset.depth(&rule.id)).or_default().push(rule);
        }

        for (depth, layer) in layers {
            let mut ready = Vec::with_capacity(layer.len());
            for rule in layer {
                match unmet_dependency(rule, &results) {
                    Some(reason) => {
                        debug!(rule = %rule.id, %reason, "Dependency not met");
                        let skipped = CheckResult::not_applicable(&rule.id, reason);
                        results.insert(rule.id.clone(), skipped);
                    }
                    None => ready.push(rule.clone()),
                }
            }
            debug!(depth, rules = ready.len(), "Dispatching layer");
            let batch = self.run_layer(ready, &shared, as_of, cancel).await?;
            results.extend(batch);
        }

        let outcomes = assemble(ruleset, artifact, &resolution, results, &carried);
        let (entries, verdict) = aggregate(outcomes, &overrides, &artifact.metadata, at);

        // Partial work is never stored
        if cancel.is_cancelled() {
            return Err(EvaluationError::Cancelled);
        }

        let report = AuditReport::finalize(
            fingerprint,
            ruleset.version(),
            entries,
            verdict,
            at,
            prior.as_ref().map(AuditReport::report_id),
        );

        let persistence = match retry_io(&self.settings.retry, "append report", || {
            self.reports.append(&report)
        })
        .await
        {
            Ok(record) => Persistence::Persisted {
                sequence: record.sequence,
            },
            Err(e) => {
                error!(error = %e, "Report not persisted");
                Persistence::Unpersisted {
                    reason: e.to_string(),
                }
            }
        };

        info!(
            verdict = %report.verdict(),
            report_id = %report.report_id(),
            persisted = matches!(persistence, Persistence::Persisted { .. }),
            "Evaluation complete"
        );
        Ok(EvaluationOutcome {
            report,
            persistence,
        })
    }

    /// Latest report for this fingerprint; a store failure only disables carry-forward
    async fn prior_report(&self, fingerprint: &str) -> Option<AuditReport> {
        match retry_io(&self.settings.retry, "load prior report", || {
            self.reports.latest_for(fingerprint)
        })
        .await
        {
            Ok(prior) => prior,
            Err(e) => {
                warn!(error = %e, "Prior report unavailable, running every rule");
                None
            }
        }
    }

    /// Results reusable from a prior report produced under another RuleSet version.
    /// Only dependency-free rules whose definition hash is unchanged qualify, and only
    /// when the prior result was a real pass, fail or warn. Rules that read anything
    /// beyond the fingerprinted content always rerun.
    fn carry_forward(
        &self,
        ruleset: &RuleSet,
        resolution: &Resolution,
        prior: Option<&AuditReport>,
    ) -> HashMap<String, CheckResult> {
        let mut carried = HashMap::new();
        if !self.settings.incremental {
            return carried;
        }
        let Some(prior) = prior.filter(|p| p.ruleset_version() != ruleset.version()) else {
            return carried;
        };

        let candidates = resolution
            .applicable
            .iter()
            .filter(|r| r.requires.is_empty() && !reads_context(r));
        for rule in candidates {
            let Some(entry) = prior.entry(&rule.id) else {
                continue;
            };
            let unchanged = ruleset.rule_hash(&rule.id) == Some(entry.rule_hash.as_str());
            let reusable = matches!(
                entry.result.status,
                CheckStatus::Pass | CheckStatus::Fail | CheckStatus::Warn
            ) && entry.conflict_with.is_empty();
            if unchanged && reusable {
                carried.insert(rule.id.clone(), entry.result.clone());
            }
        }
        carried
    }

    /// Run one dependency layer on the worker pool, racing the cancellation signal
    async fn run_layer(
        &self,
        rules: Vec<Rule>,
        artifact: &Arc<Artifact>,
        as_of: NaiveDate,
        cancel: &CancelToken,
    ) -> Result<Vec<(String, CheckResult)>, EvaluationError> {
        if rules.is_empty() {
            return Ok(Vec::new());
        }
        let tasks = rules
            .into_iter()
            .map(|rule| self.run_checker(rule, Arc::clone(artifact), as_of, cancel.clone()));
        let run = stream::iter(tasks)
            .buffer_unordered(self.settings.workers.max(1))
            .collect::<Vec<_>>();

        tokio::select! {
            results = run => {
                if cancel.is_cancelled() {
                    return Err(EvaluationError::Cancelled);
                }
                Ok(results)
            }
            _ = cancel.cancelled() => {
                warn!("Evaluation cancelled, discarding partial results");
                Err(EvaluationError::Cancelled)
            }
        }
    }

    /// One checker invocation on the blocking pool, bounded by the checker timeout.
    /// Every failure becomes an `error` result; nothing here is retried.
    async fn run_checker(
        &self,
        rule: Rule,
        artifact: Arc<Artifact>,
        as_of: NaiveDate,
        cancel: CancelToken,
    ) -> (String, CheckResult) {
        let id = rule.id.clone();
        let Some(checker) = self.checkers.get(&rule.check.check_type) else {
            let err = CheckerError::UnknownChecker(rule.check.check_type.clone());
            return (id.clone(), CheckResult::error(&id, err.to_string()));
        };

        let timeout = self.settings.checker_timeout;
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let ctx = CheckContext::new(as_of)
            .with_cancel(cancel.clone())
            .with_deadline(Instant::now() + timeout);
        let started = Instant::now();

        let task = tokio::task::spawn_blocking(move || checker.check(&artifact, &rule, &ctx));
        let outcome = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(CheckerError::Panicked(join_error.to_string())),
            Err(_elapsed) => Err(CheckerError::Timeout(timeout_ms)),
        };

        let result = match outcome {
            Ok(result) => {
                debug!(
                    rule = %id,
                    status = result.status.as_str(),
                    elapsed = ?started.elapsed(),
                    "Checker finished"
                );
                result
            }
            // A checker that stopped at its deadline without external cancellation timed out
            Err(CheckerError::Cancelled) if !cancel.is_cancelled() => {
                warn!(rule = %id, timeout_ms, "Checker timed out");
                CheckResult::error(&id, CheckerError::Timeout(timeout_ms).to_string())
            }
            Err(err) => {
                if matches!(err, CheckerError::Timeout(_)) {
                    warn!(rule = %id, timeout_ms, "Checker timed out");
                } else {
                    warn!(rule = %id, error = %err, "Checker error");
                }
                CheckResult::error(&id, err.to_string())
            }
        };
        (id, result)
    }
}

/// Reference checks resolve targets relative to the artifact's origin and oracle
/// phrase lists are pinned by date; neither is part of the fingerprint.
fn reads_context(rule: &Rule) -> bool {
    rule.check.check_type == "reference" || rule.check.parameters.get("oracle").is_some()
}

/// Reason a rule cannot run yet, if any of its dependencies ended in the wrong outcome
fn unmet_dependency(rule: &Rule, results: &HashMap<String, CheckResult>) -> Option<String> {
    rule.requires.iter().find_map(|dep| {
        let wanted = match dep.outcome {
            Outcome::Pass => "pass",
            Outcome::Fail => "fail",
        };
        let Some(result) = results.get(&dep.rule) else {
            return Some(format!("requires {} to {wanted}, but it did not run", dep.rule));
        };
        let satisfied = match dep.outcome {
            Outcome::Pass => result.status == CheckStatus::Pass,
            Outcome::Fail => result.status.is_failure(),
        };
        (!satisfied).then(|| {
            format!(
                "requires {} to {wanted}, got {}",
                dep.rule,
                result.status.as_str()
            )
        })
    })
}

/// Per-rule outcomes in RuleSet order. Superseded rules are reported as not
/// applicable and conflicted rules as warnings naming their rivals.
fn assemble(
    ruleset: &RuleSet,
    artifact: &Artifact,
    resolution: &Resolution,
    mut results: HashMap<String, CheckResult>,
    carried: &HashSet<String>,
) -> Vec<RuleOutcome> {
    let mut outcomes = Vec::new();
    for rule in ruleset
        .rules()
        .iter()
        .filter(|r| r.applies_to(&artifact.metadata))
    {
        let rule_hash = ruleset.rule_hash(&rule.id).unwrap_or_default().to_string();
        let mut conflict_with = Vec::new();

        let result = if let Some(conflict) = resolution.conflict_for(&rule.id) {
            conflict_with = conflict
                .rules
                .iter()
                .filter(|r| **r != rule.id)
                .cloned()
                .collect();
            CheckResult::warn(&rule.id, conflict.to_string())
        } else if let Some(lost) = resolution.superseded_for(&rule.id) {
            CheckResult::not_applicable(
                &rule.id,
                format!("superseded in slot '{}' by {}", lost.slot, lost.by.join(", ")),
            )
        } else if let Some(result) = results.remove(&rule.id) {
            result
        } else {
            continue;
        };

        outcomes.push(RuleOutcome {
            carried_forward: carried.contains(&rule.id),
            rule: rule.clone(),
            rule_hash,
            result,
            conflict_with,
        });
    }
    outcomes
}
