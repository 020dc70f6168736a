//! End-to-end evaluation scenarios against the core canon

mod common;

use std::sync::Arc;
use std::time::Duration;

use canon_engine::error::{CheckerError, EvaluationError, SchemaError, StorageError};
use canon_engine::{
    CancelToken, CheckContext, Checker, CheckerRegistry, FsResolver, MemoryReportStore,
    OracleSet, Orchestrator, OverrideRequest, OverrideStore, Persistence, ReportStore,
    RuleRegistry, RuleSource,
};
use canon_types::{
    Artifact, ArtifactMetadata, AuditReport, Category, CheckResult, CheckStatus, Disposition,
    LogRecord, OverrideStatus, Principal, Rule, ScopePredicate, Verdict,
};
use chrono::Utc;
use common::{harness, harness_with, prose, settings};
use pretty_assertions::assert_eq;

const EMOJI_RULE: &str = "core:formatting:1";
const SENTENCE_RULE: &str = "core:voice:2";

// ============================================================
// Verdicts
// ============================================================

#[tokio::test]
async fn absolute_failure_yields_fail() {
    let h = harness();
    let outcome = h
        .orchestrator
        .evaluate(&h.ruleset, &Artifact::document("Shipped it 🚀 today."))
        .await
        .unwrap();

    assert_eq!(outcome.report.verdict(), Verdict::Fail);
    let entry = outcome.report.entry(EMOJI_RULE).unwrap();
    assert_eq!(entry.disposition, Disposition::Failed);
    assert_eq!(entry.override_status, Some(OverrideStatus::NeverOverridden));
    assert_eq!(outcome.exit_code(false), 2);
}

#[tokio::test]
async fn emoji_evidence_points_at_character_offset() {
    let h = harness();
    let content = "Status update.\nAll checks green ✅ on main.";
    let outcome = h
        .orchestrator
        .evaluate(&h.ruleset, &Artifact::document(content))
        .await
        .unwrap();

    let result = &outcome.report.entry(EMOJI_RULE).unwrap().result;
    assert_eq!(result.status, CheckStatus::Fail);
    let span = result.evidence[0].span.unwrap();
    assert_eq!(span.start, content.find('✅').unwrap());
    assert_eq!(span.line, 2);
    assert_eq!(span.column, 18);
}

#[tokio::test]
async fn clean_document_passes() {
    let h = harness();
    let outcome = h
        .orchestrator
        .evaluate(&h.ruleset, &Artifact::document("See [setup](docs/setup.md) first."))
        .await
        .unwrap();
    assert_eq!(outcome.report.verdict(), Verdict::Pass, "{:#?}", outcome.report.entries());
    assert_eq!(outcome.persistence, Persistence::Persisted { sequence: 0 });
}

#[tokio::test]
async fn major_failure_yields_warn() {
    let h = harness();
    let outcome = h
        .orchestrator
        .evaluate(&h.ruleset, &Artifact::document("Read [this](docs/missing.md)."))
        .await
        .unwrap();
    assert_eq!(outcome.report.verdict(), Verdict::Warn);
    assert_eq!(outcome.exit_code(false), 1);
    assert_eq!(outcome.exit_code(true), 2);
}

#[tokio::test]
async fn evaluation_is_idempotent() {
    let h = harness();
    let artifact = Artifact::document(format!("Let us delve into it. {}", prose([3, 7, 4, 6])));

    let first = h.orchestrator.evaluate(&h.ruleset, &artifact).await.unwrap();
    let second = h.orchestrator.evaluate(&h.ruleset, &artifact).await.unwrap();

    let a: Vec<CheckResult> = first.report.results().cloned().collect();
    let b: Vec<CheckResult> = second.report.results().cloned().collect();
    assert_eq!(a, b);
    assert_eq!(first.report.verdict(), second.report.verdict());
    assert_eq!(second.report.previous_report(), Some(first.report.report_id()));
    assert_eq!(second.report.summary().carried_forward, 0);
}

// ============================================================
// Statistical distribution
// ============================================================

#[tokio::test]
async fn sentence_distribution_thresholds() {
    let h = harness();

    let no_short = h
        .orchestrator
        .evaluate(&h.ruleset, &Artifact::document(prose([0, 10, 4, 6])))
        .await
        .unwrap();
    let entry = no_short.report.entry(SENTENCE_RULE).unwrap();
    assert_eq!(entry.result.status, CheckStatus::Fail);
    // Minor rules are reported without gating
    assert_eq!(entry.disposition, Disposition::Noted);
    assert_eq!(no_short.report.verdict(), Verdict::Pass);

    let exact = h
        .orchestrator
        .evaluate(&h.ruleset, &Artifact::document(prose([3, 7, 4, 6])))
        .await
        .unwrap();
    assert_eq!(
        exact.report.entry(SENTENCE_RULE).unwrap().result.status,
        CheckStatus::Pass
    );
}

// ============================================================
// Scope conflicts
// ============================================================

#[tokio::test]
async fn contradictory_persona_and_document_type_conflict() {
    let h = harness();
    let artifact = Artifact::document("The tenant can't assign this lease.").with_metadata(
        ArtifactMetadata::new()
            .document_type("contract")
            .persona("casual-blogger"),
    );
    let outcome = h.orchestrator.evaluate(&h.ruleset, &artifact).await.unwrap();

    assert!(outcome.report.verdict() >= Verdict::Warn);
    let legal = outcome.report.entry("core:voice:3").unwrap();
    let casual = outcome.report.entry("core:voice:4").unwrap();
    for (entry, rival) in [(legal, "core:voice:4"), (casual, "core:voice:3")] {
        assert_eq!(entry.disposition, Disposition::Conflicted);
        assert_eq!(entry.result.status, CheckStatus::Warn);
        assert_eq!(entry.conflict_with, vec![rival.to_string()]);
    }
    assert_eq!(outcome.report.summary().conflicts, 2);
}

#[tokio::test]
async fn specific_scope_applies_without_conflict() {
    let h = harness();
    let artifact = Artifact::document("We won't renew.")
        .with_metadata(ArtifactMetadata::new().document_type("contract").persona("legal"));
    let outcome = h.orchestrator.evaluate(&h.ruleset, &artifact).await.unwrap();

    let legal = outcome.report.entry("core:voice:3").unwrap();
    assert_eq!(legal.result.status, CheckStatus::Fail);
    assert_eq!(legal.disposition, Disposition::Warned);
    assert!(outcome.report.entry("core:voice:4").is_none());
}

// ============================================================
// Overrides
// ============================================================

#[tokio::test]
async fn override_expiry_restores_failure() {
    let h = harness();
    let now = Utc::now();
    let expiry = now + chrono::Duration::days(7);
    let approved = h
        .overrides
        .request_override(
            &h.ruleset,
            OverrideRequest {
                rule_id: EMOJI_RULE.to_string(),
                scope: ScopePredicate::any(),
                justification: "Launch announcement keeps the rocket".to_string(),
                approver: Principal::human("dana", &[Category::Formatting]),
                expiry,
            },
            now,
        )
        .await
        .unwrap();

    let artifact = Artifact::document("We launched 🚀.");
    let before = h
        .orchestrator
        .evaluate_with(&h.ruleset, &artifact, now + chrono::Duration::days(1), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(before.report.verdict(), Verdict::Warn);
    let entry = before.report.entry(EMOJI_RULE).unwrap();
    assert_eq!(entry.disposition, Disposition::Overridden);
    assert_eq!(entry.override_status, Some(OverrideStatus::Overridden));
    assert_eq!(entry.provenance.as_ref().unwrap().override_id, approved.id);

    let after = h
        .orchestrator
        .evaluate_with(
            &h.ruleset,
            &artifact,
            expiry + chrono::Duration::hours(1),
            &CancelToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(after.report.verdict(), Verdict::Fail);
    let entry = after.report.entry(EMOJI_RULE).unwrap();
    assert_eq!(entry.override_status, Some(OverrideStatus::OverrideExpired));
    assert_eq!(entry.disposition, Disposition::Failed);
}

#[tokio::test]
async fn override_scope_limits_suppression() {
    let h = harness();
    let now = Utc::now();
    h.overrides
        .request_override(
            &h.ruleset,
            OverrideRequest {
                rule_id: EMOJI_RULE.to_string(),
                scope: ScopePredicate::any().with_persona("casual-blogger"),
                justification: "Blog posts may use emoji".to_string(),
                approver: Principal::human("dana", &[Category::Formatting]),
                expiry: now + chrono::Duration::days(1),
            },
            now,
        )
        .await
        .unwrap();

    let blog = Artifact::document("Hi 👋")
        .with_metadata(ArtifactMetadata::new().persona("casual-blogger"));
    let memo = Artifact::document("Hi 👋");
    let blog_report = h.orchestrator.evaluate(&h.ruleset, &blog).await.unwrap().report;
    let memo_report = h.orchestrator.evaluate(&h.ruleset, &memo).await.unwrap().report;
    assert_eq!(
        blog_report.entry(EMOJI_RULE).unwrap().disposition,
        Disposition::Overridden
    );
    assert_eq!(memo_report.verdict(), Verdict::Fail);
}

/// Fails its rule after a fixed delay
struct Lagging;

impl Checker for Lagging {
    fn kind(&self) -> &str {
        "lagging"
    }

    fn validate(&self, _parameters: &serde_json::Value) -> Result<(), CheckerError> {
        Ok(())
    }

    fn check(
        &self,
        _artifact: &Artifact,
        rule: &Rule,
        _ctx: &CheckContext,
    ) -> Result<CheckResult, CheckerError> {
        std::thread::sleep(Duration::from_millis(200));
        Ok(CheckResult::fail(&rule.id, "late failure", vec![]))
    }
}

#[tokio::test]
async fn override_approved_mid_run_applies_from_next_run() {
    let mut checkers = common::checkers();
    checkers.register(Arc::new(Lagging));
    let h = harness_with(
        checkers,
        &[slow_source("lagging")],
        Arc::new(MemoryReportStore::new()),
        settings(),
    );
    let artifact = Artifact::document("Plain text.");

    let approve = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let now = Utc::now();
        h.overrides
            .request_override(
                &h.ruleset,
                OverrideRequest {
                    rule_id: "slow:testing:1".to_string(),
                    scope: ScopePredicate::any(),
                    justification: "Known flaky fixture".to_string(),
                    approver: Principal::human("dana", &[Category::Testing]),
                    expiry: now + chrono::Duration::days(1),
                },
                now,
            )
            .await
    };
    let (during, approved) = tokio::join!(h.orchestrator.evaluate(&h.ruleset, &artifact), approve);
    approved.unwrap();

    let during = during.unwrap().report;
    let entry = during.entry("slow:testing:1").unwrap();
    assert_eq!(entry.result.status, CheckStatus::Fail);
    assert_eq!(entry.disposition, Disposition::Failed);
    assert_eq!(during.verdict(), Verdict::Fail);

    let next = h.orchestrator.evaluate(&h.ruleset, &artifact).await.unwrap().report;
    assert_eq!(
        next.entry("slow:testing:1").unwrap().disposition,
        Disposition::Overridden
    );
    assert_eq!(next.verdict(), Verdict::Warn);
}

// ============================================================
// Storage failures
// ============================================================

/// Report store that accepts reads and rejects every write
struct ReadOnlyStore;

impl ReportStore for ReadOnlyStore {
    fn append(&self, _report: &AuditReport) -> Result<LogRecord, StorageError> {
        Err(StorageError::Unavailable("volume is read-only".to_string()))
    }

    fn records(&self) -> Result<Vec<LogRecord>, StorageError> {
        Ok(Vec::new())
    }

    fn verify(&self) -> Result<usize, StorageError> {
        Ok(0)
    }
}

#[tokio::test]
async fn unpersisted_report_with_absolute_failure_gates_fail() {
    let h = harness_with(common::checkers(), &[], Arc::new(ReadOnlyStore), settings());
    let now = Utc::now();
    h.overrides
        .request_override(
            &h.ruleset,
            OverrideRequest {
                rule_id: EMOJI_RULE.to_string(),
                scope: ScopePredicate::any(),
                justification: "Temporary".to_string(),
                approver: Principal::human("dana", &[Category::Formatting]),
                expiry: now + chrono::Duration::days(1),
            },
            now,
        )
        .await
        .unwrap();

    let outcome = h
        .orchestrator
        .evaluate(&h.ruleset, &Artifact::document("Done ✨"))
        .await
        .unwrap();

    assert!(matches!(outcome.persistence, Persistence::Unpersisted { .. }));
    // Overridden to WARN in the report, but an unstored report cannot prove it
    assert_eq!(outcome.report.verdict(), Verdict::Warn);
    assert_eq!(outcome.gate_verdict(), Verdict::Fail);
    assert_eq!(outcome.exit_code(false), 2);
}

#[tokio::test]
async fn unpersisted_clean_report_keeps_its_verdict() {
    let h = harness_with(common::checkers(), &[], Arc::new(ReadOnlyStore), settings());
    let outcome = h
        .orchestrator
        .evaluate(&h.ruleset, &Artifact::document("Plain text."))
        .await
        .unwrap();
    assert!(!outcome.is_persisted());
    assert_eq!(outcome.gate_verdict(), Verdict::Pass);
}

// ============================================================
// Timeouts and cancellation
// ============================================================

/// Loops until its context says stop
struct Spinning;

impl Checker for Spinning {
    fn kind(&self) -> &str {
        "spinning"
    }

    fn validate(&self, _parameters: &serde_json::Value) -> Result<(), CheckerError> {
        Ok(())
    }

    fn check(
        &self,
        _artifact: &Artifact,
        _rule: &Rule,
        ctx: &CheckContext,
    ) -> Result<CheckResult, CheckerError> {
        loop {
            ctx.checkpoint()?;
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

/// Ignores its context and blocks past any reasonable limit
struct Sleeping;

impl Checker for Sleeping {
    fn kind(&self) -> &str {
        "sleeping"
    }

    fn validate(&self, _parameters: &serde_json::Value) -> Result<(), CheckerError> {
        Ok(())
    }

    fn check(
        &self,
        _artifact: &Artifact,
        rule: &Rule,
        _ctx: &CheckContext,
    ) -> Result<CheckResult, CheckerError> {
        std::thread::sleep(Duration::from_millis(300));
        Ok(CheckResult::pass(&rule.id, "eventually"))
    }
}

fn slow_source(check_type: &str) -> RuleSource {
    RuleSource::toml(
        "slow",
        format!(
            r#"
[canon]
name = "slow"

[[rules]]
id = "slow:testing:1"
category = "testing"
severity = "absolute"
check-type = "{check_type}"
message = "Slow check"
rationale = "Exercises the time limit"
"#
        ),
    )
}

fn slow_checkers() -> canon_engine::CheckerRegistry {
    let mut checkers = common::checkers();
    checkers.register(Arc::new(Spinning));
    checkers.register(Arc::new(Sleeping));
    checkers
}

#[tokio::test]
async fn timeout_is_error_result_and_fails_absolute_rule() {
    for kind in ["spinning", "sleeping"] {
        let mut s = settings();
        s.checker_timeout = Duration::from_millis(50);
        let h = harness_with(
            slow_checkers(),
            &[slow_source(kind)],
            Arc::new(MemoryReportStore::new()),
            s,
        );

        let outcome = h
            .orchestrator
            .evaluate(&h.ruleset, &Artifact::document("Plain text."))
            .await
            .unwrap();
        let entry = outcome.report.entry("slow:testing:1").unwrap();
        assert_eq!(entry.result.status, CheckStatus::Error, "{kind}");
        assert!(entry.result.message.contains("timeout"), "{kind}: {}", entry.result.message);
        assert_eq!(outcome.report.verdict(), Verdict::Fail);
        // Other rules still complete
        assert_eq!(
            outcome.report.entry(EMOJI_RULE).unwrap().result.status,
            CheckStatus::Pass
        );
    }
}

#[tokio::test]
async fn cancelled_evaluation_persists_nothing() {
    let mut s = settings();
    s.checker_timeout = Duration::from_secs(30);
    let reports = Arc::new(MemoryReportStore::new());
    let h = harness_with(slow_checkers(), &[slow_source("spinning")], reports.clone(), s);

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = h
        .orchestrator
        .evaluate_with(&h.ruleset, &Artifact::document("Plain text."), Utc::now(), &cancel)
        .await;
    assert!(matches!(result, Err(EvaluationError::Cancelled)));
    assert!(reports.records().unwrap().is_empty());
}

// ============================================================
// Incremental evaluation
// ============================================================

const TEAM_RULES: &str = r#"
[canon]
name = "team"

[[rules]]
id = "team:voice:1"
category = "voice"
severity = "advisory"
check-type = "pattern"
parameters = { literals = ["synergy"], case-insensitive = true }
message = "Prefer plain words"
rationale = "Jargon hides meaning"
"#;

#[tokio::test]
async fn unchanged_rules_carry_forward_to_new_ruleset() {
    let checkers = Arc::new(common::checkers());
    let reports: Arc<dyn ReportStore> = Arc::new(MemoryReportStore::new());
    let v1 = common::ruleset(&checkers, &[]);
    let v2 = common::ruleset(&checkers, &[RuleSource::toml("team", TEAM_RULES)]);
    assert_ne!(v1.version(), v2.version());

    let orchestrator = canon_engine::Orchestrator::new(
        Arc::clone(&checkers),
        Arc::new(canon_engine::OverrideStore::in_memory()),
        Arc::clone(&reports),
        settings(),
    );
    let artifact = Artifact::document("Synergy 🎯 everywhere.");

    let first = orchestrator.evaluate(&v1, &artifact).await.unwrap().report;
    let second = orchestrator.evaluate(&v2, &artifact).await.unwrap().report;

    let carried = second.entry(EMOJI_RULE).unwrap();
    assert!(carried.carried_forward);
    assert_eq!(carried.result, first.entry(EMOJI_RULE).unwrap().result);

    let fresh = second.entry("team:voice:1").unwrap();
    assert!(!fresh.carried_forward);
    assert_eq!(fresh.result.status, CheckStatus::Fail);

    assert_eq!(second.verdict(), Verdict::Fail);
    assert_eq!(second.previous_report(), Some(first.report_id()));
    assert!(second.summary().carried_forward > 0);
}

#[tokio::test]
async fn link_results_rerun_when_origin_changes() {
    let root = tempfile::tempdir().unwrap();
    let (with_target, without_target) = (root.path().join("a"), root.path().join("b"));
    std::fs::create_dir_all(&with_target).unwrap();
    std::fs::create_dir_all(&without_target).unwrap();
    std::fs::write(with_target.join("x.md"), "Target page.").unwrap();

    let checkers = Arc::new(CheckerRegistry::with_builtins(
        OracleSet::builtin(),
        Arc::new(FsResolver),
    ));
    let v1 = common::ruleset(&checkers, &[]);
    let v2 = common::ruleset(&checkers, &[RuleSource::toml("team", TEAM_RULES)]);
    let orchestrator = Orchestrator::new(
        Arc::clone(&checkers),
        Arc::new(OverrideStore::in_memory()),
        Arc::new(MemoryReportStore::new()),
        settings(),
    );

    let content = "Let us delve into [x](x.md) 🎯 today.";
    let from_a = Artifact::document(content).with_origin(with_target.join("guide.md"));
    let from_b = Artifact::document(content).with_origin(without_target.join("guide.md"));
    assert_eq!(from_a.fingerprint(), from_b.fingerprint());

    let first = orchestrator.evaluate(&v1, &from_a).await.unwrap().report;
    assert_eq!(
        first.entry("core:docs-format:1").unwrap().result.status,
        CheckStatus::Pass
    );

    let second = orchestrator.evaluate(&v2, &from_b).await.unwrap().report;
    assert_eq!(second.previous_report(), Some(first.report_id()));
    let link = second.entry("core:docs-format:1").unwrap();
    assert!(!link.carried_forward);
    assert_eq!(link.result.status, CheckStatus::Fail);
    // Oracle-backed rules also rerun; plain patterns still carry
    assert!(!second.entry("core:voice:1").unwrap().carried_forward);
    assert!(second.entry(EMOJI_RULE).unwrap().carried_forward);
}

#[tokio::test]
async fn incremental_disabled_reruns_everything() {
    let checkers = Arc::new(common::checkers());
    let v1 = common::ruleset(&checkers, &[]);
    let v2 = common::ruleset(&checkers, &[RuleSource::toml("team", TEAM_RULES)]);
    let mut s = settings();
    s.incremental = false;
    let orchestrator = canon_engine::Orchestrator::new(
        Arc::clone(&checkers),
        Arc::new(canon_engine::OverrideStore::in_memory()),
        Arc::new(MemoryReportStore::new()),
        s,
    );
    let artifact = Artifact::document("Plain text.");
    orchestrator.evaluate(&v1, &artifact).await.unwrap();
    let second = orchestrator.evaluate(&v2, &artifact).await.unwrap().report;
    assert_eq!(second.summary().carried_forward, 0);
}

// ============================================================
// Load-time rejection
// ============================================================

#[test]
fn dependency_cycle_rejects_ruleset() {
    let source = RuleSource::toml(
        "cyclic",
        r#"
[[rules]]
id = "cyc:voice:1"
category = "voice"
severity = "minor"
check-type = "pattern"
parameters = { literals = ["a"] }
message = "a"
rationale = "a"

[rules.scope]
requires = [{ rule = "cyc:voice:2", outcome = "pass" }]

[[rules]]
id = "cyc:voice:2"
category = "voice"
severity = "minor"
check-type = "pattern"
parameters = { literals = ["b"] }
message = "b"
rationale = "b"

[rules.scope]
requires = [{ rule = "cyc:voice:1", outcome = "fail" }]
"#,
    );
    let registry = RuleRegistry::new(Arc::new(common::checkers()));
    let err = registry
        .ingest_all(&[canon_engine::canon::core_source(), source])
        .unwrap_err();
    assert!(matches!(err, SchemaError::DependencyCycle(_)), "{err}");
}
