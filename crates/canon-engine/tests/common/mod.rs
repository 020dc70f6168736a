//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use canon_engine::canon::core_source;
use canon_engine::{
    CheckerRegistry, EvaluationSettings, MemoryReportStore, OracleSet, Orchestrator,
    OverrideStore, ReportStore, RetryPolicy, RuleRegistry, RuleSet, RuleSource, StaticResolver,
};

pub fn checkers() -> CheckerRegistry {
    CheckerRegistry::with_builtins(
        OracleSet::builtin(),
        Arc::new(StaticResolver::new(["docs/setup.md"])),
    )
}

pub fn ruleset(checkers: &Arc<CheckerRegistry>, extra: &[RuleSource]) -> RuleSet {
    let mut sources = vec![core_source()];
    sources.extend_from_slice(extra);
    RuleRegistry::new(Arc::clone(checkers))
        .ingest_all(&sources)
        .expect("core canon ingests")
}

pub fn settings() -> EvaluationSettings {
    EvaluationSettings {
        workers: 4,
        checker_timeout: Duration::from_secs(5),
        incremental: true,
        retry: RetryPolicy::none(),
        as_of: None,
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub ruleset: RuleSet,
    pub overrides: Arc<OverrideStore>,
    pub reports: Arc<dyn ReportStore>,
}

pub fn harness() -> Harness {
    harness_with(checkers(), &[], Arc::new(MemoryReportStore::new()), settings())
}

pub fn harness_with(
    checkers: CheckerRegistry,
    extra: &[RuleSource],
    reports: Arc<dyn ReportStore>,
    settings: EvaluationSettings,
) -> Harness {
    let checkers = Arc::new(checkers);
    let ruleset = ruleset(&checkers, extra);
    let overrides = Arc::new(OverrideStore::in_memory());
    let orchestrator = Orchestrator::new(
        Arc::clone(&checkers),
        Arc::clone(&overrides),
        Arc::clone(&reports),
        settings,
    );
    Harness {
        orchestrator,
        ruleset,
        overrides,
        reports,
    }
}

pub fn sentence(words: usize) -> String {
    let mut s = vec!["word"; words].join(" ");
    s.push('.');
    s
}

/// Prose with `counts[i]` sentences of 5, 12, 30 and 40 words
pub fn prose(counts: [usize; 4]) -> String {
    let lengths = [5, 12, 30, 40];
    let mut parts = Vec::new();
    for (count, len) in counts.iter().zip(lengths) {
        for _ in 0..*count {
            parts.push(sentence(len));
        }
    }
    parts.join(" ")
}
