//! Checker trait, evaluation context and the built-in checker registry
//!
//! A checker is a pure function from (artifact, rule parameters) to a `CheckResult`.
//! Checkers share no mutable state and never see other rules' results.

mod checklist;
mod pattern;
mod reference;
mod statistical;
mod structural;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use canon_types::{Artifact, CheckResult, Rule};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;

pub use checklist::ChecklistChecker;
pub use pattern::PatternChecker;
pub use reference::{FsResolver, ReferenceChecker, StaticResolver, TargetResolver};
pub use statistical::StatisticalChecker;
pub use structural::StructuralChecker;

use crate::cancel::CancelToken;
use crate::error::CheckerError;
use crate::oracle::OracleSet;

/// Per-invocation inputs beyond the artifact and rule
#[derive(Debug, Clone)]
pub struct CheckContext {
    as_of: NaiveDate,
    cancel: CancelToken,
    deadline: Option<Instant>,
}

impl CheckContext {
    pub fn new(as_of: NaiveDate) -> Self {
        Self {
            as_of,
            cancel: CancelToken::new(),
            deadline: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Date passed to time-dependent oracles
    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    /// True once the evaluation is cancelled or this invocation's time is up.
    /// Long-running checkers poll this and return `CheckerError::Cancelled`.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn checkpoint(&self) -> Result<(), CheckerError> {
        if self.is_cancelled() {
            Err(CheckerError::Cancelled)
        } else {
            Ok(())
        }
    }
}

pub trait Checker: Send + Sync {
    /// The `check-type` this checker handles
    fn kind(&self) -> &str;

    /// Validate a rule's parameters at ingestion time
    fn validate(&self, parameters: &serde_json::Value) -> Result<(), CheckerError>;

    fn check(
        &self,
        artifact: &Artifact,
        rule: &Rule,
        ctx: &CheckContext,
    ) -> Result<CheckResult, CheckerError>;
}

/// Deserialize a rule's parameter object into a checker's typed parameters
pub fn parameters<T: DeserializeOwned>(value: &serde_json::Value) -> Result<T, CheckerError> {
    serde_json::from_value(value.clone())
        .map_err(|e| CheckerError::InvalidParameters(e.to_string()))
}

/// Maps `check-type` names to checkers
#[derive(Clone, Default)]
pub struct CheckerRegistry {
    checkers: BTreeMap<String, Arc<dyn Checker>>,
}

impl std::fmt::Debug for CheckerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckerRegistry")
            .field("kinds", &self.checkers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CheckerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The five built-in checkers. `oracles` backs the pattern checker's `oracle`
    /// parameter; `resolver` decides whether relative link targets exist.
    pub fn with_builtins(oracles: OracleSet, resolver: Arc<dyn TargetResolver>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PatternChecker::new(oracles)));
        registry.register(Arc::new(StatisticalChecker));
        registry.register(Arc::new(StructuralChecker));
        registry.register(Arc::new(ChecklistChecker));
        registry.register(Arc::new(ReferenceChecker::new(resolver)));
        registry
    }

    /// Add or replace a checker under its `kind()`
    pub fn register(&mut self, checker: Arc<dyn Checker>) {
        self.checkers.insert(checker.kind().to_string(), checker);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Checker>> {
        self.checkers.get(kind).cloned()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.checkers.keys().map(String::as_str)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use canon_types::{Category, CheckSpec, ScopePredicate, Severity};

    use super::*;

    pub fn rule(check_type: &str, parameters: serde_json::Value) -> Rule {
        Rule {
            id: "test:check:1".to_string(),
            category: Category::Formatting,
            severity: Severity::Major,
            scope: ScopePredicate::any(),
            requires: vec![],
            check: CheckSpec::new(check_type, parameters),
            message: "test rule".into(),
            rationale: "testing".into(),
            priority: 0,
            exceptions: vec![],
            slot: None,
            canon: "test".into(),
        }
    }

    pub fn ctx() -> CheckContext {
        CheckContext::new(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::OracleSet;

    #[test]
    fn test_builtins_registered() {
        let registry = CheckerRegistry::with_builtins(
            OracleSet::builtin(),
            Arc::new(StaticResolver::default()),
        );
        let kinds: Vec<&str> = registry.kinds().collect();
        assert_eq!(
            kinds,
            vec!["checklist", "pattern", "reference", "statistical", "structural"]
        );
    }

    #[test]
    fn test_context_deadline_cancels() {
        let ctx = testing::ctx().with_deadline(Instant::now());
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.checkpoint(), Err(CheckerError::Cancelled));
    }

    #[test]
    fn test_parameters_reports_bad_shape() {
        #[derive(serde::Deserialize, Debug)]
        #[allow(dead_code)]
        struct P {
            n: usize,
        }
        let err = parameters::<P>(&serde_json::json!({"n": "x"})).unwrap_err();
        assert!(matches!(err, CheckerError::InvalidParameters(_)));
    }
}
