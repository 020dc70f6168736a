//! Canon compliance engine
//!
//! Evaluates documents, code and commit messages against versioned rule canons:
//! - Rule Registry: ingests TOML/JSON rule sources into immutable, hashed RuleSets
//! - Scope Resolver: picks the applicable rules for an artifact's metadata
//! - Checkers: pattern, statistical, structural, checklist and reference checks
//! - Aggregator: reduces results and overrides to PASS / WARN / FAIL
//! - Override Store and Report Store: the only persisted state
//!
//! `CanonEngine` wires these together from an `EngineConfig`; the pieces are
//! public for callers that need different storage or checkers.

pub mod aggregator;
pub mod canon;
pub mod cancel;
pub mod checkers;
pub mod config;
pub mod error;
pub mod oracle;
pub mod orchestrator;
pub mod overrides;
pub mod patterns;
pub mod registry;
pub mod render;
pub mod retry;
pub mod ruleset;
pub mod scope;
pub mod store;

use std::sync::Arc;

use canon_types::{Artifact, Override};
use chrono::Utc;
use tracing::info;

pub use cancel::CancelToken;
pub use checkers::{
    CheckContext, Checker, CheckerRegistry, FsResolver, StaticResolver, TargetResolver,
};
pub use config::EngineConfig;
pub use error::{
    CheckerError, ConfigError, EvaluationError, LoadError, OverrideError, SchemaError, StorageError,
};
pub use oracle::{OracleSet, PhraseOracle, PinnedOracle};
pub use orchestrator::{EvaluationOutcome, EvaluationSettings, Orchestrator, Persistence};
pub use overrides::{OverrideRequest, OverrideStore};
pub use registry::{RuleRegistry, RuleSource};
pub use render::{OutputFormat, Renderer};
pub use retry::RetryPolicy;
pub use ruleset::{RuleFilter, RuleSet};
pub use store::{JsonlReportStore, MemoryReportStore, ReportStore};

/// A configured engine: registry, orchestrator and stores
#[derive(Debug)]
pub struct CanonEngine {
    config: EngineConfig,
    registry: RuleRegistry,
    orchestrator: Orchestrator,
}

impl CanonEngine {
    /// Engine backed by the on-disk stores under the configured data directory,
    /// resolving relative links against the filesystem
    pub async fn from_config(config: EngineConfig) -> Result<Self, StorageError> {
        let checkers = Arc::new(CheckerRegistry::with_builtins(
            oracle_set(&config),
            Arc::new(FsResolver),
        ));
        let backend = Arc::new(overrides::JsonOverrideBackend::new(config.overrides_path()));
        let overrides = OverrideStore::open(backend, config.retry).await?;
        let reports: Arc<dyn ReportStore> = Arc::new(JsonlReportStore::new(config.reports_path()));
        info!(data_dir = %config.data_dir().display(), "Engine storage ready");
        Ok(Self::with_parts(config, checkers, Arc::new(overrides), reports))
    }

    /// Engine over caller-supplied checkers and stores
    pub fn with_parts(
        config: EngineConfig,
        checkers: Arc<CheckerRegistry>,
        overrides: Arc<OverrideStore>,
        reports: Arc<dyn ReportStore>,
    ) -> Self {
        let settings = EvaluationSettings::from(&config);
        Self {
            registry: RuleRegistry::new(Arc::clone(&checkers)),
            orchestrator: Orchestrator::new(checkers, overrides, reports, settings),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn reports(&self) -> &Arc<dyn ReportStore> {
        self.orchestrator.reports()
    }

    /// Load the configured RuleSet, refusing it unless it matches `requested`
    pub async fn load_ruleset(&self, requested: Option<&str>) -> Result<RuleSet, LoadError> {
        let ruleset = canon::load_ruleset(&self.config, &self.registry).await?;
        canon::select_version(ruleset, requested)
    }

    pub async fn evaluate(
        &self,
        ruleset: &RuleSet,
        artifact: &Artifact,
    ) -> Result<EvaluationOutcome, EvaluationError> {
        self.orchestrator.evaluate(ruleset, artifact).await
    }

    pub async fn request_override(
        &self,
        ruleset: &RuleSet,
        request: OverrideRequest,
    ) -> Result<Override, OverrideError> {
        self.orchestrator
            .overrides()
            .request_override(ruleset, request, Utc::now())
            .await
    }

    /// Overrides currently in force or expired, one per `(rule, scope)` key
    pub fn overrides(&self) -> Vec<Override> {
        self.orchestrator.overrides().list()
    }
}

/// Built-in oracles, with the configured snapshot replacing the cliché list
fn oracle_set(config: &EngineConfig) -> OracleSet {
    if config.oracle.snapshot.is_empty() {
        OracleSet::builtin()
    } else {
        OracleSet::new().with(
            oracle::AI_CLICHES,
            Arc::new(PinnedOracle::new(config.oracle.snapshot.iter().cloned())),
        )
    }
}
