//! Built-in core canon and RuleSet loading from configuration

use tracing::{info, instrument};

use crate::config::EngineConfig;
use crate::error::LoadError;
use crate::registry::{read_sources, RuleRegistry, RuleSource};
use crate::retry::retry_io;
use crate::ruleset::RuleSet;

/// Source text of the embedded core canon
pub const CORE_CANON: &str = include_str!("../canon/core.toml");

pub fn core_source() -> RuleSource {
    RuleSource::toml("core", CORE_CANON)
}

/// Build the RuleSet named by the configuration: the core canon (unless disabled)
/// followed by every configured source. Any schema error rejects the whole set.
#[instrument(
    skip_all,
    fields(sources = config.rules.sources.len(), core = config.rules.include_core)
)]
pub async fn load_ruleset(
    config: &EngineConfig,
    registry: &RuleRegistry,
) -> Result<RuleSet, LoadError> {
    let mut sources = Vec::new();
    if config.rules.include_core {
        sources.push(core_source());
    }
    let paths = &config.rules.sources;
    if !paths.is_empty() {
        let read = retry_io(&config.retry, "read rule sources", || {
            read_sources(paths.as_slice())
        })
        .await?;
        sources.extend(read);
    }

    let ruleset = registry.ingest_all(&sources)?;
    info!(version = ruleset.short_version(), rules = ruleset.len(), "RuleSet ready");
    Ok(ruleset)
}

/// Accept `ruleset` only if it is the version the caller asked for
/// (`current`, the full hash, or a hex prefix of it)
pub fn select_version(ruleset: RuleSet, requested: Option<&str>) -> Result<RuleSet, LoadError> {
    match requested {
        Some(requested) if !ruleset.matches_version(requested) => Err(LoadError::UnknownRuleset {
            requested: requested.to_string(),
            current: ruleset.version().to_string(),
        }),
        _ => Ok(ruleset),
    }
}
