//! Rule Registry: ingests rule sources into validated, versioned RuleSets

mod graph;
mod source;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use canon_types::Rule;
use tracing::{debug, info, instrument};

pub use source::{RuleSource, SourceFormat};

use crate::checkers::CheckerRegistry;
use crate::error::{CheckerError, SchemaError, StorageError};
use crate::ruleset::RuleSet;

/// Validates rule definitions against the schema and the registered checkers
#[derive(Debug, Clone)]
pub struct RuleRegistry {
    checkers: Arc<CheckerRegistry>,
}

impl RuleRegistry {
    pub fn new(checkers: Arc<CheckerRegistry>) -> Self {
        Self { checkers }
    }

    pub fn checkers(&self) -> &Arc<CheckerRegistry> {
        &self.checkers
    }

    /// Ingest a single source
    pub fn ingest(&self, source: &RuleSource) -> Result<RuleSet, SchemaError> {
        self.ingest_all(std::slice::from_ref(source))
    }

    /// Ingest several sources into one RuleSet. Any error rejects the whole batch;
    /// no partial RuleSet is produced.
    #[instrument(skip_all, fields(sources = sources.len()))]
    pub fn ingest_all(&self, sources: &[RuleSource]) -> Result<RuleSet, SchemaError> {
        let mut rules: Vec<Rule> = Vec::new();
        for source in sources {
            let parsed = source.rules()?;
            debug!(source = %source.name, rules = parsed.len(), "Parsed rule source");
            rules.extend(parsed);
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for rule in &rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(SchemaError::DuplicateId(rule.id.clone()));
            }
        }

        for rule in &rules {
            self.validate_check(rule)?;
        }

        let depths = graph::dependency_depths(&rules)?;
        let ruleset = RuleSet::new(rules, &depths);

        info!(
            version = %ruleset.short_version(),
            rules = ruleset.len(),
            canons = ?ruleset.canons(),
            "Ingested RuleSet"
        );
        Ok(ruleset)
    }

    fn validate_check(&self, rule: &Rule) -> Result<(), SchemaError> {
        let check_type = &rule.check.check_type;
        let checker = self
            .checkers
            .get(check_type)
            .ok_or_else(|| SchemaError::UnknownValue {
                rule: rule.id.clone(),
                field: "check-type",
                value: check_type.clone(),
            })?;

        if !rule.check.parameters.is_object() {
            return Err(SchemaError::InvalidParameters {
                rule: rule.id.clone(),
                check_type: check_type.clone(),
                reason: "parameters must be a table".to_string(),
            });
        }

        checker
            .validate(&rule.check.parameters)
            .map_err(|e| SchemaError::InvalidParameters {
                rule: rule.id.clone(),
                check_type: check_type.clone(),
                reason: match e {
                    CheckerError::InvalidParameters(reason) => reason,
                    other => other.to_string(),
                },
            })
    }
}

/// Read rule sources from files and directories. Directories contribute their
/// `.toml`/`.json` files in name order; other files in a directory are skipped.
pub fn read_sources(paths: &[impl AsRef<Path>]) -> Result<Vec<RuleSource>, StorageError> {
    let mut sources = Vec::new();
    for path in paths {
        let path = path.as_ref();
        if path.is_dir() {
            let entries = std::fs::read_dir(path).map_err(|e| StorageError::io(path, e))?;
            let mut files = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|e| StorageError::io(path, e))?;
                let file = entry.path();
                if file.is_file() && SourceFormat::from_path(&file).is_some() {
                    files.push(file);
                }
            }
            files.sort();
            for file in files {
                sources.push(RuleSource::from_path(&file)?);
            }
        } else {
            sources.push(RuleSource::from_path(path)?);
        }
    }
    Ok(sources)
}
