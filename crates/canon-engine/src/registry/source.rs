//! Raw rule sources (TOML or JSON) and their schema-validated conversion into rules

use std::path::Path;

use canon_types::{
    parse_rule_id, AccessLevel, ArtifactKind, Category, CheckSpec, Dependency, Outcome, Rule,
    ScopePredicate, Severity,
};
use serde::Deserialize;

use crate::error::{SchemaError, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Toml,
    Json,
}

impl SourceFormat {
    /// Pick a format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "toml" => Some(SourceFormat::Toml),
            "json" => Some(SourceFormat::Json),
            _ => None,
        }
    }
}

/// Unparsed rule definitions plus where they came from
#[derive(Debug, Clone)]
pub struct RuleSource {
    pub name: String,
    pub format: SourceFormat,
    pub content: String,
}

impl RuleSource {
    pub fn toml(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format: SourceFormat::Toml,
            content: content.into(),
        }
    }

    pub fn json(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format: SourceFormat::Json,
            content: content.into(),
        }
    }

    /// Read a `.toml` or `.json` rule file
    pub fn from_path(path: &Path) -> Result<Self, StorageError> {
        let format = SourceFormat::from_path(path).ok_or_else(|| {
            StorageError::Unavailable(format!(
                "{} is not a .toml or .json rule source",
                path.display()
            ))
        })?;
        let content = std::fs::read_to_string(path).map_err(|e| StorageError::io(path, e))?;
        Ok(Self {
            name: path.display().to_string(),
            format,
            content,
        })
    }

    /// Source name without directories or extension: `/repo/rules/team.toml` is `team`
    fn stem(&self) -> String {
        Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.name)
            .to_string()
    }

    fn parse(&self) -> Result<RawSource, SchemaError> {
        let parsed = match self.format {
            SourceFormat::Toml => toml::from_str(&self.content).map_err(|e| e.to_string()),
            SourceFormat::Json => serde_json::from_str(&self.content).map_err(|e| e.to_string()),
        };
        parsed.map_err(|reason| SchemaError::Parse {
            source_name: self.name.clone(),
            reason,
        })
    }

    /// Parse and validate every rule in the source. Cross-rule checks (duplicates,
    /// dependencies, checker parameters) happen in the registry.
    pub fn rules(&self) -> Result<Vec<Rule>, SchemaError> {
        let raw = self.parse()?;
        let canon = raw.canon.map(|c| c.name).unwrap_or_else(|| self.stem());

        raw.rules
            .into_iter()
            .enumerate()
            .map(|(index, rule)| rule.into_rule(&self.name, index, &canon))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawSource {
    #[serde(default)]
    canon: Option<RawCanon>,
    #[serde(default)]
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawCanon {
    name: String,
    #[allow(dead_code)]
    #[serde(default)]
    description: Option<String>,
}

/// Every field optional so missing ones surface as `MissingField` rather than a parse error
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawRule {
    id: Option<String>,
    category: Option<String>,
    severity: Option<String>,
    #[serde(default)]
    scope: RawScope,
    check_type: Option<String>,
    #[serde(default)]
    parameters: Option<serde_json::Value>,
    message: Option<String>,
    rationale: Option<String>,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    exceptions: Vec<RawPredicate>,
    #[serde(default)]
    slot: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawPredicate {
    #[serde(default, deserialize_with = "canon_types::rule::one_or_many")]
    document_type: Vec<String>,
    #[serde(default, deserialize_with = "canon_types::rule::one_or_many")]
    persona: Vec<String>,
    #[serde(default, deserialize_with = "canon_types::rule::one_or_many")]
    jurisdiction: Vec<String>,
    #[serde(default, deserialize_with = "canon_types::rule::one_or_many")]
    access_level: Vec<String>,
    #[serde(default, deserialize_with = "canon_types::rule::one_or_many")]
    artifact_type: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawScope {
    #[serde(default, deserialize_with = "canon_types::rule::one_or_many")]
    document_type: Vec<String>,
    #[serde(default, deserialize_with = "canon_types::rule::one_or_many")]
    persona: Vec<String>,
    #[serde(default, deserialize_with = "canon_types::rule::one_or_many")]
    jurisdiction: Vec<String>,
    #[serde(default, deserialize_with = "canon_types::rule::one_or_many")]
    access_level: Vec<String>,
    #[serde(default, deserialize_with = "canon_types::rule::one_or_many")]
    artifact_type: Vec<String>,
    #[serde(default)]
    requires: Vec<RawDependency>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawDependency {
    rule: String,
    outcome: String,
}

impl RawRule {
    fn into_rule(self, source_name: &str, index: usize, canon: &str) -> Result<Rule, SchemaError> {
        let missing = |field: &'static str| SchemaError::MissingField {
            source_name: source_name.to_string(),
            index,
            field,
        };

        let id = self.id.ok_or_else(|| missing("id"))?;
        if parse_rule_id(&id).is_none() {
            return Err(SchemaError::InvalidId(id));
        }

        let category_raw = self.category.ok_or_else(|| missing("category"))?;
        let category = Category::parse(&category_raw).ok_or_else(|| SchemaError::UnknownValue {
            rule: id.clone(),
            field: "category",
            value: category_raw,
        })?;

        let severity_raw = self.severity.ok_or_else(|| missing("severity"))?;
        let severity = Severity::parse(&severity_raw).ok_or_else(|| SchemaError::UnknownValue {
            rule: id.clone(),
            field: "severity",
            value: severity_raw,
        })?;

        let check_type = self.check_type.ok_or_else(|| missing("check-type"))?;
        let message = self.message.ok_or_else(|| missing("message"))?;
        let rationale = self.rationale.ok_or_else(|| missing("rationale"))?;

        let requires = self
            .scope
            .requires
            .iter()
            .map(|dep| {
                let outcome = match dep.outcome.trim().to_ascii_lowercase().as_str() {
                    "pass" => Outcome::Pass,
                    "fail" => Outcome::Fail,
                    _ => {
                        return Err(SchemaError::UnknownValue {
                            rule: id.clone(),
                            field: "outcome",
                            value: dep.outcome.clone(),
                        })
                    }
                };
                Ok(Dependency {
                    rule: dep.rule.clone(),
                    outcome,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let scope = predicate(
            &id,
            RawPredicate {
                document_type: self.scope.document_type,
                persona: self.scope.persona,
                jurisdiction: self.scope.jurisdiction,
                access_level: self.scope.access_level,
                artifact_type: self.scope.artifact_type,
            },
        )?;

        let exceptions = self
            .exceptions
            .into_iter()
            .map(|raw| {
                let exception = predicate(&id, raw)?;
                if exception.is_unbound() {
                    return Err(SchemaError::UnboundException { rule: id.clone() });
                }
                Ok(exception)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let parameters = self
            .parameters
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));

        Ok(Rule {
            id,
            category,
            severity,
            scope,
            requires,
            check: CheckSpec::new(check_type, parameters),
            message,
            rationale,
            priority: self.priority,
            exceptions,
            slot: self.slot.filter(|s| !s.trim().is_empty()),
            canon: canon.to_string(),
        })
    }
}

fn predicate(rule: &str, raw: RawPredicate) -> Result<ScopePredicate, SchemaError> {
    let access_level = raw
        .access_level
        .into_iter()
        .map(|raw| {
            AccessLevel::parse(&raw).ok_or_else(|| SchemaError::UnknownValue {
                rule: rule.to_string(),
                field: "access-level",
                value: raw,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let artifact_type = raw
        .artifact_type
        .into_iter()
        .map(|raw| {
            ArtifactKind::parse(&raw).ok_or_else(|| SchemaError::UnknownValue {
                rule: rule.to_string(),
                field: "artifact-type",
                value: raw,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ScopePredicate {
        document_type: raw.document_type,
        persona: raw.persona,
        jurisdiction: raw.jurisdiction,
        access_level,
        artifact_type,
    })
}
