//! Rule definitions: category, severity, scope predicates and check specs

use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

use crate::artifact::{AccessLevel, ArtifactKind, ArtifactMetadata};

/// Policy area a rule belongs to. Override authority is granted per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Formatting,
    Voice,
    Structure,
    Security,
    Testing,
    DocsFormat,
    Naming,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Formatting,
        Category::Voice,
        Category::Structure,
        Category::Security,
        Category::Testing,
        Category::DocsFormat,
        Category::Naming,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Formatting => "formatting",
            Category::Voice => "voice",
            Category::Structure => "structure",
            Category::Security => "security",
            Category::Testing => "testing",
            Category::DocsFormat => "docs-format",
            Category::Naming => "naming",
        }
    }

    /// Parse from the kebab-case name (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gating weight of a rule. Declared weakest first so `Ord` ranks `Absolute` highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Advisory,
    Minor,
    Major,
    Absolute,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Advisory,
        Severity::Minor,
        Severity::Major,
        Severity::Absolute,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Advisory => "advisory",
            Severity::Minor => "minor",
            Severity::Major => "major",
            Severity::Absolute => "absolute",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
    }

    /// Absolute and major rules gate the verdict; minor and advisory only inform.
    pub fn is_gating(&self) -> bool {
        matches!(self, Severity::Absolute | Severity::Major)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Predicate over artifact metadata. An empty field is unbound and matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScopePredicate {
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "one_or_many")]
    pub document_type: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "one_or_many")]
    pub persona: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "one_or_many")]
    pub jurisdiction: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "one_or_many")]
    pub access_level: Vec<AccessLevel>,
    /// Kinds of artifact the rule reads (document, code, commit)
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "one_or_many")]
    pub artifact_type: Vec<ArtifactKind>,
}

impl ScopePredicate {
    /// Predicate matching every artifact
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_document_type(mut self, value: impl Into<String>) -> Self {
        self.document_type.push(value.into());
        self
    }

    pub fn with_persona(mut self, value: impl Into<String>) -> Self {
        self.persona.push(value.into());
        self
    }

    pub fn with_jurisdiction(mut self, value: impl Into<String>) -> Self {
        self.jurisdiction.push(value.into());
        self
    }

    pub fn with_access_level(mut self, value: AccessLevel) -> Self {
        self.access_level.push(value);
        self
    }

    pub fn with_artifact_type(mut self, value: ArtifactKind) -> Self {
        self.artifact_type.push(value);
        self
    }

    /// Number of bound policy fields. `artifact-type` gates which rules can run at all
    /// and does not make a rule more specific.
    pub fn specificity(&self) -> u8 {
        [
            !self.document_type.is_empty(),
            !self.persona.is_empty(),
            !self.jurisdiction.is_empty(),
            !self.access_level.is_empty(),
        ]
        .into_iter()
        .filter(|bound| *bound)
        .count() as u8
    }

    pub fn is_unbound(&self) -> bool {
        self.specificity() == 0 && self.artifact_type.is_empty()
    }

    /// Every bound field must be satisfied by the metadata. A bound field against
    /// missing metadata does not match.
    pub fn matches(&self, metadata: &ArtifactMetadata) -> bool {
        field_matches(&self.document_type, metadata.document_type.as_deref(), eq_label)
            && field_matches(&self.persona, metadata.persona.as_deref(), eq_label)
            && field_matches(
                &self.jurisdiction,
                metadata.jurisdiction.as_deref(),
                jurisdiction_covers,
            )
            && (self.access_level.is_empty()
                || metadata
                    .access_level
                    .is_some_and(|level| self.access_level.contains(&level)))
            && (self.artifact_type.is_empty()
                || metadata
                    .artifact_type
                    .is_some_and(|kind| self.artifact_type.contains(&kind)))
    }

    /// Canonical string form, used as part of the override table key
    pub fn canonical_key(&self) -> String {
        fn join(values: &[String]) -> String {
            let mut sorted: Vec<String> = values.iter().map(|v| v.to_lowercase()).collect();
            sorted.sort();
            sorted.dedup();
            sorted.join(",")
        }
        let mut levels: Vec<&str> = self.access_level.iter().map(|l| l.as_str()).collect();
        levels.sort();
        levels.dedup();
        let mut kinds: Vec<&str> = self.artifact_type.iter().map(|k| k.as_str()).collect();
        kinds.sort();
        kinds.dedup();
        format!(
            "document-type={};persona={};jurisdiction={};access-level={};artifact-type={}",
            join(&self.document_type),
            join(&self.persona),
            join(&self.jurisdiction),
            levels.join(","),
            kinds.join(",")
        )
    }
}

fn field_matches(bound: &[String], actual: Option<&str>, eq: fn(&str, &str) -> bool) -> bool {
    if bound.is_empty() {
        return true;
    }
    match actual {
        Some(actual) => bound.iter().any(|b| eq(b, actual)),
        None => false,
    }
}

fn eq_label(bound: &str, actual: &str) -> bool {
    bound.trim().eq_ignore_ascii_case(actual.trim())
}

/// Jurisdiction codes are dash-separated segments, broadest first ("US-IL-CHICAGO").
/// A bound code covers itself and every code nested beneath it.
pub fn jurisdiction_covers(bound: &str, actual: &str) -> bool {
    let bound = bound.trim().to_uppercase();
    let actual = actual.trim().to_uppercase();
    actual == bound
        || actual
            .strip_prefix(&bound)
            .is_some_and(|rest| rest.starts_with('-'))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

/// Accept either a single value or a list for scope fields
pub fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

/// Outcome a dependent rule waits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Pass,
    Fail,
}

/// Edge in the rule dependency graph: this rule only applies when `rule` ended in `outcome`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub rule: String,
    pub outcome: Outcome,
}

/// Which checker evaluates the rule and with what parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CheckSpec {
    pub check_type: String,
    #[serde(default = "empty_parameters")]
    pub parameters: serde_json::Value,
}

fn empty_parameters() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl CheckSpec {
    pub fn new(check_type: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            check_type: check_type.into(),
            parameters,
        }
    }
}

/// A single machine-checkable rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Rule {
    /// `namespace:section:seq`, globally unique
    pub id: String,
    pub category: Category,
    pub severity: Severity,
    #[serde(default)]
    pub scope: ScopePredicate,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<Dependency>,
    pub check: CheckSpec,
    pub message: String,
    pub rationale: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exceptions: Vec<ScopePredicate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
    /// Name of the canon this rule was ingested from
    pub canon: String,
}

impl Rule {
    /// Scope matches and no exception excludes the metadata
    pub fn applies_to(&self, metadata: &ArtifactMetadata) -> bool {
        self.scope.matches(metadata) && !self.exceptions.iter().any(|e| e.matches(metadata))
    }

    /// Stable SHA-256 over the definition. Parameter maps serialize with sorted keys.
    /// The canon name records provenance only and is left out, so moving or renaming
    /// a rule source does not change any hash.
    pub fn content_hash(&self) -> String {
        let mut definition = serde_json::to_value(self).unwrap_or_default();
        if let Some(fields) = definition.as_object_mut() {
            fields.remove("canon");
        }
        let bytes = serde_json::to_vec(&definition).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        hex::encode(hasher.finalize())
    }
}

/// Split a rule id into `(namespace, section, seq)`
pub fn parse_rule_id(id: &str) -> Option<(&str, &str, u32)> {
    let mut parts = id.split(':');
    let namespace = parts.next().filter(|s| is_id_segment(s))?;
    let section = parts.next().filter(|s| is_id_segment(s))?;
    let seq = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((namespace, section, seq))
}

fn is_id_segment(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(doc: &str, persona: &str, jurisdiction: &str) -> ArtifactMetadata {
        ArtifactMetadata {
            document_type: Some(doc.to_string()),
            persona: Some(persona.to_string()),
            jurisdiction: Some(jurisdiction.to_string()),
            access_level: Some(AccessLevel::Internal),
            artifact_type: Some(ArtifactKind::Document),
        }
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Absolute > Severity::Major);
        assert!(Severity::Major > Severity::Minor);
        assert!(Severity::Minor > Severity::Advisory);
        assert!(Severity::Major.is_gating());
        assert!(!Severity::Minor.is_gating());
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!(Category::parse("docs-format"), Some(Category::DocsFormat));
        assert_eq!(Category::parse("SECURITY"), Some(Category::Security));
        assert_eq!(Category::parse("prose"), None);
    }

    #[test]
    fn test_specificity_counts_bound_fields() {
        let persona_only = ScopePredicate::any().with_persona("casual-blogger");
        let doc_and_persona = persona_only.clone().with_document_type("blog");
        let full = doc_and_persona.clone().with_jurisdiction("US");
        assert_eq!(ScopePredicate::any().specificity(), 0);
        assert_eq!(persona_only.specificity(), 1);
        assert_eq!(doc_and_persona.specificity(), 2);
        assert_eq!(full.specificity(), 3);
    }

    #[test]
    fn test_scope_matching_is_case_insensitive() {
        let scope = ScopePredicate::any().with_document_type("Contract");
        assert!(scope.matches(&metadata("contract", "legal", "US")));
        assert!(!scope.matches(&metadata("blog", "legal", "US")));
    }

    #[test]
    fn test_bound_field_requires_metadata() {
        let scope = ScopePredicate::any().with_persona("legal");
        assert!(!scope.matches(&ArtifactMetadata::default()));
        assert!(ScopePredicate::any().matches(&ArtifactMetadata::default()));
    }

    #[test]
    fn test_jurisdiction_hierarchy() {
        assert!(jurisdiction_covers("US-IL", "US-IL-CHICAGO"));
        assert!(jurisdiction_covers("us", "US-CA"));
        assert!(jurisdiction_covers("US-IL", "US-IL"));
        assert!(!jurisdiction_covers("US-IL", "US-ILX"));
        assert!(!jurisdiction_covers("US-IL-CHICAGO", "US-IL"));
    }

    #[test]
    fn test_access_level_predicate() {
        let scope = ScopePredicate::any().with_access_level(AccessLevel::Confidential);
        assert!(!scope.matches(&metadata("memo", "legal", "US")));
        let mut meta = metadata("memo", "legal", "US");
        meta.access_level = Some(AccessLevel::Confidential);
        assert!(scope.matches(&meta));
    }

    #[test]
    fn test_rule_id_parsing() {
        assert_eq!(parse_rule_id("core:voice:12"), Some(("core", "voice", 12)));
        assert_eq!(parse_rule_id("core:voice"), None);
        assert_eq!(parse_rule_id("core:voice:x"), None);
        assert_eq!(parse_rule_id("Core:voice:1"), None);
        assert_eq!(parse_rule_id("core:voice:1:2"), None);
    }

    #[test]
    fn test_scope_deserializes_single_value_or_list() {
        let scope: ScopePredicate =
            serde_json::from_str(r#"{"persona": "legal", "document-type": ["contract", "nda"]}"#)
                .unwrap();
        assert_eq!(scope.persona, vec!["legal"]);
        assert_eq!(scope.document_type, vec!["contract", "nda"]);
    }

    #[test]
    fn test_artifact_type_gates_without_adding_specificity() {
        let code_only = ScopePredicate::any().with_artifact_type(ArtifactKind::Code);
        assert_eq!(code_only.specificity(), 0);
        assert!(!code_only.is_unbound());
        assert!(!code_only.matches(&metadata("memo", "legal", "US")));

        let mut code = metadata("memo", "legal", "US");
        code.artifact_type = Some(ArtifactKind::Code);
        assert!(code_only.matches(&code));
        assert!(!code_only.matches(&ArtifactMetadata::default()));
    }

    #[test]
    fn test_content_hash_ignores_canon_name() {
        let rule = Rule {
            id: "team:voice:1".into(),
            category: Category::Voice,
            severity: Severity::Minor,
            scope: ScopePredicate::any(),
            requires: vec![],
            check: CheckSpec::new("pattern", serde_json::json!({ "literals": ["synergy"] })),
            message: "Plain words".into(),
            rationale: "Jargon".into(),
            priority: 0,
            exceptions: vec![],
            slot: None,
            canon: "/repo/a/team.toml".into(),
        };
        let moved = Rule {
            canon: "team".into(),
            ..rule.clone()
        };
        let edited = Rule {
            message: "Plainer words".into(),
            ..rule.clone()
        };
        assert_eq!(rule.content_hash(), moved.content_hash());
        assert_ne!(rule.content_hash(), edited.content_hash());
    }

    #[test]
    fn test_canonical_key_ignores_order_and_case() {
        let a = ScopePredicate::any()
            .with_document_type("NDA")
            .with_document_type("contract");
        let b = ScopePredicate::any()
            .with_document_type("contract")
            .with_document_type("nda");
        assert_eq!(a.canonical_key(), b.canonical_key());
    }
}
