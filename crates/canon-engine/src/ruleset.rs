//! Immutable, versioned rule collections

use std::collections::HashMap;
use std::sync::Arc;

use canon_types::{sha256_hex, Category, Rule, Severity};

/// Selects a subset of rules for `get_rules`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleFilter {
    pub categories: Vec<Category>,
    pub min_severity: Option<Severity>,
    pub id_prefix: Option<String>,
}

impl RuleFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn category(mut self, category: Category) -> Self {
        self.categories.push(category);
        self
    }

    pub fn min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    pub fn id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = Some(prefix.into());
        self
    }

    pub fn matches(&self, rule: &Rule) -> bool {
        (self.categories.is_empty() || self.categories.contains(&rule.category))
            && self.min_severity.map_or(true, |min| rule.severity >= min)
            && self
                .id_prefix
                .as_deref()
                .map_or(true, |prefix| rule.id.starts_with(prefix))
    }
}

#[derive(Debug)]
struct Inner {
    version: String,
    canons: Vec<String>,
    rules: Vec<Rule>,
    index: HashMap<String, usize>,
    hashes: Vec<String>,
    depths: Vec<usize>,
}

/// A validated, immutable rule collection identified by a content hash. Cloning shares
/// the underlying rules; an in-flight evaluation keeps the RuleSet it started with.
#[derive(Debug, Clone)]
pub struct RuleSet {
    inner: Arc<Inner>,
}

impl RuleSet {
    /// Build from already-validated rules and their dependency depths
    pub(crate) fn new(mut rules: Vec<Rule>, depths: &HashMap<String, usize>) -> Self {
        rules.sort_by(|a, b| {
            a.category
                .cmp(&b.category)
                .then(b.severity.cmp(&a.severity))
                .then(a.id.cmp(&b.id))
        });

        let hashes: Vec<String> = rules.iter().map(Rule::content_hash).collect();

        let mut by_id: Vec<(&str, &str)> = rules
            .iter()
            .zip(&hashes)
            .map(|(r, h)| (r.id.as_str(), h.as_str()))
            .collect();
        by_id.sort_unstable();
        let mut manifest = String::new();
        for (id, hash) in by_id {
            manifest.push_str(id);
            manifest.push('=');
            manifest.push_str(hash);
            manifest.push('\n');
        }
        let version = sha256_hex(manifest.as_bytes());

        let mut canons: Vec<String> = rules.iter().map(|r| r.canon.clone()).collect();
        canons.sort();
        canons.dedup();

        let index = rules
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();
        let depths = rules
            .iter()
            .map(|r| depths.get(&r.id).copied().unwrap_or(0))
            .collect();

        Self {
            inner: Arc::new(Inner {
                version,
                canons,
                rules,
                index,
                hashes,
                depths,
            }),
        }
    }

    /// Content hash over every rule definition
    pub fn version(&self) -> &str {
        &self.inner.version
    }

    /// First 12 hex characters of the version, for display
    pub fn short_version(&self) -> &str {
        &self.inner.version[..12]
    }

    /// Names of the canons contributing rules
    pub fn canons(&self) -> &[String] {
        &self.inner.canons
    }

    /// All rules ordered by category, severity (descending), then id
    pub fn rules(&self) -> &[Rule] {
        &self.inner.rules
    }

    pub fn len(&self) -> usize {
        self.inner.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.rules.is_empty()
    }

    pub fn rule(&self, id: &str) -> Option<&Rule> {
        self.inner.index.get(id).map(|&i| &self.inner.rules[i])
    }

    /// Content hash of one rule definition
    pub fn rule_hash(&self, id: &str) -> Option<&str> {
        self.inner.index.get(id).map(|&i| self.inner.hashes[i].as_str())
    }

    /// Position in the dependency DAG; 0 for rules with no dependencies
    pub fn depth(&self, id: &str) -> usize {
        self.inner
            .index
            .get(id)
            .map(|&i| self.inner.depths[i])
            .unwrap_or(0)
    }

    /// Position of a rule in the canonical ordering
    pub fn position(&self, id: &str) -> Option<usize> {
        self.inner.index.get(id).copied()
    }

    /// Rules matching the filter, in canonical order
    pub fn get_rules(&self, filter: &RuleFilter) -> Vec<&Rule> {
        self.inner.rules.iter().filter(|r| filter.matches(r)).collect()
    }

    /// Whether `requested` names this RuleSet: `current`, the full version, or a
    /// hex prefix of at least four characters
    pub fn matches_version(&self, requested: &str) -> bool {
        let requested = requested.trim().to_ascii_lowercase();
        requested == "current"
            || requested == self.inner.version
            || (requested.len() >= 4
                && requested.chars().all(|c| c.is_ascii_hexdigit())
                && self.inner.version.starts_with(&requested))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canon_types::{CheckSpec, ScopePredicate};

    fn rule(id: &str, category: Category, severity: Severity) -> Rule {
        Rule {
            id: id.to_string(),
            category,
            severity,
            scope: ScopePredicate::any(),
            requires: vec![],
            check: CheckSpec::new("pattern", serde_json::json!({})),
            message: "m".into(),
            rationale: "r".into(),
            priority: 0,
            exceptions: vec![],
            slot: None,
            canon: "test".into(),
        }
    }

    fn sample() -> Vec<Rule> {
        vec![
            rule("t:voice:2", Category::Voice, Severity::Minor),
            rule("t:fmt:1", Category::Formatting, Severity::Major),
            rule("t:voice:1", Category::Voice, Severity::Minor),
            rule("t:fmt:2", Category::Formatting, Severity::Absolute),
            rule("t:sec:1", Category::Security, Severity::Absolute),
        ]
    }

    #[test]
    fn test_canonical_ordering() {
        let set = RuleSet::new(sample(), &HashMap::new());
        let ids: Vec<&str> = set.rules().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["t:fmt:2", "t:fmt:1", "t:voice:1", "t:voice:2", "t:sec:1"]);
    }

    #[test]
    fn test_version_independent_of_input_order() {
        let mut reversed = sample();
        reversed.reverse();
        let a = RuleSet::new(sample(), &HashMap::new());
        let b = RuleSet::new(reversed, &HashMap::new());
        assert_eq!(a.version(), b.version());
    }

    #[test]
    fn test_version_changes_with_content() {
        let a = RuleSet::new(sample(), &HashMap::new());
        let mut changed = sample();
        changed[0].message = "different".into();
        let b = RuleSet::new(changed, &HashMap::new());
        assert_ne!(a.version(), b.version());
        assert_eq!(a.rule_hash("t:fmt:1"), b.rule_hash("t:fmt:1"));
        assert_ne!(a.rule_hash("t:voice:2"), b.rule_hash("t:voice:2"));
    }

    #[test]
    fn test_filter() {
        let set = RuleSet::new(sample(), &HashMap::new());
        let filter = RuleFilter::all().min_severity(Severity::Major);
        assert_eq!(set.get_rules(&filter).len(), 3);
        let filter = RuleFilter::all().category(Category::Voice).id_prefix("t:voice:2");
        let found = set.get_rules(&filter);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "t:voice:2");
    }

    #[test]
    fn test_matches_version() {
        let set = RuleSet::new(sample(), &HashMap::new());
        let version = set.version().to_string();
        assert!(set.matches_version("current"));
        assert!(set.matches_version(&version));
        assert!(set.matches_version(&version[..8]));
        assert!(!set.matches_version(&version[..3]));
        assert!(!set.matches_version("zzzz"));
    }
}
