//! Human-approved exceptions and the principals allowed to grant them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::ArtifactMetadata;
use crate::rule::{Category, ScopePredicate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrincipalKind {
    Human,
    Automation,
}

/// Someone who may request overrides, with the categories they have authority over
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    pub kind: PrincipalKind,
    #[serde(default)]
    pub authorities: Vec<Category>,
}

impl Principal {
    pub fn human(name: impl Into<String>, authorities: &[Category]) -> Self {
        Self {
            name: name.into(),
            kind: PrincipalKind::Human,
            authorities: authorities.to_vec(),
        }
    }

    pub fn automation(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PrincipalKind::Automation,
            authorities: Vec::new(),
        }
    }

    /// Only humans holding authority over the category may override its rules
    pub fn can_override(&self, category: Category) -> bool {
        self.kind == PrincipalKind::Human && self.authorities.contains(&category)
    }
}

/// A time-bounded exception to one rule within one scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Override {
    pub id: Uuid,
    pub rule_id: String,
    pub scope: ScopePredicate,
    pub justification: String,
    pub approver: String,
    pub created_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
}

impl Override {
    pub fn new(
        rule_id: impl Into<String>,
        scope: ScopePredicate,
        justification: impl Into<String>,
        approver: impl Into<String>,
        created_at: DateTime<Utc>,
        expiry: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule_id: rule_id.into(),
            scope,
            justification: justification.into(),
            approver: approver.into(),
            created_at,
            expiry,
        }
    }

    /// Table key: `(rule-id, canonical scope)`
    pub fn key(&self) -> (String, String) {
        (self.rule_id.clone(), self.scope.canonical_key())
    }

    /// Valid until (exclusive) expiry
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        at < self.expiry
    }

    pub fn covers(&self, rule_id: &str, metadata: &ArtifactMetadata) -> bool {
        self.rule_id == rule_id && self.scope.matches(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_only_humans_with_authority_can_override() {
        let reviewer = Principal::human("dana", &[Category::Security]);
        assert!(reviewer.can_override(Category::Security));
        assert!(!reviewer.can_override(Category::Voice));
        assert!(!Principal::automation("ci-bot").can_override(Category::Security));
    }

    #[test]
    fn test_validity_window() {
        let now = Utc::now();
        let o = Override::new(
            "core:formatting:1",
            ScopePredicate::any(),
            "launch post",
            "dana",
            now,
            now + Duration::hours(1),
        );
        assert!(o.is_valid_at(now));
        assert!(o.is_valid_at(now + Duration::minutes(59)));
        assert!(!o.is_valid_at(now + Duration::hours(1)));
        assert!(!o.is_valid_at(now + Duration::days(2)));
    }
}
