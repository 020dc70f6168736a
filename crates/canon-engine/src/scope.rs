//! Scope resolution: which rules apply to an artifact
//!
//! Rules sharing a `slot` compete. The most specific scope wins (count of bound
//! fields); ties fall to the higher `priority`. A tie that survives both is a
//! `ScopeConflict`, reported and never resolved silently.

use std::collections::BTreeMap;

use canon_types::{ArtifactMetadata, Rule};
use serde::{Deserialize, Serialize};

use crate::ruleset::RuleSet;

/// Two or more rules tied on specificity and priority within a slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScopeConflict {
    pub slot: String,
    pub rules: Vec<String>,
    pub specificity: u8,
    pub priority: i32,
}

impl std::fmt::Display for ScopeConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "scope conflict in slot '{}' between {} (specificity {}, priority {})",
            self.slot,
            self.rules.join(", "),
            self.specificity,
            self.priority
        )
    }
}

/// A rule whose scope matched but lost its slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superseded {
    pub rule_id: String,
    pub slot: String,
    /// Winning rule, or every tied rival when the slot is conflicted
    pub by: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Rules to evaluate, in RuleSet order
    pub applicable: Vec<Rule>,
    pub superseded: Vec<Superseded>,
    pub conflicts: Vec<ScopeConflict>,
}

impl Resolution {
    pub fn conflict_for(&self, rule_id: &str) -> Option<&ScopeConflict> {
        self.conflicts
            .iter()
            .find(|c| c.rules.iter().any(|r| r == rule_id))
    }

    pub fn superseded_for(&self, rule_id: &str) -> Option<&Superseded> {
        self.superseded.iter().find(|s| s.rule_id == rule_id)
    }

    pub fn is_applicable(&self, rule_id: &str) -> bool {
        self.applicable.iter().any(|r| r.id == rule_id)
    }
}

/// Resolve the applicable rules for `metadata`. Deterministic: depends only on its
/// inputs.
pub fn resolve(ruleset: &RuleSet, metadata: &ArtifactMetadata) -> Resolution {
    let matched: Vec<&Rule> = ruleset
        .rules()
        .iter()
        .filter(|r| r.applies_to(metadata))
        .collect();

    let mut slots: BTreeMap<&str, Vec<&Rule>> = BTreeMap::new();
    for rule in &matched {
        if let Some(slot) = rule.slot.as_deref() {
            slots.entry(slot).or_default().push(rule);
        }
    }

    let mut resolution = Resolution::default();
    let mut losers: BTreeMap<&str, Superseded> = BTreeMap::new();
    let mut conflicted: Vec<&str> = Vec::new();

    for (slot, contenders) in &slots {
        if contenders.len() < 2 {
            continue;
        }
        let best_specificity = contenders
            .iter()
            .map(|r| r.scope.specificity())
            .max()
            .unwrap_or(0);
        let best_priority = contenders
            .iter()
            .filter(|r| r.scope.specificity() == best_specificity)
            .map(|r| r.priority)
            .max()
            .unwrap_or(0);
        let winners: Vec<&str> = contenders
            .iter()
            .filter(|r| r.scope.specificity() == best_specificity && r.priority == best_priority)
            .map(|r| r.id.as_str())
            .collect();

        if winners.len() > 1 {
            resolution.conflicts.push(ScopeConflict {
                slot: slot.to_string(),
                rules: winners.iter().map(|s| s.to_string()).collect(),
                specificity: best_specificity,
                priority: best_priority,
            });
            conflicted.extend(winners.iter().copied());
        }

        for rule in contenders {
            if winners.contains(&rule.id.as_str()) {
                continue;
            }
            losers.insert(
                rule.id.as_str(),
                Superseded {
                    rule_id: rule.id.clone(),
                    slot: slot.to_string(),
                    by: winners.iter().map(|s| s.to_string()).collect(),
                },
            );
        }
    }

    for rule in matched {
        let id = rule.id.as_str();
        if let Some(lost) = losers.remove(id) {
            resolution.superseded.push(lost);
        } else if !conflicted.contains(&id) {
            resolution.applicable.push(rule.clone());
        }
    }

    resolution
}
