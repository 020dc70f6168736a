//! Checklist checker: `- [ ]` / `- [x]` completion

use canon_types::{Artifact, CheckResult, Evidence, Rule};
use serde::Deserialize;

use super::{parameters, CheckContext, Checker};
use crate::error::CheckerError;
use crate::patterns::{checklist_items, section_range, ChecklistItem};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ChecklistParams {
    /// Labels that must be present and checked (case-insensitive substring match)
    #[serde(default)]
    items: Vec<String>,
    /// Restrict to the body of this section
    #[serde(default)]
    section: Option<String>,
    /// Minimum number of checklist markers
    #[serde(default)]
    min_items: usize,
    /// Without `items`, every marker must be checked
    #[serde(default = "default_true")]
    require_all_checked: bool,
}

fn default_true() -> bool {
    true
}

pub struct ChecklistChecker;

impl Checker for ChecklistChecker {
    fn kind(&self) -> &str {
        "checklist"
    }

    fn validate(&self, value: &serde_json::Value) -> Result<(), CheckerError> {
        let params: ChecklistParams = parameters(value)?;
        if params.items.iter().any(|i| i.trim().is_empty()) {
            return Err(CheckerError::InvalidParameters("items must not be blank".into()));
        }
        Ok(())
    }

    fn check(
        &self,
        artifact: &Artifact,
        rule: &Rule,
        _ctx: &CheckContext,
    ) -> Result<CheckResult, CheckerError> {
        let params: ChecklistParams = parameters(&rule.check.parameters)?;
        let text = artifact.content.as_str();

        let (base, scoped) = match params.section.as_deref() {
            Some(section) => match section_range(text, section) {
                Some(range) => (range.start, &text[range]),
                None => {
                    return Ok(CheckResult::fail(
                        &rule.id,
                        rule.message.clone(),
                        vec![Evidence::note(format!("missing checklist section '{section}'"))],
                    ))
                }
            },
            None => (0, text),
        };

        let markers: Vec<ChecklistItem> = checklist_items(scoped)
            .into_iter()
            .map(|mut item| {
                item.start += base;
                item.end += base;
                item
            })
            .collect();

        if markers.is_empty() && params.items.is_empty() && params.min_items == 0 {
            return Ok(CheckResult::not_applicable(&rule.id, "No checklist present"));
        }

        let mut evidence = Vec::new();
        if markers.len() < params.min_items {
            evidence.push(Evidence::note(format!(
                "{} checklist items, minimum {}",
                markers.len(),
                params.min_items
            )));
        }

        if params.items.is_empty() {
            if params.require_all_checked {
                for item in markers.iter().filter(|i| !i.checked) {
                    evidence.push(
                        Evidence::at(text, item.start, item.end)
                            .with_note(format!("unchecked: {}", item.label)),
                    );
                }
            }
        } else {
            for required in &params.items {
                let needle = required.trim().to_lowercase();
                match markers.iter().find(|i| i.label.to_lowercase().contains(&needle)) {
                    Some(item) if item.checked => {}
                    Some(item) => evidence.push(
                        Evidence::at(text, item.start, item.end)
                            .with_note(format!("unchecked: {}", item.label)),
                    ),
                    None => evidence.push(Evidence::note(format!("missing item '{required}'"))),
                }
            }
        }

        if evidence.is_empty() {
            let checked = markers.iter().filter(|i| i.checked).count();
            Ok(CheckResult::pass(
                &rule.id,
                format!("{checked}/{} checklist items complete", markers.len()),
            ))
        } else {
            Ok(CheckResult::fail(&rule.id, rule.message.clone(), evidence))
        }
    }
}
