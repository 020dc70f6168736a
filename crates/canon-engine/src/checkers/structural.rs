//! Structural checker: required markdown sections, optionally in order

use canon_types::{Artifact, CheckResult, Evidence, Rule};
use serde::Deserialize;

use super::{parameters, CheckContext, Checker};
use crate::error::CheckerError;
use crate::patterns::{headings, Heading};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct StructuralParams {
    sections: Vec<String>,
    #[serde(default = "default_ordered")]
    ordered: bool,
    /// Only headings at this level count (1 = `#`)
    #[serde(default)]
    level: Option<u8>,
}

fn default_ordered() -> bool {
    true
}

pub struct StructuralChecker;

impl Checker for StructuralChecker {
    fn kind(&self) -> &str {
        "structural"
    }

    fn validate(&self, value: &serde_json::Value) -> Result<(), CheckerError> {
        let params: StructuralParams = parameters(value)?;
        if params.sections.is_empty() {
            return Err(CheckerError::InvalidParameters("sections must not be empty".into()));
        }
        if params.level.is_some_and(|l| !(1..=6).contains(&l)) {
            return Err(CheckerError::InvalidParameters("level must be 1 to 6".into()));
        }
        Ok(())
    }

    fn check(
        &self,
        artifact: &Artifact,
        rule: &Rule,
        _ctx: &CheckContext,
    ) -> Result<CheckResult, CheckerError> {
        let params: StructuralParams = parameters(&rule.check.parameters)?;
        let text = artifact.content.as_str();
        let found: Vec<Heading> = headings(text)
            .into_iter()
            .filter(|h| params.level.map_or(true, |l| h.level == l))
            .collect();

        let mut evidence = Vec::new();
        let mut located: Vec<(&str, &Heading)> = Vec::new();
        for section in &params.sections {
            match found.iter().find(|h| h.title.eq_ignore_ascii_case(section.trim())) {
                Some(heading) => located.push((section.as_str(), heading)),
                None => evidence.push(Evidence::note(format!("missing section '{section}'"))),
            }
        }

        if params.ordered {
            for pair in located.windows(2) {
                let (prev_name, prev) = pair[0];
                let (name, heading) = pair[1];
                if heading.start < prev.start {
                    evidence.push(
                        Evidence::at(text, heading.start, heading.end)
                            .with_note(format!("section '{name}' appears before '{prev_name}'")),
                    );
                }
            }
        }

        if evidence.is_empty() {
            Ok(CheckResult::pass(
                &rule.id,
                format!("All {} required sections present", params.sections.len()),
            ))
        } else {
            Ok(CheckResult::fail(&rule.id, rule.message.clone(), evidence))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{ctx, rule};
    use super::*;
    use canon_types::CheckStatus;
    use serde_json::json;

    fn adr_params() -> serde_json::Value {
        json!({ "sections": ["Context", "Decision", "Consequences"] })
    }

    fn run(content: &str, params: serde_json::Value) -> CheckResult {
        StructuralChecker
            .check(&Artifact::document(content), &rule("structural", params), &ctx())
            .unwrap()
    }

    #[test]
    fn test_complete_adr_passes() {
        let adr = "# ADR 7\n\n## Context\nx\n\n## Decision\ny\n\n## Consequences\nz\n";
        assert_eq!(run(adr, adr_params()).status, CheckStatus::Pass);
    }

    #[test]
    fn test_missing_section() {
        let adr = "## Context\nx\n\n## Decision\ny\n";
        let result = run(adr, adr_params());
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(
            result.evidence[0].note.as_deref(),
            Some("missing section 'Consequences'")
        );
    }

    #[test]
    fn test_out_of_order() {
        let adr = "## Decision\ny\n\n## Context\nx\n\n## Consequences\nz\n";
        let result = run(adr, adr_params());
        assert_eq!(result.status, CheckStatus::Fail);
        let span = result.evidence[0].span.unwrap();
        assert_eq!(span.line, 1);
    }

    #[test]
    fn test_unordered_allows_any_order() {
        let adr = "## Decision\n## Context\n## Consequences\n";
        let params = json!({
            "sections": ["Context", "Decision", "Consequences"],
            "ordered": false
        });
        assert_eq!(run(adr, params).status, CheckStatus::Pass);
    }

    #[test]
    fn test_heading_in_code_block_does_not_count() {
        let adr = "## Context\n```\n## Decision\n```\n## Consequences\n";
        assert_eq!(run(adr, adr_params()).status, CheckStatus::Fail);
    }
}
