//! Pattern checker: forbidden or required regexes, literals and oracle phrases

use canon_types::{Artifact, CheckResult, Evidence, Rule};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;

use super::{parameters, CheckContext, Checker};
use crate::error::CheckerError;
use crate::oracle::OracleSet;
use crate::patterns::{fenced_ranges, in_ranges};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum Mode {
    /// Any match fails the rule
    #[default]
    Forbid,
    /// Every listed pattern must match at least once
    Require,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PatternParams {
    #[serde(default)]
    mode: Mode,
    /// Regular expressions
    #[serde(default)]
    patterns: Vec<String>,
    /// Plain substrings
    #[serde(default)]
    literals: Vec<String>,
    /// Named phrase oracle whose phrases are treated as literals
    #[serde(default)]
    oracle: Option<String>,
    #[serde(default)]
    case_insensitive: bool,
    /// Wrap literals and oracle phrases in word boundaries
    #[serde(default)]
    whole_word: bool,
    /// Ignore matches inside fenced code blocks
    #[serde(default)]
    skip_code_blocks: bool,
    #[serde(default = "default_max_evidence")]
    max_evidence: usize,
}

fn default_max_evidence() -> usize {
    20
}

struct Compiled {
    label: String,
    regex: Regex,
}

pub struct PatternChecker {
    oracles: OracleSet,
}

impl PatternChecker {
    pub fn new(oracles: OracleSet) -> Self {
        Self { oracles }
    }

    fn compile(
        &self,
        params: &PatternParams,
        ctx: Option<&CheckContext>,
    ) -> Result<Vec<Compiled>, CheckerError> {
        let mut compiled = Vec::new();

        for pattern in &params.patterns {
            compiled.push(Compiled {
                label: pattern.clone(),
                regex: build(pattern, params.case_insensitive)?,
            });
        }

        let mut literals: Vec<String> = params.literals.clone();
        if let Some(name) = &params.oracle {
            let oracle = self.oracles.get(name).ok_or_else(|| {
                CheckerError::InvalidParameters(format!("unknown oracle '{name}'"))
            })?;
            if let Some(ctx) = ctx {
                let phrases = oracle
                    .lookup(ctx.as_of())
                    .map_err(|e| CheckerError::Failed(e.to_string()))?;
                literals.extend(phrases);
            }
        }

        for literal in literals.iter().filter(|l| !l.is_empty()) {
            let escaped = regex::escape(literal);
            let source = if params.whole_word {
                format!(r"\b{escaped}\b")
            } else {
                escaped
            };
            compiled.push(Compiled {
                label: literal.clone(),
                regex: build(&source, params.case_insensitive)?,
            });
        }

        Ok(compiled)
    }
}

fn build(pattern: &str, case_insensitive: bool) -> Result<Regex, CheckerError> {
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| CheckerError::InvalidParameters(format!("bad pattern '{pattern}': {e}")))
}

impl Checker for PatternChecker {
    fn kind(&self) -> &str {
        "pattern"
    }

    fn validate(&self, value: &serde_json::Value) -> Result<(), CheckerError> {
        let params: PatternParams = parameters(value)?;
        if params.patterns.is_empty() && params.literals.is_empty() && params.oracle.is_none() {
            return Err(CheckerError::InvalidParameters(
                "at least one of patterns, literals or oracle is required".into(),
            ));
        }
        if params.mode == Mode::Require && params.oracle.is_some() {
            return Err(CheckerError::InvalidParameters(
                "oracle phrases can only be forbidden".into(),
            ));
        }
        self.compile(&params, None).map(|_| ())
    }

    fn check(
        &self,
        artifact: &Artifact,
        rule: &Rule,
        ctx: &CheckContext,
    ) -> Result<CheckResult, CheckerError> {
        let params: PatternParams = parameters(&rule.check.parameters)?;
        let compiled = self.compile(&params, Some(ctx))?;
        let text = artifact.content.as_str();
        let skipped = if params.skip_code_blocks {
            fenced_ranges(text)
        } else {
            Vec::new()
        };

        match params.mode {
            Mode::Forbid => {
                let mut hits: Vec<(usize, usize, &str)> = Vec::new();
                for c in &compiled {
                    ctx.checkpoint()?;
                    hits.extend(
                        c.regex
                            .find_iter(text)
                            .filter(|m| !m.is_empty() && !in_ranges(&skipped, m.start()))
                            .map(|m| (m.start(), m.end(), c.label.as_str())),
                    );
                }
                if hits.is_empty() {
                    return Ok(CheckResult::pass(&rule.id, "No forbidden patterns found"));
                }

                hits.sort_by_key(|(start, end, _)| (*start, *end));
                hits.dedup_by_key(|(start, end, _)| (*start, *end));
                let total = hits.len();
                let mut evidence: Vec<Evidence> = hits
                    .iter()
                    .take(params.max_evidence.max(1))
                    .map(|(start, end, label)| {
                        Evidence::at(text, *start, *end).with_note(format!("matches '{label}'"))
                    })
                    .collect();
                if total > evidence.len() {
                    evidence.push(Evidence::note(format!(
                        "{} further matches omitted",
                        total - evidence.len()
                    )));
                }
                let plural = if total == 1 { "" } else { "es" };
                Ok(CheckResult::fail(
                    &rule.id,
                    format!("{} ({} match{})", rule.message, total, plural),
                    evidence,
                ))
            }
            Mode::Require => {
                let mut missing = Vec::new();
                for c in &compiled {
                    ctx.checkpoint()?;
                    let found = c
                        .regex
                        .find_iter(text)
                        .any(|m| !in_ranges(&skipped, m.start()));
                    if !found {
                        missing.push(Evidence::note(format!(
                            "required pattern '{}' not found",
                            c.label
                        )));
                    }
                }
                if missing.is_empty() {
                    Ok(CheckResult::pass(&rule.id, "All required patterns present"))
                } else {
                    Ok(CheckResult::fail(&rule.id, rule.message.clone(), missing))
                }
            }
        }
    }
}
