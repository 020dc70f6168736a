//! Reference checker: links must resolve
//!
//! In-document anchors resolve against heading slugs, reference-style links against
//! their definitions, and relative paths through a `TargetResolver`.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;

use canon_types::{Artifact, CheckResult, Evidence, Rule};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

use super::{parameters, CheckContext, Checker};
use crate::error::CheckerError;
use crate::patterns::{fenced_ranges, headings, in_ranges, slugify};

lazy_static! {
    /// Inline link or image: `[text](target "title")`
    static ref INLINE_LINK: Regex =
        Regex::new(r#"!?\[[^\]]*\]\(\s*<?([^)\s>]+)>?(?:\s+"[^"]*")?\s*\)"#).unwrap();

    /// Reference-style link: `[text][label]` or `[label][]`
    static ref REFERENCE_LINK: Regex = Regex::new(r"\[([^\]]+)\]\[([^\]]*)\]").unwrap();

    /// Reference definition: `[label]: target`
    static ref REFERENCE_DEF: Regex =
        Regex::new(r"(?m)^[ \t]{0,3}\[([^\]]+)\]:[ \t]*<?([^\s>]+)>?").unwrap();
}

/// Decides whether a non-anchor, non-external link target exists
pub trait TargetResolver: Send + Sync {
    /// `origin` is the artifact's source path, when known
    fn exists(&self, origin: Option<&Path>, target: &str) -> bool;
}

/// Resolves relative targets against the artifact's directory on disk
#[derive(Debug, Clone, Copy, Default)]
pub struct FsResolver;

impl TargetResolver for FsResolver {
    fn exists(&self, origin: Option<&Path>, target: &str) -> bool {
        let target = Path::new(target);
        if target.is_absolute() {
            return target.exists();
        }
        let base = origin
            .and_then(Path::parent)
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        base.join(target).exists()
    }
}

/// Fixed set of known targets, independent of any filesystem
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    known: BTreeSet<String>,
}

impl StaticResolver {
    pub fn new<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: targets.into_iter().map(Into::into).collect(),
        }
    }
}

impl TargetResolver for StaticResolver {
    fn exists(&self, _origin: Option<&Path>, target: &str) -> bool {
        self.known.contains(target.trim_start_matches("./"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ExternalPolicy {
    /// External URLs are not checked
    #[default]
    Ignore,
    /// External URLs produce a warning
    Warn,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ReferenceParams {
    #[serde(default)]
    external: ExternalPolicy,
    #[serde(default = "default_true")]
    check_anchors: bool,
    #[serde(default = "default_true")]
    check_files: bool,
}

fn default_true() -> bool {
    true
}

fn is_external(target: &str) -> bool {
    let lower = target.to_ascii_lowercase();
    ["http://", "https://", "mailto:", "ftp://", "tel:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}

pub struct ReferenceChecker {
    resolver: Arc<dyn TargetResolver>,
}

impl ReferenceChecker {
    pub fn new(resolver: Arc<dyn TargetResolver>) -> Self {
        Self { resolver }
    }
}

impl Checker for ReferenceChecker {
    fn kind(&self) -> &str {
        "reference"
    }

    fn validate(&self, value: &serde_json::Value) -> Result<(), CheckerError> {
        parameters::<ReferenceParams>(value).map(|_| ())
    }

    fn check(
        &self,
        artifact: &Artifact,
        rule: &Rule,
        ctx: &CheckContext,
    ) -> Result<CheckResult, CheckerError> {
        let params: ReferenceParams = parameters(&rule.check.parameters)?;
        let text = artifact.content.as_str();
        let code = fenced_ranges(text);

        let anchors: HashSet<String> = headings(text).iter().map(|h| slugify(&h.title)).collect();
        let definitions: HashSet<String> = REFERENCE_DEF
            .captures_iter(text)
            .filter(|c| c.get(0).is_some_and(|m| !in_ranges(&code, m.start())))
            .filter_map(|c| c.get(1).map(|m| m.as_str().trim().to_lowercase()))
            .collect();

        // (start, end, target) for every link target to resolve
        let mut targets: Vec<(usize, usize, String)> = Vec::new();
        for caps in INLINE_LINK.captures_iter(text) {
            if let (Some(whole), Some(target)) = (caps.get(0), caps.get(1)) {
                if !in_ranges(&code, whole.start()) {
                    targets.push((whole.start(), whole.end(), target.as_str().to_string()));
                }
            }
        }
        for caps in REFERENCE_DEF.captures_iter(text) {
            if let (Some(whole), Some(target)) = (caps.get(0), caps.get(2)) {
                if !in_ranges(&code, whole.start()) {
                    targets.push((whole.start(), whole.end(), target.as_str().to_string()));
                }
            }
        }

        let mut broken = Vec::new();
        let mut warnings = Vec::new();

        for caps in REFERENCE_LINK.captures_iter(text) {
            let (Some(whole), Some(text_label), Some(label)) =
                (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            if in_ranges(&code, whole.start()) {
                continue;
            }
            let label = if label.as_str().trim().is_empty() {
                text_label.as_str()
            } else {
                label.as_str()
            };
            if !definitions.contains(&label.trim().to_lowercase()) {
                broken.push(
                    Evidence::at(text, whole.start(), whole.end())
                        .with_note(format!("undefined reference label '{label}'")),
                );
            }
        }

        let checked = targets.len();
        targets.sort_by_key(|(start, _, _)| *start);
        for (start, end, target) in targets {
            ctx.checkpoint()?;
            if is_external(&target) {
                if params.external == ExternalPolicy::Warn {
                    warnings.push(
                        Evidence::at(text, start, end)
                            .with_note(format!("external link not verified: {target}")),
                    );
                }
                continue;
            }

            if let Some(anchor) = target.strip_prefix('#') {
                if params.check_anchors && !anchors.contains(&anchor.to_lowercase()) {
                    broken.push(
                        Evidence::at(text, start, end)
                            .with_note(format!("no heading for anchor '#{anchor}'")),
                    );
                }
                continue;
            }

            let path = target
                .split(['#', '?'])
                .next()
                .unwrap_or_default();
            if params.check_files
                && !path.is_empty()
                && !self.resolver.exists(artifact.origin.as_deref(), path)
            {
                broken.push(
                    Evidence::at(text, start, end).with_note(format!("target not found: {path}")),
                );
            }
        }

        if !broken.is_empty() {
            let count = broken.len();
            broken.extend(warnings);
            return Ok(CheckResult::fail(
                &rule.id,
                format!("{} ({count} broken)", rule.message),
                broken,
            ));
        }
        if !warnings.is_empty() {
            return Ok(CheckResult::warn(
                &rule.id,
                format!("{} external links not verified", warnings.len()),
            )
            .with_evidence(warnings));
        }
        Ok(CheckResult::pass(
            &rule.id,
            format!("{checked} references resolved"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{ctx, rule};
    use super::*;
    use canon_types::CheckStatus;
    use serde_json::json;

    fn checker() -> ReferenceChecker {
        ReferenceChecker::new(Arc::new(StaticResolver::new(["docs/setup.md", "img/logo.png"])))
    }

    fn run(content: &str, params: serde_json::Value) -> CheckResult {
        checker()
            .check(&Artifact::document(content), &rule("reference", params), &ctx())
            .unwrap()
    }

    #[test]
    fn test_resolvable_links_pass() {
        let doc = "# Getting Started\n\n\
                   See [setup](docs/setup.md#install), ![logo](./img/logo.png) \
                   and [above](#getting-started). Also [guide][g].\n\n[g]: docs/setup.md\n";
        let result = run(doc, json!({}));
        assert_eq!(result.status, CheckStatus::Pass, "{:?}", result.evidence);
    }

    #[test]
    fn test_missing_file_and_anchor() {
        let doc = "# Intro\n\n[a](docs/missing.md) and [b](#nowhere)\n";
        let result = run(doc, json!({}));
        assert_eq!(result.status, CheckStatus::Fail);
        let notes: Vec<&str> = result
            .evidence
            .iter()
            .filter_map(|e| e.note.as_deref())
            .collect();
        assert_eq!(
            notes,
            vec!["target not found: docs/missing.md", "no heading for anchor '#nowhere'"]
        );
    }

    #[test]
    fn test_undefined_reference_label() {
        let result = run("See [the docs][missing].\n", json!({}));
        assert_eq!(result.status, CheckStatus::Fail);
    }

    #[test]
    fn test_external_policy() {
        let doc = "[site](https://example.com)\n";
        assert_eq!(run(doc, json!({})).status, CheckStatus::Pass);
        assert_eq!(run(doc, json!({ "external": "warn" })).status, CheckStatus::Warn);
    }

    #[test]
    fn test_links_in_code_ignored() {
        let doc = "```\n[x](nope.md)\n```\n";
        assert_eq!(run(doc, json!({})).status, CheckStatus::Pass);
    }

    #[test]
    fn test_fs_resolver_uses_origin_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("other.md"), "x").unwrap();
        let origin = dir.path().join("doc.md");
        assert!(FsResolver.exists(Some(&origin), "other.md"));
        assert!(!FsResolver.exists(Some(&origin), "absent.md"));
    }
}
