//! Statistical checker: length distributions over sentences or paragraphs.
//!
//! Each bucket takes the items up to its `max-words` (exclusive of earlier buckets);
//! a final bucket without `max-words` takes the remainder. Shares are percentages and
//! a bucket passes when its share reaches `min-share` and stays within `max-share`.

use canon_types::{Artifact, CheckResult, Evidence, Rule};
use serde::Deserialize;

use super::{parameters, CheckContext, Checker};
use crate::error::CheckerError;
use crate::patterns::{prose_blocks, sentences};

/// Tolerance for percentage comparisons
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum Metric {
    /// Words per sentence
    #[default]
    SentenceLength,
    /// Sentences per paragraph
    ParagraphLength,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct Bucket {
    name: String,
    #[serde(default)]
    max_words: Option<usize>,
    #[serde(default)]
    min_share: f64,
    #[serde(default)]
    max_share: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct StatisticalParams {
    #[serde(default)]
    metric: Metric,
    buckets: Vec<Bucket>,
    /// Fewer items than this makes the rule not applicable
    #[serde(default = "default_min_items")]
    min_items: usize,
}

fn default_min_items() -> usize {
    1
}

impl StatisticalParams {
    fn check_shape(&self) -> Result<(), CheckerError> {
        let invalid = |msg: String| Err(CheckerError::InvalidParameters(msg));
        if self.buckets.is_empty() {
            return invalid("at least one bucket is required".into());
        }
        let mut previous: Option<usize> = None;
        for (i, bucket) in self.buckets.iter().enumerate() {
            match bucket.max_words {
                Some(max) => {
                    if previous.is_some_and(|p| max <= p) {
                        return invalid(format!("bucket '{}' max-words must increase", bucket.name));
                    }
                    previous = Some(max);
                }
                None if i + 1 != self.buckets.len() => {
                    return invalid(format!(
                        "only the last bucket may omit max-words ('{}')",
                        bucket.name
                    ));
                }
                None => {}
            }
            if !(0.0..=100.0).contains(&bucket.min_share)
                || bucket.max_share.is_some_and(|m| !(bucket.min_share..=100.0).contains(&m))
            {
                return invalid(format!("bucket '{}' shares must be within 0..=100", bucket.name));
            }
        }
        let floor: f64 = self.buckets.iter().map(|b| b.min_share).sum();
        if floor > 100.0 + EPSILON {
            return invalid(format!("minimum shares sum to {floor}%, above 100%"));
        }
        Ok(())
    }

    fn bucket_for(&self, size: usize) -> Option<usize> {
        self.buckets
            .iter()
            .position(|b| b.max_words.map_or(true, |max| size <= max))
    }
}

pub struct StatisticalChecker;

impl Checker for StatisticalChecker {
    fn kind(&self) -> &str {
        "statistical"
    }

    fn validate(&self, value: &serde_json::Value) -> Result<(), CheckerError> {
        parameters::<StatisticalParams>(value)?.check_shape()
    }

    fn check(
        &self,
        artifact: &Artifact,
        rule: &Rule,
        ctx: &CheckContext,
    ) -> Result<CheckResult, CheckerError> {
        let params: StatisticalParams = parameters(&rule.check.parameters)?;
        params.check_shape()?;
        let text = artifact.content.as_str();

        let sizes: Vec<usize> = match params.metric {
            Metric::SentenceLength => sentences(text).into_iter().map(|s| s.words).collect(),
            Metric::ParagraphLength => prose_blocks(text)
                .into_iter()
                .map(|block| sentences(&text[block]).len())
                .filter(|n| *n > 0)
                .collect(),
        };
        ctx.checkpoint()?;

        let total = sizes.len();
        if total < params.min_items.max(1) {
            return Ok(CheckResult::not_applicable(
                &rule.id,
                format!("Only {total} items to measure, need {}", params.min_items.max(1)),
            ));
        }

        let mut counts = vec![0usize; params.buckets.len()];
        let mut unbucketed = 0usize;
        for size in &sizes {
            match params.bucket_for(*size) {
                Some(i) => counts[i] += 1,
                None => unbucketed += 1,
            }
        }

        let mut evidence = Vec::new();
        let mut distribution = Vec::new();
        for (bucket, count) in params.buckets.iter().zip(&counts) {
            let share = *count as f64 * 100.0 / total as f64;
            distribution.push(format!("{} {:.1}%", bucket.name, share));
            if share + EPSILON < bucket.min_share {
                evidence.push(Evidence::note(format!(
                    "{}: {:.1}% ({} of {}), minimum {}%",
                    bucket.name, share, count, total, bucket.min_share
                )));
            }
            if let Some(max) = bucket.max_share.filter(|max| share > max + EPSILON) {
                evidence.push(Evidence::note(format!(
                    "{}: {:.1}% ({} of {}), maximum {}%",
                    bucket.name, share, count, total, max
                )));
            }
        }
        if unbucketed > 0 {
            distribution.push(format!("unbucketed {unbucketed}"));
        }

        let summary = distribution.join(", ");
        if evidence.is_empty() {
            Ok(CheckResult::pass(&rule.id, format!("Distribution ok: {summary}")))
        } else {
            Ok(CheckResult::fail(
                &rule.id,
                format!("{}: {summary}", rule.message),
                evidence,
            ))
        }
    }
}
