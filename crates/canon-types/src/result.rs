//! Per-rule check outcomes

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckStatus {
    Pass,
    Fail,
    Warn,
    NotApplicable,
    Error,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "pass",
            CheckStatus::Fail => "fail",
            CheckStatus::Warn => "warn",
            CheckStatus::NotApplicable => "not-applicable",
            CheckStatus::Error => "error",
        }
    }

    /// `fail` and `error` both count against the rule
    pub fn is_failure(&self) -> bool {
        matches!(self, CheckStatus::Fail | CheckStatus::Error)
    }
}

/// Location of a match inside the artifact content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// Byte offset of the first matched byte
    pub start: usize,
    /// Byte offset one past the match
    pub end: usize,
    /// 1-indexed line
    pub line: usize,
    /// 1-indexed column, counted in characters
    pub column: usize,
}

impl Span {
    /// Build a span for `text[start..end]`, computing line and column
    pub fn locate(text: &str, start: usize, end: usize) -> Self {
        let start = start.min(text.len());
        let prefix = text.get(..start).unwrap_or("");
        let line = prefix.matches('\n').count() + 1;
        let line_start = prefix.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let column = prefix[line_start..].chars().count() + 1;
        Self {
            start,
            end: end.max(start).min(text.len()),
            line,
            column,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Evidence {
    /// Evidence pointing at `text[start..end]`
    pub fn at(text: &str, start: usize, end: usize) -> Self {
        let span = Span::locate(text, start, end);
        Self {
            matched: text.get(span.start..span.end).map(str::to_string),
            span: Some(span),
            note: None,
        }
    }

    /// Evidence without a location
    pub fn note(note: impl Into<String>) -> Self {
        Self {
            span: None,
            matched: None,
            note: Some(note.into()),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Result of one rule against one artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CheckResult {
    pub rule_id: String,
    pub status: CheckStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<Evidence>,
    pub message: String,
}

impl CheckResult {
    pub fn new(
        rule_id: impl Into<String>,
        status: CheckStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            status,
            evidence: Vec::new(),
            message: message.into(),
        }
    }

    pub fn pass(rule_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(rule_id, CheckStatus::Pass, message)
    }

    pub fn fail(
        rule_id: impl Into<String>,
        message: impl Into<String>,
        evidence: Vec<Evidence>,
    ) -> Self {
        Self::new(rule_id, CheckStatus::Fail, message).with_evidence(evidence)
    }

    pub fn warn(rule_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(rule_id, CheckStatus::Warn, message)
    }

    pub fn not_applicable(rule_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(rule_id, CheckStatus::NotApplicable, message)
    }

    pub fn error(rule_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(rule_id, CheckStatus::Error, message)
    }

    pub fn with_evidence(mut self, evidence: Vec<Evidence>) -> Self {
        self.evidence = evidence;
        self
    }
}
