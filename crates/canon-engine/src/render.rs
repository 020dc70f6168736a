//! Report rendering
//!
//! - **Json**: machine-readable, for CI integration
//! - **JsonPretty**: indented JSON
//! - **Text**: human-readable summary with per-rule evidence

use std::fmt::Write;

use anyhow::Result;
use canon_types::{AuditReport, CheckStatus, Disposition, ReportEntry, Verdict};
use serde::Serialize;

use crate::orchestrator::{EvaluationOutcome, Persistence};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    JsonPretty,
    #[default]
    Text,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "json-pretty" | "pretty" => Some(Self::JsonPretty),
            "text" | "console" => Some(Self::Text),
            _ => None,
        }
    }
}

/// JSON document written for an evaluation
#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct Envelope<'a> {
    gate_verdict: Verdict,
    persistence: &'a Persistence,
    report: &'a AuditReport,
}

pub struct Renderer {
    format: OutputFormat,
}

impl Renderer {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn render(&self, outcome: &EvaluationOutcome) -> Result<String> {
        match self.format {
            OutputFormat::Json => Ok(serde_json::to_string(&envelope(outcome))?),
            OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(&envelope(outcome))?),
            OutputFormat::Text => TextRenderer::format(outcome),
        }
    }

    /// Render a stored report on its own, as in history listings
    pub fn render_report(&self, report: &AuditReport) -> Result<String> {
        match self.format {
            OutputFormat::Json => Ok(serde_json::to_string(report)?),
            OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(report)?),
            OutputFormat::Text => TextRenderer::format_report(report),
        }
    }
}

fn envelope(outcome: &EvaluationOutcome) -> Envelope<'_> {
    Envelope {
        gate_verdict: outcome.gate_verdict(),
        persistence: &outcome.persistence,
        report: &outcome.report,
    }
}

pub struct TextRenderer;

impl TextRenderer {
    pub fn format(outcome: &EvaluationOutcome) -> Result<String> {
        let mut output = Self::format_report(&outcome.report)?;
        match &outcome.persistence {
            Persistence::Persisted { sequence } => {
                writeln!(output, "Stored:   log sequence {sequence}")?;
            }
            Persistence::Unpersisted { reason } => {
                writeln!(output, "Stored:   NO ({reason})")?;
                if outcome.gate_verdict() != outcome.report.verdict() {
                    writeln!(
                        output,
                        "Gate:     {} (unpersisted report with an absolute failure)",
                        outcome.gate_verdict()
                    )?;
                }
            }
        }
        Ok(output)
    }

    pub fn format_report(report: &AuditReport) -> Result<String> {
        let mut output = String::new();

        writeln!(output, "Verdict:  {}", report.verdict())?;
        writeln!(output, "Report:   {}", report.report_id())?;
        writeln!(output, "Ruleset:  {}", short(report.ruleset_version()))?;
        writeln!(output, "Artifact: {}", short(report.artifact_fingerprint()))?;
        writeln!(output, "Time:     {}", report.timestamp().to_rfc3339())?;
        if let Some(previous) = report.previous_report() {
            writeln!(output, "Previous: {previous}")?;
        }
        writeln!(output)?;

        for entry in report.entries() {
            Self::format_entry(&mut output, entry)?;
        }

        let summary = report.summary();
        let counts: Vec<String> = summary
            .by_status
            .iter()
            .map(|(status, n)| format!("{n} {status}"))
            .collect();
        writeln!(output)?;
        writeln!(
            output,
            "Summary:  {} rules ({}); {} overridden, {} conflicted, {} carried forward",
            summary.total,
            counts.join(", "),
            summary.overridden,
            summary.conflicts,
            summary.carried_forward
        )?;
        Ok(output)
    }

    fn format_entry(output: &mut String, entry: &ReportEntry) -> Result<()> {
        let result = &entry.result;
        let symbol = match (entry.disposition, result.status) {
            (Disposition::Excluded, _) => "-",
            (_, CheckStatus::Pass) => "✓",
            (Disposition::Failed, _) => "✗",
            (Disposition::Noted, _) => "·",
            _ => "!",
        };
        writeln!(
            output,
            "{symbol} {:<5} {:<28} [{}] {}",
            result.status.as_str().to_uppercase(),
            result.rule_id,
            entry.severity.as_str(),
            result.message
        )?;

        if let (Some(status), Some(provenance)) = (entry.override_status, &entry.provenance) {
            writeln!(
                output,
                "      {} by {} until {}: {}",
                status.as_str(),
                provenance.approver,
                provenance.expiry.to_rfc3339(),
                provenance.justification
            )?;
        }
        if !entry.conflict_with.is_empty() {
            writeln!(output, "      conflicts with {}", entry.conflict_with.join(", "))?;
        }
        if entry.carried_forward {
            writeln!(output, "      carried forward from the previous report")?;
        }

        for evidence in &result.evidence {
            let location = evidence
                .span
                .map(|s| format!("line {}, col {}", s.line, s.column));
            let line = match (location, &evidence.note, &evidence.matched) {
                (Some(loc), Some(note), _) => format!("{loc}: {note}"),
                (Some(loc), None, Some(matched)) => format!("{loc}: {matched:?}"),
                (Some(loc), None, None) => loc,
                (None, Some(note), _) => note.clone(),
                (None, None, Some(matched)) => format!("{matched:?}"),
                (None, None, None) => continue,
            };
            writeln!(output, "      {line}")?;
        }
        Ok(())
    }
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
