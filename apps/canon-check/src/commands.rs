//! Subcommand handlers. Each writes its output to `out` and returns the process exit code.

use std::io::Write;

use anyhow::{anyhow, Context, Result};
use canon_engine::{CanonEngine, EngineConfig, OutputFormat, OverrideRequest, Renderer, RuleFilter};
use canon_types::{AuditReport, Category, Override, Rule, ScopePredicate, Severity};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::args::{self, ScopeArgs};
use crate::{Cli, Command, EvaluateArgs, OverrideCommand, ReportCommand, RulesetCommand};

pub async fn run(cli: Cli, out: &mut impl Write) -> Result<u8> {
    let mut config =
        EngineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = Some(dir);
    }

    match cli.command {
        Command::Evaluate(args) => evaluate(config, args, out).await,
        Command::Ruleset(RulesetCommand::Show {
            ruleset,
            category,
            min_severity,
            prefix,
            format,
        }) => {
            let filter = rule_filter(&category, min_severity.as_deref(), prefix)?;
            show_ruleset(config, ruleset.as_deref(), &filter, format, out).await
        }
        Command::Override(OverrideCommand::Request {
            rule,
            approver,
            justification,
            expires,
            days,
            ruleset,
            scope,
            format,
        }) => {
            let approver = config.principal(&approver).ok_or_else(|| {
                anyhow!("Unknown principal '{approver}': declare it under [[principals]]")
            })?;
            let request = OverrideRequest {
                rule_id: rule,
                scope: scope.predicate()?,
                justification,
                approver,
                expiry: args::expiry(expires.as_deref(), days, Utc::now())?,
            };
            request_override(config, ruleset.as_deref(), request, format, out).await
        }
        Command::Override(OverrideCommand::List { format }) => {
            list_overrides(config, format, out).await
        }
        Command::Report(ReportCommand::History {
            path,
            scope,
            kind,
            format,
        }) => report_history(config, &path, kind.as_deref(), &scope, format, out).await,
        Command::Report(ReportCommand::Verify) => verify_reports(config, out).await,
    }
}

async fn evaluate(
    mut config: EngineConfig,
    args: EvaluateArgs,
    out: &mut impl Write,
) -> Result<u8> {
    if args.workers.is_some() {
        config.engine.workers = args.workers;
    }
    if args.no_incremental {
        config.engine.incremental = false;
    }
    config.validate()?;

    let artifact = args::read_artifact(&args.path, args.kind.as_deref(), &args.scope)?;
    let engine = open(config).await?;
    let ruleset = engine.load_ruleset(args.ruleset.as_deref()).await?;
    debug!(path = %args.path.display(), kind = artifact.kind.as_str(), "Evaluating artifact");

    let outcome = engine.evaluate(&ruleset, &artifact).await?;
    emit(out, &Renderer::new(args.format).render(&outcome)?)?;

    let code = outcome.exit_code(args.strict);
    info!(verdict = %outcome.gate_verdict(), code, "Evaluation complete");
    Ok(u8::try_from(code)?)
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct RulesetListing<'a> {
    version: &'a str,
    canons: &'a [String],
    rules: Vec<&'a Rule>,
}

fn rule_filter(
    categories: &[String],
    min_severity: Option<&str>,
    prefix: Option<String>,
) -> Result<RuleFilter> {
    let mut filter = RuleFilter::all();
    for name in categories {
        let category = Category::parse(name).ok_or_else(|| anyhow!("Unknown category '{name}'"))?;
        filter = filter.category(category);
    }
    if let Some(name) = min_severity {
        let severity = Severity::parse(name).ok_or_else(|| anyhow!("Unknown severity '{name}'"))?;
        filter = filter.min_severity(severity);
    }
    if let Some(prefix) = prefix {
        filter = filter.id_prefix(prefix);
    }
    Ok(filter)
}

async fn show_ruleset(
    config: EngineConfig,
    requested: Option<&str>,
    filter: &RuleFilter,
    format: OutputFormat,
    out: &mut impl Write,
) -> Result<u8> {
    let engine = open(config).await?;
    let ruleset = engine.load_ruleset(requested).await?;
    let rules = ruleset.get_rules(filter);

    match format {
        OutputFormat::Text => {
            writeln!(out, "Ruleset:  {}", ruleset.version())?;
            writeln!(out, "Canons:   {}", ruleset.canons().join(", "))?;
            writeln!(out, "Rules:    {} of {}", rules.len(), ruleset.len())?;
            writeln!(out)?;
            for rule in rules {
                writeln!(
                    out,
                    "{:<24} {:<8} {:<11} {:<11} {}",
                    rule.id,
                    rule.severity.as_str(),
                    rule.category.as_str(),
                    rule.check.check_type,
                    rule.message
                )?;
            }
        }
        json => {
            let listing = RulesetListing {
                version: ruleset.version(),
                canons: ruleset.canons(),
                rules,
            };
            emit(out, &to_json(&listing, json)?)?;
        }
    }
    Ok(0)
}

async fn request_override(
    config: EngineConfig,
    requested: Option<&str>,
    request: OverrideRequest,
    format: OutputFormat,
    out: &mut impl Write,
) -> Result<u8> {
    let engine = open(config).await?;
    let ruleset = engine.load_ruleset(requested).await?;
    let record = engine.request_override(&ruleset, request).await?;

    match format {
        OutputFormat::Text => writeln!(
            out,
            "Override {} approved for {} by {} until {}",
            record.id,
            record.rule_id,
            record.approver,
            record.expiry.to_rfc3339()
        )?,
        json => emit(out, &to_json(&record, json)?)?,
    }
    Ok(0)
}

async fn list_overrides(
    config: EngineConfig,
    format: OutputFormat,
    out: &mut impl Write,
) -> Result<u8> {
    let engine = open(config).await?;
    let records = engine.overrides();

    match format {
        OutputFormat::Text => {
            if records.is_empty() {
                writeln!(out, "No overrides")?;
            }
            let now = Utc::now();
            for record in &records {
                writeln!(out, "{}", describe_override(record, record.is_valid_at(now)))?;
            }
        }
        json => emit(out, &to_json(&records, json)?)?,
    }
    Ok(0)
}

fn describe_override(record: &Override, active: bool) -> String {
    format!(
        "{} [{}] by {} until {} ({}): {}",
        record.rule_id,
        describe_scope(&record.scope),
        record.approver,
        record.expiry.to_rfc3339(),
        if active { "active" } else { "expired" },
        record.justification
    )
}

fn describe_scope(scope: &ScopePredicate) -> String {
    if scope.is_unbound() {
        "any".to_string()
    } else {
        scope.canonical_key()
    }
}

async fn report_history(
    config: EngineConfig,
    path: &std::path::Path,
    kind: Option<&str>,
    scope: &ScopeArgs,
    format: OutputFormat,
    out: &mut impl Write,
) -> Result<u8> {
    let artifact = args::read_artifact(path, kind, scope)?;
    let fingerprint = artifact.fingerprint();
    let engine = open(config).await?;
    let reports = engine.reports().history(&fingerprint)?;

    match format {
        OutputFormat::Text => {
            if reports.is_empty() {
                let short = fingerprint.get(..12).unwrap_or(fingerprint.as_str());
                writeln!(out, "No reports for artifact {short}")?;
            }
            for report in &reports {
                writeln!(out, "{}", history_line(report))?;
            }
        }
        json => emit(out, &to_json(&reports, json)?)?,
    }
    Ok(0)
}

fn history_line(report: &AuditReport) -> String {
    let version = report.ruleset_version();
    format!(
        "{}  {:<4}  ruleset {}  report {}",
        report.timestamp().to_rfc3339(),
        report.verdict(),
        version.get(..12).unwrap_or(version),
        report.report_id()
    )
}

async fn verify_reports(config: EngineConfig, out: &mut impl Write) -> Result<u8> {
    let engine = open(config).await?;
    let count = engine
        .reports()
        .verify()
        .context("Report log failed verification")?;
    writeln!(out, "Report log intact: {count} records")?;
    Ok(0)
}

async fn open(config: EngineConfig) -> Result<CanonEngine> {
    CanonEngine::from_config(config)
        .await
        .context("Failed to open engine storage")
}

fn to_json<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::JsonPretty => serde_json::to_string_pretty(value)?,
        _ => serde_json::to_string(value)?,
    })
}

fn emit(out: &mut impl Write, rendered: &str) -> Result<()> {
    out.write_all(rendered.as_bytes())?;
    if !rendered.ends_with('\n') {
        writeln!(out)?;
    }
    Ok(())
}
