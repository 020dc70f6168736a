//! canon-check
//!
//! Command-line gate over the canon engine. Reports go to stdout, logs to stderr.
//!
//! ## Exit codes
//!
//! - `0`: PASS
//! - `1`: WARN (`2` with `--strict`)
//! - `2`: FAIL
//! - `3`: operational error (bad config, schema error, unknown ruleset, storage)

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod args;
mod commands;

use args::ScopeArgs;
use canon_engine::OutputFormat;

/// Exit code for anything that kept the gate from producing a verdict
const OPERATIONAL_ERROR: u8 = 3;

#[derive(Parser, Debug)]
#[command(name = "canon-check")]
#[command(version, about = "Evaluate artifacts against versioned rule canons")]
pub struct Cli {
    /// Config file (default: $CANON_CHECK_CONFIG, then ./canon-check.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the report log and override table
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluate a file (or `-` for stdin) and exit with the gate verdict
    Evaluate(EvaluateArgs),

    /// Inspect the configured RuleSet
    #[command(subcommand)]
    Ruleset(RulesetCommand),

    /// Request and list overrides
    #[command(subcommand)]
    Override(OverrideCommand),

    /// Query and verify the audit report log
    #[command(subcommand)]
    Report(ReportCommand),
}

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Artifact to evaluate
    pub path: PathBuf,

    /// RuleSet version: `current`, the full hash, or a hex prefix
    #[arg(long)]
    pub ruleset: Option<String>,

    #[command(flatten)]
    pub scope: ScopeArgs,

    /// Artifact kind: document, code or commit (default: from the file name)
    #[arg(long)]
    pub kind: Option<String>,

    /// Output format
    #[arg(long, default_value = "text", value_parser = args::parse_format)]
    pub format: OutputFormat,

    /// Treat WARN as a failing exit
    #[arg(long)]
    pub strict: bool,

    /// Concurrent checker tasks
    #[arg(long)]
    pub workers: Option<usize>,

    /// Re-run every rule instead of carrying forward unchanged results
    #[arg(long)]
    pub no_incremental: bool,
}

#[derive(Subcommand, Debug)]
pub enum RulesetCommand {
    /// Print the RuleSet version and its rules
    Show {
        #[arg(long)]
        ruleset: Option<String>,

        /// Only rules in this category (repeatable)
        #[arg(long)]
        category: Vec<String>,

        /// Only rules at or above this severity
        #[arg(long)]
        min_severity: Option<String>,

        /// Only rules whose id starts with this prefix
        #[arg(long)]
        prefix: Option<String>,

        #[arg(long, default_value = "text", value_parser = args::parse_format)]
        format: OutputFormat,
    },
}

#[derive(Subcommand, Debug)]
pub enum OverrideCommand {
    /// Approve an override for one rule within a scope
    Request {
        #[arg(long)]
        rule: String,

        /// Name of a human principal declared in the config
        #[arg(long)]
        approver: String,

        #[arg(long)]
        justification: String,

        /// Expiry as RFC 3339 or YYYY-MM-DD
        #[arg(long, conflicts_with = "days")]
        expires: Option<String>,

        /// Expiry as a number of days from now
        #[arg(long)]
        days: Option<i64>,

        /// RuleSet the rule must exist in
        #[arg(long)]
        ruleset: Option<String>,

        #[command(flatten)]
        scope: ScopeArgs,

        #[arg(long, default_value = "text", value_parser = args::parse_format)]
        format: OutputFormat,
    },

    /// List overrides in the table
    List {
        #[arg(long, default_value = "text", value_parser = args::parse_format)]
        format: OutputFormat,
    },
}

#[derive(Subcommand, Debug)]
pub enum ReportCommand {
    /// Reports stored for an artifact, oldest first
    History {
        path: PathBuf,

        #[command(flatten)]
        scope: ScopeArgs,

        #[arg(long)]
        kind: Option<String>,

        #[arg(long, default_value = "text", value_parser = args::parse_format)]
        format: OutputFormat,
    },

    /// Check sequence numbers and hash links of the report log
    Verify,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut stdout = std::io::stdout().lock();
    match commands::run(cli, &mut stdout).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(OPERATIONAL_ERROR)
        }
    }
}
