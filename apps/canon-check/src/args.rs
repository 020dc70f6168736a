//! Conversions from command-line arguments to engine types

use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use canon_engine::OutputFormat;
use canon_types::{AccessLevel, Artifact, ArtifactKind, ArtifactMetadata, ScopePredicate};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use clap::Args;

/// Scope dimensions shared by `evaluate`, `override request` and `report history`
#[derive(Args, Debug, Clone, Default)]
pub struct ScopeArgs {
    #[arg(long)]
    pub persona: Option<String>,

    /// Jurisdiction code, e.g. US-IL
    #[arg(long)]
    pub jurisdiction: Option<String>,

    #[arg(long)]
    pub document_type: Option<String>,

    /// public, internal, restricted or confidential
    #[arg(long)]
    pub access_level: Option<String>,
}

impl ScopeArgs {
    pub fn metadata(&self) -> Result<ArtifactMetadata> {
        let mut metadata = ArtifactMetadata::new();
        if let Some(doc) = &self.document_type {
            metadata = metadata.document_type(doc);
        }
        if let Some(persona) = &self.persona {
            metadata = metadata.persona(persona);
        }
        if let Some(jurisdiction) = &self.jurisdiction {
            metadata = metadata.jurisdiction(jurisdiction);
        }
        if let Some(level) = self.access_level()? {
            metadata = metadata.access_level(level);
        }
        Ok(metadata)
    }

    /// Override scope: each given dimension binds, the rest stay open
    pub fn predicate(&self) -> Result<ScopePredicate> {
        let mut scope = ScopePredicate::any();
        if let Some(doc) = &self.document_type {
            scope = scope.with_document_type(doc);
        }
        if let Some(persona) = &self.persona {
            scope = scope.with_persona(persona);
        }
        if let Some(jurisdiction) = &self.jurisdiction {
            scope = scope.with_jurisdiction(jurisdiction);
        }
        if let Some(level) = self.access_level()? {
            scope = scope.with_access_level(level);
        }
        Ok(scope)
    }

    fn access_level(&self) -> Result<Option<AccessLevel>> {
        self.access_level
            .as_deref()
            .map(|s| AccessLevel::parse(s).ok_or_else(|| anyhow!("Unknown access level '{s}'")))
            .transpose()
    }
}

pub fn parse_format(s: &str) -> Result<OutputFormat, String> {
    OutputFormat::parse(s)
        .ok_or_else(|| format!("unknown format '{s}' (expected json, json-pretty or text)"))
}

/// Explicit `--kind`, else guessed from the file name
pub fn artifact_kind(path: &Path, explicit: Option<&str>) -> Result<ArtifactKind> {
    if let Some(kind) = explicit {
        return ArtifactKind::parse(kind).ok_or_else(|| anyhow!("Unknown artifact kind '{kind}'"));
    }
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    if name == "COMMIT_EDITMSG" {
        return Ok(ArtifactKind::Commit);
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    Ok(match ext.as_str() {
        "rs" | "py" | "js" | "ts" | "tsx" | "go" | "java" | "kt" | "c" | "h" | "cpp" | "rb"
        | "sh" => ArtifactKind::Code,
        _ => ArtifactKind::Document,
    })
}

/// Read the artifact at `path` (`-` for stdin)
pub fn read_artifact(path: &Path, kind: Option<&str>, scope: &ScopeArgs) -> Result<Artifact> {
    let content = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read artifact from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read artifact {}", path.display()))?
    };

    let mut artifact =
        Artifact::new(content, artifact_kind(path, kind)?).with_metadata(scope.metadata()?);
    if path != Path::new("-") {
        artifact = artifact.with_origin(path);
    }
    Ok(artifact)
}

/// Override expiry from `--expires` or `--days`; a bare date means midnight UTC
pub fn expiry(
    expires: Option<&str>,
    days: Option<i64>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    match (expires, days) {
        (Some(s), _) => {
            if let Ok(at) = DateTime::parse_from_rfc3339(s) {
                return Ok(at.with_timezone(&Utc));
            }
            let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| {
                format!("Invalid expiry '{s}' (expected RFC 3339 or YYYY-MM-DD)")
            })?;
            Ok(date.and_time(NaiveTime::MIN).and_utc())
        }
        (None, Some(days)) if days > 0 => Ok(now + Duration::days(days)),
        (None, Some(days)) => bail!("--days must be positive, got {days}"),
        (None, None) => bail!("An override needs an expiry: pass --expires or --days"),
    }
}
