//! Engine configuration loaded from TOML
//!
//! Every section is optional; a missing file yields the defaults below.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use canon_types::{Category, Principal, PrincipalKind};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "CANON_CHECK_CONFIG";

/// Config file picked up from the working directory
pub const DEFAULT_CONFIG_FILE: &str = "canon-check.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub rules: RulesSection,
    #[serde(default)]
    pub principals: Vec<PrincipalConfig>,
    #[serde(default)]
    pub oracle: OracleSection,
}

impl EngineConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, the TOML is malformed, or a value
    /// is out of range.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.resolve_relative_paths(path.parent());
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config file: explicit path, then `CANON_CHECK_CONFIG`, then
    /// `./canon-check.toml`, else defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
            return Self::from_file(PathBuf::from(path));
        }
        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.is_file() {
            return Self::from_file(local);
        }
        Ok(Self::default())
    }

    fn resolve_relative_paths(&mut self, base: Option<&Path>) {
        let Some(base) = base.filter(|b| !b.as_os_str().is_empty()) else {
            return;
        };
        for source in &mut self.rules.sources {
            if source.is_relative() {
                *source = base.join(&*source);
            }
        }
        if let Some(dir) = self.storage.data_dir.as_mut().filter(|d| d.is_relative()) {
            *dir = base.join(&*dir);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.workers == Some(0) {
            return Err(ConfigError::Invalid("engine.workers must be at least 1".into()));
        }
        if self.engine.checker_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "engine.checker-timeout-ms must be positive".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max-attempts must be at least 1".into()));
        }
        let mut names: Vec<&str> = self.principals.iter().map(|p| p.name.as_str()).collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(ConfigError::Invalid(format!(
                "principal '{}' is declared twice",
                pair[0]
            )));
        }
        Ok(())
    }

    /// Worker count: configured, else available CPU cores
    pub fn workers(&self) -> usize {
        self.engine.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn checker_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.checker_timeout_ms)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.storage.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("canon-check")
        })
    }

    pub fn reports_path(&self) -> PathBuf {
        self.data_dir().join("reports.jsonl")
    }

    pub fn overrides_path(&self) -> PathBuf {
        self.data_dir().join("overrides.json")
    }

    /// Look up a declared principal by name
    pub fn principal(&self, name: &str) -> Option<Principal> {
        self.principals
            .iter()
            .find(|p| p.name == name)
            .map(PrincipalConfig::to_principal)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EngineSection {
    /// Concurrent checker tasks (default: CPU cores)
    #[serde(default)]
    pub workers: Option<usize>,
    /// Per-checker time limit (default: 2000)
    #[serde(default = "default_checker_timeout_ms")]
    pub checker_timeout_ms: u64,
    /// Reuse unchanged results from a prior report (default: true)
    #[serde(default = "default_true")]
    pub incremental: bool,
    /// Date passed to time-dependent oracles (default: evaluation date)
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            workers: None,
            checker_timeout_ms: default_checker_timeout_ms(),
            incremental: true,
            as_of: None,
        }
    }
}

fn default_checker_timeout_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageSection {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RulesSection {
    /// Rule source files or directories
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    /// Load the embedded core canon (default: true)
    #[serde(default = "default_true")]
    pub include_core: bool,
}

impl Default for RulesSection {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            include_core: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PrincipalConfig {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: PrincipalKind,
    #[serde(default)]
    pub authorities: Vec<Category>,
}

fn default_kind() -> PrincipalKind {
    PrincipalKind::Human
}

impl PrincipalConfig {
    pub fn to_principal(&self) -> Principal {
        Principal {
            name: self.name.clone(),
            kind: self.kind,
            authorities: self.authorities.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OracleSection {
    /// Pinned phrase list; replaces the built-in snapshot when non-empty
    #[serde(default)]
    pub snapshot: Vec<String>,
}
