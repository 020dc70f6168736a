//! Override Store: human-approved, time-bounded exceptions
//!
//! Writes are serialized through a single writer lock and persisted before the
//! in-memory table is swapped. Readers take an `OverrideSnapshot`, which never
//! changes under them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use canon_types::{ArtifactMetadata, Override, Principal, ScopePredicate};
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::error::{OverrideError, StorageError};
use crate::retry::{retry_io, RetryPolicy};
use crate::ruleset::RuleSet;

/// Durable home of the override records
pub trait OverrideBackend: Send + Sync {
    fn load(&self) -> Result<Vec<Override>, StorageError>;
    fn save(&self, records: &[Override]) -> Result<(), StorageError>;
}

/// Keeps records in memory only
#[derive(Debug, Default)]
pub struct MemoryOverrideBackend {
    records: Mutex<Vec<Override>>,
}

impl OverrideBackend for MemoryOverrideBackend {
    fn load(&self) -> Result<Vec<Override>, StorageError> {
        Ok(self.records.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, records: &[Override]) -> Result<(), StorageError> {
        *self.records.lock().unwrap_or_else(|e| e.into_inner()) = records.to_vec();
        Ok(())
    }
}

/// JSON file holding every record ever approved, superseded ones included
#[derive(Debug, Clone)]
pub struct JsonOverrideBackend {
    path: PathBuf,
}

impl JsonOverrideBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OverrideBackend for JsonOverrideBackend {
    fn load(&self) -> Result<Vec<Override>, StorageError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.path, e)),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content).map_err(|e| StorageError::Corrupt {
            path: self.path.clone(),
            line: e.line(),
            reason: e.to_string(),
        })
    }

    /// Write to a sibling temp file then rename, so readers never see a partial table
    fn save(&self, records: &[Override]) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;
        }
        let json = serde_json::to_vec_pretty(records)
            .map_err(|e| StorageError::Serialize(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| StorageError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| StorageError::io(&self.path, e))
    }
}

/// Result of looking up the override for one rule and artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideLookup {
    None,
    Active(Override),
    Expired(Override),
}

/// Immutable view of the current override table
#[derive(Debug, Clone, Default)]
pub struct OverrideSnapshot {
    /// Latest record per `(rule-id, scope)` key
    current: Arc<BTreeMap<(String, String), Override>>,
    history: Arc<Vec<Override>>,
}

impl OverrideSnapshot {
    /// Build a table from records in approval order; the newest record per key wins
    pub fn from_records(records: Vec<Override>) -> Self {
        let mut current: BTreeMap<(String, String), Override> = BTreeMap::new();
        for record in &records {
            let key = record.key();
            let newer = current
                .get(&key)
                .map_or(true, |existing| record.created_at >= existing.created_at);
            if newer {
                current.insert(key, record.clone());
            }
        }
        Self {
            current: Arc::new(current),
            history: Arc::new(records),
        }
    }

    /// Find the override covering `rule_id` for this metadata as of `at`. An active
    /// override wins over an expired one; among several, the latest expiry wins.
    pub fn lookup(
        &self,
        rule_id: &str,
        metadata: &ArtifactMetadata,
        at: DateTime<Utc>,
    ) -> OverrideLookup {
        let covering: Vec<&Override> = self
            .current
            .values()
            .filter(|o| o.covers(rule_id, metadata))
            .collect();

        if let Some(active) = covering
            .iter()
            .filter(|o| o.is_valid_at(at))
            .max_by_key(|o| (o.expiry, o.created_at))
        {
            return OverrideLookup::Active((*active).clone());
        }
        match covering.iter().max_by_key(|o| (o.expiry, o.created_at)) {
            Some(expired) => OverrideLookup::Expired((*expired).clone()),
            None => OverrideLookup::None,
        }
    }

    /// Current overrides, one per key
    pub fn current(&self) -> impl Iterator<Item = &Override> {
        self.current.values()
    }

    /// Every record including superseded ones, in approval order
    pub fn history(&self) -> &[Override] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}

/// A request to suppress one rule within one scope
#[derive(Debug, Clone)]
pub struct OverrideRequest {
    pub rule_id: String,
    pub scope: ScopePredicate,
    pub justification: String,
    pub approver: Principal,
    pub expiry: DateTime<Utc>,
}

pub struct OverrideStore {
    backend: Arc<dyn OverrideBackend>,
    retry: RetryPolicy,
    table: RwLock<OverrideSnapshot>,
    writer: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for OverrideStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverrideStore")
            .field("overrides", &self.snapshot().len())
            .finish()
    }
}

impl OverrideStore {
    /// Load the table from the backend
    pub async fn open(
        backend: Arc<dyn OverrideBackend>,
        retry: RetryPolicy,
    ) -> Result<Self, StorageError> {
        let records = retry_io(&retry, "load overrides", || backend.load()).await?;
        info!(records = records.len(), "Loaded override table");
        Ok(Self {
            backend,
            retry,
            table: RwLock::new(OverrideSnapshot::from_records(records)),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    /// Empty, memory-backed store
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(MemoryOverrideBackend::default()),
            retry: RetryPolicy::none(),
            table: RwLock::new(OverrideSnapshot::default()),
            writer: tokio::sync::Mutex::new(()),
        }
    }

    /// Point-in-time view; unaffected by later writes
    pub fn snapshot(&self) -> OverrideSnapshot {
        self.table.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn list(&self) -> Vec<Override> {
        self.snapshot().current().cloned().collect()
    }

    /// Validate, persist and publish an override. Nothing is published unless the
    /// record is durably stored.
    #[instrument(
        skip(self, ruleset, request),
        fields(rule = %request.rule_id, approver = %request.approver.name)
    )]
    pub async fn request_override(
        &self,
        ruleset: &RuleSet,
        request: OverrideRequest,
        now: DateTime<Utc>,
    ) -> Result<Override, OverrideError> {
        let rule = ruleset
            .rule(&request.rule_id)
            .ok_or_else(|| OverrideError::UnknownRule(request.rule_id.clone()))?;

        if !request.approver.can_override(rule.category) {
            warn!(category = %rule.category, "Override rejected: missing authority");
            return Err(OverrideError::Authority {
                approver: request.approver.name.clone(),
                category: rule.category,
                rule: rule.id.clone(),
            });
        }
        if request.justification.trim().is_empty() {
            return Err(OverrideError::MissingJustification);
        }
        if request.expiry <= now {
            return Err(OverrideError::InvalidExpiry {
                expiry: request.expiry,
                now,
            });
        }

        let record = Override::new(
            request.rule_id,
            request.scope,
            request.justification.trim(),
            request.approver.name,
            now,
            request.expiry,
        );

        let _guard = self.writer.lock().await;
        let mut records = self.snapshot().history().to_vec();
        let superseded = self.snapshot().current.contains_key(&record.key());
        records.push(record.clone());

        retry_io(&self.retry, "save overrides", || self.backend.save(&records)).await?;

        let snapshot = OverrideSnapshot::from_records(records);
        *self.table.write().unwrap_or_else(|e| e.into_inner()) = snapshot;
        info!(
            override_id = %record.id,
            expiry = %record.expiry,
            superseded,
            "Override approved"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkers::{CheckerRegistry, StaticResolver};
    use crate::oracle::OracleSet;
    use crate::registry::{RuleRegistry, RuleSource};
    use canon_types::Category;
    use chrono::Duration;

    fn ruleset() -> RuleSet {
        let toml = r#"
            [[rules]]
            id = "t:sec:1"
            category = "security"
            severity = "absolute"
            check-type = "pattern"
            message = "No secrets"
            rationale = "r"
            parameters = { patterns = ["AKIA[0-9A-Z]{16}"] }
        "#;
        RuleRegistry::new(Arc::new(CheckerRegistry::with_builtins(
            OracleSet::builtin(),
            Arc::new(StaticResolver::default()),
        )))
        .ingest(&RuleSource::toml("t", toml))
        .unwrap()
    }

    fn request(approver: Principal, expiry: DateTime<Utc>) -> OverrideRequest {
        OverrideRequest {
            rule_id: "t:sec:1".into(),
            scope: ScopePredicate::any().with_document_type("runbook"),
            justification: "Example key in docs".into(),
            approver,
            expiry,
        }
    }

    fn security_lead() -> Principal {
        Principal::human("lee", &[Category::Security])
    }

    #[tokio::test]
    async fn test_approve_and_lookup() {
        let store = OverrideStore::in_memory();
        let now = Utc::now();
        let before = store.snapshot();
        let record = store
            .request_override(&ruleset(), request(security_lead(), now + Duration::days(7)), now)
            .await
            .unwrap();

        let runbook = ArtifactMetadata::new().document_type("runbook");
        assert_eq!(before.lookup("t:sec:1", &runbook, now), OverrideLookup::None);
        assert_eq!(
            store.snapshot().lookup("t:sec:1", &runbook, now),
            OverrideLookup::Active(record.clone())
        );
        assert_eq!(
            store.snapshot().lookup("t:sec:1", &runbook, now + Duration::days(8)),
            OverrideLookup::Expired(record)
        );
        let memo = ArtifactMetadata::new().document_type("memo");
        assert_eq!(store.snapshot().lookup("t:sec:1", &memo, now), OverrideLookup::None);
    }

    #[tokio::test]
    async fn test_authority_required() {
        let store = OverrideStore::in_memory();
        let now = Utc::now();
        let voice_only = Principal::human("vic", &[Category::Voice]);
        let err = store
            .request_override(&ruleset(), request(voice_only, now + Duration::days(1)), now)
            .await
            .unwrap_err();
        assert!(matches!(err, OverrideError::Authority { .. }));

        let bot = Principal::automation("ci");
        let err = store
            .request_override(&ruleset(), request(bot, now + Duration::days(1)), now)
            .await
            .unwrap_err();
        assert!(matches!(err, OverrideError::Authority { .. }));
        assert!(store.list().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_past_expiry_and_unknown_rule() {
        let store = OverrideStore::in_memory();
        let now = Utc::now();
        let err = store
            .request_override(&ruleset(), request(security_lead(), now), now)
            .await
            .unwrap_err();
        assert!(matches!(err, OverrideError::InvalidExpiry { .. }));

        let mut unknown = request(security_lead(), now + Duration::days(1));
        unknown.rule_id = "t:sec:9".into();
        let err = store.request_override(&ruleset(), unknown, now).await.unwrap_err();
        assert!(matches!(err, OverrideError::UnknownRule(_)));
    }

    #[tokio::test]
    async fn test_reapproval_supersedes_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overrides.json");
        let backend = Arc::new(JsonOverrideBackend::new(&path));
        let store = OverrideStore::open(backend.clone(), RetryPolicy::none()).await.unwrap();
        let now = Utc::now();
        store
            .request_override(&ruleset(), request(security_lead(), now + Duration::days(1)), now)
            .await
            .unwrap();
        let later = now + Duration::hours(1);
        let second = store
            .request_override(
                &ruleset(),
                request(security_lead(), later + Duration::days(30)),
                later,
            )
            .await
            .unwrap();

        assert_eq!(store.list(), vec![second.clone()]);

        let reopened = OverrideStore::open(backend, RetryPolicy::none()).await.unwrap();
        assert_eq!(reopened.list(), vec![second]);
        assert_eq!(reopened.snapshot().history().len(), 2);
    }

    struct BrokenBackend;

    impl OverrideBackend for BrokenBackend {
        fn load(&self) -> Result<Vec<Override>, StorageError> {
            Ok(Vec::new())
        }
        fn save(&self, _records: &[Override]) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("disk offline".into()))
        }
    }

    #[tokio::test]
    async fn test_failed_save_publishes_nothing() {
        let store = OverrideStore::open(Arc::new(BrokenBackend), RetryPolicy::none())
            .await
            .unwrap();
        let now = Utc::now();
        let err = store
            .request_override(&ruleset(), request(security_lead(), now + Duration::days(1)), now)
            .await
            .unwrap_err();
        assert!(matches!(err, OverrideError::Storage(_)));
        assert!(store.snapshot().is_empty());
    }
}
