//! Tamper-evident, append-only audit report log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::report::AuditReport;

/// A single persisted log record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LogRecord {
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
    pub report: AuditReport,
    pub previous_hash: Option<String>,
}

impl LogRecord {
    pub fn new(sequence: u64, report: AuditReport, previous_hash: Option<String>) -> Self {
        Self {
            sequence,
            recorded_at: Utc::now(),
            report,
            previous_hash,
        }
    }

    /// Log key: `(artifact-fingerprint, ruleset-version)`
    pub fn key(&self) -> (&str, &str) {
        (
            self.report.artifact_fingerprint(),
            self.report.ruleset_version(),
        )
    }

    /// Compute the hash of this record (for chain linking)
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sequence.to_be_bytes());
        hasher.update(self.recorded_at.to_rfc3339().as_bytes());
        hasher.update(serde_json::to_vec(&self.report).unwrap_or_default());
        if let Some(ref prev) = self.previous_hash {
            hasher.update(prev.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Verify sequence numbering and hash links across an ordered run of records
pub fn verify_chain(records: &[LogRecord]) -> Result<(), String> {
    let mut expected_prev: Option<String> = None;

    for (i, record) in records.iter().enumerate() {
        if record.sequence != i as u64 {
            return Err(format!(
                "Chain broken at record {}: sequence is {}",
                i, record.sequence
            ));
        }
        if record.previous_hash != expected_prev {
            return Err(format!(
                "Chain broken at record {}: expected prev {:?}, got {:?}",
                i, expected_prev, record.previous_hash
            ));
        }
        expected_prev = Some(record.compute_hash());
    }

    Ok(())
}

/// Compute SHA-256 hash of arbitrary bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
