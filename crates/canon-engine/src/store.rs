//! Append-only, hash-chained audit report log keyed by
//! `(artifact-fingerprint, ruleset-version)`

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use canon_types::{verify_chain, AuditReport, LogRecord};
use tracing::debug;

use crate::error::StorageError;

pub trait ReportStore: Send + Sync {
    /// Append a finalized report. Records are never rewritten.
    fn append(&self, report: &AuditReport) -> Result<LogRecord, StorageError>;

    /// Every record in append order
    fn records(&self) -> Result<Vec<LogRecord>, StorageError>;

    /// All reports for an artifact fingerprint, oldest first
    fn history(&self, fingerprint: &str) -> Result<Vec<AuditReport>, StorageError> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|r| r.report.artifact_fingerprint() == fingerprint)
            .map(|r| r.report)
            .collect())
    }

    /// Most recent report for an artifact fingerprint under any RuleSet version
    fn latest_for(&self, fingerprint: &str) -> Result<Option<AuditReport>, StorageError> {
        Ok(self.history(fingerprint)?.pop())
    }

    /// Most recent report for the exact `(fingerprint, version)` key
    fn get(&self, fingerprint: &str, version: &str) -> Result<Option<AuditReport>, StorageError> {
        Ok(self
            .records()?
            .into_iter()
            .rev()
            .find(|r| r.key() == (fingerprint, version))
            .map(|r| r.report))
    }

    /// Check sequence numbering and hash links; returns the record count
    fn verify(&self) -> Result<usize, StorageError>;
}

fn next_link(last: Option<&LogRecord>) -> (u64, Option<String>) {
    match last {
        Some(record) => (record.sequence + 1, Some(record.compute_hash())),
        None => (0, None),
    }
}

#[derive(Debug, Default)]
pub struct MemoryReportStore {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReportStore for MemoryReportStore {
    fn append(&self, report: &AuditReport) -> Result<LogRecord, StorageError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let (sequence, previous_hash) = next_link(records.last());
        let record = LogRecord::new(sequence, report.clone(), previous_hash);
        records.push(record.clone());
        Ok(record)
    }

    fn records(&self) -> Result<Vec<LogRecord>, StorageError> {
        Ok(self.records.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn verify(&self) -> Result<usize, StorageError> {
        let records = self.records()?;
        verify_chain(&records).map_err(|reason| StorageError::Corrupt {
            path: PathBuf::from("<memory>"),
            line: 0,
            reason,
        })?;
        Ok(records.len())
    }
}

/// One JSON record per line. The chain tail is cached after the first read.
#[derive(Debug)]
pub struct JsonlReportStore {
    path: PathBuf,
    tail: Mutex<Option<(u64, Option<String>)>>,
}

impl JsonlReportStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tail: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<LogRecord>, StorageError> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.path, e)),
        };
        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| StorageError::io(&self.path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: LogRecord =
                serde_json::from_str(&line).map_err(|e| StorageError::Corrupt {
                    path: self.path.clone(),
                    line: index + 1,
                    reason: e.to_string(),
                })?;
            records.push(record);
        }
        Ok(records)
    }
}

impl ReportStore for JsonlReportStore {
    fn append(&self, report: &AuditReport) -> Result<LogRecord, StorageError> {
        let mut tail = self.tail.lock().unwrap_or_else(|e| e.into_inner());
        let (sequence, previous_hash) = match tail.take() {
            Some(link) => link,
            None => next_link(self.read_all()?.last()),
        };

        let record = LogRecord::new(sequence, report.clone(), previous_hash);
        let mut line =
            serde_json::to_vec(&record).map_err(|e| StorageError::Serialize(e.to_string()))?;
        line.push(b'\n');

        let write = || -> std::io::Result<()> {
            if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
            let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            file.write_all(&line)?;
            file.sync_data()
        };
        if let Err(e) = write() {
            // Tail unknown after a failed write; re-read on the next append
            return Err(StorageError::io(&self.path, e));
        }

        *tail = Some((sequence + 1, Some(record.compute_hash())));
        debug!(sequence, path = %self.path.display(), "Appended report record");
        Ok(record)
    }

    fn records(&self) -> Result<Vec<LogRecord>, StorageError> {
        self.read_all()
    }

    fn verify(&self) -> Result<usize, StorageError> {
        let records = self.read_all()?;
        verify_chain(&records).map_err(|reason| StorageError::Corrupt {
            path: self.path.clone(),
            line: 0,
            reason,
        })?;
        Ok(records.len())
    }
}
