//! Phrase oracles: time-dependent phrase lists (e.g. AI clichés) consulted by the
//! pattern checker. Every lookup takes an explicit `as_of` date, so results are
//! reproducible; a live oracle that fails falls back to a pinned snapshot.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use thiserror::Error;
use tracing::warn;

/// Name under which the built-in cliché list is registered
pub const AI_CLICHES: &str = "ai-cliches";

/// Pinned cliché snapshot shipped with the engine
pub const DEFAULT_AI_CLICHES: &[&str] = &[
    "a testament to",
    "at the end of the day",
    "delve into",
    "embark on a journey",
    "game-changer",
    "in today's fast-paced world",
    "in the ever-evolving landscape",
    "it's important to note",
    "it is important to note",
    "let's dive in",
    "navigate the complexities",
    "rich tapestry",
    "seamlessly integrate",
    "unlock the power of",
    "unleash the potential",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("Oracle unavailable: {0}")]
    Unavailable(String),
}

pub trait PhraseOracle: Send + Sync {
    /// Phrases in force on `as_of`
    fn lookup(&self, as_of: NaiveDate) -> Result<BTreeSet<String>, OracleError>;
}

/// Fixed phrase list, identical for every date
#[derive(Debug, Clone, Default)]
pub struct PinnedOracle {
    phrases: BTreeSet<String>,
}

impl PinnedOracle {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            phrases: phrases
                .into_iter()
                .map(|p| p.into().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn ai_cliches() -> Self {
        Self::new(DEFAULT_AI_CLICHES.iter().copied())
    }

    pub fn phrases(&self) -> &BTreeSet<String> {
        &self.phrases
    }
}

impl PhraseOracle for PinnedOracle {
    fn lookup(&self, _as_of: NaiveDate) -> Result<BTreeSet<String>, OracleError> {
        Ok(self.phrases.clone())
    }
}

/// Wraps a live oracle: memoizes per date and falls back to a pinned snapshot when
/// the live source fails. The first answer for a date is kept for the process
/// lifetime, so repeated evaluations agree.
pub struct CachedOracle {
    live: Arc<dyn PhraseOracle>,
    fallback: PinnedOracle,
    cache: Mutex<HashMap<NaiveDate, BTreeSet<String>>>,
}

impl CachedOracle {
    pub fn new(live: Arc<dyn PhraseOracle>, fallback: PinnedOracle) -> Self {
        Self {
            live,
            fallback,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

impl PhraseOracle for CachedOracle {
    fn lookup(&self, as_of: NaiveDate) -> Result<BTreeSet<String>, OracleError> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(hit) = cache.get(&as_of) {
            return Ok(hit.clone());
        }
        let phrases = match self.live.lookup(as_of) {
            Ok(phrases) => phrases,
            Err(e) => {
                warn!(%as_of, error = %e, "Live oracle failed, using pinned snapshot");
                self.fallback.phrases().clone()
            }
        };
        cache.insert(as_of, phrases.clone());
        Ok(phrases)
    }
}

/// Named oracles available to checkers
#[derive(Clone, Default)]
pub struct OracleSet {
    oracles: BTreeMap<String, Arc<dyn PhraseOracle>>,
}

impl std::fmt::Debug for OracleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleSet")
            .field("names", &self.oracles.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl OracleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in `ai-cliches` snapshot
    pub fn builtin() -> Self {
        Self::new().with(AI_CLICHES, Arc::new(PinnedOracle::ai_cliches()))
    }

    pub fn with(mut self, name: impl Into<String>, oracle: Arc<dyn PhraseOracle>) -> Self {
        self.oracles.insert(name.into(), oracle);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn PhraseOracle>> {
        self.oracles.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.oracles.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        calls: AtomicUsize,
        fail: bool,
    }

    impl PhraseOracle for Flaky {
        fn lookup(&self, as_of: NaiveDate) -> Result<BTreeSet<String>, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(OracleError::Unavailable("offline".into()))
            } else {
                Ok([format!("phrase of {as_of}")].into_iter().collect())
            }
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[test]
    fn test_pinned_normalizes() {
        let oracle = PinnedOracle::new(["  Delve Into ", ""]);
        let phrases = oracle.lookup(day(1)).unwrap();
        assert_eq!(phrases.into_iter().collect::<Vec<_>>(), vec!["delve into"]);
    }

    #[test]
    fn test_cached_memoizes_per_date() {
        let live = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let oracle = CachedOracle::new(live.clone(), PinnedOracle::default());
        let a = oracle.lookup(day(1)).unwrap();
        let b = oracle.lookup(day(1)).unwrap();
        let c = oracle.lookup(day(2)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(live.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cached_falls_back_to_snapshot() {
        let live = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let oracle = CachedOracle::new(live, PinnedOracle::ai_cliches());
        let phrases = oracle.lookup(day(1)).unwrap();
        assert!(phrases.contains("delve into"));
    }

    #[test]
    fn test_builtin_set() {
        let set = OracleSet::builtin();
        assert!(set.contains(AI_CLICHES));
        assert!(set.get("unknown").is_none());
    }
}
