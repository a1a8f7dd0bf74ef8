//! Content-addressed deduplication ledger.
//!
//! Every observation of a creative goes through [`Ledger::record`], which
//! finds the creative's record (exact hash first, then perceptual near
//! match), folds the observation in, and persists the record before
//! returning.
//!
//! ```no_run
//! use adledger_core::{CreativeFingerprint, Ledger, ResolvedAdvertiser};
//! use chrono::NaiveDate;
//!
//! # fn example() -> adledger_core::Result<()> {
//! let ledger = Ledger::open("data/ledger.jsonl", 8)?;
//! let fingerprint = CreativeFingerprint::exact_only(b"raw creative bytes");
//! let date = NaiveDate::from_ymd_opt(2025, 9, 18).unwrap();
//! let recorded = ledger.record(&fingerprint, &ResolvedAdvertiser::unresolved(), "news.mn", date)?;
//! println!("{} seen {} times", recorded.record.record_id, recorded.record.occurrence_count);
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod record;
pub mod store;

pub use record::LedgerRecord;
pub use store::{FileBackend, LedgerBackend, MemoryBackend};

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::error::{AdLedgerError, Result};
use crate::fingerprint::{CreativeFingerprint, ExactHash};
use crate::resolver::ResolvedAdvertiser;
use record::LIST_DELIMITER;

/// Default maximum Hamming distance for a near match.
pub const DEFAULT_PHASH_THRESHOLD: u32 = 8;

/// How an observation was matched to its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchOutcome {
    /// No match; a new record was created.
    Created,
    /// Exact hash matched the record or one of its aliases.
    Exact,
    /// Perceptual near match. `candidates > 1` means the ambiguity policy
    /// picked among several records.
    Near { distance: u32, candidates: usize },
}

impl MatchOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created)
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Near { candidates, .. } if *candidates > 1)
    }
}

/// Result of [`Ledger::record`]: the updated record and how it was matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recorded {
    pub record: LedgerRecord,
    pub outcome: MatchOutcome,
}

struct LedgerState {
    records: HashMap<String, LedgerRecord>,
    exact_index: HashMap<ExactHash, String>,
    backend: Box<dyn LedgerBackend>,
}

impl LedgerState {
    fn index(&mut self, record: &LedgerRecord) -> Result<()> {
        for hash in record.exact_hashes() {
            if let Some(owner) = self.exact_index.get(hash) {
                if owner != &record.record_id {
                    return Err(AdLedgerError::Persistence(format!(
                        "Exact hash {hash} claimed by records {owner} and {}",
                        record.record_id
                    )));
                }
            }
            self.exact_index.insert(*hash, record.record_id.clone());
        }
        Ok(())
    }

    fn find_match(
        &self,
        fingerprint: &CreativeFingerprint,
        threshold: u32,
    ) -> Option<(String, MatchOutcome)> {
        if let Some(id) = self.exact_index.get(&fingerprint.exact_hash) {
            return Some((id.clone(), MatchOutcome::Exact));
        }

        let query = fingerprint.perceptual_hash?;
        let mut candidates: Vec<(u32, &LedgerRecord)> = self
            .records
            .values()
            .filter_map(|r| {
                let distance = r.perceptual_hash?.hamming_distance(&query);
                (distance <= threshold).then_some((distance, r))
            })
            .collect();

        candidates.sort_by(|(da, a), (db, b)| {
            da.cmp(db)
                .then_with(|| a.first_seen_date.cmp(&b.first_seen_date))
                .then_with(|| a.record_id.cmp(&b.record_id))
        });

        let (distance, chosen) = *candidates.first()?;
        if candidates.len() > 1 {
            let considered: Vec<String> = candidates
                .iter()
                .map(|(d, r)| format!("{}@{d}", r.record_id))
                .collect();
            warn!(
                exact_hash = %fingerprint.exact_hash,
                chosen = %chosen.record_id,
                distance,
                candidates = ?considered,
                "Ambiguous near match, applied closest/earliest policy"
            );
        }

        Some((
            chosen.record_id.clone(),
            MatchOutcome::Near {
                distance,
                candidates: candidates.len(),
            },
        ))
    }
}

/// Shared deduplication ledger.
///
/// `record` is a single critical section: matching, persisting and updating
/// in-memory state all happen under one lock, so concurrent site workers
/// cannot create two records for the same exact hash.
pub struct Ledger {
    threshold: u32,
    state: Mutex<LedgerState>,
}

impl Ledger {
    /// Open a file-backed ledger, compacting it if superseded rows are found.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display(), threshold = threshold))]
    pub fn open(path: impl AsRef<Path>, threshold: u32) -> Result<Self> {
        let backend = FileBackend::open(path)?;
        Self::with_backend(Box::new(backend), threshold)
    }

    /// Open a ledger for reading only. Nothing is created on disk and no
    /// compaction runs; a missing file reads as an empty ledger.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display(), threshold = threshold))]
    pub fn open_read_only(path: impl AsRef<Path>, threshold: u32) -> Result<Self> {
        let path = path.as_ref();
        let exists = path.try_exists().map_err(|e| {
            AdLedgerError::Persistence(format!("Failed to stat ledger {}: {e}", path.display()))
        })?;

        let backend: Box<dyn LedgerBackend> = if exists {
            Box::new(FileBackend::open_read_only(path)?)
        } else {
            debug!("Ledger file does not exist, reading as empty");
            Box::new(MemoryBackend::with_records(Vec::new()))
        };
        Self::load(backend, threshold, false)
    }

    /// Non-durable ledger for tests and dry runs.
    pub fn in_memory(threshold: u32) -> Self {
        Self {
            threshold,
            state: Mutex::new(LedgerState {
                records: HashMap::new(),
                exact_index: HashMap::new(),
                backend: Box::new(MemoryBackend::new()),
            }),
        }
    }

    /// Build a ledger over any backend, loading its records.
    pub fn with_backend(backend: Box<dyn LedgerBackend>, threshold: u32) -> Result<Self> {
        Self::load(backend, threshold, true)
    }

    fn load(mut backend: Box<dyn LedgerBackend>, threshold: u32, compact: bool) -> Result<Self> {
        let rows = backend.load()?;
        let mut state = LedgerState {
            records: HashMap::with_capacity(rows.len()),
            exact_index: HashMap::with_capacity(rows.len()),
            backend,
        };
        for row in &rows {
            state.index(row)?;
        }

        if compact && state.backend.needs_compaction() {
            state.backend.compact(&rows)?;
        }
        state
            .records
            .extend(rows.into_iter().map(|r| (r.record_id.clone(), r)));

        info!(
            backend = %state.backend.describe(),
            durable = state.backend.is_durable(),
            records = state.records.len(),
            threshold,
            "Ledger opened"
        );

        Ok(Self {
            threshold,
            state: Mutex::new(state),
        })
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        // State is only mutated after a successful persist, so it stays
        // consistent even if a previous holder panicked.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one observation of a creative.
    ///
    /// Match-or-create, fold the observation in, persist, then commit to
    /// memory. On [`AdLedgerError::Persistence`] the in-memory ledger is left
    /// unchanged.
    #[instrument(level = "debug", skip(self, fingerprint, resolved), fields(
        exact_hash = %fingerprint.exact_hash,
        host = %resolved.host
    ))]
    pub fn record(
        &self,
        fingerprint: &CreativeFingerprint,
        resolved: &ResolvedAdvertiser,
        site: &str,
        date: NaiveDate,
    ) -> Result<Recorded> {
        validate_site(site)?;

        let mut state = self.lock();
        let (mut record, outcome) = match state.find_match(fingerprint, self.threshold) {
            Some((id, outcome)) => {
                let existing = state.records.get(&id).cloned().ok_or_else(|| {
                    AdLedgerError::Persistence(format!("Index points at missing record {id}"))
                })?;
                (existing, outcome)
            }
            None => (
                LedgerRecord::new(fingerprint, site, date),
                MatchOutcome::Created,
            ),
        };

        if matches!(outcome, MatchOutcome::Near { .. }) {
            record.alias_hashes.insert(fingerprint.exact_hash);
        }
        aggregate::apply(&mut record, resolved, site, date);

        state.backend.persist(&record)?;

        state
            .exact_index
            .insert(fingerprint.exact_hash, record.record_id.clone());
        state
            .records
            .insert(record.record_id.clone(), record.clone());

        debug!(
            record_id = %record.record_id,
            outcome = ?outcome,
            occurrences = record.occurrence_count,
            "Recorded observation"
        );

        Ok(Recorded { record, outcome })
    }

    pub fn get(&self, record_id: &str) -> Option<LedgerRecord> {
        self.lock().records.get(record_id).cloned()
    }

    /// Look up by canonical or alias exact hash.
    pub fn find_by_exact_hash(&self, hash: &ExactHash) -> Option<LedgerRecord> {
        let state = self.lock();
        let id = state.exact_index.get(hash)?;
        state.records.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_durable(&self) -> bool {
        self.lock().backend.is_durable()
    }

    /// All records, ordered by first-seen date then id.
    pub fn snapshot(&self) -> Vec<LedgerRecord> {
        let mut records: Vec<LedgerRecord> = self.lock().records.values().cloned().collect();
        records.sort_by(|a, b| {
            a.first_seen_date
                .cmp(&b.first_seen_date)
                .then_with(|| a.record_id.cmp(&b.record_id))
        });
        records
    }

    /// Records last seen on or after `date`.
    pub fn seen_since(&self, date: NaiveDate) -> Vec<LedgerRecord> {
        self.snapshot()
            .into_iter()
            .filter(|r| r.last_seen_date >= date)
            .collect()
    }

    /// Rewrite the backend with one row per record.
    pub fn compact(&self) -> Result<()> {
        let mut state = self.lock();
        let records: Vec<LedgerRecord> = state.records.values().cloned().collect();
        state.backend.compact(&records)
    }
}

fn validate_site(site: &str) -> Result<()> {
    if site.trim().is_empty() {
        return Err(AdLedgerError::InvalidInput("Site name is empty".into()));
    }
    if site.contains(LIST_DELIMITER) {
        return Err(AdLedgerError::InvalidInput(format!(
            "Site name may not contain '{LIST_DELIMITER}': {site}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::PerceptualHash;
    use crate::resolver::Confidence;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn fp(seed: &[u8], phash: u64) -> CreativeFingerprint {
        CreativeFingerprint::new(ExactHash::of(seed), PerceptualHash::from_bits(phash))
    }

    struct FailingBackend;

    impl LedgerBackend for FailingBackend {
        fn load(&mut self) -> Result<Vec<LedgerRecord>> {
            Ok(Vec::new())
        }

        fn persist(&mut self, _record: &LedgerRecord) -> Result<()> {
            Err(AdLedgerError::Persistence("disk full".into()))
        }

        fn is_durable(&self) -> bool {
            true
        }

        fn describe(&self) -> String {
            "failing".into()
        }
    }

    #[test]
    fn test_same_bytes_twice_is_one_record() {
        let ledger = Ledger::in_memory(DEFAULT_PHASH_THRESHOLD);
        let creative = fp(b"banner", 0xFF00);
        let day = date("2025-09-18");
        let resolved = ResolvedAdvertiser::new("shop.mn", Confidence::Direct);

        let first = ledger.record(&creative, &resolved, "ikon.mn", day).unwrap();
        let second = ledger.record(&creative, &resolved, "ikon.mn", day).unwrap();

        assert_eq!(first.outcome, MatchOutcome::Created);
        assert_eq!(second.outcome, MatchOutcome::Exact);
        assert_eq!(ledger.len(), 1);
        assert_eq!(second.record.occurrence_count, 2);
        assert_eq!(second.record.daily_counts[&day], 2);
        assert!(second.record.counts_consistent());
    }

    #[test]
    fn test_near_match_attaches_and_keeps_canonical_hashes() {
        let ledger = Ledger::in_memory(8);
        let original = fp(b"jpeg-q90", 0b1111_0000);
        let recompressed = fp(b"jpeg-q70", 0b1111_0011);
        let day = date("2025-09-18");

        ledger.record(&original, &ResolvedAdvertiser::unresolved(), "gogo.mn", day).unwrap();
        let near = ledger
            .record(&recompressed, &ResolvedAdvertiser::unresolved(), "gogo.mn", day)
            .unwrap();

        assert_eq!(near.outcome, MatchOutcome::Near { distance: 2, candidates: 1 });
        assert_eq!(ledger.len(), 1);
        assert_eq!(near.record.exact_hash, original.exact_hash);
        assert_eq!(near.record.perceptual_hash, original.perceptual_hash);
        assert!(near.record.alias_hashes.contains(&recompressed.exact_hash));

        let again = ledger
            .record(&recompressed, &ResolvedAdvertiser::unresolved(), "gogo.mn", day)
            .unwrap();
        assert_eq!(again.outcome, MatchOutcome::Exact);
        assert_eq!(
            ledger.find_by_exact_hash(&recompressed.exact_hash).unwrap().record_id,
            original.exact_hash.to_hex()
        );
    }

    #[test]
    fn test_far_fingerprints_create_distinct_records() {
        let ledger = Ledger::in_memory(8);
        let day = date("2025-09-18");
        ledger.record(&fp(b"a", 0), &ResolvedAdvertiser::unresolved(), "news.mn", day).unwrap();
        let b = ledger
            .record(&fp(b"b", 0x1FF), &ResolvedAdvertiser::unresolved(), "news.mn", day)
            .unwrap();
        assert_eq!(b.outcome, MatchOutcome::Created);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_ambiguous_match_prefers_closest_then_earliest() {
        let ledger = Ledger::in_memory(8);
        let none = ResolvedAdvertiser::unresolved();
        ledger.record(&fp(b"late", 0b0011), &none, "news.mn", date("2025-09-20")).unwrap();
        ledger.record(&fp(b"early", 0b1100_0000), &none, "news.mn", date("2025-09-10")).unwrap();

        // distance 2 to both records: tie broken by first-seen date
        let tied = ledger.record(&fp(b"query", 0), &none, "news.mn", date("2025-09-21")).unwrap();
        assert_eq!(tied.outcome, MatchOutcome::Near { distance: 2, candidates: 2 });
        assert_eq!(tied.record.exact_hash, ExactHash::of(b"early"));
        assert!(tied.outcome.is_ambiguous());

        // distance 1 to "late", 3 to "early": closest wins
        let closest = ledger.record(&fp(b"query2", 0b0001), &none, "news.mn", date("2025-09-21")).unwrap();
        assert_eq!(closest.record.exact_hash, ExactHash::of(b"late"));
    }

    #[test]
    fn test_exact_only_fingerprint_never_near_matches() {
        let ledger = Ledger::in_memory(64);
        let day = date("2025-09-18");
        ledger.record(&fp(b"a", 0), &ResolvedAdvertiser::unresolved(), "news.mn", day).unwrap();
        let outcome = ledger
            .record(&CreativeFingerprint::exact_only(b"b"), &ResolvedAdvertiser::unresolved(), "news.mn", day)
            .unwrap()
            .outcome;
        assert_eq!(outcome, MatchOutcome::Created);
    }

    #[test]
    fn test_persistence_failure_leaves_ledger_unchanged() {
        let ledger = Ledger::with_backend(Box::new(FailingBackend), 8).unwrap();
        let err = ledger
            .record(&fp(b"a", 0), &ResolvedAdvertiser::unresolved(), "news.mn", date("2025-09-18"))
            .unwrap_err();
        assert!(matches!(err, AdLedgerError::Persistence(_)));
        assert!(ledger.is_empty());
        assert!(ledger.find_by_exact_hash(&ExactHash::of(b"a")).is_none());
    }

    #[test]
    fn test_invalid_site_rejected() {
        let ledger = Ledger::in_memory(8);
        for site in ["", "  ", "a|b"] {
            let err = ledger
                .record(&fp(b"a", 0), &ResolvedAdvertiser::unresolved(), site, date("2025-09-18"))
                .unwrap_err();
            assert!(matches!(err, AdLedgerError::InvalidInput(_)));
        }
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_snapshot_and_window() {
        let ledger = Ledger::in_memory(0);
        let none = ResolvedAdvertiser::unresolved();
        ledger.record(&fp(b"old", 0), &none, "news.mn", date("2025-09-01")).unwrap();
        ledger.record(&fp(b"new", u64::MAX), &none, "news.mn", date("2025-09-15")).unwrap();

        let all = ledger.snapshot();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].exact_hash, ExactHash::of(b"old"));

        let recent = ledger.seen_since(date("2025-09-08"));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].exact_hash, ExactHash::of(b"new"));
    }
}
