//! Ledger record: the durable, deduplicated view of one creative.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::fingerprint::{CreativeFingerprint, ExactHash, PerceptualHash};
use crate::resolver::Confidence;

/// Separator for list-valued columns.
pub const LIST_DELIMITER: char = '|';

/// One distinct creative and its attribution history.
///
/// Serialized as one flat row; list columns are `|`-delimited strings and the
/// per-day / per-advertiser counts are embedded maps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// Hex exact hash of the first-seen instance.
    pub record_id: String,
    pub exact_hash: ExactHash,
    pub perceptual_hash: Option<PerceptualHash>,
    pub first_seen_date: NaiveDate,
    pub last_seen_date: NaiveDate,
    /// Site the creative was first observed on.
    pub site: String,
    #[serde(with = "delimited")]
    pub sites_seen: BTreeSet<String>,
    /// Best-known advertiser host; empty until something resolves.
    pub advertiser_host: String,
    /// Confidence that produced `advertiser_host`.
    pub host_confidence: Confidence,
    pub occurrence_count: u64,
    /// Observations with no resolved host.
    #[serde(default)]
    pub unresolved_count: u64,
    pub daily_counts: BTreeMap<NaiveDate, u64>,
    pub advertiser_counts: BTreeMap<String, u64>,
    /// Exact hashes of near-duplicate instances attached to this record.
    #[serde(with = "delimited", default)]
    pub alias_hashes: BTreeSet<ExactHash>,
}

impl LedgerRecord {
    /// Empty record for a first observation. Counts start at zero; the
    /// aggregator fills them in.
    pub fn new(fingerprint: &CreativeFingerprint, site: &str, date: NaiveDate) -> Self {
        Self {
            record_id: fingerprint.exact_hash.to_hex(),
            exact_hash: fingerprint.exact_hash,
            perceptual_hash: fingerprint.perceptual_hash,
            first_seen_date: date,
            last_seen_date: date,
            site: site.to_string(),
            sites_seen: BTreeSet::new(),
            advertiser_host: String::new(),
            host_confidence: Confidence::Unresolved,
            occurrence_count: 0,
            unresolved_count: 0,
            daily_counts: BTreeMap::new(),
            advertiser_counts: BTreeMap::new(),
            alias_hashes: BTreeSet::new(),
        }
    }

    /// Canonical hash plus all attached near-duplicate hashes.
    pub fn exact_hashes(&self) -> impl Iterator<Item = &ExactHash> {
        std::iter::once(&self.exact_hash).chain(self.alias_hashes.iter())
    }

    pub fn daily_total(&self) -> u64 {
        self.daily_counts.values().sum()
    }

    pub fn attributed_total(&self) -> u64 {
        self.advertiser_counts.values().sum()
    }

    /// `occurrence_count == Σ daily == Σ advertiser + unresolved`.
    pub fn counts_consistent(&self) -> bool {
        self.occurrence_count == self.daily_total()
            && self.occurrence_count == self.attributed_total() + self.unresolved_count
    }

    /// Advertiser with the most observations, ties broken alphabetically.
    pub fn top_advertiser(&self) -> Option<(&str, u64)> {
        self.advertiser_counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(host, count)| (host.as_str(), *count))
    }
}

mod delimited {
    use std::collections::BTreeSet;
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::{de, Deserialize, Deserializer, Serializer};

    use super::LIST_DELIMITER;

    pub fn serialize<S, T>(set: &BTreeSet<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Display,
    {
        let joined = set
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(&LIST_DELIMITER.to_string());
        serializer.serialize_str(&joined)
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<BTreeSet<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: FromStr + Ord,
        T::Err: Display,
    {
        let raw = String::deserialize(deserializer)?;
        raw.split(LIST_DELIMITER)
            .filter(|item| !item.is_empty())
            .map(|item| item.parse().map_err(de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn sample() -> LedgerRecord {
        let fp = CreativeFingerprint::new(ExactHash::of(b"one"), PerceptualHash::from_bits(0xF0));
        let mut record = LedgerRecord::new(&fp, "ikon.mn", date("2025-09-18"));
        record.sites_seen.extend(["ikon.mn".to_string(), "news.mn".to_string()]);
        record.advertiser_host = "shop.mn".into();
        record.host_confidence = Confidence::Direct;
        record.occurrence_count = 3;
        record.unresolved_count = 1;
        record.daily_counts.insert(date("2025-09-18"), 2);
        record.daily_counts.insert(date("2025-09-20"), 1);
        record.advertiser_counts.insert("shop.mn".into(), 2);
        record.alias_hashes.insert(ExactHash::of(b"two"));
        record.last_seen_date = date("2025-09-20");
        record
    }

    #[test]
    fn test_row_layout() {
        let row = serde_json::to_value(sample()).unwrap();
        assert_eq!(row["sites_seen"], "ikon.mn|news.mn");
        assert_eq!(row["host_confidence"], "DIRECT");
        assert_eq!(row["perceptual_hash"], "00000000000000f0");
        assert_eq!(row["daily_counts"]["2025-09-20"], 1);
        assert_eq!(row["first_seen_date"], "2025-09-18");
        assert_eq!(row["alias_hashes"], ExactHash::of(b"two").to_hex());
    }

    #[test]
    fn test_row_reload_is_lossless() {
        let record = sample();
        let json = serde_json::to_string(&record).unwrap();
        let back: LedgerRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_empty_lists_reload() {
        let fp = CreativeFingerprint::exact_only(b"bytes");
        let record = LedgerRecord::new(&fp, "gogo.mn", date("2025-01-01"));
        let json = serde_json::to_string(&record).unwrap();
        let back: LedgerRecord = serde_json::from_str(&json).unwrap();
        assert!(back.sites_seen.is_empty());
        assert!(back.alias_hashes.is_empty());
        assert!(back.perceptual_hash.is_none());
    }

    #[test]
    fn test_counts_consistency_check() {
        let mut record = sample();
        assert!(record.counts_consistent());
        record.occurrence_count += 1;
        assert!(!record.counts_consistent());
    }

    #[test]
    fn test_top_advertiser() {
        let mut record = sample();
        record.advertiser_counts.insert("brand.mn".into(), 2);
        assert_eq!(record.top_advertiser(), Some(("brand.mn", 2)));
    }
}
