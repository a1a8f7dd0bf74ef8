//! End-to-end ledger behaviour: deduplication, attribution counts,
//! durability and concurrent recording.

use std::sync::Arc;
use std::thread;

use adledger_core::{
    Confidence, CreativeFingerprint, ExactHash, Ledger, MatchOutcome, PerceptualHash,
    ResolvedAdvertiser,
};
use chrono::NaiveDate;
use tempfile::TempDir;

fn date(s: &str) -> NaiveDate {
    s.parse().expect("valid date")
}

fn creative(seed: &[u8], phash: u64) -> CreativeFingerprint {
    CreativeFingerprint::new(ExactHash::of(seed), PerceptualHash::from_bits(phash))
}

#[test]
fn test_two_sites_two_days() {
    let ledger = Ledger::in_memory(8);
    let gif = creative(b"summer-sale.gif", 0xDEAD_BEEF_0000_FFFF);
    let shop = ResolvedAdvertiser::new("shop.mn", Confidence::RedirectFollowed);

    ledger.record(&gif, &shop, "ikon.mn", date("2025-09-18")).unwrap();
    ledger.record(&gif, &shop, "news.mn", date("2025-09-18")).unwrap();
    ledger.record(&gif, &shop, "ikon.mn", date("2025-09-19")).unwrap();
    let last = ledger.record(&gif, &shop, "news.mn", date("2025-09-19")).unwrap();

    assert_eq!(ledger.len(), 1);
    let record = last.record;
    assert_eq!(record.occurrence_count, 4);
    assert_eq!(record.daily_counts[&date("2025-09-18")], 2);
    assert_eq!(record.daily_counts[&date("2025-09-19")], 2);
    assert_eq!(record.advertiser_counts["shop.mn"], 4);
    assert_eq!(record.first_seen_date, date("2025-09-18"));
    assert_eq!(record.last_seen_date, date("2025-09-19"));
    assert_eq!(record.site, "ikon.mn");
    assert_eq!(
        record.sites_seen.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["ikon.mn", "news.mn"]
    );
    assert!(record.counts_consistent());
}

#[test]
fn test_unresolvable_creative_is_still_recorded() {
    let ledger = Ledger::in_memory(8);
    let recorded = ledger
        .record(
            &creative(b"no-link.jpg", 42),
            &ResolvedAdvertiser::unresolved(),
            "gogo.mn",
            date("2025-09-18"),
        )
        .unwrap();

    assert_eq!(recorded.outcome, MatchOutcome::Created);
    assert_eq!(recorded.record.occurrence_count, 1);
    assert_eq!(recorded.record.advertiser_host, "");
    assert!(recorded.record.advertiser_counts.is_empty());
    assert_eq!(recorded.record.unresolved_count, 1);
}

#[test]
fn test_count_identity_over_mixed_history() {
    let ledger = Ledger::in_memory(8);
    let fp = creative(b"mixed", 7);
    let observations = [
        ResolvedAdvertiser::new("a.mn", Confidence::HeuristicParse),
        ResolvedAdvertiser::unresolved(),
        ResolvedAdvertiser::new("b.mn", Confidence::Direct),
        ResolvedAdvertiser::new("a.mn", Confidence::RedirectFollowed),
        ResolvedAdvertiser::unresolved(),
    ];
    for (i, resolved) in observations.iter().enumerate() {
        let day = date("2025-09-01") + chrono::Days::new(i as u64 % 3);
        ledger.record(&fp, resolved, "ikon.mn", day).unwrap();
    }

    let record = ledger.find_by_exact_hash(&fp.exact_hash).unwrap();
    assert_eq!(record.occurrence_count, 5);
    assert_eq!(record.daily_total(), 5);
    assert_eq!(record.attributed_total() + record.unresolved_count, 5);
    assert_eq!(record.advertiser_host, "b.mn");
    assert_eq!(record.host_confidence, Confidence::Direct);
    assert_eq!(record.top_advertiser(), Some(("a.mn", 2)));
}

#[test]
fn test_restart_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.jsonl");
    let shop = ResolvedAdvertiser::new("shop.mn", Confidence::Direct);

    let before = {
        let ledger = Ledger::open(&path, 8).unwrap();
        assert!(ledger.is_durable());
        ledger.record(&creative(b"a", 0), &shop, "ikon.mn", date("2025-09-18")).unwrap();
        ledger.record(&creative(b"a", 0), &shop, "news.mn", date("2025-09-19")).unwrap();
        ledger.record(&creative(b"a-recompressed", 1), &shop, "news.mn", date("2025-09-19")).unwrap();
        ledger.record(&creative(b"b", u64::MAX), &ResolvedAdvertiser::unresolved(), "gogo.mn", date("2025-09-19")).unwrap();
        ledger.snapshot()
    };

    let reopened = Ledger::open(&path, 8).unwrap();
    assert_eq!(reopened.snapshot(), before);

    // superseded rows were compacted away on open
    let rows = std::fs::read_to_string(&path).unwrap();
    assert_eq!(rows.lines().count(), 2);

    // alias hashes survive the restart
    let alias = reopened
        .record(&creative(b"a-recompressed", 1), &shop, "ikon.mn", date("2025-09-20"))
        .unwrap();
    assert_eq!(alias.outcome, MatchOutcome::Exact);
    assert_eq!(alias.record.occurrence_count, 4);
}

#[test]
fn test_concurrent_recording_of_one_hash_yields_one_record() {
    let ledger = Arc::new(Ledger::in_memory(8));
    let fp = creative(b"shared-banner", 0x0F0F);
    let sites = ["ikon.mn", "news.mn", "gogo.mn", "eguur.mn", "zindaa.mn", "unuudur.mn"];

    thread::scope(|scope| {
        for site in sites {
            let ledger = Arc::clone(&ledger);
            let fp = fp.clone();
            scope.spawn(move || {
                for _ in 0..10 {
                    ledger
                        .record(&fp, &ResolvedAdvertiser::unresolved(), site, date("2025-09-18"))
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(ledger.len(), 1);
    let record = ledger.find_by_exact_hash(&fp.exact_hash).unwrap();
    assert_eq!(record.occurrence_count, 60);
    assert_eq!(record.sites_seen.len(), sites.len());
    assert!(record.counts_consistent());
}

#[test]
fn test_near_duplicate_never_splits_later() {
    let ledger = Ledger::in_memory(4);
    let none = ResolvedAdvertiser::unresolved();
    let day = date("2025-09-18");

    let original = creative(b"original", 0b0000);
    let variant = creative(b"variant", 0b1111);
    ledger.record(&original, &none, "ikon.mn", day).unwrap();
    let first = ledger.record(&variant, &none, "ikon.mn", day).unwrap();
    assert_eq!(first.outcome, MatchOutcome::Near { distance: 4, candidates: 1 });

    // a record that is a closer perceptual match to the variant appears
    ledger.record(&creative(b"closer", 0b1_1111), &none, "ikon.mn", day).unwrap();

    let again = ledger.record(&variant, &none, "ikon.mn", day).unwrap();
    assert_eq!(again.outcome, MatchOutcome::Exact);
    assert_eq!(again.record.exact_hash, original.exact_hash);
}

#[test]
fn test_recording_after_torn_row_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.jsonl");
    let shop = ResolvedAdvertiser::new("shop.mn", Confidence::Direct);

    let ledger = Ledger::open(&path, 8).unwrap();
    ledger
        .record(&creative(b"first", 0x0F0F), &shop, "ikon.mn", date("2025-09-18"))
        .unwrap();

    // A crash mid-append leaves a fragment with no trailing newline.
    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    std::io::Write::write_all(&mut file, b"{\"record_id\":\"trunc").unwrap();
    drop(file);

    ledger
        .record(&creative(b"second", !0x0F0F), &shop, "ikon.mn", date("2025-09-18"))
        .unwrap();
    drop(ledger);

    let reopened = Ledger::open(&path, 8).unwrap();
    assert_eq!(reopened.len(), 2);
    assert!(reopened.find_by_exact_hash(&ExactHash::of(b"second")).is_some());
}

#[test]
fn test_read_only_open_never_writes() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nested").join("ledger.jsonl");

    let empty = Ledger::open_read_only(&missing, 8).unwrap();
    assert!(empty.is_empty());
    assert!(!missing.exists());
    assert!(!missing.parent().unwrap().exists());

    let path = dir.path().join("ledger.jsonl");
    let gif = creative(b"gif", 0xAAAA);
    let ledger = Ledger::open(&path, 8).unwrap();
    ledger.record(&gif, &ResolvedAdvertiser::unresolved(), "ikon.mn", date("2025-09-18")).unwrap();
    ledger.record(&gif, &ResolvedAdvertiser::unresolved(), "ikon.mn", date("2025-09-19")).unwrap();
    drop(ledger);
    let before = std::fs::read_to_string(&path).unwrap();
    assert_eq!(before.lines().count(), 2);

    let reader = Ledger::open_read_only(&path, 8).unwrap();
    assert_eq!(reader.len(), 1);
    assert!(reader
        .record(&gif, &ResolvedAdvertiser::unresolved(), "ikon.mn", date("2025-09-20"))
        .is_err());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
}
