//! Attribution bookkeeping for a single observation.

use chrono::NaiveDate;

use super::record::LedgerRecord;
use crate::resolver::ResolvedAdvertiser;

/// Fold one observation into a record's attribution history.
///
/// Unresolved observations count toward `occurrence_count` and the day's
/// count but not toward any advertiser.
pub fn apply(record: &mut LedgerRecord, resolved: &ResolvedAdvertiser, site: &str, date: NaiveDate) {
    record.occurrence_count += 1;
    *record.daily_counts.entry(date).or_insert(0) += 1;

    if resolved.is_resolved() {
        *record
            .advertiser_counts
            .entry(resolved.host.clone())
            .or_insert(0) += 1;
    } else {
        record.unresolved_count += 1;
    }

    record.sites_seen.insert(site.to_string());
    record.last_seen_date = record.last_seen_date.max(date);
    record.first_seen_date = record.first_seen_date.min(date);

    update_host(record, resolved);
}

/// Replace the stored host only on strictly higher confidence.
fn update_host(record: &mut LedgerRecord, resolved: &ResolvedAdvertiser) {
    if resolved.is_resolved() && resolved.confidence > record.host_confidence {
        record.advertiser_host = resolved.host.clone();
        record.host_confidence = resolved.confidence;
    }
}
