//! Show command implementation.

use adledger_core::LedgerRecord;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use colored::Colorize;

use super::{confidence_label, host_or_dash, AppContext};

fn summary_line(record: &LedgerRecord) -> String {
    let sites: Vec<&str> = record.sites_seen.iter().map(String::as_str).collect();
    let short_id: String = record.record_id.chars().take(12).collect();
    format!(
        "{}  {} .. {}  {:>5}x  {} ({})  [{}]",
        short_id,
        record.first_seen_date,
        record.last_seen_date,
        record.occurrence_count,
        host_or_dash(&record.advertiser_host),
        confidence_label(record.host_confidence),
        sites.join(", ")
    )
}

/// Execute the show command.
pub fn execute(ctx: AppContext, since: Option<NaiveDate>, json: bool) -> Result<()> {
    let ledger = ctx.open_ledger_read_only()?;
    let records = match since {
        Some(date) => ledger.seen_since(date),
        None => ledger.snapshot(),
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&records).context("Failed to serialize records")?
        );
        return Ok(());
    }
    if ctx.quiet {
        return Ok(());
    }

    if records.is_empty() {
        println!("{}", "No records".dimmed());
        return Ok(());
    }
    for record in &records {
        println!("{}", summary_line(record));
    }
    println!();
    println!(
        "{} {} record(s), {} observation(s)",
        "Total:".bold(),
        records.len(),
        records.iter().map(|r| r.occurrence_count).sum::<u64>()
    );
    Ok(())
}
