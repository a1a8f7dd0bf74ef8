//! Record command implementation.

use std::path::PathBuf;

use adledger_core::{CreativeFingerprint, Fingerprinter, MatchOutcome, ResolvedAdvertiser};
use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use colored::Colorize;
use tracing::{info, warn};

use super::{confidence_label, host_or_dash, AppContext};

pub struct RecordArgs {
    pub image: PathBuf,
    pub site: String,
    pub url: Option<String>,
    pub date: Option<NaiveDate>,
    pub no_follow: bool,
    pub json: bool,
}

/// Execute the record command.
pub async fn execute(ctx: AppContext, args: RecordArgs) -> Result<()> {
    let bytes = std::fs::read(&args.image)
        .with_context(|| format!("Failed to read file: {}", args.image.display()))?;
    info!(path = %args.image.display(), bytes = bytes.len(), "Read creative");

    let fingerprint = match Fingerprinter::new().fingerprint(&bytes) {
        Ok(fp) => fp,
        Err(e) => {
            warn!(error = %e, "Falling back to exact hash only");
            if !ctx.quiet {
                eprintln!(
                    "{}",
                    format!("Could not decode image ({e}); recording by exact hash only").yellow()
                );
            }
            CreativeFingerprint::exact_only(&bytes)
        }
    };

    let resolved = match args.url.as_deref() {
        Some(url) => {
            let chain = ctx.resolver(args.no_follow)?;
            chain.resolve(url, ctx.resolve_timeout()).await
        }
        None => ResolvedAdvertiser::unresolved(),
    };

    let date = args.date.unwrap_or_else(|| Local::now().date_naive());
    let ledger = ctx.open_ledger()?;
    let recorded = ledger
        .record(&fingerprint, &resolved, &args.site, date)
        .context("Failed to record creative")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&recorded).context("Failed to serialize record")?
        );
        return Ok(());
    }
    if ctx.quiet {
        return Ok(());
    }

    let record = &recorded.record;
    let headline = match recorded.outcome {
        MatchOutcome::Created => "New creative recorded".green().bold(),
        MatchOutcome::Exact => "Known creative (exact match)".cyan().bold(),
        MatchOutcome::Near { distance, .. } => {
            format!("Known creative (near match, distance {distance})").cyan().bold()
        }
    };

    println!();
    println!("{headline}");
    println!();
    println!("   {} {}", "Record:".dimmed(), record.record_id);
    println!("   {} {}", "Exact hash:".dimmed(), fingerprint.exact_hash);
    if let Some(phash) = fingerprint.perceptual_hash {
        println!("   {} {}", "Perceptual hash:".dimmed(), phash);
    }
    println!(
        "   {} {} ({})",
        "Resolved:".dimmed(),
        host_or_dash(&resolved.host),
        confidence_label(resolved.confidence)
    );
    if !resolved.hops.is_empty() {
        println!("   {} {}", "Hops:".dimmed(), resolved.hops.join(" -> "));
    }
    println!(
        "   {} {} ({})",
        "Advertiser:".dimmed(),
        host_or_dash(&record.advertiser_host),
        confidence_label(record.host_confidence)
    );
    println!("   {} {}", "Occurrences:".dimmed(), record.occurrence_count);
    println!(
        "   {} {} .. {}",
        "Seen:".dimmed(),
        record.first_seen_date,
        record.last_seen_date
    );

    Ok(())
}
