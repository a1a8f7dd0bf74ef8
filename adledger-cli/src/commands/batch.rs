//! Batch command implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use adledger_core::{BatchRunner, Fingerprinter, Observation};
use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use colored::Colorize;
use serde::Deserialize;
use tracing::info;

use super::AppContext;

/// One manifest line.
#[derive(Debug, Deserialize)]
struct ManifestEntry {
    image: PathBuf,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    date: Option<NaiveDate>,
}

/// Read a JSON Lines manifest. Relative image paths are resolved against the
/// manifest's directory.
fn load_observations(manifest: &Path, site: &str, today: NaiveDate) -> Result<Vec<Observation>> {
    let contents = std::fs::read_to_string(manifest)
        .with_context(|| format!("Failed to read manifest: {}", manifest.display()))?;
    let base = manifest.parent().unwrap_or_else(|| Path::new("."));

    let mut observations = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: ManifestEntry = serde_json::from_str(line)
            .with_context(|| format!("Invalid manifest entry on line {}", idx + 1))?;

        let image = if entry.image.is_absolute() {
            entry.image
        } else {
            base.join(entry.image)
        };
        let bytes = std::fs::read(&image)
            .with_context(|| format!("Failed to read file: {}", image.display()))?;

        observations.push(Observation::new(
            bytes,
            entry.url.unwrap_or_default(),
            site,
            entry.date.unwrap_or(today),
        ));
    }
    Ok(observations)
}

/// Execute the batch command.
pub async fn execute(ctx: AppContext, manifest: PathBuf, site: String, no_follow: bool) -> Result<()> {
    let observations = load_observations(&manifest, &site, Local::now().date_naive())?;
    info!(manifest = %manifest.display(), observations = observations.len(), "Loaded manifest");

    let ledger = Arc::new(ctx.open_ledger()?);
    let runner = BatchRunner::new(
        ledger,
        ctx.resolver(no_follow)?,
        Fingerprinter::new(),
        ctx.resolve_timeout(),
    );

    let report = runner
        .run_site(&site, observations)
        .await
        .context("Batch failed")?;

    if !ctx.quiet {
        println!("{} {}", "Batch complete:".green().bold(), report);
        if report.decode_fallbacks > 0 {
            println!(
                "{}",
                format!(
                    "{} creative(s) could not be decoded and were matched by exact hash only",
                    report.decode_fallbacks
                )
                .yellow()
            );
        }
    }
    Ok(())
}
