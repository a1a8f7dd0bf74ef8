//! Resolve command implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;

use super::{confidence_label, host_or_dash, AppContext};

/// Execute the resolve command.
pub async fn execute(
    ctx: AppContext,
    url: String,
    no_follow: bool,
    timeout_ms: Option<u64>,
    json: bool,
) -> Result<()> {
    let chain = ctx.resolver(no_follow)?;
    let timeout = timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| ctx.resolve_timeout());

    let resolved = chain.resolve(&url, timeout).await;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&resolved).context("Failed to serialize resolution")?
        );
        return Ok(());
    }
    if ctx.quiet {
        return Ok(());
    }

    println!(
        "{} {}",
        "Advertiser:".bold(),
        host_or_dash(&resolved.host)
    );
    println!("   {} {}", "Confidence:".dimmed(), confidence_label(resolved.confidence));
    if !resolved.hops.is_empty() {
        println!("   {} {}", "Hops:".dimmed(), resolved.hops.join(" -> "));
    }
    Ok(())
}
