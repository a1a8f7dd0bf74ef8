//! Subcommand implementations.

pub mod batch;
pub mod record;
pub mod resolve;
pub mod show;

use std::time::Duration;

use adledger_core::{Config, Confidence, Ledger, ResolverChain};
use anyhow::{Context, Result};
use colored::{ColoredString, Colorize};
use tracing::debug;

/// State shared by every subcommand.
pub struct AppContext {
    pub config: Config,
    pub quiet: bool,
}

impl AppContext {
    pub fn open_ledger(&self) -> Result<Ledger> {
        let path = &self.config.ledger_path;
        Ledger::open(path, self.config.phash_threshold)
            .with_context(|| format!("Failed to open ledger: {}", path.display()))
    }

    /// Ledger for commands that only read. Missing files read as empty.
    pub fn open_ledger_read_only(&self) -> Result<Ledger> {
        let path = &self.config.ledger_path;
        Ledger::open_read_only(path, self.config.phash_threshold)
            .with_context(|| format!("Failed to open ledger: {}", path.display()))
    }

    /// Resolver chain from config, optionally with redirect following off.
    pub fn resolver(&self, no_follow: bool) -> Result<ResolverChain> {
        let mut config = self.config.resolver.clone();
        if no_follow {
            config.follow_redirects = false;
        }
        debug!(follow_redirects = config.follow_redirects, "Building resolver");
        ResolverChain::new(config).context("Failed to build resolver")
    }

    pub fn resolve_timeout(&self) -> Duration {
        self.config.resolver.default_timeout
    }
}

/// Confidence label colored by strength.
pub fn confidence_label(confidence: Confidence) -> ColoredString {
    match confidence {
        Confidence::Direct => confidence.as_str().green(),
        Confidence::RedirectFollowed => confidence.as_str().cyan(),
        Confidence::HeuristicParse => confidence.as_str().yellow(),
        Confidence::Unresolved => confidence.as_str().red(),
    }
}

/// Host or a placeholder when empty.
pub fn host_or_dash(host: &str) -> &str {
    if host.is_empty() {
        "-"
    } else {
        host
    }
}
