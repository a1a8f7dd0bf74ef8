//! Runtime configuration
//!
//! Loaded from `ADLEDGER_*` environment variables with sensible defaults.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::error::{AdLedgerError, Result};
use crate::ledger::DEFAULT_PHASH_THRESHOLD;
use crate::resolver::{RedirectorDenylist, ResolverConfig};

/// Default ledger location, relative to the working directory.
pub const DEFAULT_LEDGER_PATH: &str = "data/ledger.jsonl";

/// Configuration shared by the ledger and the resolver chain.
#[derive(Debug, Clone)]
pub struct Config {
    /// JSON Lines ledger file (default: data/ledger.jsonl)
    pub ledger_path: PathBuf,
    /// Maximum Hamming distance for a near match (default: 8)
    pub phash_threshold: u32,
    pub resolver: ResolverConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ledger_path: PathBuf::from(DEFAULT_LEDGER_PATH),
            phash_threshold: DEFAULT_PHASH_THRESHOLD,
            resolver: ResolverConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Fails only if `ADLEDGER_DENYLIST_FILE` is set and cannot be read.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let mut resolver = defaults.resolver;

        let ledger_path = var("ADLEDGER_LEDGER_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.ledger_path);

        let phash_threshold = var("ADLEDGER_PHASH_THRESHOLD")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(defaults.phash_threshold);

        resolver.max_hops = var("ADLEDGER_MAX_HOPS")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(resolver.max_hops);

        resolver.default_timeout = var("ADLEDGER_RESOLVE_TIMEOUT_MS")
            .and_then(|v| v.trim().parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(resolver.default_timeout);

        // Following is on unless explicitly disabled
        resolver.follow_redirects = var("ADLEDGER_FOLLOW_REDIRECTS")
            .map(|v| !matches!(v.trim().to_lowercase().as_str(), "false" | "0" | "no" | "off"))
            .unwrap_or(true);

        if let Some(agent) = var("ADLEDGER_USER_AGENT").filter(|v| !v.trim().is_empty()) {
            resolver.user_agent = agent;
        }

        if let Some(hosts) = var("ADLEDGER_DENYLIST") {
            resolver
                .denylist
                .extend(hosts.split(',').map(str::trim).filter(|s| !s.is_empty()));
        }

        if let Some(path) = var("ADLEDGER_DENYLIST_FILE").filter(|p| !p.trim().is_empty()) {
            let contents = fs::read_to_string(&path).map_err(|e| {
                AdLedgerError::Config(format!("Failed to read denylist file {path}: {e}"))
            })?;
            let before = resolver.denylist.len();
            resolver
                .denylist
                .extend(RedirectorDenylist::parse_lines(&contents));
            debug!(
                path = %path,
                added = resolver.denylist.len() - before,
                "Loaded redirector denylist file"
            );
        }

        Ok(Self {
            ledger_path,
            phash_threshold,
            resolver,
        })
    }
}
