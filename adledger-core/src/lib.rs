//! adledger Core - creative deduplication and advertiser attribution
//!
//! This crate tracks banner creatives scraped from news sites over time
//! without double-counting a creative that reappears across days or sites,
//! and attributes each creative to the advertiser behind its click-through
//! URL.
//!
//! # Features
//!
//! - Exact (MD5) and perceptual (64-bit dHash) creative fingerprints
//! - Near-duplicate matching by Hamming distance with a configurable threshold
//! - Advertiser resolution through direct parse, redirect following and
//!   heuristic URL unwrapping, with graceful degradation on timeout
//! - Durable JSON Lines ledger with per-record daily and per-advertiser counts
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use adledger_core::{BatchRunner, Config, Fingerprinter, Ledger, Observation, ResolverChain};
//! use chrono::NaiveDate;
//!
//! # async fn example() -> adledger_core::Result<()> {
//! let config = Config::from_env()?;
//! let ledger = Arc::new(Ledger::open(&config.ledger_path, config.phash_threshold)?);
//! let timeout = config.resolver.default_timeout;
//! let resolver = ResolverChain::new(config.resolver)?;
//! let runner = BatchRunner::new(ledger, resolver, Fingerprinter::new(), timeout);
//!
//! let date = NaiveDate::from_ymd_opt(2025, 9, 18).unwrap();
//! let banner = std::fs::read("banner.gif").unwrap();
//! let report = runner
//!     .run_site("ikon.mn", vec![Observation::new(banner, "https://shop.mn/promo", "ikon.mn", date)])
//!     .await?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod ledger;
pub mod resolver;

// Re-export main types for convenience
pub use batch::{BatchReport, BatchRunner, Observation};
pub use config::Config;
pub use error::{AdLedgerError, Result};
pub use fingerprint::{CreativeFingerprint, ExactHash, Fingerprinter, PerceptualHash};
pub use ledger::{
    FileBackend, Ledger, LedgerBackend, LedgerRecord, MatchOutcome, MemoryBackend, Recorded,
    DEFAULT_PHASH_THRESHOLD,
};
pub use resolver::{Confidence, RedirectorDenylist, ResolvedAdvertiser, ResolverChain, ResolverConfig};
