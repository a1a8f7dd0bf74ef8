//! Advertiser host resolution.
//!
//! Turns a raw click-through URL into the advertiser's host by running an
//! ordered chain of strategies:
//!
//! 1. **Direct** - the URL's own host, unless it is a known redirector
//! 2. **Redirect following** - walk HTTP redirects until the chain leaves the
//!    redirector network (bounded hop count, bounded wall-clock budget)
//! 3. **Heuristic parse** - pull an embedded destination out of the query
//! 4. **Unresolved** - empty host; a valid outcome, not an error
//!
//! Resolution never fails: timeouts and network errors only advance the chain.
//!
//! ```no_run
//! use std::time::Duration;
//! use adledger_core::{ResolverChain, ResolverConfig};
//!
//! # async fn example() -> adledger_core::Result<()> {
//! let chain = ResolverChain::new(ResolverConfig::default())?;
//! let resolved = chain
//!     .resolve("https://ad.doubleclick.net/clk?adurl=https%3A%2F%2Fshop.mn%2F", Duration::from_secs(5))
//!     .await;
//! println!("{} ({})", resolved.host, resolved.confidence);
//! # Ok(())
//! # }
//! ```

pub mod heuristic;
pub mod host;
mod redirect;

pub use host::{canonical_host, parse_click_url, RedirectorDenylist, DEFAULT_REDIRECTORS};

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::Result;
use redirect::{FollowOutcome, RedirectFollower, ResolutionError};

/// Default redirect hop limit.
pub const DEFAULT_MAX_HOPS: usize = 5;

/// Default per-call resolution budget.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default User-Agent sent while following redirects.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; adledger/0.1)";

/// How trustworthy a resolved host is. Ordered: `Direct` is highest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    #[default]
    Unresolved,
    HeuristicParse,
    RedirectFollowed,
    Direct,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unresolved => "UNRESOLVED",
            Self::HeuristicParse => "HEURISTIC_PARSE",
            Self::RedirectFollowed => "REDIRECT_FOLLOWED",
            Self::Direct => "DIRECT",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "UNRESOLVED" => Ok(Self::Unresolved),
            "HEURISTIC_PARSE" | "HEURISTIC" => Ok(Self::HeuristicParse),
            "REDIRECT_FOLLOWED" | "REDIRECT" => Ok(Self::RedirectFollowed),
            "DIRECT" => Ok(Self::Direct),
            other => Err(format!("unknown confidence: {other}")),
        }
    }
}

/// Outcome of one resolution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResolvedAdvertiser {
    /// Advertiser host; empty when unresolved.
    pub host: String,
    pub confidence: Confidence,
    /// Hosts reached while following redirects, in order.
    pub hops: Vec<String>,
}

impl ResolvedAdvertiser {
    pub fn new(host: impl Into<String>, confidence: Confidence) -> Self {
        Self {
            host: host.into(),
            confidence,
            hops: Vec::new(),
        }
    }

    pub fn unresolved() -> Self {
        Self::default()
    }

    pub fn with_hops(mut self, hops: Vec<String>) -> Self {
        self.hops = hops;
        self
    }

    pub fn is_resolved(&self) -> bool {
        !self.host.is_empty()
    }
}

/// Resolution strategies, in chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    FollowRedirects,
    HeuristicParse,
}

impl Strategy {
    fn confidence(&self) -> Confidence {
        match self {
            Self::Direct => Confidence::Direct,
            Self::FollowRedirects => Confidence::RedirectFollowed,
            Self::HeuristicParse => Confidence::HeuristicParse,
        }
    }
}

/// Configuration for the resolver chain.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Redirector hosts; subdomains match.
    pub denylist: RedirectorDenylist,
    /// Maximum redirects followed per resolution.
    pub max_hops: usize,
    /// Whether the redirect-following strategy runs at all.
    pub follow_redirects: bool,
    /// Strategies yielding a lower confidence are skipped.
    pub min_confidence: Confidence,
    /// Budget used by callers that do not pass their own.
    pub default_timeout: Duration,
    pub user_agent: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            denylist: RedirectorDenylist::new(DEFAULT_REDIRECTORS.iter().copied()),
            max_hops: DEFAULT_MAX_HOPS,
            follow_redirects: true,
            min_confidence: Confidence::HeuristicParse,
            default_timeout: DEFAULT_RESOLVE_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Ordered chain of resolution strategies.
///
/// Holds no mutable state; share it freely across concurrent site workers.
pub struct ResolverChain {
    config: ResolverConfig,
    strategies: Vec<Strategy>,
    follower: RedirectFollower,
}

impl ResolverChain {
    #[instrument(level = "debug", skip_all, fields(
        max_hops = config.max_hops,
        follow_redirects = config.follow_redirects,
        redirectors = config.denylist.len()
    ))]
    pub fn new(config: ResolverConfig) -> Result<Self> {
        let follower =
            RedirectFollower::new(config.max_hops, config.default_timeout, &config.user_agent)?;

        let strategies = [Strategy::Direct, Strategy::FollowRedirects, Strategy::HeuristicParse]
            .into_iter()
            .filter(|s| *s != Strategy::FollowRedirects || config.follow_redirects)
            .filter(|s| s.confidence() >= config.min_confidence)
            .collect();

        debug!(?strategies, "Resolver chain created");
        Ok(Self {
            config,
            strategies,
            follower,
        })
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    /// Resolve with the configured default budget.
    pub async fn resolve_default(&self, raw_url: &str) -> ResolvedAdvertiser {
        self.resolve(raw_url, self.config.default_timeout).await
    }

    /// Resolve a raw click-through URL to an advertiser host.
    ///
    /// Always returns a value. `timeout` bounds the whole call; a strategy
    /// that exceeds the remaining budget is abandoned and the chain moves on.
    #[instrument(level = "info", skip(self), fields(timeout_ms = timeout.as_millis() as u64))]
    pub async fn resolve(&self, raw_url: &str, timeout: Duration) -> ResolvedAdvertiser {
        let start = Instant::now();

        let Some(url) = parse_click_url(raw_url) else {
            debug!("Click URL is empty or not http(s)");
            return ResolvedAdvertiser::unresolved();
        };

        let mut hops = Vec::new();
        for strategy in &self.strategies {
            let remaining = timeout.saturating_sub(start.elapsed());
            let host = match strategy {
                Strategy::Direct => self.direct(&url),
                Strategy::FollowRedirects => {
                    self.follow_redirects(&url, remaining, &mut hops).await
                }
                Strategy::HeuristicParse => heuristic::embedded_host(&url, &self.config.denylist),
            };

            if let Some(host) = host {
                let resolved = ResolvedAdvertiser::new(host, strategy.confidence()).with_hops(hops);
                info!(
                    host = %resolved.host,
                    confidence = %resolved.confidence,
                    hops = resolved.hops.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Resolved advertiser"
                );
                return resolved;
            }
        }

        info!(
            hops = hops.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Advertiser unresolved"
        );
        ResolvedAdvertiser::unresolved().with_hops(hops)
    }

    fn direct(&self, url: &Url) -> Option<String> {
        let host = canonical_host(url)?;
        (!self.config.denylist.contains(&host)).then_some(host)
    }

    async fn follow_redirects(
        &self,
        url: &Url,
        budget: Duration,
        hops: &mut Vec<String>,
    ) -> Option<String> {
        if budget.is_zero() {
            warn!("No budget left for redirect following");
            return None;
        }

        let follow = self.follower.follow(url.clone(), &self.config.denylist, hops);
        let outcome = tokio::time::timeout(budget, follow)
            .await
            .unwrap_or(Err(ResolutionError::Timeout(budget)));

        match outcome {
            Ok(FollowOutcome::Landed { host }) => Some(host),
            Ok(FollowOutcome::HopLimit { host }) => {
                warn!(
                    host = %host,
                    max_hops = self.config.max_hops,
                    "Hop limit reached, keeping last hop"
                );
                Some(host)
            }
            Ok(FollowOutcome::Stalled) => None,
            Err(e) => {
                warn!(error = %e, hops = hops.len(), "Redirect following failed, falling back");
                None
            }
        }
    }
}
