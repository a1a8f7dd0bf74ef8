//! Hop-by-hop HTTP redirect following.
//!
//! reqwest's automatic redirect handling is disabled so that every `Location`
//! target can be inspected: the walk stops as soon as it leaves the
//! redirector network, and every host reached is recorded as a hop.

use std::time::{Duration, Instant};

use reqwest::{header::LOCATION, redirect::Policy, Client, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::host::{canonical_host, RedirectorDenylist};
use crate::error::{AdLedgerError, Result};

/// Failures while following redirects. Never leave the resolver.
#[derive(Debug, Error)]
pub(crate) enum ResolutionError {
    #[error("resolution timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),
}

/// Where a redirect walk ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FollowOutcome {
    /// A redirect pointed outside the redirector network.
    Landed { host: String },
    /// `max_hops` redirects were taken without landing.
    HopLimit { host: String },
    /// The chain stopped on a redirector without pointing anywhere useful.
    Stalled,
}

pub(crate) struct RedirectFollower {
    client: Client,
    max_hops: usize,
}

impl RedirectFollower {
    pub(crate) fn new(max_hops: usize, request_timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(request_timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| {
                warn!(error = %e, "Failed to create HTTP client");
                AdLedgerError::Http(e)
            })?;

        Ok(Self { client, max_hops })
    }

    /// Walk the chain from `start`, pushing each hop's host onto `hops` as it
    /// is taken. Hops already walked stay in `hops` if the future is dropped.
    pub(crate) async fn follow(
        &self,
        start: Url,
        denylist: &RedirectorDenylist,
        hops: &mut Vec<String>,
    ) -> std::result::Result<FollowOutcome, ResolutionError> {
        let mut current = start;
        let mut taken = 0;

        loop {
            if taken >= self.max_hops {
                return Ok(match hops.last().cloned() {
                    Some(host) => FollowOutcome::HopLimit { host },
                    None => FollowOutcome::Stalled,
                });
            }

            let start = Instant::now();
            let response = self.client.get(current.clone()).send().await.map_err(|e| {
                let latency_ms = start.elapsed().as_millis() as u64;
                if e.is_timeout() {
                    warn!(url = %current, latency_ms, "Redirect hop timed out");
                    ResolutionError::Timeout(start.elapsed())
                } else {
                    warn!(url = %current, error = %e, latency_ms, "Redirect hop failed");
                    ResolutionError::Network(e.to_string())
                }
            })?;

            let status = response.status();
            debug!(url = %current, status = %status, "Received HTTP response");

            let Some(next) = redirect_target(&current, status, &response) else {
                debug!(url = %current, status = %status, "Redirect chain stalled on redirector");
                return Ok(FollowOutcome::Stalled);
            };

            let host = canonical_host(&next).ok_or_else(|| {
                ResolutionError::Network(format!("redirect to host-less URL: {next}"))
            })?;
            hops.push(host.clone());
            taken += 1;

            if !denylist.contains(&host) {
                return Ok(FollowOutcome::Landed { host });
            }

            current = next;
        }
    }
}

fn redirect_target(current: &Url, status: StatusCode, response: &reqwest::Response) -> Option<Url> {
    if !status.is_redirection() {
        return None;
    }
    let location = response.headers().get(LOCATION)?.to_str().ok()?;
    let next = current.join(location.trim()).ok()?;
    matches!(next.scheme(), "http" | "https").then_some(next)
}
