//! Site-agnostic batch driver.
//!
//! Takes already-downloaded creatives for one site and drives
//! fingerprint → resolve → record for each, summarising the pass in a
//! [`BatchReport`]. Several sites can run concurrently against one shared
//! [`Ledger`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::error::{AdLedgerError, Result};
use crate::fingerprint::{CreativeFingerprint, Fingerprinter};
use crate::ledger::Ledger;
use crate::resolver::ResolverChain;

/// One creative as scraped from a site.
#[derive(Debug, Clone)]
pub struct Observation {
    pub bytes: Vec<u8>,
    /// Raw click-through URL; may be empty.
    pub click_url: String,
    pub site: String,
    pub date: NaiveDate,
}

impl Observation {
    pub fn new(
        bytes: Vec<u8>,
        click_url: impl Into<String>,
        site: impl Into<String>,
        date: NaiveDate,
    ) -> Self {
        Self {
            bytes,
            click_url: click_url.into(),
            site: site.into(),
            date,
        }
    }
}

/// Summary of one site's batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub site: String,
    pub processed: usize,
    /// New ledger records.
    pub created: usize,
    /// Observations folded into existing records.
    pub updated: usize,
    /// Observations with no advertiser host.
    pub unresolved: usize,
    /// Near matches decided by the ambiguity policy.
    pub ambiguous: usize,
    /// Undecodable creatives recorded by exact hash only.
    pub decode_fallbacks: usize,
}

impl BatchReport {
    fn new(site: &str) -> Self {
        Self {
            site: site.to_string(),
            ..Default::default()
        }
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} processed, {} new, {} updated, {} unresolved, {} ambiguous, {} decode fallbacks",
            self.site,
            self.processed,
            self.created,
            self.updated,
            self.unresolved,
            self.ambiguous,
            self.decode_fallbacks
        )
    }
}

/// Drives observations through the fingerprinter, resolver and ledger.
#[derive(Clone)]
pub struct BatchRunner {
    ledger: Arc<Ledger>,
    resolver: Arc<ResolverChain>,
    fingerprinter: Fingerprinter,
    timeout: Duration,
}

impl BatchRunner {
    /// `timeout` is the per-observation resolution budget.
    pub fn new(
        ledger: Arc<Ledger>,
        resolver: ResolverChain,
        fingerprinter: Fingerprinter,
        timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            resolver: Arc::new(resolver),
            fingerprinter,
            timeout,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Process one site's observations in order.
    ///
    /// A persistence failure aborts the batch with
    /// [`AdLedgerError::BatchAborted`]; observations already recorded stay
    /// recorded.
    #[instrument(level = "info", skip(self, observations), fields(observations = observations.len()))]
    pub async fn run_site(&self, site: &str, observations: Vec<Observation>) -> Result<BatchReport> {
        let mut report = BatchReport::new(site);

        for observation in observations {
            let fingerprint = match self.fingerprinter.fingerprint(&observation.bytes) {
                Ok(fp) => fp,
                Err(e) => {
                    warn!(error = %e, "Creative not decodable, using exact hash only");
                    report.decode_fallbacks += 1;
                    CreativeFingerprint::exact_only(&observation.bytes)
                }
            };

            let resolved = self.resolver.resolve(&observation.click_url, self.timeout).await;

            let recorded = self
                .ledger
                .record(&fingerprint, &resolved, &observation.site, observation.date)
                .map_err(|source| {
                    error!(
                        processed = report.processed,
                        error = %source,
                        "Aborting site batch"
                    );
                    AdLedgerError::BatchAborted {
                        site: site.to_string(),
                        processed: report.processed,
                        source: Box::new(source),
                    }
                })?;

            report.processed += 1;
            if recorded.outcome.is_created() {
                report.created += 1;
            } else {
                report.updated += 1;
            }
            if !resolved.is_resolved() {
                report.unresolved += 1;
            }
            if recorded.outcome.is_ambiguous() {
                report.ambiguous += 1;
            }
        }

        info!(%report, "Site batch complete");
        Ok(report)
    }

    /// Run several sites concurrently. Results come back in input order, one
    /// per site; a worker that panicked yields `WorkerFailed` in its slot.
    pub async fn run_sites(
        &self,
        batches: Vec<(String, Vec<Observation>)>,
    ) -> Vec<Result<BatchReport>> {
        let sites: Vec<String> = batches.iter().map(|(site, _)| site.clone()).collect();
        let mut slots: Vec<Option<Result<BatchReport>>> = sites.iter().map(|_| None).collect();

        let mut tasks = JoinSet::new();
        for (idx, (site, observations)) in batches.into_iter().enumerate() {
            let runner = self.clone();
            tasks.spawn(async move { (idx, runner.run_site(&site, observations).await) });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => error!(error = %e, "Site worker panicked"),
            }
        }

        slots
            .into_iter()
            .zip(sites)
            .map(|(slot, site)| {
                slot.unwrap_or_else(|| {
                    Err(AdLedgerError::WorkerFailed {
                        site,
                        reason: "worker panicked before reporting".to_string(),
                    })
                })
            })
            .collect()
    }
}
