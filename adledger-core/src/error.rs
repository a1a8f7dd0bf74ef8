use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdLedgerError {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Batch for site {site} aborted after {processed} observations: {source}")]
    BatchAborted {
        site: String,
        processed: usize,
        #[source]
        source: Box<AdLedgerError>,
    },

    #[error("Worker for site {site} failed: {reason}")]
    WorkerFailed { site: String, reason: String },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, AdLedgerError>;
