//! Exit codes following sysexits.h conventions.
//!
//! These codes let cron jobs and scripts tell a bad invocation apart from an
//! unreadable input and from a ledger that cannot be written.

use adledger_core::AdLedgerError;

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Command line usage error (invalid arguments or configuration).
/// Maps to EX_USAGE from sysexits.h.
pub const USAGE_ERROR: i32 = 64;

/// Cannot open or parse an input file.
/// Maps to EX_NOINPUT from sysexits.h.
pub const INPUT_ERROR: i32 = 66;

/// Ledger could not be read or written.
/// Maps to EX_IOERR from sysexits.h.
pub const IO_ERROR: i32 = 74;

/// Represents an exit code with optional error context.
pub struct ExitCode {
    pub code: i32,
    pub message: Option<String>,
}

impl ExitCode {
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        Self {
            code: classify(err),
            message: Some(format!("{err:#}")),
        }
    }
}

/// Classify an error by the first typed cause in its chain.
fn classify(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<AdLedgerError>() {
            return code_for(e);
        }
        if cause.downcast_ref::<std::io::Error>().is_some()
            || cause.downcast_ref::<serde_json::Error>().is_some()
        {
            return INPUT_ERROR;
        }
    }
    GENERAL_ERROR
}

fn code_for(err: &AdLedgerError) -> i32 {
    match err {
        AdLedgerError::Persistence(_) => IO_ERROR,
        AdLedgerError::InvalidInput(_) | AdLedgerError::Config(_) => USAGE_ERROR,
        AdLedgerError::Decode(_) => INPUT_ERROR,
        AdLedgerError::BatchAborted { source, .. } => code_for(source),
        AdLedgerError::Http(_) | AdLedgerError::WorkerFailed { .. } => GENERAL_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_persistence_maps_to_io_error() {
        let err = anyhow::Error::new(AdLedgerError::Persistence("disk full".into()))
            .context("Failed to record creative");
        let exit = ExitCode::from_anyhow(&err);
        assert_eq!(exit.code, IO_ERROR);
        assert!(exit.message.unwrap().contains("disk full"));
    }

    #[test]
    fn test_batch_abort_maps_to_io_error() {
        let err = anyhow::Error::new(AdLedgerError::BatchAborted {
            site: "ikon.mn".into(),
            processed: 3,
            source: Box::new(AdLedgerError::Persistence("disk full".into())),
        });
        assert_eq!(ExitCode::from_anyhow(&err).code, IO_ERROR);
    }

    #[test]
    fn test_missing_file_maps_to_input_error() {
        let err = std::fs::read("/nonexistent/banner.gif")
            .context("Failed to read file: /nonexistent/banner.gif")
            .unwrap_err();
        assert_eq!(ExitCode::from_anyhow(&err).code, INPUT_ERROR);
    }

    #[test]
    fn test_invalid_site_maps_to_usage_error() {
        let err = anyhow::Error::new(AdLedgerError::InvalidInput("Site name is empty".into()));
        assert_eq!(ExitCode::from_anyhow(&err).code, USAGE_ERROR);
    }

    #[test]
    fn test_untyped_error_is_general() {
        assert_eq!(ExitCode::from_anyhow(&anyhow::anyhow!("boom")).code, GENERAL_ERROR);
    }
}
