//! adledger CLI - banner creative deduplication and advertiser attribution.

use std::path::PathBuf;

use adledger_core::Config;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

mod commands;
mod exit_codes;

use exit_codes::ExitCode;

const EXIT_CODES_HELP: &str = "Exit codes:
  0   Success
  1   General error
  64  Usage error (invalid arguments or configuration)
  66  Input error (image or manifest unreadable)
  74  I/O error (ledger could not be read or written)";

#[derive(Parser)]
#[command(name = "adledger")]
#[command(author, version, about = "Banner creative deduplication and advertiser attribution", long_about = None)]
#[command(after_help = EXIT_CODES_HELP)]
struct Cli {
    /// Ledger file (defaults to ADLEDGER_LEDGER_PATH or data/ledger.jsonl)
    #[arg(long, global = true, value_name = "PATH")]
    ledger: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Suppress human-readable output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record one creative observation in the ledger
    Record {
        /// Path to the creative image
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        /// Site the creative was scraped from
        #[arg(long)]
        site: String,

        /// Raw click-through URL of the creative
        #[arg(long)]
        url: Option<String>,

        /// Observation date, YYYY-MM-DD (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Do not follow HTTP redirects while resolving the advertiser
        #[arg(long)]
        no_follow: bool,

        /// Print the updated record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record a site's creatives listed in a JSON Lines manifest
    Batch {
        /// Manifest with one {"image", "url"?, "date"?} object per line
        #[arg(value_name = "MANIFEST")]
        manifest: PathBuf,

        /// Site the creatives were scraped from
        #[arg(long)]
        site: String,

        /// Do not follow HTTP redirects while resolving advertisers
        #[arg(long)]
        no_follow: bool,
    },

    /// Resolve a click-through URL to its advertiser host
    Resolve {
        /// Raw click-through URL
        #[arg(value_name = "URL")]
        url: String,

        /// Do not follow HTTP redirects
        #[arg(long)]
        no_follow: bool,

        /// Resolution budget in milliseconds
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,

        /// Print the resolution as JSON
        #[arg(long)]
        json: bool,
    },

    /// List ledger records
    Show {
        /// Only records last seen on or after this date
        #[arg(long, value_name = "DATE")]
        since: Option<NaiveDate>,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_env().context("Invalid configuration")?;
    if let Some(path) = cli.ledger {
        config.ledger_path = path;
    }
    let ctx = commands::AppContext {
        config,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Record {
            image,
            site,
            url,
            date,
            no_follow,
            json,
        } => {
            let args = commands::record::RecordArgs {
                image,
                site,
                url,
                date,
                no_follow,
                json,
            };
            commands::record::execute(ctx, args).await
        }
        Commands::Batch {
            manifest,
            site,
            no_follow,
        } => commands::batch::execute(ctx, manifest, site, no_follow).await,
        Commands::Resolve {
            url,
            no_follow,
            timeout_ms,
            json,
        } => commands::resolve::execute(ctx, url, no_follow, timeout_ms, json).await,
        Commands::Show { since, json } => commands::show::execute(ctx, since, json),
    }
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                exit_codes::USAGE_ERROR
            } else {
                exit_codes::SUCCESS
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        let exit = ExitCode::from_anyhow(&err);
        if let Some(message) = &exit.message {
            eprintln!("{} {}", "Error:".red().bold(), message);
        }
        std::process::exit(exit.code);
    }
}
