//! Command-line host for the tracker.
//!
//! Stores the destination and token, then runs the sampling and sync loops
//! until Ctrl-C or until the run budget is spent.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use charge_tracker::logging::{init_logging, LoggingConfig};
use charge_tracker::prelude::*;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Sample database path
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Preferences file holding destination, token and producer identity
    #[arg(long, global = true)]
    prefs: Option<PathBuf>,

    /// Sheets API endpoint
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sample and sync until interrupted or the run budget is spent
    Run {
        /// Battery device directory (defaults to the first battery found)
        #[arg(long)]
        device: Option<PathBuf>,

        /// Sampling interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        tick_ms: u64,

        /// Seconds between sync cycles
        #[arg(long, default_value_t = 60)]
        sync_secs: u64,

        /// Maximum run length in hours
        #[arg(long, default_value_t = 10.0)]
        max_hours: f64,
    },
    /// Verify access to a spreadsheet and save it as the destination
    SetDestination {
        spreadsheet_id: String,

        /// Save without probing the spreadsheet
        #[arg(long)]
        skip_check: bool,
    },
    /// Save an access token ("-" reads it from stdin)
    SetToken { token: String },
    /// Forget the saved access token
    SignOut,
    /// Run one sync cycle now (refused while `run` holds the store)
    Sync,
    /// Show identity, destination and buffered sample counts
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let logging = if args.verbose {
        LoggingConfig::development()
    } else {
        LoggingConfig::default()
    };
    init_logging(logging.with_json_format(args.json_logs).with_tracker_level(if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    }))
    .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    let mut sheets = SheetsConfig::new();
    if let Some(endpoint) = &args.endpoint {
        sheets = sheets.with_endpoint(endpoint.as_str());
    }
    let mut config = TrackerConfig::new().with_sheets(sheets);
    if let Some(store) = &args.store {
        config = config.with_store_path(store);
    }
    if let Some(prefs) = &args.prefs {
        config = config.with_preferences_path(prefs);
    }

    let credentials = Arc::new(
        FileCredentialStore::open(config.preferences_path()?)
            .context("opening preferences")?,
    );

    match args.command {
        Command::Run {
            device,
            tick_ms,
            sync_secs,
            max_hours,
        } => {
            let max_run = parse_max_hours(max_hours)?;
            let config = config
                .with_tick_interval(Duration::from_millis(tick_ms))
                .with_sync_interval(Duration::from_secs(sync_secs))
                .with_max_run_duration(max_run);
            let source = match device {
                Some(dir) => PowerSupplySource::new(dir),
                None => PowerSupplySource::discover(POWER_SUPPLY_ROOT)?,
            };
            run(config, credentials, Arc::new(source)).await
        }
        Command::SetDestination {
            spreadsheet_id,
            skip_check,
        } => {
            if !skip_check {
                let token = credentials
                    .credential()
                    .context("no access token saved; run set-token first")?;
                let client = SheetsClient::new(config.sheets().clone())?;
                if !client.check_access(&spreadsheet_id, &token).await {
                    bail!("spreadsheet {spreadsheet_id} is not accessible with the saved token");
                }
            }
            credentials.set_destination_id(&spreadsheet_id)?;
            println!("Destination saved: {spreadsheet_id}");
            Ok(())
        }
        Command::SetToken { token } => {
            let token = if token == "-" {
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf)?;
                buf.trim().to_string()
            } else {
                token
            };
            if token.is_empty() {
                bail!("empty token");
            }
            credentials.set_credential(AccessToken::new(token))?;
            println!("Token saved");
            Ok(())
        }
        Command::SignOut => {
            credentials.clear_credential()?;
            println!("Token cleared");
            Ok(())
        }
        Command::Sync => {
            let _lock = StoreLock::acquire(&config.store_path()?)?;
            let tracker = build_tracker(config, credentials, Arc::new(FixedSource::new(0)))?;
            let outcome = tracker.sync_now().await?;
            println!("{outcome:?}");
            Ok(())
        }
        Command::Status => {
            let store = SampleStore::open(&config.store_path()?)?;
            println!("producer:    {}", credentials.producer_identity());
            println!(
                "destination: {}",
                credentials.destination_id().as_deref().unwrap_or("(none)")
            );
            println!(
                "token:       {}",
                if credentials.credential().is_some() {
                    "saved"
                } else {
                    "(none)"
                }
            );
            println!("samples:     {}", store.count()?);
            println!("unsynced:    {}", store.unsynced_count()?);
            Ok(())
        }
    }
}

fn parse_max_hours(max_hours: f64) -> Result<Duration> {
    if !(max_hours.is_finite() && max_hours > 0.0) {
        bail!("--max-hours must be a positive number");
    }
    Duration::try_from_secs_f64(max_hours * 3600.0)
        .map_err(|e| anyhow::anyhow!("--max-hours {max_hours} is out of range: {e}"))
}

fn build_tracker(
    config: TrackerConfig,
    credentials: Arc<FileCredentialStore>,
    source: Arc<dyn SampleSource>,
) -> Result<Tracker> {
    let store = Arc::new(SampleStore::open(&config.store_path()?).context("opening store")?);
    let sink = Arc::new(SheetsClient::new(config.sheets().clone())?);
    Ok(Tracker::new(config, store, source, sink, credentials)?)
}

async fn run(
    config: TrackerConfig,
    credentials: Arc<FileCredentialStore>,
    source: Arc<dyn SampleSource>,
) -> Result<()> {
    let _lock = StoreLock::acquire(&config.store_path()?)?;
    let mut tracker = build_tracker(config, credentials, source)?;
    let producer_id = tracker.start_with_stored_identity();
    info!(producer_id = %producer_id, "Tracking started, press Ctrl-C to stop");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        _ = tracker.wait_for_sampler() => {}
    }

    let report = tracker.stop().await;
    if let Some(sampler) = &report.sampler {
        println!(
            "Sampled {} readings ({} skipped) over {:?}",
            sampler.inserted, sampler.failed_ticks, sampler.elapsed
        );
    }
    if let Some(sync) = &report.sync {
        println!(
            "Synced {} rows in {} batches ({} failed cycles)",
            sync.rows_synced, sync.batches_sent, sync.failed_cycles
        );
    }
    Ok(())
}
