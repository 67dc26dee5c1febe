//! wlanperf - periodic WLAN health probe
//!
//! Each invocation performs one cycle: check the wireless adapter, run a
//! speed test and up to three latency probes, deliver the result row to a
//! per-day worksheet (or cache it locally) and prune old local data.
//! Schedule it from cron.

mod adapter;
mod config;
mod delivery;
mod output;
mod probes;
mod retention;
mod run;
mod sink;
mod storage;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::adapter::SystemAdapter;
use crate::probes::{IcmpPinger, SpeedtestCli};
use crate::run::{Probes, RunOutcome};
use crate::sink::GoogleSheets;
use crate::storage::{DbLock, LocalStore};

/// Exit status of a run the adapter gate refused
const EXIT_ABORTED: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "wlanperf")]
#[command(version)]
#[command(about = "Wireless LAN performance probe", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "wlanperf.conf")]
    config: PathBuf,
    
    /// Export local sample history for a time range
    #[arg(long)]
    export: bool,
    
    /// Output file for export
    #[arg(short, long)]
    output: Option<PathBuf>,
    
    /// Time range: --last 24h, 7d, etc.
    #[arg(long)]
    last: Option<String>,
    
    /// Start time for range: YYYY-MM-DD HH:MM
    #[arg(long)]
    start: Option<String>,
    
    /// End time for range: YYYY-MM-DD HH:MM
    #[arg(long)]
    end: Option<String>,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    
    let mut config = config::Config::load(&args.config)?;
    
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();
    
    info!("wlanperf v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from {:?}", args.config);
    
    let lock = DbLock::new(
        config.lock_file(),
        Duration::from_secs(config.general.lock_wait_secs),
        Duration::from_secs(config.general.lock_stale_secs),
    );
    
    if args.export {
        info!("Export mode");
        let store = LocalStore::open(&config.general.db_file, lock)
            .with_context(|| format!("Failed to open database {:?}", config.general.db_file))?;
        run_export(&store, &args)?;
        return Ok(ExitCode::SUCCESS);
    }
    
    // Falls back to an in-memory store; remote delivery still runs
    let store = LocalStore::open_or_volatile(&config.general.db_file, lock)
        .context("Failed to open fallback in-memory database")?;
    
    let mut probes = Probes {
        link: SystemAdapter::new(config.general.wlan_if.clone()),
        meter: SpeedtestCli::new(config.speedtest.command.clone()),
        pinger: IcmpPinger::new().context("Failed to initialize ICMP pinger")?,
    };
    
    match run::run_once(&mut config, &store, &mut probes, GoogleSheets::open, Local::now()) {
        RunOutcome::Completed(_) => Ok(ExitCode::SUCCESS),
        RunOutcome::Aborted(reason) => {
            info!("Run aborted: {}", reason);
            Ok(ExitCode::from(EXIT_ABORTED))
        }
    }
}

fn run_export(store: &LocalStore, args: &Args) -> Result<()> {
    let (start, end) = parse_time_range(args)?;
    
    let records = store.query_history(start, end)?;
    info!("Found {} samples", records.len());
    
    let output_path = args.output.clone().unwrap_or_else(|| {
        PathBuf::from(format!("wlanperf_export_{}.csv", Local::now().format("%Y%m%d_%H%M%S")))
    });
    
    output::export_csv(&records, &output_path)?;
    
    info!("Exported to {:?}", output_path);
    
    Ok(())
}

fn parse_time_range(args: &Args) -> Result<(i64, i64)> {
    if let Some(last) = &args.last {
        let duration = parse_duration(last)?;
        let end = Local::now().timestamp();
        Ok((end - duration.num_seconds(), end))
    } else if let (Some(start), Some(end)) = (&args.start, &args.end) {
        Ok((parse_local_time(start)?, parse_local_time(end)?))
    } else {
        // Default: last 24 hours
        let end = Local::now().timestamp();
        Ok((end - 24 * 3600, end))
    }
}

fn parse_local_time(s: &str) -> Result<i64> {
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")
        .with_context(|| format!("Invalid time {:?}, expected YYYY-MM-DD HH:MM", s))?;
    let local = naive
        .and_local_timezone(Local)
        .earliest()
        .with_context(|| format!("{:?} does not exist in the local timezone", s))?;
    Ok(local.timestamp())
}

fn parse_duration(s: &str) -> Result<chrono::Duration> {
    let s = s.trim();
    if let Some(hours) = s.strip_suffix('h') {
        Ok(chrono::Duration::hours(hours.parse()?))
    } else if let Some(days) = s.strip_suffix('d') {
        Ok(chrono::Duration::days(days.parse()?))
    } else if let Some(minutes) = s.strip_suffix('m') {
        Ok(chrono::Duration::minutes(minutes.parse()?))
    } else {
        anyhow::bail!("Invalid duration format. Use: 24h, 7d, 30m, etc.")
    }
}
