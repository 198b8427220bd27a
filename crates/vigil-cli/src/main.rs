use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use vigil_core::config::default_config_path;
use vigil_core::store::Store;
use vigil_core::{
    report, spawn_monitor_loop, spawn_scan, NotificationSink, Notifier, ScanConfig,
    SqliteStore, WorkerEvent,
};

#[derive(Parser)]
#[command(name = "vigil", version, about = "File integrity monitor", long_about = None)]
struct Cli {
    /// Configuration file; defaults to the platform config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scan and print the summary
    Scan,

    /// Keep scanning at the configured interval until interrupted
    Watch,

    /// Show the tracked baseline
    Status,

    /// Show recent history events
    History {
        /// Maximum number of events to show
        #[arg(short, long, default_value = "50")]
        limit: u32,
    },

    /// Export the current state to a report file
    Export {
        #[arg(long, value_enum, default_value = "csv")]
        format: ExportFormat,

        /// Output file path
        #[arg(long)]
        out: PathBuf,
    },

    /// Wipe the baseline and its history
    Clear,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ExportFormat {
    Csv,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = ScanConfig::load(&config_path)?;
    config.validate()?;

    match cli.command {
        Commands::Scan => scan_once(config).await,
        Commands::Watch => watch(config).await,
        Commands::Status => status(&config),
        Commands::History { limit } => history(&config, limit),
        Commands::Export { format, out } => export(&config, format, &out),
        Commands::Clear => clear(&config),
    }
}

async fn scan_once(config: ScanConfig) -> Result<()> {
    let (tx, mut rx) = mpsc::channel(256);
    let (handle, _cancel) = spawn_scan(config, tx)?;
    let notifier = Notifier::new(vec![NotificationSink::Log]);

    let mut outcome = Ok(());
    while let Some(event) = rx.recv().await {
        match event {
            WorkerEvent::Progress { current, total } => {
                debug!(current, total, "progress");
            }
            WorkerEvent::FileProcessed { path } => {
                debug!(%path, "processed");
            }
            WorkerEvent::Finished {
                summary, notice, ..
            } => {
                notifier.dispatch(&summary, &notice);
                println!(
                    "total: {}  changed: {}  new: {}  deleted: {}  errors: {}",
                    summary.total_files,
                    summary.changed_count,
                    summary.new_count,
                    summary.deleted_count,
                    summary.error_count,
                );
                println!("overall: {}", summary.overall_status().as_str());
            }
            WorkerEvent::Failed { message } => {
                outcome = Err(anyhow!(message));
            }
        }
    }
    handle.await?;
    outcome
}

async fn watch(config: ScanConfig) -> Result<()> {
    let in_flight = Arc::new(AtomicBool::new(false));
    let interval = config.interval_seconds;
    let enabled = config.monitoring_enabled;

    let scan_config = config.clone();
    let flight = in_flight.clone();
    let (join, handle) = spawn_monitor_loop(interval, enabled, in_flight, move || {
        let config = scan_config.clone();
        let flight = flight.clone();
        async move {
            flight.store(true, Ordering::Relaxed);
            if let Err(err) = scan_once(config).await {
                error!(%err, "scheduled scan failed");
            }
            flight.store(false, Ordering::Relaxed);
        }
    });

    // One scan right away; the interval applies between completions.
    handle.trigger_now();

    tokio::signal::ctrl_c().await?;
    info!("interrupted, shutting down");
    handle.shutdown();
    join.await?;
    Ok(())
}

fn open_store(config: &ScanConfig) -> Result<SqliteStore> {
    let mut store = SqliteStore::open(&config.database_path)?;
    store.set_hmac_key(config.hmac_key_bytes());
    Ok(store)
}

fn status(config: &ScanConfig) -> Result<()> {
    let store = open_store(config)?;
    let baseline = store.load_baseline()?;
    for record in &baseline {
        let sig = if record.signature_valid { ' ' } else { '!' };
        println!(
            "{:<8}{} {:>12}  {}",
            record.status.as_str(),
            sig,
            record.metadata.size,
            record.metadata.path,
        );
    }
    println!("{} files tracked", baseline.len());
    Ok(())
}

fn history(config: &ScanConfig, limit: u32) -> Result<()> {
    let store = open_store(config)?;
    for event in store.load_history(limit)? {
        // -1 encodes "first observation" on the wire.
        let old = event.old_status.unwrap_or(-1);
        println!(
            "{}  {}  {} -> {}  {}",
            event.scan_time.to_rfc3339(),
            event.file_path,
            old,
            event.new_status,
            event.comment,
        );
    }
    Ok(())
}

fn export(config: &ScanConfig, format: ExportFormat, out: &PathBuf) -> Result<()> {
    let store = open_store(config)?;
    let records = store.load_baseline()?;
    let payload = match format {
        ExportFormat::Csv => report::to_csv(&records),
        ExportFormat::Json => report::to_json(&records)?,
    };
    std::fs::write(out, payload)?;
    println!("report written to {}", out.display());
    Ok(())
}

fn clear(config: &ScanConfig) -> Result<()> {
    let store = open_store(config)?;
    store.clear_all()?;
    println!("baseline and history cleared");
    Ok(())
}
