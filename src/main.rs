use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use noisewatch::audio::CpalSource;
use noisewatch::kernel::time::SystemClock;
use noisewatch::store::render_export;
use noisewatch::{MonitorConfig, Session, StoreHandle};

#[derive(Debug, Parser)]
#[command(about = "Ambient noise monitor with detection log and clip capture", version)]
struct Cli {
    /// Directory holding the event log and captured clips.
    #[arg(long, env = "NOISEWATCH_DATA_DIR", default_value = "noisewatch-data")]
    data_dir: PathBuf,

    /// JSON file overriding monitor settings.
    #[arg(long, env = "NOISEWATCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Monitor the default microphone until Ctrl+C. Type a number to change the threshold.
    Monitor {
        #[arg(long)]
        threshold: Option<u32>,
    },
    /// Show the most recent log entries, newest first.
    Recent {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Write the full log as text, oldest first.
    Export {
        #[arg(long, default_value = "noise_log.txt")]
        out: PathBuf,
    },
    #[command(subcommand)]
    Clips(ClipsCommand),
    #[command(subcommand)]
    Log(LogCommand),
}

#[derive(Debug, Subcommand)]
enum ClipsCommand {
    List,
    /// Copy every clip into a directory under its download name.
    Export { dir: PathBuf },
    Remove { id: u64 },
    Clear,
}

#[derive(Debug, Subcommand)]
enum LogCommand {
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => MonitorConfig::load(path)?,
        None => MonitorConfig::default(),
    };

    let (store, store_thread) = StoreHandle::spawn(cli.data_dir.clone())?;

    match cli.command {
        Command::Monitor { threshold } => monitor(config, store.clone(), threshold).await?,
        Command::Recent { limit } => {
            for entry in store.recent_logs(limit.unwrap_or(config.recent_limit)).await? {
                println!("{}", entry.export_line());
            }
        }
        Command::Export { out } => {
            let entries = store.export_logs().await?;
            std::fs::write(&out, render_export(&entries))?;
            println!("Wrote {} entries to {}", entries.len(), out.display());
        }
        Command::Clips(ClipsCommand::List) => {
            for clip in store.list_clips().await? {
                println!("#{:<5} {}  {:>9} bytes  {}", clip.id, clip.time, clip.bytes, clip.download_name());
            }
        }
        Command::Clips(ClipsCommand::Export { dir }) => {
            let written = store.export_clips(dir.clone()).await?;
            println!("Exported {} clips to {}", written.len(), dir.display());
        }
        Command::Clips(ClipsCommand::Remove { id }) => store.remove_clip(id).await?,
        Command::Clips(ClipsCommand::Clear) => store.clear_clips().await?,
        Command::Log(LogCommand::Clear) => store.clear_logs().await?,
    }

    drop(store);
    let _ = tokio::task::spawn_blocking(move || store_thread.join()).await;
    Ok(())
}

async fn monitor(config: MonitorConfig, store: StoreHandle, threshold: Option<u32>) -> anyhow::Result<()> {
    let (threshold_tx, threshold_rx) = watch::channel(threshold.unwrap_or(config.threshold));
    let cancel = CancellationToken::new();

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Stop requested");
        }
        ctrl_c.cancel();
    });

    // Plain thread: a blocked stdin read must not hold up runtime shutdown.
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            match line.trim().parse::<u32>() {
                Ok(value) => {
                    tracing::info!("Threshold set to {}", value);
                    let _ = threshold_tx.send(value);
                }
                Err(_) if line.trim().is_empty() => {}
                Err(_) => tracing::warn!("Not a threshold: '{}'", line.trim()),
            }
        }
    });

    let (mut session, mut levels) = Session::new(config, store, SystemClock, threshold_rx);

    tokio::spawn(async move {
        let mut every = tokio::time::interval(Duration::from_secs(1));
        loop {
            every.tick().await;
            if levels.has_changed().is_err() {
                break;
            }
            if let Some(reading) = *levels.borrow_and_update() {
                let flag = if reading.above_threshold { " !" } else { "" };
                eprintln!("{:>3} dB{}", reading.value, flag);
            }
        }
    });

    let source = CpalSource::open(2.0);
    let snapshot = session.run(source, cancel).await?;
    println!(
        "Session: {} ticks, peak {} dB, {} detections, {} clips",
        snapshot.level_stats.ticks,
        snapshot.level_stats.peak_level,
        snapshot.level_stats.detections,
        snapshot.capture_stats.clips
    );
    Ok(())
}
