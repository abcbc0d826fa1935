use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hsp::config::{load_source_list, Settings};
use hsp::control::{Controller, Reply};
use hsp::input::{load_all, LoadHints, SourceSpec};
use hsp::{PlaybackEngine, PlaybackError, PlaybackMode};

const DEFAULT_SOURCE_LIST: &str = "histfile_list";

#[derive(Parser, Debug)]
#[command(name = "hsp")]
#[command(about = "High-speed playback of captured terminal command sessions", long_about = None)]
#[command(version)]
struct Cli {
    /// History files as path[:format] (format: session, msf_prompt, csv)
    sources: Vec<String>,

    /// Source list with one path:format per line
    #[arg(short, long)]
    list: Option<PathBuf>,

    /// MANUAL, REALTIME or EVENTINTERVAL
    #[arg(short, long)]
    mode: Option<String>,

    /// Playback rate for REALTIME, 2.0 = twice as fast
    #[arg(short, long)]
    rate: Option<f64>,

    /// Seconds between commands in EVENTINTERVAL
    #[arg(short, long)]
    interval: Option<f64>,

    /// Start playing instead of paused
    #[arg(long)]
    play: bool,

    #[arg(long, env = "HSP_SESSIONS_DIR")]
    sessions_dir: Option<PathBuf>,

    /// File name prefix for saved sessions
    #[arg(long)]
    save_prefix: Option<String>,

    /// Store the resulting playback settings as the new defaults
    #[arg(long)]
    save_settings: bool,

    /// User for records that do not name one
    #[arg(long)]
    user: Option<String>,

    /// Host for records that do not name one
    #[arg(long)]
    host: Option<String>,

    /// Date for records that only carry a time of day (YYYY-MM-DD)
    #[arg(long)]
    date: Option<NaiveDate>,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(mode) = &self.mode {
            settings.mode = PlaybackMode::parse_or_manual(mode);
        }
        if let Some(rate) = self.rate {
            settings.rate = rate;
        }
        if let Some(interval) = self.interval {
            settings.interval_secs = interval;
        }
        if self.play {
            settings.start_paused = false;
        }
        if let Some(dir) = &self.sessions_dir {
            settings.sessions_dir = dir.clone();
        }
        if let Some(prefix) = &self.save_prefix {
            settings.save_prefix = prefix.clone();
        }
    }

    fn hints(&self) -> LoadHints {
        LoadHints {
            user: self.user.clone(),
            host: self.host.clone(),
            date: self.date,
        }
    }

    async fn collect_sources(&self, settings: &Settings) -> Result<Vec<SourceSpec>> {
        let mut sources: Vec<SourceSpec> = self.sources.iter().map(|s| SourceSpec::parse(s)).collect();

        match &self.list {
            Some(list) => sources.extend(load_source_list(list, &settings.sessions_dir).await?),
            None if sources.is_empty() && Path::new(DEFAULT_SOURCE_LIST).exists() => {
                info!("Using source list {}", DEFAULT_SOURCE_LIST);
                sources.extend(load_source_list(Path::new(DEFAULT_SOURCE_LIST), &settings.sessions_dir).await?);
            }
            None => {}
        }

        Ok(sources)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the replay, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load();
    cli.apply(&mut settings);
    let config = settings.playback_config().context("Invalid playback settings")?;
    if cli.save_settings {
        match settings.save() {
            Ok(()) => info!("Saved settings"),
            Err(e) => warn!("Could not save settings: {:#}", e),
        }
    }

    let sources = cli.collect_sources(&settings).await?;
    if sources.is_empty() {
        anyhow::bail!("No history sources; pass files or --list");
    }

    let history = load_all(&sources, &cli.hints()).await;
    match (history.start_time(), history.end_time()) {
        (Some(start), Some(end)) => info!("Replaying {} commands, {} to {}", history.len(), start, end),
        _ => warn!("Nothing to replay"),
    }

    let engine = Arc::new(PlaybackEngine::new(history, config)?);
    let cancel = engine.cancellation_token();
    let clock = engine.spawn_clock();

    let controller = Controller::new(Arc::clone(&engine), settings.save_path_prefix());
    println!("{}", controller.keymap().help_text());
    println!("{}", engine.status());
    let mut controls = tokio::spawn(run_controls(controller, spawn_stdin_reader(), cancel.clone()));

    let interrupt = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted");
                engine.cancel();
            }
        })
    };

    replay(&engine).await;

    // keep taking flags and comments until the reviewer quits
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = &mut controls => {}
    }

    engine.cancel();
    interrupt.abort();
    if let Err(e) = clock.await {
        error!("Clock task failed: {}", e);
    }

    Ok(())
}

/// Print commands as the engine releases them
async fn replay(engine: &PlaybackEngine) {
    loop {
        match engine.next().await {
            Ok(Some(command)) => {
                print!("{}", command);
                println!("{}", engine.status());
            }
            Ok(None) => {
                println!("========== END OF HISTORY ==========");
                println!("{}", engine.status());
                break;
            }
            Err(PlaybackError::Cancelled) => break,
            Err(e) => {
                error!("Playback stopped: {}", e);
                break;
            }
        }
    }
}

/// Read stdin on its own thread so a pending read never holds up shutdown
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn run_controls(controller: Controller, mut lines: mpsc::Receiver<String>, cancel: CancellationToken) {
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.recv() => line,
        };
        let Some(line) = line else { break };

        match controller.handle_line(&line).await {
            Reply::Message(message) => println!("{}", message),
            Reply::Rejected(message) => println!("! {}", message),
            Reply::Quit => break,
        }
    }
}
