use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod capture;
mod config;
mod console;
mod engine;
mod enroll;
mod helper;
mod menu;
#[cfg(test)]
mod testing;

use capture::V4lCameraFactory;
use config::Config;
use console::{Console, ConsoleAnnouncer, ConsoleOverlay};
use engine::{Announcer, LocalClock, SessionEnd, SessionIo};
use helper::{HelperAnalyzer, OfflineAnalyzer};
use rollcall_core::{summarize, FaceAnalyzer, Ledger};

#[derive(Parser)]
#[command(name = "rollcall", about = "Face recognition attendance")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/rollcall/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive menu (default)
    Menu,
    /// Start an attendance session
    Run,
    /// Enroll one identity
    Enroll {
        #[arg(long, requires = "roll")]
        name: Option<String>,
        #[arg(long, requires = "name")]
        roll: Option<String>,
    },
    /// Print the enrolled gallery
    List,
    /// Rebuild a day's summary from its ledger file
    Summary {
        /// Day as YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command.unwrap_or(Commands::Menu) {
        Commands::Devices => {
            let devices = rollcall_hw::Camera::list_devices();
            if devices.is_empty() {
                println!("No video capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
            Ok(())
        }
        Commands::List => list_gallery(&config),
        Commands::Summary { date } => rebuild_summary(&config, date),
        command => run_interactive(command, config).await,
    }
}

/// Helper analyzer if it starts, otherwise sidecar-only loading.
fn offline_capable_analyzer(config: &Config) -> Box<dyn FaceAnalyzer> {
    match HelperAnalyzer::spawn(&config.analyzer_command, &std::env::temp_dir()) {
        Ok(helper) => Box::new(helper),
        Err(e) => {
            tracing::warn!(error = %e, "face analyzer unavailable, using cached descriptors only");
            Box::new(OfflineAnalyzer::new(e.to_string()))
        }
    }
}

fn list_gallery(config: &Config) -> Result<()> {
    let mut analyzer = offline_capable_analyzer(config);
    let ctx = menu::load_context(config, analyzer.as_mut())?;
    if ctx.gallery.is_empty() {
        println!("No faces enrolled in {}", config.gallery_dir.display());
        return Ok(());
    }
    for identity in ctx.gallery.identities() {
        println!("{:<24} {:<10} {}", identity.key.name, identity.key.roll, identity.image_path.display());
    }
    println!("{} enrolled", ctx.gallery.len());
    Ok(())
}

fn rebuild_summary(config: &Config, date: Option<NaiveDate>) -> Result<()> {
    let day = date.unwrap_or_else(|| chrono::Local::now().date_naive());
    let mut analyzer = offline_capable_analyzer(config);
    let ctx = menu::load_context(config, analyzer.as_mut())?;
    let ledger = Ledger::open(&config.records_dir, day, true).context("failed to read ledger")?;

    let report = summarize(day, &ctx.gallery, ledger.seen());
    let path = report
        .write_to(&config.records_dir)
        .with_context(|| format!("failed to write summary to {}", config.records_dir.display()))?;
    print!("{report}");
    println!();
    println!("Written to {}", path.display());
    Ok(())
}

async fn run_interactive(command: Commands, config: Config) -> Result<()> {
    let (tx, rx) = mpsc::unbounded_channel();

    // Blocking stdin reads stay on a plain thread so exit never waits on them.
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    tokio::task::spawn_blocking(move || interactive(command, config, rx))
        .await
        .context("interactive task panicked")?
}

fn interactive(command: Commands, config: Config, lines: mpsc::UnboundedReceiver<String>) -> Result<()> {
    let announcer = ConsoleAnnouncer::new(config.speech_command.as_deref());
    let mut analyzer = HelperAnalyzer::spawn(&config.analyzer_command, &std::env::temp_dir())
        .with_context(|| format!("failed to start face analyzer `{}`", config.analyzer_command))?;

    let mut ctx = menu::load_context(&config, &mut analyzer)?;
    announcer.say(&format!("Loaded {} known faces.", ctx.gallery.len()));

    let camera = V4lCameraFactory::new(config.camera_device.clone(), config.warmup_frames);
    let mut controls = Console::new(lines, Duration::from_millis(config.poll_interval_ms));
    let mut overlay = ConsoleOverlay::default();
    let clock = LocalClock;
    let settings = menu::session_settings(&config);

    let mut io = SessionIo {
        camera: &camera,
        analyzer: &mut analyzer,
        controls: &mut controls,
        overlay: &mut overlay,
        announcer: &announcer,
        clock: &clock,
    };

    match command {
        Commands::Run => {
            let outcome = engine::run_session(&mut ctx, &mut io, &settings)?;
            if outcome.end != SessionEnd::Quit {
                bail!("attendance session ended: {}", outcome.end);
            }
        }
        Commands::Enroll {
            name: Some(name),
            roll: Some(roll),
        } => {
            enroll::enroll_identity(&mut ctx, &mut io, &name, &roll)?;
        }
        Commands::Enroll { .. } => {
            enroll::run_enrollment(&mut ctx, &mut io)?;
        }
        _ => menu::run_menu(&mut ctx, &mut io, &settings)?,
    }
    Ok(())
}
