use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod app;
mod config;
mod menu;
mod session;

use app::App;
use config::Config;
use session::StopSignal;

#[derive(Parser)]
#[command(name = "rollcall", version, about = "Face-recognition attendance")]
struct Cli {
    /// Registry root (overrides config)
    #[arg(long, global = true)]
    images_dir: Option<PathBuf>,
    /// Attendance CSV (overrides config)
    #[arg(long, global = true)]
    ledger: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive menu (default)
    Menu,
    /// Register reference images for a person
    Register {
        name: String,
        /// Image files to register instead of capturing from the camera
        #[arg(short, long = "image")]
        images: Vec<PathBuf>,
    },
    /// Run an attendance session until Ctrl-C
    Run {
        /// Stop after this many frames
        #[arg(long)]
        max_frames: Option<usize>,
        /// Print the session summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a registered person (attendance rows are kept)
    Delete { name: String },
    /// List registered people
    List {
        #[arg(long)]
        json: bool,
    },
    /// Print attendance rows
    Attendance {
        /// Only rows for this date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    if let Some(dir) = cli.images_dir {
        config.images_dir = dir;
    }
    if let Some(path) = cli.ledger {
        config.ledger_path = path;
    }
    tracing::debug!(?config, "configuration resolved");

    let stop = Arc::new(StopSignal::default());
    tokio::spawn(watch_ctrl_c(stop.clone()));

    let command = cli.command.unwrap_or(Commands::Menu);
    tokio::task::spawn_blocking(move || dispatch(command, App::new(config, stop)))
        .await
        .context("command thread panicked")?
}

/// Ctrl-C stops a running session; with none running it exits.
async fn watch_ctrl_c(stop: Arc<StopSignal>) {
    loop {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for Ctrl-C");
            return;
        }
        if stop.request() {
            tracing::info!("stop requested");
        } else {
            std::process::exit(130);
        }
    }
}

fn dispatch(command: Commands, mut app: App) -> Result<()> {
    match command {
        Commands::Menu => {
            let stdin = std::io::stdin();
            menu::run(&mut stdin.lock(), &mut std::io::stdout(), &mut app)
        }
        Commands::Register { name, images } => app.register(&name, &images),
        Commands::Run { max_frames, json } => app.recognize(max_frames, json),
        Commands::Delete { name } => app.delete(&name),
        Commands::List { json } => app.list(json),
        Commands::Attendance { date, json } => app.attendance(date, json),
        Commands::Devices => {
            app.devices();
            Ok(())
        }
    }
}
