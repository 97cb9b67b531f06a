mod cache;
mod client;
mod config;
mod fetch;
mod kv;
mod manifest;
mod message;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use cache::{CacheStore, SqliteCacheStore};
use client::{DisplayMode, InstallPromptCoordinator};
use config::Config;
use fetch::{FetchRequest, HttpFetcher};
use kv::SqliteKv;
use worker::OfflineController;

#[derive(Parser, Debug)]
#[command(name = "tatame")]
#[command(about = "Offline shell cache for the Tatame BJJ training tracker")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tatame/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install and activate the shell cache for the configured version
  Install,
  /// Serve one request through the offline controller
  Fetch {
    /// Absolute path, e.g. /api/trainings
    path: String,
  },
  /// Check whether newer shell content has been deployed
  CheckUpdate,
  /// Validate a web app manifest for installability
  CheckManifest {
    /// Path to the manifest JSON document
    path: PathBuf,
  },
  /// Show cache stores and install-prompt state
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_tracing()?;

  let config = Config::load(args.config.as_deref())?;

  let storage = Arc::new(SqliteCacheStore::open()?);
  let fetcher = Arc::new(HttpFetcher::new(
    &config.app.base_url,
    Config::get_api_token(),
  )?);
  let controller = OfflineController::new(
    config.app.version.clone(),
    config.shell.precache.clone(),
    Arc::clone(&storage),
    fetcher,
  );

  match args.command {
    Command::Install => {
      let mut controller = controller;
      controller.start().await?;
      let count = storage.entry_count(controller.store_name())?;
      println!(
        "{} v{}: shell cache {} active with {} entries",
        config.app.name,
        config.app.version,
        controller.store_name(),
        count
      );
    }
    Command::Fetch { path } => {
      let mut controller = controller;
      controller.start().await?;
      let served = controller.handle_request(&FetchRequest::get(path)).await?;
      println!(
        "HTTP {} ({:?}, {} bytes)",
        served.response.status,
        served.source,
        served.response.body.len()
      );
    }
    Command::CheckUpdate => {
      if controller.check_for_update().await? {
        println!("Update available: newer shell content is deployed");
      } else {
        println!("Shell is up to date");
      }
    }
    Command::CheckManifest { path } => {
      let manifest = manifest::WebAppManifest::load(&path)?;
      manifest.validate()?;
      println!(
        "{} is installable ({} icons, start_url {})",
        manifest.name,
        manifest.icons.len(),
        manifest.start_url
      );
    }
    Command::Status => {
      println!("Configured version: {}", config.app.version);
      for store in storage.list_stores()? {
        println!("  store {}: {} entries", store, storage.entry_count(&store)?);
      }

      let prompts = InstallPromptCoordinator::new(
        SqliteKv::open()?,
        config.install_prompt.policy(),
        DisplayMode::Browser,
      );
      let state = prompts.state()?;
      println!(
        "Install prompt: shown {} time(s), installed: {}, last dismissed: {}",
        state.prompt_shown_count,
        state
          .installed_at
          .map(|t| t.to_rfc3339())
          .unwrap_or_else(|| "never".to_string()),
        state
          .dismissed_at
          .map(|t| t.to_rfc3339())
          .unwrap_or_else(|| "never".to_string()),
      );
    }
  }

  Ok(())
}

/// Log to a daily-rotated file under the data directory; stderr stays clean
/// for command output. Returns the guard that flushes the writer on exit.
fn init_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .map(|p| p.join("tatame").join("logs"))
    .unwrap_or_else(|| PathBuf::from("."));

  let appender = tracing_appender::rolling::daily(log_dir, "tatame.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
