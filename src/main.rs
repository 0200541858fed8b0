mod api;
mod app;
mod cache;
mod clock;
mod commands;
mod config;
mod db;
mod logging;
mod session;
mod sync;
mod view;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "stockroom")]
#[command(about = "Inventory admin from the terminal, with local caching and optimistic writes")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/stockroom/config.yaml)
  #[arg(short, long, env = "STOCKROOM_CONFIG")]
  config: Option<PathBuf>,

  /// Rows per list page
  #[arg(long)]
  page_size: Option<u32>,

  /// Also write logs to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.verbose)?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override page size if specified on command line
  let config = match args.page_size {
    Some(page_size) if page_size > 0 => config::Config { page_size, ..config },
    _ => config,
  };

  let mut app = app::App::new(config)?;
  app.run(args.command).await
}
