use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::{
    flush_pending, open_engine, CheckinCommand, ConfigCommand, MealCommand, RecordCommand,
    SyncCommand, WorkoutCommand,
};
use config::Config;

#[derive(Parser)]
#[command(name = "fitsync")]
#[command(version)]
#[command(about = "Offline-first fitness log with background sync", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, read, update, delete and list records in any collection
    Record(RecordCommand),

    /// Log and list workouts
    Workout(WorkoutCommand),

    /// Log meals and view meal history
    Meal(MealCommand),

    /// Record attendance at a class
    Checkin(CheckinCommand),

    /// Sync with remote server
    Sync(SyncCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

impl Commands {
    /// Commands that change data flush older buffered changes afterwards.
    fn is_write(&self) -> bool {
        match self {
            Commands::Record(cmd) => cmd.is_write(),
            Commands::Workout(cmd) => cmd.is_write(),
            Commands::Meal(cmd) => cmd.is_write(),
            Commands::Checkin(_) => true,
            Commands::Sync(_) | Commands::Config(_) => false,
        }
    }
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so command output stays pipeable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fitsync=warn,fitsync_core=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let cli_config_path = cli.config.clone();
    let config = Config::load(cli.config)?;

    let Some(command) = cli.command else {
        println!("Use --help to see available commands");
        return Ok(());
    };

    if let Commands::Config(cmd) = &command {
        return cmd.run(&config, cli_config_path);
    }

    let engine = open_engine(&config).await?;
    match &command {
        Commands::Record(cmd) => cmd.run(&engine).await?,
        Commands::Workout(cmd) => cmd.run(&engine, &config).await?,
        Commands::Meal(cmd) => cmd.run(&engine, &config).await?,
        Commands::Checkin(cmd) => cmd.run(&engine, &config).await?,
        Commands::Sync(cmd) => cmd.run(&engine, &config).await?,
        Commands::Config(_) => {}
    }

    if command.is_write() {
        flush_pending(&engine).await;
    }

    let status = engine.status();
    if command.is_write() && status.pending_ops > 0 {
        eprintln!(
            "{} change(s) saved locally and waiting to sync.",
            status.pending_ops
        );
    }

    Ok(())
}
