//! Sync CLI commands for replaying buffered changes against the server.

use clap::{Args, Subcommand};
use serde::Serialize;

use fitsync_core::{DrainReport, PendingOperation, SyncEngine, SyncStatus};

use super::OutputFormat;
use crate::config::Config;

/// Sync with remote server
#[derive(Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,
}

#[derive(Subcommand)]
enum SyncSubcommand {
    /// Show sync configuration, server status and pending changes
    Status {
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Keep syncing in the background until interrupted (Ctrl-C)
    Watch,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusOutput<'a> {
    configured: bool,
    server_url: Option<&'a str>,
    #[serde(flatten)]
    status: SyncStatus,
    pending: Vec<PendingOperation>,
}

impl SyncCommand {
    pub async fn run(
        &self,
        engine: &SyncEngine,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            None => self.sync(engine, config).await,
            Some(SyncSubcommand::Status { format }) => self.status(engine, config, format),
            Some(SyncSubcommand::Watch) => self.watch(engine, config).await,
        }
    }

    async fn sync(
        &self,
        engine: &SyncEngine,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        if !config.sync.is_configured() {
            print_setup_help();
            return Err("sync not configured".into());
        }

        println!("Syncing with {}...", config.sync.server_url.as_deref().unwrap_or(""));
        match engine.sync_now().await? {
            Some(report) => print_report(&report),
            None => println!("A sync is already in progress."),
        }

        let status = engine.status();
        println!();
        if status.pending_ops == 0 {
            println!("All changes synced.");
        } else {
            println!("{} change(s) still pending.", status.pending_ops);
        }
        Ok(())
    }

    fn status(
        &self,
        engine: &SyncEngine,
        config: &Config,
        format: &OutputFormat,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let status = engine.status();
        let pending = engine.pending_operations();

        if let OutputFormat::Json = format {
            let output = StatusOutput {
                configured: config.sync.is_configured(),
                server_url: config.sync.server_url.as_deref(),
                status,
                pending,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
            return Ok(());
        }

        println!("Sync Status");
        println!("===========");
        println!();

        if !config.sync.is_configured() {
            println!("Server:  not configured (changes are kept locally)");
        } else {
            let server_url = config.sync.server_url.as_deref().unwrap_or("");
            let api_key = config.sync.api_key.as_deref().unwrap_or("");
            println!("Server:  {}", server_url);
            println!("API Key: {}...", api_key.chars().take(8).collect::<String>());
            println!(
                "Status:  {}",
                if status.is_online {
                    "✓ online"
                } else {
                    "✗ unreachable"
                }
            );
        }
        println!();

        println!("Pending changes: {}", status.pending_ops);
        for op in &pending {
            print!("  - {}", op);
            if op.retry_count > 0 {
                print!(" [{} failed attempt(s)", op.retry_count);
                if let Some(err) = &op.last_error {
                    print!(": {}", err);
                }
                print!("]");
            }
            println!();
        }

        if !config.sync.is_configured() {
            println!();
            print_setup_help();
        }
        Ok(())
    }

    async fn watch(
        &self,
        engine: &SyncEngine,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        if !config.sync.is_configured() {
            print_setup_help();
            return Ok(());
        }

        let mut notices = engine.subscribe_notices();
        let background = engine.spawn_background();
        println!(
            "Watching for changes every {}s. Press Ctrl-C to stop.",
            config.sync.interval_secs
        );

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                notice = notices.recv() => match notice {
                    Ok(notice) => eprintln!("⚠ {}", notice.message()),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        eprintln!("⚠ {} notice(s) missed", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        println!("Stopping...");
        background.shutdown().await;

        let status = engine.status();
        println!("{} change(s) pending.", status.pending_ops);
        Ok(())
    }
}

fn print_report(report: &DrainReport) {
    if report.attempted == 0 {
        println!("  Nothing to sync.");
        return;
    }
    println!("  ✓ {} change(s) synced", report.succeeded);
    if report.failed > 0 {
        println!("  ✗ {} change(s) failed", report.failed);
    }
    if report.dropped > 0 {
        println!("  ✗ {} change(s) could not be synced and were discarded", report.dropped);
    }
    if report.skipped > 0 {
        println!("  … {} change(s) waiting on earlier ones", report.skipped);
    }
    if report.interrupted {
        println!("  Connection lost; remaining changes will sync later.");
    }
}

fn print_setup_help() {
    println!("To enable sync, add to your config file:");
    println!();
    println!("  sync:");
    println!("    server_url: \"http://localhost:8080\"");
    println!("    api_key: \"your-api-key\"");
    println!();
    println!("Or set environment variables:");
    println!("  FITSYNC_SYNC_URL");
    println!("  FITSYNC_SYNC_API_KEY");
}
