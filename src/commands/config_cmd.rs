use clap::{Args, Subcommand};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use super::OutputFormat;
use crate::config::Config;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Initialize configuration file
    Init,
}

const DEFAULT_CONFIG: &str = r#"# fitsync configuration

# Local mirror database (default: <data dir>/fitsync/fitsync.db)
# database_path: fitsync.db

# Offline change queue (default: <data dir>/fitsync/sync_queue.json)
# queue_path: sync_queue.json

# Member id used for logs when --member is not given
created_by: default

# sync:
#   server_url: "http://localhost:8080"
#   api_key: "your-api-key"
#   interval_secs: 300
#   request_timeout_secs: 10
#   probe_timeout_secs: 5
#   max_queue_size: 100
#   max_retries: 3
"#;

impl ConfigCommand {
    pub fn run(
        &self,
        config: &Config,
        cli_config_path: Option<PathBuf>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => print_config(config),
                }
                Ok(())
            }

            ConfigSubcommand::Init => {
                let config_path = cli_config_path.unwrap_or_else(Config::default_config_path);

                if config_path.exists() {
                    println!("Config file already exists: {}", config_path.display());
                    println!("Use 'fitsync config show' to view current configuration.");
                    return Ok(());
                }

                if let Some(parent) = config_path.parent() {
                    fs::create_dir_all(parent)?;
                }

                let mut file = fs::File::create(&config_path)?;
                file.write_all(DEFAULT_CONFIG.as_bytes())?;

                println!("Created config file: {}", config_path.display());
                println!("\nEdit this file to customize your settings.");
                Ok(())
            }
        }
    }
}

fn print_config(config: &Config) {
    println!("Configuration");
    println!("=============\n");

    if let Some(path) = &config.config_file {
        println!("Config file: {}", path.display());
    } else {
        println!(
            "Config file: {} (not found)",
            Config::default_config_path().display()
        );
    }
    println!();

    println!("database_path: {}", config.database_path.value.display());
    println!("  source: {}", config.database_path.source);
    println!();

    println!("queue_path: {}", config.queue_path.value.display());
    println!("  source: {}", config.queue_path.source);
    println!();

    println!("created_by: {}", config.created_by.value);
    println!("  source: {}", config.created_by.source);
    println!();

    let sync = &config.sync;
    println!("sync:");
    println!(
        "  server_url: {}",
        sync.server_url.as_deref().unwrap_or("(not set)")
    );
    println!(
        "  api_key: {}",
        if sync.api_key.is_some() {
            "(set)"
        } else {
            "(not set)"
        }
    );
    println!("  interval_secs: {}", sync.interval_secs);
    println!("  request_timeout_secs: {}", sync.request_timeout_secs);
    println!("  probe_timeout_secs: {}", sync.probe_timeout_secs);
    println!("  max_queue_size: {}", sync.max_queue_size);
    println!("  max_retries: {}", sync.max_retries);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, DEFAULT_CONFIG).unwrap();

        let config = Config::load(Some(path)).unwrap();
        assert_eq!(config.created_by.value, "default");
        assert!(!config.sync.is_configured());
    }

    #[test]
    fn test_init_writes_once() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("config.yaml");
        let config = Config::load(Some(path.clone())).unwrap();
        let cmd = ConfigCommand {
            command: ConfigSubcommand::Init,
        };

        cmd.run(&config, Some(path.clone())).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), DEFAULT_CONFIG);

        fs::write(&path, "created_by: someone").unwrap();
        cmd.run(&config, Some(path.clone())).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "created_by: someone");
    }
}
