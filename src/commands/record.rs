use clap::{Args, Subcommand};
use serde_json::Value;

use fitsync_core::{Document, Filter, Record, SyncEngine, SyncState};

use super::OutputFormat;

/// Generic CRUD over any collection
#[derive(Args)]
pub struct RecordCommand {
    #[command(subcommand)]
    pub command: RecordSubcommand,
}

#[derive(Subcommand)]
pub enum RecordSubcommand {
    /// Create a record from a JSON object
    Create {
        /// Collection name (e.g. workoutLogs)
        collection: String,

        /// Record fields as a JSON object
        data: String,

        /// Record id (generated if omitted)
        #[arg(long)]
        id: Option<String>,

        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show a record
    Get {
        collection: String,
        id: String,

        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Update fields of a record
    Update {
        collection: String,
        id: String,

        /// Fields to change as a JSON object
        data: String,

        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Delete a record
    Delete { collection: String, id: String },

    /// List records in a collection
    List {
        collection: String,

        /// Filter such as memberId=m1 or durationMinutes>=30 (can be repeated)
        #[arg(long = "where", short = 'w', value_name = "FILTER")]
        filters: Vec<Filter>,

        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl RecordCommand {
    /// Returns true if the command changes data.
    pub fn is_write(&self) -> bool {
        !matches!(
            self.command,
            RecordSubcommand::Get { .. } | RecordSubcommand::List { .. }
        )
    }

    pub async fn run(&self, engine: &SyncEngine) -> Result<(), Box<dyn std::error::Error>> {
        let repo = engine.repository();

        match &self.command {
            RecordSubcommand::Create {
                collection,
                data,
                id,
                format,
            } => {
                let mut fields = parse_object(data)?;
                if let Some(id) = id {
                    fields.insert("id".to_string(), Value::String(id.clone()));
                }
                let record = repo.create(collection, fields).await?;
                print_record(&record, format)?;
            }
            RecordSubcommand::Get {
                collection,
                id,
                format,
            } => {
                let record = repo
                    .read(collection, id)
                    .await?
                    .ok_or_else(|| format!("Record not found: {}/{}", collection, id))?;
                print_record(&record, format)?;
            }
            RecordSubcommand::Update {
                collection,
                id,
                data,
                format,
            } => {
                let patch = parse_object(data)?;
                let record = repo.update(collection, id, patch).await?;
                print_record(&record, format)?;
            }
            RecordSubcommand::Delete { collection, id } => {
                repo.delete(collection, id).await?;
                println!("Deleted {}/{}", collection, id);
            }
            RecordSubcommand::List {
                collection,
                filters,
                format,
            } => {
                let records = repo.list(collection, filters).await?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&records)?);
                    }
                    OutputFormat::Text => {
                        if records.is_empty() {
                            println!("No records found.");
                            return Ok(());
                        }
                        for record in &records {
                            println!("{}", summary_line(record));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

fn parse_object(data: &str) -> Result<Document, String> {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("Record data must be a JSON object".to_string()),
        Err(e) => Err(format!("Invalid JSON: {}", e)),
    }
}

fn state_marker(state: SyncState) -> &'static str {
    match state {
        SyncState::Synced => "✓",
        SyncState::Pending => "…",
        SyncState::Error => "✗",
    }
}

fn summary_line(record: &Record) -> String {
    let label = record
        .fields
        .get("name")
        .or_else(|| record.fields.get("className"))
        .and_then(Value::as_str)
        .unwrap_or("");
    format!(
        "{} {}  {}  {}",
        state_marker(record.sync_state),
        record.id,
        record.updated_at.format("%Y-%m-%d %H:%M"),
        label
    )
}

fn print_record(record: &Record, format: &OutputFormat) -> Result<(), serde_json::Error> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(record)?),
        OutputFormat::Text => {
            println!("ID:          {}", record.id);
            println!("Sync state:  {}", record.sync_state);
            println!("Created:     {}", record.created_at.format("%Y-%m-%d %H:%M:%S"));
            println!("Updated:     {}", record.updated_at.format("%Y-%m-%d %H:%M:%S"));
            if let Some(at) = record.last_synced_at {
                println!("Last synced: {}", at.format("%Y-%m-%d %H:%M:%S"));
            }
            println!();
            for (key, value) in &record.fields {
                match value {
                    Value::String(s) => println!("  {}: {}", key, s),
                    other => println!("  {}: {}", key, other),
                }
            }
        }
    }
    Ok(())
}
