use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use common::{
    storage::{db::SurrealDbClient, types::ingested_record::IngestedRecord},
    utils::config::get_config,
};
use serde_json::Value;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "search")]
#[command(about = "Search and export ingested JSON records")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Directory exports are written to (defaults to the configured export_dir)
    #[arg(long)]
    export_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List every ingested file, newest first
    List,
    /// Show the latest record stored under a filename
    Get {
        /// Filename as it was dropped into the watched directory
        filename: String,
        /// Write the record data to the export directory
        #[arg(long)]
        export: bool,
    },
    /// Find records whose nested field equals a value
    Find {
        /// Dot separated path into the document, e.g. address.city
        field: String,
        /// Value to match; parsed as JSON when possible, otherwise a string
        value: String,
        /// Export the match with this filename
        #[arg(long, conflicts_with = "export_all")]
        export: Option<String>,
        /// Export every match
        #[arg(long)]
        export_all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config = get_config()?;
    let export_dir = cli
        .export_dir
        .unwrap_or_else(|| PathBuf::from(&config.export_dir));

    let db = SurrealDbClient::new(
        &config.surrealdb_address,
        &config.surrealdb_username,
        &config.surrealdb_password,
        &config.surrealdb_namespace,
        &config.surrealdb_database,
    )
    .await
    .context("failed to connect to database")?;
    db.ensure_initialized().await?;

    match cli.command {
        Commands::List => {
            let summaries = IngestedRecord::list_summaries(&db).await?;
            if summaries.is_empty() {
                println!("No files found.");
            }
            for summary in summaries {
                println!("{}  {}", summary.uploaded_at.to_rfc3339(), summary.filename);
            }
        }
        Commands::Get { filename, export } => {
            let record = IngestedRecord::find_by_filename(&db, &filename)
                .await?
                .ok_or_else(|| anyhow!("no record found for {filename}"))?;
            println!("{}", serde_json::to_string_pretty(&record.data)?);
            if export {
                let path = export_record(&export_dir, &record).await?;
                println!("Exported to {}", path.display());
            }
        }
        Commands::Find {
            field,
            value,
            export,
            export_all,
        } => {
            let records =
                IngestedRecord::search_by_field(&db, &field, parse_value(&value)).await?;
            if records.is_empty() {
                println!("No records found.");
                return Ok(());
            }
            for record in &records {
                println!("{}: {}", record.filename, record.data);
            }

            let selected = select_exports(&records, export.as_deref(), export_all)?;
            for record in selected {
                let path = export_record(&export_dir, record).await?;
                println!("Exported to {}", path.display());
            }
        }
    }

    Ok(())
}

/// JSON literal when it parses (`42`, `true`, `"x"`), otherwise the raw text.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn select_exports<'a>(
    records: &'a [IngestedRecord],
    export: Option<&str>,
    export_all: bool,
) -> Result<Vec<&'a IngestedRecord>> {
    if export_all {
        return Ok(records.iter().collect());
    }
    let Some(filename) = export else {
        return Ok(Vec::new());
    };
    let chosen: Vec<_> = records
        .iter()
        .filter(|record| record.filename == filename)
        .take(1)
        .collect();
    if chosen.is_empty() {
        bail!("{filename} is not among the matches");
    }
    Ok(chosen)
}

/// Writes the record data as pretty JSON to `<dir>/<filename>`. Only the
/// final component of the stored filename is used.
async fn export_record(dir: &Path, record: &IngestedRecord) -> Result<PathBuf> {
    let name = Path::new(&record.filename)
        .file_name()
        .ok_or_else(|| anyhow!("cannot export record with filename {:?}", record.filename))?;

    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let path = dir.join(name);
    let pretty = serde_json::to_string_pretty(&record.data)?;
    tokio::fs::write(&path, pretty)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;

    Ok(path)
}
