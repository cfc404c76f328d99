//! DRP Ingest - operator CLI
//!
//! Runs ingestion and exports in-process against the configured database,
//! without going through the HTTP surface or the job queue.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use drp_common::logging::{init_logging, LogConfig, LogLevel};
use sqlx::PgPool;
use std::path::PathBuf;
use tracing::info;

use drp_server::{
    config::Config,
    db::{self, records::PgRecordPages, uploads, NewUpload},
    ingest::{DataType, ExportFilters, ExportFormat, Exporter, IngestPipeline},
    storage,
};

#[derive(Parser, Debug)]
#[command(name = "drp-ingest")]
#[command(author, version, about = "DRP data ingestion and export tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a local CSV or spreadsheet file as a new upload batch
    Ingest {
        /// Record type: refined, raw or used
        #[arg(short = 't', long = "type")]
        data_type: DataType,

        /// File to ingest
        #[arg(short, long)]
        file: PathBuf,

        #[arg(long)]
        country: Option<String>,

        #[arg(long)]
        industry: Option<String>,

        #[arg(long)]
        remarks: Option<String>,

        #[arg(long)]
        domain: Option<String>,

        /// Rows per insert batch (defaults to INGEST_BATCH_SIZE)
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Export stored records to a local file
    Export {
        #[arg(short = 't', long = "type")]
        data_type: DataType,

        /// csv or xlsx
        #[arg(long, default_value = "csv")]
        format: ExportFormat,

        /// Output path
        #[arg(short, long)]
        output: PathBuf,

        /// Only records of this upload batch (other filters are then ignored)
        #[arg(long)]
        upload_id: Option<i64>,

        /// Phone number substring
        #[arg(long)]
        phone: Option<String>,

        /// Earliest creation date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Latest creation date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,

        #[arg(long)]
        country: Option<String>,

        #[arg(long)]
        industry: Option<String>,
    },

    /// Show an upload batch's status and counters
    Status {
        #[arg(short = 't', long = "type")]
        data_type: DataType,

        /// Upload record id
        #[arg(long)]
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over these defaults
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("drp-ingest")
        .filter_directives("drp_ingest=info,drp_server=info,sqlx=warn")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    let mut config = Config::load().context("Failed to load configuration")?;
    let pool = db::create_pool(&config.database)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    match cli.command {
        Command::Ingest {
            data_type,
            file,
            country,
            industry,
            remarks,
            domain,
            batch_size,
        } => {
            if let Some(size) = batch_size {
                if size == 0 {
                    bail!("--batch-size must be greater than zero");
                }
                config.ingest.batch_size = size;
            }
            let upload = NewUpload {
                country,
                industry,
                remarks,
                domain,
                ..NewUpload::default()
            };
            ingest(&pool, &config, data_type, file, upload).await?;
        }
        Command::Export {
            data_type,
            format,
            output,
            upload_id,
            phone,
            from,
            to,
            country,
            industry,
        } => {
            let filters = ExportFilters {
                upload_record_id: upload_id,
                phone,
                date_from: from,
                date_to: to,
                country,
                industry,
            };
            export(&pool, &config, data_type, format, filters, output).await?;
        }
        Command::Status { data_type, id } => {
            let upload = uploads::get(&pool, data_type, id)
                .await?
                .with_context(|| format!("{} upload {} not found", data_type, id))?;
            println!("{}", serde_json::to_string_pretty(&upload)?);
        }
    }

    Ok(())
}

async fn ingest(
    pool: &PgPool,
    config: &Config,
    data_type: DataType,
    file: PathBuf,
    mut upload: NewUpload,
) -> Result<()> {
    if !file.is_file() {
        bail!("{} is not a file", file.display());
    }
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .context("file name is not valid UTF-8")?;
    if !drp_server::ingest::source::is_supported_file(&name) {
        bail!("unsupported file type: {}", name);
    }

    upload.filename = name.clone();
    upload.original_filename = name;
    upload.file_path = Some(file.display().to_string());

    let record = uploads::create(pool, data_type, &upload).await?;
    info!(upload_record_id = record.id, data_type = %data_type, "Upload record created");

    let pipeline = IngestPipeline::new(pool.clone(), storage::build_store(&config.storage), config.ingest.clone());
    let stats = pipeline.run_local(data_type, record.id, file).await?;

    info!(
        upload_record_id = record.id,
        total = stats.total_rows,
        inserted = stats.success_count,
        duplicates = stats.duplicate_count,
        "Ingestion complete"
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn export(
    pool: &PgPool,
    config: &Config,
    data_type: DataType,
    format: ExportFormat,
    filters: ExportFilters,
    output: PathBuf,
) -> Result<()> {
    filters.validate()?;

    let pages = PgRecordPages::new(pool.clone(), data_type, filters.effective());
    let summary = Exporter::new(config.ingest.export_page_size)
        .export_to_path(&pages, format, &output)
        .await?;

    info!(
        records = summary.record_count,
        columns = summary.columns.len(),
        output = %output.display(),
        "Export complete"
    );
    Ok(())
}
