//! Ingest → export → re-ingest round trips against Postgres

use sqlx::PgPool;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tracing_subscriber::{fmt, EnvFilter};

use drp_server::{
    db::{records::PgRecordPages, uploads, NewUpload},
    ingest::{DataType, ExportFilters, ExportFormat, Exporter, IngestConfig, IngestPipeline},
    storage::{FileStore, LocalFileStore},
};

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,drp_server=debug")),
        )
        .with_test_writer()
        .try_init();
}

fn pipeline(pool: &PgPool, dir: &TempDir) -> IngestPipeline {
    let store: Arc<dyn FileStore> = Arc::new(LocalFileStore::new(dir.path(), "http://localhost/files"));
    let config = IngestConfig {
        batch_size: 3,
        ..IngestConfig::default()
    };
    IngestPipeline::new(pool.clone(), store, config)
}

async fn new_upload(pool: &PgPool, data_type: DataType, name: &str) -> i64 {
    let upload = NewUpload {
        filename: name.to_string(),
        original_filename: name.to_string(),
        ..NewUpload::default()
    };
    uploads::create(pool, data_type, &upload).await.unwrap().id
}

async fn count_records(pool: &PgPool, data_type: DataType) -> i64 {
    let sql = format!("SELECT COUNT(*) FROM {}", data_type.record_table());
    let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(pool).await.unwrap();
    count
}

async fn export_all(pool: &PgPool, data_type: DataType, format: ExportFormat, path: &Path) -> u64 {
    let pages = PgRecordPages::new(pool.clone(), data_type, ExportFilters::default());
    Exporter::new(2)
        .export_to_path(&pages, format, path)
        .await
        .unwrap()
        .record_count
}

async fn round_trip(pool: PgPool, format: ExportFormat) {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&pool, &dir);

    let source = dir.path().join("leads.csv");
    std::fs::write(
        &source,
        "Name,Phone,City\n\
         Alice,13800000001,Beijing\n\
         Bob,13800000002,\n\
         \n\
         Carol,13800000003,Shenzhen\n\
         Alice,13800000001,Beijing\n\
         ,,\n\
         Dave,13800000004,Hangzhou\n",
    )
    .unwrap();

    let first = new_upload(&pool, DataType::Refined, "leads.csv").await;
    let stats = pipeline
        .run_local(DataType::Refined, first, source.clone())
        .await
        .unwrap();
    // The blank line and the `,,` line both count as rows
    assert_eq!(stats.total_rows, 7);
    assert_eq!(stats.success_count, 4);
    assert_eq!(stats.duplicate_count, 1);
    assert_eq!(count_records(&pool, DataType::Refined).await, 4);

    let exported = dir.path().join(format!("export.{}", format.extension()));
    assert_eq!(export_all(&pool, DataType::Refined, format, &exported).await, 4);

    // Same table: every identifier is already stored
    let second = new_upload(&pool, DataType::Refined, "export").await;
    let stats = pipeline
        .run_local(DataType::Refined, second, exported.clone())
        .await
        .unwrap();
    assert_eq!(stats.success_count, 0);
    assert_eq!(stats.duplicate_count, 4);
    assert_eq!(count_records(&pool, DataType::Refined).await, 4);

    // Another type's table: the export carries the full unique set
    let third = new_upload(&pool, DataType::Used, "export").await;
    let stats = pipeline.run_local(DataType::Used, third, exported).await.unwrap();
    assert_eq!(stats.success_count, 4);
    assert_eq!(count_records(&pool, DataType::Used).await, 4);

    let upload = uploads::get(&pool, DataType::Used, third).await.unwrap().unwrap();
    assert_eq!(upload.status, "completed");
    assert_eq!(upload.attempts, 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_csv_round_trip_is_lossless(pool: PgPool) {
    round_trip(pool, ExportFormat::Csv).await;
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_xlsx_round_trip_is_lossless(pool: PgPool) {
    round_trip(pool, ExportFormat::Xlsx).await;
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_missing_local_file_marks_upload_failed(pool: PgPool) {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&pool, &dir);

    let id = new_upload(&pool, DataType::Raw, "gone.csv").await;
    let result = pipeline
        .run_local(DataType::Raw, id, dir.path().join("gone.csv"))
        .await;
    assert!(result.is_err());

    let upload = uploads::get(&pool, DataType::Raw, id).await.unwrap().unwrap();
    assert_eq!(upload.status, "failed");
    assert!(upload.error_message.is_some());
}
