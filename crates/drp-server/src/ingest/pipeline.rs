//! Ingestion and export runs bound to their status records
//!
//! [`IngestPipeline`] resolves an upload's file through the [`FileStore`],
//! streams it through a [`BatchIngestor`] and keeps the upload record's
//! status and counters current. [`ExportPipeline`] writes a filtered export,
//! stores it and records a download. [`PipelineRunner`] plugs both into the
//! [`JobScheduler`](super::JobScheduler).

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::config::IngestConfig;
use super::exporter::{export_filename, Exporter, EXPORT_DIR};
use super::ingestor::{BatchIngestor, ProgressSink};
use super::jobs::{ExportJob, IngestJob, Job};
use super::models::{DataType, ExportStatus, IngestStats, UploadStatus};
use super::notify::{ExportCompleted, Notifier};
use super::scheduler::{JobRunner, JobScheduler};
use super::source::open_row_source;
use super::writer::PgBulkWriter;
use super::{IngestError, Result};
use crate::db::downloads::{self, DownloadRecord, NewDownload};
use crate::db::records::PgRecordPages;
use crate::db::uploads;
use crate::storage::{FileStore, StorageError};

/// Persists counter snapshots to the upload record during a run
struct UploadProgress {
    pool: PgPool,
    data_type: DataType,
    upload_record_id: i64,
}

#[async_trait]
impl ProgressSink for UploadProgress {
    async fn snapshot(&self, stats: &IngestStats) -> Result<()> {
        uploads::update_progress(&self.pool, self.data_type, self.upload_record_id, stats).await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct IngestPipeline {
    pool: PgPool,
    store: Arc<dyn FileStore>,
    config: IngestConfig,
}

impl IngestPipeline {
    pub fn new(pool: PgPool, store: Arc<dyn FileStore>, config: IngestConfig) -> Self {
        Self { pool, store, config }
    }

    /// Ingest the upload's file; on error the upload is marked `failed` and the error returned
    #[instrument(skip(self, job), fields(upload_record_id = job.upload_record_id, data_type = %job.data_type))]
    pub async fn run(&self, job: &IngestJob) -> Result<IngestStats> {
        match self.try_run(job).await {
            Ok(stats) => Ok(stats),
            Err(e) => {
                self.record_failure(job.data_type, job.upload_record_id, &e.to_string())
                    .await;
                Err(e)
            }
        }
    }

    /// Mark an upload `failed`; a failure to do so is only logged
    pub async fn record_failure(&self, data_type: DataType, upload_record_id: i64, message: &str) {
        if let Err(e) = uploads::mark_failed(&self.pool, data_type, upload_record_id, message).await {
            warn!(
                upload_record_id,
                data_type = %data_type,
                error = %e,
                "Failed to record ingestion failure"
            );
        }
    }

    async fn try_run(&self, job: &IngestJob) -> Result<IngestStats> {
        let data_type = job.data_type;
        let id = job.upload_record_id;

        let upload = uploads::get(&self.pool, data_type, id)
            .await?
            .ok_or_else(|| IngestError::Validation(format!("{} upload {} does not exist", data_type, id)))?;

        if upload.status()? == UploadStatus::Completed {
            info!("Upload already completed, skipping");
            return Ok(IngestStats {
                total_rows: upload.total_count as u64,
                processed_rows: upload.processed_count as u64,
                success_count: upload.success_count as u64,
                duplicate_count: upload.duplicate_count as u64,
                flushes: 0,
            });
        }

        uploads::mark_processing(&self.pool, data_type, id).await?;

        let key = upload
            .file_path
            .filter(|path| !path.trim().is_empty())
            .ok_or_else(|| IngestError::Validation(format!("upload {} has no source file", id)))?;

        let local = self.store.local_path(&key).await.map_err(|e| match e {
            StorageError::NotFound(key) => IngestError::Validation(format!("source file {} not found", key)),
            other => other.into(),
        })?;

        info!(source = %key, "Ingesting upload");
        let stats = self.ingest_path(data_type, id, local.path().to_path_buf()).await?;
        uploads::mark_completed(&self.pool, data_type, id, &stats).await?;

        drop(local);
        if let Err(e) = self.store.delete(&key).await {
            warn!(source = %key, error = %e, "Failed to delete ingested source file");
        }

        Ok(stats)
    }

    /// Ingest a file that is already on local disk (operator CLI), with the
    /// same status bookkeeping as a queued run; the file is left in place
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn run_local(&self, data_type: DataType, upload_record_id: i64, path: PathBuf) -> Result<IngestStats> {
        let outcome = async {
            uploads::mark_processing(&self.pool, data_type, upload_record_id).await?;
            let stats = self.ingest_path(data_type, upload_record_id, path).await?;
            uploads::mark_completed(&self.pool, data_type, upload_record_id, &stats).await?;
            Ok::<_, IngestError>(stats)
        }
        .await;

        if let Err(e) = &outcome {
            self.record_failure(data_type, upload_record_id, &e.to_string()).await;
        }
        outcome
    }

    /// Stream a local file into the record table of `data_type`
    pub async fn ingest_path(&self, data_type: DataType, upload_record_id: i64, path: PathBuf) -> Result<IngestStats> {
        let source = tokio::task::spawn_blocking(move || open_row_source(&path)).await??;

        let writer = PgBulkWriter::new(self.pool.clone(), data_type);
        let progress = UploadProgress {
            pool: self.pool.clone(),
            data_type,
            upload_record_id,
        };

        BatchIngestor::new(writer, upload_record_id, self.config.batch_size)
            .with_progress(progress, self.config.progress_every_flushes)
            .ingest_source(source)
            .await
    }
}

#[derive(Clone)]
pub struct ExportPipeline {
    pool: PgPool,
    store: Arc<dyn FileStore>,
    notifier: Arc<dyn Notifier>,
    page_size: usize,
}

impl ExportPipeline {
    pub fn new(pool: PgPool, store: Arc<dyn FileStore>, notifier: Arc<dyn Notifier>, page_size: usize) -> Self {
        Self {
            pool,
            store,
            notifier,
            page_size,
        }
    }

    /// Export, store and record; a failed export is recorded before the error is returned
    #[instrument(skip(self, job), fields(data_type = %job.data_type, format = %job.format))]
    pub async fn run(&self, job: &ExportJob) -> Result<DownloadRecord> {
        let filename = export_filename(Utc::now(), job.format);
        let key = format!("{}/{}", EXPORT_DIR, filename);

        let (record_count, download_url) = match self.try_run(job, &key).await {
            Ok(done) => done,
            Err(e) => {
                self.record_failure(job, &filename, &e.to_string()).await;
                return Err(e);
            }
        };

        let download = downloads::insert(
            &self.pool,
            &NewDownload {
                filename: filename.clone(),
                file_path: key,
                download_url: download_url.clone(),
                record_count,
                format: job.format,
                data_type: job.data_type,
                filters: job.filters.clone(),
                user_id: job.user_id,
                status: ExportStatus::Completed,
                error_message: None,
            },
        )
        .await?;

        self.notifier.notify_export_completed(ExportCompleted {
            filename,
            download_url,
            record_count,
            owner_id: job.user_id,
        });

        Ok(download)
    }

    async fn try_run(&self, job: &ExportJob, key: &str) -> Result<(u64, String)> {
        job.filters.validate()?;
        let pages = PgRecordPages::new(self.pool.clone(), job.data_type, job.filters.effective());

        let temp = tempfile::Builder::new()
            .prefix("drp-export-")
            .suffix(&format!(".{}", job.format.extension()))
            .tempfile()?
            .into_temp_path();

        let summary = Exporter::new(self.page_size)
            .export_to_path(&pages, job.format, &temp)
            .await?;
        let download_url = self.store.put_export(key, &temp).await?;

        info!(
            record_count = summary.record_count,
            columns = summary.columns.len(),
            key,
            "Export stored"
        );
        Ok((summary.record_count, download_url))
    }

    /// Insert a `failed` download record; a failure to do so is only logged
    pub async fn record_failure(&self, job: &ExportJob, filename: &str, message: &str) {
        let download = NewDownload {
            filename: filename.to_string(),
            file_path: format!("{}/{}", EXPORT_DIR, filename),
            download_url: String::new(),
            record_count: 0,
            format: job.format,
            data_type: job.data_type,
            filters: job.filters.clone(),
            user_id: job.user_id,
            status: ExportStatus::Failed,
            error_message: Some(message.to_string()),
        };
        if let Err(e) = downloads::insert(&self.pool, &download).await {
            warn!(filename, error = %e, "Failed to record export failure");
        }
    }
}

/// Runs scheduler jobs against the ingestion and export pipelines
pub struct PipelineRunner {
    ingest: IngestPipeline,
    export: ExportPipeline,
}

impl PipelineRunner {
    pub fn new(ingest: IngestPipeline, export: ExportPipeline) -> Self {
        Self { ingest, export }
    }
}

#[async_trait]
impl JobRunner for PipelineRunner {
    async fn run(&self, job: &Job) -> Result<()> {
        match job {
            Job::Ingest(job) => self.ingest.run(job).await.map(|_| ()),
            Job::Export(job) => self.export.run(job).await.map(|_| ()),
        }
    }

    async fn record_timeout(&self, job: &Job, error: &IngestError) {
        match job {
            Job::Ingest(job) => {
                self.ingest
                    .record_failure(job.data_type, job.upload_record_id, &error.to_string())
                    .await
            }
            Job::Export(job) => {
                let filename = export_filename(Utc::now(), job.format);
                self.export.record_failure(job, &filename, &error.to_string()).await
            }
        }
    }
}

/// Enqueue every upload left `pending` or `processing` by a previous run
pub async fn requeue_unfinished(pool: &PgPool, scheduler: &JobScheduler) -> Result<usize> {
    let mut requeued = 0;
    for data_type in DataType::ALL {
        for upload in uploads::list_unfinished(pool, data_type).await? {
            scheduler.enqueue(IngestJob::new(upload.id, data_type)).await?;
            requeued += 1;
        }
    }
    if requeued > 0 {
        info!(requeued, "Re-enqueued unfinished uploads");
    }
    Ok(requeued)
}
