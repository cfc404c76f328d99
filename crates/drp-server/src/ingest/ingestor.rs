//! Batch ingestor
//!
//! Streams rows through the normalizer, drops duplicates within the current
//! batch, buffers the rest and flushes fixed-size batches to a [`BulkWriter`].
//! Uniqueness across batches and against existing data is left to the
//! writer's insert-or-skip; the counters are reconciled from what it reports.
//!
//! ```text
//! Idle → Streaming ⇄ Flushing → Draining → Done
//! ```

use async_trait::async_trait;
use chrono::Utc;
use futures::{Stream, StreamExt};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::header::detect_header;
use super::models::{IngestStats, PendingRow};
use super::normalizer::{NormalizedRow, RowNormalizer};
use super::source::{row_stream, CellValue, RawRow, RowSource, ROW_CHANNEL_CAPACITY};
use super::writer::BulkWriter;
use super::{IngestError, Result};

/// Default number of rows per flush
pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Idle,
    Streaming,
    Flushing,
    Draining,
    Done,
}

/// Receives counter snapshots while a run is in progress
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn snapshot(&self, stats: &IngestStats) -> Result<()>;
}

struct Progress {
    sink: Box<dyn ProgressSink>,
    every_flushes: u64,
}

pub struct BatchIngestor<W> {
    writer: W,
    upload_record_id: i64,
    batch_size: usize,
    normalizer: RowNormalizer,
    seen: HashSet<String>,
    pending: Vec<PendingRow>,
    stats: IngestStats,
    state: IngestState,
    progress: Option<Progress>,
    started: Instant,
}

impl<W: BulkWriter> BatchIngestor<W> {
    pub fn new(writer: W, upload_record_id: i64, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            writer,
            upload_record_id,
            batch_size,
            normalizer: RowNormalizer::positional(),
            seen: HashSet::with_capacity(batch_size),
            pending: Vec::with_capacity(batch_size),
            stats: IngestStats::new(),
            state: IngestState::Idle,
            progress: None,
            started: Instant::now(),
        }
    }

    /// Report counters to `sink` after every `every_flushes` flushes
    pub fn with_progress(mut self, sink: impl ProgressSink + 'static, every_flushes: u64) -> Self {
        self.progress = Some(Progress {
            sink: Box::new(sink),
            every_flushes: every_flushes.max(1),
        });
        self
    }

    pub fn state(&self) -> IngestState {
        self.state
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Read `source` on the blocking pool and ingest every row
    pub async fn ingest_source<S>(&mut self, source: S) -> Result<IngestStats>
    where
        S: RowSource + 'static,
    {
        self.ingest_stream(row_stream(source, ROW_CHANNEL_CAPACITY)).await
    }

    /// Detect the header from the first row, then process the rest and finish.
    ///
    /// A read error ends the run; rows flushed before it stay committed.
    pub async fn ingest_stream<S>(&mut self, mut rows: S) -> Result<IngestStats>
    where
        S: Stream<Item = Result<RawRow>> + Unpin + Send,
    {
        self.start()?;

        if let Some(first) = rows.next().await.transpose()? {
            let decision = detect_header(&first);
            self.normalizer = RowNormalizer::from_decision(&decision);

            if decision.has_header {
                info!(
                    upload_record_id = self.upload_record_id,
                    columns = ?decision.headers,
                    "Header row detected"
                );
            } else {
                debug!(upload_record_id = self.upload_record_id, "No header row, using positional columns");
                self.process_row(&first).await?;
            }

            while let Some(row) = rows.next().await {
                self.process_row(&row?).await?;
            }
        }

        self.finish().await
    }

    /// Count, normalize and buffer one data row, flushing when the batch is full
    pub async fn process_row(&mut self, row: &[CellValue]) -> Result<()> {
        self.start()?;
        self.stats.total_rows += 1;

        let Some(NormalizedRow {
            identifier,
            attributes,
        }) = self.normalizer.normalize(row)
        else {
            return Ok(());
        };

        if !self.seen.insert(identifier.clone()) {
            self.stats.duplicate_count += 1;
            return Ok(());
        }

        self.pending.push(PendingRow {
            phone: identifier,
            data: attributes,
            upload_record_id: self.upload_record_id,
            created_at: Utc::now(),
        });
        self.stats.processed_rows += 1;

        if self.pending.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Write the buffered rows and reset the batch; a no-op when nothing is buffered
    pub async fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let resume = self.state;
        self.state = IngestState::Flushing;

        let batch = std::mem::take(&mut self.pending);
        let flush_started = Instant::now();
        let inserted = self.writer.insert_or_skip(&batch).await?;

        let batch_len = batch.len() as u64;
        self.stats.record_flush(batch_len, inserted);
        self.seen.clear();
        self.pending = Vec::with_capacity(self.batch_size);

        info!(
            upload_record_id = self.upload_record_id,
            flush = self.stats.flushes,
            rows = batch_len,
            inserted = inserted.min(batch_len),
            skipped = batch_len - inserted.min(batch_len),
            flush_ms = flush_started.elapsed().as_millis() as u64,
            elapsed_secs = self.started.elapsed().as_secs(),
            "Flushed batch"
        );

        if let Some(progress) = &self.progress {
            if self.stats.flushes % progress.every_flushes == 0 {
                if let Err(e) = progress.sink.snapshot(&self.stats).await {
                    warn!(upload_record_id = self.upload_record_id, error = %e, "Failed to record progress");
                }
            }
        }

        self.state = resume;
        Ok(())
    }

    /// Flush what remains and return the final counters
    pub async fn finish(&mut self) -> Result<IngestStats> {
        if self.state == IngestState::Done {
            return Ok(self.stats.clone());
        }

        self.state = IngestState::Draining;
        self.flush().await?;
        self.state = IngestState::Done;

        info!(
            upload_record_id = self.upload_record_id,
            total_rows = self.stats.total_rows,
            processed_rows = self.stats.processed_rows,
            success_count = self.stats.success_count,
            duplicate_count = self.stats.duplicate_count,
            flushes = self.stats.flushes,
            elapsed_secs = self.started.elapsed().as_secs(),
            "Ingestion finished"
        );

        Ok(self.stats.clone())
    }

    fn start(&mut self) -> Result<()> {
        match self.state {
            IngestState::Done => Err(IngestError::Validation(
                "ingestor already finished".to_string(),
            )),
            IngestState::Idle => {
                self.started = Instant::now();
                self.state = IngestState::Streaming;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
