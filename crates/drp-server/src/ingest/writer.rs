//! Insert-or-skip bulk writes

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, warn};

use super::models::{DataType, PendingRow};
use super::Result;

/// Postgres caps a statement at 65535 bind parameters; each row binds five
pub const MAX_ROWS_PER_STATEMENT: usize = 10_000;

/// Idempotent batch persistence
#[async_trait]
pub trait BulkWriter: Send + Sync {
    /// Insert `rows`, silently skipping identifiers that already exist.
    ///
    /// Returns the number of rows actually inserted.
    async fn insert_or_skip(&self, rows: &[PendingRow]) -> Result<u64>;
}

#[async_trait]
impl<W: BulkWriter + ?Sized> BulkWriter for &W {
    async fn insert_or_skip(&self, rows: &[PendingRow]) -> Result<u64> {
        (**self).insert_or_skip(rows).await
    }
}

/// Writes into the record table of one [`DataType`]
#[derive(Clone)]
pub struct PgBulkWriter {
    pool: PgPool,
    data_type: DataType,
}

impl PgBulkWriter {
    pub fn new(pool: PgPool, data_type: DataType) -> Self {
        Self { pool, data_type }
    }

    fn insert_prefix(&self) -> String {
        format!(
            "INSERT INTO {} (phone, data, upload_record_id, created_at, updated_at) ",
            self.data_type.record_table()
        )
    }

    /// All chunks in one transaction so a failure leaves nothing half-written
    async fn insert_batch(&self, rows: &[PendingRow], payloads: &[String]) -> sqlx::Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for (chunk, chunk_payloads) in rows
            .chunks(MAX_ROWS_PER_STATEMENT)
            .zip(payloads.chunks(MAX_ROWS_PER_STATEMENT))
        {
            let mut query: QueryBuilder<Postgres> = QueryBuilder::new(self.insert_prefix());
            query.push_values(chunk.iter().zip(chunk_payloads), |mut b, (row, payload)| {
                b.push_bind(&row.phone)
                    .push_bind(payload)
                    .push_unseparated("::json")
                    .push_bind(row.upload_record_id)
                    .push_bind(row.created_at)
                    .push_bind(row.created_at);
            });
            query.push(" ON CONFLICT (phone) DO NOTHING");

            inserted += query.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn insert_one(&self, row: &PendingRow, payload: &str) -> sqlx::Result<u64> {
        let sql = format!(
            "{}VALUES ($1, $2::json, $3, $4, $4) ON CONFLICT (phone) DO NOTHING",
            self.insert_prefix()
        );
        let result = sqlx::query(&sql)
            .bind(&row.phone)
            .bind(payload)
            .bind(row.upload_record_id)
            .bind(row.created_at)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Slow path after a failed batch: each row stands on its own
    async fn insert_each(&self, rows: &[PendingRow], payloads: &[String]) -> Result<u64> {
        let mut inserted = 0u64;
        for (row, payload) in rows.iter().zip(payloads) {
            match self.insert_one(row, payload).await {
                Ok(n) => inserted += n,
                Err(e) if is_connection_error(&e) => return Err(e.into()),
                Err(e) => {
                    warn!(
                        table = self.data_type.record_table(),
                        phone = %row.phone,
                        error = %e,
                        "Row rejected during fallback insert"
                    );
                }
            }
        }
        Ok(inserted)
    }
}

#[async_trait]
impl BulkWriter for PgBulkWriter {
    async fn insert_or_skip(&self, rows: &[PendingRow]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        // Text payloads cast to JSON keep attribute order (a JSONB bind would re-sort keys)
        let payloads = rows
            .iter()
            .map(|row| serde_json::to_string(&row.data))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        match self.insert_batch(rows, &payloads).await {
            Ok(inserted) => {
                debug!(
                    table = self.data_type.record_table(),
                    rows = rows.len(),
                    inserted,
                    "Batch insert complete"
                );
                Ok(inserted)
            }
            Err(e) => {
                warn!(
                    table = self.data_type.record_table(),
                    rows = rows.len(),
                    error = %e,
                    "Batch insert failed, falling back to per-row inserts"
                );
                self.insert_each(rows, &payloads).await
            }
        }
    }
}

/// Errors that no per-row retry can get past
fn is_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}
