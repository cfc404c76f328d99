//! Paged reads of stored records for export

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::ingest::{AttributeSet, DataType, ExportFilters, RecordPages, Result, StoredRecord};

/// Id-ordered pages of one record table, narrowed by [`ExportFilters`]
#[derive(Clone)]
pub struct PgRecordPages {
    pool: PgPool,
    data_type: DataType,
    filters: ExportFilters,
}

impl PgRecordPages {
    /// `filters` are applied as given; callers pass [`ExportFilters::effective`]
    pub fn new(pool: PgPool, data_type: DataType, filters: ExportFilters) -> Self {
        Self {
            pool,
            data_type,
            filters,
        }
    }

    fn build_query(&self, after_id: i64, upto_id: Option<i64>, limit: usize) -> QueryBuilder<'static, Postgres> {
        let mut query = QueryBuilder::new(format!(
            "SELECT r.id, r.phone, r.data::text AS data, r.upload_record_id, r.created_at FROM {} r WHERE r.id > ",
            self.data_type.record_table()
        ));
        query.push_bind(after_id);

        if let Some(upto_id) = upto_id {
            query.push(" AND r.id <= ").push_bind(upto_id);
        }

        let filters = &self.filters;
        if let Some(upload_record_id) = filters.upload_record_id {
            query.push(" AND r.upload_record_id = ").push_bind(upload_record_id);
        }
        if let Some(phone) = &filters.phone {
            query.push(" AND r.phone ILIKE ").push_bind(contains_pattern(phone));
        }
        if let Some(date_from) = filters.date_from {
            query.push(" AND r.created_at::date >= ").push_bind(date_from);
        }
        if let Some(date_to) = filters.date_to {
            query.push(" AND r.created_at::date <= ").push_bind(date_to);
        }

        for (column, value) in [("country", &filters.country), ("industry", &filters.industry)] {
            if let Some(value) = value {
                query.push(format!(
                    " AND EXISTS (SELECT 1 FROM {} u WHERE u.id = r.upload_record_id AND u.{} ILIKE ",
                    self.data_type.upload_table(),
                    column
                ));
                query.push_bind(contains_pattern(value)).push(")");
            }
        }

        query.push(" ORDER BY r.id LIMIT ").push_bind(limit as i64);
        query
    }
}

#[async_trait]
impl RecordPages for PgRecordPages {
    async fn page(&self, after_id: i64, upto_id: Option<i64>, limit: usize) -> Result<Vec<StoredRecord>> {
        let rows = self
            .build_query(after_id, upto_id, limit)
            .build()
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<StoredRecord> {
                let data: Option<String> = row.try_get("data")?;
                Ok(StoredRecord {
                    id: row.try_get("id")?,
                    phone: row.try_get("phone")?,
                    data: parse_attributes(data.as_deref())?,
                    upload_record_id: row.try_get("upload_record_id")?,
                    created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
                })
            })
            .collect()
    }
}

/// `%value%` with LIKE wildcards in `value` matched literally
fn contains_pattern(value: &str) -> String {
    let mut pattern = String::with_capacity(value.len() + 2);
    pattern.push('%');
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Stored `data` text back to an ordered attribute map; NULL or non-object is empty
fn parse_attributes(text: Option<&str>) -> Result<AttributeSet> {
    match text {
        None => Ok(AttributeSet::new()),
        Some(text) => match serde_json::from_str::<Value>(text)? {
            Value::Object(map) => Ok(map),
            _ => Ok(AttributeSet::new()),
        },
    }
}
