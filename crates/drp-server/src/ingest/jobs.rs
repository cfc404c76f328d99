//! Job definitions for ingestion and export
//!
//! Payloads carried through the scheduler queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::exporter::ExportFilters;
use super::models::{DataType, ExportFormat};

/// Ingest the file attached to an upload record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestJob {
    pub upload_record_id: i64,
    pub data_type: DataType,
    /// Timestamp when job was created
    pub created_at: DateTime<Utc>,
}

impl IngestJob {
    pub fn new(upload_record_id: i64, data_type: DataType) -> Self {
        Self {
            upload_record_id,
            data_type,
            created_at: Utc::now(),
        }
    }
}

/// Export a filtered selection of one dataset type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportJob {
    pub data_type: DataType,
    #[serde(default)]
    pub filters: ExportFilters,
    #[serde(default)]
    pub format: ExportFormat,
    /// Owner of the resulting download
    pub user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl ExportJob {
    pub fn new(data_type: DataType, filters: ExportFilters, format: ExportFormat) -> Self {
        Self {
            data_type,
            filters,
            format,
            user_id: None,
            created_at: Utc::now(),
        }
    }

    /// Set the user the export belongs to
    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// Anything the scheduler can run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    Ingest(IngestJob),
    Export(ExportJob),
}

impl Job {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Ingest(job) => job.data_type,
            Self::Export(job) => job.data_type,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingest(job) => write!(f, "ingest {}#{}", job.data_type, job.upload_record_id),
            Self::Export(job) => write!(f, "export {} as {}", job.data_type, job.format),
        }
    }
}

impl From<IngestJob> for Job {
    fn from(job: IngestJob) -> Self {
        Self::Ingest(job)
    }
}

impl From<ExportJob> for Job {
    fn from(job: ExportJob) -> Self {
        Self::Export(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_display() {
        let job: Job = IngestJob::new(42, DataType::Raw).into();
        assert_eq!(job.to_string(), "ingest raw#42");

        let job: Job = ExportJob::new(DataType::Used, ExportFilters::default(), ExportFormat::Csv).into();
        assert_eq!(job.to_string(), "export used as csv");
        assert_eq!(job.data_type(), DataType::Used);
    }

    #[test]
    fn test_export_job_defaults_from_json() {
        let job: ExportJob = serde_json::from_str(
            r#"{"data_type": "refined", "user_id": 5, "created_at": "2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(job.format, ExportFormat::Xlsx);
        assert_eq!(job.filters, ExportFilters::default());
        assert_eq!(job.user_id, Some(5));
    }

    #[test]
    fn test_with_user() {
        let job = ExportJob::new(DataType::Refined, ExportFilters::default(), ExportFormat::Xlsx).with_user(9);
        assert_eq!(job.user_id, Some(9));
    }
}
