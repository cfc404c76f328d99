//! Core ingestion types shared by the ingestor, writer and exporter

use chrono::{DateTime, Utc};
use drp_common::DrpError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordered column → value mapping stored as a record's `data`
pub type AttributeSet = serde_json::Map<String, serde_json::Value>;

/// The three parallel dataset families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Refined,
    Raw,
    Used,
}

impl DataType {
    pub const ALL: [DataType; 3] = [DataType::Refined, DataType::Raw, DataType::Used];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refined => "refined",
            Self::Raw => "raw",
            Self::Used => "used",
        }
    }

    /// Table holding the deduplicated records
    pub fn record_table(&self) -> &'static str {
        match self {
            Self::Refined => "data_records",
            Self::Raw => "raw_data_records",
            Self::Used => "used_data_records",
        }
    }

    /// Table holding upload status records
    pub fn upload_table(&self) -> &'static str {
        match self {
            Self::Refined => "upload_records",
            Self::Raw => "raw_upload_records",
            Self::Used => "used_upload_records",
        }
    }

    /// Directory (store key prefix) for uploaded source files
    pub fn upload_dir(&self) -> &'static str {
        match self {
            Self::Refined => "uploads",
            Self::Raw => "raw_uploads",
            Self::Used => "used_uploads",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = DrpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "refined" => Ok(Self::Refined),
            "raw" => Ok(Self::Raw),
            "used" => Ok(Self::Used),
            other => Err(DrpError::Validation(format!("unknown data type '{}'", other))),
        }
    }
}

/// Lifecycle of an upload record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl FromStr for UploadStatus {
    type Err = DrpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(DrpError::Parse(format!("unknown upload status '{}'", other))),
        }
    }
}

/// Lifecycle of an export (download record)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    Processing,
    Completed,
    Failed,
}

impl ExportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Output format of an export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    #[default]
    Xlsx,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = DrpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "xlsx" | "excel" => Ok(Self::Xlsx),
            other => Err(DrpError::Validation(format!("unknown export format '{}'", other))),
        }
    }
}

/// A normalized row waiting in the ingestor's buffer
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRow {
    pub phone: String,
    pub data: AttributeSet,
    pub upload_record_id: i64,
    pub created_at: DateTime<Utc>,
}

/// A persisted record as read back for export
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: i64,
    pub phone: String,
    pub data: AttributeSet,
    pub upload_record_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Counters accumulated over one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    /// Data rows read (a detected header row is not counted)
    pub total_rows: u64,
    /// Rows with a non-empty identifier that reached the batch buffer
    pub processed_rows: u64,
    /// Rows actually inserted
    pub success_count: u64,
    /// In-batch duplicates plus rows storage skipped on conflict
    pub duplicate_count: u64,
    /// Number of flushes issued
    pub flushes: u64,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one flush of `batch_len` rows
    pub fn record_flush(&mut self, batch_len: u64, inserted: u64) {
        let inserted = inserted.min(batch_len);
        self.success_count += inserted;
        self.duplicate_count += batch_len - inserted;
        self.flushes += 1;
    }

    /// Rows dropped for an empty identifier
    pub fn skipped_rows(&self) -> u64 {
        self.total_rows
            .saturating_sub(self.duplicate_count)
            .saturating_sub(self.success_count)
    }
}
