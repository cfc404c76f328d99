//! Export stored records to CSV or XLSX
//!
//! The header is `phone` followed by the union of attribute keys in
//! first-seen order; records missing a key get an empty cell. Records are
//! read in id-ordered pages twice: once to collect the key union, once to
//! write rows. The write pass stops at the last id seen by the first pass so
//! rows inserted mid-export cannot introduce unseen columns.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_xlsxwriter::Workbook;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::models::{AttributeSet, ExportFormat, StoredRecord};
use super::normalizer::IDENTIFIER_COLUMN;
use super::{IngestError, Result};

/// Store prefix for generated exports
pub const EXPORT_DIR: &str = "exports";

/// Default records fetched per page
pub const DEFAULT_PAGE_SIZE: usize = 5000;

/// Pages buffered ahead of the file writer
const SINK_CHANNEL_CAPACITY: usize = 4;

/// Rows in one XLSX worksheet, header included
pub const XLSX_MAX_ROWS: u64 = 1_048_576;

/// Record selection for an export
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportFilters {
    /// Export one upload batch; all other filters are ignored when set
    pub upload_record_id: Option<i64>,
    /// Substring of the phone number
    pub phone: Option<String>,
    /// Inclusive lower bound on the record's creation date
    pub date_from: Option<NaiveDate>,
    /// Inclusive upper bound on the record's creation date
    pub date_to: Option<NaiveDate>,
    /// Substring of the owning upload's country
    pub country: Option<String>,
    /// Substring of the owning upload's industry
    pub industry: Option<String>,
}

impl ExportFilters {
    pub fn for_upload(upload_record_id: i64) -> Self {
        Self {
            upload_record_id: Some(upload_record_id),
            ..Self::default()
        }
    }

    /// The filters that take effect: an upload id overrides everything else,
    /// and blank strings count as unset.
    pub fn effective(&self) -> Self {
        if let Some(upload_record_id) = self.upload_record_id {
            return Self::for_upload(upload_record_id);
        }

        fn non_blank(value: &Option<String>) -> Option<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        }

        Self {
            upload_record_id: None,
            phone: non_blank(&self.phone),
            date_from: self.date_from,
            date_to: self.date_to,
            country: non_blank(&self.country),
            industry: non_blank(&self.industry),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return Err(IngestError::Validation(format!(
                    "date_from {} is after date_to {}",
                    from, to
                )));
            }
        }
        Ok(())
    }
}

/// Ordered union of attribute keys, first-seen order
#[derive(Debug, Default)]
pub struct ColumnUnion {
    columns: Vec<String>,
    seen: HashSet<String>,
}

impl ColumnUnion {
    pub fn observe(&mut self, attributes: &AttributeSet) {
        for key in attributes.keys() {
            if !self.seen.contains(key) {
                self.seen.insert(key.clone());
                self.columns.push(key.clone());
            }
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<String> {
        self.columns
    }
}

pub fn header_row(columns: &[String]) -> Vec<Value> {
    std::iter::once(IDENTIFIER_COLUMN.to_string())
        .chain(columns.iter().cloned())
        .map(Value::String)
        .collect()
}

pub fn record_row(record: &StoredRecord, columns: &[String]) -> Vec<Value> {
    std::iter::once(Value::String(record.phone.clone()))
        .chain(columns.iter().map(|key| match record.data.get(key) {
            None | Some(Value::Null) => Value::String(String::new()),
            Some(value) => value.clone(),
        }))
        .collect()
}

/// `data_export_2024-05-01_13-45-10.xlsx`
pub fn export_filename(at: DateTime<Utc>, format: ExportFormat) -> String {
    format!(
        "data_export_{}.{}",
        at.format("%Y-%m-%d_%H-%M-%S"),
        format.extension()
    )
}

/// Paged, id-ordered access to the records selected for an export
#[async_trait]
pub trait RecordPages: Send + Sync {
    /// Up to `limit` records with `id > after_id` (and `id <= upto_id` when set), ascending by id
    async fn page(&self, after_id: i64, upto_id: Option<i64>, limit: usize) -> Result<Vec<StoredRecord>>;
}

/// What an export produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub record_count: u64,
    pub columns: Vec<String>,
}

pub struct Exporter {
    page_size: usize,
}

impl Default for Exporter {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl Exporter {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
        }
    }

    /// Write every record from `pages` to `path` in `format`
    pub async fn export_to_path<P>(&self, pages: &P, format: ExportFormat, path: &Path) -> Result<ExportSummary>
    where
        P: RecordPages + ?Sized,
    {
        let mut union = ColumnUnion::default();
        let mut after_id = 0i64;
        let mut last_id = None;
        let mut selected = 0u64;

        loop {
            let page = pages.page(after_id, None, self.page_size).await?;
            let Some(last) = page.last() else { break };
            after_id = last.id;
            last_id = Some(last.id);
            selected += page.len() as u64;
            for record in &page {
                union.observe(&record.data);
            }
            if page.len() < self.page_size {
                break;
            }
        }

        ensure_fits(format, selected)?;

        let columns = union.into_columns();
        debug!(columns = columns.len(), records = selected, "Collected export columns");

        // File writing is blocking; pages are handed to a writer on the blocking pool
        let (tx, mut rx) = mpsc::channel::<Vec<Vec<Value>>>(SINK_CHANNEL_CAPACITY);
        let sink_path = path.to_path_buf();
        let writer = tokio::task::spawn_blocking(move || -> Result<()> {
            let mut sink = TabularSink::create(format, &sink_path)?;
            while let Some(rows) = rx.blocking_recv() {
                for row in &rows {
                    sink.write_row(row)?;
                }
            }
            sink.finish()
        });

        let fed = self.feed_rows(pages, &columns, last_id, &tx).await;
        drop(tx);
        writer.await??;
        let record_count = fed?;

        info!(
            path = %path.display(),
            format = %format,
            record_count,
            columns = columns.len(),
            "Export written"
        );

        Ok(ExportSummary {
            record_count,
            columns,
        })
    }

    async fn feed_rows<P>(
        &self,
        pages: &P,
        columns: &[String],
        upto_id: Option<i64>,
        tx: &mpsc::Sender<Vec<Vec<Value>>>,
    ) -> Result<u64>
    where
        P: RecordPages + ?Sized,
    {
        send_rows(tx, vec![header_row(columns)]).await?;

        let Some(upto_id) = upto_id else {
            return Ok(0);
        };

        let mut record_count = 0u64;
        let mut after_id = 0i64;
        loop {
            let page = pages.page(after_id, Some(upto_id), self.page_size).await?;
            let Some(last) = page.last() else { break };
            after_id = last.id;
            let full = page.len() >= self.page_size;
            record_count += page.len() as u64;

            send_rows(tx, page.iter().map(|r| record_row(r, columns)).collect()).await?;
            if !full {
                break;
            }
        }
        Ok(record_count)
    }
}

/// Reject exports the target format cannot hold, before any file is created
pub fn ensure_fits(format: ExportFormat, record_count: u64) -> Result<()> {
    match format {
        ExportFormat::Xlsx if record_count + 1 > XLSX_MAX_ROWS => Err(IngestError::Validation(format!(
            "{} records exceed the XLSX limit of {} rows per sheet (header included); narrow the filters or export CSV",
            record_count, XLSX_MAX_ROWS
        ))),
        _ => Ok(()),
    }
}

async fn send_rows(tx: &mpsc::Sender<Vec<Vec<Value>>>, rows: Vec<Vec<Value>>) -> Result<()> {
    tx.send(rows)
        .await
        .map_err(|_| IngestError::Validation("export writer stopped early".to_string()))
}

/// Text form of a cell; nested arrays and objects become JSON text
fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        nested => nested.to_string(),
    }
}

enum TabularSink {
    Csv(csv::Writer<File>),
    /// Constant-memory worksheet: each row is flushed to a temp file once the next one starts
    Xlsx {
        workbook: Box<Workbook>,
        next_row: u32,
        path: PathBuf,
    },
}

impl TabularSink {
    fn create(format: ExportFormat, path: &Path) -> Result<Self> {
        match format {
            ExportFormat::Csv => Ok(Self::Csv(csv::Writer::from_path(path)?)),
            ExportFormat::Xlsx => {
                let mut workbook = Workbook::new();
                workbook.add_worksheet_with_constant_memory().set_name("Export")?;
                Ok(Self::Xlsx {
                    workbook: Box::new(workbook),
                    next_row: 0,
                    path: path.to_path_buf(),
                })
            }
        }
    }

    fn write_row(&mut self, cells: &[Value]) -> Result<()> {
        match self {
            Self::Csv(writer) => {
                writer.write_record(cells.iter().map(cell_text))?;
            }
            Self::Xlsx {
                workbook, next_row, ..
            } => {
                let sheet = workbook.worksheet_from_index(0)?;
                let row = *next_row;
                for (idx, cell) in cells.iter().enumerate() {
                    let col = u16::try_from(idx).map_err(|_| {
                        IngestError::Validation(format!("export has too many columns ({})", cells.len()))
                    })?;
                    match cell {
                        Value::Null => {}
                        Value::String(s) if s.is_empty() => {}
                        Value::String(s) => {
                            sheet.write_string(row, col, s)?;
                        }
                        Value::Number(n) => match n.as_f64() {
                            Some(f) => {
                                sheet.write_number(row, col, f)?;
                            }
                            None => {
                                sheet.write_string(row, col, n.to_string())?;
                            }
                        },
                        Value::Bool(b) => {
                            sheet.write_boolean(row, col, *b)?;
                        }
                        nested => {
                            sheet.write_string(row, col, nested.to_string())?;
                        }
                    }
                }
                *next_row += 1;
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<()> {
        match self {
            Self::Csv(mut writer) => {
                writer.flush()?;
            }
            Self::Xlsx { mut workbook, path, .. } => {
                workbook.save(&path)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::source::{CellValue, RawRow, XlsxRowSource};
    use serde_json::json;

    struct MemoryPages(Vec<StoredRecord>);

    #[async_trait]
    impl RecordPages for MemoryPages {
        async fn page(&self, after_id: i64, upto_id: Option<i64>, limit: usize) -> Result<Vec<StoredRecord>> {
            Ok(self
                .0
                .iter()
                .filter(|r| r.id > after_id && upto_id.map_or(true, |upto| r.id <= upto))
                .take(limit)
                .cloned()
                .collect())
        }
    }

    /// `count` attribute-less records with ids `1..=count`, built page by page
    struct GeneratedPages {
        count: i64,
    }

    #[async_trait]
    impl RecordPages for GeneratedPages {
        async fn page(&self, after_id: i64, upto_id: Option<i64>, limit: usize) -> Result<Vec<StoredRecord>> {
            let end = upto_id.unwrap_or(self.count).min(self.count);
            Ok((after_id + 1..=end)
                .take(limit)
                .map(|id| StoredRecord {
                    id,
                    phone: id.to_string(),
                    data: AttributeSet::new(),
                    upload_record_id: None,
                    created_at: Utc::now(),
                })
                .collect())
        }
    }

    fn record(id: i64, phone: &str, data: Value) -> StoredRecord {
        let Value::Object(data) = data else {
            panic!("attributes must be an object")
        };
        StoredRecord {
            id,
            phone: phone.to_string(),
            data,
            upload_record_id: Some(1),
            created_at: Utc::now(),
        }
    }

    fn read_csv(path: &Path) -> Vec<Vec<String>> {
        csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .unwrap()
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn test_column_union_first_seen_order() {
        let records = [
            record(1, "a", json!({"b": 1, "a": 2})),
            record(2, "b", json!({"c": 1, "a": 2})),
        ];
        let mut union = ColumnUnion::default();
        for r in &records {
            union.observe(&r.data);
        }
        assert_eq!(union.columns(), ["b", "a", "c"]);
    }

    #[test]
    fn test_rows_fill_missing_with_empty() {
        let columns = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let second = record(2, "id2", json!({"b": 3, "c": 4}));

        assert_eq!(header_row(&columns), vec![json!("phone"), json!("a"), json!("b"), json!("c")]);
        assert_eq!(record_row(&second, &columns), vec![json!("id2"), json!(""), json!(3), json!(4)]);
    }

    #[test]
    fn test_export_filename() {
        let at = DateTime::parse_from_rfc3339("2024-05-01T13:45:10Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(export_filename(at, ExportFormat::Xlsx), "data_export_2024-05-01_13-45-10.xlsx");
        assert_eq!(export_filename(at, ExportFormat::Csv), "data_export_2024-05-01_13-45-10.csv");
    }

    #[test]
    fn test_upload_filter_overrides_others() {
        let filters = ExportFilters {
            upload_record_id: Some(9),
            phone: Some("138".into()),
            country: Some("CN".into()),
            ..Default::default()
        };
        assert_eq!(filters.effective(), ExportFilters::for_upload(9));

        let blank = ExportFilters {
            phone: Some("  ".into()),
            industry: Some(" retail ".into()),
            ..Default::default()
        };
        let effective = blank.effective();
        assert_eq!(effective.phone, None);
        assert_eq!(effective.industry.as_deref(), Some("retail"));
    }

    #[test]
    fn test_filter_date_range_validation() {
        let filters = ExportFilters {
            date_from: NaiveDate::from_ymd_opt(2024, 2, 1),
            date_to: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..Default::default()
        };
        assert!(filters.validate().is_err());
        assert!(ExportFilters::default().validate().is_ok());
    }

    #[test]
    fn test_filters_deserialize_partial() {
        let filters: ExportFilters =
            serde_json::from_str(r#"{"phone": "1380", "date_from": "2024-01-01"}"#).unwrap();
        assert_eq!(filters.phone.as_deref(), Some("1380"));
        assert_eq!(filters.date_from, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(filters.upload_record_id, None);
    }

    #[tokio::test]
    async fn test_csv_export_column_stability() {
        let pages = MemoryPages(vec![
            record(1, "id1", json!({"a": 1, "b": 2})),
            record(2, "id2", json!({"b": 3, "c": 4})),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");

        let summary = Exporter::new(1)
            .export_to_path(&pages, ExportFormat::Csv, &path)
            .await
            .unwrap();

        assert_eq!(summary.record_count, 2);
        assert_eq!(
            read_csv(&path),
            vec![
                vec!["phone", "a", "b", "c"],
                vec!["id1", "1", "2", ""],
                vec!["id2", "", "3", "4"],
            ]
        );
    }

    #[tokio::test]
    async fn test_nested_values_render_as_json() {
        let pages = MemoryPages(vec![record(1, "id1", json!({"tags": ["x", "y"], "none": null}))]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");

        Exporter::default()
            .export_to_path(&pages, ExportFormat::Csv, &path)
            .await
            .unwrap();

        let rows = read_csv(&path);
        assert_eq!(rows[1], vec!["id1", r#"["x","y"]"#, ""]);
    }

    #[tokio::test]
    async fn test_empty_export_has_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");

        let summary = Exporter::default()
            .export_to_path(&MemoryPages(Vec::new()), ExportFormat::Csv, &path)
            .await
            .unwrap();

        assert_eq!(summary.record_count, 0);
        assert_eq!(read_csv(&path), vec![vec!["phone"]]);
    }

    #[tokio::test]
    async fn test_xlsx_export_reads_back() {
        let pages = MemoryPages(vec![
            record(1, "13800000001", json!({"name": "Alice", "score": 90})),
            record(2, "13800000002", json!({"city": "Beijing"})),
            record(3, "13800000003", json!({"score": 7.5, "vip": true})),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.xlsx");

        let summary = Exporter::new(2)
            .export_to_path(&pages, ExportFormat::Xlsx, &path)
            .await
            .unwrap();
        assert_eq!(summary.columns, vec!["name", "score", "city", "vip"]);

        let rows: Vec<RawRow> = XlsxRowSource::open(&path)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0][0], CellValue::Text("phone".into()));
        assert_eq!(rows[1][0], CellValue::Text("13800000001".into()));
        assert_eq!(rows[1][2], CellValue::Number(90.0));
        assert_eq!(rows[2][3], CellValue::Text("Beijing".into()));
        assert_eq!(rows[2][1], CellValue::Empty);
        assert_eq!(rows[3][4], CellValue::Bool(true));
    }

    #[test]
    fn test_xlsx_row_limit_counts_header() {
        assert!(ensure_fits(ExportFormat::Xlsx, XLSX_MAX_ROWS - 1).is_ok());
        assert!(matches!(
            ensure_fits(ExportFormat::Xlsx, XLSX_MAX_ROWS),
            Err(IngestError::Validation(_))
        ));
        assert!(ensure_fits(ExportFormat::Csv, XLSX_MAX_ROWS * 2).is_ok());
    }

    #[tokio::test]
    async fn test_xlsx_export_over_row_limit_is_rejected() {
        let pages = GeneratedPages {
            count: XLSX_MAX_ROWS as i64,
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.xlsx");

        let err = Exporter::new(100_000)
            .export_to_path(&pages, ExportFormat::Xlsx, &path)
            .await
            .unwrap_err();

        match err {
            IngestError::Validation(message) => assert!(message.contains("1048576 records")),
            other => panic!("expected a validation error, got {:?}", other),
        }
        assert!(!path.exists());
    }
}
