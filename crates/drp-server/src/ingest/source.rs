//! Row sources over tabular files
//!
//! A [`RowSource`] is a lazy, finite, non-restartable sequence of raw rows.
//! Readers are synchronous; [`row_stream`] moves one onto tokio's blocking
//! pool and hands rows to async code through a bounded channel.

use calamine::{open_workbook, open_workbook_auto, Data, Range, Reader, Xlsx};
use chrono::Timelike;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::mpsc::SyncSender;
use tokio::sync::mpsc;
use tracing::debug;

use super::{IngestError, Result};

/// Rows buffered between the blocking reader and the ingestor
pub const ROW_CHANNEL_CAPACITY: usize = 1024;

/// File extensions [`open_row_source`] understands
pub const SUPPORTED_EXTENSIONS: [&str; 7] = ["csv", "txt", "tsv", "xlsx", "xlsm", "xls", "ods"];

/// Largest magnitude rendered as an integer identifier (beyond this f64 loses digits)
const MAX_EXACT_INTEGER: f64 = 1e15;

/// One decoded cell
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

/// One decoded row, in column order
pub type RawRow = Vec<CellValue>;

impl CellValue {
    /// Empty, or text made only of whitespace
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Trimmed text form used as a dedup key; `None` when blank
    pub fn as_identifier(&self) -> Option<String> {
        let text = match self {
            Self::Empty => return None,
            Self::Text(s) => s.trim().to_string(),
            Self::Number(n) => format_number(*n),
            Self::Bool(b) => b.to_string(),
        };
        (!text.is_empty()).then_some(text)
    }

    /// Text form used for header names
    pub fn as_text(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Text(s) => s.trim().to_string(),
            Self::Number(n) => format_number(*n),
            Self::Bool(b) => b.to_string(),
        }
    }

    /// Value as stored in a record's attributes
    pub fn to_json(&self) -> Value {
        match self {
            Self::Empty => Value::Null,
            Self::Text(s) => Value::String(s.clone()),
            Self::Number(n) if is_exact_integer(*n) => Value::from(*n as i64),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Bool(b) => Value::Bool(*b),
        }
    }
}

fn is_exact_integer(n: f64) -> bool {
    n.is_finite() && n.fract() == 0.0 && n.abs() < MAX_EXACT_INTEGER
}

fn format_number(n: f64) -> String {
    if is_exact_integer(n) {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Lazy, finite, non-restartable sequence of raw rows
pub trait RowSource: Iterator<Item = Result<RawRow>> + Send {}

impl<T> RowSource for T where T: Iterator<Item = Result<RawRow>> + Send {}

/// Delimited text reader.
///
/// The `csv` parser skips blank lines; they are reported here as empty rows
/// so they count like the empty rows of a worksheet. Blank lines before the
/// first record and after the last one are not rows.
pub struct CsvRowSource {
    reader: csv::Reader<TailTracking<Box<dyn Read + Send>>>,
    record: csv::ByteRecord,
    line: u64,
    /// Last record read, released once the next read shows where it ended
    held: Option<HeldRecord>,
    ready: VecDeque<Result<RawRow>>,
    /// No record decoded yet (BOM check)
    first_decode: bool,
    /// No record released yet (leading blank lines are dropped)
    first_release: bool,
    done: bool,
}

struct HeldRecord {
    row: RawRow,
    /// Newlines consumed by the read, including blank lines before the record
    lines: u64,
    /// Newlines inside quoted fields
    embedded: u64,
}

/// Remembers the last byte handed to the parser
struct TailTracking<R> {
    inner: R,
    last: Option<u8>,
}

impl<R: Read> Read for TailTracking<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.last = Some(buf[n - 1]);
        }
        Ok(n)
    }
}

impl CsvRowSource {
    pub fn from_reader<R: Read + Send + 'static>(reader: R, delimiter: u8) -> Self {
        let inner: Box<dyn Read + Send> = Box::new(reader);
        // `\n` only, so every record consumes its own newline; a `\r` before it is trimmed
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_reader(TailTracking { inner, last: None });

        Self {
            reader,
            record: csv::ByteRecord::new(),
            line: 1,
            held: None,
            ready: VecDeque::new(),
            first_decode: true,
            first_release: true,
            done: false,
        }
    }

    pub fn from_path(path: &Path, delimiter: u8) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::from_reader(file, delimiter))
    }

    fn read_next(&mut self) {
        match self.reader.read_byte_record(&mut self.record) {
            Ok(true) => {
                let line = self.reader.position().line();
                let lines = line.saturating_sub(self.line);
                self.line = line;

                let embedded = self.record.as_slice().iter().filter(|b| **b == b'\n').count() as u64;
                let row = self.decode();
                if let Some(previous) = self.held.replace(HeldRecord { row, lines, embedded }) {
                    self.release(previous, true);
                }
            }
            Ok(false) => {
                self.done = true;
                let terminated = self.reader.get_ref().last == Some(b'\n');
                if let Some(last) = self.held.take() {
                    self.release(last, terminated);
                }
            }
            Err(e) => {
                self.done = true;
                if let Some(last) = self.held.take() {
                    self.release(last, true);
                }
                self.ready.push_back(Err(e.into()));
            }
        }
    }

    fn release(&mut self, held: HeldRecord, terminated: bool) {
        let blanks = held.lines.saturating_sub(held.embedded + u64::from(terminated));
        if !std::mem::take(&mut self.first_release) {
            for _ in 0..blanks {
                self.ready.push_back(Ok(Vec::new()));
            }
        }
        self.ready.push_back(Ok(held.row));
    }

    fn decode(&mut self) -> RawRow {
        let last = self.record.len().saturating_sub(1);
        // Invalid UTF-8 is replaced rather than failing the whole file
        let mut row: RawRow = self
            .record
            .iter()
            .enumerate()
            .map(|(idx, field)| {
                let field = match field {
                    [rest @ .., b'\r'] if idx == last => rest,
                    field => field,
                };
                match String::from_utf8_lossy(field) {
                    text if text.is_empty() => CellValue::Empty,
                    text => CellValue::Text(text.into_owned()),
                }
            })
            .collect();

        if std::mem::take(&mut self.first_decode) {
            strip_bom(&mut row);
        }
        row
    }
}

impl Iterator for CsvRowSource {
    type Item = Result<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(item);
            }
            if self.done {
                return None;
            }
            self.read_next();
        }
    }
}

fn strip_bom(row: &mut RawRow) {
    let replacement = match row.first() {
        Some(CellValue::Text(text)) => match text.strip_prefix('\u{feff}') {
            Some("") => CellValue::Empty,
            Some(rest) => CellValue::Text(rest.to_string()),
            None => return,
        },
        _ => return,
    };
    row[0] = replacement;
}

/// First worksheet of an xlsx / xlsm workbook, streamed cell by cell.
///
/// The sheet XML is parsed on a dedicated thread that owns the workbook;
/// rows reach the iterator through a bounded channel, so only
/// [`ROW_CHANNEL_CAPACITY`] rows are decoded ahead of the consumer.
pub struct XlsxRowSource {
    rows: std::sync::mpsc::Receiver<Result<RawRow>>,
}

impl XlsxRowSource {
    pub fn open(path: &Path) -> Result<Self> {
        let workbook: Xlsx<BufReader<File>> = open_workbook(path).map_err(calamine::Error::from)?;
        let sheet = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| IngestError::Validation(format!("{} contains no worksheets", path.display())))?;

        let (tx, rows) = std::sync::mpsc::sync_channel(ROW_CHANNEL_CAPACITY);
        std::thread::Builder::new()
            .name("xlsx-reader".to_string())
            .spawn(move || stream_sheet(workbook, &sheet, tx))?;

        Ok(Self { rows })
    }
}

impl Iterator for XlsxRowSource {
    type Item = Result<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.recv().ok()
    }
}

/// Group the sheet's cells into rows; stops early when the receiver is gone
fn stream_sheet(mut workbook: Xlsx<BufReader<File>>, sheet: &str, tx: SyncSender<Result<RawRow>>) {
    let mut cells = match workbook.worksheet_cells_reader(sheet) {
        Ok(cells) => cells,
        Err(e) => {
            let _ = tx.send(Err(calamine::Error::from(e).into()));
            return;
        }
    };

    let mut current: Option<u32> = None;
    let mut row: RawRow = Vec::new();

    loop {
        let cell = match cells.next_cell() {
            Ok(Some(cell)) => cell,
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(Err(calamine::Error::from(e).into()));
                return;
            }
        };

        let value = cell_from_data(&Data::from(cell.get_value().clone()));
        if value == CellValue::Empty {
            continue;
        }
        let (row_idx, col_idx) = cell.get_position();

        match current {
            Some(open) if open == row_idx => {}
            Some(open) => {
                if tx.send(Ok(std::mem::take(&mut row))).is_err() {
                    return;
                }
                // Rows with no values in between are still rows
                for _ in open + 1..row_idx {
                    if tx.send(Ok(Vec::new())).is_err() {
                        return;
                    }
                }
                current = Some(row_idx);
            }
            None => current = Some(row_idx),
        }

        let col = col_idx as usize;
        if row.len() <= col {
            row.resize(col + 1, CellValue::Empty);
        }
        row[col] = value;
    }

    if current.is_some() {
        let _ = tx.send(Ok(row));
    }
    debug!(sheet, "Worksheet streamed");
}

/// First worksheet of an xls / ods workbook, decoded as a whole.
///
/// These formats have no streaming reader; the sheet is held in memory and
/// rows are produced from it one at a time.
pub struct WorkbookRowSource {
    range: Range<Data>,
    next_row: usize,
    height: usize,
    width: usize,
    col_offset: usize,
}

impl WorkbookRowSource {
    pub fn open(path: &Path) -> Result<Self> {
        let mut workbook = open_workbook_auto(path)?;
        let range = workbook.worksheet_range_at(0).ok_or_else(|| {
            IngestError::Validation(format!("{} contains no worksheets", path.display()))
        })??;
        Ok(Self::from_range(range))
    }

    pub fn from_range(range: Range<Data>) -> Self {
        let (height, width) = range.get_size();
        // Ranges start at the first used cell; pad back to column A so positions match the sheet
        let col_offset = range.start().map(|(_, col)| col as usize).unwrap_or(0);

        debug!(height, width, col_offset, "Opened worksheet");

        Self {
            range,
            next_row: 0,
            height,
            width,
            col_offset,
        }
    }
}

impl Iterator for WorkbookRowSource {
    type Item = Result<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_row >= self.height {
            return None;
        }
        let row_idx = self.next_row;
        self.next_row += 1;

        let mut row = Vec::with_capacity(self.col_offset + self.width);
        row.extend(std::iter::repeat(CellValue::Empty).take(self.col_offset));
        row.extend((0..self.width).map(|col| {
            self.range
                .get((row_idx, col))
                .map(cell_from_data)
                .unwrap_or(CellValue::Empty)
        }));

        Some(Ok(row))
    }
}

fn cell_from_data(data: &Data) -> CellValue {
    match data {
        Data::Empty | Data::Error(_) => CellValue::Empty,
        Data::String(s) if s.is_empty() => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(value) if value.num_seconds_from_midnight() == 0 => {
                CellValue::Text(value.format("%Y-%m-%d").to_string())
            }
            Some(value) => CellValue::Text(value.format("%Y-%m-%d %H:%M:%S").to_string()),
            None => CellValue::Number(dt.as_f64()),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
    }
}

/// Whether `filename` has an extension [`open_row_source`] accepts
pub fn is_supported_file(filename: &str) -> bool {
    extension_of(Path::new(filename))
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Open a row source for `path`, chosen by file extension
pub fn open_row_source(path: &Path) -> Result<Box<dyn RowSource>> {
    let ext = extension_of(path).unwrap_or_default();
    let source: Box<dyn RowSource> = match ext.as_str() {
        "csv" | "txt" => Box::new(CsvRowSource::from_path(path, b',')?),
        "tsv" => Box::new(CsvRowSource::from_path(path, b'\t')?),
        "xlsx" | "xlsm" => Box::new(XlsxRowSource::open(path)?),
        "xls" | "ods" => Box::new(WorkbookRowSource::open(path)?),
        _ => {
            return Err(IngestError::UnsupportedFormat(format!(
                "{} (expected one of {})",
                path.display(),
                SUPPORTED_EXTENSIONS.join(", ")
            )))
        }
    };
    Ok(source)
}

/// Async stream of rows, read on the blocking pool
pub type RowStream = BoxStream<'static, Result<RawRow>>;

/// Drive `source` on a blocking thread, yielding its rows through a bounded channel.
///
/// Reading stops after the first error or as soon as the stream is dropped.
pub fn row_stream<S>(source: S, capacity: usize) -> RowStream
where
    S: RowSource + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));

    tokio::task::spawn_blocking(move || {
        for item in source {
            let failed = item.is_err();
            if tx.blocking_send(item).is_err() || failed {
                break;
            }
        }
    });

    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}
