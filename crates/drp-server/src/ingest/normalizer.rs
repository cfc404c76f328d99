//! Raw row → (identifier, attributes)

use super::header::HeaderDecision;
use super::models::AttributeSet;
use super::source::CellValue;

/// Header name that marks the identifier column
pub const IDENTIFIER_COLUMN: &str = "phone";

/// A row ready for dedup and buffering
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub identifier: String,
    pub attributes: AttributeSet,
}

/// Maps rows to canonical form, by header names or by position
#[derive(Debug, Clone, Default)]
pub struct RowNormalizer {
    headers: Option<Vec<String>>,
    identifier_idx: usize,
}

impl RowNormalizer {
    /// No header: identifier is the first cell, the rest become `column1`, `column2`, …
    pub fn positional() -> Self {
        Self::default()
    }

    /// Header row active: identifier is the `phone` column if present, else the first one
    pub fn with_headers(headers: Vec<String>) -> Self {
        let identifier_idx = headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(IDENTIFIER_COLUMN))
            .unwrap_or(0);

        Self {
            headers: Some(headers),
            identifier_idx,
        }
    }

    pub fn from_decision(decision: &HeaderDecision) -> Self {
        if decision.has_header {
            Self::with_headers(decision.headers.clone())
        } else {
            Self::positional()
        }
    }

    pub fn headers(&self) -> Option<&[String]> {
        self.headers.as_deref()
    }

    /// `None` when the identifier cell is missing or blank.
    pub fn normalize(&self, row: &[CellValue]) -> Option<NormalizedRow> {
        let identifier = row.get(self.identifier_idx)?.as_identifier()?;

        let mut attributes = AttributeSet::new();
        for (idx, cell) in row.iter().enumerate() {
            if idx == self.identifier_idx || cell.is_blank() {
                continue;
            }
            attributes.insert(self.key_for(idx), cell.to_json());
        }

        Some(NormalizedRow {
            identifier,
            attributes,
        })
    }

    fn key_for(&self, idx: usize) -> String {
        match &self.headers {
            Some(headers) => headers
                .get(idx)
                .cloned()
                .unwrap_or_else(|| overflow_key(headers, idx)),
            // identifier sits at 0, so the first remaining cell is column1
            None => format!("column{}", idx),
        }
    }
}

/// Key for a cell past the header width; suffixed like repeated headers
/// when a header already uses the plain `columnN` name
fn overflow_key(headers: &[String], idx: usize) -> String {
    let base = format!("column{}", idx + 1);
    let mut key = base.clone();
    let mut count = 1;
    while headers.contains(&key) {
        count += 1;
        key = format!("{}_{}", base, count);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::header::detect_header;
    use serde_json::{json, Value};

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn keys(row: &NormalizedRow) -> Vec<&str> {
        row.attributes.keys().map(String::as_str).collect()
    }

    #[test]
    fn test_positional_columns_skip_blanks() {
        let normalizer = RowNormalizer::positional();
        let row = normalizer
            .normalize(&[text(" 13800000000 "), text("Alice"), CellValue::Empty, text("Beijing")])
            .unwrap();

        assert_eq!(row.identifier, "13800000000");
        assert_eq!(keys(&row), vec!["column1", "column3"]);
        assert_eq!(row.attributes["column1"], json!("Alice"));
        assert_eq!(row.attributes["column3"], json!("Beijing"));
    }

    #[test]
    fn test_blank_identifier_is_skipped() {
        let normalizer = RowNormalizer::positional();
        assert!(normalizer.normalize(&[text("  "), text("Alice")]).is_none());
        assert!(normalizer.normalize(&[]).is_none());
    }

    #[test]
    fn test_named_phone_column_is_identifier() {
        let normalizer = RowNormalizer::with_headers(vec!["name".into(), "Phone".into(), "city".into()]);
        let row = normalizer
            .normalize(&[text("Alice"), text("13800000000"), text("Beijing")])
            .unwrap();

        assert_eq!(row.identifier, "13800000000");
        assert_eq!(keys(&row), vec!["name", "city"]);
    }

    #[test]
    fn test_header_without_phone_uses_first_column() {
        let normalizer = RowNormalizer::with_headers(vec!["mobile".into(), "name".into()]);
        let row = normalizer.normalize(&[text("13800000000"), text("Bob")]).unwrap();

        assert_eq!(row.identifier, "13800000000");
        assert_eq!(keys(&row), vec!["name"]);
    }

    #[test]
    fn test_header_mode_extra_and_missing_cells() {
        let normalizer = RowNormalizer::with_headers(vec!["phone".into(), "a".into(), "b".into()]);

        let short = normalizer.normalize(&[text("1"), text("x")]).unwrap();
        assert_eq!(keys(&short), vec!["a"]);

        let long = normalizer
            .normalize(&[text("2"), text("x"), text("y"), text("z")])
            .unwrap();
        assert_eq!(keys(&long), vec!["a", "b", "column4"]);
    }

    #[test]
    fn test_overflow_cell_does_not_overwrite_named_column() {
        let headers = vec!["phone".into(), "column3".into(), "column3_2".into()];
        let normalizer = RowNormalizer::with_headers(headers);

        let row = normalizer
            .normalize(&[text("1"), text("kept"), text("also kept"), text("extra")])
            .unwrap();

        assert_eq!(keys(&row), vec!["column3", "column3_2", "column4"]);

        let wider = RowNormalizer::with_headers(vec!["phone".into(), "column3".into()]);
        let row = wider
            .normalize(&[text("2"), text("named"), text("overflow")])
            .unwrap();

        assert_eq!(keys(&row), vec!["column3", "column3_2"]);
        assert_eq!(row.attributes["column3"], json!("named"));
        assert_eq!(row.attributes["column3_2"], json!("overflow"));
    }

    #[test]
    fn test_values_pass_through_untouched() {
        let normalizer = RowNormalizer::positional();
        let row = normalizer
            .normalize(&[
                CellValue::Number(13800000000.0),
                text(" padded "),
                CellValue::Number(99.5),
                CellValue::Bool(false),
            ])
            .unwrap();

        assert_eq!(row.identifier, "13800000000");
        assert_eq!(row.attributes["column1"], Value::String(" padded ".into()));
        assert_eq!(row.attributes["column2"], json!(99.5));
        assert_eq!(row.attributes["column3"], json!(false));
    }

    #[test]
    fn test_from_decision() {
        let decision = detect_header(&[text("name"), text("phone")]);
        let normalizer = RowNormalizer::from_decision(&decision);
        assert_eq!(normalizer.headers().unwrap(), ["name", "phone"]);

        let row = normalizer.normalize(&[text("Carol"), text("13900000000")]).unwrap();
        assert_eq!(row.identifier, "13900000000");

        let positional = RowNormalizer::from_decision(&detect_header(&[text("13800000000")]));
        assert!(positional.headers().is_none());
    }
}
