//! First-row header detection
//!
//! The decision is made once per file from the first row only. Cells are
//! classified as empty, numeric-looking or string-like; the row is a header
//! when string-like cells outnumber numeric ones or make up more than 30% of
//! the row.

use std::collections::HashMap;

use super::source::CellValue;

/// Share of string-like cells above which a row is treated as a header
pub const STRING_SHARE_THRESHOLD: f64 = 0.3;

/// Outcome of inspecting the first row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderDecision {
    pub has_header: bool,
    /// Unique, non-empty column names; empty unless `has_header`
    pub headers: Vec<String>,
}

impl HeaderDecision {
    fn no_header() -> Self {
        Self {
            has_header: false,
            headers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellClass {
    Empty,
    Numeric,
    StringLike,
}

fn classify(cell: &CellValue) -> CellClass {
    match cell {
        CellValue::Empty => CellClass::Empty,
        CellValue::Number(_) => CellClass::Numeric,
        CellValue::Bool(_) => CellClass::StringLike,
        CellValue::Text(s) => {
            let s = s.trim();
            if s.is_empty() {
                CellClass::Empty
            } else if looks_numeric(s) {
                CellClass::Numeric
            } else {
                CellClass::StringLike
            }
        }
    }
}

/// Numbers, plus phone and date shapes such as `+86 138-0000-0000` or `2024-01-01 08:30`.
///
/// A digit is required so `inf`, `NaN` or a lone `-` stay string-like.
fn looks_numeric(s: &str) -> bool {
    if !s.bytes().any(|b| b.is_ascii_digit()) {
        return false;
    }
    s.parse::<f64>().is_ok()
        || s
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '-' | '/' | ':' | '.' | '+' | ' ' | '(' | ')'))
}

/// Decide whether `row` is a header row and, if so, derive column names.
pub fn detect_header(row: &[CellValue]) -> HeaderDecision {
    let total = row.len();
    let mut numeric = 0usize;
    let mut string_like = 0usize;

    for cell in row {
        match classify(cell) {
            CellClass::Numeric => numeric += 1,
            CellClass::StringLike => string_like += 1,
            CellClass::Empty => {}
        }
    }

    if total == 0 || numeric + string_like == 0 {
        return HeaderDecision::no_header();
    }

    let share = string_like as f64 / total as f64;
    if string_like > numeric || share > STRING_SHARE_THRESHOLD {
        HeaderDecision {
            has_header: true,
            headers: header_names(row),
        }
    } else {
        HeaderDecision::no_header()
    }
}

/// Trimmed cell text, `columnN` for blanks, `_2`, `_3`… for repeats
fn header_names(row: &[CellValue]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut names = Vec::with_capacity(row.len());

    for (idx, cell) in row.iter().enumerate() {
        let mut base = cell.as_text();
        if base.is_empty() {
            base = format!("column{}", idx + 1);
        }

        let count = seen.entry(base.clone()).or_insert(0);
        *count += 1;
        let mut name = if *count == 1 {
            base.clone()
        } else {
            format!("{}_{}", base, count)
        };
        // A generated suffix can collide with a literal header such as "name_2"
        while names.contains(&name) {
            *count += 1;
            name = format!("{}_{}", base, count);
        }
        names.push(name);
    }

    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<CellValue> {
        cells
            .iter()
            .map(|c| {
                if c.is_empty() {
                    CellValue::Empty
                } else {
                    CellValue::Text(c.to_string())
                }
            })
            .collect()
    }

    #[test]
    fn test_title_row_is_header() {
        let decision = detect_header(&row(&["Name", "Email", "Phone"]));
        assert!(decision.has_header);
        assert_eq!(decision.headers, vec!["Name", "Email", "Phone"]);
    }

    #[test]
    fn test_data_row_is_not_header() {
        let decision = detect_header(&row(&["13800000000", "2024-01-01", "100"]));
        assert!(!decision.has_header);
        assert!(decision.headers.is_empty());
    }

    #[test]
    fn test_numeric_cells_from_workbooks() {
        let cells = vec![
            CellValue::Number(13800000000.0),
            CellValue::Text("2024-01-01 08:30:00".into()),
            CellValue::Number(3.5),
        ];
        assert!(!detect_header(&cells).has_header);
    }

    #[test]
    fn test_single_label_among_numbers_crosses_threshold() {
        // 1 of 3 cells string-like = 33% > 30%
        let decision = detect_header(&row(&["13800000000", "Beijing", "100"]));
        assert!(decision.has_header);
    }

    #[test]
    fn test_one_label_in_four_stays_data() {
        // 25% string-like, numeric majority
        let decision = detect_header(&row(&["13800000000", "Beijing", "100", "200"]));
        assert!(!decision.has_header);
    }

    #[test]
    fn test_all_empty_row_is_not_header() {
        assert!(!detect_header(&row(&["", "", ""])).has_header);
        assert!(!detect_header(&[CellValue::Text("   ".into())]).has_header);
        assert!(!detect_header(&[]).has_header);
    }

    #[test]
    fn test_looks_numeric_shapes() {
        assert!(looks_numeric("100"));
        assert!(looks_numeric("-3.25e2"));
        assert!(looks_numeric("+86 138-0000-0000"));
        assert!(looks_numeric("(010) 1234 5678"));
        assert!(looks_numeric("2024/01/01"));
        assert!(!looks_numeric("inf"));
        assert!(!looks_numeric("NaN"));
        assert!(!looks_numeric("---"));
        assert!(!looks_numeric("A100"));
    }

    #[test]
    fn test_header_names_fill_blanks_and_dedupe() {
        let decision = detect_header(&row(&[" phone ", "", "name", "name", "name_2"]));
        assert!(decision.has_header);
        assert_eq!(
            decision.headers,
            vec!["phone", "column2", "name", "name_2", "name_2_2"]
        );
    }
}
