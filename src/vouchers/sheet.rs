//! Spreadsheet (CSV) reading for voucher uploads.

use csv::{ReaderBuilder, Trim};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Columns every voucher upload must carry, in the order they are reported
/// when missing.
pub const REQUIRED_COLUMNS: [&str; 5] = ["muid", "karma", "hashtag", "month", "week"];

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("file is not valid UTF-8 CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// One data row of an upload, keyed by normalized header name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SheetRow {
    /// 1-based line number in the uploaded file.
    #[serde(skip)]
    pub line: u64,
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

impl SheetRow {
    pub fn new(line: u64, fields: BTreeMap<String, String>) -> Self {
        Self { line, fields }
    }

    /// Cell value with whitespace removed; empty cells read as absent.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .get(column)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// Cell value as written, or an empty string when the column is absent.
    pub fn raw(&self, column: &str) -> &str {
        self.fields.get(column).map(String::as_str).unwrap_or("")
    }
}

/// Parsed upload: header row plus data rows in file order.
#[derive(Debug, Clone, Default)]
pub struct Sheet {
    pub headers: Vec<String>,
    pub rows: Vec<SheetRow>,
}

impl Sheet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First required column that the header row lacks.
    pub fn missing_column(&self, required: &[&'static str]) -> Option<&'static str> {
        required
            .iter()
            .copied()
            .find(|column| !self.headers.iter().any(|header| header == column))
    }
}

fn normalize_header(header: &str) -> String {
    header.trim_start_matches('\u{feff}').trim().to_lowercase()
}

/// Parse an uploaded CSV file.
///
/// Header names are trimmed and lower-cased. Rows whose cells are all blank
/// are dropped, so a file holding only a header row yields an empty sheet.
pub fn read_sheet(bytes: &[u8]) -> Result<Sheet, SheetError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(bytes);

    let headers: Vec<String> = reader.headers()?.iter().map(normalize_header).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }

        let line = record.position().map(|pos| pos.line()).unwrap_or_default();
        let fields = headers
            .iter()
            .enumerate()
            .filter(|(_, header)| !header.is_empty())
            .map(|(idx, header)| (header.clone(), record.get(idx).unwrap_or("").to_string()))
            .collect();
        rows.push(SheetRow::new(line, fields));
    }

    log::debug!("sheet: parsed {} headers and {} data rows", headers.len(), rows.len());
    Ok(Sheet { headers, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_rows_keyed_by_normalized_headers() {
        let csv = "\u{feff}MUID , Karma,hashtag,month,week\na@x,10,#t1,1,2\nb@x,5,#t2,3,4\n";
        let sheet = read_sheet(csv.as_bytes()).expect("valid csv");

        assert_eq!(sheet.headers, vec!["muid", "karma", "hashtag", "month", "week"]);
        assert_eq!(sheet.rows.len(), 2);
        assert_eq!(sheet.rows[0].get("muid"), Some("a@x"));
        assert_eq!(sheet.rows[0].get("karma"), Some("10"));
        assert_eq!(sheet.rows[0].line, 2);
        assert_eq!(sheet.rows[1].get("hashtag"), Some("#t2"));
        assert_eq!(sheet.rows[1].line, 3);
    }

    #[test]
    fn blank_cells_read_as_absent() {
        let sheet = read_sheet(b"muid,karma,hashtag,month,week\na@x,10,#t1,,  \n").unwrap();
        let row = &sheet.rows[0];
        assert_eq!(row.get("month"), None);
        assert_eq!(row.get("week"), None);
        assert_eq!(row.raw("month"), "");
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn header_only_file_is_empty() {
        let sheet = read_sheet(b"muid,karma,hashtag,month,week\n,,,,\n").unwrap();
        assert!(sheet.is_empty());
    }

    #[test]
    fn reports_first_missing_required_column() {
        let sheet = read_sheet(b"muid,karma,hashtag,month\na@x,1,#t,1\n").unwrap();
        assert_eq!(sheet.missing_column(&REQUIRED_COLUMNS), Some("week"));

        let sheet = read_sheet(b"hashtag,week\n#t,1\n").unwrap();
        assert_eq!(sheet.missing_column(&REQUIRED_COLUMNS), Some("muid"));
    }

    #[test]
    fn short_records_fill_missing_cells_with_empty_strings() {
        let sheet = read_sheet(b"muid,karma,hashtag,month,week\na@x,10\n").unwrap();
        assert_eq!(sheet.rows[0].raw("week"), "");
        assert_eq!(sheet.rows[0].fields.len(), 5);
    }
}
