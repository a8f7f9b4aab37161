//! Spreadsheet ingestion: workbook sheets matched to roles by name, plus
//! single-sheet CSV with legacy-encoding fallback.
//!
//! Reading is the only blocking boundary of the pipeline; it happens once,
//! up front, and produces projected canonical tables.

use std::path::Path;

use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Data, Reader};

use crate::columns::{self, SheetKind};
use crate::model::{Cell, Dataset, Table};

/// Reads the three known sheet roles from a workbook. A role with no
/// matching sheet yields an empty table rather than an error.
pub fn read_workbook(path: &Path) -> Result<Dataset> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("failed to open workbook {}", path.display()))?;
    let sheet_names = workbook.sheet_names().to_vec();

    let mut dataset = Dataset::empty();
    for kind in [SheetKind::Registration, SheetKind::Service, SheetKind::Update] {
        let Some(name) = find_sheet_name(&sheet_names, kind) else {
            continue;
        };
        let range = workbook
            .worksheet_range(&name)
            .with_context(|| format!("failed to read sheet '{name}'"))?;
        *dataset.table_mut(kind) = sheet_to_table(&range, kind);
    }
    Ok(dataset)
}

/// First workbook sheet matching a role alias, in alias priority order.
fn find_sheet_name(sheet_names: &[String], kind: SheetKind) -> Option<String> {
    for alias in columns::sheet_aliases(kind) {
        for name in sheet_names {
            if columns::clean_header(name) == *alias {
                return Some(name.clone());
            }
        }
    }
    None
}

fn sheet_to_table(range: &calamine::Range<Data>, kind: SheetKind) -> Table {
    // the first non-empty row is the header; anything above is decoration
    let mut headers: Option<Vec<String>> = None;
    let mut rows: Vec<Vec<Cell>> = Vec::new();
    for row in range.rows() {
        if headers.is_none() {
            if row.iter().all(|c| matches!(c, Data::Empty)) {
                continue;
            }
            headers = Some(row.iter().map(header_text).collect());
            continue;
        }
        rows.push(row.iter().map(convert_cell).collect());
    }
    match headers {
        Some(headers) => columns::project(&headers, rows, kind),
        None => columns::empty_table(kind),
    }
}

fn header_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Empty => String::new(),
        other => format!("{other}"),
    }
}

fn convert_cell(cell: &Data) -> Cell {
    match cell {
        Data::Empty => Cell::Empty,
        Data::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Cell::Empty
            } else {
                Cell::Text(trimmed.to_string())
            }
        }
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Bool(*b),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| Cell::Date(d.date()))
            .unwrap_or(Cell::Empty),
        Data::DateTimeIso(s) => Cell::Text(s.clone()),
        Data::DurationIso(s) => Cell::Text(s.clone()),
        Data::Error(_) => Cell::Empty,
    }
}

/// Reads a single-sheet CSV for one role. Handles UTF-8 (with BOM) and
/// legacy WINDOWS-1252 exports; the delimiter is sniffed from the header
/// line.
pub fn read_csv(path: &Path, kind: SheetKind) -> Result<Table> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let decoded = decode_bytes(&bytes);
    let content = decoded.strip_prefix('\u{feff}').unwrap_or(&decoded);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(content))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("failed to read CSV header")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut rows: Vec<Vec<Cell>> = Vec::new();
    for (line_idx, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(error) => {
                eprintln!(
                    "Warning: skipping line {} due to error: {}",
                    line_idx + 2,
                    error
                );
                continue;
            }
        };
        rows.push(
            (0..headers.len())
                .map(|i| match record.get(i) {
                    Some(value) if !value.trim().is_empty() => {
                        Cell::Text(value.trim().to_string())
                    }
                    _ => Cell::Empty,
                })
                .collect(),
        );
    }
    Ok(columns::project(&headers, rows, kind))
}

/// Loads a dataset from a workbook, or from a single-sheet CSV when
/// `csv_role` names the sheet the file carries.
pub fn read_dataset(path: &Path, csv_role: Option<SheetKind>) -> Result<Dataset> {
    match csv_role {
        Some(kind) => {
            let mut dataset = Dataset::empty();
            *dataset.table_mut(kind) = read_csv(path, kind)?;
            Ok(dataset)
        }
        None => read_workbook(path),
    }
}

fn decode_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            text.into_owned()
        }
    }
}

fn sniff_delimiter(content: &str) -> u8 {
    let header = content.lines().next().unwrap_or("");
    if header.matches(';').count() > header.matches(',').count() {
        b';'
    } else {
        b','
    }
}

// =============================================================================
// TESTS
// =============================================================================
