//! Scalar normalization: total converters from raw cells to canonical typed
//! values. Every function here is defined for every input - malformed data
//! degrades to `None` (or zero for amounts), it never raises.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::model::Cell;

/// Free-text date formats, day-first variants before month-first: the
/// source spreadsheets are Brazilian.
const DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y", "%m/%d/%Y"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
];

/// Normalizes a percentage cell to the [0, 1] scale.
///
/// Values above 1 are taken as already expressed on the 0-100 scale and
/// divided by 100; the result is clamped to [0, 1]. Blank or unparseable
/// input is `None`.
pub fn normalize_share(cell: &Cell) -> Option<f64> {
    let raw = match cell {
        Cell::Empty => return None,
        Cell::Number(n) => *n,
        Cell::Text(s) => {
            let t = s.trim().trim_end_matches('%').trim().replace(',', ".");
            if t.is_empty() {
                return None;
            }
            t.parse::<f64>().ok()?
        }
        Cell::Date(_) | Cell::Bool(_) => return None,
    };
    if !raw.is_finite() {
        return None;
    }
    let value = if raw > 1.0 { raw / 100.0 } else { raw };
    Some(value.clamp(0.0, 1.0))
}

/// Parses a money cell into a fixed-precision decimal; `None` when blank or
/// unparseable. See [`normalize_amount`] for the zero-defaulting variant.
pub fn parse_amount(cell: &Cell) -> Option<Decimal> {
    match cell {
        Cell::Empty => None,
        Cell::Number(n) => Decimal::from_f64(*n),
        Cell::Text(s) => parse_amount_text(s),
        Cell::Date(_) | Cell::Bool(_) => None,
    }
}

/// Amount normalizer: non-numeric or blank input is zero, never an error.
pub fn normalize_amount(cell: &Cell) -> Decimal {
    parse_amount(cell).unwrap_or(Decimal::ZERO)
}

/// Currency text to decimal. Strips the currency symbol and whitespace,
/// then treats the last `.` or `,` followed by one or two digits as the
/// decimal point; every other separator is grouping.
fn parse_amount_text(raw: &str) -> Option<Decimal> {
    let mut cleaned = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '0'..='9' | '.' | ',' | '-' => cleaned.push(ch),
            'R' | 'r' | '$' => {}
            _ if ch.is_whitespace() => {}
            _ => return None,
        }
    }
    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }
    // All remaining bytes are ASCII, so byte positions are char positions.
    let normalized = match cleaned.rfind(['.', ',']) {
        Some(pos) => {
            let fraction = &cleaned[pos + 1..];
            if (1..=2).contains(&fraction.len()) && fraction.bytes().all(|b| b.is_ascii_digit()) {
                let integral: String = cleaned[..pos]
                    .chars()
                    .filter(|c| *c != '.' && *c != ',')
                    .collect();
                format!("{integral}.{fraction}")
            } else {
                cleaned.chars().filter(|c| *c != '.' && *c != ',').collect()
            }
        }
        None => cleaned,
    };
    normalized.parse::<Decimal>().ok()
}

/// Normalizes a date cell to a calendar date; `None` on failure.
///
/// Structured date cells pass through; text is tried against the known
/// formats in order.
pub fn normalize_date(cell: &Cell) -> Option<NaiveDate> {
    match cell {
        Cell::Date(d) => Some(*d),
        Cell::Text(s) => parse_date_text(s.trim()),
        _ => None,
    }
}

fn parse_date_text(raw: &str) -> Option<NaiveDate> {
    if raw.is_empty() {
        return None;
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(date);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.date());
        }
    }
    None
}

/// Integer fields (year offsets, UTM zone). Numeric cells truncate.
pub fn parse_int(cell: &Cell) -> Option<i32> {
    match cell {
        Cell::Number(n) if n.is_finite() => Some(*n as i32),
        Cell::Text(s) => {
            let t = s.trim();
            if t.is_empty() {
                return None;
            }
            t.parse::<i32>()
                .ok()
                .or_else(|| t.parse::<f64>().ok().map(|f| f as i32))
        }
        _ => None,
    }
}

// =============================================================================
// TESTS
// =============================================================================
