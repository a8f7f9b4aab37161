//! Per-sheet validation: structural and business rules accumulated as
//! (row, field, message) violations. Validators never mutate the data and
//! never fail - they always return a (possibly empty) list.
//!
//! Row numbers are 1-based sheet lines with the header on line 1, matching
//! what a user sees in the spreadsheet.

use std::collections::{HashMap, HashSet};
use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::columns::{self, SheetKind};
use crate::model::{
    Dataset, RegistrationKey, ServiceKey, ServiceRef, Table, CONTRACT_KINDS, STATE_CODES,
};
use crate::scalar;

/// Tolerance for the per-parent share-sum ceiling.
pub const SHARE_SUM_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Reportable; does not block a replace-mode commit.
    Warning,
    /// Blocks a replace-mode commit; rejects the row in additive mode.
    Error,
}

/// One rule violation, anchored to a sheet line and field.
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub sheet: SheetKind,
    pub row: usize,
    pub field: String,
    pub message: String,
    pub severity: Severity,
}

impl Violation {
    fn new(
        sheet: SheetKind,
        row: usize,
        field: &str,
        message: String,
        severity: Severity,
    ) -> Violation {
        Violation {
            sheet,
            row: line(row),
            field: field.to_string(),
            message,
            severity,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sheet, line {}, {}: {}",
            self.sheet, self.row, self.field, self.message
        )
    }
}

/// Validation knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateOptions {
    /// Treat "value executed exceeds adjusted budget" as a hard error.
    pub strict_overrun: bool,
}

/// Sheet line for a 0-based data-row index (header is line 1).
fn line(row: usize) -> usize {
    row + 2
}

/// Row-local registration rules (no cross-row or cross-sheet knowledge).
pub fn registration_row_violations(table: &Table, row: usize) -> Vec<Violation> {
    let mut violations = Vec::new();
    let err = |row, field: &str, message: String| {
        Violation::new(SheetKind::Registration, row, field, message, Severity::Error)
    };

    // contract kind: fallback applies when absent, hard rule when present
    if let Some(kind) = table.cell(row, columns::CONTRACT_KIND).to_text() {
        if !CONTRACT_KINDS.contains(&kind.as_str()) {
            violations.push(err(
                row,
                columns::CONTRACT_KIND,
                format!(
                    "invalid contract kind: {kind}. Options: {}",
                    CONTRACT_KINDS.join(", ")
                ),
            ));
        }
    }

    // state codes: multi-value, comma or semicolon separated
    if let Some(codes) = table.cell(row, columns::STATE_CODE).to_text() {
        for code in codes
            .replace(',', ";")
            .split(';')
            .map(str::trim)
            .filter(|c| !c.is_empty())
        {
            if !STATE_CODES.contains(&code) {
                violations.push(err(
                    row,
                    columns::STATE_CODE,
                    format!("invalid state code: {code}"),
                ));
            }
        }
    }

    let date_cell = table.cell(row, columns::SIGNATURE_DATE);
    if !date_cell.is_blank() && scalar::normalize_date(date_cell).is_none() {
        violations.push(err(
            row,
            columns::SIGNATURE_DATE,
            "invalid date (use DD/MM/YYYY)".to_string(),
        ));
    }

    for field in [
        columns::TOTAL_CAPEX,
        columns::EASTING,
        columns::NORTHING,
        columns::UTM_ZONE,
    ] {
        let cell = table.cell(row, field);
        if !cell.is_blank() && scalar::parse_amount(cell).is_none() {
            violations.push(err(row, field, "invalid numeric value".to_string()));
        }
    }

    // a replace-mode sync only accepts rows with positive capex; the row is
    // skipped, not fatal to the batch
    let capex_cell = table.cell(row, columns::TOTAL_CAPEX);
    if !capex_cell.is_blank() {
        if let Some(capex) = scalar::parse_amount(capex_cell) {
            if capex <= Decimal::ZERO {
                violations.push(Violation::new(
                    SheetKind::Registration,
                    row,
                    columns::TOTAL_CAPEX,
                    format!("total capex must be positive, got {capex}; row is skipped"),
                    Severity::Warning,
                ));
            }
        }
    }

    violations
}

/// Full registration-sheet validation: row-local rules plus duplicate keys.
pub fn validate_registrations(table: &Table) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut seen: HashMap<RegistrationKey, usize> = HashMap::new();
    for row in 0..table.len() {
        if table.row_is_blank(row) {
            continue;
        }
        violations.extend(registration_row_violations(table, row));
        if let Some(key) = RegistrationKey::from_row(table, row) {
            if let Some(first) = seen.insert(key.clone(), row) {
                violations.push(Violation::new(
                    SheetKind::Registration,
                    row,
                    "key",
                    format!(
                        "duplicate registration key {key} (first seen at line {})",
                        line(first)
                    ),
                    Severity::Error,
                ));
            }
        }
    }
    violations
}

/// Row-local service rules.
pub fn service_row_violations(table: &Table, row: usize) -> Vec<Violation> {
    let mut violations = Vec::new();
    let err = |row, field: &str, message: String| {
        Violation::new(SheetKind::Service, row, field, message, Severity::Error)
    };

    let share_cell = table.cell(row, columns::CAPEX_SHARE);
    if !share_cell.is_blank() && scalar::normalize_share(share_cell).is_none() {
        violations.push(err(
            row,
            columns::CAPEX_SHARE,
            "invalid percentage".to_string(),
        ));
    }

    for field in [columns::START_DATE, columns::END_DATE] {
        let cell = table.cell(row, field);
        if !cell.is_blank() && scalar::normalize_date(cell).is_none() {
            violations.push(err(row, field, "invalid date (use DD/MM/YYYY)".to_string()));
        }
    }

    // explicit end strictly after explicit start
    let start = scalar::normalize_date(table.cell(row, columns::START_DATE));
    let end = scalar::normalize_date(table.cell(row, columns::END_DATE));
    if let (Some(start), Some(end)) = (start, end) {
        if end <= start {
            violations.push(err(
                row,
                columns::END_DATE,
                format!("end date {end} must be after start date {start}"),
            ));
        }
    }

    let start_offset = scalar::parse_int(table.cell(row, columns::START_OFFSET_YEARS));
    let end_offset = scalar::parse_int(table.cell(row, columns::END_OFFSET_YEARS));
    if let (Some(start_offset), Some(end_offset)) = (start_offset, end_offset) {
        if end_offset < start_offset {
            violations.push(err(
                row,
                columns::END_OFFSET_YEARS,
                format!("end offset {end_offset} is before start offset {start_offset}"),
            ));
        }
    }

    violations
}

/// Full service-sheet validation: row-local rules, referential existence
/// against the registration sheet, duplicate keys, and the cross-row
/// per-parent share-sum ceiling (evaluated after the whole sheet is known).
pub fn validate_services(services: &Table, registrations: &Table) -> Vec<Violation> {
    let mut violations = Vec::new();
    let known: HashSet<RegistrationKey> = (0..registrations.len())
        .filter_map(|row| RegistrationKey::from_row(registrations, row))
        .collect();
    let mut seen: HashMap<ServiceKey, usize> = HashMap::new();
    let mut share_sums: HashMap<RegistrationKey, f64> = HashMap::new();
    let mut last_row: HashMap<RegistrationKey, usize> = HashMap::new();

    for row in 0..services.len() {
        if services.row_is_blank(row) {
            continue;
        }
        violations.extend(service_row_violations(services, row));

        let parent = RegistrationKey::from_row(services, row);
        if let Some(parent) = &parent {
            if !known.contains(parent) {
                violations.push(Violation::new(
                    SheetKind::Service,
                    row,
                    "key",
                    format!("registration not found for service: {parent}"),
                    Severity::Error,
                ));
            }
        }

        if let (Some(parent), Some(share)) = (
            parent,
            scalar::normalize_share(services.cell(row, columns::CAPEX_SHARE)),
        ) {
            *share_sums.entry(parent.clone()).or_insert(0.0) += share;
            last_row.insert(parent, row);
        }

        if let Some(key) = ServiceKey::from_row(services, row) {
            if let Some(first) = seen.insert(key.clone(), row) {
                violations.push(Violation::new(
                    SheetKind::Service,
                    row,
                    "key",
                    format!(
                        "duplicate service key {key} (first seen at line {})",
                        line(first)
                    ),
                    Severity::Error,
                ));
            }
        }
    }

    let mut over: Vec<(&RegistrationKey, f64)> = share_sums
        .iter()
        .filter(|(_, sum)| **sum > 1.0 + SHARE_SUM_TOLERANCE)
        .map(|(key, sum)| (key, *sum))
        .collect();
    over.sort_by_key(|(key, _)| last_row[*key]);
    for (key, sum) in over {
        violations.push(Violation::new(
            SheetKind::Service,
            last_row[key],
            columns::CAPEX_SHARE,
            format!(
                "capex shares for {key} sum to {:.1}% (over 100%)",
                sum * 100.0
            ),
            Severity::Error,
        ));
    }

    violations
}

/// Row-local execution-update rules.
pub fn update_row_violations(
    table: &Table,
    row: usize,
    options: &ValidateOptions,
) -> Vec<Violation> {
    let mut violations = Vec::new();

    let pct_cell = table.cell(row, columns::PERCENT_EXECUTED);
    if !pct_cell.is_blank() && scalar::normalize_share(pct_cell).is_none() {
        violations.push(Violation::new(
            SheetKind::Update,
            row,
            columns::PERCENT_EXECUTED,
            "invalid percentage".to_string(),
            Severity::Error,
        ));
    }

    let date_cell = table.cell(row, columns::UPDATE_DATE);
    if !date_cell.is_blank() && scalar::normalize_date(date_cell).is_none() {
        violations.push(Violation::new(
            SheetKind::Update,
            row,
            columns::UPDATE_DATE,
            "invalid date (use DD/MM/YYYY)".to_string(),
            Severity::Error,
        ));
    }

    // soft rule: upstream data is known to violate it
    let value = scalar::parse_amount(table.cell(row, columns::VALUE_EXECUTED));
    let budget = scalar::parse_amount(table.cell(row, columns::ADJUSTED_BUDGET));
    if let (Some(value), Some(budget)) = (value, budget) {
        if value > budget {
            violations.push(Violation::new(
                SheetKind::Update,
                row,
                columns::VALUE_EXECUTED,
                format!("value executed {value} exceeds adjusted budget {budget}"),
                if options.strict_overrun {
                    Severity::Error
                } else {
                    Severity::Warning
                },
            ));
        }
    }

    violations
}

/// Full update-sheet validation: row-local rules plus referential existence
/// against the service sheet (a ref shared by sibling services is reported
/// as ambiguous, never matched arbitrarily).
pub fn validate_updates(
    updates: &Table,
    services: &Table,
    options: &ValidateOptions,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut refs: HashMap<ServiceRef, usize> = HashMap::new();
    for row in 0..services.len() {
        if let Some(key) = ServiceKey::from_row(services, row) {
            *refs.entry(key.service_ref()).or_insert(0) += 1;
        }
    }

    for row in 0..updates.len() {
        if updates.row_is_blank(row) {
            continue;
        }
        violations.extend(update_row_violations(updates, row, options));
        if let Some(service_ref) = ServiceRef::from_row(updates, row) {
            match refs.get(&service_ref) {
                None => violations.push(Violation::new(
                    SheetKind::Update,
                    row,
                    "key",
                    format!("service not found for update: {service_ref}"),
                    Severity::Error,
                )),
                Some(count) if *count > 1 => violations.push(Violation::new(
                    SheetKind::Update,
                    row,
                    "key",
                    format!("service reference is ambiguous for update: {service_ref}"),
                    Severity::Error,
                )),
                _ => {}
            }
        }
    }

    violations
}

/// Runs all three sheet validators over a projected dataset.
pub fn validate_dataset(dataset: &Dataset, options: &ValidateOptions) -> Vec<Violation> {
    let mut violations = validate_registrations(&dataset.registrations);
    violations.extend(validate_services(&dataset.services, &dataset.registrations));
    violations.extend(validate_updates(
        &dataset.updates,
        &dataset.services,
        options,
    ));
    violations
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Cell;

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    fn table(kind: SheetKind, rows: &[&[(&str, Cell)]]) -> Table {
        let columns = columns::canonical_columns(kind);
        let mut table = Table::new(columns);
        for values in rows {
            table.push_row(
                columns
                    .iter()
                    .map(|c| {
                        values
                            .iter()
                            .find(|(n, _)| n == c)
                            .map(|(_, v)| v.clone())
                            .unwrap_or(Cell::Empty)
                    })
                    .collect(),
            );
        }
        table
    }

    fn registration(object: &str, capex: &str) -> Vec<(&'static str, Cell)> {
        vec![
            (columns::PORT_ZONE, text("Porto X")),
            (columns::STATE_CODE, text("SP")),
            (columns::CONCESSION_OBJECT, text(object)),
            (columns::TOTAL_CAPEX, text(capex)),
        ]
    }

    fn service(object: &str, name: &str, share: &str) -> Vec<(&'static str, Cell)> {
        vec![
            (columns::PORT_ZONE, text("Porto X")),
            (columns::STATE_CODE, text("SP")),
            (columns::CONCESSION_OBJECT, text(object)),
            (columns::SERVICE_TYPE, text("Dredging works")),
            (columns::PHASE, text("Phase 1")),
            (columns::SERVICE_NAME, text(name)),
            (columns::CAPEX_SHARE, text(share)),
        ]
    }

    fn errors(violations: &[Violation]) -> Vec<&Violation> {
        violations
            .iter()
            .filter(|v| v.severity == Severity::Error)
            .collect()
    }

    // -------------------------------------------------------------------------
    // REGISTRATION RULES
    // -------------------------------------------------------------------------

    #[test]
    fn test_invalid_contract_kind_is_error() {
        let mut row = registration("Dredging", "100");
        row.push((columns::CONTRACT_KIND, text("Aluguel")));
        let t = table(SheetKind::Registration, &[&row]);
        let v = validate_registrations(&t);
        assert_eq!(errors(&v).len(), 1);
        assert_eq!(v[0].field, columns::CONTRACT_KIND);
        assert!(v[0].message.contains("Aluguel"));
    }

    #[test]
    fn test_absent_contract_kind_is_fine() {
        let t = table(SheetKind::Registration, &[&registration("Dredging", "100")]);
        assert!(validate_registrations(&t).is_empty());
    }

    #[test]
    fn test_multi_value_state_codes() {
        let mut row = registration("Dredging", "100");
        row.retain(|(n, _)| *n != columns::STATE_CODE);
        row.push((columns::STATE_CODE, text("SP; XX, RJ")));
        let t = table(SheetKind::Registration, &[&row]);
        let v = validate_registrations(&t);
        assert_eq!(errors(&v).len(), 1);
        assert!(v[0].message.contains("XX"));
    }

    #[test]
    fn test_bad_signature_date_and_capex() {
        let mut row = registration("Dredging", "not-a-number");
        row.push((columns::SIGNATURE_DATE, text("soon")));
        let t = table(SheetKind::Registration, &[&row]);
        let v = validate_registrations(&t);
        let fields: Vec<&str> = v.iter().map(|v| v.field.as_str()).collect();
        assert!(fields.contains(&columns::SIGNATURE_DATE));
        assert!(fields.contains(&columns::TOTAL_CAPEX));
    }

    #[test]
    fn test_nonpositive_capex_is_warning() {
        let t = table(SheetKind::Registration, &[&registration("Dredging", "0")]);
        let v = validate_registrations(&t);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].severity, Severity::Warning);
    }

    #[test]
    fn test_duplicate_registration_key() {
        let t = table(
            SheetKind::Registration,
            &[&registration("Dredging", "100"), &registration("Dredging", "200")],
        );
        let v = validate_registrations(&t);
        assert_eq!(errors(&v).len(), 1);
        assert_eq!(v[0].row, 3);
        assert!(v[0].message.contains("duplicate"));
    }

    // -------------------------------------------------------------------------
    // SERVICE RULES
    // -------------------------------------------------------------------------

    #[test]
    fn test_service_parent_must_resolve() {
        let registrations = table(SheetKind::Registration, &[&registration("Dredging", "100")]);
        let services = table(SheetKind::Service, &[&service("Berths", "Deepening", "50")]);
        let v = validate_services(&services, &registrations);
        assert_eq!(errors(&v).len(), 1);
        assert!(v[0].message.contains("registration not found"));
    }

    #[test]
    fn test_share_sum_over_ceiling_is_one_error_per_parent() {
        let registrations = table(SheetKind::Registration, &[&registration("Dredging", "100")]);
        let services = table(
            SheetKind::Service,
            &[
                &service("Dredging", "Deepening", "70"),
                &service("Dredging", "Widening", "40"),
            ],
        );
        let v = validate_services(&services, &registrations);
        assert_eq!(errors(&v).len(), 1);
        assert_eq!(v[0].row, 3);
        assert!(v[0].message.contains("110.0%"));
    }

    #[test]
    fn test_share_sum_at_ceiling_is_fine() {
        let registrations = table(SheetKind::Registration, &[&registration("Dredging", "100")]);
        let services = table(
            SheetKind::Service,
            &[
                &service("Dredging", "Deepening", "60"),
                &service("Dredging", "Widening", "40"),
            ],
        );
        assert!(validate_services(&services, &registrations).is_empty());
    }

    #[test]
    fn test_end_date_must_follow_start_date() {
        let mut row = service("Dredging", "Deepening", "");
        row.push((columns::START_DATE, text("15/03/2022")));
        row.push((columns::END_DATE, text("15/03/2021")));
        let registrations = table(SheetKind::Registration, &[&registration("Dredging", "100")]);
        let services = table(SheetKind::Service, &[&row]);
        let v = validate_services(&services, &registrations);
        assert_eq!(errors(&v).len(), 1);
        assert_eq!(v[0].field, columns::END_DATE);
    }

    #[test]
    fn test_invalid_share_text() {
        let registrations = table(SheetKind::Registration, &[&registration("Dredging", "100")]);
        let services = table(SheetKind::Service, &[&service("Dredging", "Deepening", "much")]);
        let v = validate_services(&services, &registrations);
        assert_eq!(errors(&v).len(), 1);
        assert_eq!(v[0].field, columns::CAPEX_SHARE);
    }

    // -------------------------------------------------------------------------
    // UPDATE RULES
    // -------------------------------------------------------------------------

    fn update(object: &str, name: &str) -> Vec<(&'static str, Cell)> {
        vec![
            (columns::PORT_ZONE, text("Porto X")),
            (columns::STATE_CODE, text("SP")),
            (columns::CONCESSION_OBJECT, text(object)),
            (columns::SERVICE_TYPE, text("Dredging works")),
            (columns::PHASE, text("Phase 1")),
            (columns::SERVICE_NAME, text(name)),
        ]
    }

    #[test]
    fn test_update_service_must_resolve() {
        let services = table(SheetKind::Service, &[&service("Dredging", "Deepening", "50")]);
        let updates = table(SheetKind::Update, &[&update("Dredging", "Widening")]);
        let v = validate_updates(&updates, &services, &ValidateOptions::default());
        assert_eq!(errors(&v).len(), 1);
        assert!(v[0].message.contains("service not found"));
    }

    #[test]
    fn test_ambiguous_service_ref_is_reported() {
        let mut first = service("Dredging", "Deepening", "30");
        first.push((columns::SERVICE_DESCRIPTION, text("stage one")));
        let mut second = service("Dredging", "Deepening", "30");
        second.push((columns::SERVICE_DESCRIPTION, text("stage two")));
        let services = table(SheetKind::Service, &[&first, &second]);
        let updates = table(SheetKind::Update, &[&update("Dredging", "Deepening")]);
        let v = validate_updates(&updates, &services, &ValidateOptions::default());
        assert_eq!(errors(&v).len(), 1);
        assert!(v[0].message.contains("ambiguous"));
    }

    #[test]
    fn test_overrun_severity_follows_option() {
        let services = table(SheetKind::Service, &[&service("Dredging", "Deepening", "50")]);
        let mut row = update("Dredging", "Deepening");
        row.push((columns::ADJUSTED_BUDGET, text("100.00")));
        row.push((columns::VALUE_EXECUTED, text("150.00")));
        let updates = table(SheetKind::Update, &[&row]);

        let soft = validate_updates(&updates, &services, &ValidateOptions::default());
        assert_eq!(soft.len(), 1);
        assert_eq!(soft[0].severity, Severity::Warning);

        let strict = validate_updates(
            &updates,
            &services,
            &ValidateOptions {
                strict_overrun: true,
            },
        );
        assert_eq!(strict[0].severity, Severity::Error);
    }

    #[test]
    fn test_blank_rows_are_ignored() {
        let mut t = columns::empty_table(SheetKind::Registration);
        t.push_row(vec![Cell::Empty; columns::REGISTRATION_COLUMNS.len()]);
        assert!(validate_registrations(&t).is_empty());
    }
}
