//! Core data model: typed cells, canonical-column tables, natural keys and
//! the parsed records of the three-sheet dataset.
//!
//! Nothing here talks to the store. Records are built from projected tables
//! with total constructors: malformed scalars degrade to `None`, only a
//! missing natural key makes a row unusable.

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::columns::{self, SheetKind};
use crate::scalar;

/// Contract kinds accepted by the source system.
pub const CONTRACT_KINDS: &[&str] = &["Concessão", "Arrendamento", "Autorização"];

/// Fallback kind when the spreadsheet leaves the field blank.
pub const DEFAULT_CONTRACT_KIND: &str = "Concessão";

/// Brazilian federative-unit codes (the fixed state-code set).
pub const STATE_CODES: &[&str] = &[
    "AC", "AL", "AP", "AM", "BA", "CE", "DF", "ES", "GO", "MA", "MT", "MS", "MG", "PA", "PB",
    "PR", "PE", "PI", "RJ", "RN", "RS", "RO", "RR", "SC", "SP", "SE", "TO",
];

/// A single spreadsheet cell after ingestion.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Date(NaiveDate),
    Bool(bool),
}

static EMPTY_CELL: Cell = Cell::Empty;

impl Cell {
    /// Empty cell or whitespace-only text.
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Owned text for string-valued fields: trimmed, `None` when blank.
    /// Numbers render without a spurious fraction so a numeric zone label
    /// compares equal across float and text cells.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => {
                let t = s.trim();
                if t.is_empty() {
                    None
                } else {
                    Some(t.to_string())
                }
            }
            Cell::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    Some(format!("{}", *n as i64))
                } else {
                    Some(n.to_string())
                }
            }
            Cell::Date(d) => Some(d.format("%d/%m/%Y").to_string()),
            Cell::Bool(b) => Some(b.to_string()),
        }
    }

    pub fn from_opt_text(value: Option<String>) -> Cell {
        match value {
            Some(s) if !s.trim().is_empty() => Cell::Text(s),
            _ => Cell::Empty,
        }
    }

    pub fn from_opt_number(value: Option<f64>) -> Cell {
        value.map(Cell::Number).unwrap_or(Cell::Empty)
    }

    pub fn from_opt_int(value: Option<i32>) -> Cell {
        value.map(|v| Cell::Number(v as f64)).unwrap_or(Cell::Empty)
    }

    pub fn from_opt_date(value: Option<NaiveDate>) -> Cell {
        value.map(Cell::Date).unwrap_or(Cell::Empty)
    }

    /// Decimal amounts round-trip as text so no precision is lost.
    pub fn from_opt_decimal(value: Option<Decimal>) -> Cell {
        value
            .map(|d| Cell::Text(d.to_string()))
            .unwrap_or(Cell::Empty)
    }
}

/// A sheet projected onto its canonical column set.
#[derive(Debug, Clone, Default)]
pub struct Table {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: &[&str]) -> Table {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();
        Table {
            columns,
            index,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Cell>) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell at (row, canonical column). Unknown columns and out-of-range
    /// rows read as empty so callers never index out of bounds.
    pub fn cell(&self, row: usize, column: &str) -> &Cell {
        self.index
            .get(column)
            .and_then(|&c| self.rows.get(row).and_then(|r| r.get(c)))
            .unwrap_or(&EMPTY_CELL)
    }

    pub fn row_is_blank(&self, row: usize) -> bool {
        self.rows
            .get(row)
            .map(|r| r.iter().all(Cell::is_blank))
            .unwrap_or(true)
    }
}

/// The three-sheet dataset handed to validation and reconciliation.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub registrations: Table,
    pub services: Table,
    pub updates: Table,
}

impl Dataset {
    /// All three roles present but empty, each with its canonical columns.
    pub fn empty() -> Dataset {
        Dataset {
            registrations: columns::empty_table(SheetKind::Registration),
            services: columns::empty_table(SheetKind::Service),
            updates: columns::empty_table(SheetKind::Update),
        }
    }

    pub fn table(&self, kind: SheetKind) -> &Table {
        match kind {
            SheetKind::Registration => &self.registrations,
            SheetKind::Service => &self.services,
            SheetKind::Update => &self.updates,
        }
    }

    pub fn table_mut(&mut self, kind: SheetKind) -> &mut Table {
        match kind {
            SheetKind::Registration => &mut self.registrations,
            SheetKind::Service => &mut self.services,
            SheetKind::Update => &mut self.updates,
        }
    }
}

/// Natural key of a registration: the business identity of one concession
/// contract. No surrogate id crosses the import boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistrationKey {
    pub port_zone: String,
    pub state_code: String,
    pub concession_object: String,
}

impl RegistrationKey {
    /// Reads the key columns of a row; `None` when any component is blank.
    pub fn from_row(table: &Table, row: usize) -> Option<RegistrationKey> {
        Some(RegistrationKey {
            port_zone: table.cell(row, columns::PORT_ZONE).to_text()?,
            state_code: table.cell(row, columns::STATE_CODE).to_text()?,
            concession_object: table.cell(row, columns::CONCESSION_OBJECT).to_text()?,
        })
    }
}

impl fmt::Display for RegistrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} / {}",
            self.port_zone, self.state_code, self.concession_object
        )
    }
}

/// Full natural key of a service under its registration. A blank
/// description is kept as an empty string so it still participates in
/// exact-match comparisons.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub registration: RegistrationKey,
    pub service_type: String,
    pub phase: String,
    pub service_name: String,
    pub description: String,
}

impl ServiceKey {
    pub fn from_row(table: &Table, row: usize) -> Option<ServiceKey> {
        Some(ServiceKey {
            registration: RegistrationKey::from_row(table, row)?,
            service_type: table.cell(row, columns::SERVICE_TYPE).to_text()?,
            phase: table.cell(row, columns::PHASE).to_text()?,
            service_name: table.cell(row, columns::SERVICE_NAME).to_text()?,
            description: table
                .cell(row, columns::SERVICE_DESCRIPTION)
                .to_text()
                .unwrap_or_default(),
        })
    }

    /// The short form update rows match against (description excluded).
    pub fn service_ref(&self) -> ServiceRef {
        ServiceRef {
            registration: self.registration.clone(),
            service_type: self.service_type.clone(),
            phase: self.phase.clone(),
            service_name: self.service_name.clone(),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} / {} / {}",
            self.registration, self.service_type, self.phase, self.service_name
        )
    }
}

/// Short service reference: how the update sheet addresses a service. The
/// description column of that sheet belongs to the update itself, so it is
/// not part of the match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceRef {
    pub registration: RegistrationKey,
    pub service_type: String,
    pub phase: String,
    pub service_name: String,
}

impl ServiceRef {
    pub fn from_row(table: &Table, row: usize) -> Option<ServiceRef> {
        Some(ServiceRef {
            registration: RegistrationKey::from_row(table, row)?,
            service_type: table.cell(row, columns::SERVICE_TYPE).to_text()?,
            phase: table.cell(row, columns::PHASE).to_text()?,
            service_name: table.cell(row, columns::SERVICE_NAME).to_text()?,
        })
    }
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} / {} / {}",
            self.registration, self.service_type, self.phase, self.service_name
        )
    }
}

/// One parsed registration row, ready for storage.
#[derive(Debug, Clone)]
pub struct RegistrationRecord {
    pub key: RegistrationKey,
    pub contract_kind: String,
    pub total_capex: Option<Decimal>,
    pub signature_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub easting: Option<Decimal>,
    pub northing: Option<Decimal>,
    pub utm_zone: Option<i32>,
}

impl RegistrationRecord {
    pub fn from_row(table: &Table, row: usize) -> Option<RegistrationRecord> {
        let key = RegistrationKey::from_row(table, row)?;
        let contract_kind = table
            .cell(row, columns::CONTRACT_KIND)
            .to_text()
            .unwrap_or_else(|| DEFAULT_CONTRACT_KIND.to_string());
        Some(RegistrationRecord {
            key,
            contract_kind,
            total_capex: scalar::parse_amount(table.cell(row, columns::TOTAL_CAPEX)),
            signature_date: scalar::normalize_date(table.cell(row, columns::SIGNATURE_DATE)),
            description: table.cell(row, columns::DESCRIPTION).to_text(),
            easting: scalar::parse_amount(table.cell(row, columns::EASTING)),
            northing: scalar::parse_amount(table.cell(row, columns::NORTHING)),
            utm_zone: scalar::parse_int(table.cell(row, columns::UTM_ZONE)),
        })
    }
}

/// One parsed service row. `start_date`/`end_date`/`service_budget` are
/// overwritten by the derivation step when the parent supplies the inputs.
#[derive(Debug, Clone)]
pub struct ServiceRecord {
    pub key: ServiceKey,
    pub start_offset_years: Option<i32>,
    pub start_date: Option<NaiveDate>,
    pub end_offset_years: Option<i32>,
    pub end_date: Option<NaiveDate>,
    pub schedule_source: Option<String>,
    pub capex_share: Option<f64>,
    pub service_budget: Option<Decimal>,
    pub share_source: Option<String>,
}

impl ServiceRecord {
    pub fn from_row(table: &Table, row: usize) -> Option<ServiceRecord> {
        let key = ServiceKey::from_row(table, row)?;
        Some(ServiceRecord {
            key,
            start_offset_years: scalar::parse_int(table.cell(row, columns::START_OFFSET_YEARS)),
            start_date: scalar::normalize_date(table.cell(row, columns::START_DATE)),
            end_offset_years: scalar::parse_int(table.cell(row, columns::END_OFFSET_YEARS)),
            end_date: scalar::normalize_date(table.cell(row, columns::END_DATE)),
            schedule_source: table.cell(row, columns::SCHEDULE_SOURCE).to_text(),
            capex_share: scalar::normalize_share(table.cell(row, columns::CAPEX_SHARE)),
            service_budget: scalar::parse_amount(table.cell(row, columns::SERVICE_BUDGET)),
            share_source: table.cell(row, columns::SHARE_SOURCE).to_text(),
        })
    }
}

/// One risk classification attached to an execution update.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskEntry {
    pub kind: String,
    pub description: Option<String>,
}

/// One parsed execution-update row: a point-in-time progress report.
#[derive(Debug, Clone)]
pub struct UpdateRecord {
    pub service: ServiceRef,
    pub description: Option<String>,
    pub percent_executed: Option<f64>,
    pub adjusted_budget: Option<Decimal>,
    pub value_executed: Option<Decimal>,
    pub update_date: Option<NaiveDate>,
    pub responsible: Option<String>,
    pub responsible_role: Option<String>,
    pub department: Option<String>,
    pub risks: Vec<RiskEntry>,
}

impl UpdateRecord {
    pub fn from_row(table: &Table, row: usize) -> Option<UpdateRecord> {
        let service = ServiceRef::from_row(table, row)?;
        Some(UpdateRecord {
            service,
            description: table.cell(row, columns::DESCRIPTION).to_text(),
            percent_executed: scalar::normalize_share(table.cell(row, columns::PERCENT_EXECUTED)),
            adjusted_budget: scalar::parse_amount(table.cell(row, columns::ADJUSTED_BUDGET)),
            value_executed: scalar::parse_amount(table.cell(row, columns::VALUE_EXECUTED)),
            update_date: scalar::normalize_date(table.cell(row, columns::UPDATE_DATE)),
            responsible: table.cell(row, columns::RESPONSIBLE).to_text(),
            responsible_role: table.cell(row, columns::RESPONSIBLE_ROLE).to_text(),
            department: table.cell(row, columns::DEPARTMENT).to_text(),
            risks: parse_risks(table, row),
        })
    }
}

/// Multi-valued risk cells are `;`-separated; descriptions pair up with
/// kinds by position.
fn parse_risks(table: &Table, row: usize) -> Vec<RiskEntry> {
    let kinds = table
        .cell(row, columns::RISK_KINDS)
        .to_text()
        .unwrap_or_default();
    let descriptions = table
        .cell(row, columns::RISK_DESCRIPTIONS)
        .to_text()
        .unwrap_or_default();
    let mut descriptions = descriptions.split(';').map(str::trim);
    kinds
        .split(';')
        .map(str::trim)
        .filter_map(|kind| {
            let description = descriptions.next();
            if kind.is_empty() {
                return None;
            }
            Some(RiskEntry {
                kind: kind.to_string(),
                description: description
                    .filter(|d| !d.is_empty())
                    .map(|d| d.to_string()),
            })
        })
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn row(columns: &[&str], values: &[(&str, Cell)]) -> Vec<Cell> {
        columns
            .iter()
            .map(|c| {
                values
                    .iter()
                    .find(|(n, _)| n == c)
                    .map(|(_, v)| v.clone())
                    .unwrap_or(Cell::Empty)
            })
            .collect()
    }

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    #[test]
    fn test_cell_to_text_trims_and_blanks() {
        assert_eq!(text("  Porto X  ").to_text().as_deref(), Some("Porto X"));
        assert_eq!(text("   ").to_text(), None);
        assert_eq!(Cell::Empty.to_text(), None);
    }

    #[test]
    fn test_cell_to_text_integral_number() {
        assert_eq!(Cell::Number(23.0).to_text().as_deref(), Some("23"));
        assert_eq!(Cell::Number(2.5).to_text().as_deref(), Some("2.5"));
    }

    #[test]
    fn test_table_cell_out_of_range_reads_empty() {
        let table = Table::new(crate::columns::REGISTRATION_COLUMNS);
        assert!(table.cell(7, crate::columns::PORT_ZONE).is_blank());
        assert!(table.cell(0, "no_such_column").is_blank());
    }

    #[test]
    fn test_registration_key_requires_all_components() {
        let mut table = Table::new(crate::columns::REGISTRATION_COLUMNS);
        table.push_row(row(
            crate::columns::REGISTRATION_COLUMNS,
            &[
                (crate::columns::PORT_ZONE, text("Porto X")),
                (crate::columns::STATE_CODE, text("SP")),
            ],
        ));
        assert!(RegistrationKey::from_row(&table, 0).is_none());

        let mut table = Table::new(crate::columns::REGISTRATION_COLUMNS);
        table.push_row(row(
            crate::columns::REGISTRATION_COLUMNS,
            &[
                (crate::columns::PORT_ZONE, text("Porto X")),
                (crate::columns::STATE_CODE, text("SP")),
                (crate::columns::CONCESSION_OBJECT, text("Dredging")),
            ],
        ));
        let key = RegistrationKey::from_row(&table, 0).unwrap();
        assert_eq!(key.port_zone, "Porto X");
        assert_eq!(key.state_code, "SP");
        assert_eq!(key.concession_object, "Dredging");
    }

    #[test]
    fn test_registration_record_contract_kind_fallback() {
        let mut table = Table::new(crate::columns::REGISTRATION_COLUMNS);
        table.push_row(row(
            crate::columns::REGISTRATION_COLUMNS,
            &[
                (crate::columns::PORT_ZONE, text("Porto X")),
                (crate::columns::STATE_CODE, text("SP")),
                (crate::columns::CONCESSION_OBJECT, text("Dredging")),
            ],
        ));
        let record = RegistrationRecord::from_row(&table, 0).unwrap();
        assert_eq!(record.contract_kind, DEFAULT_CONTRACT_KIND);
    }

    #[test]
    fn test_service_key_blank_description_is_empty_string() {
        let mut table = Table::new(crate::columns::SERVICE_COLUMNS);
        table.push_row(row(
            crate::columns::SERVICE_COLUMNS,
            &[
                (crate::columns::PORT_ZONE, text("Porto X")),
                (crate::columns::STATE_CODE, text("SP")),
                (crate::columns::CONCESSION_OBJECT, text("Dredging")),
                (crate::columns::SERVICE_TYPE, text("Dredging works")),
                (crate::columns::PHASE, text("Phase 1")),
                (crate::columns::SERVICE_NAME, text("Deepening")),
            ],
        ));
        let key = ServiceKey::from_row(&table, 0).unwrap();
        assert_eq!(key.description, "");
        assert_eq!(key.service_ref().service_name, "Deepening");
    }

    #[test]
    fn test_risk_cells_split_on_semicolons() {
        let mut table = Table::new(crate::columns::UPDATE_COLUMNS);
        table.push_row(row(
            crate::columns::UPDATE_COLUMNS,
            &[
                (crate::columns::PORT_ZONE, text("Porto X")),
                (crate::columns::STATE_CODE, text("SP")),
                (crate::columns::CONCESSION_OBJECT, text("Dredging")),
                (crate::columns::SERVICE_TYPE, text("Dredging works")),
                (crate::columns::PHASE, text("Phase 1")),
                (crate::columns::SERVICE_NAME, text("Deepening")),
                (crate::columns::RISK_KINDS, text("Environmental; Financial")),
                (crate::columns::RISK_DESCRIPTIONS, text("Silting; ")),
            ],
        ));
        let record = UpdateRecord::from_row(&table, 0).unwrap();
        assert_eq!(record.risks.len(), 2);
        assert_eq!(record.risks[0].kind, "Environmental");
        assert_eq!(record.risks[0].description.as_deref(), Some("Silting"));
        assert_eq!(record.risks[1].kind, "Financial");
        assert_eq!(record.risks[1].description, None);
    }

    #[test]
    fn test_update_record_without_service_key_is_none() {
        let mut table = Table::new(crate::columns::UPDATE_COLUMNS);
        table.push_row(row(
            crate::columns::UPDATE_COLUMNS,
            &[(crate::columns::PORT_ZONE, text("Porto X"))],
        ));
        assert!(UpdateRecord::from_row(&table, 0).is_none());
    }
}
