//! Column normalization: maps arbitrary spreadsheet header text to the
//! canonical per-sheet field names, and projects raw sheets onto the
//! canonical column sets.
//!
//! Header matching is tolerant (case, diacritics, punctuation, spacing vary
//! across spreadsheet revisions) but the canonical output is fixed: every
//! downstream component reads cells by the constants below.

use serde::Serialize;

use crate::model::{Cell, Table};

/// The three sheet roles of the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetKind {
    Registration,
    Service,
    Update,
}

impl std::fmt::Display for SheetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SheetKind::Registration => "registration",
            SheetKind::Service => "service",
            SheetKind::Update => "update",
        })
    }
}

// Canonical field names. Shared names mean the same thing on every sheet
// that carries them.
pub const PORT_ZONE: &str = "port_zone";
pub const STATE_CODE: &str = "state_code";
pub const CONCESSION_OBJECT: &str = "concession_object";
pub const CONTRACT_KIND: &str = "contract_kind";
pub const TOTAL_CAPEX: &str = "total_capex";
pub const SIGNATURE_DATE: &str = "signature_date";
pub const DESCRIPTION: &str = "description";
pub const EASTING: &str = "easting";
pub const NORTHING: &str = "northing";
pub const UTM_ZONE: &str = "utm_zone";
pub const SERVICE_TYPE: &str = "service_type";
pub const PHASE: &str = "phase";
pub const SERVICE_NAME: &str = "service_name";
pub const SERVICE_DESCRIPTION: &str = "service_description";
pub const START_OFFSET_YEARS: &str = "start_offset_years";
pub const START_DATE: &str = "start_date";
pub const END_OFFSET_YEARS: &str = "end_offset_years";
pub const END_DATE: &str = "end_date";
pub const SCHEDULE_SOURCE: &str = "schedule_source";
pub const CAPEX_SHARE: &str = "capex_share";
pub const SERVICE_BUDGET: &str = "service_budget";
pub const SHARE_SOURCE: &str = "share_source";
pub const PERCENT_EXECUTED: &str = "percent_executed";
pub const ADJUSTED_BUDGET: &str = "adjusted_budget";
pub const VALUE_EXECUTED: &str = "value_executed";
pub const UPDATE_DATE: &str = "update_date";
pub const RESPONSIBLE: &str = "responsible";
pub const RESPONSIBLE_ROLE: &str = "responsible_role";
pub const DEPARTMENT: &str = "department";
pub const RISK_KINDS: &str = "risk_kinds";
pub const RISK_DESCRIPTIONS: &str = "risk_descriptions";

/// Canonical column set of the registration sheet, in storage order.
pub const REGISTRATION_COLUMNS: &[&str] = &[
    PORT_ZONE,
    STATE_CODE,
    CONCESSION_OBJECT,
    CONTRACT_KIND,
    TOTAL_CAPEX,
    SIGNATURE_DATE,
    DESCRIPTION,
    EASTING,
    NORTHING,
    UTM_ZONE,
];

/// Canonical column set of the service sheet.
pub const SERVICE_COLUMNS: &[&str] = &[
    PORT_ZONE,
    STATE_CODE,
    CONCESSION_OBJECT,
    SERVICE_TYPE,
    PHASE,
    SERVICE_NAME,
    SERVICE_DESCRIPTION,
    START_OFFSET_YEARS,
    START_DATE,
    END_OFFSET_YEARS,
    END_DATE,
    SCHEDULE_SOURCE,
    CAPEX_SHARE,
    SERVICE_BUDGET,
    SHARE_SOURCE,
];

/// Canonical column set of the execution-update sheet.
pub const UPDATE_COLUMNS: &[&str] = &[
    PORT_ZONE,
    STATE_CODE,
    CONCESSION_OBJECT,
    SERVICE_TYPE,
    PHASE,
    SERVICE_NAME,
    DESCRIPTION,
    PERCENT_EXECUTED,
    ADJUSTED_BUDGET,
    VALUE_EXECUTED,
    UPDATE_DATE,
    RESPONSIBLE,
    RESPONSIBLE_ROLE,
    DEPARTMENT,
    RISK_KINDS,
    RISK_DESCRIPTIONS,
];

// Header aliases seen across spreadsheet revisions, keyed by cleaned form.
// Portuguese labels come from the source workbooks; snake_case forms from
// database exports of the same data.

const REGISTRATION_ALIASES: &[(&str, &str)] = &[
    ("zona_portuaria", PORT_ZONE),
    ("uf", STATE_CODE),
    ("estado", STATE_CODE),
    ("obj_de_concessao", CONCESSION_OBJECT),
    ("objeto_de_concessao", CONCESSION_OBJECT),
    ("objeto_concessao", CONCESSION_OBJECT),
    ("tipo", CONTRACT_KIND),
    ("capex_total", TOTAL_CAPEX),
    ("data_de_assinatura_do_contrato", SIGNATURE_DATE),
    ("data_assinatura", SIGNATURE_DATE),
    ("descricao", DESCRIPTION),
    ("coordenada_e_utm", EASTING),
    ("coord_e", EASTING),
    ("coordenada_s_utm", NORTHING),
    ("coord_s", NORTHING),
    ("fuso", UTM_ZONE),
];

const SERVICE_ALIASES: &[(&str, &str)] = &[
    ("zona_portuaria", PORT_ZONE),
    ("uf", STATE_CODE),
    ("estado", STATE_CODE),
    ("obj_de_concessao", CONCESSION_OBJECT),
    ("objeto_de_concessao", CONCESSION_OBJECT),
    ("objeto_concessao", CONCESSION_OBJECT),
    ("tipo_de_servico", SERVICE_TYPE),
    ("tipo_servico", SERVICE_TYPE),
    ("fase", PHASE),
    ("servico", SERVICE_NAME),
    ("descricao_do_servico", SERVICE_DESCRIPTION),
    ("descricao", SERVICE_DESCRIPTION),
    ("prazo_inicio_anos", START_OFFSET_YEARS),
    ("data_de_inicio", START_DATE),
    ("data_inicio", START_DATE),
    ("prazo_final_anos", END_OFFSET_YEARS),
    ("data_final", END_DATE),
    ("fonte_prazo", SCHEDULE_SOURCE),
    ("de_capex_para_o_servico", CAPEX_SHARE),
    ("percentual_capex", CAPEX_SHARE),
    ("capex_do_servico", SERVICE_BUDGET),
    ("capex_do_servico_total", SERVICE_BUDGET),
    ("capex_servico", SERVICE_BUDGET),
    ("fonte_do_capex", SHARE_SOURCE),
    ("fonte_percentual", SHARE_SOURCE),
];

const UPDATE_ALIASES: &[(&str, &str)] = &[
    ("zona_portuaria", PORT_ZONE),
    ("uf", STATE_CODE),
    ("estado", STATE_CODE),
    ("obj_de_concessao", CONCESSION_OBJECT),
    ("objeto_de_concessao", CONCESSION_OBJECT),
    ("objeto_concessao", CONCESSION_OBJECT),
    ("tipo_de_servico", SERVICE_TYPE),
    ("tipo_servico", SERVICE_TYPE),
    ("fase", PHASE),
    ("servico", SERVICE_NAME),
    ("descricao", DESCRIPTION),
    ("executada", PERCENT_EXECUTED),
    ("percentual_executado", PERCENT_EXECUTED),
    ("capex_reaj", ADJUSTED_BUDGET),
    ("capex_reajustado", ADJUSTED_BUDGET),
    ("valor_executado", VALUE_EXECUTED),
    ("data_da_atualizacao", UPDATE_DATE),
    ("data_atualizacao", UPDATE_DATE),
    ("responsavel", RESPONSIBLE),
    ("cargo", RESPONSIBLE_ROLE),
    ("setor", DEPARTMENT),
    ("riscos_relacionados_tipo", RISK_KINDS),
    ("riscos_tipo", RISK_KINDS),
    ("riscos_relacionados_descricao", RISK_DESCRIPTIONS),
    ("riscos_descricao", RISK_DESCRIPTIONS),
];

// Sheet-name aliases per role, in priority order (cleaned form).
const REGISTRATION_SHEETS: &[&str] = &[
    "tabela_00_cadastro",
    "tabela_0_cadastro",
    "planilha_00",
    "cadastro",
    "registrations",
    "00",
    "0",
];
const SERVICE_SHEETS: &[&str] = &[
    "tabela_01_servicos",
    "planilha_01",
    "servicos",
    "services",
    "01",
    "1",
];
const UPDATE_SHEETS: &[&str] = &[
    "tabela_02_acompanhamento",
    "planilha_02",
    "acompanhamento",
    "updates",
    "02",
    "2",
];

pub fn canonical_columns(kind: SheetKind) -> &'static [&'static str] {
    match kind {
        SheetKind::Registration => REGISTRATION_COLUMNS,
        SheetKind::Service => SERVICE_COLUMNS,
        SheetKind::Update => UPDATE_COLUMNS,
    }
}

fn aliases(kind: SheetKind) -> &'static [(&'static str, &'static str)] {
    match kind {
        SheetKind::Registration => REGISTRATION_ALIASES,
        SheetKind::Service => SERVICE_ALIASES,
        SheetKind::Update => UPDATE_ALIASES,
    }
}

/// Sheet-name aliases for a role, in priority order.
pub fn sheet_aliases(kind: SheetKind) -> &'static [&'static str] {
    match kind {
        SheetKind::Registration => REGISTRATION_SHEETS,
        SheetKind::Service => SERVICE_SHEETS,
        SheetKind::Update => UPDATE_SHEETS,
    }
}

/// Folds a raw header to a comparable form: lower-case, diacritics
/// stripped, punctuation and whitespace collapsed to single `_` separators.
pub fn clean_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut separator_pending = false;
    for ch in raw.trim().to_lowercase().chars() {
        let mapped = match ch {
            'á' | 'à' | 'â' | 'ã' | 'ä' => Some('a'),
            'é' | 'è' | 'ê' | 'ë' => Some('e'),
            'í' | 'ì' | 'î' | 'ï' => Some('i'),
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => Some('o'),
            'ú' | 'ù' | 'û' | 'ü' => Some('u'),
            'ç' => Some('c'),
            'º' | 'ª' | '°' => None,
            c if c.is_alphanumeric() => Some(c),
            _ => {
                separator_pending = true;
                None
            }
        };
        if let Some(c) = mapped {
            if separator_pending && !out.is_empty() {
                out.push('_');
            }
            separator_pending = false;
            out.push(c);
        }
    }
    out
}

/// Maps a raw header to its canonical field name for the given sheet role.
/// Unmapped headers pass through in cleaned form so unknown columns never
/// fail an import; canonical names map to themselves (idempotent).
pub fn normalize_header(raw: &str, kind: SheetKind) -> String {
    let cleaned = clean_header(raw);
    if canonical_columns(kind).contains(&cleaned.as_str()) {
        return cleaned;
    }
    for (alias, canonical) in aliases(kind) {
        if *alias == cleaned {
            return canonical.to_string();
        }
    }
    cleaned
}

/// Matches a workbook sheet name to a role; `None` for unrelated sheets.
pub fn match_sheet_role(name: &str) -> Option<SheetKind> {
    let cleaned = clean_header(name);
    for kind in [SheetKind::Registration, SheetKind::Service, SheetKind::Update] {
        if sheet_aliases(kind).contains(&cleaned.as_str()) {
            return Some(kind);
        }
    }
    None
}

/// An empty table carrying the canonical columns of a role.
pub fn empty_table(kind: SheetKind) -> Table {
    Table::new(canonical_columns(kind))
}

/// Projects a raw sheet onto the canonical column set of `kind`: unknown
/// source columns are dropped, missing canonical columns are padded with
/// empty cells. The first source column matching a canonical name wins.
pub fn project(headers: &[String], rows: Vec<Vec<Cell>>, kind: SheetKind) -> Table {
    let canonical = canonical_columns(kind);
    let mut source: Vec<Option<usize>> = vec![None; canonical.len()];
    for (idx, header) in headers.iter().enumerate() {
        let name = normalize_header(header, kind);
        if let Some(pos) = canonical.iter().position(|c| *c == name) {
            if source[pos].is_none() {
                source[pos] = Some(idx);
            }
        }
    }
    let mut table = Table::new(canonical);
    for row in rows {
        let projected = source
            .iter()
            .map(|slot| match slot {
                Some(idx) => row.get(*idx).cloned().unwrap_or(Cell::Empty),
                None => Cell::Empty,
            })
            .collect();
        table.push_row(projected);
    }
    table
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_header_folds_diacritics_and_punctuation() {
        assert_eq!(clean_header("Obj. de Concessão"), "obj_de_concessao");
        assert_eq!(clean_header("Prazo início (anos)"), "prazo_inicio_anos");
        assert_eq!(clean_header("CAPEX (Reaj.)"), "capex_reaj");
        assert_eq!(clean_header("Fonte (% do CAPEX)"), "fonte_do_capex");
        assert_eq!(clean_header("  Zona   portuária "), "zona_portuaria");
    }

    #[test]
    fn test_clean_header_leading_symbol_leaves_no_separator() {
        assert_eq!(
            clean_header("% de CAPEX para o serviço"),
            "de_capex_para_o_servico"
        );
        assert_eq!(clean_header("% executada"), "executada");
    }

    #[test]
    fn test_normalize_header_portuguese_labels() {
        assert_eq!(
            normalize_header("Zona portuária", SheetKind::Registration),
            PORT_ZONE
        );
        assert_eq!(
            normalize_header("% de CAPEX para o serviço", SheetKind::Service),
            CAPEX_SHARE
        );
        assert_eq!(
            normalize_header("Riscos Relacionados (Tipo)", SheetKind::Update),
            RISK_KINDS
        );
        assert_eq!(
            normalize_header("Data de assinatura do contrato", SheetKind::Registration),
            SIGNATURE_DATE
        );
    }

    #[test]
    fn test_normalize_header_is_idempotent_on_canonical_names() {
        for kind in [SheetKind::Registration, SheetKind::Service, SheetKind::Update] {
            for name in canonical_columns(kind) {
                assert_eq!(normalize_header(name, kind), *name, "column {name}");
            }
        }
    }

    #[test]
    fn test_normalize_header_unmapped_passes_through_cleaned() {
        assert_eq!(
            normalize_header("Observações internas!", SheetKind::Registration),
            "observacoes_internas"
        );
    }

    #[test]
    fn test_description_maps_per_sheet() {
        assert_eq!(
            normalize_header("Descrição", SheetKind::Registration),
            DESCRIPTION
        );
        assert_eq!(
            normalize_header("Descrição", SheetKind::Service),
            SERVICE_DESCRIPTION
        );
        assert_eq!(normalize_header("Descrição", SheetKind::Update), DESCRIPTION);
    }

    #[test]
    fn test_match_sheet_role() {
        assert_eq!(
            match_sheet_role("Tabela 00 - Cadastro"),
            Some(SheetKind::Registration)
        );
        assert_eq!(
            match_sheet_role("Tabela 01 - Serviços"),
            Some(SheetKind::Service)
        );
        assert_eq!(
            match_sheet_role("Tabela 02: Acompanhamento"),
            Some(SheetKind::Update)
        );
        assert_eq!(match_sheet_role("Resumo"), None);
    }

    #[test]
    fn test_project_drops_unknown_and_pads_missing() {
        let headers = vec![
            "Zona portuária".to_string(),
            "Coluna desconhecida".to_string(),
            "UF".to_string(),
        ];
        let rows = vec![vec![
            Cell::Text("Porto X".to_string()),
            Cell::Text("ignored".to_string()),
            Cell::Text("SP".to_string()),
        ]];
        let table = project(&headers, rows, SheetKind::Registration);
        assert_eq!(table.columns().len(), REGISTRATION_COLUMNS.len());
        assert_eq!(
            table.cell(0, PORT_ZONE).to_text().as_deref(),
            Some("Porto X")
        );
        assert_eq!(table.cell(0, STATE_CODE).to_text().as_deref(), Some("SP"));
        assert!(table.cell(0, TOTAL_CAPEX).is_blank());
    }

    #[test]
    fn test_project_first_matching_column_wins() {
        let headers = vec!["UF".to_string(), "Estado".to_string()];
        let rows = vec![vec![
            Cell::Text("SP".to_string()),
            Cell::Text("RJ".to_string()),
        ]];
        let table = project(&headers, rows, SheetKind::Registration);
        assert_eq!(table.cell(0, STATE_CODE).to_text().as_deref(), Some("SP"));
    }
}
