//! Reconciliation against the persistent store.
//!
//! Two strategies:
//! - full replace: validate the whole dataset (fail closed), build a pure
//!   plan with all linkage resolved, then clear and rewrite the store inside
//!   a single transaction;
//! - additive ETL: sheet-by-sheet, row-by-row get-or-create with per-row
//!   commit boundaries; every per-row failure is logged and counted, the
//!   batch always completes.

use std::collections::HashSet;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::columns::SheetKind;
use crate::derive::derive_service;
use crate::model::{
    Dataset, RegistrationKey, RegistrationRecord, ServiceKey, ServiceRecord, Table, UpdateRecord,
};
use crate::resolve::{KeyIndex, RefMatch};
use crate::store::Store;
use crate::validate::{self, Severity, ValidateOptions, Violation};

/// Replace-mode knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Treat "value executed exceeds adjusted budget" as a hard error.
    pub strict_overrun: bool,
}

/// What additive mode does with a row whose natural key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Leave the existing row untouched; re-import is a no-op (default).
    #[default]
    Skip,
    /// Refresh the existing row's fields from the newer sheet.
    Update,
}

/// Additive-mode knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct EtlOptions {
    pub duplicate_policy: DuplicatePolicy,
    pub strict_overrun: bool,
}

/// Everything a replace-mode sync will write, resolved and derived up
/// front. Building the plan touches no storage.
#[derive(Debug, Default)]
pub struct ReplacePlan {
    pub registrations: Vec<(Uuid, RegistrationRecord)>,
    /// (service id, parent registration id, record)
    pub services: Vec<(Uuid, Uuid, ServiceRecord)>,
    /// (parent service id, record)
    pub updates: Vec<(Uuid, UpdateRecord)>,
    /// Warnings carried through from validation plus skip notices.
    pub warnings: Vec<Violation>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReplaceReport {
    pub registrations: usize,
    pub services: usize,
    pub updates: usize,
}

/// Result of a replace-mode attempt.
#[derive(Debug)]
pub enum SyncOutcome {
    /// The store was cleared and rewritten.
    Applied(ReplaceReport),
    /// Validation reported errors; the store was left untouched.
    Rejected(Vec<Violation>),
}

/// Per-sheet counters of the additive result summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SheetCounts {
    /// Rows inserted (or refreshed under the `Update` policy).
    pub processed: usize,
    /// Rows whose natural key already existed.
    pub skipped: usize,
    /// Rows rejected by a rule, an unresolved reference or a storage error.
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EtlReport {
    pub registrations: SheetCounts,
    pub services: SheetCounts,
    pub updates: SheetCounts,
}

impl EtlReport {
    pub fn totals(&self) -> SheetCounts {
        SheetCounts {
            processed: self.registrations.processed
                + self.services.processed
                + self.updates.processed,
            skipped: self.registrations.skipped + self.services.skipped + self.updates.skipped,
            errors: self.registrations.errors + self.services.errors + self.updates.errors,
        }
    }
}

fn skip_notice(sheet: SheetKind, row: usize, message: String) -> Violation {
    Violation {
        sheet,
        row: row + 2,
        field: "key".to_string(),
        message,
        severity: Severity::Warning,
    }
}

// =============================================================================
// Replace mode
// =============================================================================

/// Validates the dataset and resolves it into a write plan.
///
/// Fails closed: any Error-severity violation rejects the whole dataset and
/// the full violation list (warnings included) is returned. Registrations
/// skipped for non-positive capex cascade: their services and updates are
/// skipped with warnings rather than attached elsewhere.
pub fn build_replace_plan(
    dataset: &Dataset,
    options: &SyncOptions,
) -> std::result::Result<ReplacePlan, Vec<Violation>> {
    let vopts = ValidateOptions {
        strict_overrun: options.strict_overrun,
    };
    let violations = validate::validate_dataset(dataset, &vopts);
    if violations.iter().any(|v| v.severity == Severity::Error) {
        return Err(violations);
    }

    let mut plan = ReplacePlan {
        warnings: violations,
        ..ReplacePlan::default()
    };
    let mut index = KeyIndex::new();
    let mut skipped_parents: HashSet<RegistrationKey> = HashSet::new();

    let registrations = &dataset.registrations;
    for row in 0..registrations.len() {
        if registrations.row_is_blank(row) {
            continue;
        }
        let Some(record) = RegistrationRecord::from_row(registrations, row) else {
            plan.warnings.push(skip_notice(
                SheetKind::Registration,
                row,
                "missing key fields; row skipped".to_string(),
            ));
            continue;
        };
        if matches!(record.total_capex, Some(capex) if capex <= Decimal::ZERO) {
            // validation already carries the warning
            skipped_parents.insert(record.key.clone());
            continue;
        }
        if let Ok(id) = index.insert_registration(record.key.clone()) {
            plan.registrations.push((id, record));
        }
    }

    let parent_records: std::collections::HashMap<&RegistrationKey, &RegistrationRecord> = plan
        .registrations
        .iter()
        .map(|(_, record)| (&record.key, record))
        .collect();

    let services = &dataset.services;
    let mut planned_services: Vec<(Uuid, Uuid, ServiceRecord)> = Vec::new();
    for row in 0..services.len() {
        if services.row_is_blank(row) {
            continue;
        }
        let Some(key) = ServiceKey::from_row(services, row) else {
            plan.warnings.push(skip_notice(
                SheetKind::Service,
                row,
                "missing key fields; row skipped".to_string(),
            ));
            continue;
        };
        if skipped_parents.contains(&key.registration) {
            plan.warnings.push(skip_notice(
                SheetKind::Service,
                row,
                format!(
                    "parent registration {} was skipped; service skipped",
                    key.registration
                ),
            ));
            continue;
        }
        let Some(registration_id) = index.find_registration(&key.registration) else {
            // parent row lacked key fields; validated refs cannot miss otherwise
            plan.warnings.push(skip_notice(
                SheetKind::Service,
                row,
                format!("registration {} is not planned; service skipped", key.registration),
            ));
            continue;
        };
        let Some(mut record) = ServiceRecord::from_row(services, row) else {
            continue;
        };
        derive_service(&mut record, parent_records.get(&key.registration).copied());
        if let Ok(id) = index.insert_service(key) {
            planned_services.push((id, registration_id, record));
        }
    }

    let updates = &dataset.updates;
    for row in 0..updates.len() {
        if updates.row_is_blank(row) {
            continue;
        }
        let Some(record) = UpdateRecord::from_row(updates, row) else {
            plan.warnings.push(skip_notice(
                SheetKind::Update,
                row,
                "missing key fields; row skipped".to_string(),
            ));
            continue;
        };
        match index.find_service_by_ref(&record.service) {
            RefMatch::Unique(service_id) => plan.updates.push((service_id, record)),
            RefMatch::None => plan.warnings.push(skip_notice(
                SheetKind::Update,
                row,
                format!("service {} was skipped; update skipped", record.service),
            )),
            // ambiguity is an Error at validation time; nothing to attach here
            RefMatch::Ambiguous => continue,
        }
    }

    plan.services = planned_services;
    Ok(plan)
}

/// Runs a full replace-mode sync: rejected datasets leave the store
/// untouched, applied datasets are written atomically.
pub async fn replace_sync(
    store: &Store,
    dataset: &Dataset,
    options: &SyncOptions,
) -> Result<SyncOutcome> {
    match build_replace_plan(dataset, options) {
        Ok(plan) => Ok(SyncOutcome::Applied(
            execute_replace_plan(store, &plan).await?,
        )),
        Err(violations) => Ok(SyncOutcome::Rejected(violations)),
    }
}

/// Clear-and-rewrite inside one transaction. Nothing is observable to other
/// readers until commit; any storage failure rolls the whole operation back.
pub async fn execute_replace_plan(store: &Store, plan: &ReplacePlan) -> Result<ReplaceReport> {
    let mut tx = store.begin().await?;
    Store::delete_all(&mut tx).await?;
    for (id, record) in &plan.registrations {
        Store::insert_registration(&mut *tx, *id, record).await?;
    }
    for (id, registration_id, record) in &plan.services {
        Store::insert_service(&mut *tx, *id, *registration_id, record).await?;
    }
    for (service_id, record) in &plan.updates {
        let update_id = Uuid::new_v4();
        Store::insert_update(&mut *tx, update_id, *service_id, record).await?;
        for risk in &record.risks {
            Store::insert_update_risk(&mut *tx, update_id, risk).await?;
        }
    }
    tx.commit().await.context("failed to commit replace sync")?;
    Ok(ReplaceReport {
        registrations: plan.registrations.len(),
        services: plan.services.len(),
        updates: plan.updates.len(),
    })
}

// =============================================================================
// Additive mode
// =============================================================================

enum RowOutcome {
    Written,
    Skipped,
    Rejected,
}

/// Additive spreadsheet-to-store ingestion. Always completes and reports
/// counts, even if every row failed; re-importing the same dataset is
/// idempotent under the default `Skip` policy.
pub async fn additive_etl(store: &Store, dataset: &Dataset, options: &EtlOptions) -> EtlReport {
    EtlReport {
        registrations: ingest_registrations(store, &dataset.registrations, options).await,
        services: ingest_services(store, &dataset.services, options).await,
        updates: ingest_updates(store, &dataset.updates, options).await,
    }
}

/// Prints Error-severity violations for one row; true when the row is
/// rejected.
fn report_row_errors(violations: &[Violation]) -> bool {
    let mut rejected = false;
    for violation in violations {
        match violation.severity {
            Severity::Error => {
                rejected = true;
                eprintln!("Warning: skipping {violation}");
            }
            Severity::Warning => eprintln!("Warning: {violation}"),
        }
    }
    rejected
}

async fn ingest_registrations(store: &Store, table: &Table, options: &EtlOptions) -> SheetCounts {
    let mut counts = SheetCounts::default();
    for row in 0..table.len() {
        if table.row_is_blank(row) {
            continue;
        }
        let line = row + 2;
        if report_row_errors(&validate::registration_row_violations(table, row)) {
            counts.errors += 1;
            continue;
        }
        let Some(record) = RegistrationRecord::from_row(table, row) else {
            eprintln!("Warning: skipping registration line {line}: missing key fields");
            counts.errors += 1;
            continue;
        };
        if matches!(record.total_capex, Some(capex) if capex <= Decimal::ZERO) {
            // already reported as a warning above; additive mode drops the row
            counts.errors += 1;
            continue;
        }
        let outcome = async {
            if let Some(existing) = store.find_registration(&record.key).await? {
                return match options.duplicate_policy {
                    DuplicatePolicy::Skip => {
                        println!("  line {line}: registration already exists: {}", record.key);
                        Ok::<RowOutcome, anyhow::Error>(RowOutcome::Skipped)
                    }
                    DuplicatePolicy::Update => {
                        Store::update_registration(store.pool(), existing.id, &record).await?;
                        println!("  line {line}: registration updated: {}", record.key);
                        Ok(RowOutcome::Written)
                    }
                };
            }
            Store::insert_registration(store.pool(), Uuid::new_v4(), &record).await?;
            println!("  line {line}: registration created: {}", record.key);
            Ok(RowOutcome::Written)
        }
        .await;
        tally(&mut counts, line, outcome);
    }
    counts
}

async fn ingest_services(store: &Store, table: &Table, options: &EtlOptions) -> SheetCounts {
    let mut counts = SheetCounts::default();
    for row in 0..table.len() {
        if table.row_is_blank(row) {
            continue;
        }
        let line = row + 2;
        if report_row_errors(&validate::service_row_violations(table, row)) {
            counts.errors += 1;
            continue;
        }
        let Some(key) = ServiceKey::from_row(table, row) else {
            eprintln!("Warning: skipping service line {line}: missing key fields");
            counts.errors += 1;
            continue;
        };
        let outcome = async {
            let Some(parent) = store.find_registration(&key.registration).await? else {
                eprintln!(
                    "Warning: line {line}: registration not found for service: {}",
                    key.registration
                );
                return Ok::<RowOutcome, anyhow::Error>(RowOutcome::Rejected);
            };
            let Some(mut record) = ServiceRecord::from_row(table, row) else {
                return Ok(RowOutcome::Rejected);
            };
            derive_service(&mut record, Some(&parent.record));
            if let Some(existing) = store.find_service(parent.id, &key).await? {
                return match options.duplicate_policy {
                    DuplicatePolicy::Skip => {
                        println!("  line {line}: service already exists: {key}");
                        Ok(RowOutcome::Skipped)
                    }
                    DuplicatePolicy::Update => {
                        Store::update_service(store.pool(), existing, &record).await?;
                        println!("  line {line}: service updated: {key}");
                        Ok(RowOutcome::Written)
                    }
                };
            }
            Store::insert_service(store.pool(), Uuid::new_v4(), parent.id, &record).await?;
            println!("  line {line}: service created: {key}");
            Ok(RowOutcome::Written)
        }
        .await;
        tally(&mut counts, line, outcome);
    }
    counts
}

async fn ingest_updates(store: &Store, table: &Table, options: &EtlOptions) -> SheetCounts {
    let vopts = ValidateOptions {
        strict_overrun: options.strict_overrun,
    };
    let mut counts = SheetCounts::default();
    for row in 0..table.len() {
        if table.row_is_blank(row) {
            continue;
        }
        let line = row + 2;
        if report_row_errors(&validate::update_row_violations(table, row, &vopts)) {
            counts.errors += 1;
            continue;
        }
        let Some(record) = UpdateRecord::from_row(table, row) else {
            eprintln!("Warning: skipping update line {line}: missing key fields");
            counts.errors += 1;
            continue;
        };
        let outcome = async {
            let Some(parent) = store.find_registration(&record.service.registration).await? else {
                eprintln!(
                    "Warning: line {line}: registration not found for update: {}",
                    record.service.registration
                );
                return Ok::<RowOutcome, anyhow::Error>(RowOutcome::Rejected);
            };
            let services = store
                .find_services_by_ref(
                    parent.id,
                    &record.service.service_type,
                    &record.service.phase,
                    &record.service.service_name,
                )
                .await?;
            let service_id = match services.as_slice() {
                [] => {
                    eprintln!(
                        "Warning: line {line}: service not found for update: {}",
                        record.service
                    );
                    return Ok(RowOutcome::Rejected);
                }
                [id] => *id,
                _ => {
                    eprintln!(
                        "Warning: line {line}: service reference is ambiguous for update: {}",
                        record.service
                    );
                    return Ok(RowOutcome::Rejected);
                }
            };
            // execution updates are immutable snapshots: a matching
            // (service, date) pair is never rewritten, only skipped
            if store.find_update(service_id, record.update_date).await?.is_some() {
                println!("  line {line}: update already exists: {}", record.service);
                return Ok(RowOutcome::Skipped);
            }
            let update_id = Uuid::new_v4();
            Store::insert_update(store.pool(), update_id, service_id, &record).await?;
            for risk in &record.risks {
                Store::insert_update_risk(store.pool(), update_id, risk).await?;
            }
            println!("  line {line}: update created: {}", record.service);
            Ok(RowOutcome::Written)
        }
        .await;
        tally(&mut counts, line, outcome);
    }
    counts
}

fn tally(counts: &mut SheetCounts, line: usize, outcome: Result<RowOutcome>) {
    match outcome {
        Ok(RowOutcome::Written) => counts.processed += 1,
        Ok(RowOutcome::Skipped) => counts.skipped += 1,
        Ok(RowOutcome::Rejected) => counts.errors += 1,
        Err(error) => {
            eprintln!("Warning: line {line} failed: {error:#}");
            counts.errors += 1;
        }
    }
}

// =============================================================================
// TESTS (pure planning half; storage execution follows the same records)
// =============================================================================
