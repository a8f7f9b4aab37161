//! Postgres storage: schema bootstrap, natural-key lookups, inserts and the
//! transaction boundary shared by replace-mode sync.
//!
//! The store handle is threaded explicitly through every operation - there
//! is no process-wide default location. Writers are executor-generic so the
//! same statements run against the pool (additive mode, per-row commit) or
//! inside one transaction (replace mode).

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgExecutor, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::model::{
    Cell, Dataset, RegistrationKey, RegistrationRecord, RiskEntry, ServiceKey, ServiceRecord,
    UpdateRecord,
};

/// Table-creation statements, parent-first. `IF NOT EXISTS` keeps bootstrap
/// idempotent across runs.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS registrations (
        id UUID PRIMARY KEY,
        port_zone TEXT NOT NULL,
        state_code TEXT NOT NULL,
        concession_object TEXT NOT NULL,
        contract_kind TEXT NOT NULL CHECK (contract_kind IN ('Concessão', 'Arrendamento', 'Autorização')),
        total_capex NUMERIC,
        signature_date DATE,
        description TEXT,
        easting NUMERIC,
        northing NUMERIC,
        utm_zone INTEGER,
        UNIQUE (port_zone, state_code, concession_object)
    )",
    "CREATE TABLE IF NOT EXISTS services (
        id UUID PRIMARY KEY,
        registration_id UUID NOT NULL REFERENCES registrations(id) ON DELETE CASCADE,
        service_type TEXT NOT NULL,
        phase TEXT NOT NULL,
        service_name TEXT NOT NULL,
        service_description TEXT,
        start_offset_years INTEGER,
        start_date DATE,
        end_offset_years INTEGER,
        end_date DATE,
        schedule_source TEXT,
        capex_share DOUBLE PRECISION,
        service_budget NUMERIC,
        share_source TEXT,
        UNIQUE (registration_id, service_type, phase, service_name, service_description)
    )",
    "CREATE TABLE IF NOT EXISTS execution_updates (
        id UUID PRIMARY KEY,
        service_id UUID NOT NULL REFERENCES services(id) ON DELETE CASCADE,
        description TEXT,
        percent_executed DOUBLE PRECISION,
        adjusted_budget NUMERIC,
        value_executed NUMERIC,
        update_date DATE,
        responsible TEXT,
        responsible_role TEXT,
        department TEXT
    )",
    "CREATE TABLE IF NOT EXISTS update_risks (
        id UUID PRIMARY KEY,
        update_id UUID NOT NULL REFERENCES execution_updates(id) ON DELETE CASCADE,
        kind TEXT NOT NULL,
        description TEXT
    )",
];

/// A registration as stored: its surrogate id plus the record (derivation
/// needs the signature date and total capex of the parent).
#[derive(Debug, Clone)]
pub struct StoredRegistration {
    pub id: Uuid,
    pub record: RegistrationRecord,
}

/// Explicit store handle over a connection pool.
#[derive(Debug, Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Store {
        Store { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the four tables when missing.
    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("failed to create schema")?;
        }
        Ok(())
    }

    /// Transaction boundary used by replace-mode sync.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .context("failed to begin transaction")
    }

    // -------------------------------------------------------------------------
    // Natural-key lookups
    // -------------------------------------------------------------------------

    pub async fn find_registration(
        &self,
        key: &RegistrationKey,
    ) -> Result<Option<StoredRegistration>> {
        type Row = (
            Uuid,
            String,
            Option<Decimal>,
            Option<NaiveDate>,
            Option<String>,
            Option<Decimal>,
            Option<Decimal>,
            Option<i32>,
        );
        let row: Option<Row> = sqlx::query_as(
            "SELECT id, contract_kind, total_capex, signature_date, description, easting, northing, utm_zone \
             FROM registrations WHERE port_zone = $1 AND state_code = $2 AND concession_object = $3",
        )
        .bind(&key.port_zone)
        .bind(&key.state_code)
        .bind(&key.concession_object)
        .fetch_optional(&self.pool)
        .await
        .context("failed to query registration by key")?;
        Ok(row.map(
            |(id, contract_kind, total_capex, signature_date, description, easting, northing, utm_zone)| {
                StoredRegistration {
                    id,
                    record: RegistrationRecord {
                        key: key.clone(),
                        contract_kind,
                        total_capex,
                        signature_date,
                        description,
                        easting,
                        northing,
                        utm_zone,
                    },
                }
            },
        ))
    }

    pub async fn find_service(
        &self,
        registration_id: Uuid,
        key: &ServiceKey,
    ) -> Result<Option<Uuid>> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM services \
             WHERE registration_id = $1 AND service_type = $2 AND phase = $3 \
             AND service_name = $4 AND COALESCE(service_description, '') = $5",
        )
        .bind(registration_id)
        .bind(&key.service_type)
        .bind(&key.phase)
        .bind(&key.service_name)
        .bind(&key.description)
        .fetch_optional(&self.pool)
        .await
        .context("failed to query service by key")?;
        Ok(row.map(|(id,)| id))
    }

    /// All services matching a short ref (description excluded). More than
    /// one id means the ref is ambiguous.
    pub async fn find_services_by_ref(
        &self,
        registration_id: Uuid,
        service_type: &str,
        phase: &str,
        service_name: &str,
    ) -> Result<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM services \
             WHERE registration_id = $1 AND service_type = $2 AND phase = $3 AND service_name = $4 \
             ORDER BY id",
        )
        .bind(registration_id)
        .bind(service_type)
        .bind(phase)
        .bind(service_name)
        .fetch_all(&self.pool)
        .await
        .context("failed to query services by ref")?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// The implicit natural key of an execution update is its service plus
    /// the update date; NULL dates match NULL.
    pub async fn find_update(
        &self,
        service_id: Uuid,
        update_date: Option<NaiveDate>,
    ) -> Result<Option<Uuid>> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM execution_updates \
             WHERE service_id = $1 AND update_date IS NOT DISTINCT FROM $2 \
             ORDER BY id LIMIT 1",
        )
        .bind(service_id)
        .bind(update_date)
        .fetch_optional(&self.pool)
        .await
        .context("failed to query execution update by key")?;
        Ok(row.map(|(id,)| id))
    }

    // -------------------------------------------------------------------------
    // Writers (executor-generic: pool or open transaction)
    // -------------------------------------------------------------------------

    pub async fn insert_registration(
        exec: impl PgExecutor<'_>,
        id: Uuid,
        record: &RegistrationRecord,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO registrations \
             (id, port_zone, state_code, concession_object, contract_kind, total_capex, \
              signature_date, description, easting, northing, utm_zone) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(id)
        .bind(&record.key.port_zone)
        .bind(&record.key.state_code)
        .bind(&record.key.concession_object)
        .bind(&record.contract_kind)
        .bind(record.total_capex)
        .bind(record.signature_date)
        .bind(record.description.as_deref())
        .bind(record.easting)
        .bind(record.northing)
        .bind(record.utm_zone)
        .execute(exec)
        .await
        .context("failed to insert registration")?;
        Ok(())
    }

    /// Update-in-place for the additive `Update` duplicate policy: refreshes
    /// every non-key field from the newer sheet.
    pub async fn update_registration(
        exec: impl PgExecutor<'_>,
        id: Uuid,
        record: &RegistrationRecord,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE registrations SET contract_kind = $2, total_capex = $3, signature_date = $4, \
             description = $5, easting = $6, northing = $7, utm_zone = $8 WHERE id = $1",
        )
        .bind(id)
        .bind(&record.contract_kind)
        .bind(record.total_capex)
        .bind(record.signature_date)
        .bind(record.description.as_deref())
        .bind(record.easting)
        .bind(record.northing)
        .bind(record.utm_zone)
        .execute(exec)
        .await
        .context("failed to update registration")?;
        Ok(())
    }

    pub async fn insert_service(
        exec: impl PgExecutor<'_>,
        id: Uuid,
        registration_id: Uuid,
        record: &ServiceRecord,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO services \
             (id, registration_id, service_type, phase, service_name, service_description, \
              start_offset_years, start_date, end_offset_years, end_date, schedule_source, \
              capex_share, service_budget, share_source) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(id)
        .bind(registration_id)
        .bind(&record.key.service_type)
        .bind(&record.key.phase)
        .bind(&record.key.service_name)
        .bind((!record.key.description.is_empty()).then_some(record.key.description.as_str()))
        .bind(record.start_offset_years)
        .bind(record.start_date)
        .bind(record.end_offset_years)
        .bind(record.end_date)
        .bind(record.schedule_source.as_deref())
        .bind(record.capex_share)
        .bind(record.service_budget)
        .bind(record.share_source.as_deref())
        .execute(exec)
        .await
        .context("failed to insert service")?;
        Ok(())
    }

    pub async fn update_service(
        exec: impl PgExecutor<'_>,
        id: Uuid,
        record: &ServiceRecord,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE services SET start_offset_years = $2, start_date = $3, end_offset_years = $4, \
             end_date = $5, schedule_source = $6, capex_share = $7, service_budget = $8, \
             share_source = $9 WHERE id = $1",
        )
        .bind(id)
        .bind(record.start_offset_years)
        .bind(record.start_date)
        .bind(record.end_offset_years)
        .bind(record.end_date)
        .bind(record.schedule_source.as_deref())
        .bind(record.capex_share)
        .bind(record.service_budget)
        .bind(record.share_source.as_deref())
        .execute(exec)
        .await
        .context("failed to update service")?;
        Ok(())
    }

    pub async fn insert_update(
        exec: impl PgExecutor<'_>,
        id: Uuid,
        service_id: Uuid,
        record: &UpdateRecord,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO execution_updates \
             (id, service_id, description, percent_executed, adjusted_budget, value_executed, \
              update_date, responsible, responsible_role, department) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(id)
        .bind(service_id)
        .bind(record.description.as_deref())
        .bind(record.percent_executed)
        .bind(record.adjusted_budget)
        .bind(record.value_executed)
        .bind(record.update_date)
        .bind(record.responsible.as_deref())
        .bind(record.responsible_role.as_deref())
        .bind(record.department.as_deref())
        .execute(exec)
        .await
        .context("failed to insert execution update")?;
        Ok(())
    }

    pub async fn insert_update_risk(
        exec: impl PgExecutor<'_>,
        update_id: Uuid,
        risk: &RiskEntry,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO update_risks (id, update_id, kind, description) VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(update_id)
        .bind(&risk.kind)
        .bind(risk.description.as_deref())
        .execute(exec)
        .await
        .context("failed to insert update risk")?;
        Ok(())
    }

    /// Clears the whole hierarchy, child-first. Only meaningful inside the
    /// replace-mode transaction.
    pub async fn delete_all(conn: &mut PgConnection) -> Result<()> {
        for table in ["update_risks", "execution_updates", "services", "registrations"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *conn)
                .await
                .with_context(|| format!("failed to clear table {table}"))?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Bulk iteration (export / reconciliation reads)
    // -------------------------------------------------------------------------

    /// Reads the whole store back as the three canonical tables, in stable
    /// natural-key order.
    pub async fn load_dataset(&self) -> Result<Dataset> {
        let mut dataset = Dataset::empty();

        type RegRow = (
            String,
            String,
            String,
            String,
            Option<Decimal>,
            Option<NaiveDate>,
            Option<String>,
            Option<Decimal>,
            Option<Decimal>,
            Option<i32>,
        );
        let rows: Vec<RegRow> = sqlx::query_as(
            "SELECT port_zone, state_code, concession_object, contract_kind, total_capex, \
             signature_date, description, easting, northing, utm_zone \
             FROM registrations ORDER BY port_zone, state_code, concession_object",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to read registrations")?;
        for (zone, state, object, kind, capex, signed, description, easting, northing, utm) in rows
        {
            dataset.registrations.push_row(vec![
                Cell::Text(zone),
                Cell::Text(state),
                Cell::Text(object),
                Cell::Text(kind),
                Cell::from_opt_decimal(capex),
                Cell::from_opt_date(signed),
                Cell::from_opt_text(description),
                Cell::from_opt_decimal(easting),
                Cell::from_opt_decimal(northing),
                Cell::from_opt_int(utm),
            ]);
        }

        type SvcRow = (
            String,
            String,
            String,
            String,
            String,
            String,
            Option<String>,
            Option<i32>,
            Option<NaiveDate>,
            Option<i32>,
            Option<NaiveDate>,
            Option<String>,
            Option<f64>,
            Option<Decimal>,
            Option<String>,
        );
        let rows: Vec<SvcRow> = sqlx::query_as(
            "SELECT r.port_zone, r.state_code, r.concession_object, s.service_type, s.phase, \
             s.service_name, s.service_description, s.start_offset_years, s.start_date, \
             s.end_offset_years, s.end_date, s.schedule_source, s.capex_share, s.service_budget, \
             s.share_source \
             FROM services s JOIN registrations r ON s.registration_id = r.id \
             ORDER BY r.port_zone, r.state_code, r.concession_object, s.service_type, s.phase, \
             s.service_name",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to read services")?;
        for (
            zone,
            state,
            object,
            service_type,
            phase,
            name,
            description,
            start_offset,
            start_date,
            end_offset,
            end_date,
            schedule_source,
            share,
            budget,
            share_source,
        ) in rows
        {
            dataset.services.push_row(vec![
                Cell::Text(zone),
                Cell::Text(state),
                Cell::Text(object),
                Cell::Text(service_type),
                Cell::Text(phase),
                Cell::Text(name),
                Cell::from_opt_text(description),
                Cell::from_opt_int(start_offset),
                Cell::from_opt_date(start_date),
                Cell::from_opt_int(end_offset),
                Cell::from_opt_date(end_date),
                Cell::from_opt_text(schedule_source),
                Cell::from_opt_number(share),
                Cell::from_opt_decimal(budget),
                Cell::from_opt_text(share_source),
            ]);
        }

        type UpdRow = (
            String,
            String,
            String,
            String,
            String,
            String,
            Option<String>,
            Option<f64>,
            Option<Decimal>,
            Option<Decimal>,
            Option<NaiveDate>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
        );
        let rows: Vec<UpdRow> = sqlx::query_as(
            "SELECT r.port_zone, r.state_code, r.concession_object, s.service_type, s.phase, \
             s.service_name, u.description, u.percent_executed, u.adjusted_budget, \
             u.value_executed, u.update_date, u.responsible, u.responsible_role, u.department, \
             (SELECT string_agg(k.kind, '; ' ORDER BY k.kind) FROM update_risks k WHERE k.update_id = u.id), \
             (SELECT string_agg(COALESCE(k.description, ''), '; ' ORDER BY k.kind) FROM update_risks k WHERE k.update_id = u.id) \
             FROM execution_updates u \
             JOIN services s ON u.service_id = s.id \
             JOIN registrations r ON s.registration_id = r.id \
             ORDER BY r.port_zone, r.state_code, r.concession_object, s.service_type, s.phase, \
             s.service_name, u.update_date NULLS LAST",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to read execution updates")?;
        for (
            zone,
            state,
            object,
            service_type,
            phase,
            name,
            description,
            percent,
            adjusted,
            value,
            date,
            responsible,
            role,
            department,
            risk_kinds,
            risk_descriptions,
        ) in rows
        {
            dataset.updates.push_row(vec![
                Cell::Text(zone),
                Cell::Text(state),
                Cell::Text(object),
                Cell::Text(service_type),
                Cell::Text(phase),
                Cell::Text(name),
                Cell::from_opt_text(description),
                Cell::from_opt_number(percent),
                Cell::from_opt_decimal(adjusted),
                Cell::from_opt_decimal(value),
                Cell::from_opt_date(date),
                Cell::from_opt_text(responsible),
                Cell::from_opt_text(role),
                Cell::from_opt_text(department),
                Cell::from_opt_text(risk_kinds),
                Cell::from_opt_text(risk_descriptions),
            ]);
        }

        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_creates_all_four_tables() {
        assert_eq!(SCHEMA.len(), 4);
        for (statement, table) in SCHEMA.iter().zip([
            "registrations",
            "services",
            "execution_updates",
            "update_risks",
        ]) {
            assert!(statement.contains(table));
            assert!(statement.contains("IF NOT EXISTS"));
        }
    }

    #[test]
    fn test_schema_cascades_and_natural_keys() {
        assert!(SCHEMA[1].contains("ON DELETE CASCADE"));
        assert!(SCHEMA[2].contains("ON DELETE CASCADE"));
        assert!(SCHEMA[3].contains("ON DELETE CASCADE"));
        assert!(SCHEMA[0].contains("UNIQUE (port_zone, state_code, concession_object)"));
    }
}
