//! Importer Service - Additive spreadsheet-to-store ingestion
//!
//! Responsibilities:
//! - Load a concession workbook (or single-sheet CSV) and project it onto
//!   the canonical column sets
//! - Insert rows whose natural key is not already present in the store
//! - Skip or update existing rows according to the duplicate policy
//! - Log and count per-row failures without stopping the batch
//!
//! Re-importing the same file is idempotent: every row reports as already
//! existing and nothing is written.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use engine::columns::SheetKind;
use engine::store::Store;
use engine::sync::{additive_etl, DuplicatePolicy, EtlOptions, SheetCounts};
use engine::workbook::read_dataset;
use sqlx::postgres::PgPoolOptions;

#[derive(Parser, Debug)]
#[command(name = "importer", about = "Imports concession spreadsheets into the store")]
struct Args {
    /// Path to the workbook (.xlsx/.xls) or single-sheet CSV
    #[arg(long)]
    file: PathBuf,

    /// Treat the file as a single-sheet CSV carrying this sheet role
    #[arg(long, value_enum)]
    csv_role: Option<CsvRole>,

    /// Update fields of existing rows instead of skipping them
    #[arg(long, default_value = "false")]
    update_existing: bool,

    /// Reject updates whose value executed exceeds the adjusted budget
    #[arg(long, default_value = "false")]
    strict_overrun: bool,

    /// Dry run - parse and report without writing to the store
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Print the result summary as JSON
    #[arg(long, default_value = "false")]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CsvRole {
    Registration,
    Service,
    Update,
}

impl From<CsvRole> for SheetKind {
    fn from(role: CsvRole) -> SheetKind {
        match role {
            CsvRole::Registration => SheetKind::Registration,
            CsvRole::Service => SheetKind::Service,
            CsvRole::Update => SheetKind::Update,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    println!("=== Concession Importer ===");
    println!("File: {}", args.file.display());
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });

    let dataset = read_dataset(&args.file, args.csv_role.map(Into::into))?;
    println!(
        "Rows: {} registrations, {} services, {} updates",
        dataset.registrations.len(),
        dataset.services.len(),
        dataset.updates.len()
    );

    if args.dry_run {
        println!("\nDry run - nothing written to the store");
        return Ok(());
    }

    let db_url = std::env::var("DB_URL").context("DB_URL env var missing")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await
        .context("Failed to connect to database")?;
    let store = Store::new(pool);
    store.init_schema().await?;

    let options = EtlOptions {
        duplicate_policy: if args.update_existing {
            DuplicatePolicy::Update
        } else {
            DuplicatePolicy::Skip
        },
        strict_overrun: args.strict_overrun,
    };

    let report = additive_etl(&store, &dataset, &options).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("\n=== Import Complete ===");
    for (sheet, counts) in [
        ("registrations", report.registrations),
        ("services", report.services),
        ("updates", report.updates),
    ] {
        print_counts(sheet, counts);
    }
    print_counts("total", report.totals());
    Ok(())
}

fn print_counts(sheet: &str, counts: SheetCounts) {
    println!(
        "  {sheet}: {} processed, {} already existing, {} errors",
        counts.processed, counts.skipped, counts.errors
    );
}
