//! Sync Service - Replace-mode synchronization of the store from a workbook
//!
//! Responsibilities:
//! - Validate the full three-sheet dataset (fail closed)
//! - Derive service dates and budgets, resolve all natural-key linkage
//! - Clear and rewrite the store inside a single transaction
//! - Report the complete violation list when the dataset is rejected
//!
//! A rejected dataset leaves the store byte-for-byte unchanged; the exit
//! code tells the calling layer which way it went.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use engine::store::Store;
use engine::sync::{build_replace_plan, replace_sync, SyncOptions, SyncOutcome};
use engine::validate::{Severity, Violation};
use engine::workbook::read_workbook;
use sqlx::postgres::PgPoolOptions;

#[derive(Parser, Debug)]
#[command(name = "sync", about = "Replaces the store contents from a workbook")]
struct Args {
    /// Path to the workbook (.xlsx/.xls)
    #[arg(long)]
    file: PathBuf,

    /// Treat "value executed exceeds adjusted budget" as a hard error
    #[arg(long, default_value = "false")]
    strict_overrun: bool,

    /// Validate and plan without writing to the store
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Print violations as JSON
    #[arg(long, default_value = "false")]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    println!("=== Concession Sync ===");
    println!("File: {}", args.file.display());
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "replace" });

    let dataset = read_workbook(&args.file)?;
    println!(
        "Rows: {} registrations, {} services, {} updates",
        dataset.registrations.len(),
        dataset.services.len(),
        dataset.updates.len()
    );

    let options = SyncOptions {
        strict_overrun: args.strict_overrun,
    };

    if args.dry_run {
        return match build_replace_plan(&dataset, &options) {
            Ok(plan) => {
                println!(
                    "\nPlan: {} registrations, {} services, {} updates",
                    plan.registrations.len(),
                    plan.services.len(),
                    plan.updates.len()
                );
                print_violations(&plan.warnings, args.json)?;
                println!("Dry run - nothing written to the store");
                Ok(ExitCode::SUCCESS)
            }
            Err(violations) => {
                println!("\nDataset rejected:");
                print_violations(&violations, args.json)?;
                Ok(ExitCode::FAILURE)
            }
        };
    }

    let db_url = std::env::var("DB_URL").context("DB_URL env var missing")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await
        .context("Failed to connect to database")?;
    let store = Store::new(pool);
    store.init_schema().await?;

    match replace_sync(&store, &dataset, &options).await? {
        SyncOutcome::Applied(report) => {
            println!("\n=== Sync Complete ===");
            println!(
                "Written: {} registrations, {} services, {} updates",
                report.registrations, report.services, report.updates
            );
            Ok(ExitCode::SUCCESS)
        }
        SyncOutcome::Rejected(violations) => {
            println!("\nDataset rejected - store left untouched:");
            print_violations(&violations, args.json)?;
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_violations(violations: &[Violation], json: bool) -> Result<()> {
    if violations.is_empty() {
        return Ok(());
    }
    if json {
        println!("{}", serde_json::to_string_pretty(violations)?);
        return Ok(());
    }
    let errors = violations
        .iter()
        .filter(|v| v.severity == Severity::Error)
        .count();
    println!(
        "{} violation(s), {} blocking:",
        violations.len(),
        errors
    );
    for violation in violations {
        let marker = match violation.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "warn ",
        };
        println!("  [{marker}] {violation}");
    }
    Ok(())
}
