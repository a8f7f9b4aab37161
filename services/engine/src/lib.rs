//! Reconciliation and derivation engine for port-concession datasets.
//!
//! Ingests the three-sheet tabular dataset (registrations, services,
//! execution updates), normalizes headers and scalars, validates structural
//! and business rules, derives service dates and budgets, and synchronizes
//! the result against a Postgres store - either as a fail-closed full
//! replace or as an idempotent additive import.
//!
//! Pipeline, per processing unit:
//! Pending -> Normalized -> Validated -> {Derived -> Written | Rejected |
//! Skipped}. All matching across the three levels goes through natural
//! (business) keys; no surrogate id crosses the import boundary.

pub mod columns;
pub mod derive;
pub mod model;
pub mod resolve;
pub mod scalar;
pub mod store;
pub mod sync;
pub mod validate;
pub mod workbook;
