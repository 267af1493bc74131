//! Shared test utilities.
//!
//! This module provides common helper functions for setting up test databases
//! and creating test entities with sensible defaults.

#![allow(clippy::unwrap_used)]

use crate::{
    core::{
        envelope::{self, NewEnvelope},
        renewal::RenewalCalculator,
        transaction::{self, NewTransaction},
    },
    entities::{self, EnvelopeKind, TransactionType},
    errors::Result,
};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Calendar date shorthand.
pub fn day(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// Noon on the given date.
pub fn at(year: i32, month: u32, d: u32) -> NaiveDateTime {
    day(year, month, d).and_hms_opt(12, 0, 0).unwrap()
}

/// Creates a test envelope with sensible defaults.
///
/// # Defaults
/// * `budget`: 500
/// * `goal`: 0
/// * `kind`: normal
/// * renewal day 1
pub async fn create_test_envelope(
    db: &DatabaseConnection,
    name: &str,
    created: NaiveDateTime,
) -> Result<entities::envelope::Model> {
    create_custom_envelope(db, name, Decimal::from(500), EnvelopeKind::Normal, created).await
}

/// Creates a test envelope with custom parameters.
/// Use this when you need to test specific envelope configurations.
pub async fn create_custom_envelope(
    db: &DatabaseConnection,
    name: &str,
    budget: Decimal,
    kind: EnvelopeKind,
    created: NaiveDateTime,
) -> Result<entities::envelope::Model> {
    envelope::create_envelope(
        db,
        &RenewalCalculator::default(),
        NewEnvelope {
            name: name.to_string(),
            budget,
            goal: Decimal::ZERO,
            kind,
        },
        created,
    )
    .await
}

/// Creates a non-recurring transaction with an empty note.
pub async fn create_test_transaction(
    db: &DatabaseConnection,
    envelope_id: i64,
    amount: i64,
    transaction_type: TransactionType,
    date: NaiveDate,
) -> Result<entities::transaction::Model> {
    create_custom_transaction(
        db,
        NewTransaction {
            amount,
            date,
            transaction_type,
            envelope_id: Some(envelope_id),
            note: String::new(),
            is_recurring: false,
        },
    )
    .await
}

/// Creates a transaction from a fully specified input.
pub async fn create_custom_transaction(
    db: &DatabaseConnection,
    new: NewTransaction,
) -> Result<entities::transaction::Model> {
    transaction::create_transaction(db, new).await
}

/// Builds an envelope model without touching the database.
pub fn sample_envelope(
    id: i64,
    name: &str,
    kind: EnvelopeKind,
    origin_id: Option<i64>,
) -> entities::envelope::Model {
    entities::envelope::Model {
        id,
        name: name.to_string(),
        budget: Decimal::from(100),
        income: Decimal::ZERO,
        spent: Decimal::ZERO,
        goal: Decimal::ZERO,
        created_at: at(2024, 2, 1),
        kind: kind.as_str().to_string(),
        origin_id,
        sort_order: 0,
        expiration_date: None,
    }
}
