//! Transaction business logic - Handles all transaction-related operations.
//!
//! Every write keeps the owning envelope's `spent`/`income` consistent: creating a
//! transaction posts it, deleting one reverses its posting, and editing one reverses the
//! old posting before applying the new one. Each of these runs inside a single database
//! transaction so a failure leaves neither the row nor the envelope half-updated.

use crate::{
    core::{
        envelope::apply_posting,
        renewal::{CycleKey, RenewalCalculator},
    },
    entities::{Envelope, Transaction, TransactionType, transaction},
    errors::{Error, Result},
};
use chrono::NaiveDate;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use tracing::{info, instrument};

/// Input for a new transaction, also used as the replacement state when editing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    /// Positive whole amount
    pub amount: i64,
    /// Date the transaction applies to
    pub date: NaiveDate,
    /// Income or expense
    pub transaction_type: TransactionType,
    /// Envelope to post to, if any
    pub envelope_id: Option<i64>,
    /// Free-form note
    pub note: String,
    /// Copy into the next month
    pub is_recurring: bool,
}

fn validate_amount(amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(Error::InvalidAmount { amount });
    }
    Ok(())
}

async fn ensure_envelope_exists<C>(db: &C, envelope_id: Option<i64>) -> Result<()>
where
    C: ConnectionTrait,
{
    if let Some(envelope_id) = envelope_id {
        Envelope::find_by_id(envelope_id)
            .one(db)
            .await?
            .ok_or_else(|| Error::EnvelopeNotFound {
                name: envelope_id.to_string(),
            })?;
    }
    Ok(())
}

async fn post<C>(db: &C, record: &transaction::Model, sign: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    if let Some(envelope_id) = record.envelope_id {
        apply_posting(db, envelope_id, record.kind()?, sign * record.amount).await?;
    }
    Ok(())
}

/// Inserts a transaction and posts it to its envelope on an existing connection or
/// database transaction. Shared by user-created and materialized transactions.
pub(crate) async fn insert_and_post<C>(
    db: &C,
    new: &NewTransaction,
    origin_id: Option<i64>,
) -> Result<transaction::Model>
where
    C: ConnectionTrait,
{
    validate_amount(new.amount)?;
    ensure_envelope_exists(db, new.envelope_id).await?;

    let record = transaction::ActiveModel {
        amount: Set(new.amount),
        date: Set(new.date),
        transaction_type: Set(new.transaction_type.as_str().to_string()),
        envelope_id: Set(new.envelope_id),
        note: Set(new.note.clone()),
        is_recurring: Set(new.is_recurring),
        origin_id: Set(origin_id),
        ..Default::default()
    }
    .insert(db)
    .await?;

    post(db, &record, 1).await?;
    Ok(record)
}

/// Creates a transaction and posts it to its envelope.
///
/// The amount must be positive and the envelope, when given, must exist.
#[instrument(skip(db))]
pub async fn create_transaction(
    db: &DatabaseConnection,
    new: NewTransaction,
) -> Result<transaction::Model> {
    validate_amount(new.amount)?;

    let txn = db.begin().await?;
    let record = insert_and_post(&txn, &new, None).await?;
    txn.commit().await?;

    info!(
        id = record.id,
        envelope_id = ?record.envelope_id,
        kind = %record.transaction_type,
        amount = record.amount,
        "created transaction"
    );
    Ok(record)
}

/// Replaces a transaction's fields, moving its posting from the old envelope state to
/// the new one. The old envelope ends up exactly as if the original never existed.
#[instrument(skip(db))]
pub async fn update_transaction(
    db: &DatabaseConnection,
    transaction_id: i64,
    new: NewTransaction,
) -> Result<transaction::Model> {
    validate_amount(new.amount)?;

    let txn = db.begin().await?;

    let existing = Transaction::find_by_id(transaction_id)
        .one(&txn)
        .await?
        .ok_or(Error::TransactionNotFound { id: transaction_id })?;
    ensure_envelope_exists(&txn, new.envelope_id).await?;

    post(&txn, &existing, -1).await?;

    let mut active_model: transaction::ActiveModel = existing.into();
    active_model.amount = Set(new.amount);
    active_model.date = Set(new.date);
    active_model.transaction_type = Set(new.transaction_type.as_str().to_string());
    active_model.envelope_id = Set(new.envelope_id);
    active_model.note = Set(new.note);
    active_model.is_recurring = Set(new.is_recurring);
    let updated = active_model.update(&txn).await?;

    post(&txn, &updated, 1).await?;
    txn.commit().await?;

    info!(id = transaction_id, "updated transaction");
    Ok(updated)
}

/// Deletes a transaction and reverses its posting.
#[instrument(skip(db))]
pub async fn delete_transaction(db: &DatabaseConnection, transaction_id: i64) -> Result<()> {
    let txn = db.begin().await?;

    let existing = Transaction::find_by_id(transaction_id)
        .one(&txn)
        .await?
        .ok_or(Error::TransactionNotFound { id: transaction_id })?;

    post(&txn, &existing, -1).await?;
    existing.delete(&txn).await?;

    txn.commit().await?;
    info!(id = transaction_id, "deleted transaction");
    Ok(())
}

/// Retrieves a specific transaction by its unique ID.
pub async fn get_transaction_by_id<C>(
    db: &C,
    transaction_id: i64,
) -> Result<Option<transaction::Model>>
where
    C: ConnectionTrait,
{
    Transaction::find_by_id(transaction_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Transactions for an envelope, newest first.
pub async fn get_transactions_for_envelope<C>(
    db: &C,
    envelope_id: i64,
) -> Result<Vec<transaction::Model>>
where
    C: ConnectionTrait,
{
    Transaction::find()
        .filter(transaction::Column::EnvelopeId.eq(envelope_id))
        .order_by_desc(transaction::Column::Date)
        .order_by_desc(transaction::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Transactions dated within `[first, last]` inclusive, oldest first.
pub async fn get_transactions_between<C>(
    db: &C,
    first: NaiveDate,
    last: NaiveDate,
) -> Result<Vec<transaction::Model>>
where
    C: ConnectionTrait,
{
    Transaction::find()
        .filter(transaction::Column::Date.gte(first))
        .filter(transaction::Column::Date.lte(last))
        .order_by_asc(transaction::Column::Date)
        .order_by_asc(transaction::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Number of transactions dated within a renewal cycle.
pub async fn count_transactions_in_cycle<C>(
    db: &C,
    calc: &RenewalCalculator,
    key: CycleKey,
) -> Result<u64>
where
    C: ConnectionTrait,
{
    let (first, last) = calc.cycle_bounds(key).ok_or_else(|| Error::Validation {
        message: format!("Cycle {key} is out of range"),
    })?;
    Transaction::find()
        .filter(transaction::Column::Date.gte(first))
        .filter(transaction::Column::Date.lte(last))
        .count(db)
        .await
        .map_err(Into::into)
}
