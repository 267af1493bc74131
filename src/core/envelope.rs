//! Envelope business logic - Handles all envelope-related operations.
//!
//! Provides functions for creating, listing, updating, reordering and deleting envelopes,
//! and the posting helper that keeps `spent`/`income` in step with transactions.
//! Cycle membership is decided by the named predicates [`is_visible_in_cycle`] and
//! [`counts_toward_cycle_limit`].

use crate::{
    core::renewal::{CycleKey, RenewalCalculator},
    entities::{Envelope, EnvelopeKind, Transaction, TransactionType, envelope, transaction},
    errors::{Error, Result},
};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{debug, info, instrument, warn};

/// Input for a new envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEnvelope {
    /// Display name; trimmed before storing
    pub name: String,
    /// Budget for the cycle
    pub budget: Decimal,
    /// Goal amount
    pub goal: Decimal,
    /// Cycle behaviour; fixed for the envelope's lifetime
    pub kind: EnvelopeKind,
}

/// Editable envelope fields. The kind is deliberately absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvelopeUpdate {
    /// New name
    pub name: Option<String>,
    /// New budget
    pub budget: Option<Decimal>,
    /// New goal
    pub goal: Option<Decimal>,
}

fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation {
            message: "Envelope name cannot be empty".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

fn validate_non_negative(value: Decimal) -> Result<()> {
    if value < Decimal::ZERO {
        return Err(Error::InvalidBudget { value });
    }
    Ok(())
}

/// Whether an envelope shows up in the given renewal cycle.
///
/// Normal and recurring envelopes belong to the cycle they were created in. Persistent
/// envelopes show up in every cycle from their creation onwards until they expire.
#[must_use]
pub fn is_visible_in_cycle(
    env: &envelope::Model,
    calc: &RenewalCalculator,
    key: CycleKey,
    now: NaiveDateTime,
) -> bool {
    let created_cycle = calc.renewal_cycle(env.created_at.date());
    if env.is_persistent() {
        created_cycle <= key && !env.is_expired(now)
    } else {
        created_cycle == key
    }
}

/// Whether an envelope counts against the free tier's per-cycle limit.
///
/// Every kind counts only in the cycle it was created in, so a persistent envelope uses
/// up a slot in its origin cycle and never again.
#[must_use]
pub fn counts_toward_cycle_limit(
    env: &envelope::Model,
    calc: &RenewalCalculator,
    key: CycleKey,
) -> bool {
    calc.renewal_cycle(env.created_at.date()) == key
}

/// Retrieves every envelope ordered by sort order.
pub async fn get_all_envelopes<C>(db: &C) -> Result<Vec<envelope::Model>>
where
    C: ConnectionTrait,
{
    Envelope::find()
        .order_by_asc(envelope::Column::SortOrder)
        .order_by_asc(envelope::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Finds an envelope by its unique ID.
pub async fn get_envelope_by_id<C>(db: &C, envelope_id: i64) -> Result<Option<envelope::Model>>
where
    C: ConnectionTrait,
{
    Envelope::find_by_id(envelope_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Envelopes visible in a renewal cycle, ordered by sort order.
pub async fn get_envelopes_for_cycle<C>(
    db: &C,
    calc: &RenewalCalculator,
    key: CycleKey,
    now: NaiveDateTime,
) -> Result<Vec<envelope::Model>>
where
    C: ConnectionTrait,
{
    let envelopes = get_all_envelopes(db).await?;
    Ok(envelopes
        .into_iter()
        .filter(|env| is_visible_in_cycle(env, calc, key, now))
        .collect())
}

async fn ensure_unique_name<C>(
    db: &C,
    calc: &RenewalCalculator,
    name: &str,
    now: NaiveDateTime,
    exclude_id: Option<i64>,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let key = calc.renewal_cycle(now.date());
    let clash = get_envelopes_for_cycle(db, calc, key, now)
        .await?
        .into_iter()
        .any(|env| env.name == name && Some(env.id) != exclude_id);
    if clash {
        warn!(name, cycle = %key, "duplicate envelope name rejected");
        return Err(Error::DuplicateEnvelope {
            name: name.to_string(),
        });
    }
    Ok(())
}

async fn next_sort_order<C>(db: &C) -> Result<i32>
where
    C: ConnectionTrait,
{
    let last = Envelope::find()
        .order_by_desc(envelope::Column::SortOrder)
        .one(db)
        .await?;
    Ok(last.map_or(0, |env| env.sort_order + 1))
}

/// Creates a new envelope after validating its input.
///
/// The name must be non-empty and unique among the envelopes visible in the current
/// cycle; budget and goal must not be negative. Feature gating is the caller's job.
#[instrument(skip(db, calc))]
pub async fn create_envelope(
    db: &DatabaseConnection,
    calc: &RenewalCalculator,
    new: NewEnvelope,
    now: NaiveDateTime,
) -> Result<envelope::Model> {
    let name = validate_name(&new.name)?;
    validate_non_negative(new.budget)?;
    validate_non_negative(new.goal)?;

    ensure_unique_name(db, calc, &name, now, None).await?;
    let sort_order = next_sort_order(db).await?;

    let envelope = envelope::ActiveModel {
        name: Set(name),
        budget: Set(new.budget),
        income: Set(Decimal::ZERO),
        spent: Set(Decimal::ZERO),
        goal: Set(new.goal),
        created_at: Set(now),
        kind: Set(new.kind.as_str().to_string()),
        origin_id: Set(None),
        sort_order: Set(sort_order),
        expiration_date: Set(None),
        ..Default::default()
    };

    let result = envelope.insert(db).await?;
    info!(id = result.id, name = %result.name, kind = %result.kind, "created envelope");
    Ok(result)
}

/// Updates name, budget or goal. The envelope's kind never changes.
#[instrument(skip(db, calc))]
pub async fn update_envelope(
    db: &DatabaseConnection,
    calc: &RenewalCalculator,
    envelope_id: i64,
    update: EnvelopeUpdate,
    now: NaiveDateTime,
) -> Result<envelope::Model> {
    let existing = get_envelope_by_id(db, envelope_id)
        .await?
        .ok_or_else(|| Error::EnvelopeNotFound {
            name: envelope_id.to_string(),
        })?;

    let mut active_model: envelope::ActiveModel = existing.clone().into();

    if let Some(name) = update.name {
        let name = validate_name(&name)?;
        if name != existing.name {
            ensure_unique_name(db, calc, &name, now, Some(envelope_id)).await?;
        }
        active_model.name = Set(name);
    }
    if let Some(budget) = update.budget {
        validate_non_negative(budget)?;
        active_model.budget = Set(budget);
    }
    if let Some(goal) = update.goal {
        validate_non_negative(goal)?;
        active_model.goal = Set(goal);
    }

    active_model.update(db).await.map_err(Into::into)
}

/// Rewrites sort orders so envelopes appear in the given order.
pub async fn reorder_envelopes(db: &DatabaseConnection, ordered_ids: &[i64]) -> Result<()> {
    let txn = db.begin().await?;

    for (position, envelope_id) in ordered_ids.iter().enumerate() {
        let sort_order = i32::try_from(position).map_err(|_| Error::Validation {
            message: "Too many envelopes to reorder".to_string(),
        })?;
        let updated = Envelope::update_many()
            .col_expr(envelope::Column::SortOrder, Expr::value(sort_order))
            .filter(envelope::Column::Id.eq(*envelope_id))
            .exec(&txn)
            .await?;
        if updated.rows_affected == 0 {
            return Err(Error::EnvelopeNotFound {
                name: envelope_id.to_string(),
            });
        }
    }

    txn.commit().await?;
    Ok(())
}

/// Deletes an envelope together with its transactions.
///
/// Returns the number of transactions removed.
#[instrument(skip(db))]
pub async fn delete_envelope(db: &DatabaseConnection, envelope_id: i64) -> Result<u64> {
    let txn = db.begin().await?;

    let envelope = Envelope::find_by_id(envelope_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::EnvelopeNotFound {
            name: envelope_id.to_string(),
        })?;

    let removed = Transaction::delete_many()
        .filter(transaction::Column::EnvelopeId.eq(envelope_id))
        .exec(&txn)
        .await?
        .rows_affected;

    envelope.delete(&txn).await?;
    txn.commit().await?;

    info!(envelope_id, removed, "deleted envelope and its transactions");
    Ok(removed)
}

/// Adds `delta` to the envelope's `spent` (expense) or `income` (income) column.
///
/// A single `UPDATE ... SET col = col + delta` keeps the change atomic. Pass a negative
/// delta to reverse an earlier posting.
pub async fn apply_posting<C>(
    db: &C,
    envelope_id: i64,
    transaction_type: TransactionType,
    delta: i64,
) -> Result<envelope::Model>
where
    C: ConnectionTrait,
{
    let column = match transaction_type {
        TransactionType::Expense => envelope::Column::Spent,
        TransactionType::Income => envelope::Column::Income,
    };

    let result = Envelope::update_many()
        .col_expr(column, Expr::col(column).add(Decimal::from(delta)))
        .filter(envelope::Column::Id.eq(envelope_id))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Err(Error::EnvelopeNotFound {
            name: envelope_id.to_string(),
        });
    }
    debug!(envelope_id, %transaction_type, delta, "applied posting");

    Envelope::find_by_id(envelope_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::EnvelopeNotFound {
            name: envelope_id.to_string(),
        })
}
