//! Recurring envelope and transaction materialization.
//!
//! Runs once per app activation. Recurring envelopes created in the previous calendar
//! month get a fresh copy in the current month, then recurring transactions dated in the
//! previous month are copied onto the matching current-month envelope. Lookback is by
//! plain calendar month, independent of the configured renewal day.
//!
//! Every copy records the id of its chain origin, and a copy is only created when no
//! current-month entity with that origin exists yet, so running twice in the same month
//! is a no-op. The envelope pass commits before the transaction pass starts.

use crate::{
    core::{
        renewal::{CycleKey, clamp_day_into},
        settings,
        transaction::{NewTransaction, insert_and_post},
    },
    entities::{Envelope, EnvelopeKind, Transaction, envelope, transaction},
    errors::{Error, Result},
};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use std::collections::HashSet;
use tracing::{debug, error, info, instrument, warn};

/// Settings key holding the date of the last materialization run.
pub const LAST_MATERIALIZED_KEY: &str = "last_materialized_on";

/// A recurring transaction that could not be copied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTransaction {
    /// Id of the previous-month transaction
    pub transaction_id: i64,
    /// Envelope it was posted to, if any
    pub envelope_id: Option<i64>,
}

/// Outcome of one materialization run.
#[derive(Debug, Clone)]
pub struct MaterializationResult {
    /// Date the run happened
    pub run_date: NaiveDate,
    /// Calendar month copies were created for
    pub month: CycleKey,
    /// Envelope copies created by this run
    pub created_envelopes: Vec<envelope::Model>,
    /// Transaction copies created by this run
    pub created_transactions: Vec<transaction::Model>,
    /// Recurring transactions with no envelope to land in
    pub skipped_transactions: Vec<SkippedTransaction>,
}

impl MaterializationResult {
    /// True when the run created nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.created_envelopes.is_empty() && self.created_transactions.is_empty()
    }
}

/// Recurring envelope created in the given calendar month.
#[must_use]
pub fn is_recurring_envelope_from(env: &envelope::Model, key: CycleKey) -> bool {
    env.kind == EnvelopeKind::Recurring.as_str()
        && key.contains_calendar_date(env.created_at.date())
}

/// Recurring transaction dated in the given calendar month.
#[must_use]
pub fn is_recurring_transaction_from(record: &transaction::Model, key: CycleKey) -> bool {
    record.is_recurring && key.contains_calendar_date(record.date)
}

/// Picks the current-month envelope a recurring transaction should be copied onto.
///
/// In order: the old envelope itself when it is an active persistent envelope; a
/// current-month envelope in the same recurrence chain; a current-month envelope with the
/// same name. `None` means the copy is skipped rather than left without an envelope.
#[must_use]
pub fn resolve_target_envelope(
    old_envelope: Option<&envelope::Model>,
    current_envelopes: &[envelope::Model],
    now: NaiveDateTime,
) -> Option<i64> {
    let old = old_envelope?;

    if old.is_persistent() && !old.is_expired(now) {
        return Some(old.id);
    }

    let chain_origin = old.chain_origin_id();
    current_envelopes
        .iter()
        .find(|env| env.origin_id == Some(chain_origin))
        .or_else(|| current_envelopes.iter().find(|env| env.name == old.name))
        .map(|env| env.id)
}

fn month_bounds(key: CycleKey) -> Result<(NaiveDateTime, NaiveDateTime)> {
    key.calendar_bounds().ok_or_else(|| Error::Validation {
        message: format!("Month {key} is out of range"),
    })
}

async fn envelopes_created_in<C>(db: &C, key: CycleKey) -> Result<Vec<envelope::Model>>
where
    C: ConnectionTrait,
{
    let (start, end) = month_bounds(key)?;
    Envelope::find()
        .filter(envelope::Column::CreatedAt.gte(start))
        .filter(envelope::Column::CreatedAt.lt(end))
        .order_by_asc(envelope::Column::SortOrder)
        .order_by_asc(envelope::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

async fn transactions_dated_in<C>(db: &C, key: CycleKey) -> Result<Vec<transaction::Model>>
where
    C: ConnectionTrait,
{
    let (start, end) = month_bounds(key)?;
    Transaction::find()
        .filter(transaction::Column::Date.gte(start.date()))
        .filter(transaction::Column::Date.lt(end.date()))
        .order_by_asc(transaction::Column::Date)
        .order_by_asc(transaction::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Copies last month's recurring envelopes into `current`.
async fn materialize_envelopes(
    db: &DatabaseConnection,
    previous: CycleKey,
    current: CycleKey,
    now: NaiveDateTime,
) -> Result<Vec<envelope::Model>> {
    let txn = db.begin().await?;

    let sources: Vec<envelope::Model> = envelopes_created_in(&txn, previous)
        .await?
        .into_iter()
        .filter(|env| is_recurring_envelope_from(env, previous))
        .collect();
    let mut materialized: HashSet<i64> = envelopes_created_in(&txn, current)
        .await?
        .iter()
        .filter_map(|env| env.origin_id)
        .collect();

    let mut created = Vec::new();
    for source in sources {
        let chain_origin = source.chain_origin_id();
        if !materialized.insert(chain_origin) {
            debug!(envelope_id = source.id, chain_origin, "envelope already materialized");
            continue;
        }

        let copy = envelope::ActiveModel {
            name: Set(source.name.clone()),
            budget: Set(source.budget),
            income: Set(Decimal::ZERO),
            spent: Set(Decimal::ZERO),
            goal: Set(source.goal),
            created_at: Set(now),
            kind: Set(EnvelopeKind::Recurring.as_str().to_string()),
            origin_id: Set(Some(chain_origin)),
            sort_order: Set(source.sort_order),
            expiration_date: Set(None),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        info!(
            source_id = source.id,
            new_id = copy.id,
            name = %copy.name,
            month = %current,
            "materialized recurring envelope"
        );
        created.push(copy);
    }

    txn.commit().await?;
    Ok(created)
}

/// Copies last month's recurring transactions onto current-month envelopes.
async fn materialize_transactions(
    db: &DatabaseConnection,
    previous: CycleKey,
    current: CycleKey,
    now: NaiveDateTime,
) -> Result<(Vec<transaction::Model>, Vec<SkippedTransaction>)> {
    let txn = db.begin().await?;

    let sources: Vec<transaction::Model> = transactions_dated_in(&txn, previous)
        .await?
        .into_iter()
        .filter(|record| is_recurring_transaction_from(record, previous))
        .collect();
    let mut materialized: HashSet<i64> = transactions_dated_in(&txn, current)
        .await?
        .iter()
        .filter_map(|record| record.origin_id)
        .collect();
    let current_envelopes = envelopes_created_in(&txn, current).await?;

    let mut created = Vec::new();
    let mut skipped = Vec::new();
    for source in sources {
        let chain_origin = source.chain_origin_id();
        if materialized.contains(&chain_origin) {
            debug!(transaction_id = source.id, chain_origin, "transaction already materialized");
            continue;
        }

        let old_envelope = match source.envelope_id {
            Some(envelope_id) => Envelope::find_by_id(envelope_id).one(&txn).await?,
            None => None,
        };
        let Some(target) = resolve_target_envelope(old_envelope.as_ref(), &current_envelopes, now)
        else {
            warn!(
                transaction_id = source.id,
                envelope_id = ?source.envelope_id,
                month = %current,
                "no envelope for recurring transaction, skipping"
            );
            skipped.push(SkippedTransaction {
                transaction_id: source.id,
                envelope_id: source.envelope_id,
            });
            continue;
        };

        let date = clamp_day_into(current, source.date.day()).ok_or_else(|| Error::Validation {
            message: format!("Month {current} is out of range"),
        })?;
        let new = NewTransaction {
            amount: source.amount,
            date,
            transaction_type: source.kind()?,
            envelope_id: Some(target),
            note: source.note.clone(),
            is_recurring: true,
        };
        let copy = insert_and_post(&txn, &new, Some(chain_origin)).await?;
        materialized.insert(chain_origin);

        info!(
            source_id = source.id,
            new_id = copy.id,
            envelope_id = target,
            %date,
            "materialized recurring transaction"
        );
        created.push(copy);
    }

    txn.commit().await?;
    Ok((created, skipped))
}

/// Ensures this month's copies of recurring envelopes and transactions exist.
///
/// Safe to call on every activation. A database failure aborts the run for this month;
/// the failing pass is rolled back and the error is returned after being logged.
#[instrument(skip(db))]
pub async fn materialize_recurring(
    db: &DatabaseConnection,
    now: NaiveDateTime,
) -> Result<MaterializationResult> {
    let current = CycleKey::calendar(now.date());
    let previous = current.previous();

    let created_envelopes = materialize_envelopes(db, previous, current, now)
        .await
        .inspect_err(|e| error!(error = %e, month = %current, "recurring envelope pass failed"))?;

    let (created_transactions, skipped_transactions) =
        materialize_transactions(db, previous, current, now)
            .await
            .inspect_err(|e| {
                error!(error = %e, month = %current, "recurring transaction pass failed");
            })?;

    settings::set_value(
        db,
        LAST_MATERIALIZED_KEY,
        &now.date().format("%Y-%m-%d").to_string(),
    )
    .await
    .inspect_err(|e| error!(error = %e, "failed to record materialization date"))?;

    Ok(MaterializationResult {
        run_date: now.date(),
        month: current,
        created_envelopes,
        created_transactions,
        skipped_transactions,
    })
}

/// Date of the last materialization run, if any.
pub async fn get_last_materialized_date(db: &DatabaseConnection) -> Result<Option<NaiveDate>> {
    match settings::get_value(db, LAST_MATERIALIZED_KEY).await? {
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|e| Error::Config {
                message: format!("Failed to parse last materialization date: {e}"),
            }),
        None => Ok(None),
    }
}

/// Human-readable summary of a run, for logs.
#[must_use]
pub fn format_materialization_summary(result: &MaterializationResult) -> String {
    let mut lines = vec![format!(
        "Recurring update - {} - {} envelopes, {} transactions created, {} skipped",
        result.run_date.format("%B %Y"),
        result.created_envelopes.len(),
        result.created_transactions.len(),
        result.skipped_transactions.len()
    )];

    for env in &result.created_envelopes {
        lines.push(format!("  envelope {} | budget {}", env.name, env.budget));
    }
    for record in &result.created_transactions {
        lines.push(format!(
            "  {} {} on {}",
            record.transaction_type, record.amount, record.date
        ));
    }
    for skipped in &result.skipped_transactions {
        lines.push(format!(
            "  skipped transaction #{} (no matching envelope)",
            skipped.transaction_id
        ));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::envelope::{get_all_envelopes, get_envelope_by_id};
    use crate::entities::{Lineage, TransactionType};
    use crate::test_utils::*;
    use rust_decimal_macros::dec;

    async fn recurring_envelope(
        db: &DatabaseConnection,
        name: &str,
        created: NaiveDateTime,
    ) -> Result<envelope::Model> {
        create_custom_envelope(db, name, dec!(300), EnvelopeKind::Recurring, created).await
    }

    #[tokio::test]
    async fn test_recurring_envelope_copied_into_new_month() -> Result<()> {
        let db = setup_test_db().await?;
        let groceries = recurring_envelope(&db, "Groceries", at(2024, 1, 5)).await?;
        create_test_transaction(&db, groceries.id, 80, TransactionType::Expense, day(2024, 1, 6))
            .await?;

        let result = materialize_recurring(&db, at(2024, 2, 1)).await?;
        assert_eq!(result.created_envelopes.len(), 1);
        assert_eq!(result.month, CycleKey::new(2024, 2).unwrap());

        let copy = &result.created_envelopes[0];
        assert_eq!(copy.name, "Groceries");
        assert_eq!(copy.budget, dec!(300));
        assert_eq!(copy.income, Decimal::ZERO);
        assert_eq!(copy.spent, Decimal::ZERO);
        assert_eq!(copy.envelope_kind()?, EnvelopeKind::Recurring);
        assert_eq!(
            copy.lineage(),
            Lineage::CycleInstance {
                origin_id: groceries.id
            }
        );
        assert_eq!(copy.created_at.date().month(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_second_run_is_noop() -> Result<()> {
        let db = setup_test_db().await?;
        let groceries = recurring_envelope(&db, "Groceries", at(2024, 1, 5)).await?;
        create_custom_transaction(
            &db,
            NewTransaction {
                amount: 40,
                date: day(2024, 1, 15),
                transaction_type: TransactionType::Expense,
                envelope_id: Some(groceries.id),
                note: "milk".to_string(),
                is_recurring: true,
            },
        )
        .await?;

        let first = materialize_recurring(&db, at(2024, 2, 1)).await?;
        assert_eq!(first.created_envelopes.len(), 1);
        assert_eq!(first.created_transactions.len(), 1);

        let second = materialize_recurring(&db, at(2024, 2, 20)).await?;
        assert!(second.is_noop());
        assert_eq!(Envelope::find().count(&db).await?, 2);
        assert_eq!(Transaction::find().count(&db).await?, 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_only_previous_month_recurring_envelopes_copied() -> Result<()> {
        let db = setup_test_db().await?;
        recurring_envelope(&db, "Old", at(2023, 12, 20)).await?;
        create_test_envelope(&db, "Normal", at(2024, 1, 10)).await?;
        create_custom_envelope(&db, "Keep", dec!(10), EnvelopeKind::Persistent, at(2024, 1, 10))
            .await?;

        let result = materialize_recurring(&db, at(2024, 2, 3)).await?;
        assert!(result.is_noop());
        assert_eq!(get_all_envelopes(&db).await?.len(), 3);

        Ok(())
    }

    #[tokio::test]
    async fn test_year_rollover() -> Result<()> {
        let db = setup_test_db().await?;
        let rent = recurring_envelope(&db, "Rent", at(2023, 12, 10)).await?;

        let result = materialize_recurring(&db, at(2024, 1, 2)).await?;
        assert_eq!(result.created_envelopes.len(), 1);
        assert_eq!(result.created_envelopes[0].origin_id, Some(rent.id));

        Ok(())
    }

    #[tokio::test]
    async fn test_chain_keeps_pointing_at_origin() -> Result<()> {
        let db = setup_test_db().await?;
        let origin = recurring_envelope(&db, "Gym", at(2024, 1, 5)).await?;

        let feb = materialize_recurring(&db, at(2024, 2, 1)).await?;
        let mar = materialize_recurring(&db, at(2024, 3, 1)).await?;

        assert_eq!(feb.created_envelopes[0].origin_id, Some(origin.id));
        assert_eq!(mar.created_envelopes.len(), 1);
        assert_eq!(mar.created_envelopes[0].origin_id, Some(origin.id));

        let again = materialize_recurring(&db, at(2024, 3, 15)).await?;
        assert!(again.is_noop());

        Ok(())
    }

    #[tokio::test]
    async fn test_recurring_transaction_follows_envelope_copy() -> Result<()> {
        let db = setup_test_db().await?;
        let phone = recurring_envelope(&db, "Phone", at(2024, 1, 2)).await?;
        let bill = create_custom_transaction(
            &db,
            NewTransaction {
                amount: 55,
                date: day(2024, 1, 31),
                transaction_type: TransactionType::Expense,
                envelope_id: Some(phone.id),
                note: "monthly plan".to_string(),
                is_recurring: true,
            },
        )
        .await?;

        let result = materialize_recurring(&db, at(2024, 2, 1)).await?;
        let copy_env = &result.created_envelopes[0];
        let copy_tx = &result.created_transactions[0];

        // Clamped to the last day of a leap February
        assert_eq!(copy_tx.date, day(2024, 2, 29));
        assert_eq!(copy_tx.envelope_id, Some(copy_env.id));
        assert_eq!(copy_tx.origin_id, Some(bill.id));
        assert_eq!(copy_tx.note, "monthly plan");
        assert!(copy_tx.is_recurring);

        let posted = get_envelope_by_id(&db, copy_env.id).await?.unwrap();
        assert_eq!(posted.spent, dec!(55));
        let original = get_envelope_by_id(&db, phone.id).await?.unwrap();
        assert_eq!(original.spent, dec!(55));

        Ok(())
    }

    #[tokio::test]
    async fn test_transaction_falls_back_to_name_match() -> Result<()> {
        let db = setup_test_db().await?;
        let rent = create_test_envelope(&db, "Rent", at(2024, 1, 2)).await?;
        create_custom_transaction(
            &db,
            NewTransaction {
                amount: 900,
                date: day(2024, 1, 3),
                transaction_type: TransactionType::Expense,
                envelope_id: Some(rent.id),
                note: String::new(),
                is_recurring: true,
            },
        )
        .await?;
        let feb_rent = create_test_envelope(&db, "Rent", at(2024, 2, 1)).await?;

        let result = materialize_recurring(&db, at(2024, 2, 2)).await?;
        assert_eq!(result.created_transactions.len(), 1);
        assert_eq!(result.created_transactions[0].envelope_id, Some(feb_rent.id));
        assert_eq!(result.created_transactions[0].date, day(2024, 2, 3));

        Ok(())
    }

    #[tokio::test]
    async fn test_transaction_without_target_is_skipped() -> Result<()> {
        let db = setup_test_db().await?;
        let rent = create_test_envelope(&db, "Rent", at(2024, 1, 2)).await?;
        let record = create_custom_transaction(
            &db,
            NewTransaction {
                amount: 900,
                date: day(2024, 1, 3),
                transaction_type: TransactionType::Expense,
                envelope_id: Some(rent.id),
                note: String::new(),
                is_recurring: true,
            },
        )
        .await?;
        create_custom_transaction(
            &db,
            NewTransaction {
                amount: 5,
                date: day(2024, 1, 4),
                transaction_type: TransactionType::Income,
                envelope_id: None,
                note: String::new(),
                is_recurring: true,
            },
        )
        .await?;

        let result = materialize_recurring(&db, at(2024, 2, 2)).await?;
        assert!(result.created_transactions.is_empty());
        assert_eq!(result.skipped_transactions.len(), 2);
        assert_eq!(result.skipped_transactions[0].transaction_id, record.id);
        assert_eq!(Transaction::find().count(&db).await?, 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_persistent_envelope_receives_recurring_income() -> Result<()> {
        let db = setup_test_db().await?;
        let savings = create_custom_envelope(
            &db,
            "Savings",
            dec!(0),
            EnvelopeKind::Persistent,
            at(2024, 1, 1),
        )
        .await?;
        create_custom_transaction(
            &db,
            NewTransaction {
                amount: 200,
                date: day(2024, 1, 25),
                transaction_type: TransactionType::Income,
                envelope_id: Some(savings.id),
                note: "salary".to_string(),
                is_recurring: true,
            },
        )
        .await?;

        let result = materialize_recurring(&db, at(2024, 2, 1)).await?;
        assert_eq!(result.created_transactions.len(), 1);
        assert_eq!(result.created_transactions[0].envelope_id, Some(savings.id));

        let savings = get_envelope_by_id(&db, savings.id).await?.unwrap();
        assert_eq!(savings.income, dec!(400));

        Ok(())
    }

    #[tokio::test]
    async fn test_records_last_run_date() -> Result<()> {
        let db = setup_test_db().await?;
        assert_eq!(get_last_materialized_date(&db).await?, None);

        materialize_recurring(&db, at(2024, 2, 1)).await?;
        assert_eq!(get_last_materialized_date(&db).await?, Some(day(2024, 2, 1)));

        Ok(())
    }

    #[test]
    fn test_resolve_target_envelope() {
        let now = at(2024, 2, 2);
        let old = sample_envelope(1, "Food", EnvelopeKind::Recurring, None);
        let by_chain = sample_envelope(5, "Groceries", EnvelopeKind::Recurring, Some(1));
        let by_name = sample_envelope(6, "Food", EnvelopeKind::Normal, None);

        assert_eq!(
            resolve_target_envelope(Some(&old), &[by_name.clone(), by_chain.clone()], now),
            Some(5)
        );
        assert_eq!(resolve_target_envelope(Some(&old), &[by_name], now), Some(6));
        assert_eq!(resolve_target_envelope(Some(&old), &[], now), None);
        assert_eq!(resolve_target_envelope(None, &[by_chain], now), None);

        let mut persistent = sample_envelope(9, "Keep", EnvelopeKind::Persistent, None);
        assert_eq!(resolve_target_envelope(Some(&persistent), &[], now), Some(9));
        persistent.expiration_date = Some(at(2024, 1, 20));
        assert_eq!(resolve_target_envelope(Some(&persistent), &[], now), None);
    }

    #[test]
    fn test_format_materialization_summary() {
        let result = MaterializationResult {
            run_date: day(2024, 3, 1),
            month: CycleKey::new(2024, 3).unwrap(),
            created_envelopes: vec![sample_envelope(
                2,
                "Groceries",
                EnvelopeKind::Recurring,
                Some(1),
            )],
            created_transactions: vec![],
            skipped_transactions: vec![SkippedTransaction {
                transaction_id: 4,
                envelope_id: None,
            }],
        };

        let summary = format_materialization_summary(&result);
        assert!(summary.contains("March 2024"));
        assert!(summary.contains("1 envelopes, 0 transactions created, 1 skipped"));
        assert!(summary.contains("envelope Groceries"));
        assert!(summary.contains("skipped transaction #4"));
    }
}
