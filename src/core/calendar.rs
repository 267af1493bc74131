//! Calendar and cycle summary business logic.
//!
//! Daily income/expense totals drive the calendar view; the cycle summary adds up the
//! envelopes visible in a renewal cycle. Functions return structured data and leave
//! presentation to the caller.

use crate::{
    core::{
        envelope::get_envelopes_for_cycle,
        renewal::{CycleKey, RenewalCalculator},
        transaction::get_transactions_between,
    },
    entities::TransactionType,
    errors::{Error, Result},
};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use sea_orm::ConnectionTrait;
use serde::Serialize;
use std::collections::BTreeMap;

/// Income and expense posted on a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyTotal {
    /// Calendar day
    pub date: NaiveDate,
    /// Sum of income transactions
    pub income: i64,
    /// Sum of expense transactions
    pub expense: i64,
}

impl DailyTotal {
    /// Income minus expense.
    #[must_use]
    pub const fn net(&self) -> i64 {
        self.income - self.expense
    }
}

/// Totals over the envelopes visible in one renewal cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    /// Cycle being summarized
    pub cycle: CycleKey,
    /// First day of the cycle
    pub first_day: NaiveDate,
    /// Last day of the cycle
    pub last_day: NaiveDate,
    /// Number of visible envelopes
    pub envelope_count: usize,
    /// Sum of budgets
    pub budget: Decimal,
    /// Sum of posted income
    pub income: Decimal,
    /// Sum of posted spending
    pub spent: Decimal,
}

impl CycleSummary {
    /// `budget + income - spent` over all envelopes.
    #[must_use]
    pub fn remaining(&self) -> Decimal {
        self.budget + self.income - self.spent
    }

    /// Same clamping rule as a single envelope's progress.
    #[must_use]
    pub fn progress(&self) -> Decimal {
        if self.budget <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.remaining() / self.budget).clamp(Decimal::ZERO, Decimal::ONE)
    }
}

/// Per-day totals for transactions dated in `[first, last]`.
///
/// Only days with at least one transaction are returned, oldest first.
pub async fn daily_totals<C>(db: &C, first: NaiveDate, last: NaiveDate) -> Result<Vec<DailyTotal>>
where
    C: ConnectionTrait,
{
    let records = get_transactions_between(db, first, last).await?;

    let mut by_day: BTreeMap<NaiveDate, DailyTotal> = BTreeMap::new();
    for record in records {
        let entry = by_day.entry(record.date).or_insert(DailyTotal {
            date: record.date,
            income: 0,
            expense: 0,
        });
        match record.kind()? {
            TransactionType::Income => entry.income += record.amount,
            TransactionType::Expense => entry.expense += record.amount,
        }
    }

    Ok(by_day.into_values().collect())
}

fn bounds_of(calc: &RenewalCalculator, key: CycleKey) -> Result<(NaiveDate, NaiveDate)> {
    calc.cycle_bounds(key).ok_or_else(|| Error::Validation {
        message: format!("Cycle {key} is out of range"),
    })
}

/// Per-day totals for one renewal cycle.
pub async fn cycle_daily_totals<C>(
    db: &C,
    calc: &RenewalCalculator,
    key: CycleKey,
) -> Result<Vec<DailyTotal>>
where
    C: ConnectionTrait,
{
    let (first, last) = bounds_of(calc, key)?;
    daily_totals(db, first, last).await
}

/// Adds up the envelopes visible in `key`.
pub async fn summarize_cycle<C>(
    db: &C,
    calc: &RenewalCalculator,
    key: CycleKey,
    now: NaiveDateTime,
) -> Result<CycleSummary>
where
    C: ConnectionTrait,
{
    let (first_day, last_day) = bounds_of(calc, key)?;
    let envelopes = get_envelopes_for_cycle(db, calc, key, now).await?;

    Ok(CycleSummary {
        cycle: key,
        first_day,
        last_day,
        envelope_count: envelopes.len(),
        budget: envelopes.iter().map(|env| env.budget).sum(),
        income: envelopes.iter().map(|env| env.income).sum(),
        spent: envelopes.iter().map(|env| env.spent).sum(),
    })
}

/// One-line rendering, e.g. `2024-02 (2024-02-25 ~ 2024-03-24) | 3 envelopes | 400 left of 500`.
#[must_use]
pub fn format_cycle_summary(summary: &CycleSummary) -> String {
    format!(
        "{} ({} ~ {}) | {} envelopes | {} left of {}",
        summary.cycle,
        summary.first_day,
        summary.last_day,
        summary.envelope_count,
        summary.remaining(),
        summary.budget
    )
}
