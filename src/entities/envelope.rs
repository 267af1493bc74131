//! Envelope entity - a named budget bucket for one renewal cycle.
//!
//! Each envelope tracks a budget, the income and spending posted against it, and a goal.
//! Normal envelopes live in the cycle they were created in, recurring envelopes are copied
//! into each new month, and persistent envelopes survive across cycles until deleted.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::errors::Error;

/// Envelope database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "envelopes")]
pub struct Model {
    /// Unique identifier for the envelope
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Display name (e.g., "Groceries")
    pub name: String,
    /// Budgeted amount for the cycle
    pub budget: Decimal,
    /// Income posted to this envelope
    pub income: Decimal,
    /// Spending posted to this envelope
    pub spent: Decimal,
    /// Savings or spending goal
    pub goal: Decimal,
    /// When the envelope was created (local time)
    pub created_at: DateTime,
    /// `"normal"`, `"recurring"` or `"persistent"`
    pub kind: String,
    /// Chain origin for cycle copies, `None` for the origin itself
    pub origin_id: Option<i64>,
    /// Position in the envelope list
    pub sort_order: i32,
    /// Set on persistent envelopes when the subscription lapses
    pub expiration_date: Option<DateTime>,
}

/// Defines relationships between Envelope and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One envelope has many transactions
    #[sea_orm(has_many = "super::transaction::Entity")]
    Transactions,
}

impl Related<super::transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transactions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// How an envelope behaves across renewal cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// Belongs to a single cycle
    Normal,
    /// Re-created every month by the materializer
    Recurring,
    /// Survives across cycles; premium only
    Persistent,
}

impl EnvelopeKind {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Recurring => "recurring",
            Self::Persistent => "persistent",
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvelopeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "recurring" => Ok(Self::Recurring),
            "persistent" => Ok(Self::Persistent),
            other => Err(Error::CorruptValue {
                field: "envelopes.kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Position of an entity in its recurrence chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lineage {
    /// The first instance; later copies point at it
    Origin,
    /// A copy materialized for a later cycle
    CycleInstance {
        /// Id of the chain origin
        origin_id: i64,
    },
}

impl Lineage {
    /// Interprets a stored `origin_id` column.
    #[must_use]
    pub const fn from_column(origin_id: Option<i64>) -> Self {
        match origin_id {
            None => Self::Origin,
            Some(origin_id) => Self::CycleInstance { origin_id },
        }
    }

    /// Id anchoring the chain, given the id of the entity carrying this lineage.
    #[must_use]
    pub const fn chain_origin(self, own_id: i64) -> i64 {
        match self {
            Self::Origin => own_id,
            Self::CycleInstance { origin_id } => origin_id,
        }
    }
}

impl Model {
    /// Parsed envelope kind.
    pub fn envelope_kind(&self) -> Result<EnvelopeKind, Error> {
        self.kind.parse()
    }

    /// True when stored as a persistent envelope.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.kind == EnvelopeKind::Persistent.as_str()
    }

    /// Lineage derived from `origin_id`.
    #[must_use]
    pub const fn lineage(&self) -> Lineage {
        Lineage::from_column(self.origin_id)
    }

    /// Id of the recurrence chain this envelope belongs to.
    #[must_use]
    pub const fn chain_origin_id(&self) -> i64 {
        self.lineage().chain_origin(self.id)
    }

    /// `budget + income - spent`
    #[must_use]
    pub fn remaining(&self) -> Decimal {
        self.budget + self.income - self.spent
    }

    /// Share of the budget still available, clamped to `[0, 1]`.
    #[must_use]
    pub fn progress(&self) -> Decimal {
        if self.budget <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.remaining() / self.budget).clamp(Decimal::ZERO, Decimal::ONE)
    }

    /// Expiry only applies to persistent envelopes with an expiration date.
    #[must_use]
    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        self.is_persistent() && self.expiration_date.is_some_and(|expiry| now > expiry)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn sample() -> Model {
        Model {
            id: 7,
            name: "Groceries".to_string(),
            budget: dec!(500),
            income: dec!(0),
            spent: dec!(0),
            goal: dec!(0),
            created_at: at(2024, 1, 5),
            kind: "normal".to_string(),
            origin_id: None,
            sort_order: 0,
            expiration_date: None,
        }
    }

    #[test]
    fn test_remaining_and_progress() {
        let mut env = sample();
        env.income = dec!(100);
        env.spent = dec!(350);
        assert_eq!(env.remaining(), dec!(250));
        assert_eq!(env.progress(), dec!(0.5));

        env.spent = dec!(900);
        assert_eq!(env.progress(), Decimal::ZERO);

        env.spent = Decimal::ZERO;
        assert_eq!(env.progress(), Decimal::ONE);
    }

    #[test]
    fn test_progress_zero_budget() {
        let mut env = sample();
        env.budget = Decimal::ZERO;
        env.income = dec!(40);
        assert_eq!(env.progress(), Decimal::ZERO);
    }

    #[test]
    fn test_lineage() {
        let mut env = sample();
        assert_eq!(env.lineage(), Lineage::Origin);
        assert_eq!(env.chain_origin_id(), 7);

        env.origin_id = Some(3);
        assert_eq!(env.lineage(), Lineage::CycleInstance { origin_id: 3 });
        assert_eq!(env.chain_origin_id(), 3);
    }

    #[test]
    fn test_is_expired_only_for_persistent() {
        let mut env = sample();
        env.expiration_date = Some(at(2024, 2, 1));
        assert!(!env.is_expired(at(2024, 3, 1)));

        env.kind = EnvelopeKind::Persistent.as_str().to_string();
        assert!(env.is_expired(at(2024, 3, 1)));
        assert!(!env.is_expired(at(2024, 1, 1)));

        env.expiration_date = None;
        assert!(!env.is_expired(at(2024, 3, 1)));
    }

    #[test]
    fn test_kind_round_trip_and_corrupt_value() {
        assert_eq!(
            "persistent".parse::<EnvelopeKind>().unwrap(),
            EnvelopeKind::Persistent
        );
        assert!(matches!(
            "weekly".parse::<EnvelopeKind>(),
            Err(Error::CorruptValue { .. })
        ));
    }
}
