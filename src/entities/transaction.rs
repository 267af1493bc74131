//! Transaction entity - an income or expense posted to an envelope.
//!
//! Amounts are whole currency units and always positive; `transaction_type` carries the
//! direction. Recurring transactions are copied into each new month with `origin_id`
//! pointing at the first transaction of the chain.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::envelope::Lineage;
use crate::errors::Error;

/// Transaction database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    /// Unique identifier for the transaction
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Amount in whole currency units
    pub amount: i64,
    /// Calendar date the transaction applies to
    pub date: Date,
    /// `"income"` or `"expense"`
    pub transaction_type: String,
    /// Owning envelope, if any
    pub envelope_id: Option<i64>,
    /// Free-form note
    pub note: String,
    /// Whether the materializer copies this transaction into the next month
    pub is_recurring: bool,
    /// Chain origin for cycle copies, `None` for the origin itself
    pub origin_id: Option<i64>,
}

/// Defines relationships between Transaction and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each transaction belongs to at most one envelope
    #[sea_orm(
        belongs_to = "super::envelope::Entity",
        from = "Column::EnvelopeId",
        to = "super::envelope::Column::Id"
    )]
    Envelope,
}

impl Related<super::envelope::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Envelope.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Direction of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    /// Adds to the envelope's income
    Income,
    /// Adds to the envelope's spent total
    Expense,
}

impl TransactionType {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            other => Err(Error::CorruptValue {
                field: "transactions.transaction_type",
                value: other.to_string(),
            }),
        }
    }
}

impl Model {
    /// Parsed transaction direction.
    pub fn kind(&self) -> Result<TransactionType, Error> {
        self.transaction_type.parse()
    }

    /// Lineage derived from `origin_id`.
    #[must_use]
    pub const fn lineage(&self) -> Lineage {
        Lineage::from_column(self.origin_id)
    }

    /// Id of the recurrence chain this transaction belongs to.
    #[must_use]
    pub const fn chain_origin_id(&self) -> i64 {
        self.lineage().chain_origin(self.id)
    }
}
