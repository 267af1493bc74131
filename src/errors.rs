//! Unified error types for the envelope cycles core.
//!
//! Every fallible operation returns [`Result`]. Validation failures are reported before
//! anything is written; database failures abort the surrounding DB transaction.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised by the envelope cycles core.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be read or parsed
    #[error("Configuration error: {message}")]
    Config {
        /// What went wrong
        message: String,
    },

    /// Persistence layer failure
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// User input rejected before any state was touched
    #[error("Validation error: {message}")]
    Validation {
        /// Human-readable reason
        message: String,
    },

    /// Transaction amount must be a positive whole number
    #[error("Invalid amount: {amount}")]
    InvalidAmount {
        /// The rejected amount
        amount: i64,
    },

    /// Budget or goal must not be negative
    #[error("Invalid budget value: {value}")]
    InvalidBudget {
        /// The rejected value
        value: Decimal,
    },

    /// An envelope with this name already exists in the cycle
    #[error("Envelope '{name}' already exists in this cycle")]
    DuplicateEnvelope {
        /// Conflicting name
        name: String,
    },

    /// Envelope lookup failed
    #[error("Envelope not found: {name}")]
    EnvelopeNotFound {
        /// Name or id used for the lookup
        name: String,
    },

    /// Transaction lookup failed
    #[error("Transaction not found: {id}")]
    TransactionNotFound {
        /// Id used for the lookup
        id: i64,
    },

    /// A stored value could not be interpreted
    #[error("Corrupt stored value for {field}: {value}")]
    CorruptValue {
        /// Column or key name
        field: &'static str,
        /// Raw stored value
        value: String,
    },

    /// Free tier limit reached
    #[error("Free tier limit reached for {feature} (limit {limit})")]
    LimitReached {
        /// Gated feature
        feature: &'static str,
        /// Free tier limit that was hit
        limit: u64,
    },

    /// Premium-only feature requested without a subscription
    #[error("{feature} requires an active subscription")]
    SubscriptionRequired {
        /// Gated feature
        feature: &'static str,
    },

    /// Store returned an entitlement whose signature could not be verified
    #[error("Unverified entitlement for product {product_id}: {reason}")]
    UnverifiedEntitlement {
        /// Store product identifier
        product_id: String,
        /// Verification failure reason
        reason: String,
    },

    /// Store or network failure (product fetch, purchase, restore)
    #[error("Store error: {message}")]
    Store {
        /// Store-provided message
        message: String,
    },

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or unreadable environment variable
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
