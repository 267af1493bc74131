//! Entity module - SeaORM entity definitions for envelopes, transactions and settings.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod envelope;
pub mod system_state;
pub mod transaction;

pub use envelope::{
    Column as EnvelopeColumn, Entity as Envelope, EnvelopeKind, Lineage, Model as EnvelopeModel,
};
pub use system_state::{
    Column as SystemStateColumn, Entity as SystemState, Model as SystemStateModel,
};
pub use transaction::{
    Column as TransactionColumn, Entity as Transaction, Model as TransactionModel,
    TransactionType,
};
