//! Free tier feature gating.
//!
//! The predicates are pure functions of a usage count and whether the user is
//! subscribed. The counting helpers read the database; `ensure_*` turns a denial into
//! [`Error::LimitReached`]. Expiring and reactivating persistent envelopes is the side
//! effect of a subscription being lost or regained.

use crate::{
    core::{
        envelope::counts_toward_cycle_limit,
        renewal::{CycleKey, RenewalCalculator},
    },
    entities::{Envelope, EnvelopeKind, envelope},
    errors::{Error, Result},
};
use chrono::NaiveDateTime;
use sea_orm::{prelude::*, sea_query::Expr};
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::{info, instrument, warn};

/// Limits applied while not subscribed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FreeTierLimits {
    /// Envelopes that may be created per renewal cycle
    pub max_envelopes_per_cycle: u64,
    /// Renewal cycles that may hold envelopes
    pub max_stored_months: u64,
    /// Transactions per renewal cycle
    pub max_transactions: u64,
}

impl Default for FreeTierLimits {
    fn default() -> Self {
        Self {
            max_envelopes_per_cycle: 2,
            max_stored_months: 3,
            max_transactions: 30,
        }
    }
}

/// Pure allow/deny decisions for premium-gated features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureGate {
    limits: FreeTierLimits,
}

impl FeatureGate {
    /// Creates a gate with the given free tier limits.
    #[must_use]
    pub const fn new(limits: FreeTierLimits) -> Self {
        Self { limits }
    }

    /// The configured free tier limits.
    #[must_use]
    pub const fn limits(&self) -> FreeTierLimits {
        self.limits
    }

    /// Another envelope may be created this cycle.
    #[must_use]
    pub const fn can_create_more_envelopes(
        &self,
        current_cycle_count: u64,
        subscribed: bool,
    ) -> bool {
        subscribed || current_cycle_count < self.limits.max_envelopes_per_cycle
    }

    /// Envelopes may be stored for another month.
    ///
    /// `current_month_count` is every renewal cycle that still holds an envelope, old ones
    /// included. Nothing ages out on its own: once the cap is reached a free user opens a
    /// new month only after deleting the envelopes of an older one.
    #[must_use]
    pub const fn can_store_more_months(&self, current_month_count: u64, subscribed: bool) -> bool {
        subscribed || current_month_count < self.limits.max_stored_months
    }

    /// Another transaction may be added.
    #[must_use]
    pub const fn can_add_more_transactions(&self, current_count: u64, subscribed: bool) -> bool {
        subscribed || current_count < self.limits.max_transactions
    }

    /// Cloud sync is premium only.
    #[must_use]
    pub const fn can_use_cloud_sync(&self, subscribed: bool) -> bool {
        subscribed
    }

    /// Persistent envelopes are premium only.
    #[must_use]
    pub const fn can_create_persistent(&self, subscribed: bool) -> bool {
        subscribed
    }

    /// Fails with [`Error::LimitReached`] when envelope creation is denied.
    pub fn ensure_can_create_envelope(
        &self,
        current_cycle_count: u64,
        subscribed: bool,
    ) -> Result<()> {
        if self.can_create_more_envelopes(current_cycle_count, subscribed) {
            return Ok(());
        }
        warn!(current_cycle_count, "free tier envelope limit reached");
        Err(Error::LimitReached {
            feature: "envelopes per cycle",
            limit: self.limits.max_envelopes_per_cycle,
        })
    }

    /// Fails with [`Error::LimitReached`] when a new month of data is denied.
    pub fn ensure_can_store_month(&self, current_month_count: u64, subscribed: bool) -> Result<()> {
        if self.can_store_more_months(current_month_count, subscribed) {
            return Ok(());
        }
        warn!(current_month_count, "free tier stored month limit reached");
        Err(Error::LimitReached {
            feature: "stored months",
            limit: self.limits.max_stored_months,
        })
    }

    /// Fails with [`Error::LimitReached`] when adding a transaction is denied.
    pub fn ensure_can_add_transaction(&self, current_count: u64, subscribed: bool) -> Result<()> {
        if self.can_add_more_transactions(current_count, subscribed) {
            return Ok(());
        }
        warn!(current_count, "free tier transaction limit reached");
        Err(Error::LimitReached {
            feature: "transactions per cycle",
            limit: self.limits.max_transactions,
        })
    }

    /// Fails with [`Error::SubscriptionRequired`] when cloud sync is denied.
    pub fn ensure_can_use_cloud_sync(&self, subscribed: bool) -> Result<()> {
        if self.can_use_cloud_sync(subscribed) {
            return Ok(());
        }
        warn!("cloud sync requested without subscription");
        Err(Error::SubscriptionRequired {
            feature: "cloud sync",
        })
    }

    /// Fails with [`Error::SubscriptionRequired`] when a persistent envelope is denied.
    pub fn ensure_can_create_persistent(&self, subscribed: bool) -> Result<()> {
        if self.can_create_persistent(subscribed) {
            return Ok(());
        }
        warn!("persistent envelope requested without subscription");
        Err(Error::SubscriptionRequired {
            feature: "persistent envelopes",
        })
    }
}

/// Envelopes counted against the per-cycle limit for `key`.
pub async fn count_envelopes_in_cycle<C>(
    db: &C,
    calc: &RenewalCalculator,
    key: CycleKey,
) -> Result<u64>
where
    C: ConnectionTrait,
{
    let envelopes = Envelope::find().all(db).await?;
    let count = envelopes
        .iter()
        .filter(|env| counts_toward_cycle_limit(env, calc, key))
        .count();
    Ok(count as u64)
}

/// Distinct renewal cycles holding at least one envelope.
pub async fn count_stored_cycles<C>(db: &C, calc: &RenewalCalculator) -> Result<u64>
where
    C: ConnectionTrait,
{
    let cycles: BTreeSet<CycleKey> = Envelope::find()
        .all(db)
        .await?
        .iter()
        .map(|env| calc.renewal_cycle(env.created_at.date()))
        .collect();
    Ok(cycles.len() as u64)
}

/// Whether creating something in `key` would open a new stored month.
pub async fn cycle_has_envelopes<C>(db: &C, calc: &RenewalCalculator, key: CycleKey) -> Result<bool>
where
    C: ConnectionTrait,
{
    Ok(count_envelopes_in_cycle(db, calc, key).await? > 0)
}

/// Stamps `now` as the expiration date on every active persistent envelope.
///
/// Envelopes that already carry an expiration date keep it. Returns the number of
/// envelopes expired.
#[instrument(skip(db))]
pub async fn expire_persistent_envelopes<C>(db: &C, now: NaiveDateTime) -> Result<u64>
where
    C: ConnectionTrait,
{
    let result = Envelope::update_many()
        .col_expr(envelope::Column::ExpirationDate, Expr::value(Some(now)))
        .filter(envelope::Column::Kind.eq(EnvelopeKind::Persistent.as_str()))
        .filter(envelope::Column::ExpirationDate.is_null())
        .exec(db)
        .await?;
    info!(expired = result.rows_affected, "expired persistent envelopes");
    Ok(result.rows_affected)
}

/// Clears the expiration date on every persistent envelope.
#[instrument(skip(db))]
pub async fn reactivate_persistent_envelopes<C>(db: &C) -> Result<u64>
where
    C: ConnectionTrait,
{
    let result = Envelope::update_many()
        .col_expr(
            envelope::Column::ExpirationDate,
            Expr::value(Option::<NaiveDateTime>::None),
        )
        .filter(envelope::Column::Kind.eq(EnvelopeKind::Persistent.as_str()))
        .filter(envelope::Column::ExpirationDate.is_not_null())
        .exec(db)
        .await?;
    info!(reactivated = result.rows_affected, "reactivated persistent envelopes");
    Ok(result.rows_affected)
}
