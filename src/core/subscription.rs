//! Subscription tier tracking and store integration.
//!
//! The store itself sits behind [`StoreClient`]. The service derives the best active tier
//! from the store's entitlements, remembers the last known tier in `system_state`, and
//! applies the persistent envelope side effects when the user crosses between free and
//! subscribed.

use crate::{
    core::{
        feature_gate::{expire_persistent_envelopes, reactivate_persistent_envelopes},
        settings,
    },
    errors::{Error, Result},
};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use tracing::{error, info, instrument, warn};

/// Store product id of the monthly plan.
pub const MONTHLY_PRODUCT_ID: &str = "premium.monthly";
/// Store product id of the yearly plan.
pub const YEARLY_PRODUCT_ID: &str = "premium.yearly";
/// Store product id of the lifetime purchase.
pub const LIFETIME_PRODUCT_ID: &str = "premium.lifetime";

/// Settings key holding the last applied tier.
pub const SUBSCRIPTION_TIER_KEY: &str = "subscription_tier";

/// Subscription level. Ordering follows priority, so `max` picks the best tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    /// No active entitlement
    #[default]
    Free,
    /// Monthly auto-renewing plan
    Monthly,
    /// Yearly auto-renewing plan
    Yearly,
    /// One-time purchase
    Lifetime,
}

impl SubscriptionTier {
    /// Stored representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
            Self::Lifetime => "lifetime",
        }
    }

    /// Any paid tier.
    #[must_use]
    pub const fn is_subscribed(self) -> bool {
        !matches!(self, Self::Free)
    }

    /// Tier granted by a store product, `None` for unknown products.
    #[must_use]
    pub fn for_product(product_id: &str) -> Option<Self> {
        match product_id {
            MONTHLY_PRODUCT_ID => Some(Self::Monthly),
            YEARLY_PRODUCT_ID => Some(Self::Yearly),
            LIFETIME_PRODUCT_ID => Some(Self::Lifetime),
            _ => None,
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "free" => Ok(Self::Free),
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            "lifetime" => Ok(Self::Lifetime),
            other => Err(Error::CorruptValue {
                field: SUBSCRIPTION_TIER_KEY,
                value: other.to_string(),
            }),
        }
    }
}

/// Outcome of the store's signature check on an entitlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Signature checked out
    Verified,
    /// Signature check failed
    Unverified {
        /// Store-provided reason
        reason: String,
    },
}

/// A purchase the store says the user owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entitlement {
    /// Store product id
    pub product_id: String,
    /// Expiry for auto-renewing plans; `None` for lifetime
    pub expires_at: Option<NaiveDateTime>,
    /// Refunded or revoked by the store
    pub revoked: bool,
    /// Signature check result
    pub verification: Verification,
}

impl Entitlement {
    /// Not revoked and not past its expiry.
    #[must_use]
    pub fn is_active(&self, now: NaiveDateTime) -> bool {
        !self.revoked && self.expires_at.is_none_or(|expiry| expiry > now)
    }
}

/// A product offered by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    /// Store product id
    pub id: String,
    /// Localized name
    pub display_name: String,
    /// Localized price string
    pub display_price: String,
}

/// Result of a purchase attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseOutcome {
    /// Purchase completed
    Purchased(Entitlement),
    /// User backed out
    Cancelled,
    /// Awaiting approval (e.g. parental consent)
    Pending,
}

/// Store backend.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Entitlements the store currently reports for the user.
    async fn current_entitlements(&self) -> Result<Vec<Entitlement>>;

    /// Product metadata for the given ids.
    async fn products(&self, ids: &[&str]) -> Result<Vec<Product>>;

    /// Starts a purchase.
    async fn purchase(&self, product_id: &str) -> Result<PurchaseOutcome>;

    /// Re-syncs past purchases with the store.
    async fn restore(&self) -> Result<()>;

    /// Acknowledges a verified transaction so the store stops redelivering it.
    async fn finish(&self, entitlement: &Entitlement) -> Result<()>;
}

/// Rejects an entitlement whose signature failed. Such a transaction is never finished.
fn ensure_verified(entitlement: &Entitlement) -> Result<()> {
    match &entitlement.verification {
        Verification::Verified => Ok(()),
        Verification::Unverified { reason } => {
            error!(
                product_id = %entitlement.product_id,
                %reason,
                "unverified entitlement, not finishing"
            );
            Err(Error::UnverifiedEntitlement {
                product_id: entitlement.product_id.clone(),
                reason: reason.clone(),
            })
        }
    }
}

async fn finish_verified(store: &dyn StoreClient, entitlement: &Entitlement) -> Result<()> {
    ensure_verified(entitlement)?;
    store.finish(entitlement).await.inspect_err(|e| {
        error!(error = %e, product_id = %entitlement.product_id, "failed to finish transaction");
    })
}

/// Best tier among the verified, active entitlements.
///
/// Unverified entitlements are logged and ignored, as are products this app doesn't sell.
#[must_use]
pub fn best_tier(entitlements: &[Entitlement], now: NaiveDateTime) -> SubscriptionTier {
    entitlements
        .iter()
        .filter(|ent| match &ent.verification {
            Verification::Verified => true,
            Verification::Unverified { reason } => {
                error!(product_id = %ent.product_id, %reason, "ignoring unverified entitlement");
                false
            }
        })
        .filter(|ent| ent.is_active(now))
        .filter_map(|ent| {
            let tier = SubscriptionTier::for_product(&ent.product_id);
            if tier.is_none() {
                warn!(product_id = %ent.product_id, "entitlement for unknown product");
            }
            tier
        })
        .max()
        .unwrap_or_default()
}

/// What a tier change did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierChange {
    /// Tier before the change
    pub from: SubscriptionTier,
    /// Tier after the change
    pub to: SubscriptionTier,
    /// Persistent envelopes expired or reactivated
    pub envelopes_affected: u64,
}

/// Tracks the user's tier and applies transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionService {
    tier: SubscriptionTier,
}

impl SubscriptionService {
    /// Service starting at the given tier.
    #[must_use]
    pub const fn new(tier: SubscriptionTier) -> Self {
        Self { tier }
    }

    /// Restores the last applied tier, so a lapse while the app was closed is still seen
    /// as a transition on the next refresh.
    pub async fn load(db: &DatabaseConnection) -> Result<Self> {
        let tier = match settings::get_value(db, SUBSCRIPTION_TIER_KEY).await? {
            Some(raw) => raw.parse()?,
            None => SubscriptionTier::Free,
        };
        Ok(Self { tier })
    }

    /// Current tier.
    #[must_use]
    pub const fn tier(&self) -> SubscriptionTier {
        self.tier
    }

    /// Any paid tier is active.
    #[must_use]
    pub const fn is_subscribed(&self) -> bool {
        self.tier.is_subscribed()
    }

    /// Moves to `new_tier`.
    ///
    /// Losing a subscription expires persistent envelopes as of `now`; regaining one
    /// clears every expiration. Moving between paid tiers, or staying free, touches no
    /// envelopes. The tier is persisted in the same DB transaction.
    #[instrument(skip(self, db))]
    pub async fn apply_tier(
        &mut self,
        db: &DatabaseConnection,
        new_tier: SubscriptionTier,
        now: NaiveDateTime,
    ) -> Result<TierChange> {
        let from = self.tier;
        let txn = db.begin().await?;

        let envelopes_affected = match (from.is_subscribed(), new_tier.is_subscribed()) {
            (true, false) => expire_persistent_envelopes(&txn, now).await?,
            (false, true) => reactivate_persistent_envelopes(&txn).await?,
            _ => 0,
        };
        settings::set_value(&txn, SUBSCRIPTION_TIER_KEY, new_tier.as_str()).await?;
        txn.commit().await?;

        self.tier = new_tier;
        if from != new_tier {
            info!(%from, to = %new_tier, envelopes_affected, "subscription tier changed");
        }

        Ok(TierChange {
            from,
            to: new_tier,
            envelopes_affected,
        })
    }

    /// Re-reads entitlements from the store and applies the resulting tier.
    pub async fn refresh(
        &mut self,
        db: &DatabaseConnection,
        store: &dyn StoreClient,
        now: NaiveDateTime,
    ) -> Result<TierChange> {
        let entitlements = store
            .current_entitlements()
            .await
            .inspect_err(|e| error!(error = %e, "failed to fetch entitlements"))?;
        let tier = best_tier(&entitlements, now);
        self.apply_tier(db, tier, now).await
    }

    /// Buys a product, finishes the verified transaction, then refreshes the tier.
    ///
    /// A purchase whose entitlement fails verification is reported as
    /// [`Error::UnverifiedEntitlement`], is not finished and grants nothing.
    #[instrument(skip(self, db, store))]
    pub async fn purchase(
        &mut self,
        db: &DatabaseConnection,
        store: &dyn StoreClient,
        product_id: &str,
        now: NaiveDateTime,
    ) -> Result<PurchaseOutcome> {
        let outcome = store
            .purchase(product_id)
            .await
            .inspect_err(|e| error!(error = %e, product_id, "purchase failed"))?;

        match &outcome {
            PurchaseOutcome::Purchased(ent) => {
                finish_verified(store, ent).await?;
                self.refresh(db, store, now).await?;
            }
            PurchaseOutcome::Cancelled => info!(product_id, "purchase cancelled"),
            PurchaseOutcome::Pending => info!(product_id, "purchase pending"),
        }

        Ok(outcome)
    }

    /// Handles one transaction pushed by the store's update stream: verify, finish, then
    /// re-derive the tier from the store's current entitlements.
    #[instrument(skip(self, db, store, entitlement), fields(product_id = %entitlement.product_id))]
    pub async fn apply_entitlement_update(
        &mut self,
        db: &DatabaseConnection,
        store: &dyn StoreClient,
        entitlement: &Entitlement,
        now: NaiveDateTime,
    ) -> Result<TierChange> {
        finish_verified(store, entitlement).await?;
        self.refresh(db, store, now).await
    }

    /// Restores past purchases, then refreshes the tier.
    pub async fn restore(
        &mut self,
        db: &DatabaseConnection,
        store: &dyn StoreClient,
        now: NaiveDateTime,
    ) -> Result<TierChange> {
        store
            .restore()
            .await
            .inspect_err(|e| error!(error = %e, "restore failed"))?;
        self.refresh(db, store, now).await
    }
}

/// Products for sale, ordered monthly, yearly, lifetime.
pub async fn load_products(store: &dyn StoreClient) -> Result<Vec<Product>> {
    let mut products = store
        .products(&[MONTHLY_PRODUCT_ID, YEARLY_PRODUCT_ID, LIFETIME_PRODUCT_ID])
        .await
        .inspect_err(|e| error!(error = %e, "failed to load products"))?;
    products.sort_by_key(|product| SubscriptionTier::for_product(&product.id));
    Ok(products)
}
