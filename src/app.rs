//! Application context.
//!
//! [`App`] owns the database connection, the loaded settings, the subscription service and
//! the feature gate. Front ends construct one at launch and route every user action
//! through it so free tier limits are applied consistently.

use crate::{
    config::app::AppConfig,
    core::{
        envelope::{self, NewEnvelope},
        feature_gate::{
            FeatureGate, count_envelopes_in_cycle, count_stored_cycles, cycle_has_envelopes,
        },
        materializer::{MaterializationResult, materialize_recurring},
        renewal::{CycleKey, RenewalCalculator, RenewalDay},
        settings::{self, AppSettings},
        subscription::{
            Entitlement, PurchaseOutcome, StoreClient, SubscriptionService, TierChange,
        },
        transaction::{self, NewTransaction, count_transactions_in_cycle},
    },
    entities::{
        EnvelopeKind, envelope::Model as EnvelopeModel, transaction::Model as TransactionModel,
    },
    errors::Result,
};
use chrono::NaiveDateTime;
use sea_orm::DatabaseConnection;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, instrument, warn};

/// Shared state for every user action.
pub struct App {
    /// Database connection for all database operations
    pub database: DatabaseConnection,
    settings: AppSettings,
    subscription: SubscriptionService,
    gate: FeatureGate,
}

impl App {
    /// Loads settings and the last known subscription tier.
    pub async fn open(database: DatabaseConnection, config: &AppConfig) -> Result<Self> {
        let settings = settings::load_settings(&database, &config.settings).await?;
        let subscription = SubscriptionService::load(&database).await?;
        info!(
            renewal_day = %settings.renewal_day,
            tier = %subscription.tier(),
            "app context ready"
        );
        Ok(Self {
            database,
            settings,
            subscription,
            gate: FeatureGate::new(config.free_tier),
        })
    }

    /// Current settings snapshot.
    #[must_use]
    pub const fn settings(&self) -> &AppSettings {
        &self.settings
    }

    /// Subscription state.
    #[must_use]
    pub const fn subscription(&self) -> &SubscriptionService {
        &self.subscription
    }

    /// Free tier gate.
    #[must_use]
    pub const fn gate(&self) -> &FeatureGate {
        &self.gate
    }

    /// Calculator for the configured renewal day.
    #[must_use]
    pub const fn calculator(&self) -> RenewalCalculator {
        RenewalCalculator::new(self.settings.renewal_day)
    }

    /// Renewal cycle `now` falls in.
    #[must_use]
    pub fn current_cycle(&self, now: NaiveDateTime) -> CycleKey {
        self.calculator().renewal_cycle(now.date())
    }

    /// Runs on every launch or foreground; materializes this month's recurring items.
    pub async fn activate(&self, now: NaiveDateTime) -> Result<MaterializationResult> {
        materialize_recurring(&self.database, now)
            .await
            .inspect_err(|e| error!(error = %e, "activation failed"))
    }

    /// Creates an envelope if the free tier allows it.
    ///
    /// Persistent envelopes need a subscription. Besides the per-cycle cap, the first
    /// envelope of a cycle opens a new stored month and is checked against the stored
    /// month cap.
    #[instrument(skip(self))]
    pub async fn create_envelope(
        &self,
        new: NewEnvelope,
        now: NaiveDateTime,
    ) -> Result<EnvelopeModel> {
        let calc = self.calculator();
        let key = calc.renewal_cycle(now.date());
        let subscribed = self.subscription.is_subscribed();

        if new.kind == EnvelopeKind::Persistent {
            self.gate.ensure_can_create_persistent(subscribed)?;
        }

        let count = count_envelopes_in_cycle(&self.database, &calc, key)
            .await
            .inspect_err(|e| error!(error = %e, cycle = %key, "failed to count envelopes"))?;
        self.gate.ensure_can_create_envelope(count, subscribed)?;

        let has_envelopes = cycle_has_envelopes(&self.database, &calc, key)
            .await
            .inspect_err(|e| error!(error = %e, cycle = %key, "failed to check cycle"))?;
        if !has_envelopes {
            let stored = count_stored_cycles(&self.database, &calc)
                .await
                .inspect_err(|e| error!(error = %e, "failed to count stored months"))?;
            self.gate.ensure_can_store_month(stored, subscribed)?;
        }

        envelope::create_envelope(&self.database, &calc, new, now)
            .await
            .inspect_err(|e| error!(error = %e, "failed to create envelope"))
    }

    /// Adds a transaction if the free tier allows it.
    #[instrument(skip(self))]
    pub async fn add_transaction(
        &self,
        new: NewTransaction,
        now: NaiveDateTime,
    ) -> Result<TransactionModel> {
        let calc = self.calculator();
        let key = calc.renewal_cycle(now.date());

        let count = count_transactions_in_cycle(&self.database, &calc, key)
            .await
            .inspect_err(|e| error!(error = %e, cycle = %key, "failed to count transactions"))?;
        self.gate.ensure_can_add_transaction(count, self.subscription.is_subscribed())?;

        transaction::create_transaction(&self.database, new)
            .await
            .inspect_err(|e| error!(error = %e, "failed to create transaction"))
    }

    /// Turns cloud sync on or off. Turning it on requires a subscription.
    pub async fn set_cloud_sync(&mut self, enabled: bool) -> Result<()> {
        if enabled {
            self.gate.ensure_can_use_cloud_sync(self.subscription.is_subscribed())?;
        }
        settings::set_cloud_sync_enabled(&self.database, enabled).await?;
        self.settings.cloud_sync_enabled = enabled;
        Ok(())
    }

    /// Changes the renewal day. Stored envelopes are not re-bucketed.
    pub async fn set_renewal_day(&mut self, day: RenewalDay) -> Result<()> {
        settings::set_renewal_day(&self.database, day).await?;
        self.settings.renewal_day = day;
        Ok(())
    }

    /// Re-reads the subscription from the store.
    pub async fn refresh_subscription(
        &mut self,
        store: &dyn StoreClient,
        now: NaiveDateTime,
    ) -> Result<TierChange> {
        let change = self.subscription.refresh(&self.database, store, now).await?;
        self.after_tier_change().await?;
        Ok(change)
    }

    /// Buys a subscription product.
    pub async fn purchase(
        &mut self,
        store: &dyn StoreClient,
        product_id: &str,
        now: NaiveDateTime,
    ) -> Result<PurchaseOutcome> {
        let outcome = self
            .subscription
            .purchase(&self.database, store, product_id, now)
            .await?;
        self.after_tier_change().await?;
        Ok(outcome)
    }

    /// Handles one transaction pushed by the store.
    pub async fn handle_entitlement_update(
        &mut self,
        store: &dyn StoreClient,
        entitlement: &Entitlement,
        now: NaiveDateTime,
    ) -> Result<TierChange> {
        let change = self
            .subscription
            .apply_entitlement_update(&self.database, store, entitlement, now)
            .await?;
        self.after_tier_change().await?;
        Ok(change)
    }

    /// Consumes store updates until the sending side is dropped at shutdown.
    ///
    /// A failed update is logged and skipped; the next update or a manual restore picks
    /// it up again. Returns how many updates were applied.
    pub async fn listen_for_entitlements<F>(
        &mut self,
        store: &dyn StoreClient,
        mut updates: UnboundedReceiver<Entitlement>,
        clock: F,
    ) -> u64
    where
        F: Fn() -> NaiveDateTime + Send,
    {
        let mut applied = 0;
        while let Some(entitlement) = updates.recv().await {
            match self.handle_entitlement_update(store, &entitlement, clock()).await {
                Ok(_) => applied += 1,
                Err(e) => warn!(
                    error = %e,
                    product_id = %entitlement.product_id,
                    "skipping entitlement update"
                ),
            }
        }
        info!(applied, "entitlement listener stopped");
        applied
    }

    /// Restores past purchases.
    pub async fn restore_purchases(
        &mut self,
        store: &dyn StoreClient,
        now: NaiveDateTime,
    ) -> Result<TierChange> {
        let change = self.subscription.restore(&self.database, store, now).await?;
        self.after_tier_change().await?;
        Ok(change)
    }

    // Cloud sync can't stay on without a subscription.
    async fn after_tier_change(&mut self) -> Result<()> {
        if !self.subscription.is_subscribed() && self.settings.cloud_sync_enabled {
            info!("subscription inactive, disabling cloud sync");
            self.set_cloud_sync(false).await?;
        }
        Ok(())
    }
}
