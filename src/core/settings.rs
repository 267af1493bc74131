//! Persisted application settings.
//!
//! Settings live in the `system_state` key-value table: renewal day, currency code, cloud
//! sync flag and language. Missing keys fall back to the defaults from `config.toml`.

use crate::{
    config::app::SettingsDefaults,
    core::renewal::RenewalDay,
    entities::{SystemState, system_state},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{Set, prelude::*};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Key for the renewal day (integer, 0 = last day of month)
pub const RENEWAL_DAY_KEY: &str = "renewal_day";
/// Key for the ISO 4217 currency code
pub const CURRENCY_CODE_KEY: &str = "currency_code";
/// Key for the cloud sync flag (`"true"`/`"false"`)
pub const CLOUD_SYNC_KEY: &str = "cloud_sync_enabled";
/// Key for the UI language code
pub const LANGUAGE_KEY: &str = "language";

/// Snapshot of all persisted settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    /// Day each renewal cycle starts
    pub renewal_day: RenewalDay,
    /// Selected currency code (e.g., "KRW", "USD")
    pub currency_code: String,
    /// Whether cloud sync is switched on
    pub cloud_sync_enabled: bool,
    /// Selected language code (e.g., "ko", "en")
    pub language: String,
}

/// Reads a raw value from the key-value store.
pub async fn get_value<C>(db: &C, key: &str) -> Result<Option<String>>
where
    C: ConnectionTrait,
{
    let state = SystemState::find()
        .filter(system_state::Column::Key.eq(key))
        .one(db)
        .await?;
    Ok(state.map(|s| s.value))
}

/// Inserts or updates a raw value in the key-value store.
pub async fn set_value<C>(db: &C, key: &str, value: &str) -> Result<()>
where
    C: ConnectionTrait,
{
    let now = Utc::now().naive_utc();

    let existing = SystemState::find()
        .filter(system_state::Column::Key.eq(key))
        .one(db)
        .await?;

    if let Some(state) = existing {
        let mut active_model: system_state::ActiveModel = state.into();
        active_model.value = Set(value.to_string());
        active_model.updated_at = Set(now);
        active_model.update(db).await?;
    } else {
        let new_state = system_state::ActiveModel {
            key: Set(key.to_string()),
            value: Set(value.to_string()),
            updated_at: Set(now),
            ..Default::default()
        };
        new_state.insert(db).await?;
    }

    debug!(key, value, "stored setting");
    Ok(())
}

/// Loads the renewal day, clamping legacy out-of-range values.
pub async fn get_renewal_day<C>(db: &C, default: RenewalDay) -> Result<RenewalDay>
where
    C: ConnectionTrait,
{
    let Some(raw) = get_value(db, RENEWAL_DAY_KEY).await? else {
        return Ok(default);
    };
    raw.trim()
        .parse::<i64>()
        .map(RenewalDay::from_stored)
        .map_err(|e| {
            warn!(raw = %raw, error = %e, "unreadable renewal day");
            Error::CorruptValue {
                field: RENEWAL_DAY_KEY,
                value: raw.clone(),
            }
        })
}

/// Persists the renewal day. Existing envelopes and transactions are not re-bucketed.
pub async fn set_renewal_day<C>(db: &C, day: RenewalDay) -> Result<()>
where
    C: ConnectionTrait,
{
    set_value(db, RENEWAL_DAY_KEY, &day.to_stored().to_string()).await?;
    info!(%day, "renewal day changed");
    Ok(())
}

/// Persists the cloud sync flag. Gating happens in the caller.
pub async fn set_cloud_sync_enabled<C>(db: &C, enabled: bool) -> Result<()>
where
    C: ConnectionTrait,
{
    set_value(db, CLOUD_SYNC_KEY, if enabled { "true" } else { "false" }).await
}

/// Persists the currency code after basic validation.
pub async fn set_currency_code<C>(db: &C, code: &str) -> Result<()>
where
    C: ConnectionTrait,
{
    let code = code.trim().to_ascii_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(Error::Validation {
            message: format!("Invalid currency code '{code}'"),
        });
    }
    set_value(db, CURRENCY_CODE_KEY, &code).await
}

/// Persists the language code.
pub async fn set_language<C>(db: &C, language: &str) -> Result<()>
where
    C: ConnectionTrait,
{
    let language = language.trim();
    if language.is_empty() {
        return Err(Error::Validation {
            message: "Language cannot be empty".to_string(),
        });
    }
    set_value(db, LANGUAGE_KEY, language).await
}

/// Loads every setting, using `defaults` for keys that were never written.
pub async fn load_settings<C>(db: &C, defaults: &SettingsDefaults) -> Result<AppSettings>
where
    C: ConnectionTrait,
{
    let renewal_day =
        get_renewal_day(db, RenewalDay::from_stored(defaults.renewal_day)).await?;
    let currency_code = get_value(db, CURRENCY_CODE_KEY)
        .await?
        .unwrap_or_else(|| defaults.currency_code.clone());
    let cloud_sync_enabled = match get_value(db, CLOUD_SYNC_KEY).await?.as_deref() {
        Some("true") => true,
        Some("false") => false,
        Some(other) => {
            warn!(value = other, "unreadable cloud sync flag, treating as disabled");
            false
        }
        None => defaults.cloud_sync_enabled,
    };
    let language = get_value(db, LANGUAGE_KEY)
        .await?
        .unwrap_or_else(|| defaults.language.clone());

    Ok(AppSettings {
        renewal_day,
        currency_code,
        cloud_sync_enabled,
        language,
    })
}
