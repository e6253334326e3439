//! Operator configuration.
//!
//! Every operation reads one immutable [`AccessConfig`] snapshot from a
//! [`ConfigHandle`] at its start. Replacing the configuration never changes
//! what an in-flight operation sees.

use crate::error::{AccessError, AccessResult};
use chrono::format::{Item, StrftimeItems};
use chrono::Duration;
use momenty_types::{ProductId, PurchaseCompleted};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

/// Shortest token length accepted.
pub const MIN_TOKEN_LENGTH: usize = 6;

/// Longest token length accepted.
pub const MAX_TOKEN_LENGTH: usize = 32;

/// Upper bound for `access_duration_days` and `reminder_threshold_days`.
pub const MAX_ACCESS_DAYS: u32 = 36_500;

/// Upper bound for `pending_token_ttl_hours`.
pub const MAX_PENDING_TOKEN_TTL_HOURS: u32 = 24 * 365;

/// Access-lifecycle settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Products whose purchase grants access. Empty grants nothing.
    pub allowed_products: Vec<ProductId>,
    /// Days added per qualifying purchase.
    pub access_duration_days: u32,
    /// Whole days before expiry at which the reminder goes out.
    pub reminder_threshold_days: u32,
    /// Characters per generated token.
    pub token_length: usize,
    /// How long a reserved token waits for its purchase.
    pub pending_token_ttl_hours: u32,
    /// Page serving the content; the token is appended as a query parameter.
    pub access_url: String,
    /// Where reminder recipients go to buy again.
    pub renewal_url: String,
    /// chrono format for `{EXPIRES}`.
    pub date_format: String,
    pub welcome_subject: String,
    pub reminder_subject: String,
    /// Empty disables welcome emails.
    pub welcome_template: String,
    /// Empty disables reminder emails.
    pub reminder_template: String,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            allowed_products: Vec::new(),
            access_duration_days: 30,
            reminder_threshold_days: 5,
            token_length: MIN_TOKEN_LENGTH,
            pending_token_ttl_hours: 72,
            access_url: String::new(),
            renewal_url: String::new(),
            date_format: "%Y-%m-%d".to_string(),
            welcome_subject: "Your access is ready".to_string(),
            reminder_subject: "Your access expires soon".to_string(),
            welcome_template: String::new(),
            reminder_template: String::new(),
        }
    }
}

impl AccessConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(source: &str) -> AccessResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| AccessError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> AccessResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| AccessError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Checks ranges and the date format.
    pub fn validate(&self) -> AccessResult<()> {
        check_range("access_duration_days", self.access_duration_days, 1, MAX_ACCESS_DAYS)?;
        check_range(
            "reminder_threshold_days",
            self.reminder_threshold_days,
            1,
            MAX_ACCESS_DAYS,
        )?;
        check_range(
            "pending_token_ttl_hours",
            self.pending_token_ttl_hours,
            1,
            MAX_PENDING_TOKEN_TTL_HOURS,
        )?;
        if !(MIN_TOKEN_LENGTH..=MAX_TOKEN_LENGTH).contains(&self.token_length) {
            return Err(AccessError::Config(format!(
                "token_length must be between {MIN_TOKEN_LENGTH} and {MAX_TOKEN_LENGTH}, got {}",
                self.token_length
            )));
        }
        if StrftimeItems::new(&self.date_format).any(|item| matches!(item, Item::Error)) {
            return Err(AccessError::Config(format!(
                "invalid date_format {:?}",
                self.date_format
            )));
        }
        Ok(())
    }

    /// Returns true if the purchase contains an allow-listed product.
    #[must_use]
    pub fn qualifies(&self, event: &PurchaseCompleted) -> bool {
        event.contains_any(&self.allowed_products)
    }

    /// Validity added by one purchase.
    #[must_use]
    pub fn access_duration(&self) -> Duration {
        Duration::days(i64::from(self.access_duration_days))
    }

    /// Lifetime of an unconsumed token reservation.
    #[must_use]
    pub fn pending_token_ttl(&self) -> Duration {
        Duration::hours(i64::from(self.pending_token_ttl_hours))
    }
}

fn check_range(name: &str, value: u32, min: u32, max: u32) -> AccessResult<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(AccessError::Config(format!(
            "{name} must be between {min} and {max}, got {value}"
        )))
    }
}

/// Shared, replaceable configuration.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    current: Arc<RwLock<Arc<AccessConfig>>>,
}

impl ConfigHandle {
    /// Validates and wraps the initial configuration.
    pub fn new(config: AccessConfig) -> AccessResult<Self> {
        config.validate()?;
        Ok(Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
        })
    }

    /// Returns the configuration in force right now.
    #[must_use]
    pub fn snapshot(&self) -> Arc<AccessConfig> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Validates and installs a new configuration.
    pub fn replace(&self, config: AccessConfig) -> AccessResult<()> {
        config.validate()?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
        Ok(())
    }
}
