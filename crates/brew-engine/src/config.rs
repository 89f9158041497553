//! # Engine Configuration
//!
//! Settings for the settlement engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     BREW_DB_PATH=./brew.db                                             │
//! │     BREW_MAX_ATTEMPTS=5                                                │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/pos/engine.toml (Linux)                                  │
//! │     ~/Library/Application Support/com.brew.pos/engine.toml (macOS)     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # engine.toml
//! [database]
//! path = "/var/lib/brew/brew.db"
//! max_connections = 5
//!
//! [settlement]
//! max_attempts = 3
//! initial_backoff_ms = 20
//! max_backoff_ms = 250
//! invalid_coupon = "abort"   # abort | proceed_without_discount
//! auto_promotions = true
//!
//! [loyalty]
//! point_expiry_days = 365
//! redemption_expiry_days = 30
//! welcome_bonus_points = 10
//!
//! [store]
//! utc_offset_minutes = 420
//! ```

use std::path::PathBuf;
use std::time::Duration;

use brew_core::{InvalidCouponPolicy, LoyaltyPolicy};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

// =============================================================================
// Config Error
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid engine configuration: {0}")]
    Invalid(String),

    #[error("Failed to load config: {0}")]
    LoadFailed(String),

    #[error("Failed to save config: {0}")]
    SaveFailed(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::LoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::LoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(err: toml::ser::Error) -> Self {
        ConfigError::SaveFailed(err.to_string())
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to `brew.db` in the platform data directory.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("com", "brew", "pos")
        .map(|dirs| dirs.data_dir().join("brew.db"))
        .unwrap_or_else(|| PathBuf::from("brew.db"))
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Settlement Settings
// =============================================================================

/// How settlements retry and what they do by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementSettings {
    /// Attempts per operation when a concurrent update is detected,
    /// including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Policy for a refused coupon when the request does not name one.
    #[serde(default)]
    pub invalid_coupon: InvalidCouponPolicy,

    /// Pick the best eligible promotion when neither coupon nor promotion
    /// is given.
    #[serde(default = "default_true")]
    pub auto_promotions: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    20
}

fn default_max_backoff() -> u64 {
    250
}

fn default_true() -> bool {
    true
}

impl Default for SettlementSettings {
    fn default() -> Self {
        SettlementSettings {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            invalid_coupon: InvalidCouponPolicy::default(),
            auto_promotions: true,
        }
    }
}

impl SettlementSettings {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

// =============================================================================
// Loyalty Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoyaltySettings {
    #[serde(default = "default_point_expiry")]
    pub point_expiry_days: i64,

    #[serde(default = "default_redemption_expiry")]
    pub redemption_expiry_days: i64,

    /// Points credited on registration. 0 disables the bonus.
    #[serde(default = "default_welcome_bonus")]
    pub welcome_bonus_points: i64,
}

fn default_point_expiry() -> i64 {
    365
}

fn default_redemption_expiry() -> i64 {
    30
}

fn default_welcome_bonus() -> i64 {
    10
}

impl Default for LoyaltySettings {
    fn default() -> Self {
        LoyaltySettings {
            point_expiry_days: default_point_expiry(),
            redemption_expiry_days: default_redemption_expiry(),
            welcome_bonus_points: default_welcome_bonus(),
        }
    }
}

impl LoyaltySettings {
    pub fn policy(&self) -> LoyaltyPolicy {
        LoyaltyPolicy {
            point_expiry_days: self.point_expiry_days,
            redemption_expiry_days: self.redemption_expiry_days,
            welcome_bonus_points: self.welcome_bonus_points,
        }
    }
}

// =============================================================================
// Store Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Offset of the store's wall clock from UTC, used for happy-hour
    /// windows and order-number dates.
    #[serde(default = "default_utc_offset")]
    pub utc_offset_minutes: i32,
}

fn default_utc_offset() -> i32 {
    420
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            utc_offset_minutes: default_utc_offset(),
        }
    }
}

impl StoreSettings {
    pub fn utc_offset(&self) -> ConfigResult<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            ))
        })
    }
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub settlement: SettlementSettings,

    #[serde(default)]
    pub loyalty: LoyaltySettings,

    #[serde(default)]
    pub store: StoreSettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (engine.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> ConfigResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| ConfigError::SaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::SaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| ConfigError::SaveFailed(e.to_string()))?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be greater than 0".into(),
            ));
        }

        if self.settlement.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_attempts must be greater than 0".into(),
            ));
        }

        if self.settlement.initial_backoff_ms > self.settlement.max_backoff_ms {
            return Err(ConfigError::Invalid(format!(
                "initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.settlement.initial_backoff_ms, self.settlement.max_backoff_ms
            )));
        }

        let loyalty = &self.loyalty;
        if loyalty.point_expiry_days <= 0 || loyalty.redemption_expiry_days <= 0 {
            return Err(ConfigError::Invalid(
                "expiry periods must be at least one day".into(),
            ));
        }
        if loyalty.welcome_bonus_points < 0 {
            return Err(ConfigError::Invalid(
                "welcome_bonus_points cannot be negative".into(),
            ));
        }

        self.store.utc_offset()?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("BREW_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(max) = std::env::var("BREW_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse::<u32>() {
                self.database.max_connections = n;
            }
        }

        if let Ok(attempts) = std::env::var("BREW_MAX_ATTEMPTS") {
            if let Ok(n) = attempts.parse::<u32>() {
                debug!(max_attempts = n, "Overriding settlement attempts from environment");
                self.settlement.max_attempts = n;
            }
        }

        if let Ok(policy) = std::env::var("BREW_INVALID_COUPON") {
            match policy.to_lowercase().as_str() {
                "abort" => self.settlement.invalid_coupon = InvalidCouponPolicy::Abort,
                "proceed_without_discount" | "proceed" => {
                    self.settlement.invalid_coupon = InvalidCouponPolicy::ProceedWithoutDiscount
                }
                _ => warn!(policy = %policy, "Unknown invalid-coupon policy in environment"),
            }
        }

        if let Ok(auto) = std::env::var("BREW_AUTO_PROMOTIONS") {
            if let Ok(flag) = auto.parse::<bool>() {
                self.settlement.auto_promotions = flag;
            }
        }

        if let Ok(offset) = std::env::var("BREW_UTC_OFFSET_MINUTES") {
            if let Ok(minutes) = offset.parse::<i32>() {
                self.store.utc_offset_minutes = minutes;
            }
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "brew", "pos")
            .map(|dirs| dirs.config_dir().join("engine.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.settlement.max_attempts, 3);
        assert_eq!(config.settlement.invalid_coupon, InvalidCouponPolicy::Abort);
        assert!(config.settlement.auto_promotions);
        assert_eq!(config.loyalty.policy(), LoyaltyPolicy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [settlement]
            max_attempts = 5
            invalid_coupon = "proceed_without_discount"

            [store]
            utc_offset_minutes = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.settlement.max_attempts, 5);
        assert_eq!(
            config.settlement.invalid_coupon,
            InvalidCouponPolicy::ProceedWithoutDiscount
        );
        assert_eq!(config.settlement.max_backoff_ms, 250);
        assert_eq!(config.loyalty.point_expiry_days, 365);
        assert_eq!(config.store.utc_offset().unwrap().local_minus_utc(), 0);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();

        config.settlement.max_attempts = 0;
        assert!(config.validate().is_err());
        config.settlement.max_attempts = 3;

        config.settlement.initial_backoff_ms = 1_000;
        assert!(config.validate().is_err());
        config.settlement.initial_backoff_ms = 20;

        config.store.utc_offset_minutes = 24 * 60;
        assert!(config.validate().is_err());
        config.store.utc_offset_minutes = -300;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_serialization() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[settlement]"));
        assert!(toml_str.contains("invalid_coupon = \"abort\""));
    }
}
