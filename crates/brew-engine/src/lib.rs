//! # brew-engine: Order Settlement Engine for Brew POS
//!
//! Orchestrates the pure engines of `brew-core` against the transactional
//! store of `brew-db`.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Engine Operations                              │
//! │                                                                         │
//! │  settle_order ─────┐                                                   │
//! │  adjust_stock ─────┤         ┌───────────────────────────────────┐     │
//! │  earn_points ──────┤         │ with_conflict_retry               │     │
//! │  redeem_points ────┼────────►│   begin ─► snapshot ─► plan ─►    │     │
//! │  register_member ──┤         │   CAS writes ─► commit            │     │
//! │  expire_points ────┘         └───────────────────────────────────┘     │
//! │                                                                         │
//! │  calculate_discount ────────► begin ─► snapshot ─► quote ─► rollback   │
//! │  audit_ledgers ─────────────► replay every ledger, compare caches      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`settlement`] - `settle_order`
//! - [`stock`] - `adjust_stock`, recipes, low-stock report
//! - [`discount`] - `calculate_discount` preview
//! - [`loyalty`] - `earn_points`, `redeem_points`, registration, expiry
//! - [`audit`] - ledger replay against cached balances
//! - [`retry`] - conflict retry with exponential backoff
//! - [`config`] - `engine.toml` + `BREW_*` overrides
//! - [`error`] - `EngineError` and `ErrorCode`
//! - [`telemetry`] - tracing subscriber setup
//!
//! ## Usage
//! ```rust,ignore
//! use brew_core::{OrderLine, SettleOrderRequest};
//! use brew_engine::{Engine, EngineConfig};
//!
//! let engine = Engine::open(EngineConfig::load(None)?).await?;
//! let settled = engine
//!     .settle_order(
//!         SettleOrderRequest::new(vec![OrderLine::new("latte", 2)])
//!             .coupon("WELCOME20")
//!             .member(member_id),
//!     )
//!     .await?;
//! println!("{} total {}", settled.order.order_number, settled.order.total);
//! ```

pub mod audit;
pub mod config;
pub mod discount;
pub mod error;
pub mod loyalty;
pub mod retry;
pub mod settlement;
pub mod stock;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_support;

pub use audit::{AuditReport, LedgerDrift, LedgerKind};
pub use config::{ConfigError, EngineConfig};
pub use discount::{DiscountPreview, DiscountRequest};
pub use error::{EngineError, EngineResult, ErrorCode, ErrorReport};
pub use loyalty::{ExpiryRun, PointsEarned};
pub use retry::{with_conflict_retry, RetryPolicy};
pub use settlement::SettledOrder;

use brew_core::{LoyaltyPolicy, SettlementContext};
use brew_db::{Database, DbConfig};
use chrono::{DateTime, FixedOffset, Utc};
use tracing::info;

/// The settlement engine. Cheap to clone; clones share the pool.
///
/// Holds no global state: every operation goes through the [`Database`]
/// handed in at construction.
#[derive(Debug, Clone)]
pub struct Engine {
    db: Database,
    config: EngineConfig,
    retry: RetryPolicy,
    utc_offset: FixedOffset,
}

impl Engine {
    /// Wraps an open database.
    ///
    /// ## Errors
    /// `Config` when `config` does not validate.
    pub fn new(db: Database, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let utc_offset = config.store.utc_offset()?;
        let retry = RetryPolicy::from(&config.settlement);
        Ok(Engine {
            db,
            config,
            retry,
            utc_offset,
        })
    }

    /// Opens (creating and migrating if needed) the configured database.
    pub async fn open(config: EngineConfig) -> EngineResult<Self> {
        let path = &config.database.path;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(ConfigError::from)?;
        }

        info!(path = %path.display(), "Opening settlement database");
        let db = Database::new(
            DbConfig::new(path).max_connections(config.database.max_connections),
        )
        .await?;
        Engine::new(db, config)
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn loyalty_policy(&self) -> LoyaltyPolicy {
        self.config.loyalty.policy()
    }

    pub(crate) fn settlement_context(&self, now: DateTime<Utc>) -> SettlementContext {
        SettlementContext {
            now,
            utc_offset: self.utc_offset,
            loyalty: self.loyalty_policy(),
            auto_promotions: self.config.settlement.auto_promotions,
            invalid_coupon: self.config.settlement.invalid_coupon,
        }
    }
}
