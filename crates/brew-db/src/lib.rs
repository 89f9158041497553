//! # brew-db: Database Layer for Brew POS
//!
//! Durable storage for the settlement engine: the stock ledger, recipes,
//! promotions and coupons, the loyalty ledger, orders and the outbox.
//! SQLite through sqlx; every query is runtime-checked.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Brew POS Data Flow                               │
//! │                                                                         │
//! │  brew-engine (settle_order, adjust_stock, earn_points, ...)            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     brew-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │ UnitOfWork    │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │───►│ one tx, reads │    │  (embedded)  │  │   │
//! │  │   │               │    │ + CAS writes  │    │              │  │   │
//! │  │   │ SqlitePool    │    └───────────────┘    │ 001_init.sql │  │   │
//! │  │   │               │    ┌───────────────┐    └──────────────┘  │   │
//! │  │   │               │───►│ Repositories  │                      │   │
//! │  │   │               │    │ (admin/read)  │                      │   │
//! │  │   └───────────────┘    └───────────────┘                      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database (WAL)                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Per-table repositories and shared SQL functions
//! - [`unit_of_work`] - Transaction used by every ledger-mutating operation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use brew_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/brew.db")).await?;
//!
//! let low = db.ingredients().list_below_minimum().await?;
//!
//! let mut uow = db.begin().await?;
//! let snapshot = uow.settlement_snapshot(&request).await?;
//! // plan in brew-core, then:
//! uow.apply_settlement(&plan).await?;
//! uow.commit().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod unit_of_work;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use unit_of_work::UnitOfWork;

// Repository re-exports for convenience
pub use repository::inventory::IngredientRepository;
pub use repository::member::MemberRepository;
pub use repository::order::OrderRepository;
pub use repository::outbox::{OutboxEntry, OutboxRepository};
pub use repository::point_rule::PointRuleRepository;
pub use repository::product::ProductRepository;
pub use repository::promotion::PromotionRepository;
pub use repository::recipe::RecipeRepository;
pub use repository::reward::RewardRepository;
