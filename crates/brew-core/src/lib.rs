//! # brew-core: Pure Settlement Logic for Brew POS
//!
//! This crate is the **heart** of the Brew POS order settlement engine. It
//! contains every business rule as a pure function with zero I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Brew POS Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 brew-engine (orchestration)                     │   │
//! │  │    settle_order, adjust_stock, calculate_discount, loyalty ops  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ brew-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │ inventory │  │  recipe   │  │ promotion │  │  loyalty  │  │   │
//! │  │   │  Stock    │  │  Recipe   │  │ Eligible  │  │ Accrual   │  │   │
//! │  │   │  Ledger   │  │  Book     │  │ SelectBest│  │ Tiers     │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                  ┌───────────────────────────┐                 │   │
//! │  │                  │ settlement (planner/UoW)  │                 │   │
//! │  │                  └───────────────────────────┘                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK • PURE FUNCTIONS             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    brew-db (Database Layer)                     │   │
//! │  │        SQLite queries, migrations, repositories, UnitOfWork     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - Money and Rate types with integer arithmetic
//! - [`quantity`] - Fixed-point ingredient quantities
//! - [`inventory`] - Ingredients and the stock ledger
//! - [`recipe`] - Recipe resolution and demand aggregation
//! - [`promotion`] - Promotions, coupons and discount selection
//! - [`loyalty`] - Members, point ledger, rules, rewards and tiers
//! - [`order`] - Products, orders and line pricing
//! - [`settlement`] - The settlement planner that produces one unit of work
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use brew_core::money::{Money, Rate};
//!
//! let total = Money::from_major(300);
//! let discount = total.percentage(Rate::from_percent(20));
//! assert_eq!(discount, Money::from_major(60));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod inventory;
pub mod loyalty;
pub mod money;
pub mod order;
pub mod promotion;
pub mod quantity;
pub mod recipe;
pub mod settlement;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, CouponRejection, ValidationError};
pub use inventory::{Ingredient, StockDirection, StockMovement, StockPosting};
pub use loyalty::{
    ExpiryPosting, LoyaltyPolicy, LoyaltyPosting, Member, NewMember, PointBalances, PointHistory,
    PointKind, PointRule, PointRuleKind, RedemptionPosting, RedemptionStatus, Reward,
    RewardRedemption, Tier, TierUpgrade,
};
pub use money::{Money, Rate};
pub use order::{Order, OrderItem, OrderLine, OrderStatus, PricedLine, Product};
pub use promotion::{
    Coupon, CouponRedemption, DiscountQuote, Promotion, PromotionKind, PromotionStatus,
    PromotionUsage, SaleContext, TimeWindow,
};
pub use quantity::Quantity;
pub use recipe::{RecipeBook, RecipeLine};
pub use settlement::{
    InvalidCouponPolicy, SettleOrderRequest, Settlement, SettlementContext, SettlementPlan,
    SettlementSnapshot, SettlementStage, StockUpdate,
};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum number of lines in a single order.
pub const MAX_ORDER_LINES: usize = 100;

/// Maximum quantity of a single line.
///
/// ## Business Reason
/// Prevents accidental over-ordering (e.g., typing 1000 instead of 10).
pub const MAX_ITEM_QUANTITY: i64 = 999;
