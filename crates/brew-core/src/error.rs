//! # Error Types
//!
//! Domain-specific error types for brew-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  brew-core errors (this file)                                          │
//! │  ├── CoreError        - Business rule violations                       │
//! │  ├── CouponRejection  - Why a coupon cannot be redeemed                │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  brew-db errors (separate crate)                                       │
//! │  └── DbError          - Storage failures and lost-update conflicts     │
//! │                                                                         │
//! │  brew-engine errors                                                    │
//! │  └── EngineError      - What callers see, with a stable ErrorCode      │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError ─┐                                  │
//! │                         DbError ────┴→ EngineError → transport layer   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (ingredient, code, ID)
//! 3. Errors are enum variants, never String

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use crate::loyalty::Tier;
use crate::quantity::Quantity;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// Every variant aborts the operation that raised it; none of them leave
/// partial state behind because the core never writes anything.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An ingredient cannot cover the demand of a sale or an `OUT` movement.
    ///
    /// ## When This Occurs
    /// - The summed recipe demand of an order exceeds current stock
    /// - A manual `OUT` adjustment would drive stock below zero
    ///
    /// ## User Workflow
    /// ```text
    /// Settle order: 3 × Latte (18.5 g beans each)
    ///      │
    ///      ▼
    /// Demand: beans 55.5 g, stock 40 g
    ///      │
    ///      ▼
    /// InsufficientStock { ingredient: "Coffee beans", required: 55.5, available: 40 }
    ///      │
    ///      ▼
    /// Nothing is deducted, no order is created
    /// ```
    #[error(
        "Insufficient stock for {ingredient_name}: required {required}, available {available}"
    )]
    InsufficientStock {
        ingredient_id: String,
        ingredient_name: String,
        required: Quantity,
        available: Quantity,
    },

    /// A presented coupon cannot be redeemed.
    #[error("Coupon {code} is invalid: {reason}")]
    CouponInvalid {
        code: String,
        reason: CouponRejection,
    },

    /// A member does not have enough spendable points.
    #[error("Insufficient points: required {required}, available {available}")]
    InsufficientPoints { required: i64, available: i64 },

    /// A reward requires a higher membership tier.
    #[error("Reward requires {required} tier, member is {current}")]
    TierNotMet { required: Tier, current: Tier },

    #[error("Promotion not found: {0}")]
    PromotionNotFound(String),

    #[error("Member not found: {0}")]
    MemberNotFound(String),

    /// The member account is deactivated.
    #[error("Member {0} is inactive")]
    MemberInactive(String),

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// The product exists but is switched off on the menu.
    #[error("Product {0} is not available for sale")]
    ProductUnavailable(String),

    #[error("Ingredient not found: {0}")]
    IngredientNotFound(String),

    #[error("Reward not found: {0}")]
    RewardNotFound(String),

    /// The reward is inactive or outside its date window.
    #[error("Reward {0} is not currently available")]
    RewardUnavailable(String),

    /// The member already redeemed this reward as often as allowed.
    #[error("Reward {reward_id} already redeemed {limit} time(s) by this member")]
    RewardLimitReached { reward_id: String, limit: i64 },

    /// An order must contain at least one line.
    #[error("Order has no items")]
    EmptyOrder,

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Shortfall of an `InsufficientStock` error (`required - available`).
    pub fn shortfall(&self) -> Option<Quantity> {
        match self {
            CoreError::InsufficientStock {
                required,
                available,
                ..
            } => Some(*required - *available),
            _ => None,
        }
    }
}

// =============================================================================
// Coupon Rejection
// =============================================================================

/// Why a coupon was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, Error)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CouponRejection {
    #[error("coupon code does not exist")]
    NotFound,

    #[error("coupon has already been used")]
    AlreadyUsed,

    /// Bound promotion is inactive or has not started yet.
    #[error("promotion is not active")]
    PromotionInactive,

    #[error("promotion has expired")]
    PromotionExpired,

    #[error("promotion usage limit reached")]
    UsageLimitReached,

    /// The bound promotion yields no discount for this order
    /// (minimum spend not met, too few items for buy-X-get-Y, ...).
    #[error("promotion does not apply to this order")]
    NotApplicable,
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when caller input doesn't meet requirements.
/// Used for early validation before business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g., invalid UUID, invalid code).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Duplicate value (e.g., same ingredient twice in a recipe).
    #[error("{field} '{value}' appears more than once")]
    Duplicate { field: String, value: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
