//! # Inventory: the Stock Ledger
//!
//! Ingredient stock is an append-only ledger of movements with a cached
//! running total on the ingredient row.
//!
//! ## Ledger Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Stock Ledger (per ingredient)                       │
//! │                                                                         │
//! │  seq  direction  quantity   stock_after   reason                       │
//! │  ───  ─────────  ────────   ───────────   ──────────────────────────   │
//! │   1   ADJUST     5000       5000          opening balance              │
//! │   2   OUT        18.5       4981.5        sale - Latte                 │
//! │   3   IN         1000       5981.5        delivery                     │
//! │   4   ADJUST     5970       5970          stock count                  │
//! │                                                                         │
//! │  IN      stock += quantity                                             │
//! │  OUT     stock -= quantity   (rejected if the result is negative)     │
//! │  ADJUST  stock  = quantity   (absolute set)                            │
//! │                                                                         │
//! │  Ingredient.current_stock == replay(movements) at all times            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The functions here only *compute* postings. Writing the movement and the
//! new cached total in one atomic step is the database layer's job; the
//! `version` carried on [`Ingredient`] is what it compares against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::quantity::Quantity;
use crate::validation::validate_movement_quantity;

// =============================================================================
// Ingredient
// =============================================================================

/// A raw ingredient tracked in stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Ingredient {
    pub id: String,
    pub name: String,
    /// Unit of measure ("g", "ml", "pcs").
    pub unit: String,
    /// Purchase cost of one unit.
    pub cost_per_unit: Money,
    /// Cached running total of the ledger. Never negative.
    pub current_stock: Quantity,
    /// Reorder threshold.
    pub min_stock: Quantity,
    pub max_stock: Option<Quantity>,
    pub supplier: Option<String>,
    /// Optimistic concurrency counter, bumped on every stock write.
    pub version: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Ingredient {
    /// Whether stock has fallen below the reorder threshold.
    pub fn is_below_minimum(&self) -> bool {
        self.current_stock < self.min_stock
    }
}

// =============================================================================
// Stock Direction
// =============================================================================

/// Direction of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[ts(export)]
#[serde(rename_all = "UPPERCASE")]
pub enum StockDirection {
    /// Goods received.
    In,
    /// Goods consumed (sales, waste).
    Out,
    /// Absolute correction after a stock count.
    Adjust,
}

impl StockDirection {
    /// Computes the stock level after moving `quantity` in this direction.
    ///
    /// Returns `None` when an `OUT` would go below zero or an `IN`
    /// overflows.
    pub fn apply(&self, current: Quantity, quantity: Quantity) -> Option<Quantity> {
        match self {
            StockDirection::In => current.checked_add(quantity),
            StockDirection::Out => current.checked_deplete(quantity),
            StockDirection::Adjust => Some(quantity),
        }
    }
}

impl fmt::Display for StockDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StockDirection::In => write!(f, "IN"),
            StockDirection::Out => write!(f, "OUT"),
            StockDirection::Adjust => write!(f, "ADJUST"),
        }
    }
}

// =============================================================================
// Stock Movement
// =============================================================================

/// Immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockMovement {
    pub id: String,
    pub ingredient_id: String,
    pub direction: StockDirection,
    /// Magnitude for `IN`/`OUT`, the absolute level for `ADJUST`.
    pub quantity: Quantity,
    /// Stock level right after this movement.
    pub stock_after: Quantity,
    pub reason: Option<String>,
    /// Originating document, e.g. an order id.
    pub reference: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// Result of posting one movement: the new cached total and the ledger row.
#[derive(Debug, Clone, PartialEq)]
pub struct StockPosting {
    pub ingredient_id: String,
    /// Version the ingredient row must still have when this is written.
    pub expected_version: i64,
    pub new_stock: Quantity,
    pub movement: StockMovement,
}

/// Posts one movement against an ingredient.
///
/// ## Errors
/// - `Validation` when the magnitude is negative (or zero for `IN`/`OUT`)
/// - `InsufficientStock` when an `OUT` would leave negative stock; the
///   ingredient is left untouched
/// - `Validation` (`OutOfRange`) when an `IN` would overflow the stock level
///
/// ## Example
/// ```rust
/// use brew_core::inventory::{post_movement, StockDirection};
/// # use brew_core::inventory::Ingredient;
/// # use brew_core::{Money, Quantity};
/// # use chrono::Utc;
/// # let now = Utc::now();
/// # let milk = Ingredient {
/// #     id: "milk".into(), name: "Fresh milk".into(), unit: "ml".into(),
/// #     cost_per_unit: Money::from_cents(2), current_stock: Quantity::from_units(100),
/// #     min_stock: Quantity::zero(), max_stock: None, supplier: None, version: 0,
/// #     created_at: now, updated_at: now,
/// # };
///
/// let posting = post_movement(&milk, StockDirection::Out, Quantity::from_units(150), None, None, now);
/// assert!(posting.is_err());
///
/// let posting = post_movement(&milk, StockDirection::In, Quantity::from_units(150), None, None, now).unwrap();
/// assert_eq!(posting.new_stock, Quantity::from_units(250));
/// ```
pub fn post_movement(
    ingredient: &Ingredient,
    direction: StockDirection,
    quantity: Quantity,
    reason: Option<String>,
    reference: Option<String>,
    now: DateTime<Utc>,
) -> CoreResult<StockPosting> {
    validate_movement_quantity(quantity, direction == StockDirection::Adjust)?;
    let overflows = direction == StockDirection::In
        && ingredient.current_stock.checked_add(quantity).is_none();
    if overflows {
        return Err(ValidationError::OutOfRange {
            field: "current_stock".to_string(),
            min: 0,
            max: i64::MAX,
        }
        .into());
    }

    let new_stock = direction
        .apply(ingredient.current_stock, quantity)
        .ok_or_else(|| CoreError::InsufficientStock {
            ingredient_id: ingredient.id.clone(),
            ingredient_name: ingredient.name.clone(),
            required: quantity,
            available: ingredient.current_stock,
        })?;

    Ok(StockPosting {
        ingredient_id: ingredient.id.clone(),
        expected_version: ingredient.version,
        new_stock,
        movement: StockMovement {
            id: Uuid::new_v4().to_string(),
            ingredient_id: ingredient.id.clone(),
            direction,
            quantity,
            stock_after: new_stock,
            reason,
            reference,
            created_at: now,
        },
    })
}

/// Recomputes a stock level from its ledger, in ledger order.
///
/// Read-only: replaying any number of times yields the same total.
pub fn replay_stock<'a>(movements: impl IntoIterator<Item = &'a StockMovement>) -> Quantity {
    movements
        .into_iter()
        .fold(Quantity::zero(), |stock, m| match m.direction {
            StockDirection::In => stock + m.quantity,
            StockDirection::Out => stock - m.quantity,
            StockDirection::Adjust => m.quantity,
        })
}

// =============================================================================
// Unit Tests
// =============================================================================
