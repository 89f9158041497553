//! # Orders
//!
//! Products on the menu, the lines of a sale request, and the order that a
//! settlement persists.
//!
//! ## Snapshot Pattern
//! ```text
//! OrderLine (request)          PricedLine (planned)         OrderItem (stored)
//! ┌───────────────────┐       ┌───────────────────┐       ┌───────────────────┐
//! │ product_id        │──────►│ product_name      │──────►│ product_name      │
//! │ quantity          │ price │ unit_price        │ order │ unit_price        │
//! │ unit_price (opt.) │       │ subtotal          │  id   │ subtotal          │
//! └───────────────────┘       └───────────────────┘       └───────────────────┘
//! ```
//! Name and price are frozen on the item when the order is settled, so later
//! menu changes never rewrite history.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::validation::{validate_amount, validate_line_quantity};

// =============================================================================
// Product
// =============================================================================

/// A menu product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Product {
    pub id: String,
    /// Display name shown to the cashier and on the receipt.
    pub name: String,
    pub category: Option<String>,
    /// Current menu price.
    pub price: Money,
    /// Switched off products cannot be sold.
    pub is_available: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Order Status
// =============================================================================

/// Fulfilment status of an order. Settlement always creates `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Pending,
    Preparing,
    Ready,
    Completed,
    Cancelled,
}

// =============================================================================
// Lines
// =============================================================================

/// One line of a settlement request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderLine {
    pub product_id: String,
    pub quantity: i64,
    /// Price agreed at the register; the menu price is used when absent.
    pub unit_price: Option<Money>,
}

impl OrderLine {
    pub fn new(product_id: impl Into<String>, quantity: i64) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            unit_price: None,
        }
    }

    /// Sets an explicit unit price for this line.
    pub fn at(mut self, unit_price: Money) -> Self {
        self.unit_price = Some(unit_price);
        self
    }
}

/// A request line after it has been checked against the menu and priced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PricedLine {
    pub product_id: String,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: Money,
    /// `unit_price × quantity`
    pub subtotal: Money,
}

/// Prices one request line against its product.
///
/// ## Errors
/// - `ProductUnavailable` if the product is switched off
/// - `Validation` for a quantity outside 1..=999 or a negative price
/// - `Validation` (`OutOfRange`) when the line subtotal overflows
pub fn price_line(line: &OrderLine, product: &Product) -> CoreResult<PricedLine> {
    validate_line_quantity(line.quantity)?;

    if !product.is_available {
        return Err(CoreError::ProductUnavailable(product.id.clone()));
    }

    let unit_price = line.unit_price.unwrap_or(product.price);
    validate_amount("unit_price", unit_price)?;
    let subtotal = unit_price
        .checked_multiply_quantity(line.quantity)
        .ok_or_else(|| amount_overflow("subtotal"))?;

    Ok(PricedLine {
        product_id: product.id.clone(),
        product_name: product.name.clone(),
        quantity: line.quantity,
        unit_price,
        subtotal,
    })
}

/// Sum of the line subtotals.
///
/// ## Errors
/// - `Validation` (`OutOfRange`) when the sum overflows
pub fn lines_subtotal(lines: &[PricedLine]) -> CoreResult<Money> {
    lines
        .iter()
        .try_fold(Money::zero(), |acc, l| acc.checked_add(l.subtotal))
        .ok_or_else(|| amount_overflow("subtotal"))
}

fn amount_overflow(field: &str) -> CoreError {
    ValidationError::OutOfRange {
        field: field.to_string(),
        min: 0,
        max: i64::MAX,
    }
    .into()
}

// =============================================================================
// Order
// =============================================================================

/// A settled sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Order {
    pub id: String,
    /// Human-readable number, unique: `ORD-20250314-9F2C41AB`.
    pub order_number: String,
    pub status: OrderStatus,
    /// Sum of line subtotals before discount.
    pub subtotal: Money,
    pub discount: Money,
    /// `subtotal - discount`, never negative.
    pub total: Money,
    pub member_id: Option<String>,
    pub customer_name: Option<String>,
    /// Promotion that produced `discount`, if any.
    pub promotion_id: Option<String>,
    pub coupon_code: Option<String>,
    pub points_earned: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// A stored line of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    /// Product name at time of sale (frozen).
    pub product_name: String,
    pub quantity: i64,
    /// Unit price at time of sale (frozen).
    pub unit_price: Money,
    pub subtotal: Money,
}

impl OrderItem {
    pub fn from_priced(order_id: &str, line: &PricedLine) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            order_id: order_id.to_string(),
            product_id: line.product_id.clone(),
            product_name: line.product_name.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            subtotal: line.subtotal,
        }
    }
}

/// Generates an order number for the given business date.
///
/// ## Format
/// `ORD-{YYYYMMDD}-{8 upper-case hex chars of the order id}`
///
/// ```rust
/// use brew_core::order::generate_order_number;
/// use chrono::NaiveDate;
/// use uuid::Uuid;
///
/// let id = Uuid::parse_str("9f2c41ab-0000-4000-8000-000000000000").unwrap();
/// let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
/// assert_eq!(generate_order_number(date, &id), "ORD-20250314-9F2C41AB");
/// ```
pub fn generate_order_number(date: NaiveDate, id: &Uuid) -> String {
    let hex = id.simple().to_string();
    format!(
        "ORD-{}-{}",
        date.format("%Y%m%d"),
        hex[..8].to_ascii_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn latte(available: bool) -> Product {
        let now = Utc::now();
        Product {
            id: "latte".to_string(),
            name: "Latte".to_string(),
            category: Some("coffee".to_string()),
            price: Money::from_major(65),
            is_available: available,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_price_line_uses_menu_price() {
        let priced = price_line(&OrderLine::new("latte", 3), &latte(true)).unwrap();
        assert_eq!(priced.unit_price, Money::from_major(65));
        assert_eq!(priced.subtotal, Money::from_major(195));
        assert_eq!(priced.product_name, "Latte");
    }

    #[test]
    fn test_price_line_prefers_register_price() {
        let line = OrderLine::new("latte", 2).at(Money::from_major(50));
        let priced = price_line(&line, &latte(true)).unwrap();
        assert_eq!(priced.subtotal, Money::from_major(100));
    }

    #[test]
    fn test_price_line_rejects_unavailable_product() {
        let err = price_line(&OrderLine::new("latte", 1), &latte(false)).unwrap_err();
        assert!(matches!(err, CoreError::ProductUnavailable(id) if id == "latte"));
    }

    #[test]
    fn test_price_line_rejects_bad_quantity() {
        assert!(price_line(&OrderLine::new("latte", 0), &latte(true)).is_err());
        assert!(price_line(&OrderLine::new("latte", 1000), &latte(true)).is_err());
    }

    #[test]
    fn test_price_line_rejects_overflowing_subtotal() {
        let line = OrderLine::new("latte", 3).at(Money::from_cents(i64::MAX / 2));
        let err = price_line(&line, &latte(true)).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::OutOfRange { ref field, .. }) if field == "subtotal"
        ));
    }

    #[test]
    fn test_lines_subtotal() {
        let cheap = price_line(&OrderLine::new("latte", 2), &latte(true)).unwrap();
        let dear_line = OrderLine::new("latte", 1).at(Money::from_cents(i64::MAX - 100));
        let dear = price_line(&dear_line, &latte(true)).unwrap();

        assert_eq!(lines_subtotal(&[cheap.clone()]).unwrap(), Money::from_major(130));
        assert_eq!(lines_subtotal(&[]).unwrap(), Money::zero());
        assert!(lines_subtotal(&[cheap, dear]).is_err());
    }

    #[test]
    fn test_order_number_is_unique_per_id() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        let a = generate_order_number(date, &Uuid::new_v4());
        let b = generate_order_number(date, &Uuid::new_v4());
        assert!(a.starts_with("ORD-20250102-"));
        assert_eq!(a.len(), "ORD-20250102-".len() + 8);
        assert_ne!(a, b);
    }
}
