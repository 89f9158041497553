//! # Promotion Engine
//!
//! Eligibility, discount computation and best-discount selection.
//!
//! ## Promotion Kinds
//! ```text
//! ┌──────────────────────┬─────────────────────────────────┬──────────────────┐
//! │ Kind                 │ Discount                        │ Gate             │
//! ├──────────────────────┼─────────────────────────────────┼──────────────────┤
//! │ PERCENTAGE           │ subtotal × rate                 │ -                │
//! │ FIXED_AMOUNT         │ amount                          │ min_spend (opt.) │
//! │ MIN_SPEND_PERCENTAGE │ subtotal × rate                 │ min_spend        │
//! │ HAPPY_HOUR           │ subtotal × rate                 │ local time       │
//! │ BUY_X_GET_Y          │ cheapest units free, per group  │ line items       │
//! └──────────────────────┴─────────────────────────────────┴──────────────────┘
//!   Percentage kinds honour `max_discount`. Every discount is clamped to the
//!   subtotal, so a total never goes negative.
//! ```
//!
//! ## Selection
//! ```text
//!   coupon presented? ──yes──► bound promotion, no comparison
//!         │ no
//!   promotion_id given? ─yes─► that promotion if it yields a discount
//!         │ no
//!   auto selection ─────────► max discount over eligible promotions,
//!                             ties to the earliest created
//! ```
//!
//! Buy-X-get-Y policy: eligible units from every line are pooled and sorted
//! by unit price; for every complete group of `buy + get` units, `get` units
//! are free, and the free units are always the cheapest ones in the pool.

use chrono::{DateTime, FixedOffset, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::CouponRejection;
use crate::money::{Money, Rate};
use crate::order::PricedLine;

// =============================================================================
// Promotion Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromotionStatus {
    #[default]
    Active,
    Inactive,
    Expired,
}

/// A daily wall-clock window, inclusive at both ends.
///
/// Compared at minute precision: a window ending at 16:00 still holds at
/// 16:00:59.
///
/// `start > end` describes a window that wraps past midnight
/// (22:00 to 02:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TimeWindow {
    #[ts(as = "String")]
    pub start: NaiveTime,
    #[ts(as = "String")]
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        let (start, end, time) = (to_minute(self.start), to_minute(self.end), to_minute(time));
        if start <= end {
            start <= time && time <= end
        } else {
            time >= start || time <= end
        }
    }
}

fn to_minute(time: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time)
}

/// The kind-specific parameters of a promotion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromotionKind {
    Percentage {
        rate: Rate,
        max_discount: Option<Money>,
    },
    FixedAmount {
        amount: Money,
        min_spend: Option<Money>,
    },
    MinSpendPercentage {
        rate: Rate,
        min_spend: Money,
        max_discount: Option<Money>,
    },
    HappyHour {
        rate: Rate,
        window: TimeWindow,
        max_discount: Option<Money>,
    },
    BuyXGetY {
        buy_quantity: i64,
        get_quantity: i64,
        /// Product ids the offer covers; empty means every product.
        applicable_products: Vec<String>,
    },
}

impl PromotionKind {
    /// Storage label of the kind.
    pub fn label(&self) -> &'static str {
        match self {
            PromotionKind::Percentage { .. } => "PERCENTAGE",
            PromotionKind::FixedAmount { .. } => "FIXED_AMOUNT",
            PromotionKind::MinSpendPercentage { .. } => "MIN_SPEND_PERCENTAGE",
            PromotionKind::HappyHour { .. } => "HAPPY_HOUR",
            PromotionKind::BuyXGetY { .. } => "BUY_X_GET_Y",
        }
    }

    fn min_spend(&self) -> Option<Money> {
        match self {
            PromotionKind::FixedAmount { min_spend, .. } => *min_spend,
            PromotionKind::MinSpendPercentage { min_spend, .. } => Some(*min_spend),
            _ => None,
        }
    }
}

/// A promotion definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Promotion {
    pub id: String,
    pub name: String,
    /// Optional public code printed on flyers.
    pub code: Option<String>,
    pub description: Option<String>,
    pub kind: PromotionKind,
    pub status: PromotionStatus,
    #[ts(as = "Option<String>")]
    pub starts_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub ends_at: Option<DateTime<Utc>>,
    /// Total applications allowed across all orders.
    pub usage_limit: Option<i64>,
    pub usage_count: i64,
    /// Informational: intended once per customer.
    pub per_customer: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// The sale a promotion is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct SaleContext<'a> {
    pub subtotal: Money,
    pub lines: &'a [PricedLine],
    pub now: DateTime<Utc>,
    /// Store wall-clock time, for happy-hour windows.
    pub local_time: NaiveTime,
}

impl<'a> SaleContext<'a> {
    /// Builds a context whose subtotal is the sum of `lines`.
    pub fn new(lines: &'a [PricedLine], now: DateTime<Utc>, offset: FixedOffset) -> Self {
        let subtotal = lines.iter().map(|l| l.subtotal).sum();
        Self::with_subtotal(subtotal, lines, now, offset)
    }

    /// Builds a context with an explicit subtotal.
    pub fn with_subtotal(
        subtotal: Money,
        lines: &'a [PricedLine],
        now: DateTime<Utc>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            subtotal,
            lines,
            now,
            local_time: now.with_timezone(&offset).time(),
        }
    }
}

impl Promotion {
    /// Status, date window and usage limit, in that order.
    ///
    /// The usage limit is an eligibility condition: a promotion that has
    /// been applied `usage_limit` times is no longer offered at all.
    pub fn availability(&self, now: DateTime<Utc>) -> Result<(), CouponRejection> {
        match self.status {
            PromotionStatus::Active => {}
            PromotionStatus::Inactive => return Err(CouponRejection::PromotionInactive),
            PromotionStatus::Expired => return Err(CouponRejection::PromotionExpired),
        }
        if self.starts_at.is_some_and(|start| now < start) {
            return Err(CouponRejection::PromotionInactive);
        }
        if self.ends_at.is_some_and(|end| now > end) {
            return Err(CouponRejection::PromotionExpired);
        }
        if self.usage_limit.is_some_and(|limit| self.usage_count >= limit) {
            return Err(CouponRejection::UsageLimitReached);
        }
        Ok(())
    }

    /// Whether this promotion may be offered for the sale right now.
    pub fn is_eligible(&self, sale: &SaleContext<'_>) -> bool {
        if self.availability(sale.now).is_err() {
            return false;
        }
        if let PromotionKind::HappyHour { window, .. } = &self.kind {
            if !window.contains(sale.local_time) {
                return false;
            }
        }
        if let Some(min_spend) = self.kind.min_spend() {
            if sale.subtotal < min_spend {
                return false;
            }
        }
        true
    }

    /// Discount this promotion yields for the sale.
    ///
    /// Minimum spend gates the result; time windows do not (see
    /// [`Promotion::is_eligible`]). The result never exceeds the subtotal.
    pub fn discount_for(&self, sale: &SaleContext<'_>) -> Money {
        let subtotal = sale.subtotal;
        if let Some(min_spend) = self.kind.min_spend() {
            if subtotal < min_spend {
                return Money::zero();
            }
        }

        let discount = match &self.kind {
            PromotionKind::Percentage { rate, max_discount }
            | PromotionKind::MinSpendPercentage {
                rate, max_discount, ..
            }
            | PromotionKind::HappyHour {
                rate, max_discount, ..
            } => capped(subtotal.percentage(*rate), *max_discount),
            PromotionKind::FixedAmount { amount, .. } => *amount,
            PromotionKind::BuyXGetY {
                buy_quantity,
                get_quantity,
                applicable_products,
            } => buy_x_get_y_discount(
                sale.lines,
                *buy_quantity,
                *get_quantity,
                applicable_products,
            ),
        };

        discount.max(Money::zero()).min(subtotal.max(Money::zero()))
    }
}

fn capped(discount: Money, max_discount: Option<Money>) -> Money {
    match max_discount {
        Some(cap) => discount.min(cap),
        None => discount,
    }
}

/// Value of the free units of a buy-X-get-Y offer.
///
/// ```rust
/// use brew_core::order::PricedLine;
/// use brew_core::promotion::buy_x_get_y_discount;
/// use brew_core::Money;
///
/// let line = |id: &str, qty, price| PricedLine {
///     product_id: id.into(), product_name: id.into(), quantity: qty,
///     unit_price: Money::from_major(price), subtotal: Money::from_major(price * qty),
/// };
/// // buy 2 get 1: 3 lattes at 65 + 1 mocha at 80 → one group of three, the
/// // cheapest unit (65) is free; the fourth unit does not complete a group.
/// let lines = [line("latte", 3, 65), line("mocha", 1, 80)];
/// assert_eq!(buy_x_get_y_discount(&lines, 2, 1, &[]), Money::from_major(65));
/// ```
pub fn buy_x_get_y_discount(
    lines: &[PricedLine],
    buy_quantity: i64,
    get_quantity: i64,
    applicable_products: &[String],
) -> Money {
    if buy_quantity <= 0 || get_quantity <= 0 {
        return Money::zero();
    }

    let mut units: Vec<(Money, i64)> = lines
        .iter()
        .filter(|l| {
            applicable_products.is_empty() || applicable_products.contains(&l.product_id)
        })
        .filter(|l| l.quantity > 0)
        .map(|l| (l.unit_price, l.quantity))
        .collect();
    units.sort_by_key(|(price, _)| *price);

    let total_units: i64 = units.iter().map(|(_, qty)| qty).sum();
    let mut free_units = (total_units / (buy_quantity + get_quantity)) * get_quantity;

    let mut discount = Money::zero();
    for (price, qty) in units {
        if free_units == 0 {
            break;
        }
        let take = qty.min(free_units);
        discount += price.multiply_quantity(take);
        free_units -= take;
    }
    discount
}

// =============================================================================
// Selection
// =============================================================================

/// A discount decided for a sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DiscountQuote {
    pub promotion_id: String,
    pub promotion_name: String,
    pub discount: Money,
    /// Set when the discount came from a coupon.
    pub coupon_code: Option<String>,
}

impl DiscountQuote {
    fn of(promotion: &Promotion, discount: Money) -> Self {
        Self {
            promotion_id: promotion.id.clone(),
            promotion_name: promotion.name.clone(),
            discount,
            coupon_code: None,
        }
    }
}

/// Every promotion that may be offered for the sale.
pub fn eligible_promotions<'p>(
    promotions: impl IntoIterator<Item = &'p Promotion>,
    sale: &SaleContext<'_>,
) -> Vec<&'p Promotion> {
    promotions
        .into_iter()
        .filter(|p| p.is_eligible(sale))
        .collect()
}

/// Picks the largest discount among `eligible`.
///
/// Ties go to the earliest-created promotion, then to the smaller id, so
/// the choice never depends on input order. Promotions that yield nothing
/// are not candidates.
pub fn select_best<'p>(
    eligible: impl IntoIterator<Item = &'p Promotion>,
    sale: &SaleContext<'_>,
) -> Option<DiscountQuote> {
    eligible
        .into_iter()
        .map(|p| (p, p.discount_for(sale)))
        .filter(|(_, discount)| discount.is_positive())
        .max_by(|(a, da), (b, db)| {
            da.cmp(db)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| b.id.cmp(&a.id))
        })
        .map(|(p, discount)| DiscountQuote::of(p, discount))
}

/// Quote for an explicitly requested promotion; `None` when it is not
/// eligible or yields nothing.
pub fn quote_promotion(promotion: &Promotion, sale: &SaleContext<'_>) -> Option<DiscountQuote> {
    if !promotion.is_eligible(sale) {
        return None;
    }
    let discount = promotion.discount_for(sale);
    discount
        .is_positive()
        .then(|| DiscountQuote::of(promotion, discount))
}

// =============================================================================
// Coupons
// =============================================================================

/// A single-use code bound to one promotion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Coupon {
    pub id: String,
    /// Stored upper case.
    pub code: String,
    pub promotion_id: String,
    pub is_used: bool,
    #[ts(as = "Option<String>")]
    pub used_at: Option<DateTime<Utc>>,
    /// Customer name given at redemption.
    pub used_by: Option<String>,
    pub order_id: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// The "unused → used" transition of a coupon, applied by the unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct CouponRedemption {
    pub code: String,
    pub order_id: String,
    pub used_by: Option<String>,
    pub used_at: DateTime<Utc>,
}

/// Validates a presented coupon against its bound promotion.
///
/// The bound promotion is applied unconditionally: happy-hour windows are
/// not checked, while minimum spend still decides whether anything is
/// granted. A zero discount is a rejection (`NotApplicable`).
pub fn validate_coupon(
    coupon: Option<&Coupon>,
    promotion: Option<&Promotion>,
    sale: &SaleContext<'_>,
) -> Result<DiscountQuote, CouponRejection> {
    let coupon = coupon.ok_or(CouponRejection::NotFound)?;
    if coupon.is_used {
        return Err(CouponRejection::AlreadyUsed);
    }

    let promotion = promotion
        .filter(|p| p.id == coupon.promotion_id)
        .ok_or(CouponRejection::PromotionInactive)?;
    promotion.availability(sale.now)?;

    let discount = promotion.discount_for(sale);
    if !discount.is_positive() {
        return Err(CouponRejection::NotApplicable);
    }

    Ok(DiscountQuote {
        coupon_code: Some(coupon.code.clone()),
        ..DiscountQuote::of(promotion, discount)
    })
}

/// Immutable record of one promotion applied to one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PromotionUsage {
    pub id: String,
    pub promotion_id: String,
    pub order_id: String,
    /// Discount actually granted.
    pub discount: Money,
    pub coupon_code: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================
