//! # Settlement Planner
//!
//! Turns a sale request plus a consistent snapshot of the state it touches
//! into one [`SettlementPlan`]: every row the settlement writes, computed up
//! front. The database layer applies a plan inside a single transaction, so
//! a settlement either happens completely or not at all.
//!
//! ## State Machine
//! ```text
//!   Started ──► ItemsPriced ──► StockReserved ──► DiscountApplied
//!      │             │               │                  │
//!      │             │               │                  ▼
//!      │             │               │            PointsAccrued ──► Committed
//!      │             │               │                  │
//!      └─────────────┴───────────────┴──────────────────┴──────► Aborted
//!                       any error discards the whole plan
//! ```
//!
//! ## Who Does What
//! ```text
//! ┌──────────────┐  snapshot   ┌──────────────┐   plan    ┌──────────────┐
//! │  brew-db     │ ──────────► │  Settlement  │ ────────► │  UnitOfWork  │
//! │  (reads in   │             │  (this file, │           │  CAS writes, │
//! │   the tx)    │             │   pure)      │           │  commit      │
//! └──────────────┘             └──────────────┘           └──────────────┘
//! ```
//!
//! Every check here runs against the snapshot. The version columns carried
//! through the plan let the unit of work detect that the snapshot went
//! stale before commit; the engine then re-reads and re-plans.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::inventory::{Ingredient, StockDirection, StockMovement};
use crate::loyalty::{accrue, LoyaltyPolicy, LoyaltyPosting, Member, PointRule};
use crate::money::Money;
use crate::order::{
    generate_order_number, lines_subtotal, price_line, Order, OrderItem, OrderLine, OrderStatus,
    PricedLine, Product,
};
use crate::promotion::{
    eligible_promotions, quote_promotion, select_best, validate_coupon, Coupon, CouponRedemption,
    DiscountQuote, Promotion, PromotionUsage, SaleContext,
};
use crate::quantity::Quantity;
use crate::recipe::{demand_overflow, RecipeBook};
use crate::validation::{normalize_coupon_code, validate_coupon_code, validate_order_size};

// =============================================================================
// Request and Context
// =============================================================================

/// What to do when a presented coupon is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum InvalidCouponPolicy {
    /// Fail the settlement with `CouponInvalid`.
    #[default]
    Abort,
    /// Settle at full price and record why the coupon was refused.
    ProceedWithoutDiscount,
}

/// The single entry point into settlement.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SettleOrderRequest {
    pub lines: Vec<OrderLine>,
    pub member_id: Option<String>,
    pub coupon_code: Option<String>,
    pub promotion_id: Option<String>,
    pub customer_name: Option<String>,
    /// Overrides the configured auto-selection switch.
    pub auto_promotions: Option<bool>,
    /// Overrides the configured invalid-coupon policy.
    pub invalid_coupon: Option<InvalidCouponPolicy>,
}

impl SettleOrderRequest {
    pub fn new(lines: Vec<OrderLine>) -> Self {
        Self {
            lines,
            ..Default::default()
        }
    }

    pub fn member(mut self, member_id: impl Into<String>) -> Self {
        self.member_id = Some(member_id.into());
        self
    }

    pub fn coupon(mut self, code: impl Into<String>) -> Self {
        self.coupon_code = Some(code.into());
        self
    }

    pub fn promotion(mut self, promotion_id: impl Into<String>) -> Self {
        self.promotion_id = Some(promotion_id.into());
        self
    }

    pub fn customer(mut self, name: impl Into<String>) -> Self {
        self.customer_name = Some(name.into());
        self
    }
}

/// Clock and store-wide settings for one settlement attempt.
#[derive(Debug, Clone, Copy)]
pub struct SettlementContext {
    pub now: DateTime<Utc>,
    /// Offset of the store's wall clock from UTC.
    pub utc_offset: FixedOffset,
    pub loyalty: LoyaltyPolicy,
    pub auto_promotions: bool,
    pub invalid_coupon: InvalidCouponPolicy,
}

/// The state a settlement reads, loaded inside the settlement transaction.
///
/// Lookups that find nothing are simply absent; the planner decides which
/// absences are errors.
#[derive(Debug, Clone, Default)]
pub struct SettlementSnapshot {
    pub products: HashMap<String, Product>,
    pub recipes: RecipeBook,
    pub ingredients: BTreeMap<String, Ingredient>,
    /// Active promotions, candidates for auto-selection.
    pub active_promotions: Vec<Promotion>,
    /// The promotion named by `promotion_id`, if any.
    pub requested_promotion: Option<Promotion>,
    pub coupon: Option<Coupon>,
    /// The promotion the coupon is bound to.
    pub coupon_promotion: Option<Promotion>,
    pub member: Option<Member>,
    pub point_rules: Vec<PointRule>,
}

// =============================================================================
// Plan
// =============================================================================

/// New cached stock of one ingredient, guarded by its version.
#[derive(Debug, Clone, PartialEq)]
pub struct StockUpdate {
    pub ingredient_id: String,
    pub expected_version: i64,
    pub new_stock: Quantity,
}

/// Every write of one settlement.
#[derive(Debug, Clone)]
pub struct SettlementPlan {
    pub order: Order,
    pub items: Vec<OrderItem>,
    /// One per ingredient, ordered by ingredient id.
    pub stock_updates: Vec<StockUpdate>,
    /// One per (line, ingredient) pair.
    pub movements: Vec<StockMovement>,
    pub discount: Option<DiscountQuote>,
    pub promotion_usage: Option<PromotionUsage>,
    pub coupon_redemption: Option<CouponRedemption>,
    pub loyalty: Option<LoyaltyPosting>,
    /// Things the cashier should know that did not stop the sale.
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStage {
    Started,
    ItemsPriced,
    StockReserved,
    DiscountApplied,
    PointsAccrued,
    Committed,
    Aborted,
}

impl fmt::Display for SettlementStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SettlementStage::Started => "started",
            SettlementStage::ItemsPriced => "items_priced",
            SettlementStage::StockReserved => "stock_reserved",
            SettlementStage::DiscountApplied => "discount_applied",
            SettlementStage::PointsAccrued => "points_accrued",
            SettlementStage::Committed => "committed",
            SettlementStage::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Discount Decision
// =============================================================================

/// Outcome of the discount step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscountDecision {
    pub quote: Option<DiscountQuote>,
    pub notes: Vec<String>,
}

/// Decides the discount of a sale.
///
/// A presented coupon wins outright. Otherwise an explicit promotion is
/// used when it yields something, and is skipped with a note when it does
/// not. Otherwise, with auto-selection on, the best eligible promotion.
///
/// ## Errors
/// - `CouponInvalid` when the coupon is refused under
///   [`InvalidCouponPolicy::Abort`]
/// - `PromotionNotFound` when `promotion_id` names nothing
pub fn decide_discount(
    coupon_code: Option<&str>,
    promotion_id: Option<&str>,
    auto_promotions: bool,
    policy: InvalidCouponPolicy,
    snapshot: &SettlementSnapshot,
    sale: &SaleContext<'_>,
) -> CoreResult<DiscountDecision> {
    let mut decision = DiscountDecision::default();

    if let Some(code) = coupon_code {
        match validate_coupon(
            snapshot.coupon.as_ref(),
            snapshot.coupon_promotion.as_ref(),
            sale,
        ) {
            Ok(quote) => decision.quote = Some(quote),
            Err(reason) => match policy {
                InvalidCouponPolicy::Abort => {
                    return Err(CoreError::CouponInvalid {
                        code: code.to_string(),
                        reason,
                    })
                }
                InvalidCouponPolicy::ProceedWithoutDiscount => {
                    decision
                        .notes
                        .push(format!("coupon {code} not applied: {reason}"));
                }
            },
        }
        return Ok(decision);
    }

    if let Some(promotion_id) = promotion_id {
        let promotion = snapshot
            .requested_promotion
            .as_ref()
            .filter(|p| p.id == promotion_id)
            .ok_or_else(|| CoreError::PromotionNotFound(promotion_id.to_string()))?;
        match quote_promotion(promotion, sale) {
            Some(quote) => decision.quote = Some(quote),
            None => decision.notes.push(format!(
                "promotion {} does not apply to this order",
                promotion.name
            )),
        }
        return Ok(decision);
    }

    if auto_promotions {
        let eligible = eligible_promotions(&snapshot.active_promotions, sale);
        decision.quote = select_best(eligible, sale);
    }
    Ok(decision)
}

// =============================================================================
// Settlement
// =============================================================================

/// One settlement attempt, advanced stage by stage.
///
/// ```rust,ignore
/// let plan = Settlement::start(&request, &snapshot, ctx)?
///     .price_items()?
///     .reserve_stock()?
///     .apply_discount()?
///     .accrue_points()?
///     .into_plan();
/// ```
#[derive(Debug)]
pub struct Settlement<'s> {
    request: &'s SettleOrderRequest,
    snapshot: &'s SettlementSnapshot,
    ctx: SettlementContext,
    stage: SettlementStage,
    order_uuid: Uuid,
    order_id: String,
    coupon_code: Option<String>,
    lines: Vec<PricedLine>,
    subtotal: Money,
    stock_updates: Vec<StockUpdate>,
    movements: Vec<StockMovement>,
    discount: Option<DiscountQuote>,
    loyalty: Option<LoyaltyPosting>,
    notes: Vec<String>,
}

impl<'s> Settlement<'s> {
    /// Checks the request shape and the referenced member and promotion.
    ///
    /// ## Errors
    /// `EmptyOrder`, `Validation`, `MemberNotFound`, `PromotionNotFound`
    pub fn start(
        request: &'s SettleOrderRequest,
        snapshot: &'s SettlementSnapshot,
        ctx: SettlementContext,
    ) -> CoreResult<Self> {
        if request.lines.is_empty() {
            return Err(CoreError::EmptyOrder);
        }
        validate_order_size(request.lines.len())?;

        let coupon_code = match request.coupon_code.as_deref() {
            Some(code) => {
                validate_coupon_code(code)?;
                Some(normalize_coupon_code(code))
            }
            None => None,
        };

        if let Some(member_id) = &request.member_id {
            if snapshot.member.as_ref().map(|m| &m.id) != Some(member_id) {
                return Err(CoreError::MemberNotFound(member_id.clone()));
            }
        }
        if let Some(promotion_id) = &request.promotion_id {
            if snapshot.requested_promotion.as_ref().map(|p| &p.id) != Some(promotion_id) {
                return Err(CoreError::PromotionNotFound(promotion_id.clone()));
            }
        }

        let order_uuid = Uuid::new_v4();
        Ok(Self {
            request,
            snapshot,
            ctx,
            stage: SettlementStage::Started,
            order_uuid,
            order_id: order_uuid.to_string(),
            coupon_code,
            lines: Vec::new(),
            subtotal: Money::zero(),
            stock_updates: Vec::new(),
            movements: Vec::new(),
            discount: None,
            loyalty: None,
            notes: Vec::new(),
        })
    }

    pub fn stage(&self) -> SettlementStage {
        self.stage
    }

    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    /// Sum of the priced lines, before discount.
    pub fn subtotal(&self) -> Money {
        self.subtotal
    }

    /// Step 1: price every line and the provisional total.
    pub fn price_items(mut self) -> CoreResult<Self> {
        debug_assert_eq!(self.stage, SettlementStage::Started);
        self.lines = self
            .request
            .lines
            .iter()
            .map(|line| {
                let product = self
                    .snapshot
                    .products
                    .get(&line.product_id)
                    .ok_or_else(|| CoreError::ProductNotFound(line.product_id.clone()))?;
                price_line(line, product)
            })
            .collect::<CoreResult<_>>()?;
        self.subtotal = lines_subtotal(&self.lines)?;
        self.stage = SettlementStage::ItemsPriced;
        Ok(self)
    }

    /// Steps 2 and 3: check total ingredient demand against stock, then
    /// plan the depletions.
    ///
    /// Every ingredient is checked before any movement is planned, so the
    /// first shortfall aborts with nothing deducted.
    pub fn reserve_stock(mut self) -> CoreResult<Self> {
        debug_assert_eq!(self.stage, SettlementStage::ItemsPriced);
        let snapshot = self.snapshot;
        let recipes = &snapshot.recipes;
        let ingredients = &snapshot.ingredients;

        let demand = recipes.demand(
            self.lines
                .iter()
                .map(|l| (l.product_id.as_str(), l.quantity)),
        )?;

        for (ingredient_id, required) in &demand {
            let ingredient = ingredients
                .get(ingredient_id)
                .ok_or_else(|| CoreError::IngredientNotFound(ingredient_id.clone()))?;
            if ingredient.current_stock.checked_deplete(*required).is_none() {
                return Err(CoreError::InsufficientStock {
                    ingredient_id: ingredient.id.clone(),
                    ingredient_name: ingredient.name.clone(),
                    required: *required,
                    available: ingredient.current_stock,
                });
            }
        }

        let mut running: BTreeMap<&str, Quantity> = BTreeMap::new();
        for line in &self.lines {
            for recipe_line in recipes.resolve(&line.product_id) {
                let quantity = recipe_line
                    .quantity
                    .checked_times(line.quantity)
                    .ok_or_else(|| demand_overflow(&recipe_line.ingredient_id))?;
                if quantity.is_zero() {
                    continue;
                }
                let Some(ingredient) = ingredients.get(&recipe_line.ingredient_id) else {
                    return Err(CoreError::IngredientNotFound(
                        recipe_line.ingredient_id.clone(),
                    ));
                };
                let stock = running
                    .entry(ingredient.id.as_str())
                    .or_insert(ingredient.current_stock);
                *stock = *stock - quantity;

                self.movements.push(StockMovement {
                    id: Uuid::new_v4().to_string(),
                    ingredient_id: ingredient.id.clone(),
                    direction: StockDirection::Out,
                    quantity,
                    stock_after: *stock,
                    reason: Some(format!("sale - {}", line.product_name)),
                    reference: Some(self.order_id.clone()),
                    created_at: self.ctx.now,
                });
            }
        }

        self.stock_updates = running
            .into_iter()
            .filter_map(|(id, new_stock)| {
                ingredients.get(id).map(|ingredient| StockUpdate {
                    ingredient_id: ingredient.id.clone(),
                    expected_version: ingredient.version,
                    new_stock,
                })
            })
            .collect();
        self.stage = SettlementStage::StockReserved;
        Ok(self)
    }

    /// Step 4: decide the discount.
    pub fn apply_discount(mut self) -> CoreResult<Self> {
        debug_assert_eq!(self.stage, SettlementStage::StockReserved);
        let sale = SaleContext::with_subtotal(
            self.subtotal,
            &self.lines,
            self.ctx.now,
            self.ctx.utc_offset,
        );
        let decision = decide_discount(
            self.coupon_code.as_deref(),
            self.request.promotion_id.as_deref(),
            self.request
                .auto_promotions
                .unwrap_or(self.ctx.auto_promotions),
            self.request
                .invalid_coupon
                .unwrap_or(self.ctx.invalid_coupon),
            self.snapshot,
            &sale,
        )?;
        self.discount = decision.quote;
        self.notes.extend(decision.notes);
        self.stage = SettlementStage::DiscountApplied;
        Ok(self)
    }

    /// Total after discount.
    pub fn total(&self) -> Money {
        let discount = self.discount.as_ref().map_or(Money::zero(), |d| d.discount);
        self.subtotal.saturating_sub_to_zero(discount)
    }

    /// Step 5: accrue points on the final total for an attached member.
    ///
    /// An inactive member does not block the sale; accrual is skipped and
    /// noted.
    pub fn accrue_points(mut self) -> CoreResult<Self> {
        debug_assert_eq!(self.stage, SettlementStage::DiscountApplied);
        if let Some(member) = &self.snapshot.member {
            if self.request.member_id.as_deref() == Some(member.id.as_str()) {
                if member.is_active {
                    self.loyalty = Some(accrue(
                        member,
                        0,
                        Some(self.total()),
                        &self.snapshot.point_rules,
                        Some(&self.order_id),
                        &self.ctx.loyalty,
                        self.ctx.now,
                    )?);
                } else {
                    self.notes.push(format!(
                        "member {} is inactive; no points accrued",
                        member.member_number
                    ));
                }
            }
        }
        self.stage = SettlementStage::PointsAccrued;
        Ok(self)
    }

    /// Step 6: assemble the order and every record to persist.
    pub fn into_plan(self) -> SettlementPlan {
        debug_assert_eq!(self.stage, SettlementStage::PointsAccrued);
        let now = self.ctx.now;
        let total = self.total();
        let discount_amount = self.discount.as_ref().map_or(Money::zero(), |d| d.discount);
        let business_date = now.with_timezone(&self.ctx.utc_offset).date_naive();

        let order = Order {
            id: self.order_id.clone(),
            order_number: generate_order_number(business_date, &self.order_uuid),
            status: OrderStatus::Pending,
            subtotal: self.subtotal,
            discount: discount_amount,
            total,
            member_id: self.request.member_id.clone(),
            customer_name: self.request.customer_name.clone(),
            promotion_id: self.discount.as_ref().map(|d| d.promotion_id.clone()),
            coupon_code: self.discount.as_ref().and_then(|d| d.coupon_code.clone()),
            points_earned: self.loyalty.as_ref().map_or(0, |l| l.points_earned),
            created_at: now,
        };

        let items = self
            .lines
            .iter()
            .map(|line| OrderItem::from_priced(&order.id, line))
            .collect();

        let promotion_usage = self.discount.as_ref().map(|d| PromotionUsage {
            id: Uuid::new_v4().to_string(),
            promotion_id: d.promotion_id.clone(),
            order_id: order.id.clone(),
            discount: d.discount,
            coupon_code: d.coupon_code.clone(),
            created_at: now,
        });

        let coupon_redemption = self
            .discount
            .as_ref()
            .and_then(|d| d.coupon_code.clone())
            .map(|code| CouponRedemption {
                code,
                order_id: order.id.clone(),
                used_by: self.request.customer_name.clone(),
                used_at: now,
            });

        SettlementPlan {
            order,
            items,
            stock_updates: self.stock_updates,
            movements: self.movements,
            discount: self.discount,
            promotion_usage,
            coupon_redemption,
            loyalty: self.loyalty,
            notes: self.notes,
        }
    }

    /// Runs every stage.
    pub fn plan(
        request: &SettleOrderRequest,
        snapshot: &SettlementSnapshot,
        ctx: SettlementContext,
    ) -> CoreResult<SettlementPlan> {
        Ok(Settlement::start(request, snapshot, ctx)?
            .price_items()?
            .reserve_stock()?
            .apply_discount()?
            .accrue_points()?
            .into_plan())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CouponRejection;
    use crate::loyalty::{PointRuleKind, Tier};
    use crate::money::Rate;
    use crate::promotion::{PromotionKind, PromotionStatus};
    use crate::recipe::RecipeLine;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 8, 0, 0).unwrap()
    }

    fn ctx() -> SettlementContext {
        SettlementContext {
            now: now(),
            utc_offset: FixedOffset::east_opt(7 * 3600).unwrap(),
            loyalty: LoyaltyPolicy::default(),
            auto_promotions: true,
            invalid_coupon: InvalidCouponPolicy::Abort,
        }
    }

    fn product(id: &str, price: i64) -> Product {
        Product {
            id: id.to_string(),
            name: id.to_string(),
            category: None,
            price: Money::from_major(price),
            is_available: true,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn ingredient(id: &str, stock: i64) -> Ingredient {
        Ingredient {
            id: id.to_string(),
            name: id.to_string(),
            unit: "g".to_string(),
            cost_per_unit: Money::from_cents(10),
            current_stock: Quantity::from_units(stock),
            min_stock: Quantity::zero(),
            max_stock: None,
            supplier: None,
            version: 7,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn promotion(id: &str, kind: PromotionKind) -> Promotion {
        Promotion {
            id: id.to_string(),
            name: id.to_string(),
            code: None,
            description: None,
            kind,
            status: PromotionStatus::Active,
            starts_at: None,
            ends_at: None,
            usage_limit: None,
            usage_count: 0,
            per_customer: false,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn percent(rate: u32) -> PromotionKind {
        PromotionKind::Percentage {
            rate: Rate::from_percent(rate),
            max_discount: None,
        }
    }

    fn member() -> Member {
        Member {
            id: "m-1".to_string(),
            member_number: "MEM250314000001".to_string(),
            name: "Nok".to_string(),
            phone: None,
            email: None,
            date_of_birth: None,
            tier: Tier::Bronze,
            total_points: 0,
            available_points: 0,
            used_points: 0,
            expired_points: 0,
            total_spent: Money::zero(),
            total_orders: 0,
            is_active: true,
            last_visit_at: None,
            version: 4,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn snapshot() -> SettlementSnapshot {
        let mut s = SettlementSnapshot::default();
        for p in [product("latte", 100), product("espresso", 50), product("mug", 150)] {
            s.products.insert(p.id.clone(), p);
        }
        s.recipes.insert(
            "latte",
            vec![
                RecipeLine::new("beans", Quantity::from_units(18)),
                RecipeLine::new("milk", Quantity::from_units(200)),
            ],
        );
        s.recipes
            .insert("espresso", vec![RecipeLine::new("beans", Quantity::from_units(9))]);
        for i in [ingredient("beans", 100), ingredient("milk", 1_000)] {
            s.ingredients.insert(i.id.clone(), i);
        }
        s.point_rules.push(PointRule {
            id: "base".to_string(),
            name: "100 spent, 1 point".to_string(),
            kind: PointRuleKind::Purchase,
            spend_amount: Money::from_major(100),
            earn_points: 1,
            bonus_multiplier: None,
            applicable_tiers: vec![],
            priority: 0,
            is_active: true,
            starts_at: None,
            ends_at: None,
            created_at: now(),
        });
        s
    }

    fn lines() -> Vec<OrderLine> {
        vec![
            OrderLine::new("latte", 2),
            OrderLine::new("espresso", 1),
            OrderLine::new("mug", 1),
        ]
    }

    #[test]
    fn test_plan_without_extras() {
        let mut s = snapshot();
        s.active_promotions.clear();
        let plan = Settlement::plan(&SettleOrderRequest::new(lines()), &s, ctx()).unwrap();

        assert_eq!(plan.order.subtotal, Money::from_major(400));
        assert_eq!(plan.order.total, Money::from_major(400));
        assert_eq!(plan.order.status, OrderStatus::Pending);
        assert!(plan.order.order_number.starts_with("ORD-20250314-"));
        assert_eq!(plan.items.len(), 3);

        // beans: 36 + 9, milk: 400
        assert_eq!(plan.stock_updates.len(), 2);
        assert_eq!(plan.stock_updates[0].ingredient_id, "beans");
        assert_eq!(plan.stock_updates[0].new_stock, Quantity::from_units(55));
        assert_eq!(plan.stock_updates[0].expected_version, 7);
        assert_eq!(plan.stock_updates[1].new_stock, Quantity::from_units(600));

        // latte-beans, latte-milk, espresso-beans; the mug has no recipe
        assert_eq!(plan.movements.len(), 3);
        assert_eq!(plan.movements[2].stock_after, Quantity::from_units(55));
        assert_eq!(plan.movements[0].reason.as_deref(), Some("sale - latte"));
        assert!(plan
            .movements
            .iter()
            .all(|m| m.reference.as_deref() == Some(plan.order.id.as_str())));
        assert!(plan.discount.is_none());
        assert!(plan.loyalty.is_none());
    }

    #[test]
    fn test_insufficient_stock_names_aggregate_demand() {
        let req = SettleOrderRequest::new(vec![
            OrderLine::new("latte", 4),
            OrderLine::new("espresso", 4),
        ]);
        let err = Settlement::plan(&req, &snapshot(), ctx()).unwrap_err();
        match err {
            CoreError::InsufficientStock {
                ingredient_id,
                required,
                available,
                ..
            } => {
                assert_eq!(ingredient_id, "beans");
                assert_eq!(required, Quantity::from_units(108));
                assert_eq!(available, Quantity::from_units(100));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_auto_selects_best_promotion() {
        let mut s = snapshot();
        s.active_promotions = vec![promotion("ten", percent(10)), promotion("twenty", percent(20))];
        let plan = Settlement::plan(&SettleOrderRequest::new(lines()), &s, ctx()).unwrap();
        assert_eq!(plan.order.promotion_id.as_deref(), Some("twenty"));
        assert_eq!(plan.order.discount, Money::from_major(80));
        assert_eq!(plan.order.total, Money::from_major(320));
        let usage = plan.promotion_usage.unwrap();
        assert_eq!(usage.discount, Money::from_major(80));
        assert!(plan.coupon_redemption.is_none());
    }

    #[test]
    fn test_auto_selection_can_be_switched_off() {
        let mut s = snapshot();
        s.active_promotions = vec![promotion("ten", percent(10))];
        let req = SettleOrderRequest {
            auto_promotions: Some(false),
            ..SettleOrderRequest::new(lines())
        };
        let plan = Settlement::plan(&req, &s, ctx()).unwrap();
        assert!(plan.discount.is_none());
    }

    fn with_coupon(used: bool) -> SettlementSnapshot {
        let mut s = snapshot();
        s.active_promotions = vec![promotion("thirty", percent(30))];
        s.coupon = Some(Coupon {
            id: "c-1".to_string(),
            code: "WELCOME20".to_string(),
            promotion_id: "welcome".to_string(),
            is_used: used,
            used_at: None,
            used_by: None,
            order_id: None,
            created_at: now(),
        });
        s.coupon_promotion = Some(promotion("welcome", percent(20)));
        s
    }

    #[test]
    fn test_coupon_beats_comparison() {
        let s = with_coupon(false);
        let req = SettleOrderRequest::new(lines()).coupon("welcome20").customer("Ann");
        let plan = Settlement::plan(&req, &s, ctx()).unwrap();

        // The bound 20% is used even though a 30% promotion is active.
        assert_eq!(plan.order.discount, Money::from_major(80));
        assert_eq!(plan.order.coupon_code.as_deref(), Some("WELCOME20"));
        let redemption = plan.coupon_redemption.unwrap();
        assert_eq!(redemption.code, "WELCOME20");
        assert_eq!(redemption.used_by.as_deref(), Some("Ann"));
        assert_eq!(redemption.order_id, plan.order.id);
    }

    #[test]
    fn test_used_coupon_aborts_by_default() {
        let s = with_coupon(true);
        let req = SettleOrderRequest::new(lines()).coupon("WELCOME20");
        let err = Settlement::plan(&req, &s, ctx()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::CouponInvalid {
                reason: CouponRejection::AlreadyUsed,
                ..
            }
        ));
    }

    #[test]
    fn test_used_coupon_can_proceed_without_discount() {
        let s = with_coupon(true);
        let req = SettleOrderRequest {
            invalid_coupon: Some(InvalidCouponPolicy::ProceedWithoutDiscount),
            ..SettleOrderRequest::new(lines()).coupon("WELCOME20")
        };
        let plan = Settlement::plan(&req, &s, ctx()).unwrap();
        assert!(plan.discount.is_none());
        assert!(plan.coupon_redemption.is_none());
        assert_eq!(plan.order.total, Money::from_major(400));
        assert_eq!(plan.notes.len(), 1);
    }

    #[test]
    fn test_explicit_promotion() {
        let mut s = snapshot();
        s.requested_promotion = Some(promotion(
            "save30",
            PromotionKind::FixedAmount {
                amount: Money::from_major(30),
                min_spend: Some(Money::from_major(1_000)),
            },
        ));
        let req = SettleOrderRequest::new(lines()).promotion("save30");
        let plan = Settlement::plan(&req, &s, ctx()).unwrap();
        assert!(plan.discount.is_none());
        assert_eq!(plan.notes, vec!["promotion save30 does not apply to this order"]);

        let missing = SettleOrderRequest::new(lines()).promotion("nope");
        assert!(matches!(
            Settlement::plan(&missing, &s, ctx()),
            Err(CoreError::PromotionNotFound(_))
        ));
    }

    #[test]
    fn test_member_accrues_on_final_total() {
        let mut s = snapshot();
        s.active_promotions = vec![promotion("twenty", percent(20))];
        s.member = Some(member());
        let req = SettleOrderRequest::new(lines()).member("m-1");
        let plan = Settlement::plan(&req, &s, ctx()).unwrap();

        let loyalty = plan.loyalty.unwrap();
        // 320 after discount → 3 points
        assert_eq!(loyalty.points_earned, 3);
        assert_eq!(loyalty.expected_version, 4);
        assert_eq!(loyalty.member.total_spent, Money::from_major(320));
        assert_eq!(loyalty.entries[0].order_id.as_deref(), Some(plan.order.id.as_str()));
        assert_eq!(plan.order.points_earned, 3);
        assert_eq!(plan.order.member_id.as_deref(), Some("m-1"));
    }

    #[test]
    fn test_inactive_member_settles_without_points() {
        let mut s = snapshot();
        s.member = Some(Member {
            is_active: false,
            ..member()
        });
        let req = SettleOrderRequest::new(lines()).member("m-1");
        let plan = Settlement::plan(&req, &s, ctx()).unwrap();
        assert!(plan.loyalty.is_none());
        assert_eq!(plan.notes.len(), 1);
    }

    #[test]
    fn test_client_input_errors() {
        let s = snapshot();
        assert!(matches!(
            Settlement::plan(&SettleOrderRequest::new(vec![]), &s, ctx()),
            Err(CoreError::EmptyOrder)
        ));
        assert!(matches!(
            Settlement::plan(&SettleOrderRequest::new(vec![OrderLine::new("tea", 1)]), &s, ctx()),
            Err(CoreError::ProductNotFound(_))
        ));
        assert!(matches!(
            Settlement::plan(&SettleOrderRequest::new(lines()).member("ghost"), &s, ctx()),
            Err(CoreError::MemberNotFound(_))
        ));
    }

    #[test]
    fn test_stages_advance_in_order() {
        let s = snapshot();
        let req = SettleOrderRequest::new(lines());
        let settlement = Settlement::start(&req, &s, ctx()).unwrap();
        assert_eq!(settlement.stage(), SettlementStage::Started);
        let settlement = settlement.price_items().unwrap();
        assert_eq!(settlement.stage(), SettlementStage::ItemsPriced);
        assert_eq!(settlement.subtotal(), Money::from_major(400));
        let settlement = settlement.reserve_stock().unwrap();
        assert_eq!(settlement.stage(), SettlementStage::StockReserved);
    }
}
