//! # Unit of Work
//!
//! One SQLite transaction that reads a consistent snapshot, then applies a
//! posting computed by `brew_core` from that snapshot.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  let mut uow = db.begin().await?;                                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  uow.settlement_snapshot(&request)  ← reads inside the transaction     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Settlement::plan(...)              ← pure, in brew-core               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  uow.apply_settlement(&plan)        ← CAS writes                       │
//! │       │         │                                                       │
//! │       │         └── Conflict ──► uow dropped ──► ROLLBACK, retry       │
//! │       ▼                                                                 │
//! │  uow.commit()                       ← everything, or nothing           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Dropping a unit of work without committing rolls it back.

use std::collections::{BTreeMap, BTreeSet};

use brew_core::{
    Coupon, ExpiryPosting, Ingredient, LoyaltyPosting, Member, PointHistory, PointRule, Product,
    Promotion, RecipeBook, RedemptionPosting, Reward, SettleOrderRequest, SettlementPlan,
    SettlementSnapshot, StockPosting,
};
use serde::Serialize;
use sqlx::{Sqlite, Transaction};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::{
    inventory, member, order, outbox, point_rule, product, promotion, recipe, reward,
};

/// Outbox payload of a settled order.
#[derive(Serialize)]
struct OrderPayload<'a> {
    order: &'a brew_core::Order,
    items: &'a [brew_core::OrderItem],
    notes: &'a [String],
}

/// An open transaction. See the module docs.
pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
}

impl UnitOfWork {
    pub(crate) fn new(tx: Transaction<'static, Sqlite>) -> Self {
        UnitOfWork { tx }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn product(&mut self, id: &str) -> DbResult<Option<Product>> {
        product::fetch_product(&mut self.tx, id).await
    }

    pub async fn products(&mut self, ids: &[&str]) -> DbResult<Vec<Product>> {
        product::fetch_products(&mut self.tx, ids).await
    }

    pub async fn recipes(&mut self, product_ids: &[&str]) -> DbResult<RecipeBook> {
        recipe::fetch_book(&mut self.tx, product_ids).await
    }

    pub async fn ingredient(&mut self, id: &str) -> DbResult<Option<Ingredient>> {
        inventory::fetch_ingredient(&mut self.tx, id).await
    }

    pub async fn ingredients(&mut self, ids: &[&str]) -> DbResult<Vec<Ingredient>> {
        inventory::fetch_ingredients(&mut self.tx, ids).await
    }

    pub async fn active_promotions(&mut self) -> DbResult<Vec<Promotion>> {
        promotion::fetch_active_promotions(&mut self.tx).await
    }

    pub async fn promotion(&mut self, id: &str) -> DbResult<Option<Promotion>> {
        promotion::fetch_promotion(&mut self.tx, id).await
    }

    /// Looks a coupon up by code, case-insensitively.
    pub async fn coupon(&mut self, code: &str) -> DbResult<Option<Coupon>> {
        promotion::fetch_coupon(&mut self.tx, code).await
    }

    pub async fn member(&mut self, id: &str) -> DbResult<Option<Member>> {
        member::fetch_member(&mut self.tx, id).await
    }

    pub async fn active_point_rules(&mut self) -> DbResult<Vec<PointRule>> {
        point_rule::fetch_active_rules(&mut self.tx).await
    }

    pub async fn reward(&mut self, id: &str) -> DbResult<Option<Reward>> {
        reward::fetch_reward(&mut self.tx, id).await
    }

    /// How often a member has redeemed a reward (cancelled ones excluded).
    pub async fn redemption_count(&mut self, member_id: &str, reward_id: &str) -> DbResult<i64> {
        reward::count_redemptions(&mut self.tx, member_id, reward_id).await
    }

    /// Unprocessed EARN entries with an expiry date, grouped by member.
    pub async fn expiring_entries(&mut self) -> DbResult<BTreeMap<String, Vec<PointHistory>>> {
        let mut by_member: BTreeMap<String, Vec<PointHistory>> = BTreeMap::new();
        for entry in member::fetch_expiring_entries(&mut self.tx).await? {
            by_member.entry(entry.member_id.clone()).or_default().push(entry);
        }
        Ok(by_member)
    }

    /// Loads everything a settlement of `request` reads.
    ///
    /// Lookups that find nothing are left empty; the planner turns the
    /// absences that matter into errors.
    pub async fn settlement_snapshot(
        &mut self,
        request: &SettleOrderRequest,
    ) -> DbResult<SettlementSnapshot> {
        let product_ids: Vec<&str> = request
            .lines
            .iter()
            .map(|l| l.product_id.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let products = self.products(&product_ids).await?;
        let recipes = self.recipes(&product_ids).await?;
        let ingredient_ids: Vec<&str> = recipes
            .ingredient_ids()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let ingredients = self.ingredients(&ingredient_ids).await?;

        let active_promotions = self.active_promotions().await?;
        let requested_promotion = match &request.promotion_id {
            Some(id) => self.promotion(id).await?,
            None => None,
        };
        let coupon = match &request.coupon_code {
            Some(code) => self.coupon(code).await?,
            None => None,
        };
        let coupon_promotion = match &coupon {
            Some(c) => self.promotion(&c.promotion_id).await?,
            None => None,
        };
        let member = match &request.member_id {
            Some(id) => self.member(id).await?,
            None => None,
        };
        let point_rules = if member.is_some() {
            self.active_point_rules().await?
        } else {
            Vec::new()
        };

        debug!(
            products = products.len(),
            ingredients = ingredients.len(),
            promotions = active_promotions.len(),
            coupon = coupon.is_some(),
            member = member.is_some(),
            "Settlement snapshot loaded"
        );

        Ok(SettlementSnapshot {
            products: products.into_iter().map(|p| (p.id.clone(), p)).collect(),
            recipes,
            ingredients: ingredients.into_iter().map(|i| (i.id.clone(), i)).collect(),
            active_promotions,
            requested_promotion,
            coupon,
            coupon_promotion,
            member,
            point_rules,
        })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Applies every write of a settlement.
    ///
    /// ## Order
    /// 1. order and items
    /// 2. stock: CAS per ingredient, then the movements
    /// 3. coupon "unused → used", promotion usage (limit-guarded)
    /// 4. member CAS, ledger entries, tier upgrade
    /// 5. outbox `ORDER`
    ///
    /// ## Errors
    /// `Conflict` from any guarded write. The caller drops the unit of work
    /// (rolling everything back) and may retry from a fresh snapshot.
    pub async fn apply_settlement(&mut self, plan: &SettlementPlan) -> DbResult<()> {
        let now = plan.order.created_at;

        order::insert_order(&mut self.tx, &plan.order).await?;
        for item in &plan.items {
            order::insert_item(&mut self.tx, item).await?;
        }

        for update in &plan.stock_updates {
            inventory::update_stock(&mut self.tx, update, now).await?;
        }
        for movement in &plan.movements {
            inventory::insert_movement(&mut self.tx, movement).await?;
        }

        if let Some(redemption) = &plan.coupon_redemption {
            promotion::redeem_coupon(&mut self.tx, redemption).await?;
        }
        if let Some(usage) = &plan.promotion_usage {
            promotion::record_usage(&mut self.tx, usage).await?;
        }

        if let Some(posting) = &plan.loyalty {
            self.apply_loyalty(posting).await?;
        }

        let payload = serde_json::to_string(&OrderPayload {
            order: &plan.order,
            items: &plan.items,
            notes: &plan.notes,
        })
        .map_err(|e| DbError::Internal(format!("encode order payload: {e}")))?;
        outbox::queue(&mut self.tx, "ORDER", &plan.order.id, &payload, now).await?;

        debug!(order_id = %plan.order.id, "Settlement writes applied");
        Ok(())
    }

    /// One manual stock movement.
    pub async fn apply_stock_posting(&mut self, posting: &StockPosting) -> DbResult<()> {
        inventory::apply_posting(&mut self.tx, posting).await
    }

    /// Member balances, ledger entries and a tier upgrade.
    pub async fn apply_loyalty(&mut self, posting: &LoyaltyPosting) -> DbResult<()> {
        member::update_member(&mut self.tx, &posting.member, posting.expected_version).await?;
        for entry in &posting.entries {
            member::insert_history(&mut self.tx, entry).await?;
        }
        if let Some(upgrade) = &posting.upgrade {
            member::insert_upgrade(&mut self.tx, upgrade).await?;
        }
        Ok(())
    }

    pub async fn apply_redemption(&mut self, posting: &RedemptionPosting) -> DbResult<()> {
        member::update_member(&mut self.tx, &posting.member, posting.expected_version).await?;
        reward::insert_redemption(&mut self.tx, &posting.redemption).await?;
        member::insert_history(&mut self.tx, &posting.entry).await
    }

    pub async fn apply_expiry(&mut self, posting: &ExpiryPosting) -> DbResult<()> {
        member::update_member(&mut self.tx, &posting.member, posting.expected_version).await?;
        for id in &posting.expired_entry_ids {
            member::mark_expired(&mut self.tx, id).await?;
        }
        if let Some(entry) = &posting.entry {
            member::insert_history(&mut self.tx, entry).await?;
        }
        Ok(())
    }

    /// Stores a freshly registered member and its welcome entry.
    pub async fn insert_member(
        &mut self,
        member: &Member,
        welcome: Option<&PointHistory>,
    ) -> DbResult<()> {
        member::insert_member(&mut self.tx, member).await?;
        if let Some(entry) = welcome {
            member::insert_history(&mut self.tx, entry).await?;
        }
        Ok(())
    }

    // =========================================================================
    // End
    // =========================================================================

    pub async fn commit(self) -> DbResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> DbResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
