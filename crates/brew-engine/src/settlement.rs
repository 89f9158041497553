//! # Settle Order
//!
//! The single entry point for finalizing a sale.
//!
//! ## One Attempt
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BEGIN                                                                  │
//! │    snapshot: products, recipes, ingredients, promotions, coupon,       │
//! │              member, point rules                                       │
//! │    Started → ItemsPriced → StockReserved → DiscountApplied             │
//! │            → PointsAccrued                 (pure, brew-core)           │
//! │    apply plan: order, items, stock CAS, movements, coupon CAS,         │
//! │                usage, member CAS, ledger, outbox                       │
//! │  COMMIT → Committed                                                    │
//! │                                                                         │
//! │  any CoreError ──► Aborted, tx dropped, nothing written                │
//! │  DbError::Conflict ──► tx dropped, next attempt                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use brew_core::{
    CoreError, DiscountQuote, Order, OrderItem, SettleOrderRequest, Settlement, SettlementStage,
    TierUpgrade,
};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::EngineResult;
use crate::retry::with_conflict_retry;
use crate::Engine;

/// A committed settlement.
#[derive(Debug, Clone, Serialize)]
pub struct SettledOrder {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub discount: Option<DiscountQuote>,
    pub tier_upgrade: Option<TierUpgrade>,
    /// Things that did not stop the sale, e.g. a refused coupon under
    /// `proceed_without_discount`.
    pub notes: Vec<String>,
}

impl Engine {
    /// Settles one sale atomically.
    ///
    /// ## Errors
    /// - `InsufficientStock` naming the first short ingredient
    /// - `CouponInvalid` under the `abort` policy
    /// - `ProductNotFound`, `MemberNotFound`, `PromotionNotFound`, ...
    /// - `Conflict` when concurrent writers kept winning for
    ///   `max_attempts` attempts
    ///
    /// On every error the store is exactly as before the call.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let settled = engine
    ///     .settle_order(SettleOrderRequest::new(vec![OrderLine::new("latte", 2)]))
    ///     .await?;
    /// ```
    pub async fn settle_order(&self, request: SettleOrderRequest) -> EngineResult<SettledOrder> {
        let request = &request;
        with_conflict_retry(&self.retry, "settle_order", move |attempt| {
            self.settle_attempt(request, attempt)
        })
        .await
    }

    async fn settle_attempt(
        &self,
        request: &SettleOrderRequest,
        attempt: u32,
    ) -> EngineResult<SettledOrder> {
        let ctx = self.settlement_context(Utc::now());
        let mut uow = self.db.begin().await?;
        let snapshot = uow.settlement_snapshot(request).await?;

        let settlement = Settlement::start(request, &snapshot, ctx)
            .map_err(|e| aborted(SettlementStage::Started, "-", e))?;
        let order_id = settlement.order_id().to_string();
        debug!(order_id = %order_id, attempt, lines = request.lines.len(), "Settlement started");

        let settlement = settlement
            .price_items()
            .map_err(|e| aborted(SettlementStage::Started, &order_id, e))?;
        debug!(
            order_id = %order_id,
            stage = %settlement.stage(),
            subtotal = %settlement.subtotal(),
            "Items priced"
        );

        let settlement = settlement
            .reserve_stock()
            .map_err(|e| aborted(SettlementStage::ItemsPriced, &order_id, e))?;
        debug!(order_id = %order_id, stage = %settlement.stage(), "Stock reserved");

        let settlement = settlement
            .apply_discount()
            .map_err(|e| aborted(SettlementStage::StockReserved, &order_id, e))?;
        debug!(
            order_id = %order_id,
            stage = %settlement.stage(),
            total = %settlement.total(),
            "Discount applied"
        );

        let settlement = settlement
            .accrue_points()
            .map_err(|e| aborted(SettlementStage::DiscountApplied, &order_id, e))?;
        debug!(order_id = %order_id, stage = %settlement.stage(), "Points accrued");

        let plan = settlement.into_plan();
        uow.apply_settlement(&plan).await?;
        uow.commit().await?;

        info!(
            order_id = %plan.order.id,
            order_number = %plan.order.order_number,
            stage = %SettlementStage::Committed,
            subtotal = %plan.order.subtotal,
            discount = %plan.order.discount,
            total = %plan.order.total,
            points = plan.order.points_earned,
            attempt,
            "Settlement committed"
        );

        Ok(SettledOrder {
            tier_upgrade: plan.loyalty.as_ref().and_then(|l| l.upgrade.clone()),
            order: plan.order,
            items: plan.items,
            discount: plan.discount,
            notes: plan.notes,
        })
    }
}

/// Logs the abort of an attempt that failed while leaving `stage`.
fn aborted(stage: SettlementStage, order_id: &str, err: CoreError) -> crate::EngineError {
    debug!(
        order_id = %order_id,
        from = %stage,
        stage = %SettlementStage::Aborted,
        error = %err,
        "Settlement aborted"
    );
    err.into()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{engine, menu};
    use brew_core::{OrderLine, OrderStatus, Quantity};

    #[tokio::test]
    async fn test_settle_plain_order() {
        let engine = engine().await;
        menu(&engine).await;

        let settled = engine
            .settle_order(SettleOrderRequest::new(vec![OrderLine::new("latte", 2)]))
            .await
            .unwrap();

        assert_eq!(settled.order.status, OrderStatus::Pending);
        assert_eq!(settled.order.subtotal.major(), 150);
        assert_eq!(settled.order.total.major(), 150);
        assert!(settled.order.order_number.starts_with("ORD-"));
        assert_eq!(settled.items.len(), 1);

        let milk = engine.db().ingredients().get("milk").await.unwrap();
        assert_eq!(milk.current_stock, Quantity::from_units(1_000 - 400));

        let movements = engine
            .db()
            .ingredients()
            .movements_for_reference(&settled.order.id)
            .await
            .unwrap();
        assert_eq!(movements.len(), 2);
        assert!(movements
            .iter()
            .all(|m| m.reason.as_deref() == Some("sale - Cafe Latte")));

        assert_eq!(engine.db().outbox().count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_product_writes_nothing() {
        let engine = engine().await;
        menu(&engine).await;

        let err = engine
            .settle_order(SettleOrderRequest::new(vec![
                OrderLine::new("latte", 1),
                OrderLine::new("unicorn-frappe", 1),
            ]))
            .await
            .unwrap_err();

        assert!(matches!(err.as_core(), Some(CoreError::ProductNotFound(_))));
        assert_eq!(engine.db().orders().count().await.unwrap(), 0);
        let beans = engine.db().ingredients().get("beans").await.unwrap();
        assert_eq!(beans.current_stock, Quantity::from_units(1_000));
    }
}
