//! # Discount Preview
//!
//! Runs the promotion engine against current state without committing
//! anything, so a cashier can quote a price before settling.
//!
//! ```text
//! DiscountRequest ──► BEGIN ─► snapshot ─► price lines ─► decide ─► ROLLBACK
//!                                                            │
//!                                                  DiscountPreview
//! ```
//!
//! The decision is the one `settle_order` would make at the same instant:
//! coupon first, then an explicit promotion, then auto-selection. A coupon
//! is only validated here; it stays unused.

use brew_core::order::{lines_subtotal, price_line};
use brew_core::settlement::decide_discount;
use brew_core::validation::{normalize_coupon_code, validate_coupon_code};
use brew_core::{CoreError, Money, OrderLine, PricedLine, SaleContext, SettleOrderRequest};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;
use ts_rs::TS;

use crate::error::EngineResult;
use crate::Engine;

/// Input of [`Engine::calculate_discount`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DiscountRequest {
    /// Items of the prospective sale; Buy-X-Get-Y offers need them.
    pub lines: Vec<OrderLine>,
    /// Overrides the subtotal computed from `lines`.
    pub sale_total: Option<Money>,
    pub coupon_code: Option<String>,
    pub promotion_id: Option<String>,
}

/// A price quote.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct DiscountPreview {
    pub subtotal: Money,
    pub discount: Money,
    pub total: Money,
    pub promotion_id: Option<String>,
    pub promotion_name: Option<String>,
    pub coupon_code: Option<String>,
    pub notes: Vec<String>,
}

impl Engine {
    /// Previews the discount of a sale.
    ///
    /// ## Errors
    /// The same refusals as the discount step of `settle_order`
    /// (`CouponInvalid` under the `abort` policy, `PromotionNotFound`) plus
    /// `EmptyOrder` when neither lines nor `sale_total` are given.
    pub async fn calculate_discount(&self, request: DiscountRequest) -> EngineResult<DiscountPreview> {
        if request.lines.is_empty() && request.sale_total.is_none() {
            return Err(CoreError::EmptyOrder.into());
        }
        let coupon_code = match request.coupon_code.as_deref() {
            Some(code) => {
                validate_coupon_code(code).map_err(CoreError::from)?;
                Some(normalize_coupon_code(code))
            }
            None => None,
        };

        let probe = SettleOrderRequest {
            lines: request.lines,
            coupon_code: coupon_code.clone(),
            promotion_id: request.promotion_id,
            ..Default::default()
        };

        let ctx = self.settlement_context(Utc::now());
        let mut uow = self.db.begin().await?;
        let snapshot = uow.settlement_snapshot(&probe).await?;
        uow.rollback().await?;

        let lines = probe
            .lines
            .iter()
            .map(|line| {
                let product = snapshot
                    .products
                    .get(&line.product_id)
                    .ok_or_else(|| CoreError::ProductNotFound(line.product_id.clone()))?;
                price_line(line, product)
            })
            .collect::<Result<Vec<PricedLine>, CoreError>>()?;

        let subtotal = match request.sale_total {
            Some(total) => total,
            None => lines_subtotal(&lines)?,
        };
        let sale = SaleContext::with_subtotal(subtotal, &lines, ctx.now, ctx.utc_offset);

        let decision = decide_discount(
            coupon_code.as_deref(),
            probe.promotion_id.as_deref(),
            ctx.auto_promotions,
            ctx.invalid_coupon,
            &snapshot,
            &sale,
        )?;

        let discount = decision
            .quote
            .as_ref()
            .map_or(Money::zero(), |q| q.discount);
        debug!(
            subtotal = %subtotal,
            discount = %discount,
            promotion = decision.quote.as_ref().map(|q| q.promotion_id.as_str()),
            "Discount previewed"
        );

        Ok(DiscountPreview {
            subtotal,
            discount,
            total: subtotal.saturating_sub_to_zero(discount),
            promotion_id: decision.quote.as_ref().map(|q| q.promotion_id.clone()),
            promotion_name: decision.quote.as_ref().map(|q| q.promotion_name.clone()),
            coupon_code: decision.quote.and_then(|q| q.coupon_code),
            notes: decision.notes,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{coupon, engine, menu, promotion};
    use brew_core::{CouponRejection, PromotionKind, Rate};

    fn percentage(id: &str, percent: u32, cap: Option<i64>) -> brew_core::Promotion {
        promotion(
            id,
            PromotionKind::Percentage {
                rate: Rate::from_percent(percent),
                max_discount: cap.map(Money::from_major),
            },
            10,
        )
    }

    #[tokio::test]
    async fn test_percentage_and_cap() {
        let engine = engine().await;
        menu(&engine).await;
        let promotions = engine.db().promotions();
        promotions.create(&percentage("twenty", 20, None)).await.unwrap();
        promotions.create(&percentage("twenty-capped", 20, Some(50))).await.unwrap();

        let five_americanos = vec![OrderLine::new("americano", 5)];
        let preview = engine
            .calculate_discount(DiscountRequest {
                lines: five_americanos.clone(),
                promotion_id: Some("twenty".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(preview.subtotal, Money::from_major(300));
        assert_eq!(preview.discount, Money::from_major(60));
        assert_eq!(preview.total, Money::from_major(240));

        let capped = engine
            .calculate_discount(DiscountRequest {
                lines: five_americanos,
                promotion_id: Some("twenty-capped".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(capped.discount, Money::from_major(50));
    }

    #[tokio::test]
    async fn test_fixed_amount_min_spend() {
        let engine = engine().await;
        engine
            .db()
            .promotions()
            .create(&promotion(
                "save30",
                PromotionKind::FixedAmount {
                    amount: Money::from_major(30),
                    min_spend: Some(Money::from_major(100)),
                },
                10,
            ))
            .await
            .unwrap();

        let quote = |total: i64| DiscountRequest {
            sale_total: Some(Money::from_major(total)),
            promotion_id: Some("save30".into()),
            ..Default::default()
        };

        let below = engine.calculate_discount(quote(90)).await.unwrap();
        assert_eq!(below.discount, Money::zero());
        assert_eq!(below.total, Money::from_major(90));
        assert_eq!(below.notes.len(), 1);

        let above = engine.calculate_discount(quote(150)).await.unwrap();
        assert_eq!(above.discount, Money::from_major(30));
        assert_eq!(above.promotion_id.as_deref(), Some("save30"));
    }

    #[tokio::test]
    async fn test_auto_selects_best() {
        let engine = engine().await;
        menu(&engine).await;
        let promotions = engine.db().promotions();
        promotions.create(&percentage("ten", 10, None)).await.unwrap();
        promotions.create(&percentage("fifteen", 15, None)).await.unwrap();

        let preview = engine
            .calculate_discount(DiscountRequest {
                lines: vec![OrderLine::new("latte", 2)],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(preview.promotion_id.as_deref(), Some("fifteen"));
        assert_eq!(preview.discount, Money::from_cents(2_250));
    }

    #[tokio::test]
    async fn test_coupon_preview_leaves_coupon_unused() {
        let engine = engine().await;
        menu(&engine).await;
        coupon(&engine, &percentage("welcome", 20, Some(50)), "WELCOME20").await;

        let preview = engine
            .calculate_discount(DiscountRequest {
                lines: vec![OrderLine::new("latte", 2)],
                coupon_code: Some(" welcome20 ".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(preview.discount, Money::from_major(30));
        assert_eq!(preview.coupon_code.as_deref(), Some("WELCOME20"));

        let (stored, _) = engine
            .db()
            .promotions()
            .find_coupon("WELCOME20")
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.is_used);
    }

    #[tokio::test]
    async fn test_unknown_coupon_is_refused() {
        let engine = engine().await;
        menu(&engine).await;

        let err = engine
            .calculate_discount(DiscountRequest {
                lines: vec![OrderLine::new("latte", 1)],
                coupon_code: Some("NOPE".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_core(),
            Some(CoreError::CouponInvalid {
                reason: CouponRejection::NotFound,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_empty_request() {
        let engine = engine().await;
        let err = engine
            .calculate_discount(DiscountRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err.as_core(), Some(CoreError::EmptyOrder)));
    }
}
