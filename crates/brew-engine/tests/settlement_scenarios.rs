//! End-to-end settlement scenarios against a real SQLite store.
//!
//! Races run on a file database with several pooled connections so that
//! settlements genuinely overlap; everything else uses an in-memory store.

use std::path::PathBuf;

use brew_core::{
    Coupon, CouponRejection, CoreError, Ingredient, InvalidCouponPolicy, Member, Money, NewMember,
    OrderLine, PointKind, PointRule, PointRuleKind, Product, Promotion, PromotionKind,
    PromotionStatus, Quantity, Rate, RecipeLine, SettleOrderRequest, StockDirection, Tier,
};
use brew_db::{Database, DbConfig};
use brew_engine::{Engine, EngineConfig, EngineError, SettledOrder};
use chrono::{Duration, Utc};
use uuid::Uuid;

// =============================================================================
// Fixtures
// =============================================================================

fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.settlement.max_attempts = 10;
    config.settlement.initial_backoff_ms = 2;
    config.settlement.max_backoff_ms = 40;
    config
}

async fn memory_engine() -> Engine {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    Engine::new(db, fast_config()).unwrap()
}

/// A throwaway database file, removed on drop.
struct TempDb(PathBuf);

impl TempDb {
    fn new() -> Self {
        TempDb(std::env::temp_dir().join(format!("brew-{}.db", Uuid::new_v4())))
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut path = self.0.clone().into_os_string();
            path.push(suffix);
            let _ = std::fs::remove_file(path);
        }
    }
}

async fn file_engine(file: &TempDb) -> Engine {
    let db = Database::new(DbConfig::new(&file.0).max_connections(4))
        .await
        .unwrap();
    Engine::new(db, fast_config()).unwrap()
}

fn ingredient(id: &str, stock: i64) -> Ingredient {
    let now = Utc::now();
    Ingredient {
        id: id.to_string(),
        name: id.to_string(),
        unit: "g".to_string(),
        cost_per_unit: Money::from_cents(5),
        current_stock: Quantity::from_units(stock),
        min_stock: Quantity::zero(),
        max_stock: None,
        supplier: None,
        version: 0,
        created_at: now,
        updated_at: now,
    }
}

fn product(id: &str, price: i64) -> Product {
    let now = Utc::now();
    Product {
        id: id.to_string(),
        name: id.to_string(),
        category: None,
        price: Money::from_major(price),
        is_available: true,
        created_at: now,
        updated_at: now,
    }
}

/// latte 75 (beans 18, milk 200), americano 60 (beans 18), croissant 55.
async fn menu(engine: &Engine, croissants: i64) {
    let db = engine.db();
    for item in [
        ingredient("beans", 1_000),
        ingredient("milk", 1_000),
        ingredient("croissant", croissants),
    ] {
        db.ingredients().create(&item).await.unwrap();
    }
    for (item, recipe) in [
        (
            product("latte", 75),
            vec![
                RecipeLine::new("beans", Quantity::from_units(18)),
                RecipeLine::new("milk", Quantity::from_units(200)),
            ],
        ),
        (
            product("americano", 60),
            vec![RecipeLine::new("beans", Quantity::from_units(18))],
        ),
        (
            product("croissant", 55),
            vec![RecipeLine::new("croissant", Quantity::from_units(1))],
        ),
    ] {
        db.products().create(&item).await.unwrap();
        db.recipes().set_recipe(&item.id, &recipe).await.unwrap();
    }
}

fn promotion(id: &str, kind: PromotionKind) -> Promotion {
    let now = Utc::now() - Duration::minutes(5);
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
        created_at: now,
        updated_at: now,
    }
}

/// WELCOME20: 20% off, at most 50.
async fn welcome_coupon(engine: &Engine) {
    let promotions = engine.db().promotions();
    promotions
        .create(&promotion(
            "welcome",
            PromotionKind::Percentage {
                rate: Rate::from_percent(20),
                max_discount: Some(Money::from_major(50)),
            },
        ))
        .await
        .unwrap();
    promotions
        .create_coupon(&Coupon {
            id: "coupon-welcome".to_string(),
            code: "WELCOME20".to_string(),
            promotion_id: "welcome".to_string(),
            is_used: false,
            used_at: None,
            used_by: None,
            order_id: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
}

async fn member(engine: &Engine) -> Member {
    engine
        .register_member(NewMember {
            name: "Ploy".to_string(),
            ..Default::default()
        })
        .await
        .unwrap()
}

fn purchase_rule() -> PointRule {
    PointRule {
        id: "per-100".to_string(),
        name: "1 point per 100".to_string(),
        kind: PointRuleKind::Purchase,
        spend_amount: Money::from_major(100),
        earn_points: 1,
        bonus_multiplier: None,
        applicable_tiers: Vec::new(),
        priority: 0,
        is_active: true,
        starts_at: None,
        ends_at: None,
        created_at: Utc::now(),
    }
}

async fn settle_concurrently(
    engine: &Engine,
    requests: Vec<SettleOrderRequest>,
) -> Vec<Result<SettledOrder, EngineError>> {
    let handles: Vec<_> = requests
        .into_iter()
        .map(|request| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.settle_order(request).await })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

// =============================================================================
// Races
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_coupon_redemption_has_one_winner() {
    let file = TempDb::new();
    let engine = file_engine(&file).await;
    menu(&engine, 10).await;
    welcome_coupon(&engine).await;

    let requests = (0..4)
        .map(|_| SettleOrderRequest::new(vec![OrderLine::new("latte", 2)]).coupon("WELCOME20"))
        .collect();
    let results = settle_concurrently(&engine, requests).await;

    let winners: Vec<&SettledOrder> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            matches!(
                err.as_core(),
                Some(CoreError::CouponInvalid {
                    reason: CouponRejection::AlreadyUsed,
                    ..
                })
            ),
            "unexpected error: {err}"
        );
    }

    let winner = winners[0];
    assert_eq!(winner.order.discount, Money::from_major(30));

    let promotions = engine.db().promotions();
    let (coupon, _) = promotions.find_coupon("WELCOME20").await.unwrap().unwrap();
    assert!(coupon.is_used);
    assert_eq!(coupon.order_id.as_deref(), Some(winner.order.id.as_str()));
    assert_eq!(promotions.get("welcome").await.unwrap().usage_count, 1);
    assert_eq!(promotions.usages("welcome").await.unwrap().len(), 1);
    assert_eq!(engine.db().orders().count().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_orders_never_overdraw_stock() {
    let file = TempDb::new();
    let engine = file_engine(&file).await;
    menu(&engine, 10).await;

    let requests = (0..2)
        .map(|_| SettleOrderRequest::new(vec![OrderLine::new("croissant", 6)]))
        .collect();
    let results = settle_concurrently(&engine, requests).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let err = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    match err.as_core() {
        Some(CoreError::InsufficientStock {
            ingredient_id,
            required,
            available,
            ..
        }) => {
            assert_eq!(ingredient_id, "croissant");
            assert_eq!(*required, Quantity::from_units(6));
            assert_eq!(*available, Quantity::from_units(4));
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }

    let croissant = engine.db().ingredients().get("croissant").await.unwrap();
    assert_eq!(croissant.current_stock, Quantity::from_units(4));
    assert!(engine.audit_ledgers().await.unwrap().is_clean());
}

// =============================================================================
// Atomicity
// =============================================================================

#[tokio::test]
async fn test_short_ingredient_aborts_everything() {
    let engine = memory_engine().await;
    menu(&engine, 10).await;
    welcome_coupon(&engine).await;
    engine.db().point_rules().create(&purchase_rule()).await.unwrap();
    let m = member(&engine).await;

    let err = engine
        .settle_order(
            SettleOrderRequest::new(vec![
                OrderLine::new("latte", 1),
                OrderLine::new("croissant", 11),
            ])
            .coupon("WELCOME20")
            .member(m.id.clone()),
        )
        .await
        .unwrap_err();
    match err.as_core() {
        Some(CoreError::InsufficientStock { ingredient_id, .. }) => {
            assert_eq!(ingredient_id, "croissant")
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }

    let db = engine.db();
    assert_eq!(db.orders().count().await.unwrap(), 0);
    assert_eq!(db.outbox().count_pending().await.unwrap(), 0);
    for id in ["beans", "milk"] {
        assert_eq!(
            db.ingredients().get(id).await.unwrap().current_stock,
            Quantity::from_units(1_000)
        );
        assert_eq!(db.ingredients().movements(id).await.unwrap().len(), 1);
    }
    let (coupon, _) = db.promotions().find_coupon("WELCOME20").await.unwrap().unwrap();
    assert!(!coupon.is_used);
    assert_eq!(db.promotions().get("welcome").await.unwrap().usage_count, 0);
    let stored = db.members().get(&m.id).await.unwrap();
    assert_eq!(stored.balances(), m.balances());
    assert_eq!(stored.version, m.version);
    assert_eq!(stored.total_orders, 0);
}

#[tokio::test]
async fn test_overflowing_register_price_is_rejected() {
    let engine = memory_engine().await;
    menu(&engine, 10).await;

    let err = engine
        .settle_order(SettleOrderRequest::new(vec![
            OrderLine::new("latte", 3).at(Money::from_cents(i64::MAX / 2)),
        ]))
        .await
        .unwrap_err();
    assert!(matches!(err.as_core(), Some(CoreError::Validation(_))));

    let db = engine.db();
    assert_eq!(db.orders().count().await.unwrap(), 0);
    assert_eq!(
        db.ingredients().get("beans").await.unwrap().current_stock,
        Quantity::from_units(1_000)
    );
}

#[tokio::test]
async fn test_invalid_coupon_policies() {
    let engine = memory_engine().await;
    menu(&engine, 10).await;

    let abort = engine
        .settle_order(SettleOrderRequest::new(vec![OrderLine::new("latte", 1)]).coupon("BOGUS"))
        .await
        .unwrap_err();
    assert!(matches!(
        abort.as_core(),
        Some(CoreError::CouponInvalid {
            reason: CouponRejection::NotFound,
            ..
        })
    ));
    assert_eq!(engine.db().orders().count().await.unwrap(), 0);

    let mut lenient = SettleOrderRequest::new(vec![OrderLine::new("latte", 1)]).coupon("BOGUS");
    lenient.invalid_coupon = Some(InvalidCouponPolicy::ProceedWithoutDiscount);
    let settled = engine.settle_order(lenient).await.unwrap();
    assert_eq!(settled.order.total, Money::from_major(75));
    assert!(settled.discount.is_none());
    assert_eq!(settled.notes.len(), 1);
    assert!(settled.notes[0].contains("BOGUS"));
}

// =============================================================================
// Discounts and Loyalty
// =============================================================================

#[tokio::test]
async fn test_auto_selection_prefers_largest_discount() {
    let engine = memory_engine().await;
    menu(&engine, 10).await;
    let promotions = engine.db().promotions();
    promotions
        .create(&promotion(
            "ten-percent",
            PromotionKind::Percentage {
                rate: Rate::from_percent(10),
                max_discount: None,
            },
        ))
        .await
        .unwrap();
    promotions
        .create(&promotion(
            "pastry-3for2",
            PromotionKind::BuyXGetY {
                buy_quantity: 2,
                get_quantity: 1,
                applicable_products: vec!["croissant".to_string()],
            },
        ))
        .await
        .unwrap();

    let settled = engine
        .settle_order(SettleOrderRequest::new(vec![OrderLine::new("croissant", 3)]))
        .await
        .unwrap();
    assert_eq!(settled.order.promotion_id.as_deref(), Some("pastry-3for2"));
    assert_eq!(settled.order.discount, Money::from_major(55));
    assert_eq!(settled.order.total, Money::from_major(110));
    assert_eq!(promotions.get("pastry-3for2").await.unwrap().usage_count, 1);
    assert_eq!(promotions.get("ten-percent").await.unwrap().usage_count, 0);
}

#[tokio::test]
async fn test_points_accrue_on_discounted_total() {
    let engine = memory_engine().await;
    menu(&engine, 10).await;
    welcome_coupon(&engine).await;
    engine.db().point_rules().create(&purchase_rule()).await.unwrap();
    let m = member(&engine).await;

    // 5 x 60 = 300, 20% capped at 50 → 250 → 2 points
    let settled = engine
        .settle_order(
            SettleOrderRequest::new(vec![OrderLine::new("americano", 5)])
                .coupon("welcome20")
                .member(m.id.clone()),
        )
        .await
        .unwrap();
    assert_eq!(settled.order.total, Money::from_major(250));
    assert_eq!(settled.order.points_earned, 2);
    assert_eq!(settled.order.coupon_code.as_deref(), Some("WELCOME20"));

    let stored = engine.db().members().get(&m.id).await.unwrap();
    assert_eq!(stored.available_points, 12);
    assert_eq!(stored.total_spent, Money::from_major(250));
    assert_eq!(stored.total_orders, 1);

    let history = engine.db().members().history(&m.id).await.unwrap();
    let earn = history.iter().find(|e| e.kind == PointKind::Earn).unwrap();
    assert_eq!(earn.order_id.as_deref(), Some(settled.order.id.as_str()));
}

#[tokio::test]
async fn test_settlement_crossing_silver_threshold() {
    let engine = memory_engine().await;
    menu(&engine, 10).await;
    let m = member(&engine).await;

    // 19 orders, 4940 spent
    for _ in 0..19 {
        engine
            .earn_points(&m.id, None, 0, Some(Money::from_major(260)))
            .await
            .unwrap();
    }
    let before = engine.db().members().get(&m.id).await.unwrap();
    assert_eq!(before.tier, Tier::Bronze);
    assert_eq!(before.total_spent, Money::from_major(4_940));

    let settled = engine
        .settle_order(SettleOrderRequest::new(vec![OrderLine::new("americano", 1)]).member(m.id.clone()))
        .await
        .unwrap();
    let upgrade = settled.tier_upgrade.unwrap();
    assert_eq!(upgrade.from_tier, Tier::Bronze);
    assert_eq!(upgrade.to_tier, Tier::Silver);

    let after = engine.db().members().get(&m.id).await.unwrap();
    assert_eq!(after.tier, Tier::Silver);
    assert_eq!(after.available_points, before.available_points + 50);
}

// =============================================================================
// Ledgers
// =============================================================================

#[tokio::test]
async fn test_ledgers_replay_after_mixed_traffic() {
    let engine = memory_engine().await;
    menu(&engine, 10).await;
    welcome_coupon(&engine).await;
    engine.db().point_rules().create(&purchase_rule()).await.unwrap();
    let m = member(&engine).await;

    engine
        .settle_order(
            SettleOrderRequest::new(vec![OrderLine::new("latte", 2), OrderLine::new("croissant", 2)])
                .coupon("WELCOME20")
                .member(m.id.clone()),
        )
        .await
        .unwrap();
    engine
        .settle_order(SettleOrderRequest::new(vec![OrderLine::new("americano", 4)]).member(m.id.clone()))
        .await
        .unwrap();
    engine
        .adjust_stock("milk", StockDirection::In, Quantity::from_milli(250_500), Some("delivery".into()))
        .await
        .unwrap();
    engine
        .adjust_stock("beans", StockDirection::Out, Quantity::from_units(3), Some("spilled".into()))
        .await
        .unwrap();
    engine.expire_points(Utc::now() + Duration::days(400)).await.unwrap();

    let first = engine.audit_ledgers().await.unwrap();
    assert!(first.is_clean(), "{:?}", first.drifts);

    // replay is read-only
    let second = engine.audit_ledgers().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(
        engine.db().ingredients().get("milk").await.unwrap().current_stock,
        Quantity::from_milli(1_000_000 - 400_000 + 250_500)
    );
}
