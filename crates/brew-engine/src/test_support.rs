//! Shared setup for engine unit tests.

use brew_core::{
    Coupon, Ingredient, Money, Product, Promotion, PromotionKind, PromotionStatus, Quantity,
    RecipeLine,
};
use brew_db::{Database, DbConfig};
use chrono::{Duration, Utc};

use crate::{Engine, EngineConfig};

/// An engine over a fresh in-memory database with short retry delays.
pub async fn engine() -> Engine {
    engine_with(EngineConfig::default()).await
}

pub async fn engine_with(mut config: EngineConfig) -> Engine {
    config.settlement.initial_backoff_ms = 1;
    config.settlement.max_backoff_ms = 5;
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    Engine::new(db, config).unwrap()
}

fn ingredient(id: &str, name: &str, unit: &str, stock: i64) -> Ingredient {
    let now = Utc::now();
    Ingredient {
        id: id.to_string(),
        name: name.to_string(),
        unit: unit.to_string(),
        cost_per_unit: Money::from_cents(5),
        current_stock: Quantity::from_units(stock),
        min_stock: Quantity::from_units(100),
        max_stock: None,
        supplier: None,
        version: 0,
        created_at: now,
        updated_at: now,
    }
}

fn product(id: &str, name: &str, price: i64) -> Product {
    let now = Utc::now();
    Product {
        id: id.to_string(),
        name: name.to_string(),
        category: Some("coffee".to_string()),
        price: Money::from_major(price),
        is_available: true,
        created_at: now,
        updated_at: now,
    }
}

/// Beans and milk at 1000 units, ten croissants.
///
/// | product   | price | recipe                  |
/// |-----------|-------|-------------------------|
/// | latte     | 75    | beans 18, milk 200      |
/// | americano | 60    | beans 18                |
/// | croissant | 55    | croissant 1             |
pub async fn menu(engine: &Engine) {
    let db = engine.db();
    for item in [
        ingredient("beans", "Espresso beans", "g", 1_000),
        ingredient("milk", "Whole milk", "ml", 1_000),
        ingredient("croissant", "Butter croissant", "pcs", 10),
    ] {
        db.ingredients().create(&item).await.unwrap();
    }

    let recipes = [
        (
            product("latte", "Cafe Latte", 75),
            vec![
                RecipeLine::new("beans", Quantity::from_units(18)),
                RecipeLine::new("milk", Quantity::from_units(200)),
            ],
        ),
        (
            product("americano", "Americano", 60),
            vec![RecipeLine::new("beans", Quantity::from_units(18))],
        ),
        (
            product("croissant", "Croissant", 55),
            vec![RecipeLine::new("croissant", Quantity::from_units(1))],
        ),
    ];
    for (item, recipe) in recipes {
        db.products().create(&item).await.unwrap();
        db.recipes().set_recipe(&item.id, &recipe).await.unwrap();
    }
}

/// An active promotion with no window or usage limit, created `age_minutes` ago.
pub fn promotion(id: &str, kind: PromotionKind, age_minutes: i64) -> Promotion {
    let created = Utc::now() - Duration::minutes(age_minutes);
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
        created_at: created,
        updated_at: created,
    }
}

/// Stores `promotion` and an unused coupon `code` bound to it.
pub async fn coupon(engine: &Engine, promotion: &Promotion, code: &str) {
    let promotions = engine.db().promotions();
    promotions.create(promotion).await.unwrap();
    promotions
        .create_coupon(&Coupon {
            id: format!("coupon-{code}"),
            code: code.to_string(),
            promotion_id: promotion.id.clone(),
            is_used: false,
            used_at: None,
            used_by: None,
            order_id: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
}
