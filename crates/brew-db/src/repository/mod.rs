//! # Repository Module
//!
//! Database repository implementations for Brew POS.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Two Ways Into the Same SQL                           │
//! │                                                                         │
//! │  db.ingredients().get("beans")        uow.ingredients(&ids)            │
//! │       │  (pool, autocommit)                │  (inside one transaction)  │
//! │       ▼                                    ▼                            │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  inventory::fetch_ingredient(conn, id)                          │   │
//! │  │  inventory::update_stock(conn, &StockUpdate)                    │   │
//! │  │  ...                                                            │   │
//! │  │  Every statement is a function over `&mut SqliteConnection`,    │   │
//! │  │  so repositories and the UnitOfWork share one copy of the SQL.  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rows are read into private `*Row` structs of primitive columns and
//! converted into `brew_core` types; cents, milli-units and basis points
//! never leave this module unconverted.
//!
//! ## Available Repositories
//!
//! - [`ProductRepository`](product::ProductRepository) - Menu products
//! - [`IngredientRepository`](inventory::IngredientRepository) - Ingredients and the stock ledger
//! - [`RecipeRepository`](recipe::RecipeRepository) - Product recipes
//! - [`PromotionRepository`](promotion::PromotionRepository) - Promotions, coupons, usage
//! - [`MemberRepository`](member::MemberRepository) - Members and the point ledger
//! - [`PointRuleRepository`](point_rule::PointRuleRepository) - Earning rules
//! - [`RewardRepository`](reward::RewardRepository) - Reward catalog and redemptions
//! - [`OrderRepository`](order::OrderRepository) - Settled orders
//! - [`OutboxRepository`](outbox::OutboxRepository) - Post-commit hand-off queue

pub mod inventory;
pub mod member;
pub mod order;
pub mod outbox;
pub mod point_rule;
pub mod product;
pub mod promotion;
pub mod recipe;
pub mod reward;

use sqlx::sqlite::SqliteQueryResult;

use crate::error::{DbError, DbResult};

/// Turns a zero-row compare-and-swap update into a `Conflict`.
pub(crate) fn expect_one_row(
    result: SqliteQueryResult,
    entity: &str,
    id: &str,
) -> DbResult<()> {
    if result.rows_affected() == 0 {
        Err(DbError::conflict(entity, id))
    } else {
        Ok(())
    }
}

/// Narrows a stored basis-point column.
pub(crate) fn bps_column(entity: &str, id: &str, value: i64) -> DbResult<u32> {
    u32::try_from(value)
        .map_err(|_| DbError::corrupt(entity, id, format!("rate {value} out of range")))
}

/// `?, ?, ?` for an `IN (...)` list of `n` values.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Shared rows for repository tests.

    use brew_core::{Ingredient, Money, Product, Quantity};
    use chrono::{DateTime, Utc};

    pub fn product(id: &str, price: i64, now: DateTime<Utc>) -> Product {
        Product {
            id: id.to_string(),
            name: id.to_string(),
            category: Some("coffee".to_string()),
            price: Money::from_major(price),
            is_available: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn ingredient(id: &str, stock: i64, now: DateTime<Utc>) -> Ingredient {
        Ingredient {
            id: id.to_string(),
            name: id.to_string(),
            unit: "g".to_string(),
            cost_per_unit: Money::from_cents(5),
            current_stock: Quantity::from_units(stock),
            min_stock: Quantity::from_units(10),
            max_stock: None,
            supplier: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
