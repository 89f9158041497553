//! # Recipe Repository
//!
//! Product → ingredient requirements. `position` keeps the operator's line
//! order so `resolve` returns lines the way they were entered.

use std::collections::BTreeMap;

use brew_core::{Quantity, RecipeBook, RecipeLine};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::error::DbResult;
use crate::repository::placeholders;

#[derive(Debug, sqlx::FromRow)]
struct RecipeRow {
    product_id: String,
    ingredient_id: String,
    quantity_milli: i64,
}

/// Recipes of the given products; products without one are left out.
pub(crate) async fn fetch_book(
    conn: &mut SqliteConnection,
    product_ids: &[&str],
) -> DbResult<RecipeBook> {
    let mut book = RecipeBook::new();
    if product_ids.is_empty() {
        return Ok(book);
    }

    let sql = format!(
        r#"
        SELECT product_id, ingredient_id, quantity_milli
        FROM recipe_ingredients
        WHERE product_id IN ({})
        ORDER BY product_id, position
        "#,
        placeholders(product_ids.len())
    );
    let mut query = sqlx::query_as::<_, RecipeRow>(&sql);
    for id in product_ids {
        query = query.bind(*id);
    }
    let rows = query.fetch_all(conn).await?;

    let mut grouped: BTreeMap<String, Vec<RecipeLine>> = BTreeMap::new();
    for row in rows {
        grouped.entry(row.product_id).or_default().push(RecipeLine::new(
            row.ingredient_id,
            Quantity::from_milli(row.quantity_milli),
        ));
    }
    for (product_id, lines) in grouped {
        book.insert(product_id, lines);
    }
    Ok(book)
}

/// Repository for product recipes.
#[derive(Debug, Clone)]
pub struct RecipeRepository {
    pool: SqlitePool,
}

impl RecipeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        RecipeRepository { pool }
    }

    /// Replaces the whole recipe of a product in one transaction.
    ///
    /// An empty `lines` removes the recipe. Lines should have passed
    /// `brew_core::recipe::validate_recipe`; the table rejects duplicates
    /// and negative quantities anyway.
    pub async fn set_recipe(&self, product_id: &str, lines: &[RecipeLine]) -> DbResult<()> {
        info!(product_id = %product_id, lines = lines.len(), "Setting recipe");

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM recipe_ingredients WHERE product_id = ?1")
            .bind(product_id)
            .execute(&mut *tx)
            .await?;
        for (position, line) in lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO recipe_ingredients (product_id, ingredient_id, position, quantity_milli)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(product_id)
            .bind(&line.ingredient_id)
            .bind(position as i64)
            .bind(line.quantity.milli())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Ordered requirements of one unit of a product; empty without a recipe.
    pub async fn resolve(&self, product_id: &str) -> DbResult<Vec<RecipeLine>> {
        let book = fetch_book(&mut *self.pool.acquire().await?, &[product_id]).await?;
        Ok(book.resolve(product_id).to_vec())
    }

    /// Recipes of several products at once.
    pub async fn book_for(&self, product_ids: &[&str]) -> DbResult<RecipeBook> {
        fetch_book(&mut *self.pool.acquire().await?, product_ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures;
    use crate::{Database, DbConfig};
    use chrono::Utc;

    async fn setup() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        for p in ["latte", "espresso"] {
            db.products().create(&fixtures::product(p, 60, now)).await.unwrap();
        }
        for i in ["beans", "milk"] {
            db.ingredients()
                .create(&fixtures::ingredient(i, 1_000, now))
                .await
                .unwrap();
        }
        db
    }

    #[tokio::test]
    async fn test_set_and_resolve_recipe() {
        let db = setup().await;
        let repo = db.recipes();
        repo.set_recipe(
            "latte",
            &[
                RecipeLine::new("milk", Quantity::from_units(200)),
                RecipeLine::new("beans", Quantity::from_milli(18_500)),
            ],
        )
        .await
        .unwrap();

        let lines = repo.resolve("latte").await.unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].ingredient_id, "milk");
        assert!(repo.resolve("espresso").await.unwrap().is_empty());

        // Replacing drops the old lines.
        repo.set_recipe("latte", &[RecipeLine::new("beans", Quantity::from_units(18))])
            .await
            .unwrap();
        assert_eq!(repo.resolve("latte").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_book_groups_by_product() {
        let db = setup().await;
        let repo = db.recipes();
        repo.set_recipe("latte", &[RecipeLine::new("beans", Quantity::from_units(18))])
            .await
            .unwrap();
        repo.set_recipe("espresso", &[RecipeLine::new("beans", Quantity::from_units(9))])
            .await
            .unwrap();

        let book = repo.book_for(&["latte", "espresso"]).await.unwrap();
        let demand = book.demand([("latte", 2), ("espresso", 1)]).unwrap();
        assert_eq!(demand["beans"], Quantity::from_units(45));
    }

    #[tokio::test]
    async fn test_unknown_ingredient_is_rejected() {
        let db = setup().await;
        let err = db
            .recipes()
            .set_recipe("latte", &[RecipeLine::new("cocoa", Quantity::from_units(5))])
            .await
            .unwrap_err();
        assert!(matches!(err, crate::DbError::ForeignKeyViolation { .. }));
    }
}
