//! # Ingredient Repository
//!
//! Ingredients and their append-only stock ledger.
//!
//! ## Ledger and Cache
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  stock_movements (append-only)          ingredients (cached total)      │
//! │                                                                         │
//! │  seq  dir     qty    stock_after        current_stock   version        │
//! │   1   ADJUST  500    500        ──┐                                     │
//! │   2   OUT      18    482          ├──►      464            3           │
//! │   3   OUT      18    464        ──┘                                     │
//! │                                                                         │
//! │  Every stock write is one CAS on the cached row plus one ledger row,   │
//! │  in the same transaction:                                              │
//! │                                                                         │
//! │    UPDATE ingredients SET current_stock_milli = ?, version = version+1 │
//! │    WHERE id = ? AND version = ?        ← 0 rows ⇒ DbError::Conflict    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use brew_core::{
    Ingredient, Money, Quantity, StockDirection, StockMovement, StockPosting, StockUpdate,
};
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::{expect_one_row, placeholders};

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct IngredientRow {
    id: String,
    name: String,
    unit: String,
    cost_per_unit_cents: i64,
    current_stock_milli: i64,
    min_stock_milli: i64,
    max_stock_milli: Option<i64>,
    supplier: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<IngredientRow> for Ingredient {
    fn from(row: IngredientRow) -> Self {
        Ingredient {
            id: row.id,
            name: row.name,
            unit: row.unit,
            cost_per_unit: Money::from_cents(row.cost_per_unit_cents),
            current_stock: Quantity::from_milli(row.current_stock_milli),
            min_stock: Quantity::from_milli(row.min_stock_milli),
            max_stock: row.max_stock_milli.map(Quantity::from_milli),
            supplier: row.supplier,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MovementRow {
    id: String,
    ingredient_id: String,
    direction: StockDirection,
    quantity_milli: i64,
    stock_after_milli: i64,
    reason: Option<String>,
    reference: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<MovementRow> for StockMovement {
    fn from(row: MovementRow) -> Self {
        StockMovement {
            id: row.id,
            ingredient_id: row.ingredient_id,
            direction: row.direction,
            quantity: Quantity::from_milli(row.quantity_milli),
            stock_after: Quantity::from_milli(row.stock_after_milli),
            reason: row.reason,
            reference: row.reference,
            created_at: row.created_at,
        }
    }
}

const SELECT_INGREDIENT: &str = r#"
    SELECT id, name, unit, cost_per_unit_cents, current_stock_milli, min_stock_milli,
           max_stock_milli, supplier, version, created_at, updated_at
    FROM ingredients
"#;

const SELECT_MOVEMENT: &str = r#"
    SELECT id, ingredient_id, direction, quantity_milli, stock_after_milli,
           reason, reference, created_at
    FROM stock_movements
"#;

// =============================================================================
// Statements
// =============================================================================

pub(crate) async fn insert_ingredient(
    conn: &mut SqliteConnection,
    ingredient: &Ingredient,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO ingredients (
            id, name, unit, cost_per_unit_cents, current_stock_milli, min_stock_milli,
            max_stock_milli, supplier, version, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(&ingredient.id)
    .bind(&ingredient.name)
    .bind(&ingredient.unit)
    .bind(ingredient.cost_per_unit.cents())
    .bind(ingredient.current_stock.milli())
    .bind(ingredient.min_stock.milli())
    .bind(ingredient.max_stock.map(|q| q.milli()))
    .bind(&ingredient.supplier)
    .bind(ingredient.version)
    .bind(ingredient.created_at)
    .bind(ingredient.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn fetch_ingredient(
    conn: &mut SqliteConnection,
    id: &str,
) -> DbResult<Option<Ingredient>> {
    let row: Option<IngredientRow> =
        sqlx::query_as(&format!("{SELECT_INGREDIENT} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(conn)
            .await?;
    Ok(row.map(Ingredient::from))
}

pub(crate) async fn fetch_ingredients(
    conn: &mut SqliteConnection,
    ids: &[&str],
) -> DbResult<Vec<Ingredient>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "{SELECT_INGREDIENT} WHERE id IN ({}) ORDER BY id",
        placeholders(ids.len())
    );
    let mut query = sqlx::query_as::<_, IngredientRow>(&sql);
    for id in ids {
        query = query.bind(*id);
    }
    let rows = query.fetch_all(conn).await?;
    Ok(rows.into_iter().map(Ingredient::from).collect())
}

/// Compare-and-swap of the cached stock.
///
/// ## Errors
/// `Conflict` when the row's version moved since it was read.
pub(crate) async fn update_stock(
    conn: &mut SqliteConnection,
    update: &StockUpdate,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE ingredients
        SET current_stock_milli = ?1, version = version + 1, updated_at = ?2
        WHERE id = ?3 AND version = ?4
        "#,
    )
    .bind(update.new_stock.milli())
    .bind(now)
    .bind(&update.ingredient_id)
    .bind(update.expected_version)
    .execute(conn)
    .await?;
    expect_one_row(result, "ingredient", &update.ingredient_id)
}

pub(crate) async fn insert_movement(
    conn: &mut SqliteConnection,
    movement: &StockMovement,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO stock_movements (
            id, ingredient_id, direction, quantity_milli, stock_after_milli,
            reason, reference, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(&movement.id)
    .bind(&movement.ingredient_id)
    .bind(movement.direction)
    .bind(movement.quantity.milli())
    .bind(movement.stock_after.milli())
    .bind(&movement.reason)
    .bind(&movement.reference)
    .bind(movement.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Applies one posted movement: CAS the cached total, append the ledger row.
pub(crate) async fn apply_posting(
    conn: &mut SqliteConnection,
    posting: &StockPosting,
) -> DbResult<()> {
    let update = StockUpdate {
        ingredient_id: posting.ingredient_id.clone(),
        expected_version: posting.expected_version,
        new_stock: posting.new_stock,
    };
    update_stock(&mut *conn, &update, posting.movement.created_at).await?;
    insert_movement(conn, &posting.movement).await
}

pub(crate) async fn fetch_movements(
    conn: &mut SqliteConnection,
    ingredient_id: &str,
) -> DbResult<Vec<StockMovement>> {
    let rows: Vec<MovementRow> =
        sqlx::query_as(&format!("{SELECT_MOVEMENT} WHERE ingredient_id = ?1 ORDER BY seq"))
            .bind(ingredient_id)
            .fetch_all(conn)
            .await?;
    Ok(rows.into_iter().map(StockMovement::from).collect())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for ingredients and the stock ledger.
#[derive(Debug, Clone)]
pub struct IngredientRepository {
    pool: SqlitePool,
}

impl IngredientRepository {
    pub fn new(pool: SqlitePool) -> Self {
        IngredientRepository { pool }
    }

    /// Creates an ingredient together with its opening `ADJUST` movement, so
    /// the ledger replays to the cached stock from the first row on.
    ///
    /// ## Errors
    /// - `UniqueViolation` if the id is taken
    /// - `QueryFailed` for a negative opening stock (CHECK constraint)
    pub async fn create(&self, ingredient: &Ingredient) -> DbResult<()> {
        info!(
            ingredient_id = %ingredient.id,
            opening_stock = %ingredient.current_stock,
            "Creating ingredient"
        );

        let mut tx = self.pool.begin().await?;
        insert_ingredient(&mut tx, ingredient).await?;
        insert_movement(
            &mut tx,
            &StockMovement {
                id: Uuid::new_v4().to_string(),
                ingredient_id: ingredient.id.clone(),
                direction: StockDirection::Adjust,
                quantity: ingredient.current_stock,
                stock_after: ingredient.current_stock,
                reason: Some("opening stock".to_string()),
                reference: None,
                created_at: ingredient.created_at,
            },
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Ingredient>> {
        fetch_ingredient(&mut *self.pool.acquire().await?, id).await
    }

    /// Gets an ingredient, failing with `NotFound` when absent.
    pub async fn get(&self, id: &str) -> DbResult<Ingredient> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Ingredient", id))
    }

    /// Every ingredient, by id.
    pub async fn list(&self) -> DbResult<Vec<Ingredient>> {
        let rows: Vec<IngredientRow> = sqlx::query_as(&format!("{SELECT_INGREDIENT} ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Ingredient::from).collect())
    }

    /// Low-stock report: ingredients below their reorder threshold.
    pub async fn list_below_minimum(&self) -> DbResult<Vec<Ingredient>> {
        let rows: Vec<IngredientRow> = sqlx::query_as(&format!(
            "{SELECT_INGREDIENT} WHERE current_stock_milli < min_stock_milli ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;
        debug!(count = rows.len(), "Ingredients below minimum");
        Ok(rows.into_iter().map(Ingredient::from).collect())
    }

    /// The ledger of one ingredient, in posting order.
    pub async fn movements(&self, ingredient_id: &str) -> DbResult<Vec<StockMovement>> {
        fetch_movements(&mut *self.pool.acquire().await?, ingredient_id).await
    }

    /// Ledger rows written for a document (e.g. every movement of an order).
    pub async fn movements_for_reference(&self, reference: &str) -> DbResult<Vec<StockMovement>> {
        let rows: Vec<MovementRow> =
            sqlx::query_as(&format!("{SELECT_MOVEMENT} WHERE reference = ?1 ORDER BY seq"))
                .bind(reference)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(StockMovement::from).collect())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures;
    use crate::{Database, DbConfig};
    use brew_core::inventory::{post_movement, replay_stock};

    #[tokio::test]
    async fn test_create_writes_opening_movement() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.ingredients();
        repo.create(&fixtures::ingredient("beans", 500, Utc::now()))
            .await
            .unwrap();

        let movements = repo.movements("beans").await.unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].direction, StockDirection::Adjust);
        assert_eq!(replay_stock(&movements), Quantity::from_units(500));
    }

    #[tokio::test]
    async fn test_stale_version_is_a_conflict() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.ingredients();
        repo.create(&fixtures::ingredient("milk", 1_000, Utc::now()))
            .await
            .unwrap();
        let milk = repo.get("milk").await.unwrap();

        let first = post_movement(
            &milk,
            StockDirection::Out,
            Quantity::from_units(200),
            None,
            None,
            Utc::now(),
        )
        .unwrap();
        let second = first.clone();

        let mut conn = db.pool().acquire().await.unwrap();
        apply_posting(&mut conn, &first).await.unwrap();
        let err = update_stock(
            &mut conn,
            &StockUpdate {
                ingredient_id: second.ingredient_id,
                expected_version: second.expected_version,
                new_stock: second.new_stock,
            },
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(err.is_conflict());
        drop(conn);

        let milk = repo.get("milk").await.unwrap();
        assert_eq!(milk.current_stock, Quantity::from_units(800));
        assert_eq!(milk.version, 1);
        assert_eq!(replay_stock(&repo.movements("milk").await.unwrap()), milk.current_stock);
    }

    #[tokio::test]
    async fn test_list_below_minimum() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.ingredients();
        let now = Utc::now();
        repo.create(&fixtures::ingredient("beans", 500, now)).await.unwrap();
        repo.create(&fixtures::ingredient("syrup", 4, now)).await.unwrap();

        let low = repo.list_below_minimum().await.unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].id, "syrup");
        assert!(low[0].is_below_minimum());
    }
}
