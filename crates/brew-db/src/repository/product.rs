//! # Product Repository
//!
//! Menu products. Settlement only reads them; the menu itself is managed
//! by back-office tooling (and the `seed` binary).

use brew_core::{Money, Product};
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::placeholders;

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: String,
    name: String,
    category: Option<String>,
    price_cents: i64,
    is_available: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: row.id,
            name: row.name,
            category: row.category,
            price: Money::from_cents(row.price_cents),
            is_available: row.is_available,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const SELECT_PRODUCT: &str = r#"
    SELECT id, name, category, price_cents, is_available, created_at, updated_at
    FROM products
"#;

pub(crate) async fn insert_product(conn: &mut SqliteConnection, product: &Product) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO products (id, name, category, price_cents, is_available, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(&product.id)
    .bind(&product.name)
    .bind(&product.category)
    .bind(product.price.cents())
    .bind(product.is_available)
    .bind(product.created_at)
    .bind(product.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn fetch_product(
    conn: &mut SqliteConnection,
    id: &str,
) -> DbResult<Option<Product>> {
    let row: Option<ProductRow> = sqlx::query_as(&format!("{SELECT_PRODUCT} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(row.map(Product::from))
}

/// Products with the given ids; unknown ids are simply missing.
pub(crate) async fn fetch_products(
    conn: &mut SqliteConnection,
    ids: &[&str],
) -> DbResult<Vec<Product>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!("{SELECT_PRODUCT} WHERE id IN ({})", placeholders(ids.len()));
    let mut query = sqlx::query_as::<_, ProductRow>(&sql);
    for id in ids {
        query = query.bind(*id);
    }
    let rows = query.fetch_all(conn).await?;
    Ok(rows.into_iter().map(Product::from).collect())
}

/// Repository for product database operations.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Inserts a new product.
    ///
    /// ## Errors
    /// `UniqueViolation` if the id is already taken.
    pub async fn create(&self, product: &Product) -> DbResult<()> {
        debug!(product_id = %product.id, name = %product.name, "Creating product");
        insert_product(&mut *self.pool.acquire().await?, product).await
    }

    /// Gets a product by id.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        fetch_product(&mut *self.pool.acquire().await?, id).await
    }

    /// Gets a product by id, failing with `NotFound` when absent.
    pub async fn get(&self, id: &str) -> DbResult<Product> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Product", id))
    }

    /// Products currently on sale, by name.
    pub async fn list_available(&self) -> DbResult<Vec<Product>> {
        let rows: Vec<ProductRow> = sqlx::query_as(&format!(
            "{SELECT_PRODUCT} WHERE is_available = 1 ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Product::from).collect())
    }

    /// Switches a product on or off the menu.
    pub async fn set_available(&self, id: &str, available: bool) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE products SET is_available = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(available)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }
        Ok(())
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

    #[tokio::test]
    async fn test_create_and_list_products() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.products();
        let now = Utc::now();

        repo.create(&fixtures::product("latte", 65, now)).await.unwrap();
        repo.create(&fixtures::product("americano", 50, now)).await.unwrap();

        let latte = repo.get("latte").await.unwrap();
        assert_eq!(latte.price, Money::from_major(65));

        repo.set_available("americano", false).await.unwrap();
        let on_sale = repo.list_available().await.unwrap();
        assert_eq!(on_sale.len(), 1);
        assert_eq!(on_sale[0].id, "latte");

        assert!(matches!(
            repo.get("mocha").await,
            Err(DbError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_product_is_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        db.products()
            .create(&fixtures::product("latte", 65, now))
            .await
            .unwrap();
        let err = db
            .products()
            .create(&fixtures::product("latte", 70, now))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }
}
