//! # Order Repository
//!
//! Settled orders and their frozen line items. Orders are only created by
//! the settlement unit of work; this repository reads them back.

use brew_core::{Money, Order, OrderItem, OrderStatus};
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::{DbError, DbResult};

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: String,
    order_number: String,
    status: OrderStatus,
    subtotal_cents: i64,
    discount_cents: i64,
    total_cents: i64,
    member_id: Option<String>,
    customer_name: Option<String>,
    promotion_id: Option<String>,
    coupon_code: Option<String>,
    points_earned: i64,
    created_at: DateTime<Utc>,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Order {
            id: row.id,
            order_number: row.order_number,
            status: row.status,
            subtotal: Money::from_cents(row.subtotal_cents),
            discount: Money::from_cents(row.discount_cents),
            total: Money::from_cents(row.total_cents),
            member_id: row.member_id,
            customer_name: row.customer_name,
            promotion_id: row.promotion_id,
            coupon_code: row.coupon_code,
            points_earned: row.points_earned,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderItemRow {
    id: String,
    order_id: String,
    product_id: String,
    product_name: String,
    quantity: i64,
    unit_price_cents: i64,
    subtotal_cents: i64,
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        OrderItem {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            product_name: row.product_name,
            quantity: row.quantity,
            unit_price: Money::from_cents(row.unit_price_cents),
            subtotal: Money::from_cents(row.subtotal_cents),
        }
    }
}

const SELECT_ORDER: &str = r#"
    SELECT id, order_number, status, subtotal_cents, discount_cents, total_cents,
           member_id, customer_name, promotion_id, coupon_code, points_earned, created_at
    FROM orders
"#;

pub(crate) async fn insert_order(conn: &mut SqliteConnection, order: &Order) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO orders (
            id, order_number, status, subtotal_cents, discount_cents, total_cents,
            member_id, customer_name, promotion_id, coupon_code, points_earned, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
    )
    .bind(&order.id)
    .bind(&order.order_number)
    .bind(order.status)
    .bind(order.subtotal.cents())
    .bind(order.discount.cents())
    .bind(order.total.cents())
    .bind(&order.member_id)
    .bind(&order.customer_name)
    .bind(&order.promotion_id)
    .bind(&order.coupon_code)
    .bind(order.points_earned)
    .bind(order.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn insert_item(conn: &mut SqliteConnection, item: &OrderItem) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO order_items (
            id, order_id, product_id, product_name, quantity, unit_price_cents, subtotal_cents
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(&item.id)
    .bind(&item.order_id)
    .bind(&item.product_id)
    .bind(&item.product_name)
    .bind(item.quantity)
    .bind(item.unit_price.cents())
    .bind(item.subtotal.cents())
    .execute(conn)
    .await?;
    Ok(())
}

/// Repository for settled orders.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Order>> {
        let row: Option<OrderRow> = sqlx::query_as(&format!("{SELECT_ORDER} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Order::from))
    }

    pub async fn get(&self, id: &str) -> DbResult<Order> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Order", id))
    }

    pub async fn get_by_number(&self, order_number: &str) -> DbResult<Option<Order>> {
        let row: Option<OrderRow> =
            sqlx::query_as(&format!("{SELECT_ORDER} WHERE order_number = ?1"))
                .bind(order_number)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Order::from))
    }

    /// Line items of an order, in entry order.
    pub async fn items(&self, order_id: &str) -> DbResult<Vec<OrderItem>> {
        let rows: Vec<OrderItemRow> = sqlx::query_as(
            r#"
            SELECT id, order_id, product_id, product_name, quantity, unit_price_cents, subtotal_cents
            FROM order_items
            WHERE order_id = ?1
            ORDER BY rowid
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(OrderItem::from).collect())
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
