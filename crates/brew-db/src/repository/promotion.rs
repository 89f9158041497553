//! # Promotion Repository
//!
//! Promotions, single-use coupons and the usage log.
//!
//! ## Storage of Promotion Kinds
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │ promotions                                                           │
//! │   kind    = 'HAPPY_HOUR'                  (filterable label)         │
//! │   params  = '{"type":"HAPPY_HOUR","rate":2000,                       │
//! │              "window":{"start":"14:00:00","end":"16:00:00"},         │
//! │              "max_discount":null}'        (whole tagged variant)     │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//! A `params` value that no longer decodes is reported as `DbError::Corrupt`
//! instead of being guessed at.
//!
//! ## Atomic Transitions
//! - coupon: `UPDATE coupons SET is_used = 1 ... WHERE code = ? AND is_used = 0`
//! - usage:  `UPDATE promotions SET usage_count = usage_count + 1
//!            WHERE id = ? AND (usage_limit IS NULL OR usage_count < usage_limit)`
//!
//! Zero affected rows on either means a concurrent settlement got there
//! first: `DbError::Conflict`.

use brew_core::{
    Coupon, CouponRedemption, Money, Promotion, PromotionKind, PromotionStatus, PromotionUsage,
};
use brew_core::validation::normalize_coupon_code;
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::expect_one_row;

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct PromotionRow {
    id: String,
    name: String,
    code: Option<String>,
    description: Option<String>,
    params: String,
    status: PromotionStatus,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    usage_limit: Option<i64>,
    usage_count: i64,
    per_customer: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PromotionRow> for Promotion {
    type Error = DbError;

    fn try_from(row: PromotionRow) -> DbResult<Self> {
        let kind: PromotionKind = serde_json::from_str(&row.params)
            .map_err(|e| DbError::corrupt("promotion", &row.id, e.to_string()))?;
        Ok(Promotion {
            id: row.id,
            name: row.name,
            code: row.code,
            description: row.description,
            kind,
            status: row.status,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            usage_limit: row.usage_limit,
            usage_count: row.usage_count,
            per_customer: row.per_customer,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CouponRow {
    id: String,
    code: String,
    promotion_id: String,
    is_used: bool,
    used_at: Option<DateTime<Utc>>,
    used_by: Option<String>,
    order_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<CouponRow> for Coupon {
    fn from(row: CouponRow) -> Self {
        Coupon {
            id: row.id,
            code: row.code,
            promotion_id: row.promotion_id,
            is_used: row.is_used,
            used_at: row.used_at,
            used_by: row.used_by,
            order_id: row.order_id,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UsageRow {
    id: String,
    promotion_id: String,
    order_id: String,
    discount_cents: i64,
    coupon_code: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<UsageRow> for PromotionUsage {
    fn from(row: UsageRow) -> Self {
        PromotionUsage {
            id: row.id,
            promotion_id: row.promotion_id,
            order_id: row.order_id,
            discount: Money::from_cents(row.discount_cents),
            coupon_code: row.coupon_code,
            created_at: row.created_at,
        }
    }
}

const SELECT_PROMOTION: &str = r#"
    SELECT id, name, code, description, params, status, starts_at, ends_at,
           usage_limit, usage_count, per_customer, created_at, updated_at
    FROM promotions
"#;

const SELECT_COUPON: &str = r#"
    SELECT id, code, promotion_id, is_used, used_at, used_by, order_id, created_at
    FROM coupons
"#;

fn decode_all(rows: Vec<PromotionRow>) -> DbResult<Vec<Promotion>> {
    rows.into_iter().map(Promotion::try_from).collect()
}

// =============================================================================
// Statements
// =============================================================================

pub(crate) async fn insert_promotion(
    conn: &mut SqliteConnection,
    promotion: &Promotion,
) -> DbResult<()> {
    let params = serde_json::to_string(&promotion.kind)
        .map_err(|e| DbError::Internal(format!("encode promotion params: {e}")))?;
    sqlx::query(
        r#"
        INSERT INTO promotions (
            id, name, code, description, kind, params, status, starts_at, ends_at,
            usage_limit, usage_count, per_customer, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        "#,
    )
    .bind(&promotion.id)
    .bind(&promotion.name)
    .bind(&promotion.code)
    .bind(&promotion.description)
    .bind(promotion.kind.label())
    .bind(params)
    .bind(promotion.status)
    .bind(promotion.starts_at)
    .bind(promotion.ends_at)
    .bind(promotion.usage_limit)
    .bind(promotion.usage_count)
    .bind(promotion.per_customer)
    .bind(promotion.created_at)
    .bind(promotion.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn fetch_promotion(
    conn: &mut SqliteConnection,
    id: &str,
) -> DbResult<Option<Promotion>> {
    let row: Option<PromotionRow> = sqlx::query_as(&format!("{SELECT_PROMOTION} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(conn)
        .await?;
    row.map(Promotion::try_from).transpose()
}

/// Promotions with status `ACTIVE`. Date windows and usage limits are left
/// to `Promotion::is_eligible`.
pub(crate) async fn fetch_active_promotions(
    conn: &mut SqliteConnection,
) -> DbResult<Vec<Promotion>> {
    let rows: Vec<PromotionRow> = sqlx::query_as(&format!(
        "{SELECT_PROMOTION} WHERE status = 'ACTIVE' ORDER BY created_at, id"
    ))
    .fetch_all(conn)
    .await?;
    decode_all(rows)
}

pub(crate) async fn insert_coupon(conn: &mut SqliteConnection, coupon: &Coupon) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO coupons (id, code, promotion_id, is_used, used_at, used_by, order_id, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(&coupon.id)
    .bind(normalize_coupon_code(&coupon.code))
    .bind(&coupon.promotion_id)
    .bind(coupon.is_used)
    .bind(coupon.used_at)
    .bind(&coupon.used_by)
    .bind(&coupon.order_id)
    .bind(coupon.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Looks a coupon up by code, case-insensitively.
pub(crate) async fn fetch_coupon(
    conn: &mut SqliteConnection,
    code: &str,
) -> DbResult<Option<Coupon>> {
    let row: Option<CouponRow> = sqlx::query_as(&format!("{SELECT_COUPON} WHERE code = ?1"))
        .bind(normalize_coupon_code(code))
        .fetch_optional(conn)
        .await?;
    Ok(row.map(Coupon::from))
}

/// The single "unused → used" transition of a coupon.
pub(crate) async fn redeem_coupon(
    conn: &mut SqliteConnection,
    redemption: &CouponRedemption,
) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE coupons
        SET is_used = 1, used_at = ?1, used_by = ?2, order_id = ?3
        WHERE code = ?4 AND is_used = 0
        "#,
    )
    .bind(redemption.used_at)
    .bind(&redemption.used_by)
    .bind(&redemption.order_id)
    .bind(normalize_coupon_code(&redemption.code))
    .execute(conn)
    .await?;
    expect_one_row(result, "coupon", &redemption.code)
}

/// Counts one application of a promotion and logs it, guarded by the
/// usage limit.
pub(crate) async fn record_usage(
    conn: &mut SqliteConnection,
    usage: &PromotionUsage,
) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE promotions
        SET usage_count = usage_count + 1, updated_at = ?1
        WHERE id = ?2 AND (usage_limit IS NULL OR usage_count < usage_limit)
        "#,
    )
    .bind(usage.created_at)
    .bind(&usage.promotion_id)
    .execute(&mut *conn)
    .await?;
    expect_one_row(result, "promotion", &usage.promotion_id)?;

    sqlx::query(
        r#"
        INSERT INTO promotion_usages (id, promotion_id, order_id, discount_cents, coupon_code, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(&usage.id)
    .bind(&usage.promotion_id)
    .bind(&usage.order_id)
    .bind(usage.discount.cents())
    .bind(&usage.coupon_code)
    .bind(usage.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for promotions and coupons.
#[derive(Debug, Clone)]
pub struct PromotionRepository {
    pool: SqlitePool,
}

impl PromotionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PromotionRepository { pool }
    }

    pub async fn create(&self, promotion: &Promotion) -> DbResult<()> {
        info!(
            promotion_id = %promotion.id,
            kind = promotion.kind.label(),
            "Creating promotion"
        );
        insert_promotion(&mut *self.pool.acquire().await?, promotion).await
    }

    /// Stores a coupon. The code must already be normalized to upper case.
    ///
    /// ## Errors
    /// - `UniqueViolation` for a code that exists
    /// - `ForeignKeyViolation` for an unknown promotion
    pub async fn create_coupon(&self, coupon: &Coupon) -> DbResult<()> {
        debug!(code = %coupon.code, promotion_id = %coupon.promotion_id, "Creating coupon");
        insert_coupon(&mut *self.pool.acquire().await?, coupon).await
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Promotion>> {
        fetch_promotion(&mut *self.pool.acquire().await?, id).await
    }

    pub async fn get(&self, id: &str) -> DbResult<Promotion> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Promotion", id))
    }

    /// Promotions with status `ACTIVE`, oldest first.
    pub async fn list_active(&self) -> DbResult<Vec<Promotion>> {
        fetch_active_promotions(&mut *self.pool.acquire().await?).await
    }

    /// Reads a coupon and its bound promotion without changing anything.
    pub async fn find_coupon(&self, code: &str) -> DbResult<Option<(Coupon, Option<Promotion>)>> {
        let mut conn = self.pool.acquire().await?;
        let Some(coupon) = fetch_coupon(&mut conn, code).await? else {
            return Ok(None);
        };
        let promotion = fetch_promotion(&mut conn, &coupon.promotion_id).await?;
        Ok(Some((coupon, promotion)))
    }

    /// Changes the lifecycle status of a promotion.
    pub async fn set_status(&self, id: &str, status: PromotionStatus) -> DbResult<()> {
        let result =
            sqlx::query("UPDATE promotions SET status = ?2, updated_at = ?3 WHERE id = ?1")
                .bind(id)
                .bind(status)
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Promotion", id));
        }
        Ok(())
    }

    /// Every application of a promotion, oldest first.
    pub async fn usages(&self, promotion_id: &str) -> DbResult<Vec<PromotionUsage>> {
        let rows: Vec<UsageRow> = sqlx::query_as(
            r#"
            SELECT id, promotion_id, order_id, discount_cents, coupon_code, created_at
            FROM promotion_usages
            WHERE promotion_id = ?1
            ORDER BY created_at, id
            "#,
        )
        .bind(promotion_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(PromotionUsage::from).collect())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use brew_core::{Rate, TimeWindow};
    use chrono::NaiveTime;

    fn happy_hour(now: DateTime<Utc>) -> Promotion {
        Promotion {
            id: "hh".to_string(),
            name: "Afternoon happy hour".to_string(),
            code: None,
            description: None,
            kind: PromotionKind::HappyHour {
                rate: Rate::from_percent(20),
                window: TimeWindow::new(
                    NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
                    NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
                ),
                max_discount: None,
            },
            status: PromotionStatus::Active,
            starts_at: None,
            ends_at: None,
            usage_limit: Some(1),
            usage_count: 0,
            per_customer: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn coupon(code: &str, now: DateTime<Utc>) -> Coupon {
        Coupon {
            id: format!("c-{code}"),
            code: code.to_string(),
            promotion_id: "hh".to_string(),
            is_used: false,
            used_at: None,
            used_by: None,
            order_id: None,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_promotion_kind_survives_storage() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let promotion = happy_hour(now);
        db.promotions().create(&promotion).await.unwrap();

        let stored = db.promotions().get("hh").await.unwrap();
        assert_eq!(stored.kind, promotion.kind);
        assert_eq!(db.promotions().list_active().await.unwrap().len(), 1);

        db.promotions()
            .set_status("hh", PromotionStatus::Inactive)
            .await
            .unwrap();
        assert!(db.promotions().list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_params_are_corrupt() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.promotions().create(&happy_hour(Utc::now())).await.unwrap();
        sqlx::query("UPDATE promotions SET params = '{\"type\":\"MYSTERY\"}'")
            .execute(db.pool())
            .await
            .unwrap();

        assert!(matches!(
            db.promotions().get("hh").await,
            Err(DbError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_coupon_is_redeemed_once() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        db.promotions().create(&happy_hour(now)).await.unwrap();
        db.promotions()
            .create_coupon(&coupon("WELCOME20", now))
            .await
            .unwrap();

        let redemption = CouponRedemption {
            code: "WELCOME20".to_string(),
            order_id: "o-1".to_string(),
            used_by: Some("Ann".to_string()),
            used_at: now,
        };
        let mut conn = db.pool().acquire().await.unwrap();
        redeem_coupon(&mut conn, &redemption).await.unwrap();
        let again = redeem_coupon(&mut conn, &redemption).await.unwrap_err();
        assert!(again.is_conflict());
        drop(conn);

        let (stored, promotion) = db.promotions().find_coupon("WELCOME20").await.unwrap().unwrap();
        assert!(stored.is_used);
        assert_eq!(stored.used_by.as_deref(), Some("Ann"));
        assert_eq!(promotion.unwrap().id, "hh");
        assert!(db.promotions().find_coupon("NOPE").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_coupon_codes_are_case_insensitive() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        db.promotions().create(&happy_hour(now)).await.unwrap();
        db.promotions()
            .create_coupon(&coupon(" welcome20 ", now))
            .await
            .unwrap();

        let (stored, _) = db.promotions().find_coupon("welcome20").await.unwrap().unwrap();
        assert_eq!(stored.code, "WELCOME20");
        assert!(db.promotions().find_coupon("WELCOME20").await.unwrap().is_some());

        let mut uow = db.begin().await.unwrap();
        assert!(uow.coupon("Welcome20").await.unwrap().is_some());
        uow.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_usage_limit_guard() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        db.promotions().create(&happy_hour(now)).await.unwrap();
        // The usage row references an order.
        sqlx::query(
            "INSERT INTO orders (id, order_number, subtotal_cents, total_cents, created_at)
             VALUES ('o-1', 'ORD-1', 100, 100, ?1), ('o-2', 'ORD-2', 100, 100, ?1)",
        )
        .bind(now)
        .execute(db.pool())
        .await
        .unwrap();

        let usage = |order: &str| PromotionUsage {
            id: format!("u-{order}"),
            promotion_id: "hh".to_string(),
            order_id: order.to_string(),
            discount: Money::from_major(20),
            coupon_code: None,
            created_at: now,
        };
        let mut conn = db.pool().acquire().await.unwrap();
        record_usage(&mut conn, &usage("o-1")).await.unwrap();
        let err = record_usage(&mut conn, &usage("o-2")).await.unwrap_err();
        assert!(err.is_conflict());
        drop(conn);

        assert_eq!(db.promotions().get("hh").await.unwrap().usage_count, 1);
        assert_eq!(db.promotions().usages("hh").await.unwrap().len(), 1);
    }
}
