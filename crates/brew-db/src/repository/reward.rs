//! # Reward Repository
//!
//! The reward catalog and the redemptions made against it.

use brew_core::{RedemptionStatus, Reward, RewardRedemption, Tier};
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::error::{DbError, DbResult};
use crate::repository::expect_one_row;

#[derive(Debug, sqlx::FromRow)]
struct RewardRow {
    id: String,
    name: String,
    description: Option<String>,
    point_cost: i64,
    required_tier: Option<Tier>,
    is_active: bool,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    usage_limit: Option<i64>,
    redemption_count: i64,
    created_at: DateTime<Utc>,
}

impl From<RewardRow> for Reward {
    fn from(row: RewardRow) -> Self {
        Reward {
            id: row.id,
            name: row.name,
            description: row.description,
            point_cost: row.point_cost,
            required_tier: row.required_tier,
            is_active: row.is_active,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            usage_limit: row.usage_limit,
            redemption_count: row.redemption_count,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RedemptionRow {
    id: String,
    member_id: String,
    reward_id: String,
    order_id: Option<String>,
    points_used: i64,
    status: RedemptionStatus,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<RedemptionRow> for RewardRedemption {
    fn from(row: RedemptionRow) -> Self {
        RewardRedemption {
            id: row.id,
            member_id: row.member_id,
            reward_id: row.reward_id,
            order_id: row.order_id,
            points_used: row.points_used,
            status: row.status,
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}

pub(crate) async fn fetch_reward(
    conn: &mut SqliteConnection,
    id: &str,
) -> DbResult<Option<Reward>> {
    let row: Option<RewardRow> = sqlx::query_as(
        r#"
        SELECT id, name, description, point_cost, required_tier, is_active,
               starts_at, ends_at, usage_limit, redemption_count, created_at
        FROM rewards
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(row.map(Reward::from))
}

/// Redemptions of a reward by one member that still count against its
/// per-member limit (everything but cancelled ones).
pub(crate) async fn count_redemptions(
    conn: &mut SqliteConnection,
    member_id: &str,
    reward_id: &str,
) -> DbResult<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM reward_redemptions
        WHERE member_id = ?1 AND reward_id = ?2 AND status != 'CANCELLED'
        "#,
    )
    .bind(member_id)
    .bind(reward_id)
    .fetch_one(conn)
    .await?;
    Ok(count)
}

pub(crate) async fn insert_redemption(
    conn: &mut SqliteConnection,
    redemption: &RewardRedemption,
) -> DbResult<()> {
    let result = sqlx::query(
        "UPDATE rewards SET redemption_count = redemption_count + 1 WHERE id = ?1",
    )
    .bind(&redemption.reward_id)
    .execute(&mut *conn)
    .await?;
    expect_one_row(result, "reward", &redemption.reward_id)?;

    sqlx::query(
        r#"
        INSERT INTO reward_redemptions (
            id, member_id, reward_id, order_id, points_used, status, expires_at, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(&redemption.id)
    .bind(&redemption.member_id)
    .bind(&redemption.reward_id)
    .bind(&redemption.order_id)
    .bind(redemption.points_used)
    .bind(redemption.status)
    .bind(redemption.expires_at)
    .bind(redemption.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Repository for rewards and redemptions.
#[derive(Debug, Clone)]
pub struct RewardRepository {
    pool: SqlitePool,
}

impl RewardRepository {
    pub fn new(pool: SqlitePool) -> Self {
        RewardRepository { pool }
    }

    pub async fn create(&self, reward: &Reward) -> DbResult<()> {
        info!(reward_id = %reward.id, point_cost = reward.point_cost, "Creating reward");
        sqlx::query(
            r#"
            INSERT INTO rewards (
                id, name, description, point_cost, required_tier, is_active,
                starts_at, ends_at, usage_limit, redemption_count, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&reward.id)
        .bind(&reward.name)
        .bind(&reward.description)
        .bind(reward.point_cost)
        .bind(reward.required_tier)
        .bind(reward.is_active)
        .bind(reward.starts_at)
        .bind(reward.ends_at)
        .bind(reward.usage_limit)
        .bind(reward.redemption_count)
        .bind(reward.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> DbResult<Reward> {
        fetch_reward(&mut *self.pool.acquire().await?, id)
            .await?
            .ok_or_else(|| DbError::not_found("Reward", id))
    }

    /// Redemptions of one member, newest first.
    pub async fn redemptions_for_member(&self, member_id: &str) -> DbResult<Vec<RewardRedemption>> {
        let rows: Vec<RedemptionRow> = sqlx::query_as(
            r#"
            SELECT id, member_id, reward_id, order_id, points_used, status, expires_at, created_at
            FROM reward_redemptions
            WHERE member_id = ?1
            ORDER BY created_at DESC, id
            "#,
        )
        .bind(member_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RewardRedemption::from).collect())
    }
}
