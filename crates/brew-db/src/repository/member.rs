//! # Member Repository
//!
//! Loyalty accounts and their point ledger.
//!
//! Balance columns are a cache of `point_history`; they are only ever
//! written together with the ledger rows that explain them, through
//! [`update_member`] (version compare-and-swap) inside a unit of work.

use brew_core::{Member, Money, PointHistory, PointKind, Tier, TierUpgrade};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::{DbError, DbResult};
use crate::repository::expect_one_row;

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct MemberRow {
    id: String,
    member_number: String,
    name: String,
    phone: Option<String>,
    email: Option<String>,
    date_of_birth: Option<NaiveDate>,
    tier: Tier,
    total_points: i64,
    available_points: i64,
    used_points: i64,
    expired_points: i64,
    total_spent_cents: i64,
    total_orders: i64,
    is_active: bool,
    last_visit_at: Option<DateTime<Utc>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<MemberRow> for Member {
    fn from(row: MemberRow) -> Self {
        Member {
            id: row.id,
            member_number: row.member_number,
            name: row.name,
            phone: row.phone,
            email: row.email,
            date_of_birth: row.date_of_birth,
            tier: row.tier,
            total_points: row.total_points,
            available_points: row.available_points,
            used_points: row.used_points,
            expired_points: row.expired_points,
            total_spent: Money::from_cents(row.total_spent_cents),
            total_orders: row.total_orders,
            is_active: row.is_active,
            last_visit_at: row.last_visit_at,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    id: String,
    member_id: String,
    kind: PointKind,
    points: i64,
    balance_after: i64,
    description: Option<String>,
    order_id: Option<String>,
    reward_id: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    is_expired: bool,
    created_at: DateTime<Utc>,
}

impl From<HistoryRow> for PointHistory {
    fn from(row: HistoryRow) -> Self {
        PointHistory {
            id: row.id,
            member_id: row.member_id,
            kind: row.kind,
            points: row.points,
            balance_after: row.balance_after,
            description: row.description,
            order_id: row.order_id,
            reward_id: row.reward_id,
            expires_at: row.expires_at,
            is_expired: row.is_expired,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UpgradeRow {
    id: String,
    member_id: String,
    from_tier: Tier,
    to_tier: Tier,
    total_spent_cents: i64,
    total_orders: i64,
    created_at: DateTime<Utc>,
}

impl From<UpgradeRow> for TierUpgrade {
    fn from(row: UpgradeRow) -> Self {
        TierUpgrade {
            id: row.id,
            member_id: row.member_id,
            from_tier: row.from_tier,
            to_tier: row.to_tier,
            total_spent: Money::from_cents(row.total_spent_cents),
            total_orders: row.total_orders,
            created_at: row.created_at,
        }
    }
}

const SELECT_MEMBER: &str = r#"
    SELECT id, member_number, name, phone, email, date_of_birth, tier,
           total_points, available_points, used_points, expired_points,
           total_spent_cents, total_orders, is_active, last_visit_at, version,
           created_at, updated_at
    FROM members
"#;

const SELECT_HISTORY: &str = r#"
    SELECT id, member_id, kind, points, balance_after, description, order_id,
           reward_id, expires_at, is_expired, created_at
    FROM point_history
"#;

// =============================================================================
// Statements
// =============================================================================

pub(crate) async fn insert_member(conn: &mut SqliteConnection, member: &Member) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO members (
            id, member_number, name, phone, email, date_of_birth, tier,
            total_points, available_points, used_points, expired_points,
            total_spent_cents, total_orders, is_active, last_visit_at, version,
            created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
        "#,
    )
    .bind(&member.id)
    .bind(&member.member_number)
    .bind(&member.name)
    .bind(&member.phone)
    .bind(&member.email)
    .bind(member.date_of_birth)
    .bind(member.tier)
    .bind(member.total_points)
    .bind(member.available_points)
    .bind(member.used_points)
    .bind(member.expired_points)
    .bind(member.total_spent.cents())
    .bind(member.total_orders)
    .bind(member.is_active)
    .bind(member.last_visit_at)
    .bind(member.version)
    .bind(member.created_at)
    .bind(member.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn fetch_member(
    conn: &mut SqliteConnection,
    id: &str,
) -> DbResult<Option<Member>> {
    let row: Option<MemberRow> = sqlx::query_as(&format!("{SELECT_MEMBER} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(row.map(Member::from))
}

/// Writes a member's new balances and tier, guarded by its version.
///
/// ## Errors
/// `Conflict` when another writer bumped the version first.
pub(crate) async fn update_member(
    conn: &mut SqliteConnection,
    member: &Member,
    expected_version: i64,
) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE members SET
            tier = ?1,
            total_points = ?2,
            available_points = ?3,
            used_points = ?4,
            expired_points = ?5,
            total_spent_cents = ?6,
            total_orders = ?7,
            last_visit_at = ?8,
            updated_at = ?9,
            version = version + 1
        WHERE id = ?10 AND version = ?11
        "#,
    )
    .bind(member.tier)
    .bind(member.total_points)
    .bind(member.available_points)
    .bind(member.used_points)
    .bind(member.expired_points)
    .bind(member.total_spent.cents())
    .bind(member.total_orders)
    .bind(member.last_visit_at)
    .bind(member.updated_at)
    .bind(&member.id)
    .bind(expected_version)
    .execute(conn)
    .await?;
    expect_one_row(result, "member", &member.id)
}

pub(crate) async fn insert_history(
    conn: &mut SqliteConnection,
    entry: &PointHistory,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO point_history (
            id, member_id, kind, points, balance_after, description, order_id,
            reward_id, expires_at, is_expired, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.member_id)
    .bind(entry.kind)
    .bind(entry.points)
    .bind(entry.balance_after)
    .bind(&entry.description)
    .bind(&entry.order_id)
    .bind(&entry.reward_id)
    .bind(entry.expires_at)
    .bind(entry.is_expired)
    .bind(entry.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn insert_upgrade(
    conn: &mut SqliteConnection,
    upgrade: &TierUpgrade,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO tier_upgrades (id, member_id, from_tier, to_tier, total_spent_cents, total_orders, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(&upgrade.id)
    .bind(&upgrade.member_id)
    .bind(upgrade.from_tier)
    .bind(upgrade.to_tier)
    .bind(upgrade.total_spent.cents())
    .bind(upgrade.total_orders)
    .bind(upgrade.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn mark_expired(conn: &mut SqliteConnection, entry_id: &str) -> DbResult<()> {
    let result =
        sqlx::query("UPDATE point_history SET is_expired = 1 WHERE id = ?1 AND is_expired = 0")
            .bind(entry_id)
            .execute(conn)
            .await?;
    expect_one_row(result, "point_history", entry_id)
}

pub(crate) async fn fetch_history(
    conn: &mut SqliteConnection,
    member_id: &str,
) -> DbResult<Vec<PointHistory>> {
    let rows: Vec<HistoryRow> =
        sqlx::query_as(&format!("{SELECT_HISTORY} WHERE member_id = ?1 ORDER BY seq"))
            .bind(member_id)
            .fetch_all(conn)
            .await?;
    Ok(rows.into_iter().map(PointHistory::from).collect())
}

/// Unprocessed EARN entries that carry an expiry date, for every member.
/// Whether each is actually due is decided by `brew_core::loyalty::expire_points`.
pub(crate) async fn fetch_expiring_entries(
    conn: &mut SqliteConnection,
) -> DbResult<Vec<PointHistory>> {
    let rows: Vec<HistoryRow> = sqlx::query_as(&format!(
        "{SELECT_HISTORY} WHERE kind = 'EARN' AND is_expired = 0 AND expires_at IS NOT NULL ORDER BY member_id, seq"
    ))
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(PointHistory::from).collect())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for members. Writes go through the unit of work.
#[derive(Debug, Clone)]
pub struct MemberRepository {
    pool: SqlitePool,
}

impl MemberRepository {
    pub fn new(pool: SqlitePool) -> Self {
        MemberRepository { pool }
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Member>> {
        fetch_member(&mut *self.pool.acquire().await?, id).await
    }

    pub async fn get(&self, id: &str) -> DbResult<Member> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Member", id))
    }

    pub async fn get_by_number(&self, member_number: &str) -> DbResult<Option<Member>> {
        let row: Option<MemberRow> =
            sqlx::query_as(&format!("{SELECT_MEMBER} WHERE member_number = ?1"))
                .bind(member_number)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Member::from))
    }

    pub async fn get_by_phone(&self, phone: &str) -> DbResult<Option<Member>> {
        let row: Option<MemberRow> = sqlx::query_as(&format!("{SELECT_MEMBER} WHERE phone = ?1"))
            .bind(phone)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Member::from))
    }

    /// Every member, oldest first.
    pub async fn list(&self) -> DbResult<Vec<Member>> {
        let rows: Vec<MemberRow> =
            sqlx::query_as(&format!("{SELECT_MEMBER} ORDER BY created_at, id"))
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(Member::from).collect())
    }

    /// The member's point ledger in posting order.
    pub async fn history(&self, member_id: &str) -> DbResult<Vec<PointHistory>> {
        fetch_history(&mut *self.pool.acquire().await?, member_id).await
    }

    /// Tier transitions of a member, oldest first.
    pub async fn upgrades(&self, member_id: &str) -> DbResult<Vec<TierUpgrade>> {
        let rows: Vec<UpgradeRow> = sqlx::query_as(
            r#"
            SELECT id, member_id, from_tier, to_tier, total_spent_cents, total_orders, created_at
            FROM tier_upgrades
            WHERE member_id = ?1
            ORDER BY created_at, id
            "#,
        )
        .bind(member_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(TierUpgrade::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use brew_core::loyalty::{register_member, replay_points};
    use brew_core::{LoyaltyPolicy, NewMember};

    #[tokio::test]
    async fn test_member_round_trip_and_version_guard() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let (member, welcome) = register_member(
            &NewMember {
                name: "Nok".to_string(),
                phone: Some("0812345678".to_string()),
                ..Default::default()
            },
            &LoyaltyPolicy::default(),
            Utc::now(),
        )
        .unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        insert_member(&mut conn, &member).await.unwrap();
        insert_history(&mut conn, &welcome.unwrap()).await.unwrap();

        let mut changed = member.clone();
        changed.tier = Tier::Silver;
        update_member(&mut conn, &changed, member.version).await.unwrap();
        let stale = update_member(&mut conn, &changed, member.version)
            .await
            .unwrap_err();
        assert!(stale.is_conflict());
        drop(conn);

        let stored = db.members().get(&member.id).await.unwrap();
        assert_eq!(stored.tier, Tier::Silver);
        assert_eq!(stored.version, member.version + 1);
        assert_eq!(stored.available_points, 10);

        let by_phone = db.members().get_by_phone("0812345678").await.unwrap();
        assert_eq!(by_phone.map(|m| m.id), Some(member.id.clone()));

        let history = db.members().history(&member.id).await.unwrap();
        assert_eq!(replay_points(&history), stored.balances());
    }
}
