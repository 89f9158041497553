//! # Point Rule Repository

use brew_core::{Money, PointRule, PointRuleKind, Rate, Tier};
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::error::{DbError, DbResult};
use crate::repository::bps_column;

#[derive(Debug, sqlx::FromRow)]
struct PointRuleRow {
    id: String,
    name: String,
    kind: PointRuleKind,
    spend_amount_cents: i64,
    earn_points: i64,
    bonus_multiplier_bps: Option<i64>,
    applicable_tiers: String,
    priority: i64,
    is_active: bool,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PointRuleRow> for PointRule {
    type Error = DbError;

    fn try_from(row: PointRuleRow) -> DbResult<Self> {
        let applicable_tiers: Vec<Tier> = serde_json::from_str(&row.applicable_tiers)
            .map_err(|e| DbError::corrupt("point_rule", &row.id, e.to_string()))?;
        let bonus_multiplier = row
            .bonus_multiplier_bps
            .map(|bps| bps_column("point_rule", &row.id, bps).map(Rate::from_bps))
            .transpose()?;
        Ok(PointRule {
            id: row.id,
            name: row.name,
            kind: row.kind,
            spend_amount: Money::from_cents(row.spend_amount_cents),
            earn_points: row.earn_points,
            bonus_multiplier,
            applicable_tiers,
            priority: row.priority,
            is_active: row.is_active,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            created_at: row.created_at,
        })
    }
}

/// Rules flagged active. Kind and date window are checked by the accrual
/// pipeline.
pub(crate) async fn fetch_active_rules(conn: &mut SqliteConnection) -> DbResult<Vec<PointRule>> {
    let rows: Vec<PointRuleRow> = sqlx::query_as(
        r#"
        SELECT id, name, kind, spend_amount_cents, earn_points, bonus_multiplier_bps,
               applicable_tiers, priority, is_active, starts_at, ends_at, created_at
        FROM point_rules
        WHERE is_active = 1
        ORDER BY priority DESC, id
        "#,
    )
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(PointRule::try_from).collect()
}

/// Repository for point-earning rules.
#[derive(Debug, Clone)]
pub struct PointRuleRepository {
    pool: SqlitePool,
}

impl PointRuleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PointRuleRepository { pool }
    }

    pub async fn create(&self, rule: &PointRule) -> DbResult<()> {
        info!(rule_id = %rule.id, priority = rule.priority, "Creating point rule");
        let tiers = serde_json::to_string(&rule.applicable_tiers)
            .map_err(|e| DbError::Internal(format!("encode applicable tiers: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO point_rules (
                id, name, kind, spend_amount_cents, earn_points, bonus_multiplier_bps,
                applicable_tiers, priority, is_active, starts_at, ends_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.name)
        .bind(rule.kind)
        .bind(rule.spend_amount.cents())
        .bind(rule.earn_points)
        .bind(rule.bonus_multiplier.map(|r| i64::from(r.bps())))
        .bind(tiers)
        .bind(rule.priority)
        .bind(rule.is_active)
        .bind(rule.starts_at)
        .bind(rule.ends_at)
        .bind(rule.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_active(&self) -> DbResult<Vec<PointRule>> {
        fetch_active_rules(&mut *self.pool.acquire().await?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    #[tokio::test]
    async fn test_rules_come_back_by_priority() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let rule = |id: &str, priority: i64, active: bool| PointRule {
            id: id.to_string(),
            name: id.to_string(),
            kind: PointRuleKind::Purchase,
            spend_amount: Money::from_major(100),
            earn_points: 1,
            bonus_multiplier: Some(Rate::from_bps(15_000)),
            applicable_tiers: vec![Tier::Gold, Tier::Platinum],
            priority,
            is_active: active,
            starts_at: None,
            ends_at: None,
            created_at: now,
        };
        db.point_rules().create(&rule("base", 0, true)).await.unwrap();
        db.point_rules().create(&rule("double", 10, true)).await.unwrap();
        db.point_rules().create(&rule("retired", 99, false)).await.unwrap();

        let rules = db.point_rules().list_active().await.unwrap();
        let ids: Vec<_> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["double", "base"]);
        assert_eq!(rules[0].applicable_tiers, vec![Tier::Gold, Tier::Platinum]);
        assert_eq!(rules[0].bonus_multiplier, Some(Rate::from_bps(15_000)));
    }
}
