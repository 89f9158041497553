//! # Loyalty Operations
//!
//! Direct access to member balances outside of a sale.
//!
//! ```text
//! register_member ──► welcome BONUS
//! earn_points ──────► EARN (+ tier check ──► BONUS, TierUpgrade)
//! redeem_points ────► REDEEM, RewardRedemption (PENDING, 30 days)
//! expire_points ────► EXPIRE for every due EARN entry
//! ```
//!
//! Every balance write is guarded by the member's version and retried on
//! conflict, so concurrent writers for one member never interleave.

use brew_core::loyalty::{accrue, expire_points, redeem, register_member};
use brew_core::{
    CoreError, Member, Money, NewMember, PointBalances, RewardRedemption, Tier,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use ts_rs::TS;

use crate::error::EngineResult;
use crate::retry::with_conflict_retry;
use crate::Engine;

/// Outcome of [`Engine::earn_points`].
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct PointsEarned {
    pub member_id: String,
    /// EARN points of this event, excluding an upgrade bonus.
    pub points_earned: i64,
    pub available_points: i64,
    pub tier: Tier,
    /// Set when this event moved the member up a tier.
    pub upgraded_to: Option<Tier>,
}

/// Outcome of one expiry run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExpiryRun {
    /// Members with at least one due entry.
    pub members: usize,
    /// Points taken from available balances.
    pub points: i64,
}

impl Engine {
    /// Registers a Bronze member, paying the configured welcome bonus.
    pub async fn register_member(&self, input: NewMember) -> EngineResult<Member> {
        let (member, welcome) = register_member(&input, &self.loyalty_policy(), Utc::now())?;

        let mut uow = self.db.begin().await?;
        uow.insert_member(&member, welcome.as_ref()).await?;
        uow.commit().await?;

        info!(
            member_id = %member.id,
            member_number = %member.member_number,
            welcome_points = member.available_points,
            "Member registered"
        );
        Ok(member)
    }

    /// Credits points to a member outside of a settlement.
    ///
    /// `points` are granted as given; `spent`, when present, also runs the
    /// purchase rules and counts one order toward the tier thresholds.
    ///
    /// ## Errors
    /// `MemberNotFound`, `MemberInactive`, `Validation` for negative input.
    pub async fn earn_points(
        &self,
        member_id: &str,
        order_id: Option<&str>,
        points: i64,
        spent: Option<Money>,
    ) -> EngineResult<PointsEarned> {
        let posting = with_conflict_retry(&self.retry, "earn_points", move |_| async move {
            let now = Utc::now();
            let mut uow = self.db.begin().await?;
            let member = uow
                .member(member_id)
                .await?
                .ok_or_else(|| CoreError::MemberNotFound(member_id.to_string()))?;
            let rules = match spent {
                Some(_) => uow.active_point_rules().await?,
                None => Vec::new(),
            };

            let posting = accrue(
                &member,
                points,
                spent,
                &rules,
                order_id,
                &self.loyalty_policy(),
                now,
            )?;
            uow.apply_loyalty(&posting).await?;
            uow.commit().await?;
            Ok(posting)
        })
        .await?;

        let upgraded_to = posting.upgrade.as_ref().map(|u| u.to_tier);
        info!(
            member_id = %member_id,
            points = posting.points_earned,
            available = posting.member.available_points,
            upgraded_to = ?upgraded_to,
            "Points earned"
        );

        Ok(PointsEarned {
            member_id: posting.member.id,
            points_earned: posting.points_earned,
            available_points: posting.member.available_points,
            tier: posting.member.tier,
            upgraded_to,
        })
    }

    /// Redeems a reward for a member.
    ///
    /// ## Errors
    /// `MemberNotFound`, `RewardNotFound`, then the checks of
    /// [`brew_core::loyalty::redeem`]: `RewardUnavailable`, `MemberInactive`,
    /// `InsufficientPoints`, `TierNotMet`, `RewardLimitReached`.
    pub async fn redeem_points(
        &self,
        member_id: &str,
        reward_id: &str,
        order_id: Option<&str>,
    ) -> EngineResult<RewardRedemption> {
        let redemption = with_conflict_retry(&self.retry, "redeem_points", move |_| async move {
            let mut uow = self.db.begin().await?;
            let member = uow
                .member(member_id)
                .await?
                .ok_or_else(|| CoreError::MemberNotFound(member_id.to_string()))?;
            let reward = uow
                .reward(reward_id)
                .await?
                .ok_or_else(|| CoreError::RewardNotFound(reward_id.to_string()))?;
            let previous = uow.redemption_count(member_id, reward_id).await?;

            let posting = redeem(
                &member,
                &reward,
                previous,
                order_id,
                &self.loyalty_policy(),
                Utc::now(),
            )?;
            uow.apply_redemption(&posting).await?;
            uow.commit().await?;
            Ok(posting.redemption)
        })
        .await?;

        info!(
            member_id = %member_id,
            reward_id = %reward_id,
            points = redemption.points_used,
            "Reward redeemed"
        );
        Ok(redemption)
    }

    /// Expires every EARN entry due at `now`, in one transaction.
    pub async fn expire_points(&self, now: DateTime<Utc>) -> EngineResult<ExpiryRun> {
        let run = with_conflict_retry(&self.retry, "expire_points", move |_| async move {
            let mut uow = self.db.begin().await?;
            let mut run = ExpiryRun::default();

            for (member_id, entries) in uow.expiring_entries().await? {
                let Some(member) = uow.member(&member_id).await? else {
                    continue;
                };
                let Some(posting) = expire_points(&member, &entries, now) else {
                    continue;
                };
                run.members += 1;
                run.points += posting.entry.as_ref().map_or(0, |e| -e.points);
                uow.apply_expiry(&posting).await?;
            }

            uow.commit().await?;
            Ok(run)
        })
        .await?;

        info!(members = run.members, points = run.points, "Point expiry finished");
        Ok(run)
    }

    /// Cached balances of a member.
    pub async fn point_balance(&self, member_id: &str) -> EngineResult<PointBalances> {
        let member = self
            .db
            .members()
            .get_by_id(member_id)
            .await?
            .ok_or_else(|| CoreError::MemberNotFound(member_id.to_string()))?;
        Ok(member.balances())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::engine;
    use brew_core::loyalty::replay_points;
    use brew_core::{PointKind, PointRule, PointRuleKind, Rate, Reward};
    use chrono::Duration;

    async fn member(engine: &Engine, name: &str) -> Member {
        engine
            .register_member(NewMember {
                name: name.to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    fn purchase_rule() -> PointRule {
        PointRule {
            id: "per-100".to_string(),
            name: "1 point per 100".to_string(),
            kind: PointRuleKind::Purchase,
            spend_amount: Money::from_major(100),
            earn_points: 1,
            bonus_multiplier: Some(Rate::from_percent(150)),
            applicable_tiers: vec![Tier::Gold, Tier::Platinum],
            priority: 0,
            is_active: true,
            starts_at: None,
            ends_at: None,
            created_at: Utc::now(),
        }
    }

    fn reward(id: &str, cost: i64, tier: Option<Tier>) -> Reward {
        Reward {
            id: id.to_string(),
            name: id.to_string(),
            description: None,
            point_cost: cost,
            required_tier: tier,
            is_active: true,
            starts_at: None,
            ends_at: None,
            usage_limit: None,
            redemption_count: 0,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_register_pays_welcome_bonus() {
        let engine = engine().await;
        let m = member(&engine, "Ploy").await;

        assert!(m.member_number.starts_with("MEM"));
        assert_eq!(m.member_number.len(), 15);
        assert_eq!(m.tier, Tier::Bronze);
        assert_eq!(m.available_points, 10);

        let history = engine.db().members().history(&m.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, PointKind::Bonus);
    }

    #[tokio::test]
    async fn test_earn_on_spend() {
        let engine = engine().await;
        engine.db().point_rules().create(&purchase_rule()).await.unwrap();
        let m = member(&engine, "Ploy").await;

        let earned = engine
            .earn_points(&m.id, Some("order-1"), 0, Some(Money::from_major(250)))
            .await
            .unwrap();
        assert_eq!(earned.points_earned, 2);
        assert_eq!(earned.available_points, 12);
        assert_eq!(earned.upgraded_to, None);

        let stored = engine.db().members().get(&m.id).await.unwrap();
        assert_eq!(stored.total_orders, 1);
        assert_eq!(stored.total_spent, Money::from_major(250));
    }

    #[tokio::test]
    async fn test_silver_bonus_paid_once_at_boundary() {
        let engine = engine().await;
        let m = member(&engine, "Ploy").await;

        // 19 orders, 4999 spent
        for i in 0..19 {
            let spent = if i == 18 { 265 } else { 263 };
            engine
                .earn_points(&m.id, None, 0, Some(Money::from_major(spent)))
                .await
                .unwrap();
        }
        let before = engine.db().members().get(&m.id).await.unwrap();
        assert_eq!(before.total_spent, Money::from_major(4_999));
        assert_eq!(before.total_orders, 19);
        assert_eq!(before.tier, Tier::Bronze);

        let crossed = engine
            .earn_points(&m.id, None, 0, Some(Money::from_major(1)))
            .await
            .unwrap();
        assert_eq!(crossed.upgraded_to, Some(Tier::Silver));
        assert_eq!(crossed.available_points, 10 + 50);

        let again = engine
            .earn_points(&m.id, None, 0, Some(Money::from_major(1)))
            .await
            .unwrap();
        assert_eq!(again.upgraded_to, None);
        assert_eq!(again.available_points, 60);
        assert_eq!(engine.db().members().upgrades(&m.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_redeem_checks_leave_state_unchanged() {
        let engine = engine().await;
        let rewards = engine.db().rewards();
        rewards.create(&reward("free-latte", 80, None)).await.unwrap();
        rewards.create(&reward("silver-mug", 20, Some(Tier::Silver))).await.unwrap();
        let m = member(&engine, "Ploy").await;
        engine.earn_points(&m.id, None, 40, None).await.unwrap();

        let poor = engine.redeem_points(&m.id, "free-latte", None).await.unwrap_err();
        assert!(matches!(
            poor.as_core(),
            Some(CoreError::InsufficientPoints { required: 80, available: 50 })
        ));

        let tier = engine.redeem_points(&m.id, "silver-mug", None).await.unwrap_err();
        assert!(matches!(tier.as_core(), Some(CoreError::TierNotMet { .. })));

        let stored = engine.db().members().get(&m.id).await.unwrap();
        assert_eq!(stored.available_points, 50);
        assert_eq!(stored.used_points, 0);
        assert!(engine.db().rewards().redemptions_for_member(&m.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_redeem() {
        let engine = engine().await;
        engine.db().rewards().create(&reward("free-americano", 50, None)).await.unwrap();
        let m = member(&engine, "Ploy").await;
        engine.earn_points(&m.id, None, 60, None).await.unwrap();

        let redemption = engine
            .redeem_points(&m.id, "free-americano", Some("order-9"))
            .await
            .unwrap();
        assert_eq!(redemption.points_used, 50);
        assert_eq!(redemption.order_id.as_deref(), Some("order-9"));

        let balances = engine.point_balance(&m.id).await.unwrap();
        assert_eq!(balances.available, 20);
        assert_eq!(balances.used, 50);
        assert_eq!(engine.db().rewards().get("free-americano").await.unwrap().redemption_count, 1);

        let missing = engine.redeem_points(&m.id, "yacht", None).await.unwrap_err();
        assert!(matches!(missing.as_core(), Some(CoreError::RewardNotFound(_))));
    }

    #[tokio::test]
    async fn test_expire_due_points() {
        let engine = engine().await;
        let m = member(&engine, "Ploy").await;
        engine.earn_points(&m.id, None, 100, None).await.unwrap();

        let nothing = engine.expire_points(Utc::now()).await.unwrap();
        assert_eq!(nothing, ExpiryRun::default());

        let run = engine
            .expire_points(Utc::now() + Duration::days(366))
            .await
            .unwrap();
        assert_eq!(run, ExpiryRun { members: 1, points: 100 });

        let balances = engine.point_balance(&m.id).await.unwrap();
        assert_eq!(balances.available, 10);
        assert_eq!(balances.expired, 100);

        let history = engine.db().members().history(&m.id).await.unwrap();
        assert_eq!(replay_points(&history), balances);

        let repeat = engine
            .expire_points(Utc::now() + Duration::days(366))
            .await
            .unwrap();
        assert_eq!(repeat, ExpiryRun::default());
    }

    #[tokio::test]
    async fn test_unknown_member() {
        let engine = engine().await;
        let err = engine.earn_points("ghost", None, 5, None).await.unwrap_err();
        assert!(matches!(err.as_core(), Some(CoreError::MemberNotFound(_))));
        assert!(engine.point_balance("ghost").await.is_err());
    }
}
