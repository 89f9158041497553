//! # Loyalty Engine
//!
//! Members, the point ledger, earning rules, rewards and membership tiers.
//!
//! ## Point Balances
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Member Point Balances                               │
//! │                                                                         │
//! │  total_points     sum of everything ever earned (EARN, BONUS)          │
//! │  used_points      sum of everything redeemed (REDEEM)                  │
//! │  expired_points   sum of everything expired (EXPIRE)                   │
//! │                                                                         │
//! │  available_points = total_points - used_points - expired_points        │
//! │                                                                         │
//! │  Each change writes one PointHistory row with balance_after, so the    │
//! │  balances can always be rebuilt with `replay_points`.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Accrual Pipeline
//! ```text
//!   active PURCHASE rules in date window, by priority (high → low)
//!        │
//!        ▼  for each rule, fold the stages:
//!   ┌──────────────┐     ┌──────────────────┐
//!   │ ratio_stage  │ ──► │ tier_multiplier  │ ──► rule points
//!   │ ⌊spent/step⌋ │     │ × bonus (if the  │
//!   │  × earn      │     │   tier matches)  │
//!   └──────────────┘     └──────────────────┘
//!        │
//!        ▼
//!   sum over rules (cumulative, never exclusive) + explicit base points
//! ```
//!
//! ## Tiers
//! ```text
//!   Tier       total_spent   total_orders   upgrade bonus
//!   SILVER       ≥  5 000        ≥  20           50
//!   GOLD         ≥ 20 000        ≥  50          100
//!   PLATINUM     ≥ 50 000        ≥ 100          200
//! ```
//! A member moves to the highest tier met, only upward, and the bonus of
//! the reached tier is paid once.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::money::{Money, Rate};
use crate::validation::{validate_name, validate_points};

// =============================================================================
// Tier
// =============================================================================

/// Membership level. The derive order is the business order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS,
)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    #[default]
    Bronze,
    Silver,
    Gold,
    Platinum,
}

/// Upgrade thresholds, highest first: (tier, min spend in major units,
/// min orders, bonus points).
const TIER_THRESHOLDS: [(Tier, i64, i64, i64); 3] = [
    (Tier::Platinum, 50_000, 100, 200),
    (Tier::Gold, 20_000, 50, 100),
    (Tier::Silver, 5_000, 20, 50),
];

impl Tier {
    /// The highest tier whose spend and order thresholds are both met.
    pub fn qualifying(total_spent: Money, total_orders: i64) -> Tier {
        TIER_THRESHOLDS
            .iter()
            .find(|(_, spend, orders, _)| {
                total_spent >= Money::from_major(*spend) && total_orders >= *orders
            })
            .map(|(tier, ..)| *tier)
            .unwrap_or(Tier::Bronze)
    }

    /// One-time bonus paid when a member reaches this tier.
    pub fn upgrade_bonus(&self) -> i64 {
        TIER_THRESHOLDS
            .iter()
            .find(|(tier, ..)| tier == self)
            .map(|(.., bonus)| *bonus)
            .unwrap_or(0)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Bronze => write!(f, "BRONZE"),
            Tier::Silver => write!(f, "SILVER"),
            Tier::Gold => write!(f, "GOLD"),
            Tier::Platinum => write!(f, "PLATINUM"),
        }
    }
}

// =============================================================================
// Member
// =============================================================================

/// A loyalty account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Member {
    pub id: String,
    /// `MEM<yymmdd><6 digits>`
    pub member_number: String,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    #[ts(as = "Option<String>")]
    pub date_of_birth: Option<NaiveDate>,
    pub tier: Tier,
    pub total_points: i64,
    pub available_points: i64,
    pub used_points: i64,
    pub expired_points: i64,
    pub total_spent: Money,
    pub total_orders: i64,
    pub is_active: bool,
    #[ts(as = "Option<String>")]
    pub last_visit_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency counter, bumped on every balance write.
    pub version: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Member {
    pub fn balances(&self) -> PointBalances {
        PointBalances {
            total: self.total_points,
            available: self.available_points,
            used: self.used_points,
            expired: self.expired_points,
        }
    }

    fn ensure_active(&self) -> CoreResult<()> {
        if self.is_active {
            Ok(())
        } else {
            Err(CoreError::MemberInactive(self.id.clone()))
        }
    }

    fn credit(&mut self, points: i64) {
        self.total_points += points;
        self.available_points += points;
    }
}

/// Input for registering a member.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewMember {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    #[ts(as = "Option<String>")]
    pub date_of_birth: Option<NaiveDate>,
}

/// Point balance figures, cached on a member or rebuilt from a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PointBalances {
    pub total: i64,
    pub available: i64,
    pub used: i64,
    pub expired: i64,
}

// =============================================================================
// Point Ledger
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PointKind {
    Earn,
    Redeem,
    Bonus,
    Expire,
    Adjust,
}

/// Immutable point ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PointHistory {
    pub id: String,
    pub member_id: String,
    pub kind: PointKind,
    /// Signed delta: negative for REDEEM and EXPIRE.
    pub points: i64,
    /// Available points right after this entry.
    pub balance_after: i64,
    pub description: Option<String>,
    pub order_id: Option<String>,
    pub reward_id: Option<String>,
    #[ts(as = "Option<String>")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Set once the expiry job has processed this EARN entry.
    pub is_expired: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl PointHistory {
    fn entry(member: &Member, kind: PointKind, points: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            member_id: member.id.clone(),
            kind,
            points,
            balance_after: member.available_points,
            description: None,
            order_id: None,
            reward_id: None,
            expires_at: None,
            is_expired: false,
            created_at: now,
        }
    }

    fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }
}

/// Rebuilds balances from a member's ledger, in ledger order.
///
/// Read-only; the result must equal [`Member::balances`].
pub fn replay_points<'a>(entries: impl IntoIterator<Item = &'a PointHistory>) -> PointBalances {
    let mut b = PointBalances::default();
    for e in entries {
        match e.kind {
            PointKind::Earn | PointKind::Bonus | PointKind::Adjust => b.total += e.points,
            PointKind::Redeem => b.used -= e.points,
            PointKind::Expire => b.expired -= e.points,
        }
    }
    b.available = b.total - b.used - b.expired;
    b
}

// =============================================================================
// Point Rules
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PointRuleKind {
    Purchase,
    Birthday,
    Referral,
    Bonus,
}

/// A point-earning policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PointRule {
    pub id: String,
    pub name: String,
    pub kind: PointRuleKind,
    /// Spend per step: "100 spent → 1 point" has `spend_amount` 100.
    pub spend_amount: Money,
    pub earn_points: i64,
    /// Applied only when the member's tier is in `applicable_tiers`.
    pub bonus_multiplier: Option<Rate>,
    pub applicable_tiers: Vec<Tier>,
    /// Higher runs first.
    pub priority: i64,
    pub is_active: bool,
    #[ts(as = "Option<String>")]
    pub starts_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub ends_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl PointRule {
    fn accrues_on_spend(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.kind == PointRuleKind::Purchase
            && self.starts_at.map_or(true, |s| now >= s)
            && self.ends_at.map_or(true, |e| now <= e)
    }
}

/// What a rule is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct AccrualInput {
    pub tier: Tier,
    pub spent: Money,
    pub now: DateTime<Utc>,
}

/// One step of the per-rule pipeline: takes the points so far, returns the
/// new figure.
pub type RuleStage = fn(&PointRule, &AccrualInput, i64) -> i64;

/// `⌊spent / spend_amount⌋ × earn_points`
pub fn ratio_stage(rule: &PointRule, input: &AccrualInput, _points: i64) -> i64 {
    input.spent.whole_multiples_of(rule.spend_amount) * rule.earn_points
}

/// Multiplies by the rule's bonus when the member's tier qualifies.
pub fn tier_multiplier_stage(rule: &PointRule, input: &AccrualInput, points: i64) -> i64 {
    match rule.bonus_multiplier {
        Some(multiplier) if rule.applicable_tiers.contains(&input.tier) => {
            multiplier.scale_points(points)
        }
        _ => points,
    }
}

pub const RULE_PIPELINE: [RuleStage; 2] = [ratio_stage, tier_multiplier_stage];

/// Points a single rule yields.
pub fn rule_points(rule: &PointRule, input: &AccrualInput) -> i64 {
    RULE_PIPELINE
        .iter()
        .fold(0, |points, stage| stage(rule, input, points))
}

/// Rules that accrue on spend right now, highest priority first.
pub fn applicable_rules<'r>(
    rules: impl IntoIterator<Item = &'r PointRule>,
    now: DateTime<Utc>,
) -> Vec<&'r PointRule> {
    let mut active: Vec<_> = rules
        .into_iter()
        .filter(|r| r.accrues_on_spend(now))
        .collect();
    active.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
    active
}

/// Sum of every applicable rule's points for a spend.
pub fn points_for_spend<'r>(
    rules: impl IntoIterator<Item = &'r PointRule>,
    input: &AccrualInput,
) -> i64 {
    applicable_rules(rules, input.now)
        .into_iter()
        .map(|rule| rule_points(rule, input))
        .sum()
}

// =============================================================================
// Policy
// =============================================================================

/// Tunables of the loyalty program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoyaltyPolicy {
    pub point_expiry_days: i64,
    pub redemption_expiry_days: i64,
    pub welcome_bonus_points: i64,
}

impl Default for LoyaltyPolicy {
    fn default() -> Self {
        Self {
            point_expiry_days: 365,
            redemption_expiry_days: 30,
            welcome_bonus_points: 10,
        }
    }
}

// =============================================================================
// Registration
// =============================================================================

/// Generates a member number: `MEM` + `yymmdd` + six digits.
pub fn generate_member_number(now: DateTime<Utc>, id: &Uuid) -> String {
    format!("MEM{}{:06}", now.format("%y%m%d"), id.as_u128() % 1_000_000)
}

/// Builds a new Bronze member, crediting the welcome bonus through the
/// ledger when the policy grants one.
pub fn register_member(
    input: &NewMember,
    policy: &LoyaltyPolicy,
    now: DateTime<Utc>,
) -> CoreResult<(Member, Option<PointHistory>)> {
    validate_name("name", &input.name)?;

    let id = Uuid::new_v4();
    let mut member = Member {
        id: id.to_string(),
        member_number: generate_member_number(now, &id),
        name: input.name.trim().to_string(),
        phone: input.phone.clone(),
        email: input.email.clone(),
        date_of_birth: input.date_of_birth,
        tier: Tier::Bronze,
        total_points: 0,
        available_points: 0,
        used_points: 0,
        expired_points: 0,
        total_spent: Money::zero(),
        total_orders: 0,
        is_active: true,
        last_visit_at: None,
        version: 0,
        created_at: now,
        updated_at: now,
    };

    let welcome = (policy.welcome_bonus_points > 0).then(|| {
        member.credit(policy.welcome_bonus_points);
        PointHistory::entry(&member, PointKind::Bonus, policy.welcome_bonus_points, now)
            .describe("Welcome bonus")
    });

    Ok((member, welcome))
}

// =============================================================================
// Accrual and Tier Upgrade
// =============================================================================

/// Immutable record of a tier transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TierUpgrade {
    pub id: String,
    pub member_id: String,
    pub from_tier: Tier,
    pub to_tier: Tier,
    /// Figures that triggered the upgrade.
    pub total_spent: Money,
    pub total_orders: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// Everything one accrual changes for a member.
#[derive(Debug, Clone, PartialEq)]
pub struct LoyaltyPosting {
    /// Member state after the posting.
    pub member: Member,
    /// Version the stored member row must still have.
    pub expected_version: i64,
    /// EARN and/or upgrade BONUS entries, in order.
    pub entries: Vec<PointHistory>,
    pub upgrade: Option<TierUpgrade>,
    /// EARN points only, excluding any upgrade bonus.
    pub points_earned: i64,
}

/// The tier a member should move to, if strictly higher than the current one.
pub fn check_tier_upgrade(member: &Member) -> Option<Tier> {
    let target = Tier::qualifying(member.total_spent, member.total_orders);
    (target > member.tier).then_some(target)
}

/// Accrues points for one earning event.
///
/// `base_points` are explicit points granted by the caller; `spent`, when
/// given, runs the rule pipeline and counts an order. The tier check runs
/// afterwards and pays the reached tier's bonus.
///
/// ## Errors
/// - `MemberInactive` for a deactivated account
/// - `Validation` for negative base points
pub fn accrue(
    member: &Member,
    base_points: i64,
    spent: Option<Money>,
    rules: &[PointRule],
    order_id: Option<&str>,
    policy: &LoyaltyPolicy,
    now: DateTime<Utc>,
) -> CoreResult<LoyaltyPosting> {
    member.ensure_active()?;
    validate_points(base_points)?;
    if let Some(spent) = spent {
        crate::validation::validate_amount("spent_amount", spent)?;
    }

    let input = AccrualInput {
        tier: member.tier,
        spent: spent.unwrap_or_default(),
        now,
    };
    let rule_points = spent.map_or(0, |_| points_for_spend(rules, &input));
    let earned = base_points + rule_points;

    let mut updated = member.clone();
    let mut entries = Vec::new();

    if earned > 0 {
        updated.credit(earned);
        let mut earn = PointHistory::entry(&updated, PointKind::Earn, earned, now);
        earn.order_id = order_id.map(str::to_string);
        earn.expires_at = Some(now + Duration::days(policy.point_expiry_days));
        earn.description = Some(match order_id {
            Some(id) => format!("Points for order {id}"),
            None => "Points earned".to_string(),
        });
        entries.push(earn);
    }

    if let Some(spent) = spent {
        updated.total_spent += spent;
        updated.total_orders += 1;
    }
    updated.last_visit_at = Some(now);
    updated.updated_at = now;

    let upgrade = check_tier_upgrade(&updated).map(|to_tier| {
        let upgrade = TierUpgrade {
            id: Uuid::new_v4().to_string(),
            member_id: updated.id.clone(),
            from_tier: updated.tier,
            to_tier,
            total_spent: updated.total_spent,
            total_orders: updated.total_orders,
            created_at: now,
        };
        updated.tier = to_tier;
        let bonus = to_tier.upgrade_bonus();
        if bonus > 0 {
            updated.credit(bonus);
            entries.push(
                PointHistory::entry(&updated, PointKind::Bonus, bonus, now)
                    .describe(format!("Tier upgrade bonus: {to_tier}")),
            );
        }
        upgrade
    });

    Ok(LoyaltyPosting {
        member: updated,
        expected_version: member.version,
        entries,
        upgrade,
        points_earned: earned,
    })
}

// =============================================================================
// Rewards
// =============================================================================

/// A catalog reward paid for with points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Reward {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub point_cost: i64,
    pub required_tier: Option<Tier>,
    pub is_active: bool,
    #[ts(as = "Option<String>")]
    pub starts_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub ends_at: Option<DateTime<Utc>>,
    /// Redemptions allowed per member.
    pub usage_limit: Option<i64>,
    /// Redemptions across all members.
    pub redemption_count: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Reward {
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.starts_at.map_or(true, |s| now >= s)
            && self.ends_at.map_or(true, |e| now <= e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RedemptionStatus {
    #[default]
    Pending,
    Completed,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RewardRedemption {
    pub id: String,
    pub member_id: String,
    pub reward_id: String,
    pub order_id: Option<String>,
    pub points_used: i64,
    pub status: RedemptionStatus,
    #[ts(as = "String")]
    pub expires_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// Everything one redemption changes.
#[derive(Debug, Clone, PartialEq)]
pub struct RedemptionPosting {
    pub member: Member,
    pub expected_version: i64,
    pub redemption: RewardRedemption,
    pub entry: PointHistory,
}

/// Redeems a reward for a member.
///
/// `previous_redemptions` is how often this member already redeemed the
/// reward; it is checked against the reward's per-member limit.
///
/// ## Errors
/// In check order: `RewardUnavailable`, `MemberInactive`,
/// `InsufficientPoints`, `TierNotMet`, `RewardLimitReached`. Nothing is
/// changed on any of them.
pub fn redeem(
    member: &Member,
    reward: &Reward,
    previous_redemptions: i64,
    order_id: Option<&str>,
    policy: &LoyaltyPolicy,
    now: DateTime<Utc>,
) -> CoreResult<RedemptionPosting> {
    if !reward.is_available(now) {
        return Err(CoreError::RewardUnavailable(reward.id.clone()));
    }
    member.ensure_active()?;

    if member.available_points < reward.point_cost {
        return Err(CoreError::InsufficientPoints {
            required: reward.point_cost,
            available: member.available_points,
        });
    }
    if let Some(required) = reward.required_tier {
        if member.tier < required {
            return Err(CoreError::TierNotMet {
                required,
                current: member.tier,
            });
        }
    }
    if let Some(limit) = reward.usage_limit {
        if previous_redemptions >= limit {
            return Err(CoreError::RewardLimitReached {
                reward_id: reward.id.clone(),
                limit,
            });
        }
    }

    let mut updated = member.clone();
    updated.available_points -= reward.point_cost;
    updated.used_points += reward.point_cost;
    updated.last_visit_at = Some(now);
    updated.updated_at = now;

    let redemption = RewardRedemption {
        id: Uuid::new_v4().to_string(),
        member_id: member.id.clone(),
        reward_id: reward.id.clone(),
        order_id: order_id.map(str::to_string),
        points_used: reward.point_cost,
        status: RedemptionStatus::Pending,
        expires_at: now + Duration::days(policy.redemption_expiry_days),
        created_at: now,
    };

    let mut entry = PointHistory::entry(&updated, PointKind::Redeem, -reward.point_cost, now)
        .describe(format!("Redeemed {}", reward.name));
    entry.order_id = redemption.order_id.clone();
    entry.reward_id = Some(reward.id.clone());

    Ok(RedemptionPosting {
        member: updated,
        expected_version: member.version,
        redemption,
        entry,
    })
}

// =============================================================================
// Expiry
// =============================================================================

/// Everything one expiry run changes for a member.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiryPosting {
    pub member: Member,
    pub expected_version: i64,
    /// EARN entries to flag as processed.
    pub expired_entry_ids: Vec<String>,
    /// The EXPIRE entry, absent when nothing was left to take.
    pub entry: Option<PointHistory>,
}

/// Expires a member's due EARN entries.
///
/// The amount taken is bounded by the available balance, since points
/// already spent cannot expire a second time.
pub fn expire_points(
    member: &Member,
    due: &[PointHistory],
    now: DateTime<Utc>,
) -> Option<ExpiryPosting> {
    let due: Vec<&PointHistory> = due
        .iter()
        .filter(|e| {
            e.member_id == member.id
                && e.kind == PointKind::Earn
                && !e.is_expired
                && e.expires_at.is_some_and(|at| at <= now)
        })
        .collect();
    if due.is_empty() {
        return None;
    }

    let due_points: i64 = due.iter().map(|e| e.points).sum();
    let amount = due_points.min(member.available_points).max(0);

    let mut updated = member.clone();
    let entry = (amount > 0).then(|| {
        updated.available_points -= amount;
        updated.expired_points += amount;
        updated.updated_at = now;
        PointHistory::entry(&updated, PointKind::Expire, -amount, now).describe("Points expired")
    });

    Some(ExpiryPosting {
        member: updated,
        expected_version: member.version,
        expired_entry_ids: due.iter().map(|e| e.id.clone()).collect(),
        entry,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
