//! # Ledger Audit
//!
//! Cached balances are a convenience; the ledgers are the truth. The audit
//! replays every ledger from its first entry and reports each cached
//! figure that disagrees.
//!
//! ```text
//! stock_movements ── replay_stock ──► Quantity ─┐
//!                                               ├── compare ──► LedgerDrift
//! ingredients.current_stock ────────────────────┘
//!
//! point_history ──── replay_points ─► PointBalances ─┐
//!                                                    ├── compare ──► LedgerDrift
//! members.{total,available,used,expired}_points ─────┘
//! ```
//!
//! Reads go through the pool outside any transaction; run it while no
//! settlements are in flight to avoid reporting a half-read commit.

use brew_core::inventory::replay_stock;
use brew_core::loyalty::replay_points;
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

use crate::error::EngineResult;
use crate::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerKind {
    Stock,
    Points,
}

impl fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerKind::Stock => write!(f, "stock"),
            LedgerKind::Points => write!(f, "points"),
        }
    }
}

/// One cached figure that does not match its ledger.
///
/// Stock figures are in milli-units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerDrift {
    pub ledger: LedgerKind,
    pub entity_id: String,
    pub field: &'static str,
    pub cached: i64,
    pub replayed: i64,
}

impl fmt::Display for LedgerDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {} cached {} but ledger replays to {}",
            self.ledger, self.entity_id, self.field, self.cached, self.replayed
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub ingredients_checked: usize,
    pub members_checked: usize,
    pub drifts: Vec<LedgerDrift>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.drifts.is_empty()
    }

    fn compare(
        &mut self,
        ledger: LedgerKind,
        entity_id: &str,
        field: &'static str,
        cached: i64,
        replayed: i64,
    ) {
        if cached != replayed {
            self.drifts.push(LedgerDrift {
                ledger,
                entity_id: entity_id.to_string(),
                field,
                cached,
                replayed,
            });
        }
    }
}

impl Engine {
    /// Replays every stock and point ledger against the cached balances.
    pub async fn audit_ledgers(&self) -> EngineResult<AuditReport> {
        let mut report = AuditReport::default();

        let ingredients = self.db.ingredients();
        for ingredient in ingredients.list().await? {
            let movements = ingredients.movements(&ingredient.id).await?;
            report.compare(
                LedgerKind::Stock,
                &ingredient.id,
                "current_stock",
                ingredient.current_stock.milli(),
                replay_stock(&movements).milli(),
            );
            report.ingredients_checked += 1;
        }

        let members = self.db.members();
        for member in members.list().await? {
            let history = members.history(&member.id).await?;
            let cached = member.balances();
            let replayed = replay_points(&history);
            for (field, cached, replayed) in [
                ("total_points", cached.total, replayed.total),
                ("available_points", cached.available, replayed.available),
                ("used_points", cached.used, replayed.used),
                ("expired_points", cached.expired, replayed.expired),
            ] {
                report.compare(LedgerKind::Points, &member.id, field, cached, replayed);
            }
            report.members_checked += 1;
        }

        for drift in &report.drifts {
            warn!(%drift, "Ledger drift");
        }
        info!(
            ingredients = report.ingredients_checked,
            members = report.members_checked,
            drifts = report.drifts.len(),
            "Ledger audit finished"
        );
        Ok(report)
    }
}
