//! # Conflict Retry
//!
//! Re-runs an operation whose compare-and-swap write lost a race.
//!
//! ## Attempt Loop
//! ```text
//!   attempt 1 ──► fresh snapshot ──► plan ──► CAS writes ──► commit ──► Ok
//!                                                 │
//!                                         DbError::Conflict
//!                                                 │
//!                          (tx dropped, nothing persisted)
//!                                                 ▼
//!                              sleep(exponential backoff)
//!                                                 │
//!   attempt 2 ──► fresh snapshot ──► plan ... ◄───┘
//!      ...
//!   attempt N ──► Conflict ──► EngineError::Conflict { attempts: N }
//! ```
//!
//! Each attempt re-reads and re-validates from scratch, so a retry can end
//! in a business error (for example `InsufficientStock` once the winner of
//! the race took the last units) rather than another conflict.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use brew_db::DbError;
use tracing::warn;

use crate::config::SettlementSettings;
use crate::error::{EngineError, EngineResult};

/// Attempt limit and backoff curve.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None, // bounded by max_attempts instead
            ..Default::default()
        }
    }
}

impl From<&SettlementSettings> for RetryPolicy {
    fn from(settings: &SettlementSettings) -> Self {
        RetryPolicy {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: settings.initial_backoff(),
            max_backoff: settings.max_backoff(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&SettlementSettings::default())
    }
}

/// Runs `attempt` until it succeeds, fails with anything but a storage
/// conflict, or `max_attempts` is reached.
///
/// The closure receives the 1-based attempt number.
///
/// ## Errors
/// - whatever `attempt` returns, other than `DbError::Conflict`
/// - `EngineError::Conflict` once `max_attempts` attempts all conflicted
pub async fn with_conflict_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut attempt: F,
) -> EngineResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let mut backoff = policy.backoff();
    let mut number = 1;

    loop {
        match attempt(number).await {
            Err(EngineError::Db(DbError::Conflict { entity, id })) => {
                if number >= policy.max_attempts {
                    warn!(
                        operation,
                        entity = %entity,
                        id = %id,
                        attempts = number,
                        "Conflict persisted, giving up"
                    );
                    return Err(EngineError::Conflict {
                        entity,
                        id,
                        attempts: number,
                    });
                }

                let delay = backoff.next_backoff().unwrap_or(policy.max_backoff);
                warn!(
                    operation,
                    entity = %entity,
                    id = %id,
                    attempt = number,
                    ?delay,
                    "Concurrent update detected, retrying"
                );
                tokio::time::sleep(delay).await;
                number += 1;
            }
            result => return result,
        }
    }
}
