//! # Engine Error Types
//!
//! One error type for every engine operation, plus a serializable code for
//! whatever transport sits in front of the engine.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Error Flow in Brew POS                              │
//! │                                                                         │
//! │  brew-core ── CoreError (InsufficientStock, CouponInvalid, ...) ──┐    │
//! │                                                                   │    │
//! │  brew-db ──── DbError (Conflict, NotFound, QueryFailed, ...) ─────┼──► │
//! │                 │                                                 │    │
//! │                 └── Conflict ──► retry ──► still Conflict ────────┤    │
//! │                                           after max_attempts      │    │
//! │  config ───── ConfigError ────────────────────────────────────────┘    │
//! │                                                                         │
//! │                              EngineError ──► ErrorReport {code, message}│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use brew_core::CoreError;
use brew_db::DbError;
use serde::Serialize;
use thiserror::Error;
use ts_rs::TS;

use crate::config::ConfigError;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A business rule refused the operation. Nothing was written.
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Lost-update detection kept firing for every allowed attempt.
    #[error("Concurrent update of {entity} {id} persisted after {attempts} attempt(s)")]
    Conflict {
        entity: String,
        id: String,
        attempts: u32,
    },
}

impl EngineError {
    /// Machine-readable code of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::Core(err) => match err {
                CoreError::InsufficientStock { .. } => ErrorCode::InsufficientStock,
                CoreError::CouponInvalid { .. } => ErrorCode::CouponInvalid,
                CoreError::InsufficientPoints { .. } => ErrorCode::InsufficientPoints,
                CoreError::TierNotMet { .. } => ErrorCode::TierNotMet,
                CoreError::PromotionNotFound(_)
                | CoreError::MemberNotFound(_)
                | CoreError::ProductNotFound(_)
                | CoreError::IngredientNotFound(_)
                | CoreError::RewardNotFound(_) => ErrorCode::NotFound,
                CoreError::MemberInactive(_)
                | CoreError::ProductUnavailable(_)
                | CoreError::RewardUnavailable(_)
                | CoreError::RewardLimitReached { .. }
                | CoreError::EmptyOrder
                | CoreError::Validation(_) => ErrorCode::ValidationError,
            },
            EngineError::Db(err) => match err {
                DbError::NotFound { .. } => ErrorCode::NotFound,
                DbError::UniqueViolation { .. } | DbError::ForeignKeyViolation { .. } => {
                    ErrorCode::ValidationError
                }
                DbError::Conflict { .. } => ErrorCode::Conflict,
                DbError::Internal(_) => ErrorCode::Internal,
                _ => ErrorCode::DatabaseError,
            },
            EngineError::Config(_) => ErrorCode::Internal,
            EngineError::Conflict { .. } => ErrorCode::Conflict,
        }
    }

    /// The domain error, when a business rule refused the operation.
    pub fn as_core(&self) -> Option<&CoreError> {
        match self {
            EngineError::Core(err) => Some(err),
            _ => None,
        }
    }

    /// True for a storage-level conflict that a fresh attempt may clear.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Db(err) if err.is_conflict())
    }
}

/// Error codes for callers.
///
/// ```typescript
/// switch (e.code) {
///   case 'INSUFFICIENT_STOCK': showShortfall(e.message); break;
///   case 'COUPON_INVALID':     clearCoupon(); break;
///   case 'CONFLICT':           retryLater(); break;
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    ValidationError,
    InsufficientStock,
    CouponInvalid,
    InsufficientPoints,
    TierNotMet,
    Conflict,
    DatabaseError,
    Internal,
}

/// What a caller receives when an operation fails.
///
/// ```json
/// { "code": "INSUFFICIENT_STOCK", "message": "Insufficient stock for Whole milk ..." }
/// ```
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&EngineError> for ErrorReport {
    fn from(err: &EngineError) -> Self {
        let code = err.code();
        let message = match code {
            // Storage details stay in the log.
            ErrorCode::DatabaseError | ErrorCode::Internal => {
                tracing::error!(error = %err, "Engine operation failed");
                "Operation failed".to_string()
            }
            _ => err.to_string(),
        };
        ErrorReport { code, message }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
