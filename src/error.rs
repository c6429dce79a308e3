use serde_json::{json, Value};
use thiserror::Error;

/// Failures surfaced by the rule engine and its persistence layer.
///
/// Each variant maps to a stable wire code so the IPC layer can report it
/// without inspecting messages.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Field-level rejection; nothing was written.
    #[error("{message}")]
    Validation { field: String, message: String },

    /// A score outside [0, 100] or with more than two decimals.
    #[error("{field} must be a number within 0..=100 with at most two decimals")]
    Range { field: String, value: Value },

    #[error("{entity} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Conflict(String),

    /// Section placement refused (grade mismatch or capacity reached).
    #[error("{0}")]
    Placement(String),

    #[error("{0}")]
    InUse(String),

    #[error("{0}")]
    StatusLocked(String),

    #[error("corrupt stored data: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Db(#[from] rusqlite::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn range(field: &str, value: Value) -> Self {
        Self::Range {
            field: field.to_string(),
            value,
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Turn a unique-constraint failure into a `Conflict`; pass anything else through.
    pub fn on_insert(e: rusqlite::Error, what: &str) -> Self {
        if is_constraint_violation(&e) {
            Self::Conflict(format!("{} already exists", what))
        } else {
            Self::Db(e)
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_failed",
            Self::Range { .. } => "out_of_range",
            Self::NotFound { .. } => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Placement(_) => "placement_refused",
            Self::InUse(_) => "in_use",
            Self::StatusLocked(_) => "status_locked",
            Self::Corrupt(_) => "corrupt_data",
            Self::Db(
                rusqlite::Error::FromSqlConversionFailure(..)
                | rusqlite::Error::IntegralValueOutOfRange(..),
            ) => "corrupt_data",
            Self::Db(_) => "db_query_failed",
            Self::Internal(_) => "internal",
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            Self::Validation { field, .. } => Some(json!({ "field": field })),
            Self::Range { field, value } => Some(json!({ "field": field, "value": value })),
            Self::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
            _ => None,
        }
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
