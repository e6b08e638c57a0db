use serde_json::{json, Value};
use thiserror::Error;

/// Failures surfaced by the attendance engine. Each variant maps onto a
/// stable wire code via [`EngineError::code`] so handlers can reply without
/// inspecting variants themselves.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    InvalidInput(String),

    #[error("attendance for class {class_id} on {date} is finalized and locked")]
    SessionLocked { class_id: String, date: String },

    #[error("{count} roster student(s) have no attendance record", count = .missing.len())]
    IncompleteRoster { missing: Vec<String> },

    #[error("session changed since it was read: expected version {expected}, found {actual}")]
    ConcurrentModification { expected: i64, actual: i64 },

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        EngineError::InvalidInput(message.into())
    }

    /// Wire error code for the sidecar protocol.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "not_found",
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::SessionLocked { .. } => "session_locked",
            EngineError::IncompleteRoster { .. } => "incomplete_roster",
            EngineError::ConcurrentModification { .. } => "concurrent_modification",
            EngineError::Db(_) => "db_failed",
        }
    }

    /// Structured details attached to the wire error, where the variant
    /// carries more than its message.
    pub fn details(&self) -> Option<Value> {
        match self {
            EngineError::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
            EngineError::SessionLocked { class_id, date } => {
                Some(json!({ "classId": class_id, "date": date }))
            }
            EngineError::IncompleteRoster { missing } => {
                Some(json!({ "missingStudentIds": missing }))
            }
            EngineError::ConcurrentModification { expected, actual } => {
                Some(json!({ "expectedVersion": expected, "actualVersion": actual }))
            }
            _ => None,
        }
    }
}
