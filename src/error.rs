//! Unified error hierarchy for liftrs
//!
//! Every fallible operation in the engine returns [`LiftError`]. The enum keeps
//! enough structure to classify a failure into the service's error taxonomy
//! (validation, auth, not-found, conflict, transient or fatal store faults) and
//! to pick a log level for it.

use crate::database::DatabaseError;
use thiserror::Error;

/// Top-level error type for all liftrs operations
#[derive(Debug, Error)]
pub enum LiftError {
    /// Malformed or out-of-range input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing, malformed or expired credentials
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Authenticated, but the resource belongs to someone else
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Entity does not exist or is not owned by the caller
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Store errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for liftrs operations
pub type Result<T> = std::result::Result<T, LiftError>;

/// Error taxonomy exposed to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Auth,
    Forbidden,
    NotFound,
    Conflict,
    TransientStore,
    FatalStore,
    Internal,
}

impl ErrorKind {
    /// Stable machine-readable code used in response bodies
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Auth => "AUTH_ERROR",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::TransientStore => "STORE_UNAVAILABLE",
            ErrorKind::FatalStore => "STORE_ERROR",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }

    /// HTTP status code for this kind
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Auth => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::TransientStore => 503,
            ErrorKind::FatalStore | ErrorKind::Internal => 500,
        }
    }
}

impl LiftError {
    /// Shorthand for a validation failure
    pub fn validation(message: impl Into<String>) -> Self {
        LiftError::Validation(message.into())
    }

    /// Classify the error into the client-facing taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            LiftError::Validation(_) => ErrorKind::Validation,
            LiftError::Auth(_) => ErrorKind::Auth,
            LiftError::Forbidden(_) => ErrorKind::Forbidden,
            LiftError::NotFound { .. } => ErrorKind::NotFound,
            LiftError::Database(db) => {
                if db.is_transient() {
                    ErrorKind::TransientStore
                } else if db.is_constraint_violation() {
                    ErrorKind::Conflict
                } else if matches!(db, DatabaseError::NotFound(_)) {
                    ErrorKind::NotFound
                } else {
                    ErrorKind::FatalStore
                }
            }
            LiftError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientStore
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::Conflict => {
                ErrorSeverity::Warning
            }
            ErrorKind::Auth | ErrorKind::Forbidden => ErrorSeverity::Info,
            ErrorKind::TransientStore => ErrorSeverity::Error,
            ErrorKind::FatalStore | ErrorKind::Internal => ErrorSeverity::Critical,
        }
    }

    /// Message that is safe to hand back to a client
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::TransientStore => {
                "The database is temporarily unavailable. Please retry.".to_string()
            }
            ErrorKind::FatalStore | ErrorKind::Internal => {
                "An internal error occurred.".to_string()
            }
            ErrorKind::Conflict => "The request conflicts with existing data.".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Invariant breach or unexpected fault
    Critical,
    /// Operation failed, service continues
    Error,
    /// Caller error
    Warning,
    /// Expected rejection
    Info,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;

    fn sqlite_failure(code: ffi::ErrorCode) -> LiftError {
        let extended = match code {
            ffi::ErrorCode::DatabaseBusy => ffi::SQLITE_BUSY,
            ffi::ErrorCode::ConstraintViolation => ffi::SQLITE_CONSTRAINT,
            _ => ffi::SQLITE_ERROR,
        };
        LiftError::Database(DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(
            ffi::Error {
                code,
                extended_code: extended,
            },
            None,
        )))
    }

    #[test]
    fn test_store_error_classification() {
        let busy = sqlite_failure(ffi::ErrorCode::DatabaseBusy);
        assert_eq!(busy.kind(), ErrorKind::TransientStore);
        assert!(busy.is_retryable());
        assert_eq!(busy.kind().status_code(), 503);

        let unique = sqlite_failure(ffi::ErrorCode::ConstraintViolation);
        assert_eq!(unique.kind(), ErrorKind::Conflict);
        assert_eq!(unique.kind().status_code(), 409);
        assert_eq!(unique.user_message(), "The request conflicts with existing data.");

        let other = sqlite_failure(ffi::ErrorCode::Unknown);
        assert_eq!(other.kind(), ErrorKind::FatalStore);
        assert_eq!(other.severity(), ErrorSeverity::Critical);
    }

    #[test]
    fn test_caller_errors() {
        let err = LiftError::NotFound {
            entity: "exercise",
            id: 7,
        };
        assert_eq!(err.kind().status_code(), 404);
        assert_eq!(err.to_string(), "exercise 7 not found");
        assert_eq!(err.severity(), ErrorSeverity::Warning);

        let err = LiftError::validation("reps must be >= 0");
        assert!(!err.is_retryable());
        assert_eq!(err.kind().code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_internal_detail_is_hidden() {
        let err = LiftError::Internal("mutex poisoned at line 42".to_string());
        assert!(!err.user_message().contains("mutex"));
        assert_eq!(err.severity(), ErrorSeverity::Critical);
    }
}
