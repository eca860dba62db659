//! Execution error types
//!
//! Error codes:
//! - AERO_BAD_FIRST / AERO_BAD_SKIP (ERROR)
//! - AERO_PROCEDURE_NOT_DEFINED / AERO_PROCEDURE_NOT_IMPLEMENTED (ERROR)
//! - AERO_LOCK_NOT_SUPPORTED (ERROR)
//! - AERO_LOCK_CONFLICT (ERROR, retryable)
//! - AERO_INDEX_INACTIVE / AERO_INDEX_UNKNOWN (ERROR)
//! - AERO_REQUEST_CANCELLED (ERROR)
//! - AERO_PAGE_CORRUPTION (FATAL)
//! - AERO_EVALUATION_FAILED (ERROR)
//! - AERO_EXECUTION_FAILED (ERROR)
//! - AERO_CONFIG_INVALID (ERROR)
//!
//! A stale cursor after a concurrent page split is not an error: the index
//! scan recovers from it internally and never surfaces it.

use std::fmt;

use crate::page::PageError;
use crate::storage::StorageError;

/// Severity levels for execution errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The statement fails, the engine is healthy
    Error,
    /// On-disk structures are damaged
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Execution error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecErrorCode {
    /// FIRST evaluated to a negative value
    AeroBadFirst,
    /// SKIP evaluated to a negative value
    AeroBadSkip,
    /// Procedure is only a forward declaration
    AeroProcedureNotDefined,
    /// Procedure has no body
    AeroProcedureNotImplemented,
    /// Row lock requested through a stream without writable rows
    AeroLockNotSupported,
    /// Row lock conflicts with a concurrent transaction
    AeroLockConflict,
    /// Index became inactive while the plan was compiled against it
    AeroIndexInactive,
    /// Index no longer exists
    AeroIndexUnknown,
    /// Request was cancelled and observed it at a yield point
    AeroRequestCancelled,
    /// Index page failed validation
    AeroPageCorruption,
    /// Expression evaluation failed
    AeroEvaluationFailed,
    /// Collaborator or internal failure
    AeroExecutionFailed,
    /// Configuration rejected
    AeroConfigInvalid,
}

impl ExecErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            ExecErrorCode::AeroBadFirst => "AERO_BAD_FIRST",
            ExecErrorCode::AeroBadSkip => "AERO_BAD_SKIP",
            ExecErrorCode::AeroProcedureNotDefined => "AERO_PROCEDURE_NOT_DEFINED",
            ExecErrorCode::AeroProcedureNotImplemented => "AERO_PROCEDURE_NOT_IMPLEMENTED",
            ExecErrorCode::AeroLockNotSupported => "AERO_LOCK_NOT_SUPPORTED",
            ExecErrorCode::AeroLockConflict => "AERO_LOCK_CONFLICT",
            ExecErrorCode::AeroIndexInactive => "AERO_INDEX_INACTIVE",
            ExecErrorCode::AeroIndexUnknown => "AERO_INDEX_UNKNOWN",
            ExecErrorCode::AeroRequestCancelled => "AERO_REQUEST_CANCELLED",
            ExecErrorCode::AeroPageCorruption => "AERO_PAGE_CORRUPTION",
            ExecErrorCode::AeroEvaluationFailed => "AERO_EVALUATION_FAILED",
            ExecErrorCode::AeroExecutionFailed => "AERO_EXECUTION_FAILED",
            ExecErrorCode::AeroConfigInvalid => "AERO_CONFIG_INVALID",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            ExecErrorCode::AeroPageCorruption => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    /// Returns whether re-running the statement may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecErrorCode::AeroLockConflict)
    }
}

impl fmt::Display for ExecErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Execution error with full context
#[derive(Debug)]
pub struct ExecError {
    code: ExecErrorCode,
    message: String,
}

impl ExecError {
    fn new(code: ExecErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// FIRST value below zero
    pub fn bad_first(value: i64) -> Self {
        Self::new(
            ExecErrorCode::AeroBadFirst,
            format!("Invalid FIRST value: {}", value),
        )
    }

    /// SKIP value below zero
    pub fn bad_skip(value: i64) -> Self {
        Self::new(
            ExecErrorCode::AeroBadSkip,
            format!("Invalid SKIP value: {}", value),
        )
    }

    /// Procedure declared but never defined
    pub fn procedure_not_defined(name: &str) -> Self {
        Self::new(
            ExecErrorCode::AeroProcedureNotDefined,
            format!("Procedure {} is not defined", name),
        )
    }

    /// Procedure without a body
    pub fn procedure_not_implemented(name: &str) -> Self {
        Self::new(
            ExecErrorCode::AeroProcedureNotImplemented,
            format!("Procedure {} is not implemented", name),
        )
    }

    /// Lock requested through a stream that does not own rows
    pub fn lock_not_supported(source: &str) -> Self {
        Self::new(
            ExecErrorCode::AeroLockNotSupported,
            format!("Row locking is not supported for {}", source),
        )
    }

    /// Lock conflicts with another transaction
    pub fn lock_conflict(reason: impl Into<String>) -> Self {
        Self::new(ExecErrorCode::AeroLockConflict, reason)
    }

    /// Index became inactive
    pub fn index_inactive(name: &str) -> Self {
        Self::new(
            ExecErrorCode::AeroIndexInactive,
            format!("Index {} is inactive", name),
        )
    }

    /// Index no longer known to the catalog
    pub fn index_unknown(name: &str) -> Self {
        Self::new(
            ExecErrorCode::AeroIndexUnknown,
            format!("Index {} is unknown", name),
        )
    }

    /// Cancellation observed at a yield point
    pub fn cancelled() -> Self {
        Self::new(
            ExecErrorCode::AeroRequestCancelled,
            "Request was cancelled",
        )
    }

    /// Index page failed validation (FATAL)
    pub fn page_corruption(reason: impl Into<String>) -> Self {
        Self::new(ExecErrorCode::AeroPageCorruption, reason)
    }

    /// Expression evaluation failed
    pub fn evaluation_failed(reason: impl Into<String>) -> Self {
        Self::new(ExecErrorCode::AeroEvaluationFailed, reason)
    }

    /// Generic execution failure
    pub fn execution_failed(reason: impl Into<String>) -> Self {
        Self::new(ExecErrorCode::AeroExecutionFailed, reason)
    }

    /// Configuration rejected
    pub fn config_invalid(reason: impl Into<String>) -> Self {
        Self::new(ExecErrorCode::AeroConfigInvalid, reason)
    }

    /// Returns the error code
    pub fn code(&self) -> ExecErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns whether this is a fatal error
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Returns whether re-running the statement may succeed
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )
    }
}

impl std::error::Error for ExecError {}

impl From<PageError> for ExecError {
    fn from(err: PageError) -> Self {
        match err {
            PageError::NotFound(_) => ExecError::execution_failed(err.to_string()),
            _ => ExecError::page_corruption(err.to_string()),
        }
    }
}

impl From<StorageError> for ExecError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::LockConflict { .. } => ExecError::lock_conflict(err.to_string()),
            _ => ExecError::execution_failed(err.to_string()),
        }
    }
}

/// Result type for execution operations
pub type ExecResult<T> = Result<T, ExecError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageId;

    #[test]
    fn test_error_codes() {
        assert_eq!(ExecErrorCode::AeroBadFirst.code(), "AERO_BAD_FIRST");
        assert_eq!(ExecErrorCode::AeroBadSkip.code(), "AERO_BAD_SKIP");
        assert_eq!(
            ExecErrorCode::AeroLockNotSupported.code(),
            "AERO_LOCK_NOT_SUPPORTED"
        );
    }

    #[test]
    fn test_only_corruption_is_fatal() {
        assert!(ExecError::page_corruption("bad crc").is_fatal());
        assert!(!ExecError::bad_first(-1).is_fatal());
        assert!(!ExecError::index_inactive("IDX").is_fatal());
    }

    #[test]
    fn test_retryable() {
        assert!(ExecError::lock_conflict("held by tx 9").is_retryable());
        assert!(!ExecError::bad_skip(-3).is_retryable());
        assert!(!ExecError::procedure_not_defined("P").is_retryable());
    }

    #[test]
    fn test_page_error_conversion() {
        let err: ExecError = PageError::ChecksumMismatch(PageId(4)).into();
        assert_eq!(err.code(), ExecErrorCode::AeroPageCorruption);

        let err: ExecError = PageError::NotFound(PageId(9)).into();
        assert_eq!(err.code(), ExecErrorCode::AeroExecutionFailed);
    }

    #[test]
    fn test_storage_error_conversion() {
        let err: ExecError = StorageError::LockConflict {
            record: crate::storage::RecordId(3),
            holder: 2,
        }
        .into();
        assert!(err.is_retryable());

        let err: ExecError = StorageError::UnknownRelation(1).into();
        assert_eq!(err.code(), ExecErrorCode::AeroExecutionFailed);
    }

    #[test]
    fn test_error_display() {
        let display = format!("{}", ExecError::bad_first(-1));
        assert!(display.contains("AERO_BAD_FIRST"));
        assert!(display.contains("ERROR"));
        assert!(display.contains("-1"));
    }
}
