//! Unified error handling for renderheap
//!
//! This module provides a single error type shared by the state-heap
//! components. Errors are categorized so the owning render context can decide
//! what to do with them:
//! - User errors (bad arguments or configuration, fix the call site)
//! - Recoverable errors (heap exhausted, grow the heap or wait for the GPU)
//! - Internal errors (broken bookkeeping, indicates a bug)

use std::fmt;

use crate::hash_table::HashTableError;

/// Unified error type for renderheap
///
/// Lookup misses are not represented here: `find`/`search` return `Option`.
/// `NotFound` is only produced when an operation is given a handle that does
/// not name a live record.
#[derive(Debug, thiserror::Error)]
pub enum RenderHeapError {
    // ========== Capacity Errors ==========
    /// Heap, pool or hash table cannot satisfy the request and cannot grow
    #[error("Out of space in {what}: requested {requested}, available {available}")]
    OutOfSpace {
        what: &'static str,
        requested: usize,
        available: usize,
    },

    /// Backing host allocation failed
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// Hash index failure
    #[error("Kernel hash table: {0}")]
    HashTable(#[from] HashTableError),

    // ========== Lookup Errors ==========
    /// Handle does not name a live record
    #[error("Not found: {0}")]
    NotFound(String),

    /// Record exists but its memory has been reclaimed
    #[error("Stale entry: kernel ({unique_id}, {cache_id}) must be reloaded")]
    StaleEntry { unique_id: i32, cache_id: i32 },

    // ========== Argument Errors ==========
    /// Precondition violated by the caller
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Operation not allowed in the record's current state
    #[error("Invalid state transition: cannot {action} while {from}")]
    InvalidStateTransition { from: String, action: &'static str },

    // ========== Internal Errors ==========
    /// Internal error (indicates a bug)
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl RenderHeapError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            RenderHeapError::InvalidArgument(_)
            | RenderHeapError::InvalidConfiguration(_)
            | RenderHeapError::InvalidStateTransition { .. }
            | RenderHeapError::NotFound(_) => ErrorCategory::User,

            RenderHeapError::OutOfSpace { .. }
            | RenderHeapError::StaleEntry { .. } => ErrorCategory::Recoverable,

            RenderHeapError::HashTable(err) => match err {
                HashTableError::OutOfSpace { .. } => ErrorCategory::Recoverable,
                HashTableError::InvalidCapacity { .. } => ErrorCategory::User,
                HashTableError::OutOfMemory(_) => ErrorCategory::Internal,
            },

            RenderHeapError::OutOfMemory(_) | RenderHeapError::InternalError(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// Check if this error is recoverable (temporary condition)
    ///
    /// The caller may grow the heap, wait for GPU progress, or reload, and
    /// then retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Recoverable)
    }

    /// Check if this is a caller error
    pub fn is_user_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::User)
    }

    /// Check if this is an internal error (indicates a bug)
    pub fn is_internal_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }

    /// True for any out-of-space condition, including a full hash index
    pub fn is_out_of_space(&self) -> bool {
        matches!(
            self,
            RenderHeapError::OutOfSpace { .. }
                | RenderHeapError::HashTable(HashTableError::OutOfSpace { .. })
        )
    }
}

/// Error category for handling decisions
///
/// - User: fix the call site or configuration
/// - Recoverable: grow, wait or reload, then retry
/// - Internal: log and report as bug
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid input or configuration
    User,
    /// Temporary condition
    Recoverable,
    /// Indicates a bug
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "User"),
            ErrorCategory::Recoverable => write!(f, "Recoverable"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

impl From<std::collections::TryReserveError> for RenderHeapError {
    fn from(err: std::collections::TryReserveError) -> Self {
        RenderHeapError::OutOfMemory(err.to_string())
    }
}

/// Result alias used across the crate
pub type HeapResult<T> = std::result::Result<T, RenderHeapError>;

// ========== Helper Macros ==========

/// Create an invalid-argument error with context
///
/// # Examples
/// ```ignore
/// return Err(invalid_arg!("kernel size must be non-zero"));
/// ```
#[macro_export]
macro_rules! invalid_arg {
    ($msg:expr) => {
        $crate::error::RenderHeapError::InvalidArgument($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::RenderHeapError::InvalidArgument(format!($fmt, $($arg)*))
    };
}

/// Create an internal error with context
///
/// # Examples
/// ```ignore
/// return Err(internal_error!("allocation {} linked into two lists", id));
/// ```
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::error::RenderHeapError::InternalError($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::RenderHeapError::InternalError(format!($fmt, $($arg)*))
    };
}

/// Build an out-of-space error
pub fn out_of_space(what: &'static str, requested: usize, available: usize) -> RenderHeapError {
    RenderHeapError::OutOfSpace {
        what,
        requested,
        available,
    }
}

/// Build a state-transition error from any debuggable state
pub fn bad_transition<S: fmt::Debug>(from: S, action: &'static str) -> RenderHeapError {
    RenderHeapError::InvalidStateTransition {
        from: format!("{:?}", from),
        action,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            RenderHeapError::InvalidArgument("size".to_string()).category(),
            ErrorCategory::User
        );
        assert_eq!(
            out_of_space("kernel heap", 128, 64).category(),
            ErrorCategory::Recoverable
        );
        assert_eq!(
            RenderHeapError::StaleEntry {
                unique_id: 1,
                cache_id: 0
            }
            .category(),
            ErrorCategory::Recoverable
        );
        assert_eq!(
            RenderHeapError::InternalError("test".to_string()).category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn test_hash_table_errors_map_through() {
        let err: RenderHeapError = HashTableError::OutOfSpace { capacity: 4096 }.into();
        assert!(err.is_recoverable());
        assert!(err.is_out_of_space());

        let err: RenderHeapError = HashTableError::InvalidCapacity {
            initial: 1,
            max: 16,
        }
        .into();
        assert!(err.is_user_error());
    }

    #[test]
    fn test_is_out_of_space() {
        assert!(out_of_space("media states", 1, 0).is_out_of_space());
        assert!(!RenderHeapError::NotFound("x".to_string()).is_out_of_space());
    }

    #[test]
    fn test_macros() {
        let err = invalid_arg!("bad size {}", 0);
        assert!(matches!(err, RenderHeapError::InvalidArgument(ref m) if m == "bad size 0"));

        let err = internal_error!("broken");
        assert!(err.is_internal_error());
    }

    #[test]
    fn test_bad_transition_display() {
        #[derive(Debug)]
        enum S {
            Stale,
        }
        let err = bad_transition(S::Stale, "submit");
        assert_eq!(
            err.to_string(),
            "Invalid state transition: cannot submit while Stale"
        );
    }

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::User.to_string(), "User");
        assert_eq!(ErrorCategory::Recoverable.to_string(), "Recoverable");
        assert_eq!(ErrorCategory::Internal.to_string(), "Internal");
    }
}
