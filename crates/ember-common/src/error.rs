//! Error types for EmberDB.

use crate::page::{FileId, PageKey};
use thiserror::Error;

/// Result type alias using EmberError.
pub type Result<T> = std::result::Result<T, EmberError>;

/// Errors that can occur in EmberDB operations.
#[derive(Debug, Error)]
pub enum EmberError {
    // Resource errors
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Page of {size} bytes cannot fit in a cache of {cache_max} bytes")]
    PageTooLarge { size: u64, cache_max: u64 },

    // Argument errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    #[error("Unknown file: {file_id}")]
    UnknownFile { file_id: FileId },

    #[error("Database {file_id} is not open (state: {state})")]
    HandleNotOpen { file_id: FileId, state: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Flush of page {page} failed: {reason}")]
    FlushFailed { page: PageKey, reason: String },

    #[error("Page corrupted: {page}, reason: {reason}")]
    PageCorrupted { page: PageKey, reason: String },

    // Queue errors
    #[error("Worker {worker} queue is full")]
    Busy { worker: usize },

    #[error("Environment is shutting down")]
    ShuttingDown,

    // Record errors
    #[error("Page full, unable to store record on page {page}")]
    PageFull { page: PageKey },

    #[error("Record too large: {size} bytes (max {max})")]
    RecordTooLarge { size: usize, max: usize },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error classification exposed to callers that branch on status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Allocation failed, or a page cannot fit the cache budget.
    ResourceExhausted,
    /// Malformed configuration or an unknown file or handle.
    InvalidArgument,
    /// Backing-file read or write failed.
    Io,
    /// The target queue was full, or the environment is stopping.
    Busy,
    /// Broken internal invariant.
    Internal,
}

impl EmberError {
    /// Returns the status class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EmberError::ResourceExhausted(_) | EmberError::PageTooLarge { .. } => {
                ErrorKind::ResourceExhausted
            }
            EmberError::InvalidArgument(_)
            | EmberError::InvalidParameter { .. }
            | EmberError::UnknownFile { .. }
            | EmberError::HandleNotOpen { .. }
            | EmberError::PageFull { .. }
            | EmberError::RecordTooLarge { .. } => ErrorKind::InvalidArgument,
            EmberError::Io(_)
            | EmberError::IoError(_)
            | EmberError::FlushFailed { .. }
            | EmberError::PageCorrupted { .. } => ErrorKind::Io,
            EmberError::Busy { .. } | EmberError::ShuttingDown => ErrorKind::Busy,
            EmberError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if the error is an I/O failure.
    pub fn is_io(&self) -> bool {
        self.kind() == ErrorKind::Io
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind as IoErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(IoErrorKind::NotFound, "file not found");
        let err: EmberError = io_err.into();
        assert!(matches!(err, EmberError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
        assert!(err.is_io());
    }

    #[test]
    fn test_page_too_large_display() {
        let err = EmberError::PageTooLarge {
            size: 200,
            cache_max: 100,
        };
        assert_eq!(
            err.to_string(),
            "Page of 200 bytes cannot fit in a cache of 100 bytes"
        );
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    }

    #[test]
    fn test_flush_failed_display() {
        let err = EmberError::FlushFailed {
            page: PageKey::new(FileId(3), 7),
            reason: "disk full".to_string(),
        };
        assert_eq!(err.to_string(), "Flush of page 3:7 failed: disk full");
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_busy_display() {
        let err = EmberError::Busy { worker: 2 };
        assert_eq!(err.to_string(), "Worker 2 queue is full");
        assert_eq!(err.kind(), ErrorKind::Busy);
        assert_eq!(EmberError::ShuttingDown.kind(), ErrorKind::Busy);
    }

    #[test]
    fn test_invalid_argument_kinds() {
        let errors = [
            EmberError::InvalidArgument("bad".to_string()),
            EmberError::InvalidParameter {
                name: "workers".to_string(),
                value: "0".to_string(),
            },
            EmberError::UnknownFile { file_id: FileId(9) },
            EmberError::HandleNotOpen {
                file_id: FileId(9),
                state: "Closing".to_string(),
            },
        ];
        for err in errors {
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
    }

    #[test]
    fn test_invalid_parameter_display() {
        let err = EmberError::InvalidParameter {
            name: "hashsize".to_string(),
            value: "0".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid parameter: hashsize = 0");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EmberError>();
    }
}
