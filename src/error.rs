//! Error types for the Keepsake library
//!
//! Keepsake distinguishes two tiers of failure. Item-level problems (a file
//! that cannot be read, a directory that cannot be created) never surface as
//! a [`KeepsakeError`] from a task; they are wrapped in an
//! [`ExceptionInfo`](crate::types::ExceptionInfo) and handed back once the
//! task finishes. Everything in this module that is returned through
//! `Err(..)` is fatal: the task stops and nothing new is persisted.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the Keepsake library
pub type Result<T> = std::result::Result<T, KeepsakeError>;

/// Main error type for all Keepsake operations
#[derive(Debug, Error)]
pub enum KeepsakeError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Path or file name that is not valid UTF-8
    #[error("Path conversion error: {0:?}")]
    PathConversion(std::ffi::OsString),

    /// Record not present in the repository
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// A record with the same (case-insensitive) name already exists
    #[error("Record already exists: {0}")]
    DuplicateRecord(String),

    /// Record exists but its index file is missing
    #[error("Index file not found for record {record}: {path:?}")]
    IndexNotFound {
        /// Record name
        record: String,
        /// Expected index path
        path: PathBuf,
    },

    /// A file entry that must carry a content hash does not
    #[error("Hash code not found: {0:?}")]
    MissingHash(PathBuf),

    /// Two snapshot entries that should describe the same file disagree
    #[error("Inconsistency between snapshots: {0}")]
    Inconsistency(String),

    /// On-disk repository layout or metadata is invalid
    #[error("Repository is broken: {0}")]
    BrokenRepository(String),

    /// Target of `create` already contains something
    #[error("Directory is not empty: {0:?}")]
    RepositoryNotEmpty(PathBuf),

    /// Name that cannot be used as a record name
    #[error("Invalid record name: {0:?}")]
    InvalidRecordName(String),

    /// One-shot task executed a second time
    #[error("Task already completed")]
    TaskAlreadyCompleted,

    /// Queued task id unknown to the queue
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Caller supplied an argument the operation cannot accept
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Thread pool error
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rayon::ThreadPoolBuildError> for KeepsakeError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        KeepsakeError::ThreadPool(err.to_string())
    }
}

impl KeepsakeError {
    /// Create a broken-repository error with a custom message
    pub fn broken(msg: impl Into<String>) -> Self {
        KeepsakeError::BrokenRepository(msg.into())
    }

    /// Create an invalid-argument error with a custom message
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        KeepsakeError::InvalidArgument(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        KeepsakeError::Internal(msg.into())
    }

    /// Check if this error means the repository itself cannot be trusted
    pub fn is_broken_repository(&self) -> bool {
        matches!(
            self,
            KeepsakeError::BrokenRepository(_)
                | KeepsakeError::IndexNotFound { .. }
                | KeepsakeError::MissingHash(_)
                | KeepsakeError::Inconsistency(_)
        )
    }

    /// Check if this error stems from how the API was called
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            KeepsakeError::TaskAlreadyCompleted
                | KeepsakeError::DuplicateRecord(_)
                | KeepsakeError::RecordNotFound(_)
                | KeepsakeError::InvalidRecordName(_)
                | KeepsakeError::InvalidArgument(_)
                | KeepsakeError::RepositoryNotEmpty(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            KeepsakeError::RecordNotFound(name) => {
                format!("Record '{}' not found. List the repository records to see which ones exist.", name)
            }
            KeepsakeError::DuplicateRecord(name) => {
                format!("A record named '{}' already exists. Record names are case-insensitive; choose another name.", name)
            }
            KeepsakeError::RepositoryNotEmpty(path) => {
                format!("{:?} is not empty. A new repository must be created in an empty or missing directory.", path)
            }
            KeepsakeError::InvalidRecordName(name) => {
                format!("'{}' cannot be used as a record name. Use a valid file name without surrounding spaces.", name)
            }
            err if err.is_broken_repository() => {
                format!("{} The repository metadata does not match its content and should be inspected.", err)
            }
            _ => self.to_string(),
        }
    }
}
