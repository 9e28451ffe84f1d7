//! Core value types for Keepsake
//!
//! This module defines the plain data carried through snapshots, diffs and
//! tasks: file and directory descriptors, records naming a snapshot, ignore
//! rules, item-level failures and progress events.
//!
//! The recursive snapshot tree itself lives in [`crate::index`].

use crate::error::{KeepsakeError, Result};
use crate::persist::timestamp;
use bitflags::bitflags;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

bitflags! {
    /// Filesystem attributes tracked for files and directories
    ///
    /// Bit values follow the Windows attribute word so a round trip through
    /// the native API on that platform is lossless. On Unix only `READONLY`,
    /// `HIDDEN` (dot-names) and `DIRECTORY` are ever observed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FileAttributes: u32 {
        /// Read-only entry
        const READONLY = 0x0001;
        /// Hidden entry
        const HIDDEN = 0x0002;
        /// Operating system entry
        const SYSTEM = 0x0004;
        /// Directory
        const DIRECTORY = 0x0010;
        /// Marked for archiving
        const ARCHIVE = 0x0020;
        /// No other attribute set
        const NORMAL = 0x0080;
    }
}

impl Default for FileAttributes {
    fn default() -> Self {
        FileAttributes::NORMAL
    }
}

/// Directory descriptor inside a snapshot
///
/// `full_name` is relative to the snapshot root, e.g. `docs/img`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DirInfo {
    /// Root-relative path of the directory
    pub full_name: PathBuf,
    /// Directory attributes
    pub attributes: FileAttributes,
    /// Creation time
    #[serde(with = "timestamp")]
    pub created: DateTime<Utc>,
}

impl DirInfo {
    /// Create a directory descriptor
    pub fn new(full_name: impl Into<PathBuf>, attributes: FileAttributes, created: DateTime<Utc>) -> Self {
        Self {
            full_name: full_name.into(),
            attributes,
            created,
        }
    }

    /// Last path component, or an empty string for an empty path
    pub fn name(&self) -> &str {
        self.full_name
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

/// File descriptor inside a snapshot
///
/// Everything except `sha1` is fixed once built; the hash starts out unset
/// and is filled in place by [`crate::builder::IndexBuilder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileInfo {
    /// File name (no directory part)
    pub name: String,
    /// File attributes
    pub attributes: FileAttributes,
    /// Creation time
    #[serde(with = "timestamp")]
    pub created: DateTime<Utc>,
    /// Last write time
    #[serde(with = "timestamp")]
    pub modified: DateTime<Utc>,
    /// Size in bytes
    pub size: u64,
    /// Lowercase hex SHA-1 of the content, once computed
    #[serde(rename = "SHA1", default)]
    pub sha1: Option<String>,
}

impl FileInfo {
    /// Create a file descriptor without a content hash
    pub fn new(
        name: impl Into<String>,
        attributes: FileAttributes,
        created: DateTime<Utc>,
        modified: DateTime<Utc>,
        size: u64,
    ) -> Self {
        Self {
            name: name.into(),
            attributes,
            created,
            modified,
            size,
            sha1: None,
        }
    }

    /// Set the content hash
    pub fn set_hash(&mut self, sha1: impl Into<String>) {
        self.sha1 = Some(sha1.into());
    }

    /// Content hash, if computed
    pub fn hash(&self) -> Option<&str> {
        self.sha1.as_deref()
    }
}

/// A named point-in-time snapshot
///
/// Equality and hashing are case-insensitive on `name`; the creation time and
/// comment do not take part.
#[derive(Debug, Clone)]
pub struct RecordInfo {
    name: String,
    created: DateTime<Utc>,
    comment: Option<String>,
}

impl RecordInfo {
    /// Create a record stamped with the current time
    ///
    /// # Errors
    ///
    /// - [`KeepsakeError::InvalidRecordName`] if `name` is not a usable file name
    pub fn new(name: impl Into<String>) -> Result<Self> {
        Self::with_details(name, Utc::now(), None)
    }

    /// Create a record with an explicit creation time and comment
    pub fn with_details(
        name: impl Into<String>,
        created: DateTime<Utc>,
        comment: Option<String>,
    ) -> Result<Self> {
        let name = name.into();
        if !crate::utils::is_valid_file_name(&name) {
            return Err(KeepsakeError::InvalidRecordName(name));
        }
        Ok(Self { name, created, comment })
    }

    /// Record for an unattended backup, named `scheduled backup YYYYMMDD-HHMMSS`
    /// after the local time of `now`
    pub fn scheduled(now: DateTime<Utc>) -> Self {
        let local = now.with_timezone(&Local);
        Self {
            name: format!("scheduled backup {}", local.format("%Y%m%d-%H%M%S")),
            created: now,
            comment: None,
        }
    }

    /// Record name, also the index file name in a versioning repository
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creation time
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Optional free-form comment
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Case-insensitive name comparison
    pub fn is_named(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.to_lowercase()
    }
}

impl PartialEq for RecordInfo {
    fn eq(&self, other: &Self) -> bool {
        self.is_named(&other.name)
    }
}

impl Eq for RecordInfo {}

impl Hash for RecordInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.to_lowercase().hash(state);
    }
}

impl fmt::Display for RecordInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Root-relative paths excluded from snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ignore {
    dirs: Vec<PathBuf>,
    files: Vec<PathBuf>,
}

impl Ignore {
    /// Empty rule set
    pub fn new() -> Self {
        Self::default()
    }

    /// Rule set from explicit lists
    pub fn from_parts(dirs: Vec<PathBuf>, files: Vec<PathBuf>) -> Self {
        Self { dirs, files }
    }

    /// Excluded directories
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Excluded files
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Exclude a directory (no-op if already present)
    pub fn insert_dir(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.dirs.contains(&path) {
            self.dirs.push(path);
        }
    }

    /// Exclude a file (no-op if already present)
    pub fn insert_file(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.files.contains(&path) {
            self.files.push(path);
        }
    }

    /// Stop excluding a directory
    pub fn remove_dir(&mut self, path: &Path) -> bool {
        let before = self.dirs.len();
        self.dirs.retain(|p| p != path);
        before != self.dirs.len()
    }

    /// Stop excluding a file
    pub fn remove_file(&mut self, path: &Path) -> bool {
        let before = self.files.len();
        self.files.retain(|p| p != path);
        before != self.files.len()
    }

    /// Whether both lists are empty
    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty() && self.files.is_empty()
    }

    /// Whether the absolute path `path` under `root` is an excluded directory
    pub fn ignores_dir(&self, root: &Path, path: &Path) -> bool {
        self.dirs.iter().any(|d| root.join(d) == path)
    }

    /// Whether the absolute path `path` under `root` is an excluded file
    pub fn ignores_file(&self, root: &Path, path: &Path) -> bool {
        self.files.iter().any(|f| root.join(f) == path)
    }
}

/// Kind of filesystem entry an [`ExceptionInfo`] refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file
    File,
    /// Directory
    Dir,
    /// Could not be determined
    Unknown,
}

/// An item-level failure collected while a task keeps running
#[derive(Debug)]
pub struct ExceptionInfo {
    /// Path the failure refers to
    pub path: PathBuf,
    /// What kind of entry it was
    pub file_type: FileType,
    /// Underlying error
    pub error: KeepsakeError,
}

impl ExceptionInfo {
    /// Create a new exception record
    pub fn new(path: impl Into<PathBuf>, file_type: FileType, error: impl Into<KeepsakeError>) -> Self {
        Self {
            path: path.into(),
            file_type,
            error: error.into(),
        }
    }

    /// Failure on a file
    pub fn file(path: impl Into<PathBuf>, error: impl Into<KeepsakeError>) -> Self {
        Self::new(path, FileType::File, error)
    }

    /// Failure on a directory
    pub fn dir(path: impl Into<PathBuf>, error: impl Into<KeepsakeError>) -> Self {
        Self::new(path, FileType::Dir, error)
    }
}

impl fmt::Display for ExceptionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({:?}): {}", self.path, self.file_type, self.error)
    }
}

bitflags! {
    /// Outcome of comparing two entries
    ///
    /// `SAME` is the empty set; the other flags may be combined.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ComparedResult: u8 {
        /// Identical
        const SAME = 0;
        /// Only attributes differ
        const ATTR_DIFF = 0b01;
        /// Content identity differs
        const CONTENT_DIFF = 0b10;
    }
}

impl ComparedResult {
    /// Whether the entries count as equal, optionally tolerating attribute changes
    pub fn is_match(self, consider_attr: bool) -> bool {
        if consider_attr {
            self.is_empty()
        } else {
            !self.contains(ComparedResult::CONTENT_DIFF)
        }
    }
}

/// Progress notification emitted by tasks and hashing
///
/// A task emits one indeterminate event first, then determinate events with
/// a non-decreasing `completed`, then exactly one event with
/// `is_progressing == false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Whether `total`/`completed` are meaningful
    pub is_determinate: bool,
    /// Units of work in total
    pub total: usize,
    /// Units of work done so far
    pub completed: usize,
    /// False only for the final event
    pub is_progressing: bool,
}

impl ProgressEvent {
    /// Work has started but its size is not known yet
    pub fn indeterminate() -> Self {
        Self {
            is_determinate: false,
            total: 0,
            completed: 0,
            is_progressing: true,
        }
    }

    /// Measured progress
    pub fn determinate(total: usize, completed: usize, is_progressing: bool) -> Self {
        Self {
            is_determinate: true,
            total,
            completed,
            is_progressing,
        }
    }

    /// Get progress as a percentage (0-100)
    pub fn percentage(&self) -> Option<f32> {
        match (self.is_determinate, self.total) {
            (true, total) if total > 0 => Some((self.completed as f32 / total as f32) * 100.0),
            _ => None,
        }
    }
}

/// Progress callback for long-running operations
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Repository options
///
/// ```rust
/// use keepsake::BackupOptions;
///
/// let options = BackupOptions::default()
///     .with_cache_mode(true)
///     .with_check_hash(true)
///     .with_parallel_workers(4);
/// assert!(options.check_hash);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupOptions {
    /// Keep records, indexes, ignore rules and blob hashes in memory between reads
    pub cache_mode: bool,
    /// Compare files by content hash in addition to name, size and mtime
    pub check_hash: bool,
    /// Upper bound on hashing and index-loading threads
    pub parallel_workers: usize,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            cache_mode: false,
            check_hash: false,
            parallel_workers: default_parallel_workers(),
        }
    }
}

impl BackupOptions {
    /// Set cache mode
    pub fn with_cache_mode(mut self, cache_mode: bool) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    /// Select the hash-checking file comparer
    pub fn with_check_hash(mut self, check_hash: bool) -> Self {
        self.check_hash = check_hash;
        self
    }

    /// Bound the worker pools (at least one thread)
    pub fn with_parallel_workers(mut self, workers: usize) -> Self {
        self.parallel_workers = workers.max(1);
        self
    }
}

/// Half the logical cores plus one
pub fn default_parallel_workers() -> usize {
    num_cpus::get() / 2 + 1
}
