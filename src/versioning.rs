//! Versioning repositories
//!
//! Every backup becomes a named record with its own index under `index/`.
//! File contents live once in the blob store no matter how many records or
//! paths refer to them.

use crate::collections::{map_with_capacity, HashMap, HashSet};
use crate::comparer::{DirComparer, FileComparer};
use crate::error::{KeepsakeError, Result};
use crate::index::Index;
use crate::persist;
use crate::repository::{Backup, RepoCore, RepoKind, RestoreTarget, BLOB_DIR, INDEX_NAME, RECORD_FILE};
use crate::storage::BlobStore;
use crate::task::{Task, VersioningBackupTask, VersioningRemoveTask, VersioningRestoreTask};
use crate::types::{BackupOptions, Ignore, RecordInfo};
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// Handle to a versioning repository
///
/// Cloning is cheap; clones share caches and comparers.
///
/// # Example
///
/// ```rust,no_run
/// use keepsake::{BackupOptions, RecordInfo, Task, VersioningBackup};
///
/// # fn main() -> keepsake::Result<()> {
/// let repo = VersioningBackup::open("/backups/projects", BackupOptions::default())?;
/// repo.backup_task("/home/me/projects", RecordInfo::new("before-upgrade")?)
///     .execute()?;
///
/// for record in repo.records()? {
///     let index = repo.index_of(&record)?;
///     println!("{}: {} files", record, index.file_count());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct VersioningBackup {
    inner: Arc<VersioningInner>,
}

#[derive(Debug)]
struct VersioningInner {
    core: RepoCore,
    records_cache: RwLock<Option<Vec<RecordInfo>>>,
    // Keyed by lowercased record name
    index_cache: RwLock<HashMap<String, Index>>,
    blob_cache: RwLock<Option<HashSet<String>>>,
}

impl VersioningBackup {
    /// Create a new repository in a missing or empty directory
    ///
    /// # Errors
    ///
    /// - [`KeepsakeError::RepositoryNotEmpty`] if `path` already holds files
    #[instrument(skip_all)]
    pub fn create(path: impl AsRef<Path>, options: BackupOptions) -> Result<Self> {
        let path = path.as_ref();
        RepoCore::prepare_new(path)?;
        fs::create_dir(path.join(BLOB_DIR))?;
        fs::create_dir(path.join(INDEX_NAME))?;
        persist::write_records(&path.join(RECORD_FILE), &[])?;
        Ok(Self::with_core(RepoCore::new(path.to_path_buf(), options)))
    }

    /// Open an existing repository
    ///
    /// # Errors
    ///
    /// - [`KeepsakeError::BrokenRepository`] if `blob/`, `index/` or `record` is missing
    #[instrument(skip_all)]
    pub fn open(path: impl AsRef<Path>, options: BackupOptions) -> Result<Self> {
        let path = path.as_ref();
        RepoCore::check_existing(path, &[BLOB_DIR, INDEX_NAME], &[RECORD_FILE])?;
        Ok(Self::with_core(RepoCore::new(path.to_path_buf(), options)))
    }

    fn with_core(core: RepoCore) -> Self {
        Self {
            inner: Arc::new(VersioningInner {
                core,
                records_cache: RwLock::new(None),
                index_cache: RwLock::new(map_with_capacity(0)),
                blob_cache: RwLock::new(None),
            }),
        }
    }

    /// Repository directory
    pub fn path(&self) -> &Path {
        self.inner.core.path()
    }

    /// Blob directory
    pub fn blob_path(&self) -> PathBuf {
        self.path().join(BLOB_DIR)
    }

    /// Directory of per-record indexes
    pub fn index_dir(&self) -> PathBuf {
        self.path().join(INDEX_NAME)
    }

    /// Index file of a record, whether or not it exists
    pub fn index_path_of(&self, record: &RecordInfo) -> PathBuf {
        self.index_dir().join(record.name())
    }

    /// Record file
    pub fn record_path(&self) -> PathBuf {
        self.inner.core.record_path()
    }

    /// Blob store of this repository
    pub fn blob_store(&self) -> BlobStore {
        BlobStore::new(self.blob_path())
    }

    /// Records, oldest first
    pub fn records(&self) -> Result<Vec<RecordInfo>> {
        if let Some(records) = self.inner.records_cache.read().as_ref() {
            return Ok(records.clone());
        }
        let records = persist::read_records(&self.record_path())?.unwrap_or_default();
        if self.cache_mode() {
            *self.inner.records_cache.write() = Some(records.clone());
        }
        Ok(records)
    }

    /// Stored record with the given name, ignoring case
    pub fn find_record(&self, name: &str) -> Result<Option<RecordInfo>> {
        Ok(self.records()?.into_iter().find(|r| r.is_named(name)))
    }

    /// Most recent record
    pub fn latest_record(&self) -> Result<Option<RecordInfo>> {
        Ok(self.records()?.pop())
    }

    /// Snapshot stored for `record`
    ///
    /// Safe to call from several threads at once.
    ///
    /// # Errors
    ///
    /// - [`KeepsakeError::RecordNotFound`] if the repository has no such record
    /// - [`KeepsakeError::IndexNotFound`] if the record's index file is missing
    /// - [`KeepsakeError::BrokenRepository`] if the index file is empty
    pub fn index_of(&self, record: &RecordInfo) -> Result<Index> {
        let key = record.name().to_lowercase();
        if let Some(index) = self.inner.index_cache.read().get(&key) {
            return Ok(index.clone());
        }

        let stored = self
            .find_record(record.name())?
            .ok_or_else(|| KeepsakeError::RecordNotFound(record.name().to_string()))?;
        let path = self.index_path_of(&stored);
        if !path.is_file() {
            return Err(KeepsakeError::IndexNotFound {
                record: stored.name().to_string(),
                path,
            });
        }
        let index = persist::read_index(&path)?
            .ok_or_else(|| KeepsakeError::broken(format!("index of record {:?} is empty", stored.name())))?;
        trace!("Loaded index of {} with {} files", stored, index.file_count());

        if self.cache_mode() {
            self.inner.index_cache.write().insert(key, index.clone());
        }
        Ok(index)
    }

    /// Hashes of every stored blob
    pub fn blob_hashes(&self) -> Result<HashSet<String>> {
        if let Some(hashes) = self.inner.blob_cache.read().as_ref() {
            return Ok(hashes.clone());
        }
        let hashes: HashSet<String> = self.blob_store().hashes()?.into_iter().collect();
        if self.cache_mode() {
            *self.inner.blob_cache.write() = Some(hashes.clone());
        }
        Ok(hashes)
    }

    /// Names of the blob prefix directories
    pub fn blob_prefixes(&self) -> Result<Vec<String>> {
        self.blob_store().prefixes()
    }

    /// Ignore rules
    pub fn ignore(&self) -> Result<Ignore> {
        self.inner.core.ignore()
    }

    /// Replace the ignore rules
    pub fn set_ignore(&self, ignore: &Ignore) -> Result<()> {
        self.inner.core.set_ignore(ignore)
    }

    /// Delete the ignore rules
    pub fn remove_ignore(&self) -> Result<()> {
        self.inner.core.remove_ignore()
    }

    /// Current options
    pub fn options(&self) -> BackupOptions {
        self.inner.core.options()
    }

    /// Whether reads are cached
    pub fn cache_mode(&self) -> bool {
        self.inner.core.cache_mode()
    }

    /// Turn caching on or off; turning it off drops the caches
    pub fn set_cache_mode(&self, enabled: bool) {
        if self.inner.core.set_cache_mode(enabled) && !enabled {
            self.clear_caches();
        }
    }

    /// File comparer used by new tasks
    pub fn file_comparer(&self) -> Arc<dyn FileComparer> {
        self.inner.core.file_comparer()
    }

    /// Replace the file comparer
    pub fn set_file_comparer(&self, comparer: Arc<dyn FileComparer>) {
        self.inner.core.set_file_comparer(comparer);
    }

    /// Directory comparer used by new tasks
    pub fn dir_comparer(&self) -> Arc<dyn DirComparer> {
        self.inner.core.dir_comparer()
    }

    /// Replace the directory comparer
    pub fn set_dir_comparer(&self, comparer: Arc<dyn DirComparer>) {
        self.inner.core.set_dir_comparer(comparer);
    }

    /// Drop every cached read
    pub fn clear_caches(&self) {
        self.inner.core.clear_caches();
        *self.inner.records_cache.write() = None;
        self.inner.index_cache.write().clear();
        *self.inner.blob_cache.write() = None;
    }

    /// Backup task for `target`
    pub fn backup_task(&self, target: impl Into<PathBuf>, record: RecordInfo) -> VersioningBackupTask {
        VersioningBackupTask::new(self.clone(), target, record)
    }

    /// Task removing `records` and the blobs only they refer to
    pub fn remove_task(&self, records: Vec<RecordInfo>) -> VersioningRemoveTask {
        VersioningRemoveTask::new(self.clone(), records)
    }

    /// Restore task writing `target` below `restore_path`
    pub fn restore_task(&self, restore_path: impl Into<PathBuf>, target: RestoreTarget) -> VersioningRestoreTask {
        VersioningRestoreTask::new(self.clone(), restore_path, target)
    }

    /// Persist a new record and its index
    pub(crate) fn commit(&self, index: &Index, record: &RecordInfo) -> Result<()> {
        let mut records = persist::read_records(&self.record_path())?.unwrap_or_default();
        persist::write_index(&self.index_path_of(record), Some(index))?;
        records.push(record.clone());
        persist::write_records(&self.record_path(), &records)?;
        self.clear_caches();
        debug!("Committed record {} to {:?}", record, self.path());
        Ok(())
    }

    /// Persist the record list after removals
    pub(crate) fn rewrite_records(&self, records: &[RecordInfo]) -> Result<()> {
        persist::write_records(&self.record_path(), records)?;
        self.clear_caches();
        Ok(())
    }
}

impl Backup for VersioningBackup {
    fn name(&self) -> &str {
        self.inner.core.name()
    }

    fn path(&self) -> &Path {
        VersioningBackup::path(self)
    }

    fn kind(&self) -> RepoKind {
        RepoKind::Versioning
    }

    fn options(&self) -> BackupOptions {
        VersioningBackup::options(self)
    }

    fn ignore(&self) -> Result<Ignore> {
        VersioningBackup::ignore(self)
    }

    fn set_ignore(&self, ignore: &Ignore) -> Result<()> {
        VersioningBackup::set_ignore(self, ignore)
    }

    fn remove_ignore(&self) -> Result<()> {
        VersioningBackup::remove_ignore(self)
    }

    fn generate_backup_task(&self, target: &Path, record: RecordInfo) -> Box<dyn Task> {
        Box::new(self.backup_task(target, record))
    }

    fn generate_remove_tasks(&self, records: Vec<RecordInfo>) -> Box<dyn Task> {
        Box::new(self.remove_task(records))
    }

    fn generate_restore_task(&self, restore_path: &Path, target: RestoreTarget) -> Box<dyn Task> {
        Box::new(self.restore_task(restore_path, target))
    }

    fn clear_caches(&self) {
        VersioningBackup::clear_caches(self)
    }
}
