//! Mirroring repositories
//!
//! A mirroring repository keeps a single up-to-date copy of the target under
//! `mirror/`, described by one index and at most one record. Each backup
//! brings the mirror in line with the target; removing the record empties it.

use crate::comparer::{DirComparer, FileComparer};
use crate::error::{KeepsakeError, Result};
use crate::index::Index;
use crate::persist;
use crate::repository::{Backup, RepoCore, RepoKind, RestoreTarget, INDEX_NAME, MIRROR_DIR, RECORD_FILE};
use crate::task::{MirroringBackupTask, MirroringRemoveTask, MirroringRestoreTask, Task};
use crate::types::{BackupOptions, Ignore, RecordInfo};
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Handle to a mirroring repository
///
/// Cloning is cheap; clones share caches and comparers.
///
/// # Example
///
/// ```rust,no_run
/// use keepsake::{BackupOptions, MirroringBackup, RecordInfo, Task};
///
/// # fn main() -> keepsake::Result<()> {
/// let repo = MirroringBackup::create("/backups/photos", BackupOptions::default())?;
/// let mut task = repo.backup_task("/home/me/photos", RecordInfo::new("photos")?);
/// let failures = task.execute()?;
/// println!("{} items could not be mirrored", failures.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MirroringBackup {
    inner: Arc<MirroringInner>,
}

#[derive(Debug)]
struct MirroringInner {
    core: RepoCore,
    record_cache: RwLock<Option<Option<RecordInfo>>>,
    index_cache: RwLock<Option<Option<Index>>>,
}

impl MirroringBackup {
    /// Create a new repository in a missing or empty directory
    ///
    /// # Errors
    ///
    /// - [`KeepsakeError::RepositoryNotEmpty`] if `path` already holds files
    #[instrument(skip_all)]
    pub fn create(path: impl AsRef<Path>, options: BackupOptions) -> Result<Self> {
        let path = path.as_ref();
        RepoCore::prepare_new(path)?;
        fs::create_dir(path.join(MIRROR_DIR))?;
        persist::write_index(&path.join(INDEX_NAME), None)?;
        persist::write_records(&path.join(RECORD_FILE), &[])?;
        Ok(Self::with_core(RepoCore::new(path.to_path_buf(), options)))
    }

    /// Open an existing repository
    ///
    /// # Errors
    ///
    /// - [`KeepsakeError::BrokenRepository`] if `mirror/`, `index` or `record` is missing
    #[instrument(skip_all)]
    pub fn open(path: impl AsRef<Path>, options: BackupOptions) -> Result<Self> {
        let path = path.as_ref();
        RepoCore::check_existing(path, &[MIRROR_DIR], &[INDEX_NAME, RECORD_FILE])?;
        Ok(Self::with_core(RepoCore::new(path.to_path_buf(), options)))
    }

    fn with_core(core: RepoCore) -> Self {
        Self {
            inner: Arc::new(MirroringInner {
                core,
                record_cache: RwLock::new(None),
                index_cache: RwLock::new(None),
            }),
        }
    }

    /// Repository directory
    pub fn path(&self) -> &Path {
        self.inner.core.path()
    }

    /// Directory holding the mirrored tree
    pub fn mirror_path(&self) -> PathBuf {
        self.path().join(MIRROR_DIR)
    }

    /// Index file
    pub fn index_path(&self) -> PathBuf {
        self.path().join(INDEX_NAME)
    }

    /// Record file
    pub fn record_path(&self) -> PathBuf {
        self.inner.core.record_path()
    }

    /// The single record, if a backup has been made
    ///
    /// # Errors
    ///
    /// - [`KeepsakeError::BrokenRepository`] if the record file lists more than one record
    pub fn record_info(&self) -> Result<Option<RecordInfo>> {
        if let Some(cached) = self.inner.record_cache.read().as_ref() {
            return Ok(cached.clone());
        }
        let records = persist::read_records(&self.record_path())?.unwrap_or_default();
        if records.len() > 1 {
            return Err(KeepsakeError::broken(format!(
                "mirroring repository holds {} records",
                records.len()
            )));
        }
        let record = records.into_iter().next();
        if self.cache_mode() {
            *self.inner.record_cache.write() = Some(record.clone());
        }
        Ok(record)
    }

    /// Snapshot of the mirrored tree, `None` if there is no record
    pub fn index(&self) -> Result<Option<Index>> {
        if let Some(cached) = self.inner.index_cache.read().as_ref() {
            return Ok(cached.clone());
        }
        let index = match self.record_info()? {
            Some(record) => Some(persist::read_index(&self.index_path())?.ok_or_else(|| {
                KeepsakeError::broken(format!("index of record {:?} is empty", record.name()))
            })?),
            None => None,
        };
        if self.cache_mode() {
            *self.inner.index_cache.write() = Some(index.clone());
        }
        Ok(index)
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
        *self.inner.record_cache.write() = None;
        *self.inner.index_cache.write() = None;
    }

    /// Backup task for `target`
    pub fn backup_task(&self, target: impl Into<PathBuf>, record: RecordInfo) -> MirroringBackupTask {
        MirroringBackupTask::new(self.clone(), target, record)
    }

    /// Task removing `records`; each must be the repository's record
    pub fn remove_task(&self, records: Vec<RecordInfo>) -> MirroringRemoveTask {
        MirroringRemoveTask::new(self.clone(), records)
    }

    /// Restore task writing `target` below `restore_path`
    pub fn restore_task(&self, restore_path: impl Into<PathBuf>, target: RestoreTarget) -> MirroringRestoreTask {
        MirroringRestoreTask::new(self.clone(), restore_path, target)
    }

    /// Persist the state after a backup
    pub(crate) fn commit(&self, index: &Index, record: &RecordInfo) -> Result<()> {
        persist::write_index(&self.index_path(), Some(index))?;
        persist::write_records(&self.record_path(), std::slice::from_ref(record))?;
        self.clear_caches();
        debug!("Committed record {} to {:?}", record, self.path());
        Ok(())
    }

    /// Persist the empty state after the record is removed
    pub(crate) fn reset(&self) -> Result<()> {
        persist::write_index(&self.index_path(), None)?;
        persist::write_records(&self.record_path(), &[])?;
        self.clear_caches();
        Ok(())
    }
}

impl Backup for MirroringBackup {
    fn name(&self) -> &str {
        self.inner.core.name()
    }

    fn path(&self) -> &Path {
        MirroringBackup::path(self)
    }

    fn kind(&self) -> RepoKind {
        RepoKind::Mirroring
    }

    fn options(&self) -> BackupOptions {
        MirroringBackup::options(self)
    }

    fn ignore(&self) -> Result<Ignore> {
        MirroringBackup::ignore(self)
    }

    fn set_ignore(&self, ignore: &Ignore) -> Result<()> {
        MirroringBackup::set_ignore(self, ignore)
    }

    fn remove_ignore(&self) -> Result<()> {
        MirroringBackup::remove_ignore(self)
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
        MirroringBackup::clear_caches(self)
    }
}
