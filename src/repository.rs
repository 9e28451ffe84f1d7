//! Repository layout and the interface shared by both backup strategies
//!
//! ## Layout
//!
//! ```text
//! mirroring repository          versioning repository
//! ├── mirror/                   ├── blob/<2 hex>/<38 hex>
//! ├── index                     ├── index/<record name>
//! ├── record                    ├── record
//! └── ignore (optional)         └── ignore (optional)
//! ```
//!
//! A repository handle never mutates the tree itself; it hands out one-shot
//! [`Task`]s that do. Handles are cheap to clone and share their caches.

use crate::comparer::{file_comparer_for, DirComparer, FileComparer, GeneralDirComparer};
use crate::diff::FileGroup;
use crate::error::{KeepsakeError, Result};
use crate::index::Index;
use crate::mirroring::MirroringBackup;
use crate::persist;
use crate::task::Task;
use crate::types::{BackupOptions, Ignore, RecordInfo};
use crate::versioning::VersioningBackup;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Blob directory of a versioning repository
pub const BLOB_DIR: &str = "blob";
/// Mirror tree of a mirroring repository
pub const MIRROR_DIR: &str = "mirror";
/// Index file (mirroring) or index directory (versioning)
pub const INDEX_NAME: &str = "index";
/// Record list
pub const RECORD_FILE: &str = "record";
/// Ignore rules
pub const IGNORE_FILE: &str = "ignore";

/// Backup strategy of a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepoKind {
    /// One live copy of the target, updated in place
    Mirroring,
    /// Named snapshots over a deduplicated blob store
    Versioning,
}

impl fmt::Display for RepoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoKind::Mirroring => write!(f, "mirroring"),
            RepoKind::Versioning => write!(f, "versioning"),
        }
    }
}

/// What a restore task writes out
#[derive(Debug, Clone)]
pub enum RestoreTarget {
    /// A whole snapshot node with everything below it
    Index(Index),
    /// Selected files of one directory
    Files(FileGroup),
}

/// Operations common to mirroring and versioning repositories
pub trait Backup: fmt::Debug + Send + Sync {
    /// Repository directory name
    fn name(&self) -> &str;

    /// Repository directory
    fn path(&self) -> &Path;

    /// Backup strategy
    fn kind(&self) -> RepoKind;

    /// Current options
    fn options(&self) -> BackupOptions;

    /// Ignore rules applied when scanning a target
    fn ignore(&self) -> Result<Ignore>;

    /// Replace the ignore rules
    fn set_ignore(&self, ignore: &Ignore) -> Result<()>;

    /// Delete the ignore rules
    fn remove_ignore(&self) -> Result<()>;

    /// Task that backs `target` up under `record`
    fn generate_backup_task(&self, target: &Path, record: RecordInfo) -> Box<dyn Task>;

    /// Task that removes one record
    fn generate_remove_task(&self, record: RecordInfo) -> Box<dyn Task> {
        self.generate_remove_tasks(vec![record])
    }

    /// Task that removes several records at once
    fn generate_remove_tasks(&self, records: Vec<RecordInfo>) -> Box<dyn Task>;

    /// Task that writes `target` out below `restore_path`
    fn generate_restore_task(&self, restore_path: &Path, target: RestoreTarget) -> Box<dyn Task>;

    /// Drop every cached read
    fn clear_caches(&self);
}

/// Open an existing repository of the given kind behind the common interface
pub fn open_repository(kind: RepoKind, path: impl AsRef<Path>, options: BackupOptions) -> Result<Box<dyn Backup>> {
    Ok(match kind {
        RepoKind::Mirroring => Box::new(MirroringBackup::open(path, options)?),
        RepoKind::Versioning => Box::new(VersioningBackup::open(path, options)?),
    })
}

/// State shared by both repository kinds
#[derive(Debug)]
pub(crate) struct RepoCore {
    path: PathBuf,
    name: String,
    options: RwLock<BackupOptions>,
    file_comparer: RwLock<Arc<dyn FileComparer>>,
    dir_comparer: RwLock<Arc<dyn DirComparer>>,
    ignore_cache: RwLock<Option<Ignore>>,
}

impl RepoCore {
    pub(crate) fn new(path: PathBuf, options: BackupOptions) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self {
            file_comparer: RwLock::new(file_comparer_for(options.check_hash)),
            dir_comparer: RwLock::new(Arc::new(GeneralDirComparer)),
            options: RwLock::new(options),
            ignore_cache: RwLock::new(None),
            path,
            name,
        }
    }

    /// Make sure `path` can host a new repository and create it
    ///
    /// # Errors
    ///
    /// - [`KeepsakeError::RepositoryNotEmpty`] if `path` holds anything
    /// - [`KeepsakeError::InvalidArgument`] if `path` is a file
    pub(crate) fn prepare_new(path: &Path) -> Result<()> {
        if path.exists() {
            if !path.is_dir() {
                return Err(KeepsakeError::invalid_argument(format!("{:?} is not a directory", path)));
            }
            if fs::read_dir(path)?.next().is_some() {
                return Err(KeepsakeError::RepositoryNotEmpty(path.to_path_buf()));
            }
        } else {
            fs::create_dir_all(path)?;
        }
        info!("Creating repository at {:?}", path);
        Ok(())
    }

    /// Check an existing repository directory
    pub(crate) fn check_existing(path: &Path, dirs: &[&str], files: &[&str]) -> Result<()> {
        if !path.is_dir() {
            return Err(KeepsakeError::broken(format!("{:?} is not a repository directory", path)));
        }
        for dir in dirs {
            if !path.join(dir).is_dir() {
                return Err(KeepsakeError::broken(format!("{:?} is missing", path.join(dir))));
            }
        }
        for file in files {
            if !path.join(file).is_file() {
                return Err(KeepsakeError::broken(format!("{:?} is missing", path.join(file))));
            }
        }
        debug!("Opened repository at {:?}", path);
        Ok(())
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn options(&self) -> BackupOptions {
        self.options.read().clone()
    }

    pub(crate) fn cache_mode(&self) -> bool {
        self.options.read().cache_mode
    }

    /// Returns true if the mode changed; the caller clears its caches then
    pub(crate) fn set_cache_mode(&self, enabled: bool) -> bool {
        let mut options = self.options.write();
        let changed = options.cache_mode != enabled;
        options.cache_mode = enabled;
        changed
    }

    pub(crate) fn file_comparer(&self) -> Arc<dyn FileComparer> {
        Arc::clone(&self.file_comparer.read())
    }

    pub(crate) fn set_file_comparer(&self, comparer: Arc<dyn FileComparer>) {
        let check_hash = comparer.compare_hash();
        *self.file_comparer.write() = comparer;
        self.options.write().check_hash = check_hash;
    }

    pub(crate) fn dir_comparer(&self) -> Arc<dyn DirComparer> {
        Arc::clone(&self.dir_comparer.read())
    }

    pub(crate) fn set_dir_comparer(&self, comparer: Arc<dyn DirComparer>) {
        *self.dir_comparer.write() = comparer;
    }

    pub(crate) fn ignore_path(&self) -> PathBuf {
        self.path.join(IGNORE_FILE)
    }

    pub(crate) fn record_path(&self) -> PathBuf {
        self.path.join(RECORD_FILE)
    }

    pub(crate) fn ignore(&self) -> Result<Ignore> {
        if let Some(ignore) = self.ignore_cache.read().as_ref() {
            return Ok(ignore.clone());
        }
        let ignore = persist::read_ignore(&self.ignore_path())?;
        if self.cache_mode() {
            *self.ignore_cache.write() = Some(ignore.clone());
        }
        Ok(ignore)
    }

    pub(crate) fn set_ignore(&self, ignore: &Ignore) -> Result<()> {
        persist::write_ignore(&self.ignore_path(), ignore)?;
        *self.ignore_cache.write() = None;
        Ok(())
    }

    pub(crate) fn remove_ignore(&self) -> Result<()> {
        let path = self.ignore_path();
        if path.exists() {
            fs::remove_file(&path)?;
        }
        *self.ignore_cache.write() = None;
        Ok(())
    }

    pub(crate) fn clear_caches(&self) {
        *self.ignore_cache.write() = None;
    }
}
