//! Restore tasks
//!
//! A restore writes repository content into a directory of the caller's
//! choosing. Existing files there are never overwritten; each collision is
//! reported as an item failure.

use super::{run_once, ProgressReporter, Task, TaskKind, TaskState};
use crate::diff::FileGroup;
use crate::error::{KeepsakeError, Result};
use crate::index::Index;
use crate::mirroring::MirroringBackup;
use crate::repository::{RepoKind, RestoreTarget};
use crate::types::{DirInfo, ExceptionInfo, FileAttributes, FileInfo, ProgressCallback};
use crate::utils::{apply_attributes, copy_new, make_relative};
use crate::versioning::VersioningBackup;
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Where a repository keeps the content of a snapshot entry
pub trait RestoreSource: Debug + Send + Sync {
    /// Repository kind
    fn kind(&self) -> RepoKind;

    /// File holding the content of `file`, found at root-relative `relative`
    ///
    /// # Errors
    ///
    /// - [`KeepsakeError::MissingHash`] if the content is addressed by a hash the entry lacks
    fn content_path(&self, relative: &Path, file: &FileInfo) -> Result<PathBuf>;
}

impl RestoreSource for MirroringBackup {
    fn kind(&self) -> RepoKind {
        RepoKind::Mirroring
    }

    fn content_path(&self, relative: &Path, _file: &FileInfo) -> Result<PathBuf> {
        Ok(self.mirror_path().join(relative))
    }
}

impl RestoreSource for VersioningBackup {
    fn kind(&self) -> RepoKind {
        RepoKind::Versioning
    }

    fn content_path(&self, relative: &Path, file: &FileInfo) -> Result<PathBuf> {
        let hash = file
            .hash()
            .ok_or_else(|| KeepsakeError::MissingHash(relative.to_path_buf()))?;
        self.blob_store().blob_path(hash)
    }
}

/// Restores a snapshot node or a set of files
#[derive(Debug)]
pub struct RestoreTask<S: RestoreSource> {
    source: S,
    restore_path: PathBuf,
    target: RestoreTarget,
    state: TaskState,
}

/// Restore from a mirroring repository
pub type MirroringRestoreTask = RestoreTask<MirroringBackup>;

/// Restore from a versioning repository
pub type VersioningRestoreTask = RestoreTask<VersioningBackup>;

/// One file to write
struct PlannedCopy {
    src: PathBuf,
    dst: PathBuf,
    attributes: FileAttributes,
}

impl<S: RestoreSource> RestoreTask<S> {
    /// Task writing `target` from `source` below `restore_path`
    pub fn new(source: S, restore_path: impl Into<PathBuf>, target: RestoreTarget) -> Self {
        Self {
            source,
            restore_path: restore_path.into(),
            target,
            state: TaskState::default(),
        }
    }

    /// Destination directory
    pub fn restore_path(&self) -> &Path {
        &self.restore_path
    }

    /// What gets restored
    pub fn target(&self) -> &RestoreTarget {
        &self.target
    }

    #[instrument(skip_all, fields(kind = %self.source.kind(), restore_path = ?self.restore_path))]
    fn run(&self, progress: &mut ProgressReporter) -> Result<Vec<ExceptionInfo>> {
        progress.start();
        let (dirs, copies) = match &self.target {
            RestoreTarget::Index(node) => self.plan_index(node)?,
            RestoreTarget::Files(group) => (Vec::new(), self.plan_files(group)?),
        };

        fs::create_dir_all(&self.restore_path)?;
        let mut exceptions = Vec::new();
        progress.set_total(copies.len() + 1);

        for (path, _) in &dirs {
            if let Err(e) = fs::create_dir_all(path) {
                warn!("Failed to create directory {:?}: {}", path, e);
                exceptions.push(ExceptionInfo::dir(path, e));
            }
        }
        progress.advance(1);

        for copy in &copies {
            let result = copy_new(&copy.src, &copy.dst).and_then(|_| apply_attributes(&copy.dst, copy.attributes));
            if let Err(e) = result {
                warn!("Failed to restore {:?}: {}", copy.dst, e);
                exceptions.push(ExceptionInfo::file(&copy.dst, e));
            }
            progress.advance(1);
        }

        // After their content is in place, deepest first
        for (path, attributes) in dirs.iter().rev() {
            if !path.is_dir() {
                continue;
            }
            if let Err(e) = apply_attributes(path, *attributes) {
                warn!("Failed to set attributes of {:?}: {}", path, e);
                exceptions.push(ExceptionInfo::dir(path, e));
            }
        }

        info!(
            "Restored {} files into {:?}, {} failures",
            copies.len(),
            self.restore_path,
            exceptions.len()
        );
        Ok(exceptions)
    }

    /// Directories and files below `node`, placed relative to the node itself
    fn plan_index(&self, node: &Index) -> Result<(Vec<(PathBuf, FileAttributes)>, Vec<PlannedCopy>)> {
        let base = node.dir_path();
        let dirs = node
            .all_dir_info()
            .into_iter()
            .map(|dir: &DirInfo| -> Result<(PathBuf, FileAttributes)> {
                Ok((self.restore_path.join(make_relative(&dir.full_name, base)?), dir.attributes))
            })
            .collect::<Result<Vec<_>>>()?;
        let copies = node
            .all_file_info()
            .into_iter()
            .map(|(relative, file)| -> Result<PlannedCopy> {
                Ok(PlannedCopy {
                    src: self.source.content_path(&relative, file)?,
                    dst: self.restore_path.join(make_relative(&relative, base)?),
                    attributes: file.attributes,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((dirs, copies))
    }

    /// Selected files, written flat into the restore directory
    fn plan_files(&self, group: &FileGroup) -> Result<Vec<PlannedCopy>> {
        group
            .paths()
            .map(|(relative, file)| -> Result<PlannedCopy> {
                Ok(PlannedCopy {
                    src: self.source.content_path(&relative, file)?,
                    dst: self.restore_path.join(&file.name),
                    attributes: file.attributes,
                })
            })
            .collect()
    }
}

impl<S: RestoreSource> Task for RestoreTask<S> {
    fn kind(&self) -> TaskKind {
        TaskKind::Restore
    }

    fn is_completed(&self) -> bool {
        self.state.is_completed()
    }

    fn set_progress_callback(&mut self, callback: ProgressCallback) {
        self.state.set_callback(callback);
    }

    fn execute(&mut self) -> Result<Vec<ExceptionInfo>> {
        let mut state = std::mem::take(&mut self.state);
        let outcome = run_once(&mut state, |progress| self.run(progress));
        self.state = state;
        outcome
    }
}
