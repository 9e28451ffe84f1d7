//! Snapshot building and hashing
//!
//! [`IndexBuilder::build`] walks a directory tree into an [`Index`]. Problems
//! with single entries (a file that cannot be stat'ed, a name that is not
//! UTF-8) are collected as [`ExceptionInfo`] and the entry is left out. A
//! directory that cannot be listed at all is also recorded, and only that
//! subtree is skipped.
//!
//! Hashing is a separate pass ([`IndexBuilder::calculate_all_files_hash`])
//! because most backups only need hashes for the files that changed. It runs on
//! a bounded rayon pool and may be repeated: files that already carry a hash
//! are skipped unless an override is requested.
//!
//! Symlinks to files are snapshotted as the file they point to. Symlinks to
//! directories are not followed.
//!
//! ## Example
//!
//! ```rust,no_run
//! use keepsake::builder::IndexBuilder;
//! use std::path::Path;
//!
//! # fn main() -> keepsake::Result<()> {
//! let builder = IndexBuilder::new();
//! let (mut index, mut problems) = builder.build(Path::new("/home/me/docs"), None)?;
//! problems.extend(builder.calculate_all_files_hash(Path::new("/home/me/docs"), &mut index, false, None)?);
//! println!("{} files, {} problems", index.file_count(), problems.len());
//! # Ok(())
//! # }
//! ```

use crate::error::{KeepsakeError, Result};
use crate::hash::compute_sha1;
use crate::index::Index;
use crate::types::{
    default_parallel_workers, DirInfo, ExceptionInfo, FileInfo, FileType, Ignore, ProgressCallback,
    ProgressEvent,
};
use crate::utils::{entry_times, make_relative, os_to_string, read_attributes};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, instrument, trace, warn};
use walkdir::WalkDir;

/// Builds and hashes snapshots
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    workers: usize,
}

impl Default for IndexBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct Children {
    files: Vec<walkdir::DirEntry>,
    dirs: Vec<walkdir::DirEntry>,
}

impl IndexBuilder {
    /// Builder using the default worker count
    pub fn new() -> Self {
        Self::with_workers(default_parallel_workers())
    }

    /// Builder hashing on at most `workers` threads
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Snapshot the tree under `root`
    ///
    /// # Arguments
    ///
    /// * `root` - Directory to snapshot; becomes the root node
    /// * `ignore` - Root-relative directories and files to leave out
    ///
    /// # Returns
    ///
    /// The snapshot (no hashes yet) and the entries that could not be read.
    ///
    /// # Errors
    ///
    /// - [`KeepsakeError::InvalidArgument`] if `root` is not a directory
    #[instrument(skip(self, ignore))]
    pub fn build(&self, root: &Path, ignore: Option<&Ignore>) -> Result<(Index, Vec<ExceptionInfo>)> {
        if !root.is_dir() {
            return Err(KeepsakeError::invalid_argument(format!(
                "backup target {:?} is not a directory",
                root
            )));
        }

        let empty = Ignore::default();
        let ignore = ignore.unwrap_or(&empty);
        let mut index = Index::new();
        let mut exceptions = Vec::new();
        self.build_node(root, root, &mut index, ignore, &mut exceptions);

        debug!(
            "Built snapshot of {:?}: {} files, {} dirs, {} problems",
            root,
            index.file_count(),
            index.dir_count(),
            exceptions.len()
        );
        Ok((index, exceptions))
    }

    fn build_node(
        &self,
        root: &Path,
        dir: &Path,
        node: &mut Index,
        ignore: &Ignore,
        exceptions: &mut Vec<ExceptionInfo>,
    ) {
        let Some(children) = list_children(dir, exceptions) else {
            return;
        };

        for entry in children.files {
            let path = entry.path();
            if ignore.ignores_file(root, path) {
                trace!("Ignoring file {:?}", path);
                continue;
            }
            match file_info(&entry) {
                Ok(info) => node.insert_file(info),
                Err(e) => {
                    warn!("Skipping file {:?}: {}", path, e);
                    exceptions.push(ExceptionInfo::file(path, e));
                }
            }
        }

        for entry in children.dirs {
            let path = entry.path();
            if ignore.ignores_dir(root, path) {
                trace!("Ignoring directory {:?}", path);
                continue;
            }
            let dir_info = match dir_info(root, &entry) {
                Ok(info) => info,
                Err(e) => {
                    warn!("Skipping directory {:?}: {}", path, e);
                    exceptions.push(ExceptionInfo::dir(path, e));
                    continue;
                }
            };

            let mut child = Index::with_dir(dir_info);
            self.build_node(root, path, &mut child, ignore, exceptions);
            // Every node built here carries a DirInfo
            if let Err(e) = node.insert_sub_index(child) {
                exceptions.push(ExceptionInfo::dir(path, e));
            }
        }
    }

    /// Hash every file of `index` that has no hash yet
    ///
    /// With `hash_override` every file is hashed again. Returns the files that
    /// could not be hashed; their paths are absolute (under `root`). `progress`
    /// receives one determinate event per file and a final event with
    /// `is_progressing == false`.
    pub fn calculate_all_files_hash(
        &self,
        root: &Path,
        index: &mut Index,
        hash_override: bool,
        progress: Option<&ProgressCallback>,
    ) -> Result<Vec<ExceptionInfo>> {
        self.calculate_files_hash(root, index.all_files_mut(), hash_override, progress)
    }

    /// Hash an explicit list of root-relative files
    pub fn calculate_files_hash(
        &self,
        root: &Path,
        files: Vec<(PathBuf, &mut FileInfo)>,
        hash_override: bool,
        progress: Option<&ProgressCallback>,
    ) -> Result<Vec<ExceptionInfo>> {
        let pending: Vec<(PathBuf, &mut FileInfo)> = files
            .into_iter()
            .filter(|(_, f)| hash_override || f.sha1.is_none())
            .collect();
        let total = pending.len();
        let done = AtomicUsize::new(0);
        let exceptions = Mutex::new(Vec::new());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()?;
        pool.install(|| {
            pending.into_par_iter().for_each(|(relative, file)| {
                let path = root.join(&relative);
                match compute_sha1(&path) {
                    Ok(hash) => file.set_hash(hash),
                    Err(e) => {
                        warn!("Failed to hash {:?}: {}", path, e);
                        exceptions.lock().push(ExceptionInfo::file(path, e));
                    }
                }
                let completed = done.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(cb) = progress {
                    cb(ProgressEvent::determinate(total, completed, true));
                }
            });
        });

        if let Some(cb) = progress {
            cb(ProgressEvent::determinate(total, done.load(Ordering::SeqCst), false));
        }
        let exceptions = exceptions.into_inner();
        debug!("Hashed {} files under {:?}, {} failed", total, root, exceptions.len());
        Ok(exceptions)
    }
}

/// Remove from `index` every file named by a file exception under `root`
///
/// Returns how many entries were removed.
pub fn drop_failed_files(index: &mut Index, root: &Path, exceptions: &[ExceptionInfo]) -> usize {
    exceptions
        .iter()
        .filter(|ex| ex.file_type == FileType::File)
        .filter_map(|ex| make_relative(&ex.path, root).ok())
        .filter(|relative| index.remove_file_at(relative).is_some())
        .count()
}

fn list_children(dir: &Path, exceptions: &mut Vec<ExceptionInfo>) -> Option<Children> {
    let mut children = Children {
        files: Vec::new(),
        dirs: Vec::new(),
    };
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();

    for item in walker {
        let entry = match item {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                warn!("Cannot list {:?}: {}", dir, e);
                exceptions.push(ExceptionInfo::dir(dir, e));
                return None;
            }
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                exceptions.push(ExceptionInfo::new(path, FileType::Unknown, e));
                continue;
            }
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            children.dirs.push(entry);
        } else if file_type.is_file() {
            children.files.push(entry);
        } else if file_type.is_symlink() {
            match fs::metadata(entry.path()) {
                Ok(meta) if meta.is_file() => children.files.push(entry),
                Ok(_) => debug!("Not following directory link {:?}", entry.path()),
                Err(e) => exceptions.push(ExceptionInfo::new(entry.path(), FileType::Unknown, e)),
            }
        }
    }
    Some(children)
}

fn file_info(entry: &walkdir::DirEntry) -> Result<FileInfo> {
    let name = os_to_string(entry.file_name())?;
    // Follows file links so size and times describe the content
    let metadata = fs::metadata(entry.path())?;
    let (created, modified) = entry_times(&metadata)?;
    Ok(FileInfo::new(
        name,
        read_attributes(entry.path(), &metadata),
        created,
        modified,
        metadata.len(),
    ))
}

fn dir_info(root: &Path, entry: &walkdir::DirEntry) -> Result<DirInfo> {
    os_to_string(entry.file_name())?;
    let metadata = entry.metadata()?;
    let (created, _) = entry_times(&metadata)?;
    let full_name = make_relative(entry.path(), root)?;
    Ok(DirInfo::new(full_name, read_attributes(entry.path(), &metadata), created))
}
