//! Backup tasks

use super::{run_once, ProgressReporter, Task, TaskKind, TaskState};
use crate::builder::{drop_failed_files, IndexBuilder};
use crate::collections::HashSet;
use crate::comparer::{DirComparer, FileComparer};
use crate::diff::{diff_dir_info, diff_file_info, file_total, intersect_file_info, FileGroup};
use crate::error::{KeepsakeError, Result};
use crate::index::Index;
use crate::mirroring::MirroringBackup;
use crate::types::{ExceptionInfo, ProgressCallback, RecordInfo};
use crate::utils::{copy_new, normalize_attributes};
use crate::versioning::VersioningBackup;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Brings a mirroring repository in line with a target directory
///
/// Files and directories that vanished from the target are deleted from the
/// mirror, new or changed ones are copied in. Attribute-only changes are not
/// copied; the new index records them.
#[derive(Debug)]
pub struct MirroringBackupTask {
    repo: MirroringBackup,
    target: PathBuf,
    record: RecordInfo,
    file_comparer: Arc<dyn FileComparer>,
    dir_comparer: Arc<dyn DirComparer>,
    state: TaskState,
}

impl MirroringBackupTask {
    /// Task backing `target` up into `repo` under `record`
    ///
    /// Uses the comparers `repo` holds at this moment.
    pub fn new(repo: MirroringBackup, target: impl Into<PathBuf>, record: RecordInfo) -> Self {
        Self {
            file_comparer: repo.file_comparer(),
            dir_comparer: repo.dir_comparer(),
            repo,
            target: target.into(),
            record,
            state: TaskState::default(),
        }
    }

    /// Directory being backed up
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Record written on success
    pub fn record(&self) -> &RecordInfo {
        &self.record
    }

    #[instrument(skip_all, fields(target = ?self.target, record = %self.record))]
    fn run(&self, progress: &mut ProgressReporter) -> Result<Vec<ExceptionInfo>> {
        progress.start();
        info!("Mirroring {:?} into {:?}", self.target, self.repo.path());

        let mirror_root = self.repo.mirror_path();
        let builder = IndexBuilder::with_workers(self.repo.options().parallel_workers);
        let ignore = self.repo.ignore()?;

        let mut mirror_index = self.repo.index()?.unwrap_or_default();
        let (mut target_index, mut exceptions) = builder.build(&self.target, Some(&ignore))?;

        if self.file_comparer.compare_hash() {
            // A mirror copy that cannot be hashed keeps no hash, differs from
            // its target and is replaced below
            exceptions.extend(builder.calculate_all_files_hash(&mirror_root, &mut mirror_index, false, None)?);
            let failed = builder.calculate_all_files_hash(&self.target, &mut target_index, false, None)?;
            drop_failed_files(&mut target_index, &self.target, &failed);
            exceptions.extend(failed);
        }

        let file_cmp = self.file_comparer.as_ref();
        let dir_cmp = self.dir_comparer.as_ref();
        let (stale_dirs, new_dirs) = diff_dir_info(&mirror_index, &target_index, dir_cmp, false);
        let (stale_files, new_files) = diff_file_info(&mirror_index, &target_index, file_cmp, dir_cmp, false);
        debug!(
            "Mirror diff: -{} files -{} dirs, +{} files +{} dirs",
            file_total(&stale_files),
            stale_dirs.len(),
            file_total(&new_files),
            new_dirs.len()
        );
        progress.set_total(file_total(&stale_files) + file_total(&new_files) + 2);

        for group in &stale_files {
            for (relative, _) in group.paths() {
                let path = mirror_root.join(&relative);
                if let Err(e) = fs::remove_file(&path) {
                    warn!("Failed to delete {:?}: {}", path, e);
                    exceptions.push(ExceptionInfo::file(path, e));
                }
                progress.advance(1);
            }
        }

        // Deepest first, so children go before their parents
        for dir in stale_dirs.iter().rev() {
            let path = mirror_root.join(&dir.full_name);
            if let Err(e) = fs::remove_dir(&path) {
                warn!("Failed to delete directory {:?}: {}", path, e);
                exceptions.push(ExceptionInfo::dir(path, e));
            }
        }
        progress.advance(1);

        for dir in &new_dirs {
            let path = mirror_root.join(&dir.full_name);
            if let Err(e) = ensure_dir(&path) {
                warn!("Failed to create directory {:?}: {}", path, e);
                exceptions.push(ExceptionInfo::dir(path, e));
                target_index.remove_dir_at(&dir.full_name);
            }
        }
        progress.advance(1);

        for group in &new_files {
            for (relative, _) in group.paths() {
                let src = self.target.join(&relative);
                let dst = mirror_root.join(&relative);
                let copied = copy_new(&src, &dst).and_then(|_| {
                    normalize_attributes(&dst).inspect_err(|_| {
                        // Not indexed, so it must not stay in the mirror
                        let _ = fs::remove_file(&dst);
                    })
                });
                if let Err(e) = copied {
                    warn!("Failed to copy {:?}: {}", src, e);
                    exceptions.push(ExceptionInfo::file(src, e));
                    target_index.remove_file_at(&relative);
                }
                progress.advance(1);
            }
        }

        self.repo.commit(&target_index, &self.record)?;
        info!(
            "Mirrored {} files into {:?}, {} failures",
            target_index.file_count(),
            self.repo.path(),
            exceptions.len()
        );
        Ok(exceptions)
    }
}

impl Task for MirroringBackupTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Backup
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

/// Adds a new record to a versioning repository
///
/// Only contents the blob store does not hold yet are copied.
#[derive(Debug)]
pub struct VersioningBackupTask {
    repo: VersioningBackup,
    target: PathBuf,
    record: RecordInfo,
    file_comparer: Arc<dyn FileComparer>,
    dir_comparer: Arc<dyn DirComparer>,
    state: TaskState,
}

impl VersioningBackupTask {
    /// Task backing `target` up into `repo` as `record`
    ///
    /// Uses the comparers `repo` holds at this moment.
    pub fn new(repo: VersioningBackup, target: impl Into<PathBuf>, record: RecordInfo) -> Self {
        Self {
            file_comparer: repo.file_comparer(),
            dir_comparer: repo.dir_comparer(),
            repo,
            target: target.into(),
            record,
            state: TaskState::default(),
        }
    }

    /// Directory being backed up
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Record written on success
    pub fn record(&self) -> &RecordInfo {
        &self.record
    }

    #[instrument(skip_all, fields(target = ?self.target, record = %self.record))]
    fn run(&self, progress: &mut ProgressReporter) -> Result<Vec<ExceptionInfo>> {
        progress.start();
        info!("Backing up {:?} into {:?}", self.target, self.repo.path());

        let records = self.repo.records()?;
        if records.contains(&self.record) {
            return Err(KeepsakeError::DuplicateRecord(self.record.name().to_string()));
        }
        let previous = match records.last() {
            Some(latest) => self.repo.index_of(latest)?,
            None => Index::new(),
        };

        let builder = IndexBuilder::with_workers(self.repo.options().parallel_workers);
        let ignore = self.repo.ignore()?;
        let (mut target_index, mut exceptions) = builder.build(&self.target, Some(&ignore))?;

        let unique = if self.file_comparer.compare_hash() {
            let failed = builder.calculate_all_files_hash(&self.target, &mut target_index, false, None)?;
            drop_failed_files(&mut target_index, &self.target, &failed);
            exceptions.extend(failed);
            let (_, unique) = diff_file_info(
                &previous,
                &target_index,
                self.file_comparer.as_ref(),
                self.dir_comparer.as_ref(),
                false,
            );
            unique
        } else {
            self.hash_changed_files(&builder, &previous, &mut target_index, &mut exceptions)?
        };

        let store = self.repo.blob_store();
        let mut seen = self.repo.blob_hashes()?;
        let mut prefixes: HashSet<String> = self.repo.blob_prefixes()?.into_iter().collect();
        // Contents whose copy failed; the next file holding them retries
        let mut failed: HashSet<String> = HashSet::default();
        let mut stored = 0usize;
        progress.set_total(file_total(&unique));

        for group in &unique {
            for (relative, _) in group.paths() {
                let hash = match target_index.file_at(&relative) {
                    // Dropped after a failure
                    None => None,
                    Some(file) => Some(
                        file.sha1
                            .clone()
                            .ok_or_else(|| KeepsakeError::MissingHash(relative.clone()))?,
                    ),
                };
                if let Some(hash) = hash.filter(|h| !seen.contains(h) || failed.contains(h)) {
                    let src = self.target.join(&relative);
                    match store.store_file(&src, &hash, &mut prefixes) {
                        Ok(_) => {
                            stored += 1;
                            failed.remove(&hash);
                        }
                        Err(KeepsakeError::Io(e)) if e.kind() == io::ErrorKind::AlreadyExists => {
                            failed.remove(&hash);
                        }
                        Err(e) => {
                            warn!("Failed to store {:?}: {}", src, e);
                            exceptions.push(ExceptionInfo::file(src, e));
                            target_index.remove_file_at(&relative);
                            failed.insert(hash.clone());
                        }
                    }
                    seen.insert(hash);
                }
                progress.advance(1);
            }
        }

        self.repo.commit(&target_index, &self.record)?;
        info!(
            "Record {} holds {} files, {} new blobs, {} failures",
            self.record,
            target_index.file_count(),
            stored,
            exceptions.len()
        );
        Ok(exceptions)
    }

    /// Hash what changed and take the rest over from the previous snapshot
    fn hash_changed_files(
        &self,
        builder: &IndexBuilder,
        previous: &Index,
        target_index: &mut Index,
        exceptions: &mut Vec<ExceptionInfo>,
    ) -> Result<Vec<FileGroup>> {
        let file_cmp = self.file_comparer.as_ref();
        let dir_cmp = self.dir_comparer.as_ref();

        let (_, mut unique) = diff_file_info(previous, target_index, file_cmp, dir_cmp, false);
        let changed: HashSet<PathBuf> = unique
            .iter()
            .flat_map(|g| g.paths().map(|(path, _)| path))
            .collect();
        let failed = self.hash_subset(builder, target_index, &changed)?;
        if !failed.is_empty() {
            drop_failed_files(target_index, &self.target, &failed);
            exceptions.extend(failed);
            unique = diff_file_info(previous, target_index, file_cmp, dir_cmp, false).1;
        }

        let (old_groups, new_groups) = intersect_file_info(previous, target_index, file_cmp, dir_cmp, false);
        let mut inherited = Vec::new();
        let mut unhashed = HashSet::default();
        for (old, new) in old_groups.iter().zip(&new_groups) {
            let same_dir = match (&old.dir, &new.dir) {
                (None, None) => true,
                (Some(a), Some(b)) => dir_cmp.equals(a, b).is_match(false),
                _ => false,
            };
            if !same_dir || old.len() != new.len() {
                return Err(KeepsakeError::Inconsistency(format!(
                    "directory {:?} does not line up with {:?}",
                    old.dir_path(),
                    new.dir_path()
                )));
            }
            for (old_file, new_file) in old.files.iter().zip(&new.files) {
                if old_file.name != new_file.name {
                    return Err(KeepsakeError::Inconsistency(format!(
                        "file {:?} does not line up with {:?}",
                        old.file_path(old_file),
                        new.file_path(new_file)
                    )));
                }
                let relative = new.file_path(new_file);
                match &old_file.sha1 {
                    Some(hash) => inherited.push((relative, hash.clone())),
                    None => {
                        unhashed.insert(relative);
                    }
                }
            }
        }

        for (relative, hash) in inherited {
            if let Some(file) = target_index.file_at_mut(&relative) {
                file.set_hash(hash);
            }
        }
        if !unhashed.is_empty() {
            warn!(
                "{} unchanged files have no hash in the previous snapshot, hashing them again",
                unhashed.len()
            );
            let failed = self.hash_subset(builder, target_index, &unhashed)?;
            drop_failed_files(target_index, &self.target, &failed);
            exceptions.extend(failed);
        }
        Ok(unique)
    }

    fn hash_subset(
        &self,
        builder: &IndexBuilder,
        target_index: &mut Index,
        wanted: &HashSet<PathBuf>,
    ) -> Result<Vec<ExceptionInfo>> {
        let files = target_index
            .all_files_mut()
            .into_iter()
            .filter(|(path, _)| wanted.contains(path))
            .collect();
        builder.calculate_files_hash(&self.target, files, false, None)
    }
}

impl Task for VersioningBackupTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Backup
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

fn ensure_dir(path: &Path) -> io::Result<()> {
    match fs::create_dir(path) {
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparer::TightFileComparer;
    use crate::types::{BackupOptions, FileType, ProgressEvent};
    use parking_lot::Mutex;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn mirroring(temp_dir: &TempDir, check_hash: bool) -> MirroringBackup {
        MirroringBackup::create(
            temp_dir.path().join("repo"),
            BackupOptions::default().with_check_hash(check_hash),
        )
        .unwrap()
    }

    fn versioning(temp_dir: &TempDir, check_hash: bool) -> VersioningBackup {
        VersioningBackup::create(
            temp_dir.path().join("repo"),
            BackupOptions::default().with_check_hash(check_hash),
        )
        .unwrap()
    }

    #[test]
    fn test_mirror_first_backup() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target");
        write(&target.join("A/x.txt"), "x");
        write(&target.join("B.txt"), "b");
        let repo = mirroring(&temp_dir, false);

        let failures = repo
            .backup_task(&target, RecordInfo::new("mirror").unwrap())
            .execute()
            .unwrap();
        assert!(failures.is_empty());

        let mirror = repo.mirror_path();
        assert_eq!(fs::read_to_string(mirror.join("A/x.txt")).unwrap(), "x");
        assert_eq!(fs::read_to_string(mirror.join("B.txt")).unwrap(), "b");
        assert_eq!(repo.record_info().unwrap().unwrap().name(), "mirror");
        assert_eq!(repo.index().unwrap().unwrap().file_count(), 2);
    }

    #[test]
    fn test_mirror_deletes_vanished_entries() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target");
        write(&target.join("A/x.txt"), "x");
        write(&target.join("A/deep/y.txt"), "y");
        write(&target.join("B.txt"), "b");
        let repo = mirroring(&temp_dir, false);
        repo.backup_task(&target, RecordInfo::new("r1").unwrap()).execute().unwrap();

        fs::remove_dir_all(target.join("A")).unwrap();
        write(&target.join("C.txt"), "c");
        let failures = repo
            .backup_task(&target, RecordInfo::new("r2").unwrap())
            .execute()
            .unwrap();
        assert!(failures.is_empty());

        let mirror = repo.mirror_path();
        assert!(!mirror.join("A").exists());
        assert!(mirror.join("B.txt").is_file());
        assert!(mirror.join("C.txt").is_file());
        assert_eq!(repo.record_info().unwrap().unwrap().name(), "r2");
        assert_eq!(repo.index().unwrap().unwrap().dir_count(), 0);
    }

    #[test]
    fn test_mirror_replaces_changed_content_with_hash_check() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target");
        write(&target.join("notes.txt"), "first");
        let repo = mirroring(&temp_dir, true);
        repo.backup_task(&target, RecordInfo::new("r1").unwrap()).execute().unwrap();

        // Same size and timestamp, different bytes
        let modified = fs::metadata(target.join("notes.txt")).unwrap().modified().unwrap();
        fs::write(target.join("notes.txt"), "FIRST").unwrap();
        filetime::set_file_mtime(target.join("notes.txt"), filetime::FileTime::from_system_time(modified)).unwrap();

        repo.backup_task(&target, RecordInfo::new("r2").unwrap()).execute().unwrap();
        assert_eq!(fs::read_to_string(repo.mirror_path().join("notes.txt")).unwrap(), "FIRST");
    }

    #[test]
    fn test_mirror_progress_protocol() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target");
        write(&target.join("a.txt"), "a");
        write(&target.join("b.txt"), "b");
        let repo = mirroring(&temp_dir, false);

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let mut task = repo.backup_task(&target, RecordInfo::new("r").unwrap());
        task.set_progress_callback(Arc::new(move |e: ProgressEvent| sink.lock().push(e)));
        task.execute().unwrap();

        let events = events.lock();
        assert!(!events[0].is_determinate);
        assert_eq!(events.last().unwrap(), &ProgressEvent::determinate(4, 4, false));
        assert!(task.is_completed());
        assert!(matches!(task.execute(), Err(KeepsakeError::TaskAlreadyCompleted)));
    }

    #[test]
    fn test_versioning_dedups_contents() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target");
        write(&target.join("one.txt"), "same bytes");
        write(&target.join("sub/two.txt"), "same bytes");
        let repo = versioning(&temp_dir, false);

        let failures = repo
            .backup_task(&target, RecordInfo::new("r1").unwrap())
            .execute()
            .unwrap();
        assert!(failures.is_empty());

        let index = repo.index_of(&RecordInfo::new("r1").unwrap()).unwrap();
        assert_eq!(index.file_count(), 2);
        let hashes: Vec<&str> = index.all_file_info().iter().filter_map(|(_, f)| f.hash()).collect();
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[0], hashes[1]);
        assert_eq!(repo.blob_hashes().unwrap().len(), 1);
    }

    #[test]
    fn test_versioning_second_backup_stores_nothing_new() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target");
        write(&target.join("a.txt"), "alpha");
        write(&target.join("dir/b.txt"), "beta");
        let repo = versioning(&temp_dir, false);

        repo.backup_task(&target, RecordInfo::new("r1").unwrap()).execute().unwrap();
        let blobs_before = repo.blob_hashes().unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let mut task = repo.backup_task(&target, RecordInfo::new("r2").unwrap());
        task.set_progress_callback(Arc::new(move |e: ProgressEvent| sink.lock().push(e)));
        task.execute().unwrap();

        assert_eq!(repo.blob_hashes().unwrap(), blobs_before);
        assert_eq!(events.lock().last().unwrap().total, 0);

        let first = repo.index_of(&RecordInfo::new("r1").unwrap()).unwrap();
        let second = repo.index_of(&RecordInfo::new("r2").unwrap()).unwrap();
        let hashes = |i: &Index| -> Vec<String> {
            let mut v: Vec<String> = i.all_file_info().iter().filter_map(|(_, f)| f.sha1.clone()).collect();
            v.sort();
            v
        };
        assert_eq!(hashes(&first), hashes(&second));
    }

    #[test]
    fn test_versioning_rejects_duplicate_record() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target");
        write(&target.join("a.txt"), "a");
        let repo = versioning(&temp_dir, false);
        repo.backup_task(&target, RecordInfo::new("Daily").unwrap()).execute().unwrap();

        let err = repo
            .backup_task(&target, RecordInfo::new("DAILY").unwrap())
            .execute()
            .unwrap_err();
        assert!(matches!(err, KeepsakeError::DuplicateRecord(_)));
        assert_eq!(repo.records().unwrap().len(), 1);
    }

    #[test]
    fn test_versioning_recovers_missing_previous_hash() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target");
        write(&target.join("a.txt"), "alpha");
        let repo = versioning(&temp_dir, false);
        let first = RecordInfo::new("r1").unwrap();
        repo.backup_task(&target, first.clone()).execute().unwrap();

        // Strip the hash from the stored snapshot
        let mut index = repo.index_of(&first).unwrap();
        for (_, file) in index.all_files_mut() {
            file.sha1 = None;
        }
        crate::persist::write_index(&repo.index_path_of(&first), Some(&index)).unwrap();
        repo.clear_caches();

        let failures = repo
            .backup_task(&target, RecordInfo::new("r2").unwrap())
            .execute()
            .unwrap();
        assert!(failures.is_empty());
        let second = repo.index_of(&RecordInfo::new("r2").unwrap()).unwrap();
        assert!(second.all_file_info().iter().all(|(_, f)| f.sha1.is_some()));
    }

    #[test]
    fn test_versioning_tight_comparer_detects_same_size_edit() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target");
        write(&target.join("a.txt"), "abc");
        let repo = versioning(&temp_dir, false);
        repo.set_file_comparer(Arc::new(TightFileComparer));
        repo.backup_task(&target, RecordInfo::new("r1").unwrap()).execute().unwrap();

        let modified = fs::metadata(target.join("a.txt")).unwrap().modified().unwrap();
        fs::write(target.join("a.txt"), "xyz").unwrap();
        filetime::set_file_mtime(target.join("a.txt"), filetime::FileTime::from_system_time(modified)).unwrap();

        repo.backup_task(&target, RecordInfo::new("r2").unwrap()).execute().unwrap();
        assert_eq!(repo.blob_hashes().unwrap().len(), 2);
    }

    #[test]
    fn test_mirror_copy_onto_existing_file_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target");
        write(&target.join("x.txt"), "new");
        write(&target.join("y.txt"), "y");
        let repo = mirroring(&temp_dir, false);
        // In the mirror but unknown to the index
        write(&repo.mirror_path().join("x.txt"), "stray");

        let failures = repo
            .backup_task(&target, RecordInfo::new("r").unwrap())
            .execute()
            .unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].path, target.join("x.txt"));
        assert!(matches!(&failures[0].error, KeepsakeError::Io(e) if e.kind() == io::ErrorKind::AlreadyExists));

        let index = repo.index().unwrap().unwrap();
        assert!(index.file_at(Path::new("x.txt")).is_none());
        assert!(index.file_at(Path::new("y.txt")).is_some());
        assert_eq!(fs::read_to_string(repo.mirror_path().join("x.txt")).unwrap(), "stray");
    }

    #[test]
    fn test_mirror_drops_subtree_when_directory_cannot_be_created() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target");
        write(&target.join("sub/inner.txt"), "inner");
        write(&target.join("top.txt"), "top");
        let repo = mirroring(&temp_dir, false);
        // A plain file where the directory should go
        write(&repo.mirror_path().join("sub"), "blocker");

        let failures = repo
            .backup_task(&target, RecordInfo::new("r").unwrap())
            .execute()
            .unwrap();
        assert!(failures
            .iter()
            .any(|f| f.file_type == FileType::Dir && f.path == repo.mirror_path().join("sub")));

        let index = repo.index().unwrap().unwrap();
        assert!(index.node(Path::new("sub")).is_none());
        assert!(index.file_at(Path::new("sub/inner.txt")).is_none());
        assert_eq!(index.file_count(), 1);
        assert!(repo.mirror_path().join("sub").is_file());
    }

    #[test]
    fn test_versioning_retries_content_after_failed_store() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target");
        write(&target.join("a.txt"), "shared");
        write(&target.join("b.txt"), "shared");
        let repo = versioning(&temp_dir, false);

        // Hashing is done once the total is known; losing a.txt now makes its
        // copy into the store fail
        let doomed = target.join("a.txt");
        let mut task = repo.backup_task(&target, RecordInfo::new("r").unwrap());
        task.set_progress_callback(Arc::new(move |e: ProgressEvent| {
            if e.is_determinate && e.completed == 0 {
                let _ = fs::remove_file(&doomed);
            }
        }));
        let failures = task.execute().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].path, target.join("a.txt"));

        let index = repo.index_of(&RecordInfo::new("r").unwrap()).unwrap();
        assert!(index.file_at(Path::new("a.txt")).is_none());
        let kept = index.file_at(Path::new("b.txt")).unwrap();
        let store = repo.blob_store();
        assert!(store.contains(kept.hash().unwrap()));
        for (_, file) in index.all_file_info() {
            assert!(store.contains(file.hash().unwrap()));
        }
        assert_eq!(repo.blob_hashes().unwrap().len(), 1);
    }
}
