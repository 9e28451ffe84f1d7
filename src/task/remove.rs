//! Record removal tasks

use super::{run_once, ProgressReporter, Task, TaskKind, TaskState};
use crate::collections::HashSet;
use crate::error::{KeepsakeError, Result};
use crate::mirroring::MirroringBackup;
use crate::types::{ExceptionInfo, ProgressCallback, RecordInfo};
use crate::versioning::VersioningBackup;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::fs;
use tracing::{debug, info, instrument, warn};

/// Empties a mirroring repository
///
/// The mirror's top-level files are deleted one by one and each top-level
/// directory is deleted with everything in it. The index and the record are
/// cleared afterwards.
#[derive(Debug)]
pub struct MirroringRemoveTask {
    repo: MirroringBackup,
    records: Vec<RecordInfo>,
    state: TaskState,
}

impl MirroringRemoveTask {
    /// Task removing `records`, each of which must be the repository's record
    pub fn new(repo: MirroringBackup, records: Vec<RecordInfo>) -> Self {
        Self {
            repo,
            records,
            state: TaskState::default(),
        }
    }

    /// Records to remove
    pub fn records(&self) -> &[RecordInfo] {
        &self.records
    }

    #[instrument(skip_all, fields(repo = ?self.repo.path()))]
    fn run(&self, progress: &mut ProgressReporter) -> Result<Vec<ExceptionInfo>> {
        if self.records.is_empty() {
            return Ok(Vec::new());
        }
        progress.start();

        let stored = self.repo.record_info()?;
        if let Some(record) = self.records.iter().find(|r| stored.as_ref() != Some(*r)) {
            return Err(KeepsakeError::RecordNotFound(record.name().to_string()));
        }
        let index = self
            .repo
            .index()?
            .ok_or_else(|| KeepsakeError::broken("mirror index is missing"))?;

        let mirror_root = self.repo.mirror_path();
        let mut exceptions = Vec::new();
        progress.set_total(index.files().len() + index.sub_indexes().len());

        for file in index.files() {
            let path = mirror_root.join(index.file_path(file));
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to delete {:?}: {}", path, e);
                exceptions.push(ExceptionInfo::file(path, e));
            }
            progress.advance(1);
        }
        for sub in index.sub_indexes() {
            let path = mirror_root.join(sub.dir_path());
            if let Err(e) = fs::remove_dir_all(&path) {
                warn!("Failed to delete directory {:?}: {}", path, e);
                exceptions.push(ExceptionInfo::dir(path, e));
            }
            progress.advance(1);
        }

        self.repo.reset()?;
        info!("Cleared mirror {:?}, {} failures", mirror_root, exceptions.len());
        Ok(exceptions)
    }
}

impl Task for MirroringRemoveTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Remove
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

/// Removes records from a versioning repository
///
/// Blobs still referenced by a remaining record survive; the rest are
/// deleted together with the removed records' indexes.
#[derive(Debug)]
pub struct VersioningRemoveTask {
    repo: VersioningBackup,
    records: Vec<RecordInfo>,
    state: TaskState,
}

impl VersioningRemoveTask {
    /// Task removing `records`
    pub fn new(repo: VersioningBackup, records: Vec<RecordInfo>) -> Self {
        Self {
            repo,
            records,
            state: TaskState::default(),
        }
    }

    /// Records to remove
    pub fn records(&self) -> &[RecordInfo] {
        &self.records
    }

    #[instrument(skip_all, fields(repo = ?self.repo.path(), count = self.records.len()))]
    fn run(&self, progress: &mut ProgressReporter) -> Result<Vec<ExceptionInfo>> {
        if self.records.is_empty() {
            return Ok(Vec::new());
        }
        progress.start();

        let records = self.repo.records()?;
        if let Some(missing) = self.records.iter().find(|r| !records.contains(*r)) {
            return Err(KeepsakeError::RecordNotFound(missing.name().to_string()));
        }
        let (removed, remaining): (Vec<RecordInfo>, Vec<RecordInfo>) =
            records.into_iter().partition(|r| self.records.contains(r));

        let workers = self.repo.options().parallel_workers;
        let live = collect_hashes(&self.repo, &remaining, workers)?;
        let dead = collect_hashes(&self.repo, &removed, workers)?;
        let doomed: Vec<&String> = dead.iter().filter(|h| !live.contains(*h)).collect();
        debug!(
            "{} blobs referenced by removed records, {} of them unreferenced",
            dead.len(),
            doomed.len()
        );

        let store = self.repo.blob_store();
        let mut exceptions = Vec::new();
        progress.set_total(doomed.len() + removed.len());

        for hash in doomed {
            if let Err(e) = store.delete(hash) {
                let path = store.blob_path(hash).unwrap_or_else(|_| store.root().to_path_buf());
                warn!("Failed to delete blob {:?}: {}", path, e);
                exceptions.push(ExceptionInfo::file(path, e));
            }
            progress.advance(1);
        }
        store.prune_empty_prefixes();

        for record in &removed {
            let path = self.repo.index_path_of(record);
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to delete index {:?}: {}", path, e);
                exceptions.push(ExceptionInfo::file(path, e));
            }
            progress.advance(1);
        }

        self.repo.rewrite_records(&remaining)?;
        info!(
            "Removed {} records, {} remain, {} failures",
            removed.len(),
            remaining.len(),
            exceptions.len()
        );
        Ok(exceptions)
    }
}

impl Task for VersioningRemoveTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Remove
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

/// Every hash referenced by `records`, loading their indexes in parallel
fn collect_hashes(repo: &VersioningBackup, records: &[RecordInfo], workers: usize) -> Result<HashSet<String>> {
    let hashes = Mutex::new(HashSet::default());
    let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;
    pool.install(|| {
        records.par_iter().try_for_each(|record| -> Result<()> {
            let index = repo.index_of(record)?;
            let mut local = Vec::with_capacity(index.file_count());
            for (path, file) in index.all_file_info() {
                let hash = file.hash().ok_or_else(|| KeepsakeError::MissingHash(path))?;
                local.push(hash.to_string());
            }
            hashes.lock().extend(local);
            Ok(())
        })
    })?;
    Ok(hashes.into_inner())
}
