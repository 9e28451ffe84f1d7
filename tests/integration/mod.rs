//! Integration tests for Keepsake
//!
//! Drives both repository kinds through realistic sequences of edits,
//! backups, restores and record removals, and checks the repository on disk
//! after every step.

use ::keepsake::*;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::info;

/// Relative path to content for every regular file under `root`
pub fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            (rel, fs::read(e.path()).unwrap())
        })
        .collect()
}

/// Every relative directory path under `root`
pub fn dir_snapshot(root: &Path) -> Vec<String> {
    let mut dirs: Vec<String> = walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    dirs.sort();
    dirs
}

/// Blob hashes a versioning repository needs to restore every record
pub fn referenced_hashes(repo: &VersioningBackup) -> HashSet<String> {
    let mut hashes = HashSet::new();
    for record in repo.records().unwrap() {
        let index = repo.index_of(&record).unwrap();
        for (_, file) in index.all_file_info() {
            hashes.insert(file.hash().unwrap().to_string());
        }
    }
    hashes
}

pub fn sorted(hashes: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut hashes: Vec<String> = hashes.into_iter().collect();
    hashes.sort();
    hashes
}

/// Test harness for multi-step backup scenarios
pub struct BackupTestHarness {
    pub work_dir: TempDir,
    pub target: PathBuf,
    generation: usize,
}

impl BackupTestHarness {
    pub fn new() -> Self {
        let work_dir = TempDir::new().unwrap();
        let target = work_dir.path().join("target");
        fs::create_dir(&target).unwrap();
        Self {
            work_dir,
            target,
            generation: 0,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.work_dir.path().join(name)
    }

    pub fn write(&self, rel: &str, content: impl AsRef<[u8]>) {
        let path = self.target.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    /// Nested project with `depth` levels of `width` directories, each
    /// holding `files` files
    pub fn generate_project(&mut self, depth: usize, width: usize, files: usize) {
        for level in 1..=depth {
            for d in 0..width {
                let dir: PathBuf = (0..level).map(|l| format!("dir_{}_{}", l, d)).collect();
                for f in 0..files {
                    let rel = dir.join(format!("file_{}.txt", f));
                    let content = format!("level {} dir {} file {}", level, d, f);
                    self.write(&rel.to_string_lossy(), content.repeat(f + 1));
                }
            }
        }
    }

    /// Modify some files, delete some, add new ones
    ///
    /// Rewritten files change size every generation so the size and mtime
    /// comparison always notices them.
    pub fn mutate(&mut self) {
        self.generation += 1;
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(&self.target)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        files.sort();

        for (i, file) in files.iter().enumerate() {
            match (i + self.generation) % 5 {
                0 => {
                    let content = format!("rewritten {}", "+".repeat(self.generation));
                    fs::write(file, content).unwrap();
                }
                1 if self.generation % 2 == 0 => fs::remove_file(file).unwrap(),
                _ => {}
            }
        }
        self.write(
            &format!("added/gen_{}.txt", self.generation),
            format!("new file {}", self.generation),
        );
    }
}

impl Default for BackupTestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[test]
fn test_versioning_history_restores_every_record() {
    let mut harness = BackupTestHarness::new();
    harness.generate_project(3, 3, 4);

    let repo = VersioningBackup::create(harness.path("repo"), BackupOptions::default()).unwrap();
    let mut expected = Vec::new();
    for round in 0..5 {
        let record = RecordInfo::new(format!("round {}", round)).unwrap();
        let failures = repo.backup_task(&harness.target, record.clone()).execute().unwrap();
        assert!(failures.is_empty());
        expected.push((record, snapshot(&harness.target)));
        harness.mutate();
    }
    info!("Created {} records", expected.len());

    assert_eq!(repo.records().unwrap().len(), 5);
    assert_eq!(sorted(repo.blob_hashes().unwrap()), sorted(referenced_hashes(&repo)));

    for (record, files) in &expected {
        let restored = harness.path(&format!("restore {}", record.name()));
        let index = repo.index_of(record).unwrap();
        let failures = repo
            .restore_task(&restored, RestoreTarget::Index(index))
            .execute()
            .unwrap();
        assert!(failures.is_empty());
        assert_eq!(&snapshot(&restored), files, "record {}", record);
    }
}

#[test]
fn test_versioning_garbage_collection_keeps_live_blobs() {
    let mut harness = BackupTestHarness::new();
    harness.generate_project(2, 3, 3);

    let repo = VersioningBackup::create(harness.path("repo"), BackupOptions::default()).unwrap();
    let mut records = Vec::new();
    for round in 0..4 {
        let record = RecordInfo::new(format!("r{}", round)).unwrap();
        repo.backup_task(&harness.target, record.clone()).execute().unwrap();
        records.push((record, snapshot(&harness.target)));
        harness.mutate();
    }

    // Remove the oldest and a middle record in one task
    let doomed = vec![records[0].0.clone(), records[2].0.clone()];
    let failures = repo.remove_task(doomed).execute().unwrap();
    assert!(failures.is_empty());

    let remaining = repo.records().unwrap();
    assert_eq!(
        remaining.iter().map(|r| r.name()).collect::<Vec<_>>(),
        vec!["r1", "r3"]
    );
    assert!(!repo.index_path_of(&records[0].0).exists());
    assert!(!repo.index_path_of(&records[2].0).exists());

    assert_eq!(sorted(repo.blob_hashes().unwrap()), sorted(referenced_hashes(&repo)));

    // Empty prefix directories were pruned
    for prefix in repo.blob_prefixes().unwrap() {
        assert!(fs::read_dir(repo.blob_path().join(&prefix)).unwrap().next().is_some());
    }

    // Survivors still restore byte for byte
    for (record, files) in [&records[1], &records[3]] {
        let restored = harness.path(&format!("restore {}", record.name()));
        let index = repo.index_of(record).unwrap();
        repo.restore_task(&restored, RestoreTarget::Index(index)).execute().unwrap();
        assert_eq!(&snapshot(&restored), files);
    }

    // Removing the rest empties the store
    repo.remove_task(remaining).execute().unwrap();
    assert!(repo.records().unwrap().is_empty());
    assert!(repo.blob_hashes().unwrap().is_empty());
}

#[test]
fn test_identical_contents_share_one_blob() -> anyhow::Result<()> {
    let harness = BackupTestHarness::new();
    harness.write("a.txt", "same bytes");
    harness.write("nested/b.txt", "same bytes");
    harness.write("c.txt", "other bytes");

    let repo = VersioningBackup::create(harness.path("repo"), BackupOptions::default())?;
    let first = RecordInfo::new("first")?;
    repo.backup_task(&harness.target, first.clone()).execute()?;
    assert_eq!(repo.blob_hashes()?.len(), 2);

    // An unchanged second record adds no blobs
    let second = RecordInfo::new("second")?;
    repo.backup_task(&harness.target, second.clone()).execute()?;
    assert_eq!(repo.blob_hashes()?.len(), 2);

    let index = repo.index_of(&second)?;
    let a = index
        .file_at(Path::new("a.txt"))
        .ok_or_else(|| anyhow::anyhow!("a.txt missing from index"))?;
    let b = index
        .file_at(Path::new("nested/b.txt"))
        .ok_or_else(|| anyhow::anyhow!("nested/b.txt missing from index"))?;
    assert_eq!(a.hash(), b.hash());
    assert!(repo.blob_store().contains(a.hash().unwrap_or_default()));

    // Dropping one record keeps the shared blob for the other
    repo.remove_task(vec![first]).execute()?;
    assert_eq!(repo.blob_hashes()?.len(), 2);
    Ok(())
}

#[test]
fn test_mirroring_follows_the_target() {
    let harness = BackupTestHarness::new();
    harness.write("A/x.txt", "x");
    harness.write("B.txt", "b");

    let repo = MirroringBackup::create(harness.path("repo"), BackupOptions::default()).unwrap();
    let record = RecordInfo::new("mirror").unwrap();
    repo.backup_task(&harness.target, record.clone()).execute().unwrap();
    assert_eq!(snapshot(&repo.mirror_path()), snapshot(&harness.target));
    assert_eq!(dir_snapshot(&repo.mirror_path()), vec!["A"]);

    // Deleting A/ on the target deletes it from the mirror
    fs::remove_dir_all(harness.target.join("A")).unwrap();
    harness.write("C/D/y.txt", "y");
    let failures = repo.backup_task(&harness.target, record.clone()).execute().unwrap();
    assert!(failures.is_empty());
    assert_eq!(snapshot(&repo.mirror_path()), snapshot(&harness.target));
    assert_eq!(dir_snapshot(&repo.mirror_path()), vec!["C", "C/D"]);

    let index = repo.index().unwrap().unwrap();
    assert!(index.file_at(Path::new("C/D/y.txt")).is_some());
    assert!(index.node(Path::new("A")).is_none());
    assert_eq!(repo.record_info().unwrap(), Some(record.clone()));

    // An unchanged rerun has nothing to do
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let mut task = repo.backup_task(&harness.target, record);
    task.set_progress_callback(Arc::new(move |e: ProgressEvent| sink.lock().push(e)));
    assert!(task.execute().unwrap().is_empty());
    let last = *events.lock().last().unwrap();
    assert_eq!((last.total, last.completed), (2, 2));
    assert_eq!(repo.index().unwrap().unwrap(), index);
}

#[test]
fn test_mirroring_repeated_mutations() {
    let mut harness = BackupTestHarness::new();
    harness.generate_project(2, 2, 3);

    let repo = MirroringBackup::create(harness.path("repo"), BackupOptions::default()).unwrap();
    for round in 0..4 {
        let record = RecordInfo::new(format!("round {}", round)).unwrap();
        repo.backup_task(&harness.target, record).execute().unwrap();
        assert_eq!(snapshot(&repo.mirror_path()), snapshot(&harness.target), "round {}", round);
        harness.mutate();
    }

    // The stored record is always the last one
    assert!(repo.record_info().unwrap().unwrap().is_named("ROUND 3"));

    // Restoring a subtree from the mirror
    let index = repo.index().unwrap().unwrap();
    let restored = harness.path("restored");
    repo.restore_task(&restored, RestoreTarget::Index(index.node(Path::new("dir_0_0")).unwrap().clone()))
        .execute()
        .unwrap();
    let sub = snapshot(&repo.mirror_path().join("dir_0_0"));
    assert!(!sub.is_empty());
    assert_eq!(snapshot(&restored), sub);
}

#[test]
fn test_ignore_rules_survive_reopen() {
    let harness = BackupTestHarness::new();
    harness.write("keep.txt", "keep");
    harness.write("cache/blob.bin", "junk");
    harness.write("secret.txt", "hidden");

    let repo_path = harness.path("repo");
    {
        let repo = VersioningBackup::create(&repo_path, BackupOptions::default()).unwrap();
        let mut ignore = Ignore::new();
        ignore.insert_dir("cache");
        ignore.insert_file("secret.txt");
        repo.set_ignore(&ignore).unwrap();
    }

    let repo = VersioningBackup::open(&repo_path, BackupOptions::default()).unwrap();
    assert_eq!(repo.ignore().unwrap().files().len(), 1);
    let record = RecordInfo::new("filtered").unwrap();
    repo.backup_task(&harness.target, record.clone()).execute().unwrap();

    let index = repo.index_of(&record).unwrap();
    let names: Vec<String> = index
        .all_file_info()
        .into_iter()
        .map(|(path, _)| path.to_string_lossy().replace('\\', "/"))
        .collect();
    assert_eq!(names, vec!["keep.txt"]);
    assert!(index.node(Path::new("cache")).is_none());

    repo.remove_ignore().unwrap();
    assert!(repo.ignore().unwrap().is_empty());
}

#[test]
fn test_progress_reaches_total() {
    let mut harness = BackupTestHarness::new();
    harness.generate_project(2, 2, 2);

    let repo = VersioningBackup::create(harness.path("repo"), BackupOptions::default()).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    let mut task = repo.backup_task(&harness.target, RecordInfo::new("progress").unwrap());
    task.set_progress_callback(Arc::new(move |e: ProgressEvent| sink.lock().push(e)));
    task.execute().unwrap();

    let events = events.lock();
    let last = events.last().unwrap();
    assert!(!last.is_progressing);
    assert_eq!(last.completed, last.total);
    assert!(last.total > 0);
    assert!(events.windows(2).all(|w| !w[0].is_determinate
        || !w[1].is_determinate
        || w[0].completed <= w[1].completed));
}

#[derive(Default)]
struct RecordingListener {
    completed: Mutex<Vec<CompletedTask>>,
    progress_events: Mutex<usize>,
}

impl QueueListener for RecordingListener {
    fn on_progress(&self, _id: TaskId, _event: ProgressEvent) {
        *self.progress_events.lock() += 1;
    }

    fn on_completed(&self, task: &CompletedTask) {
        self.completed.lock().push(task.clone());
    }
}

#[test]
fn test_queue_runs_backup_then_restore() {
    let mut harness = BackupTestHarness::new();
    harness.generate_project(2, 2, 2);

    let repo = VersioningBackup::create(harness.path("repo"), BackupOptions::default()).unwrap();
    let listener = Arc::new(RecordingListener::default());
    let mut queue = TaskQueue::new(listener.clone()).unwrap();

    let record = RecordInfo::new("queued").unwrap();
    let backup_id = queue.push("backup", repo.generate_backup_task(&harness.target, record.clone()));
    // A second backup under the same name faults without stopping the queue
    let dup_id = queue.push("duplicate", repo.generate_backup_task(&harness.target, record.clone()));
    queue.wait_idle();

    let index = repo.index_of(&record).unwrap();
    let restored = harness.path("restored");
    queue.push(
        "restore",
        repo.generate_restore_task(&restored, RestoreTarget::Index(index)),
    );
    queue.wait_idle();
    queue.shutdown();

    let completed = listener.completed.lock();
    assert_eq!(completed.len(), 3);
    assert_eq!(completed[0].id, backup_id);
    assert!(!completed[0].is_faulted);
    assert_eq!(completed[1].id, dup_id);
    assert!(completed[1].is_faulted);
    assert_eq!(completed[2].kind, TaskKind::Restore);
    assert!(*listener.progress_events.lock() > 0);

    assert_eq!(snapshot(&restored), snapshot(&harness.target));
}
