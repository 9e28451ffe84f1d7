//! Main test module for Keepsake
//!
//! This module includes all test suites:
//! - Integration tests for complete backup scenarios
//! - Property-based tests for invariants
//! - Edge cases for repository and task misuse

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::keepsake::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("empty");
        fs::create_dir(&target).unwrap();

        let repo = VersioningBackup::create(temp_dir.path().join("repo"), BackupOptions::default()).unwrap();
        let record = RecordInfo::new("Empty").unwrap();
        assert!(repo.backup_task(&target, record.clone()).execute().unwrap().is_empty());

        let index = repo.index_of(&record).unwrap();
        assert_eq!(index.file_count(), 0);
        assert!(repo.blob_hashes().unwrap().is_empty());

        // Restoring an empty record still creates the restore root
        let restored = temp_dir.path().join("restored");
        repo.restore_task(&restored, RestoreTarget::Index(index)).execute().unwrap();
        assert!(restored.is_dir());
        assert_eq!(fs::read_dir(&restored).unwrap().count(), 0);
    }

    #[test]
    fn test_special_filenames() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target");
        fs::create_dir_all(target.join("dir with spaces")).unwrap();

        let names = [
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file_with_underscores.txt",
            "file.multiple.dots.txt",
            "UPPERCASE.TXT",
            "文件.txt",
            "dir with spaces/inner #1.txt",
        ];
        for name in &names {
            fs::write(target.join(name), format!("content of {}", name)).unwrap();
        }

        let repo = VersioningBackup::create(temp_dir.path().join("repo"), BackupOptions::default()).unwrap();
        let record = RecordInfo::new("special").unwrap();
        assert!(repo.backup_task(&target, record.clone()).execute().unwrap().is_empty());

        let restored = temp_dir.path().join("restored");
        let index = repo.index_of(&record).unwrap();
        repo.restore_task(&restored, RestoreTarget::Index(index)).execute().unwrap();
        for name in &names {
            assert_eq!(
                fs::read_to_string(restored.join(name)).unwrap(),
                format!("content of {}", name)
            );
        }
    }

    #[test]
    fn test_duplicate_record_name_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("a.txt"), "a").unwrap();

        let repo = VersioningBackup::create(temp_dir.path().join("repo"), BackupOptions::default()).unwrap();
        repo.backup_task(&target, RecordInfo::new("Daily").unwrap()).execute().unwrap();

        fs::write(target.join("b.txt"), "b").unwrap();
        let result = repo.backup_task(&target, RecordInfo::new("daily").unwrap()).execute();
        assert!(matches!(result, Err(KeepsakeError::DuplicateRecord(_))));

        // Nothing from the rejected run reached the repository
        assert_eq!(repo.records().unwrap().len(), 1);
        assert_eq!(repo.blob_hashes().unwrap().len(), 1);
    }

    #[test]
    fn test_task_runs_only_once() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target");
        fs::create_dir(&target).unwrap();

        let repo = MirroringBackup::create(temp_dir.path().join("repo"), BackupOptions::default()).unwrap();
        let mut task = repo.backup_task(&target, RecordInfo::new("once").unwrap());
        assert!(!task.is_completed());
        task.execute().unwrap();
        assert!(task.is_completed());
        assert!(matches!(task.execute(), Err(KeepsakeError::TaskAlreadyCompleted)));
    }

    #[test]
    fn test_create_requires_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("stray.txt"), "x").unwrap();

        let result = VersioningBackup::create(temp_dir.path(), BackupOptions::default());
        assert!(matches!(result, Err(KeepsakeError::RepositoryNotEmpty(_))));
        let result = MirroringBackup::create(temp_dir.path(), BackupOptions::default());
        assert!(matches!(result, Err(KeepsakeError::RepositoryNotEmpty(_))));
    }

    #[test]
    fn test_open_rejects_missing_layout() {
        let temp_dir = TempDir::new().unwrap();
        let plain = temp_dir.path().join("plain");
        fs::create_dir(&plain).unwrap();

        let err = VersioningBackup::open(&plain, BackupOptions::default()).unwrap_err();
        assert!(err.is_broken_repository());
        let err = MirroringBackup::open(temp_dir.path().join("missing"), BackupOptions::default()).unwrap_err();
        assert!(err.is_broken_repository());
    }

    #[test]
    fn test_missing_hash_stops_restore_before_writing() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("a.txt"), "a").unwrap();

        let repo = VersioningBackup::create(temp_dir.path().join("repo"), BackupOptions::default()).unwrap();
        let record = RecordInfo::new("r").unwrap();
        repo.backup_task(&target, record.clone()).execute().unwrap();

        // Restore from a hand-built group whose file carries no hash
        let mut index = repo.index_of(&record).unwrap();
        let mut file = index.remove_file("a.txt").unwrap();
        file.sha1 = None;
        let group = FileGroup {
            dir: None,
            files: vec![file],
        };
        let restored = temp_dir.path().join("restored");
        let result = repo.restore_task(&restored, RestoreTarget::Files(group)).execute();
        assert!(matches!(result, Err(KeepsakeError::MissingHash(_))));
        assert!(!restored.exists());
    }

    #[test]
    fn test_remove_unknown_record() {
        let temp_dir = TempDir::new().unwrap();
        let repo = VersioningBackup::create(temp_dir.path().join("repo"), BackupOptions::default()).unwrap();
        let result = repo.remove_task(vec![RecordInfo::new("ghost").unwrap()]).execute();
        assert!(matches!(result, Err(KeepsakeError::RecordNotFound(_))));

        let mirror = MirroringBackup::create(temp_dir.path().join("mirror"), BackupOptions::default()).unwrap();
        let result = mirror.remove_task(vec![RecordInfo::new("ghost").unwrap()]).execute();
        assert!(matches!(result, Err(KeepsakeError::RecordNotFound(_))));
    }

    #[test]
    fn test_invalid_record_names() {
        assert!(matches!(RecordInfo::new(""), Err(KeepsakeError::InvalidRecordName(_))));
        assert!(matches!(RecordInfo::new("a/b"), Err(KeepsakeError::InvalidRecordName(_))));
        assert!(RecordInfo::new("Monday backup").is_ok());
    }
}
