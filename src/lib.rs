//! # Keepsake - Mirroring and versioning directory backups
//!
//! A backup engine that snapshots a directory tree into a repository and
//! restores it later, either as a single live mirror or as a history of
//! named records over deduplicated content.
//!
//! ## Overview
//!
//! Keepsake works in three steps:
//! - Scan a target directory into an [`Index`], a tree of directory and file
//!   metadata, optionally with SHA-1 content hashes
//! - Compare that snapshot with what the repository already holds, using
//!   pluggable equality policies ([`FileComparer`], [`DirComparer`])
//! - Apply only the differences, as a one-shot [`Task`] with progress
//!   reporting and per-item failure collection
//!
//! ## Repository kinds
//!
//! - **Mirroring** ([`MirroringBackup`]): `mirror/` holds a plain copy of the
//!   target. Every backup deletes what vanished and copies what is new or
//!   changed. There is at most one record.
//! - **Versioning** ([`VersioningBackup`]): each backup adds a record with its
//!   own index. Contents are stored once in `blob/<2 hex>/<38 hex>`, named by
//!   their SHA-1, and shared by every record and path that refers to them.
//!   Removing records deletes only blobs no remaining record needs.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use keepsake::{BackupOptions, RecordInfo, RestoreTarget, Task, VersioningBackup};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Create a repository and take a first snapshot
//! let repo = VersioningBackup::create("./backups/project", BackupOptions::default())?;
//! let failures = repo
//!     .backup_task("./project", RecordInfo::new("initial")?)
//!     .execute()?;
//! for failure in &failures {
//!     eprintln!("skipped {}", failure);
//! }
//!
//! // Restore it somewhere else
//! let record = repo.latest_record()?.expect("just created");
//! let index = repo.index_of(&record)?;
//! repo.restore_task("./restored", RestoreTarget::Index(index)).execute()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Running tasks in the background
//!
//! ```rust,no_run
//! use keepsake::queue::{QueueListener, TaskId, TaskQueue};
//! use keepsake::{Backup, MirroringBackup, BackupOptions, ProgressEvent, RecordInfo};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl QueueListener for Printer {
//!     fn on_progress(&self, id: TaskId, event: ProgressEvent) {
//!         if let Some(pct) = event.percentage() {
//!             println!("{}: {:.0}%", id, pct);
//!         }
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let repo = MirroringBackup::open("./backups/photos", BackupOptions::default())?;
//! let queue = TaskQueue::new(Arc::new(Printer))?;
//! queue.push(
//!     "photos",
//!     repo.generate_backup_task(Path::new("./photos"), RecordInfo::new("photos")?),
//! );
//! queue.wait_idle();
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Fatal problems (a duplicate record name, a broken repository layout) come
//! back as `Err(KeepsakeError)` and leave the repository's records and
//! indexes as they were. Problems with single files or directories are
//! collected as [`ExceptionInfo`]s; the entry is left out of the new snapshot
//! and the task continues.
//!
//! ## Module Organization
//!
//! - [`types`]: Snapshot entries, records, ignore rules, options
//! - [`index`]: The snapshot tree
//! - [`builder`]: Directory scanning and hashing
//! - [`comparer`]: Equality policies
//! - [`diff`]: Set operations between snapshots
//! - [`persist`]: JSON metadata files
//! - [`storage`]: Content-addressed blob store
//! - [`repository`], [`mirroring`], [`versioning`]: Repository handles
//! - [`task`]: Backup, remove and restore tasks
//! - [`queue`]: Serial task queue
//! - [`error`]: Error types and handling

// Public API modules
pub mod builder;
pub mod comparer;
pub mod diff;
pub mod error;
pub mod hash;
pub mod index;
pub mod mirroring;
pub mod persist;
pub mod queue;
pub mod repository;
pub mod storage;
pub mod task;
pub mod types;
pub mod versioning;

// Internal modules (not part of public API)
mod collections;
mod utils;

// Re-export main types for convenience
pub use builder::IndexBuilder;
pub use comparer::{DirComparer, FileComparer, GeneralDirComparer, LooseFileComparer, TightFileComparer};
pub use diff::FileGroup;
pub use error::{KeepsakeError, Result};
pub use index::Index;
pub use mirroring::MirroringBackup;
pub use queue::{CompletedTask, QueueListener, TaskId, TaskQueue};
pub use repository::{open_repository, Backup, RepoKind, RestoreTarget};
pub use storage::BlobStore;
pub use task::{Task, TaskKind};
pub use types::*;
pub use versioning::VersioningBackup;
