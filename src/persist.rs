//! Structured metadata files
//!
//! Indexes, record lists and ignore rules are stored as JSON documents with
//! keys kept in insertion order. Every write goes through a temporary file
//! and a rename, so a crash leaves either the previous document or the new
//! one. A file that is empty (or only whitespace) reads back as "no content",
//! which is how freshly created repositories and cleared mirrors look on disk.
//!
//! ## Documents
//!
//! ```text
//! index   {"Dir": null, "SubIndexes": [...], "Files": [...]}
//! record  {"<name>": {"Created": "<ticks>", "Comment": "..." | null}, ...}
//! ignore  {"Dirs": ["..."], "Files": ["..."]}
//! ```
//!
//! Timestamps are written as decimal strings counting nanoseconds since the
//! Unix epoch, through the [`timestamp`] serde hook.
//!
//! Writers hold a process-wide exclusive lock; readers share it, so parallel
//! index loads do not block each other.

use crate::error::{KeepsakeError, Result};
use crate::index::Index;
use crate::types::{Ignore, RecordInfo};
use parking_lot::{const_rwlock, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use tracing::trace;

static STORE_LOCK: RwLock<()> = const_rwlock(());

const CREATED_KEY: &str = "Created";
const COMMENT_KEY: &str = "Comment";

/// Serde hook storing `DateTime<Utc>` as a nanosecond tick string
pub mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    const NANOS_PER_SEC: i128 = 1_000_000_000;

    /// Ticks for a timestamp
    pub fn to_ticks(dt: &DateTime<Utc>) -> String {
        let ticks = i128::from(dt.timestamp()) * NANOS_PER_SEC + i128::from(dt.timestamp_subsec_nanos());
        ticks.to_string()
    }

    /// Timestamp for a tick string, `None` if malformed or out of range
    pub fn from_ticks(s: &str) -> Option<DateTime<Utc>> {
        let ticks: i128 = s.trim().parse().ok()?;
        let secs = i64::try_from(ticks.div_euclid(NANOS_PER_SEC)).ok()?;
        let nanos = u32::try_from(ticks.rem_euclid(NANOS_PER_SEC)).ok()?;
        DateTime::from_timestamp(secs, nanos)
    }

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_ticks(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        from_ticks(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp ticks: {:?}", raw)))
    }
}

/// Read a document, `None` if the file is empty
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let _guard = STORE_LOCK.read();
    let text = fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&text)?))
}

/// Write a document, or truncate the file to empty for `None`
pub fn write_document<T: Serialize>(path: &Path, value: Option<&T>) -> Result<()> {
    let body = match value {
        Some(v) => serde_json::to_vec_pretty(v)?,
        None => Vec::new(),
    };
    let _guard = STORE_LOCK.write();
    crate::utils::atomic_write(path, &body)?;
    trace!("Wrote {} bytes to {:?}", body.len(), path);
    Ok(())
}

/// Read a snapshot index
pub fn read_index(path: &Path) -> Result<Option<Index>> {
    read_document(path)
}

/// Write a snapshot index (`None` clears the file)
pub fn write_index(path: &Path, index: Option<&Index>) -> Result<()> {
    write_document(path, index)
}

/// Read the record list in stored order, `None` for an empty file
///
/// # Errors
///
/// - [`KeepsakeError::BrokenRepository`] if an entry is malformed, carries an
///   invalid name, or repeats another entry's name ignoring case
pub fn read_records(path: &Path) -> Result<Option<Vec<RecordInfo>>> {
    let Some(doc) = read_document::<Map<String, Value>>(path)? else {
        return Ok(None);
    };

    let mut records: Vec<RecordInfo> = Vec::with_capacity(doc.len());
    for (name, entry) in doc {
        let created = entry
            .get(CREATED_KEY)
            .and_then(Value::as_str)
            .and_then(timestamp::from_ticks)
            .ok_or_else(|| KeepsakeError::broken(format!("record {:?} has no valid creation time", name)))?;
        let comment = match entry.get(COMMENT_KEY) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                return Err(KeepsakeError::broken(format!("record {:?} has a malformed comment", name)));
            }
        };
        let record = RecordInfo::with_details(name.as_str(), created, comment)
            .map_err(|_| KeepsakeError::broken(format!("record name {:?} is invalid", name)))?;
        if records.contains(&record) {
            return Err(KeepsakeError::broken(format!("record {:?} appears twice", name)));
        }
        records.push(record);
    }
    Ok(Some(records))
}

/// Write the record list, one key per record
pub fn write_records(path: &Path, records: &[RecordInfo]) -> Result<()> {
    if records.is_empty() {
        return write_document::<Value>(path, None);
    }
    let mut doc = Map::new();
    for record in records {
        let mut entry = Map::new();
        entry.insert(CREATED_KEY.to_string(), Value::String(timestamp::to_ticks(&record.created())));
        entry.insert(
            COMMENT_KEY.to_string(),
            record.comment().map_or(Value::Null, |c| Value::String(c.to_string())),
        );
        doc.insert(record.name().to_string(), Value::Object(entry));
    }
    write_document(path, Some(&Value::Object(doc)))
}

/// Read ignore rules; a missing or empty file means no rules
pub fn read_ignore(path: &Path) -> Result<Ignore> {
    if !path.exists() {
        return Ok(Ignore::default());
    }
    Ok(read_document(path)?.unwrap_or_default())
}

/// Write ignore rules
pub fn write_ignore(path: &Path, ignore: &Ignore) -> Result<()> {
    write_document(path, Some(ignore))
}
