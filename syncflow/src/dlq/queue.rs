//! Entity-scoped dead letter queue with batched file persistence.

use crate::errors::DlqError;
use crate::utils::{compact_timestamp, format_iso8601, now_utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Default number of items buffered before a batch file is written.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Sub-directory receiving batch files processed by a retry pass.
pub const ARCHIVE_DIR: &str = "archive";

/// Outcome of a retry pass over the on-disk batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySummary {
    /// Items handed to the callback.
    pub retried: usize,
    /// Items the callback accepted.
    pub successful: usize,
}

/// Append-only failure log for one entity type.
///
/// Items are buffered in memory and written as JSON arrays to
/// `{entity}_{timestamp}.json` once the batch is full or on [`flush`].
/// Written files are never modified; a retry pass moves them to `archive/`.
///
/// [`flush`]: DeadLetterQueue::flush
#[derive(Debug)]
pub struct DeadLetterQueue {
    entity: String,
    dir: PathBuf,
    batch_size: usize,
    batch: Mutex<Vec<Value>>,
}

impl DeadLetterQueue {
    /// Creates a queue for `entity`, creating `dir` if needed.
    pub fn new(entity: impl Into<String>, dir: impl Into<PathBuf>) -> Result<Self, DlqError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| DlqError::Write {
            path: dir.clone(),
            source,
        })?;

        Ok(Self {
            entity: entity.into(),
            dir,
            batch_size: DEFAULT_BATCH_SIZE,
            batch: Mutex::new(Vec::new()),
        })
    }

    /// Sets the batch size (minimum 1).
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Returns the entity type.
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Returns the queue directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the batch size.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Returns the number of items not yet written to disk.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.batch.lock().len()
    }

    /// Appends a failed item.
    ///
    /// The item must be a JSON object. A copy is stored with `dlq_timestamp`,
    /// `entity_type` and `batch_id` added. When the batch reaches its size it
    /// is written to a new file; on write failure the items stay buffered.
    pub fn add_item(&self, item: Value) -> Result<(), DlqError> {
        let Value::Object(mut fields) = item else {
            return Err(DlqError::NotAnObject(json_kind(&item).to_string()));
        };

        let now = now_utc();
        fields.insert("dlq_timestamp".to_string(), Value::String(format_iso8601(&now)));
        fields.insert("entity_type".to_string(), Value::String(self.entity.clone()));
        fields.insert("batch_id".to_string(), Value::String(compact_timestamp(&now)));

        let mut batch = self.batch.lock();
        batch.push(Value::Object(fields));
        if batch.len() >= self.batch_size {
            self.write_batch(&mut batch)?;
        }
        Ok(())
    }

    /// Writes the pending batch, if any, to a new file.
    pub fn flush(&self) -> Result<Option<PathBuf>, DlqError> {
        let mut batch = self.batch.lock();
        self.write_batch(&mut batch)
    }

    /// Flushes the pending batch. The queue stays usable afterwards.
    pub fn close(&self) -> Result<(), DlqError> {
        self.flush().map(|_| ())
    }

    /// Counts buffered items plus items in every batch file of this entity.
    ///
    /// Unreadable files are skipped with a warning.
    #[must_use]
    pub fn count(&self) -> usize {
        self.pending() + count_on_disk(&self.dir, &self.entity)
    }

    /// Returns every item: buffered ones first, then batch files in name order.
    #[must_use]
    pub fn items(&self) -> Vec<Value> {
        let mut items = self.batch.lock().clone();
        for path in batch_files(&self.dir, &self.entity) {
            match read_batch_file(&path) {
                Ok(mut file_items) => items.append(&mut file_items),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to read DLQ file"),
            }
        }
        items
    }

    /// Exports every item to a CSV file for manual review.
    ///
    /// Returns `Ok(None)` without creating a file when the queue is empty.
    pub fn export_to_csv(&self, path: impl AsRef<Path>) -> Result<Option<PathBuf>, DlqError> {
        let items = self.items();
        if items.is_empty() {
            info!(entity = %self.entity, "No items in DLQ to export");
            return Ok(None);
        }

        let path = path.as_ref().to_path_buf();
        let rows = super::export::write_csv(&path, &items)?;
        info!(entity = %self.entity, rows, path = %path.display(), "Exported DLQ items");
        Ok(Some(path))
    }

    /// Default export file name, `{entity}_dlq_export_{timestamp}.csv` in the queue directory.
    #[must_use]
    pub fn default_export_path(&self) -> PathBuf {
        self.dir.join(format!(
            "{}_dlq_export_{}.csv",
            self.entity,
            compact_timestamp(&now_utc())
        ))
    }

    /// Replays every on-disk item through `callback`, then archives each file.
    ///
    /// Callback failures are logged and counted as unsuccessful. Files that
    /// cannot be read or moved are logged and left in place. Buffered items
    /// are not replayed.
    pub fn retry_failed_items<F>(&self, mut callback: F) -> RetrySummary
    where
        F: FnMut(&Value) -> anyhow::Result<()>,
    {
        let mut summary = RetrySummary::default();
        let archive = self.dir.join(ARCHIVE_DIR);

        for path in batch_files(&self.dir, &self.entity) {
            let items = match read_batch_file(&path) {
                Ok(items) => items,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to process DLQ file");
                    continue;
                }
            };

            for item in &items {
                summary.retried += 1;
                match callback(item) {
                    Ok(()) => summary.successful += 1,
                    Err(e) => error!(entity = %self.entity, error = %format!("{e:#}"), "Retry failed for item"),
                }
            }

            if let Err(e) = archive_file(&archive, &path) {
                error!(path = %path.display(), error = %e, "Failed to archive DLQ file");
            }
        }

        info!(
            entity = %self.entity,
            retried = summary.retried,
            successful = summary.successful,
            "DLQ retry pass finished"
        );
        summary
    }

    fn write_batch(&self, batch: &mut Vec<Value>) -> Result<Option<PathBuf>, DlqError> {
        if batch.is_empty() {
            return Ok(None);
        }

        let path = self.next_file_path();
        let body = serde_json::to_vec(&*batch)?;
        write_atomic(&path, &body)?;

        info!(
            entity = %self.entity,
            items = batch.len(),
            path = %path.display(),
            "Written items to DLQ"
        );
        batch.clear();
        Ok(Some(path))
    }

    fn next_file_path(&self) -> PathBuf {
        let stamp = now_utc().format("%Y%m%d_%H%M%S_%6f").to_string();
        let base = format!("{}_{stamp}", self.entity);
        let mut path = self.dir.join(format!("{base}.json"));
        let mut suffix = 1;
        while path.exists() {
            path = self.dir.join(format!("{base}_{suffix}.json"));
            suffix += 1;
        }
        path
    }
}

/// Counts items in the batch files of `entity` under `dir`.
///
/// Usable without a queue instance, e.g. to report on queues owned by
/// other components.
#[must_use]
pub fn count_on_disk(dir: &Path, entity: &str) -> usize {
    batch_files(dir, entity)
        .into_iter()
        .map(|path| match read_batch_file(&path) {
            Ok(items) => items.len(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read DLQ file");
                0
            }
        })
        .sum()
}

/// Lists batch files of `entity`, sorted by name.
fn batch_files(dir: &Path, entity: &str) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let prefix = format!("{entity}_");
    let mut files: Vec<PathBuf> = entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| is_batch_file_name(name, &prefix))
        })
        .collect();
    files.sort();
    files
}

fn is_batch_file_name(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(".json"))
        .is_some_and(|stamp| stamp.starts_with(|c: char| c.is_ascii_digit()))
}

fn read_batch_file(path: &Path) -> Result<Vec<Value>, DlqError> {
    let raw = std::fs::read(path)?;
    Ok(serde_json::from_slice(&raw)?)
}

fn write_atomic(path: &Path, body: &[u8]) -> Result<(), DlqError> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, body)
        .and_then(|()| std::fs::rename(&tmp, path))
        .map_err(|source| DlqError::Write {
            path: path.to_path_buf(),
            source,
        })
}

fn archive_file(archive: &Path, path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(archive)?;
    let Some(name) = path.file_name() else {
        return Ok(());
    };
    std::fs::rename(path, archive.join(name))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
