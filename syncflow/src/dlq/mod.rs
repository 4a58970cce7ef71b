//! Dead letter queue for items that failed to sync.
//!
//! One [`DeadLetterQueue`] per entity type. Items are kept as JSON objects,
//! written in batches to `{entity}_{timestamp}.json` files, and can be
//! counted, exported to CSV, or replayed.

mod export;
mod queue;

pub use queue::{count_on_disk, DeadLetterQueue, RetrySummary, ARCHIVE_DIR, DEFAULT_BATCH_SIZE};
