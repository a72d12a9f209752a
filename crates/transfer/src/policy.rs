use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables shared by the planner, the fingerprint engine, the resume store
/// and the retry loop.
///
/// Every field has a default, so a partial JSON object is a valid policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadPolicy {
    /// Lower bound for the chunk size, in bytes.
    pub min_chunk_size: u64,
    /// Upper bound for the chunk size, in bytes.
    pub max_chunk_size: u64,
    /// Consecutive chunk failures tolerated before an upload fails.
    pub max_chunk_retries: u32,
    /// Progress granularity in percent; one chunk covers roughly this much of the file.
    pub percent_precision: f64,
    /// Base retry delay in milliseconds, scaled linearly by the attempt number.
    pub retry_base_ms: u64,
    /// Number of sample windows used for a fingerprint.
    pub fingerprint_windows: u64,
    /// Maximum bytes read per sample window.
    pub fingerprint_max_window: u64,
    /// Files below this size are never fingerprinted (and never resumed).
    pub fingerprint_min_file_size: u64,
    /// Byte budget for the persisted resume store.
    pub store_capacity_bytes: u64,
    /// Resume records older than this are discarded.
    pub store_retention_secs: u64,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            min_chunk_size: 50 * 1024,
            max_chunk_size: 512 * 1024,
            max_chunk_retries: 10,
            percent_precision: 1.0,
            retry_base_ms: 5000,
            fingerprint_windows: 50,
            fingerprint_max_window: 100 * 1024,
            fingerprint_min_file_size: 1024 * 1024,
            store_capacity_bytes: 500 * 1024,
            store_retention_secs: 6 * 60 * 60,
        }
    }
}

impl UploadPolicy {
    /// Delay before re-sending a chunk, given the budget left *after* the
    /// failure was counted.
    ///
    /// Grows linearly: `base * (max - remaining + 1)`.
    pub fn retry_delay(&self, remaining: u32) -> Duration {
        let consumed = self.max_chunk_retries.saturating_sub(remaining) as u64;
        Duration::from_millis(self.retry_base_ms.saturating_mul(consumed + 1))
    }

    /// Retention window for resume records.
    pub fn store_retention(&self) -> Duration {
        Duration::from_secs(self.store_retention_secs)
    }
}
