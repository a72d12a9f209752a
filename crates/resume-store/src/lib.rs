//! Resume state for interrupted uploads.
//!
//! One [`ResumeRecord`] per file fingerprint, cached in memory and
//! persisted to a JSON file. The store is the only place upload metadata
//! survives a restart. Every failure is recoverable: the `try_*` methods
//! report it, the plain methods log it and behave as if nothing was saved.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Errors from resume store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(#[from] std::io::Error),

    #[error("corrupt resume store: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Saved state of a partially uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeRecord {
    /// Fingerprint key of the file.
    pub fingerprint: String,
    /// Session id the server knows the upload by.
    pub session_id: String,
    /// URL the chunks were posted to.
    pub upload_url: String,
    /// Last range-report returned by the server.
    pub uploaded_ranges: String,
    pub created_at: DateTime<Utc>,
}

impl ResumeRecord {
    /// Creates a record stamped with the current time.
    pub fn new(
        fingerprint: impl Into<String>,
        session_id: impl Into<String>,
        upload_url: impl Into<String>,
        uploaded_ranges: impl Into<String>,
    ) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            session_id: session_id.into(),
            upload_url: upload_url.into(),
            uploaded_ranges: uploaded_ranges.into(),
            created_at: Utc::now(),
        }
    }
}

/// Age and size limits applied by [`ResumeStore::evict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    /// Maximum size of the serialized store, in bytes.
    pub capacity_bytes: u64,
    /// Records older than this are dropped and never returned.
    pub retention: Duration,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            capacity_bytes: 500 * 1024,
            retention: Duration::from_secs(6 * 60 * 60),
        }
    }
}

/// Fingerprint-keyed resume records (thread-safe).
pub struct ResumeStore {
    path: Option<PathBuf>,
    limits: StoreLimits,
    records: Mutex<HashMap<String, ResumeRecord>>,
}

impl ResumeStore {
    /// Opens the store at `path` and runs eviction.
    ///
    /// An unreadable or corrupt file is logged and replaced by an empty
    /// store.
    pub fn open(path: PathBuf, limits: StoreLimits) -> Self {
        let records = match load_records(&path) {
            Ok(records) => records,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "resume store unreadable, starting empty");
                HashMap::new()
            }
        };
        let store = Self {
            path: Some(path),
            limits,
            records: Mutex::new(records),
        };
        store.evict();
        store
    }

    /// Like [`open`](Self::open) but reports a load failure.
    pub fn try_open(path: PathBuf, limits: StoreLimits) -> Result<Self, StoreError> {
        let records = load_records(&path)?;
        let store = Self {
            path: Some(path),
            limits,
            records: Mutex::new(records),
        };
        store.try_evict()?;
        Ok(store)
    }

    /// A store that lives only as long as the process.
    pub fn in_memory(limits: StoreLimits) -> Self {
        Self {
            path: None,
            limits,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the record for `key`, if present and not expired.
    pub fn get(&self, key: &str) -> Option<ResumeRecord> {
        self.try_get(key).unwrap_or_else(|e| {
            warn!(error = %e, "resume lookup failed");
            None
        })
    }

    /// Saves `record`, or updates the saved ranges of an existing one.
    pub fn put(&self, record: ResumeRecord) {
        if let Err(e) = self.try_put(record) {
            warn!(error = %e, "failed to save resume record");
        }
    }

    /// Removes the record for `key`.
    pub fn delete(&self, key: &str) {
        if let Err(e) = self.try_delete(key) {
            warn!(error = %e, "failed to delete resume record");
        }
    }

    /// Drops expired records, then the oldest records until the store fits
    /// its byte budget. Returns how many records were removed.
    pub fn evict(&self) -> usize {
        self.try_evict().unwrap_or_else(|e| {
            warn!(error = %e, "resume store eviction failed");
            0
        })
    }

    /// `Ok(None)` when nothing is saved for `key` (or `key` is empty).
    pub fn try_get(&self, key: &str) -> Result<Option<ResumeRecord>, StoreError> {
        if key.is_empty() {
            return Ok(None);
        }
        let records = self.lock()?;
        let now = Utc::now();
        Ok(records
            .get(key)
            .filter(|r| !self.is_expired(r, now))
            .cloned())
    }

    pub fn try_put(&self, record: ResumeRecord) -> Result<(), StoreError> {
        if record.fingerprint.is_empty() {
            return Ok(());
        }
        let mut records = self.lock()?;
        let now = Utc::now();
        records.retain(|_, r| !self.is_expired(r, now));
        match records.get_mut(&record.fingerprint) {
            Some(existing) => existing.uploaded_ranges = record.uploaded_ranges,
            None => {
                records.insert(record.fingerprint.clone(), record);
            }
        }
        self.persist(&records)
    }

    pub fn try_delete(&self, key: &str) -> Result<(), StoreError> {
        if key.is_empty() {
            return Ok(());
        }
        let mut records = self.lock()?;
        if records.remove(key).is_some() {
            self.persist(&records)?;
        }
        Ok(())
    }

    pub fn try_evict(&self) -> Result<usize, StoreError> {
        let mut records = self.lock()?;
        let before = records.len();
        let now = Utc::now();
        records.retain(|_, r| !self.is_expired(r, now));

        while !records.is_empty() && serialized_len(&records)? > self.limits.capacity_bytes {
            let oldest = records
                .values()
                .min_by_key(|r| r.created_at)
                .map(|r| r.fingerprint.clone());
            if let Some(key) = oldest {
                records.remove(&key);
            }
        }

        let removed = before - records.len();
        if removed > 0 {
            info!(removed, remaining = records.len(), "evicted resume records");
            self.persist(&records)?;
        }
        Ok(removed)
    }

    /// Number of records currently held, expired ones included.
    pub fn len(&self) -> usize {
        self.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, record: &ResumeRecord, now: DateTime<Utc>) -> bool {
        let Ok(retention) = chrono::Duration::from_std(self.limits.retention) else {
            return false;
        };
        now.checked_sub_signed(retention)
            .is_some_and(|cutoff| record.created_at < cutoff)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, ResumeRecord>>, StoreError> {
        self.records.lock().map_err(|_| {
            StoreError::Unavailable(std::io::Error::other("resume store lock poisoned"))
        })
    }

    /// Writes the current records to disk (no-op for in-memory stores).
    fn persist(&self, records: &HashMap<String, ResumeRecord>) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(records)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        debug!("persisted {} resume record(s) to {:?}", records.len(), path);
        Ok(())
    }
}

fn serialized_len(records: &HashMap<String, ResumeRecord>) -> Result<u64, StoreError> {
    Ok(serde_json::to_vec_pretty(records)?.len() as u64)
}

/// Loads records from a JSON file on disk. A missing file is an empty store.
fn load_records(path: &Path) -> Result<HashMap<String, ResumeRecord>, StoreError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let data = std::fs::read_to_string(path)?;
    let records: HashMap<String, ResumeRecord> = serde_json::from_str(&data)?;
    debug!("loaded {} resume record(s) from {:?}", records.len(), path);
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, ResumeStore) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("resume.json");
        let store = ResumeStore::open(path, StoreLimits::default());
        (tmp, store)
    }

    fn aged(key: &str, hours: i64) -> ResumeRecord {
        ResumeRecord {
            created_at: Utc::now() - chrono::Duration::hours(hours),
            ..ResumeRecord::new(key, "1150000000", "https://up.example/x", "0-99/1000")
        }
    }

    fn write_raw(path: &Path, records: &[ResumeRecord]) {
        let map: HashMap<String, ResumeRecord> = records
            .iter()
            .map(|r| (r.fingerprint.clone(), r.clone()))
            .collect();
        std::fs::write(path, serde_json::to_string_pretty(&map).unwrap()).unwrap();
    }

    #[test]
    fn new_store_empty() {
        let (_tmp, store) = test_store();
        assert!(store.is_empty());
        assert!(store.get("abc").is_none());
    }

    #[test]
    fn put_and_get() {
        let (_tmp, store) = test_store();
        store.put(ResumeRecord::new("abc", "1150000000", "https://u", "0-99/1000"));
        let r = store.get("abc").unwrap();
        assert_eq!(r.session_id, "1150000000");
        assert_eq!(r.uploaded_ranges, "0-99/1000");
    }

    #[test]
    fn put_updates_ranges_only() {
        let (_tmp, store) = test_store();
        store.put(aged("abc", 1));
        let first = store.get("abc").unwrap();

        store.put(ResumeRecord::new("abc", "other-id", "https://other", "0-199/1000"));
        let updated = store.get("abc").unwrap();
        assert_eq!(updated.uploaded_ranges, "0-199/1000");
        assert_eq!(updated.session_id, first.session_id);
        assert_eq!(updated.upload_url, first.upload_url);
        assert_eq!(updated.created_at, first.created_at);
    }

    #[test]
    fn put_over_expired_record_starts_fresh() {
        let store = ResumeStore::in_memory(StoreLimits::default());
        store.put(aged("k", 7));
        assert!(store.get("k").is_none());

        store.put(ResumeRecord::new("k", "1222222222", "https://new", "0-19/100"));
        let record = store.get("k").unwrap();
        assert_eq!(record.session_id, "1222222222");
        assert_eq!(record.upload_url, "https://new");
        assert_eq!(record.uploaded_ranges, "0-19/100");
    }

    #[test]
    fn put_drops_other_expired_records() {
        let store = ResumeStore::in_memory(StoreLimits::default());
        store.put(aged("old", 7));
        store.put(ResumeRecord::new("new", "1", "https://u", "0-1/2"));
        assert_eq!(store.len(), 1);
        assert!(store.get("new").is_some());
    }

    #[test]
    fn empty_key_is_noop() {
        let (_tmp, store) = test_store();
        store.put(ResumeRecord::new("", "1", "https://u", "0-1/2"));
        assert!(store.is_empty());
        assert!(store.try_get("").unwrap().is_none());
        store.delete("");
    }

    #[test]
    fn delete_removes_record() {
        let (_tmp, store) = test_store();
        store.put(ResumeRecord::new("abc", "1", "https://u", "0-1/2"));
        store.delete("abc");
        assert!(store.get("abc").is_none());
    }

    #[test]
    fn persist_and_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("resume.json");

        {
            let store = ResumeStore::open(path.clone(), StoreLimits::default());
            store.put(ResumeRecord::new("k1", "1", "https://a", "0-9/100"));
            store.put(ResumeRecord::new("k2", "2", "https://b", "0-19/100"));
        }

        let store = ResumeStore::open(path, StoreLimits::default());
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("k2").unwrap().upload_url, "https://b");
    }

    #[test]
    fn expired_records_are_never_returned() {
        let (_tmp, store) = test_store();
        store.put(aged("old", 7));
        assert!(store.get("old").is_none());
        assert!(store.try_get("old").unwrap().is_none());
    }

    #[test]
    fn open_evicts_expired_records() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("resume.json");
        write_raw(&path, &[aged("old", 7), aged("fresh", 1)]);

        let store = ResumeStore::open(path.clone(), StoreLimits::default());
        assert_eq!(store.len(), 1);
        assert!(store.get("fresh").is_some());

        // The eviction was written back.
        let reloaded = load_records(&path).unwrap();
        assert!(!reloaded.contains_key("old"));
    }

    #[test]
    fn open_evicts_oldest_first_when_over_capacity() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("resume.json");
        let records = [aged("a", 5), aged("b", 3), aged("c", 1)];
        write_raw(&path, &records);

        // Room for roughly two records.
        let one = serialized_len(&HashMap::from([("c".to_string(), records[2].clone())])).unwrap();
        let limits = StoreLimits {
            capacity_bytes: one * 2 + 16,
            ..StoreLimits::default()
        };
        let store = ResumeStore::open(path, limits);

        assert!(store.get("a").is_none());
        assert!(store.get("b").is_some());
        assert!(store.get("c").is_some());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("resume.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            ResumeStore::try_open(path.clone(), StoreLimits::default()),
            Err(StoreError::Corrupt(_))
        ));
        let store = ResumeStore::open(path, StoreLimits::default());
        assert!(store.is_empty());
    }

    #[test]
    fn unwritable_path_reports_unavailable_but_put_is_silent() {
        let tmp = tempfile::tempdir().unwrap();
        // The store path is a directory, so writes fail.
        let store = ResumeStore::open(tmp.path().to_path_buf(), StoreLimits::default());

        let result = store.try_put(ResumeRecord::new("k", "1", "https://u", "0-1/10"));
        assert!(matches!(result, Err(StoreError::Unavailable(_))));

        // Fail-open variant does not panic or propagate.
        store.put(ResumeRecord::new("k2", "1", "https://u", "0-1/10"));
    }

    #[test]
    fn in_memory_store_round_trips() {
        let store = ResumeStore::in_memory(StoreLimits::default());
        store.put(ResumeRecord::new("k", "1", "https://u", "0-1/10"));
        assert!(store.get("k").is_some());
        store.delete("k");
        assert!(store.is_empty());
    }

    #[test]
    fn concurrent_access_keeps_entries_independent() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(ResumeStore::in_memory(StoreLimits::default()));
        let mut handles = vec![];
        for i in 0..8 {
            let s = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                let key = format!("file-{i}");
                for j in 0..50 {
                    s.put(ResumeRecord::new(&key, i.to_string(), "https://u", format!("0-{j}/100")));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.len(), 8);
        for i in 0..8 {
            let r = store.get(&format!("file-{i}")).unwrap();
            assert_eq!(r.session_id, i.to_string());
            assert_eq!(r.uploaded_ranges, "0-49/100");
        }
    }
}
