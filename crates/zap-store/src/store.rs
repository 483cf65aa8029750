use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use zap_core::merge_shallow;

use crate::backend::CollectionBackend;
use crate::{Collection, StoreError, StoreResult};

type Records = BTreeMap<String, Value>;

/// Result of loading one collection from durable storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Missing,
    Empty,
    Loaded { records: usize },
    Recovered { backup: String },
    Unreadable { reason: String },
}

/// Collections written and failed by a multi-collection flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub flushed: Vec<Collection>,
    pub failed: Vec<Collection>,
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub records: BTreeMap<Collection, usize>,
    pub dirty: Vec<Collection>,
}

#[derive(Debug, Default)]
struct StoreInner {
    collections: BTreeMap<Collection, Records>,
    dirty: BTreeSet<Collection>,
    revisions: BTreeMap<Collection, u64>,
    /// Corrupt content whose backup failed; it must be preserved before the
    /// collection may be written over.
    unpreserved: BTreeMap<Collection, String>,
}

impl StoreInner {
    fn records_mut(&mut self, collection: Collection) -> &mut Records {
        self.collections.entry(collection).or_default()
    }

    fn touch(&mut self, collection: Collection) {
        self.dirty.insert(collection);
        *self.revisions.entry(collection).or_insert(0) += 1;
    }

    fn revision(&self, collection: Collection) -> u64 {
        self.revisions.get(&collection).copied().unwrap_or(0)
    }
}

/// In-memory mirror of every collection backed by a durable backend.
///
/// All mutations go through a single `RwLock`, so updates to one key are
/// applied in call order. Backend writes are serialized by `write_lock`.
pub struct MirrorStore {
    backend: Arc<dyn CollectionBackend>,
    inner: RwLock<StoreInner>,
    write_lock: Mutex<()>,
    full_flush_running: AtomicBool,
}

struct FullFlushGuard<'a>(&'a AtomicBool);

impl Drop for FullFlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl MirrorStore {
    pub fn new(backend: Arc<dyn CollectionBackend>) -> Self {
        Self {
            backend,
            inner: RwLock::new(StoreInner::default()),
            write_lock: Mutex::new(()),
            full_flush_running: AtomicBool::new(false),
        }
    }

    pub async fn get(&self, collection: Collection, key: &str) -> Option<Value> {
        let inner = self.inner.read().await;
        inner
            .collections
            .get(&collection)
            .and_then(|records| records.get(key))
            .cloned()
    }

    pub async fn contains(&self, collection: Collection, key: &str) -> bool {
        let inner = self.inner.read().await;
        inner
            .collections
            .get(&collection)
            .is_some_and(|records| records.contains_key(key))
    }

    pub async fn keys(&self, collection: Collection) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .collections
            .get(&collection)
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn len(&self, collection: Collection) -> usize {
        let inner = self.inner.read().await;
        inner.collections.get(&collection).map_or(0, Records::len)
    }

    pub async fn is_empty(&self, collection: Collection) -> bool {
        self.len(collection).await == 0
    }

    pub async fn snapshot(&self, collection: Collection) -> BTreeMap<String, Value> {
        let inner = self.inner.read().await;
        inner
            .collections
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Shallow-merges into an existing record, or inserts when absent.
    pub async fn upsert(&self, collection: Collection, key: &str, value: Value) {
        let mut inner = self.inner.write().await;
        match inner.records_mut(collection).entry(key.to_string()) {
            Entry::Occupied(mut existing) => merge_shallow(existing.get_mut(), value),
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
        }
        inner.touch(collection);
    }

    /// Inserts or overwrites a record without merging.
    pub async fn replace(&self, collection: Collection, key: &str, value: Value) {
        let mut inner = self.inner.write().await;
        inner.records_mut(collection).insert(key.to_string(), value);
        inner.touch(collection);
    }

    pub async fn delete(&self, collection: Collection, key: &str) -> bool {
        let mut inner = self.inner.write().await;
        let removed = inner.records_mut(collection).remove(key).is_some();
        if removed {
            inner.touch(collection);
        }
        removed
    }

    /// Removes every record matching `predicate` and returns how many went.
    pub async fn delete_all<F>(&self, collection: Collection, predicate: F) -> usize
    where
        F: Fn(&str, &Value) -> bool,
    {
        let mut inner = self.inner.write().await;
        let records = inner.records_mut(collection);
        let before = records.len();
        records.retain(|key, value| !predicate(key, value));
        let removed = before - records.len();
        if removed > 0 {
            inner.touch(collection);
        }
        removed
    }

    /// Runs `mutate` against one slot under the write lock. Setting the slot
    /// to `None` removes the record. The collection is marked dirty only when
    /// the slot actually changed.
    pub async fn with_entry<R, F>(&self, collection: Collection, key: &str, mutate: F) -> R
    where
        F: FnOnce(&mut Option<Value>) -> R,
    {
        let mut inner = self.inner.write().await;
        let records = inner.records_mut(collection);
        let before = records.get(key).cloned();
        let mut slot = before.clone();
        let result = mutate(&mut slot);
        if slot != before {
            match slot {
                Some(value) => {
                    records.insert(key.to_string(), value);
                }
                None => {
                    records.remove(key);
                }
            }
            inner.touch(collection);
        }
        result
    }

    /// Swaps a whole collection, used by initial history sync.
    pub async fn replace_collection(&self, collection: Collection, records: Records) {
        let mut inner = self.inner.write().await;
        inner.collections.insert(collection, records);
        inner.touch(collection);
    }

    pub async fn is_dirty(&self, collection: Collection) -> bool {
        self.inner.read().await.dirty.contains(&collection)
    }

    pub async fn dirty_collections(&self) -> Vec<Collection> {
        self.inner.read().await.dirty.iter().copied().collect()
    }

    pub async fn stats(&self) -> StoreStats {
        let inner = self.inner.read().await;
        StoreStats {
            records: Collection::ALL
                .iter()
                .map(|collection| {
                    (
                        *collection,
                        inner.collections.get(collection).map_or(0, Records::len),
                    )
                })
                .collect(),
            dirty: inner.dirty.iter().copied().collect(),
        }
    }

    /// Serializes one collection and hands it to the backend. On failure the
    /// collection stays dirty so the next debounce cycle or autosave retries.
    pub async fn flush(&self, collection: Collection) -> StoreResult<()> {
        let _write_guard = self.write_lock.lock().await;
        self.preserve_pending_backup(collection).await?;
        let (payload, revision) = {
            let inner = self.inner.read().await;
            let empty = Records::new();
            let records = inner.collections.get(&collection).unwrap_or(&empty);
            let mut payload = serde_json::to_string_pretty(records)?;
            payload.push('\n');
            (payload, inner.revision(collection))
        };

        if let Err(error) = self.backend.write(collection, payload).await {
            warn!(
                collection = collection.as_str(),
                location = %self.backend.describe(collection),
                error = %error,
                "collection flush failed; will retry on next cycle"
            );
            return Err(error);
        }

        let mut inner = self.inner.write().await;
        if inner.revision(collection) == revision {
            inner.dirty.remove(&collection);
        }
        debug!(collection = collection.as_str(), "collection flushed");
        Ok(())
    }

    /// Flushes every dirty collection. A second full flush started while one
    /// is running is skipped.
    pub async fn flush_dirty(&self) -> FlushReport {
        if self
            .full_flush_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("full store flush already in progress; skipping");
            return FlushReport {
                skipped: true,
                ..FlushReport::default()
            };
        }
        let _guard = FullFlushGuard(&self.full_flush_running);

        let mut report = FlushReport::default();
        for collection in self.dirty_collections().await {
            match self.flush(collection).await {
                Ok(()) => report.flushed.push(collection),
                Err(_) => report.failed.push(collection),
            }
        }
        report
    }

    /// Reads one collection from the backend. Never fails: unreadable or
    /// corrupt content leaves the collection empty.
    pub async fn load(&self, collection: Collection) -> LoadOutcome {
        let location = self.backend.describe(collection);
        let raw = match self.backend.read(collection).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.install(collection, Records::new(), false).await;
                return LoadOutcome::Missing;
            }
            Err(error) => {
                warn!(
                    collection = collection.as_str(),
                    location = %location,
                    error = %error,
                    "collection unreadable; starting empty"
                );
                self.install(collection, Records::new(), false).await;
                return LoadOutcome::Unreadable {
                    reason: error.to_string(),
                };
            }
        };

        if raw.trim().is_empty() {
            warn!(
                collection = collection.as_str(),
                location = %location,
                "collection file is empty; starting empty"
            );
            self.install(collection, Records::new(), false).await;
            return LoadOutcome::Empty;
        }

        match serde_json::from_str::<Records>(&raw) {
            Ok(records) => {
                let count = records.len();
                self.install(collection, records, false).await;
                info!(
                    collection = collection.as_str(),
                    records = count,
                    "collection loaded"
                );
                LoadOutcome::Loaded { records: count }
            }
            Err(parse_error) => {
                error!(
                    collection = collection.as_str(),
                    location = %location,
                    error = %parse_error,
                    "collection content is corrupt; backing up and starting empty"
                );
                self.install(collection, Records::new(), false).await;
                match self.backend.preserve_backup(collection, raw.clone()).await {
                    Ok(backup) => {
                        warn!(
                            collection = collection.as_str(),
                            backup = %backup,
                            "corrupt collection preserved"
                        );
                        self.inner.write().await.touch(collection);
                        LoadOutcome::Recovered { backup }
                    }
                    Err(backup_error) => {
                        error!(
                            collection = collection.as_str(),
                            error = %backup_error,
                            "failed to preserve corrupt collection; writes are held until a backup succeeds"
                        );
                        self.inner.write().await.unpreserved.insert(collection, raw);
                        LoadOutcome::Unreadable {
                            reason: format!("{parse_error}; backup failed: {backup_error}"),
                        }
                    }
                }
            }
        }
    }

    pub async fn load_all(&self) -> Vec<(Collection, LoadOutcome)> {
        let mut outcomes = Vec::with_capacity(Collection::ALL.len());
        for collection in Collection::ALL {
            outcomes.push((collection, self.load(collection).await));
        }
        outcomes
    }

    /// Retries the backup of corrupt content held from `load`. Callers hold
    /// `write_lock`.
    async fn preserve_pending_backup(&self, collection: Collection) -> StoreResult<()> {
        let Some(raw) = self.inner.read().await.unpreserved.get(&collection).cloned() else {
            return Ok(());
        };
        match self.backend.preserve_backup(collection, raw).await {
            Ok(backup) => {
                warn!(
                    collection = collection.as_str(),
                    backup = %backup,
                    "corrupt collection preserved on retry"
                );
                self.inner.write().await.unpreserved.remove(&collection);
                Ok(())
            }
            Err(error) => {
                warn!(
                    collection = collection.as_str(),
                    error = %error,
                    "corrupt collection still not backed up; flush refused"
                );
                Err(StoreError::BackupPending(collection))
            }
        }
    }

    async fn install(&self, collection: Collection, records: Records, dirty: bool) {
        let mut inner = self.inner.write().await;
        inner.unpreserved.remove(&collection);
        inner.collections.insert(collection, records);
        if dirty {
            inner.touch(collection);
        } else {
            inner.dirty.remove(&collection);
        }
    }
}
