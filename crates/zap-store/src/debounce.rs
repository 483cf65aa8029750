use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::store::{FlushReport, MirrorStore};
use crate::Collection;

pub const DEFAULT_DEBOUNCE_DELAY: Duration = Duration::from_millis(1_000);

struct PendingFlush {
    generation: u64,
    task: JoinHandle<()>,
}

type PendingTimers = HashMap<Collection, PendingFlush>;

fn lock_pending(pending: &Mutex<PendingTimers>) -> MutexGuard<'_, PendingTimers> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Coalesces bursts of mutations into one flush per collection per window.
///
/// Scheduling while a timer is armed cancels it and starts a fresh one, so a
/// burst produces a single flush once the collection has been quiet for the
/// full delay. The flush reads the store at expiry and therefore reflects the
/// latest merged state.
pub struct DebouncedWriter {
    store: Arc<MirrorStore>,
    default_delay: Duration,
    pending: Arc<Mutex<PendingTimers>>,
    next_generation: AtomicU64,
}

impl DebouncedWriter {
    pub fn new(store: Arc<MirrorStore>, default_delay: Duration) -> Self {
        Self {
            store,
            default_delay,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<MirrorStore> {
        &self.store
    }

    pub fn default_delay(&self) -> Duration {
        self.default_delay
    }

    pub fn schedule_flush(&self, collection: Collection) {
        self.schedule_flush_after(collection, self.default_delay);
    }

    /// Must be called from inside a Tokio runtime.
    pub fn schedule_flush_after(&self, collection: Collection, delay: Duration) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let store = Arc::clone(&self.store);
        let pending = Arc::clone(&self.pending);

        // Held across spawn + insert so the timer cannot observe the map
        // before its own marker is in place.
        let mut guard = lock_pending(&self.pending);
        if let Some(previous) = guard.remove(&collection) {
            previous.task.abort();
            debug!(collection = collection.as_str(), "debounce timer restarted");
        }
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut pending = lock_pending(&pending);
                match pending.get(&collection) {
                    Some(entry) if entry.generation == generation => {
                        pending.remove(&collection);
                    }
                    _ => return,
                }
            }
            if let Err(error) = store.flush(collection).await {
                warn!(
                    collection = collection.as_str(),
                    error = %error,
                    "debounced flush failed"
                );
            }
        });
        guard.insert(collection, PendingFlush { generation, task });
    }

    pub fn pending_count(&self) -> usize {
        lock_pending(&self.pending).len()
    }

    pub fn is_pending(&self, collection: Collection) -> bool {
        lock_pending(&self.pending).contains_key(&collection)
    }

    /// Cancels every armed timer and flushes those collections plus anything
    /// still dirty. Used on shutdown.
    pub async fn flush_pending_now(&self) -> FlushReport {
        let drained = {
            let mut pending = lock_pending(&self.pending);
            pending
                .drain()
                .map(|(collection, entry)| {
                    entry.task.abort();
                    collection
                })
                .collect::<BTreeSet<_>>()
        };

        let mut targets = drained;
        targets.extend(self.store.dirty_collections().await);

        let mut report = FlushReport::default();
        for collection in targets {
            match self.store.flush(collection).await {
                Ok(()) => report.flushed.push(collection),
                Err(_) => report.failed.push(collection),
            }
        }
        report
    }
}

impl Drop for DebouncedWriter {
    fn drop(&mut self) {
        for (_, entry) in lock_pending(&self.pending).drain() {
            entry.task.abort();
        }
    }
}
