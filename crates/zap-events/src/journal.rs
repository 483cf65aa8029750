use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use zap_core::current_unix_timestamp_ms;
use zap_store::{Collection, DebouncedWriter, MirrorStore};

pub const DEFAULT_EVENT_JOURNAL_CAP: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub kind: String,
    pub recorded_at: String,
    #[serde(default)]
    pub payload: Value,
}

/// Bounded, time-ordered log of operational events kept in the `events`
/// collection.
pub struct EventJournal {
    store: Arc<MirrorStore>,
    writer: Arc<DebouncedWriter>,
    cap: usize,
    sequence: AtomicU64,
}

impl EventJournal {
    pub fn new(store: Arc<MirrorStore>, writer: Arc<DebouncedWriter>, cap: usize) -> Self {
        Self {
            store,
            writer,
            cap: cap.max(1),
            sequence: AtomicU64::new(0),
        }
    }

    /// Appends one entry and returns its key. Keys sort chronologically.
    pub async fn record(&self, kind: &str, payload: Value) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) % 1_000_000;
        let key = format!("{:013}-{sequence:06}", current_unix_timestamp_ms());
        let entry = JournalEntry {
            kind: kind.to_string(),
            recorded_at: Utc::now().to_rfc3339(),
            payload,
        };
        let record = serde_json::to_value(&entry).unwrap_or(Value::Null);
        self.store.replace(Collection::Events, &key, record).await;

        let len = self.store.len(Collection::Events).await;
        if len > self.cap {
            for stale in self
                .store
                .keys(Collection::Events)
                .await
                .into_iter()
                .take(len - self.cap)
            {
                self.store.delete(Collection::Events, &stale).await;
            }
        }
        self.writer.schedule_flush(Collection::Events);
        key
    }

    /// Entries oldest first.
    pub async fn entries(&self) -> Vec<JournalEntry> {
        self.store
            .snapshot(Collection::Events)
            .await
            .into_values()
            .filter_map(|record| serde_json::from_value(record).ok())
            .collect()
    }
}
