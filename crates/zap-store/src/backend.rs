use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use zap_core::{current_unix_timestamp_ms, write_text_atomic};

use crate::{Collection, StoreError, StoreResult};

/// Durable storage for serialized collections. Every `write` must be atomic
/// from a reader's perspective.
#[async_trait]
pub trait CollectionBackend: Send + Sync {
    /// Human-readable location used in log fields.
    fn describe(&self, collection: Collection) -> String;

    /// Returns the raw persisted text, or `None` when nothing was persisted.
    async fn read(&self, collection: Collection) -> StoreResult<Option<String>>;

    async fn write(&self, collection: Collection, payload: String) -> StoreResult<()>;

    /// Keeps a copy of unparseable content and returns where it went.
    async fn preserve_backup(&self, collection: Collection, raw: String) -> StoreResult<String>;
}

/// One pretty-printed JSON file per collection under a data directory.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    data_dir: PathBuf,
}

impl JsonFileBackend {
    /// Creates the data directory if needed. Failure here is a startup error.
    pub fn new(data_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        self.data_dir.as_path()
    }

    pub fn collection_path(&self, collection: Collection) -> PathBuf {
        self.data_dir.join(collection.file_name())
    }
}

#[async_trait]
impl CollectionBackend for JsonFileBackend {
    fn describe(&self, collection: Collection) -> String {
        self.collection_path(collection).display().to_string()
    }

    async fn read(&self, collection: Collection) -> StoreResult<Option<String>> {
        let path = self.collection_path(collection);
        tokio::task::spawn_blocking(move || match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(StoreError::Io(error)),
        })
        .await
        .map_err(|error| StoreError::BackendTask(error.to_string()))?
    }

    async fn write(&self, collection: Collection, payload: String) -> StoreResult<()> {
        let path = self.collection_path(collection);
        tokio::task::spawn_blocking(move || {
            write_text_atomic(&path, &payload).map_err(|error| StoreError::Write {
                collection,
                path: path.display().to_string(),
                message: format!("{error:#}"),
            })
        })
        .await
        .map_err(|error| StoreError::BackendTask(error.to_string()))?
    }

    async fn preserve_backup(&self, collection: Collection, raw: String) -> StoreResult<String> {
        let backup_path = self.data_dir.join(format!(
            "{}.corrupt-{}",
            collection.file_name(),
            current_unix_timestamp_ms()
        ));
        let display = backup_path.display().to_string();
        tokio::task::spawn_blocking(move || {
            write_text_atomic(&backup_path, &raw).map_err(|error| StoreError::Write {
                collection,
                path: backup_path.display().to_string(),
                message: format!("{error:#}"),
            })
        })
        .await
        .map_err(|error| StoreError::BackendTask(error.to_string()))??;
        Ok(display)
    }
}

/// Non-durable backend that keeps payloads in memory and counts writes.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    payloads: Mutex<HashMap<Collection, String>>,
    write_counts: Mutex<HashMap<Collection, usize>>,
    backups: Mutex<Vec<(Collection, String)>>,
    fail_writes: AtomicBool,
    fail_backups: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds raw content as if it had been persisted by an earlier run.
    pub fn with_payload(self, collection: Collection, raw: impl Into<String>) -> Self {
        lock(&self.payloads).insert(collection, raw.into());
        self
    }

    pub fn payload(&self, collection: Collection) -> Option<String> {
        lock(&self.payloads).get(&collection).cloned()
    }

    pub fn write_count(&self, collection: Collection) -> usize {
        lock(&self.write_counts)
            .get(&collection)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_writes(&self) -> usize {
        lock(&self.write_counts).values().sum()
    }

    pub fn backups(&self) -> Vec<(Collection, String)> {
        lock(&self.backups).clone()
    }

    /// Makes every subsequent write fail, simulating a full disk.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_backups(&self, fail: bool) {
        self.fail_backups.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CollectionBackend for MemoryBackend {
    fn describe(&self, collection: Collection) -> String {
        format!("memory:{collection}")
    }

    async fn read(&self, collection: Collection) -> StoreResult<Option<String>> {
        Ok(self.payload(collection))
    }

    async fn write(&self, collection: Collection, payload: String) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::WritesDisabled(collection));
        }
        lock(&self.payloads).insert(collection, payload);
        *lock(&self.write_counts).entry(collection).or_insert(0) += 1;
        Ok(())
    }

    async fn preserve_backup(&self, collection: Collection, raw: String) -> StoreResult<String> {
        if self.fail_backups.load(Ordering::SeqCst) {
            return Err(StoreError::WritesDisabled(collection));
        }
        let mut backups = lock(&self.backups);
        backups.push((collection, raw));
        Ok(format!("memory:{collection}.corrupt-{}", backups.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::{CollectionBackend, JsonFileBackend, MemoryBackend};
    use crate::Collection;

    #[tokio::test]
    async fn functional_json_file_backend_reads_back_written_payload() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let backend = JsonFileBackend::new(tempdir.path().join("data")).expect("backend");
        assert!(backend
            .read(Collection::Chats)
            .await
            .expect("read missing")
            .is_none());

        backend
            .write(Collection::Chats, "{\"c1\":{}}\n".to_string())
            .await
            .expect("write");
        let raw = backend
            .read(Collection::Chats)
            .await
            .expect("read")
            .expect("payload");
        assert_eq!(raw, "{\"c1\":{}}\n");
        assert!(tempdir.path().join("data").join("chats.json").exists());
    }

    #[tokio::test]
    async fn functional_json_file_backend_writes_backup_next_to_collection() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let backend = JsonFileBackend::new(tempdir.path()).expect("backend");
        let backup = backend
            .preserve_backup(Collection::Groups, "{not json".to_string())
            .await
            .expect("backup");
        assert!(backup.contains("groups.json.corrupt-"));
        let preserved = std::fs::read_to_string(&backup).expect("read backup");
        assert_eq!(preserved, "{not json");
    }

    #[test]
    fn regression_json_file_backend_rejects_uncreatable_data_dir() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let blocker = tempdir.path().join("blocker");
        std::fs::write(&blocker, "file").expect("write blocker");
        assert!(JsonFileBackend::new(blocker.join("data")).is_err());
    }

    #[tokio::test]
    async fn unit_memory_backend_counts_writes_and_honors_failure_toggle() {
        let backend = MemoryBackend::new();
        backend
            .write(Collection::Messages, "{}".to_string())
            .await
            .expect("write");
        backend.set_fail_writes(true);
        assert!(backend
            .write(Collection::Messages, "{}".to_string())
            .await
            .is_err());
        assert_eq!(backend.write_count(Collection::Messages), 1);
        assert_eq!(backend.total_writes(), 1);
    }
}
