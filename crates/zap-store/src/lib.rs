//! Persistent mirror of chats, contacts, messages, groups, events, the
//! blocklist and the auxiliary presence, call, label and newsletter
//! collections, with pluggable durable backends, debounced flushing and a
//! periodic autosave task.

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod autosave;
mod backend;
mod debounce;
mod store;

pub use autosave::{start_autosave, AutosaveHandle};
pub use backend::{CollectionBackend, JsonFileBackend, MemoryBackend};
pub use debounce::{DebouncedWriter, DEFAULT_DEBOUNCE_DELAY};
pub use store::{FlushReport, LoadOutcome, MirrorStore, StoreStats};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by the store and its backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to write collection '{collection}' to {path}: {message}")]
    Write {
        collection: Collection,
        path: String,
        message: String,
    },
    #[error("backend writes are disabled for collection '{0}'")]
    WritesDisabled(Collection),
    #[error("collection '{0}' holds unreadable content that has not been backed up yet")]
    BackupPending(Collection),
    #[error("blocking backend task failed: {0}")]
    BackendTask(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Named collections mirrored by the store. Each maps a primary key to a
/// JSON record and is persisted as its own unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Chats,
    Contacts,
    Messages,
    Groups,
    Events,
    Blocklist,
    Presences,
    Calls,
    Labels,
    Newsletters,
}

impl Collection {
    pub const ALL: [Collection; 10] = [
        Collection::Chats,
        Collection::Contacts,
        Collection::Messages,
        Collection::Groups,
        Collection::Events,
        Collection::Blocklist,
        Collection::Presences,
        Collection::Calls,
        Collection::Labels,
        Collection::Newsletters,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Chats => "chats",
            Collection::Contacts => "contacts",
            Collection::Messages => "messages",
            Collection::Groups => "groups",
            Collection::Events => "events",
            Collection::Blocklist => "blocklist",
            Collection::Presences => "presences",
            Collection::Calls => "calls",
            Collection::Labels => "labels",
            Collection::Newsletters => "newsletters",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.json", self.as_str())
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::Collection;

    #[test]
    fn unit_collection_names_map_to_file_names() {
        let names = Collection::ALL
            .iter()
            .map(|collection| collection.file_name())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "chats.json",
                "contacts.json",
                "messages.json",
                "groups.json",
                "events.json",
                "blocklist.json",
                "presences.json",
                "calls.json",
                "labels.json",
                "newsletters.json"
            ]
        );
    }

    #[test]
    fn unit_collection_serializes_lowercase() {
        let encoded = serde_json::to_string(&Collection::Blocklist).expect("encode");
        assert_eq!(encoded, "\"blocklist\"");
    }
}
