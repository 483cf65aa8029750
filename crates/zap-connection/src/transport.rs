use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use zap_core::{merge_shallow, write_text_atomic};
use zap_events::{InboundEvent, WhatsappClient};

pub const CREDENTIALS_FILE_NAME: &str = "creds.json";

/// Linked-device credentials. Fields other than `registered` and `me` are
/// opaque to the bot and round-trip unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub registered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub me: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Credentials {
    /// Applies a `creds.update` patch.
    pub fn merge(&mut self, patch: Value) -> Result<()> {
        let mut current = serde_json::to_value(&*self).context("failed to encode credentials")?;
        merge_shallow(&mut current, patch);
        *self = serde_json::from_value(current).context("credentials patch is malformed")?;
        Ok(())
    }

    pub fn account_jid(&self) -> Option<&str> {
        self.me.as_ref()?.get("id")?.as_str()
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the persisted credentials, or fresh ones for a new device.
    async fn load_or_create(&self) -> Result<Credentials>;

    async fn save(&self, credentials: &Credentials) -> Result<()>;
}

/// Stores credentials as one JSON document in the session directory.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(session_dir: impl AsRef<Path>) -> Self {
        Self {
            path: session_dir.as_ref().join(CREDENTIALS_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load_or_create(&self) -> Result<Credentials> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<Credentials> {
            if !path.exists() {
                return Ok(Credentials::default());
            }
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            if raw.trim().is_empty() {
                return Ok(Credentials::default());
            }
            serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))
        })
        .await
        .context("credential load task failed")?
    }

    async fn save(&self, credentials: &Credentials) -> Result<()> {
        let path = self.path.clone();
        let encoded =
            serde_json::to_string_pretty(credentials).context("failed to encode credentials")?;
        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            write_text_atomic(&path, &encoded)
        })
        .await
        .context("credential save task failed")?
    }
}

/// Session-scoped controls that are not part of the messaging surface.
#[async_trait]
pub trait SessionControl: Send + Sync {
    /// Requests an 8-character pairing code for `phone_number`.
    async fn request_pairing_code(&self, phone_number: &str) -> Result<String>;

    /// Tears the session down. Idempotent.
    async fn close(&self);
}

/// One live transport session. The event channel closing means the
/// connection is gone.
pub struct TransportSession {
    pub events: mpsc::Receiver<InboundEvent>,
    pub client: Arc<dyn WhatsappClient>,
    pub control: Arc<dyn SessionControl>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn open_session(&self, credentials: &Credentials) -> Result<TransportSession>;
}
