use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{GroupMetadata, MessageKey, StoredMessage};

/// Outbound message payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundContent {
    Text { text: String },
}

impl OutboundContent {
    pub fn text(text: impl Into<String>) -> Self {
        OutboundContent::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted: Option<MessageKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_expiration: Option<u32>,
}

impl SendOptions {
    /// Quotes `message` and keeps the chat's disappearing-message timer.
    pub fn replying_to(message: &StoredMessage) -> Self {
        Self {
            quoted: Some(message.key.clone()),
            ephemeral_expiration: message.ephemeral_expiration(),
        }
    }
}

/// Live session handle used to reply and to query group metadata.
#[async_trait]
pub trait WhatsappClient: Send + Sync {
    async fn send_message(
        &self,
        chat_id: &str,
        content: OutboundContent,
        options: SendOptions,
    ) -> Result<()>;

    async fn send_reaction(&self, chat_id: &str, glyph: &str, key: &MessageKey) -> Result<()>;

    async fn group_metadata(&self, group_id: &str) -> Result<GroupMetadata>;

    async fn participating_groups(&self) -> Result<Vec<GroupMetadata>>;

    /// Account identity of the bot, once authenticated.
    fn own_jid(&self) -> Option<String>;
}
