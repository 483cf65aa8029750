use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifies one message inside one chat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    #[serde(default)]
    pub remote_jid: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
}

impl MessageKey {
    /// Who authored the keyed message: `me` for own messages, otherwise the
    /// group participant or the direct-chat peer.
    pub fn author_id(&self) -> String {
        if self.from_me {
            return "me".to_string();
        }
        self.participant
            .clone()
            .filter(|participant| !participant.is_empty())
            .unwrap_or_else(|| self.remote_jid.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_group: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread_count: Option<i64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_lenient_timestamp"
    )]
    pub conversation_timestamp: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Push name chosen by the contact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_business: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Participant rank inside a group. Persisted as `null`, `"admin"` or
/// `"superadmin"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AdminRank {
    #[default]
    None,
    Admin,
    Superadmin,
}

impl AdminRank {
    pub fn is_admin(self) -> bool {
        !matches!(self, AdminRank::None)
    }
}

impl Serialize for AdminRank {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AdminRank::None => serializer.serialize_none(),
            AdminRank::Admin => serializer.serialize_str("admin"),
            AdminRank::Superadmin => serializer.serialize_str("superadmin"),
        }
    }
}

impl<'de> Deserialize<'de> for AdminRank {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(match raw.as_deref().map(str::trim) {
            Some("admin") => AdminRank::Admin,
            Some("superadmin") => AdminRank::Superadmin,
            _ => AdminRank::None,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupParticipant {
    pub id: String,
    #[serde(default)]
    pub admin: AdminRank,
}

impl GroupParticipant {
    pub fn member(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            admin: AdminRank::None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMetadata {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    /// Only admins may edit group settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrict: Option<bool>,
    /// Only admins may send messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announce: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<GroupParticipant>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GroupMetadata {
    pub fn participants(&self) -> &[GroupParticipant] {
        self.participants.as_deref().unwrap_or_default()
    }

    pub fn participant(&self, jid: &str) -> Option<&GroupParticipant> {
        self.participants()
            .iter()
            .find(|participant| zap_core::same_user_jid(&participant.id, jid))
    }

    pub fn is_admin(&self, jid: &str) -> bool {
        self.participant(jid)
            .is_some_and(|participant| participant.admin.is_admin())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    /// Key of the reaction itself; its author identifies the reactor.
    #[serde(default)]
    pub key: MessageKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_lenient_timestamp"
    )]
    pub sender_timestamp_ms: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Reaction {
    pub fn is_removal(&self) -> bool {
        self.text.as_deref().map_or(true, str::is_empty)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub user_jid: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_lenient_timestamp"
    )]
    pub receipt_timestamp: Option<i64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_lenient_timestamp"
    )]
    pub read_timestamp: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Message record as kept in a chat's ring buffer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub key: MessageKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_lenient_timestamp"
    )]
    pub message_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<Reaction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_receipt: Vec<Receipt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upsert_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

const CAPTIONED_MESSAGE_TYPES: [&str; 3] = ["imageMessage", "videoMessage", "documentMessage"];

impl StoredMessage {
    pub fn chat_id(&self) -> &str {
        &self.key.remote_jid
    }

    /// Sender account: the group participant when present, else the chat.
    pub fn sender_id(&self) -> &str {
        self.key
            .participant
            .as_deref()
            .filter(|participant| !participant.is_empty())
            .unwrap_or(&self.key.remote_jid)
    }

    /// First content key of the payload, e.g. `conversation`.
    pub fn message_type(&self) -> Option<&str> {
        self.message
            .as_ref()
            .and_then(Value::as_object)
            .and_then(|content| content.keys().next())
            .map(String::as_str)
    }

    /// Text body from plain, extended, or captioned media messages.
    pub fn text(&self) -> Option<&str> {
        let content = self.message.as_ref()?.as_object()?;
        if let Some(text) = content.get("conversation").and_then(Value::as_str) {
            return Some(text);
        }
        if let Some(text) = content
            .get("extendedTextMessage")
            .and_then(|extended| extended.get("text"))
            .and_then(Value::as_str)
        {
            return Some(text);
        }
        CAPTIONED_MESSAGE_TYPES.iter().find_map(|message_type| {
            content
                .get(*message_type)
                .and_then(|media| media.get("caption"))
                .and_then(Value::as_str)
        })
    }

    /// Disappearing-message timer (seconds) from the content's
    /// `contextInfo`, looking through an `ephemeralMessage` wrapper.
    pub fn ephemeral_expiration(&self) -> Option<u32> {
        let mut content = self.message.as_ref()?.as_object()?;
        if let Some(inner) = content
            .get("ephemeralMessage")
            .and_then(|wrapper| wrapper.get("message"))
            .and_then(Value::as_object)
        {
            content = inner;
        }
        content.values().find_map(|body| {
            body.get("contextInfo")
                .and_then(|context| context.get("expiration"))
                .and_then(Value::as_u64)
                .filter(|seconds| *seconds > 0)
                .and_then(|seconds| u32::try_from(seconds).ok())
        })
    }
}

/// Live connection bookkeeping owned by the supervisor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub is_connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_disconnected_at: Option<u64>,
    pub connection_attempt_count: u32,
}

/// Accepts numbers, numeric strings and `{ "low": n }` long objects.
fn deserialize_lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(timestamp_from_value))
}

fn timestamp_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64)),
        Value::String(text) => text.trim().parse().ok(),
        Value::Object(long) => long.get("low").and_then(Value::as_i64),
        _ => None,
    }
}
