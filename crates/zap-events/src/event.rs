use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Chat, Contact, GroupMetadata, MessageKey, Reaction, Receipt, StoredMessage};

pub const EVENT_MESSAGES_UPSERT: &str = "messages.upsert";
pub const EVENT_MESSAGES_UPDATE: &str = "messages.update";
pub const EVENT_MESSAGES_MEDIA_UPDATE: &str = "messages.media-update";
pub const EVENT_MESSAGES_DELETE: &str = "messages.delete";
pub const EVENT_MESSAGES_REACTION: &str = "messages.reaction";
pub const EVENT_MESSAGE_RECEIPT_UPDATE: &str = "message-receipt.update";
pub const EVENT_GROUPS_UPSERT: &str = "groups.upsert";
pub const EVENT_GROUPS_UPDATE: &str = "groups.update";
pub const EVENT_GROUP_PARTICIPANTS_UPDATE: &str = "group-participants.update";
pub const EVENT_BLOCKLIST_SET: &str = "blocklist.set";
pub const EVENT_BLOCKLIST_UPDATE: &str = "blocklist.update";
pub const EVENT_CHATS_UPSERT: &str = "chats.upsert";
pub const EVENT_CHATS_UPDATE: &str = "chats.update";
pub const EVENT_CHATS_DELETE: &str = "chats.delete";
pub const EVENT_CONTACTS_UPSERT: &str = "contacts.upsert";
pub const EVENT_HISTORY_SET: &str = "messaging-history.set";
pub const EVENT_CONNECTION_UPDATE: &str = "connection.update";
pub const EVENT_CREDS_UPDATE: &str = "creds.update";
pub const EVENT_PRESENCE_UPDATE: &str = "presence.update";
pub const EVENT_CALL: &str = "call";
pub const EVENT_LABELS_EDIT: &str = "labels.edit";
pub const EVENT_LABELS_ASSOCIATION: &str = "labels.association";
pub const EVENT_NEWSLETTER_REACTION: &str = "newsletter.reaction";
pub const EVENT_NEWSLETTER_VIEW: &str = "newsletter.view";
pub const EVENT_NEWSLETTER_PARTICIPANTS_UPDATE: &str = "newsletter-participants.update";
pub const EVENT_NEWSLETTER_SETTINGS_UPDATE: &str = "newsletter-settings.update";

/// Whether an upsert carries live traffic or historical backfill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertKind {
    Notify,
    Append,
}

impl UpsertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UpsertKind::Notify => "notify",
            UpsertKind::Append => "append",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessagesUpsert {
    pub messages: Vec<StoredMessage>,
    #[serde(rename = "type")]
    pub kind: UpsertKind,
}

/// Partial fields to merge into one stored message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageUpdate {
    pub key: MessageKey,
    #[serde(default)]
    pub update: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MediaUpdate {
    pub key: MessageKey,
    #[serde(default)]
    pub media: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageDeletion {
    /// Every message of one chat.
    All { jid: String },
    Keys(Vec<MessageKey>),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReactionUpdate {
    /// Key of the message being reacted to.
    pub key: MessageKey,
    pub reaction: Reaction,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReceiptUpdate {
    pub key: MessageKey,
    pub receipt: Receipt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantAction {
    Add,
    Remove,
    Promote,
    Demote,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum ParticipantRef {
    Id(String),
    Entry { id: String },
}

impl ParticipantRef {
    fn into_id(self) -> String {
        match self {
            ParticipantRef::Id(id) | ParticipantRef::Entry { id } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantsUpdate {
    pub group_id: String,
    pub participants: Vec<String>,
    pub action: ParticipantAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlocklistAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySync {
    #[serde(default)]
    pub chats: Vec<Chat>,
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
    #[serde(default)]
    pub is_latest: bool,
}

/// Presence map for one chat, replaced wholesale on every update.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PresenceUpdate {
    pub id: String,
    #[serde(default)]
    pub presences: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelAssociationAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelAssociationUpdate {
    pub label_id: String,
    pub association: Value,
    pub action: LabelAssociationAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewsletterChange {
    Reaction,
    View,
    Participant,
    Settings,
}

impl NewsletterChange {
    pub fn event_kind(self) -> &'static str {
        match self {
            NewsletterChange::Reaction => EVENT_NEWSLETTER_REACTION,
            NewsletterChange::View => EVENT_NEWSLETTER_VIEW,
            NewsletterChange::Participant => EVENT_NEWSLETTER_PARTICIPANTS_UPDATE,
            NewsletterChange::Settings => EVENT_NEWSLETTER_SETTINGS_UPDATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewsletterUpdate {
    pub newsletter_id: String,
    pub change: NewsletterChange,
    pub payload: Value,
}

/// Transport phase reported in `connection.update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhaseReport {
    Connecting,
    Open,
    Close,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionPhaseReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_disconnect: Option<DisconnectInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_new_login: Option<bool>,
}

/// Typed event delivered by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    MessagesUpsert(MessagesUpsert),
    MessagesUpdate(Vec<MessageUpdate>),
    MessagesMediaUpdate(Vec<MediaUpdate>),
    MessagesDelete(MessageDeletion),
    MessagesReaction(Vec<ReactionUpdate>),
    MessageReceiptUpdate(Vec<ReceiptUpdate>),
    GroupsUpsert(Vec<GroupMetadata>),
    GroupsUpdate(Vec<GroupMetadata>),
    GroupParticipantsUpdate(ParticipantsUpdate),
    BlocklistSet(Vec<String>),
    BlocklistUpdate {
        blocklist: Vec<String>,
        action: BlocklistAction,
    },
    ChatsUpsert(Vec<Chat>),
    ChatsUpdate(Vec<Chat>),
    ChatsDelete(Vec<String>),
    ContactsUpsert(Vec<Contact>),
    HistorySet(HistorySync),
    ConnectionUpdate(ConnectionUpdate),
    CredentialsUpdate(Value),
    PresenceUpdate(PresenceUpdate),
    Calls(Vec<Value>),
    LabelsEdit(Value),
    LabelsAssociation(LabelAssociationUpdate),
    Newsletter(NewsletterUpdate),
    Unknown { kind: String, data: Value },
}

impl InboundEvent {
    pub fn kind(&self) -> &str {
        match self {
            InboundEvent::MessagesUpsert(_) => EVENT_MESSAGES_UPSERT,
            InboundEvent::MessagesUpdate(_) => EVENT_MESSAGES_UPDATE,
            InboundEvent::MessagesMediaUpdate(_) => EVENT_MESSAGES_MEDIA_UPDATE,
            InboundEvent::MessagesDelete(_) => EVENT_MESSAGES_DELETE,
            InboundEvent::MessagesReaction(_) => EVENT_MESSAGES_REACTION,
            InboundEvent::MessageReceiptUpdate(_) => EVENT_MESSAGE_RECEIPT_UPDATE,
            InboundEvent::GroupsUpsert(_) => EVENT_GROUPS_UPSERT,
            InboundEvent::GroupsUpdate(_) => EVENT_GROUPS_UPDATE,
            InboundEvent::GroupParticipantsUpdate(_) => EVENT_GROUP_PARTICIPANTS_UPDATE,
            InboundEvent::BlocklistSet(_) => EVENT_BLOCKLIST_SET,
            InboundEvent::BlocklistUpdate { .. } => EVENT_BLOCKLIST_UPDATE,
            InboundEvent::ChatsUpsert(_) => EVENT_CHATS_UPSERT,
            InboundEvent::ChatsUpdate(_) => EVENT_CHATS_UPDATE,
            InboundEvent::ChatsDelete(_) => EVENT_CHATS_DELETE,
            InboundEvent::ContactsUpsert(_) => EVENT_CONTACTS_UPSERT,
            InboundEvent::HistorySet(_) => EVENT_HISTORY_SET,
            InboundEvent::ConnectionUpdate(_) => EVENT_CONNECTION_UPDATE,
            InboundEvent::CredentialsUpdate(_) => EVENT_CREDS_UPDATE,
            InboundEvent::PresenceUpdate(_) => EVENT_PRESENCE_UPDATE,
            InboundEvent::Calls(_) => EVENT_CALL,
            InboundEvent::LabelsEdit(_) => EVENT_LABELS_EDIT,
            InboundEvent::LabelsAssociation(_) => EVENT_LABELS_ASSOCIATION,
            InboundEvent::Newsletter(update) => update.change.event_kind(),
            InboundEvent::Unknown { kind, .. } => kind.as_str(),
        }
    }

    /// Builds a typed event from its kind and raw payload. Unknown kinds are
    /// kept as `Unknown`; malformed payloads of known kinds are errors.
    pub fn from_parts(kind: &str, data: Value) -> Result<Self> {
        let kind = kind.trim();
        let event = match kind {
            EVENT_MESSAGES_UPSERT => InboundEvent::MessagesUpsert(decode(kind, data)?),
            EVENT_MESSAGES_UPDATE => InboundEvent::MessagesUpdate(decode(kind, data)?),
            EVENT_MESSAGES_MEDIA_UPDATE => InboundEvent::MessagesMediaUpdate(decode(kind, data)?),
            EVENT_MESSAGES_DELETE => InboundEvent::MessagesDelete(decode_deletion(data)?),
            EVENT_MESSAGES_REACTION => InboundEvent::MessagesReaction(decode(kind, data)?),
            EVENT_MESSAGE_RECEIPT_UPDATE => {
                InboundEvent::MessageReceiptUpdate(decode(kind, data)?)
            }
            EVENT_GROUPS_UPSERT => InboundEvent::GroupsUpsert(decode(kind, data)?),
            EVENT_GROUPS_UPDATE => InboundEvent::GroupsUpdate(decode(kind, data)?),
            EVENT_GROUP_PARTICIPANTS_UPDATE => {
                #[derive(Deserialize)]
                struct Raw {
                    id: String,
                    participants: Vec<ParticipantRef>,
                    action: ParticipantAction,
                }
                let raw: Raw = decode(kind, data)?;
                InboundEvent::GroupParticipantsUpdate(ParticipantsUpdate {
                    group_id: raw.id,
                    participants: raw
                        .participants
                        .into_iter()
                        .map(ParticipantRef::into_id)
                        .collect(),
                    action: raw.action,
                })
            }
            EVENT_BLOCKLIST_SET => {
                #[derive(Deserialize)]
                struct Raw {
                    blocklist: Vec<String>,
                }
                InboundEvent::BlocklistSet(decode::<Raw>(kind, data)?.blocklist)
            }
            EVENT_BLOCKLIST_UPDATE => {
                #[derive(Deserialize)]
                struct Raw {
                    blocklist: Vec<String>,
                    #[serde(rename = "type")]
                    action: BlocklistAction,
                }
                let raw: Raw = decode(kind, data)?;
                InboundEvent::BlocklistUpdate {
                    blocklist: raw.blocklist,
                    action: raw.action,
                }
            }
            EVENT_CHATS_UPSERT => InboundEvent::ChatsUpsert(decode(kind, data)?),
            EVENT_CHATS_UPDATE => InboundEvent::ChatsUpdate(decode(kind, data)?),
            EVENT_CHATS_DELETE => InboundEvent::ChatsDelete(decode(kind, data)?),
            EVENT_CONTACTS_UPSERT => InboundEvent::ContactsUpsert(decode(kind, data)?),
            EVENT_HISTORY_SET => InboundEvent::HistorySet(decode(kind, data)?),
            EVENT_CONNECTION_UPDATE => InboundEvent::ConnectionUpdate(decode(kind, data)?),
            EVENT_CREDS_UPDATE => InboundEvent::CredentialsUpdate(data),
            EVENT_PRESENCE_UPDATE => InboundEvent::PresenceUpdate(decode(kind, data)?),
            EVENT_CALL => InboundEvent::Calls(decode(kind, data)?),
            EVENT_LABELS_EDIT => {
                if !data.is_object() {
                    bail!("invalid '{kind}' payload: expected a label object");
                }
                InboundEvent::LabelsEdit(data)
            }
            EVENT_LABELS_ASSOCIATION => {
                #[derive(Deserialize)]
                struct Raw {
                    association: Value,
                    #[serde(rename = "type")]
                    action: LabelAssociationAction,
                }
                let raw: Raw = decode(kind, data)?;
                let label_id = raw
                    .association
                    .get("labelId")
                    .and_then(Value::as_str)
                    .filter(|id| !id.trim().is_empty())
                    .with_context(|| format!("'{kind}' association requires a labelId"))?
                    .to_string();
                InboundEvent::LabelsAssociation(LabelAssociationUpdate {
                    label_id,
                    association: raw.association,
                    action: raw.action,
                })
            }
            EVENT_NEWSLETTER_REACTION => decode_newsletter(NewsletterChange::Reaction, data)?,
            EVENT_NEWSLETTER_VIEW => decode_newsletter(NewsletterChange::View, data)?,
            EVENT_NEWSLETTER_PARTICIPANTS_UPDATE => {
                decode_newsletter(NewsletterChange::Participant, data)?
            }
            EVENT_NEWSLETTER_SETTINGS_UPDATE => {
                decode_newsletter(NewsletterChange::Settings, data)?
            }
            _ => InboundEvent::Unknown {
                kind: kind.to_string(),
                data,
            },
        };
        Ok(event)
    }
}

fn decode<T: serde::de::DeserializeOwned>(kind: &str, data: Value) -> Result<T> {
    serde_json::from_value(data).with_context(|| format!("invalid '{kind}' payload"))
}

fn decode_newsletter(change: NewsletterChange, data: Value) -> Result<InboundEvent> {
    let newsletter_id = data
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
        .with_context(|| format!("'{}' payload requires a newsletter id", change.event_kind()))?
        .to_string();
    Ok(InboundEvent::Newsletter(NewsletterUpdate {
        newsletter_id,
        change,
        payload: data,
    }))
}

fn decode_deletion(data: Value) -> Result<MessageDeletion> {
    #[derive(Deserialize)]
    struct Raw {
        #[serde(default)]
        all: bool,
        #[serde(default)]
        jid: Option<String>,
        #[serde(default)]
        keys: Vec<MessageKey>,
    }
    let raw: Raw = decode(EVENT_MESSAGES_DELETE, data)?;
    if raw.all {
        let jid = raw
            .jid
            .filter(|jid| !jid.trim().is_empty())
            .context("'messages.delete' with all=true requires a jid")?;
        return Ok(MessageDeletion::All { jid });
    }
    Ok(MessageDeletion::Keys(raw.keys))
}

/// Parses a transport envelope `{"event": "<kind>", "data": <payload>}`.
pub fn parse_event_envelope(raw: &str) -> Result<InboundEvent> {
    #[derive(Deserialize)]
    struct Envelope {
        event: String,
        #[serde(default)]
        data: Value,
    }
    let envelope: Envelope =
        serde_json::from_str(raw).context("event envelope is not valid JSON")?;
    InboundEvent::from_parts(&envelope.event, envelope.data)
}
