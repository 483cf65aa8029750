use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use zap_core::{current_unix_timestamp_ms, merge_shallow, same_user_jid};
use zap_store::{Collection, DebouncedWriter, MirrorStore};

use crate::event::{
    BlocklistAction, HistorySync, InboundEvent, LabelAssociationAction, LabelAssociationUpdate,
    MediaUpdate, MessageDeletion, MessageUpdate, MessagesUpsert, NewsletterChange,
    NewsletterUpdate, ParticipantAction, ParticipantsUpdate, PresenceUpdate, ReactionUpdate,
    ReceiptUpdate, UpsertKind,
};
use crate::model::{
    AdminRank, Chat, Contact, GroupMetadata, GroupParticipant, Receipt, StoredMessage,
};

pub const DEFAULT_MESSAGE_CAP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinderConfig {
    /// Maximum messages kept per chat; oldest are evicted first.
    pub message_cap: usize,
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self {
            message_cap: DEFAULT_MESSAGE_CAP,
        }
    }
}

/// What applying one event did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindOutcome {
    pub kind: String,
    pub touched: Vec<Collection>,
    pub ignored: bool,
}

/// Routes each inbound event kind to its merge strategy and schedules a
/// debounced flush for every collection it touched.
pub struct EventBinder {
    store: Arc<MirrorStore>,
    writer: Arc<DebouncedWriter>,
    config: BinderConfig,
}

impl EventBinder {
    pub fn new(
        store: Arc<MirrorStore>,
        writer: Arc<DebouncedWriter>,
        config: BinderConfig,
    ) -> Self {
        Self {
            store,
            writer,
            config: BinderConfig {
                message_cap: config.message_cap.max(1),
            },
        }
    }

    pub fn store(&self) -> &Arc<MirrorStore> {
        &self.store
    }

    pub fn writer(&self) -> &Arc<DebouncedWriter> {
        &self.writer
    }

    pub fn config(&self) -> BinderConfig {
        self.config
    }

    pub async fn apply(&self, event: &InboundEvent) -> BindOutcome {
        let touched = match event {
            InboundEvent::MessagesUpsert(upsert) => self.on_messages_upsert(upsert).await,
            InboundEvent::MessagesUpdate(updates) => self.on_messages_update(updates).await,
            InboundEvent::MessagesMediaUpdate(updates) => {
                self.on_messages_media_update(updates).await
            }
            InboundEvent::MessagesDelete(deletion) => self.on_messages_delete(deletion).await,
            InboundEvent::MessagesReaction(reactions) => self.on_messages_reaction(reactions).await,
            InboundEvent::MessageReceiptUpdate(receipts) => {
                self.on_message_receipt_update(receipts).await
            }
            InboundEvent::GroupsUpsert(groups) => self.on_groups_upsert(groups).await,
            InboundEvent::GroupsUpdate(groups) => self.on_groups_update(groups).await,
            InboundEvent::GroupParticipantsUpdate(update) => {
                self.on_group_participants_update(update).await
            }
            InboundEvent::BlocklistSet(blocklist) => self.on_blocklist_set(blocklist).await,
            InboundEvent::BlocklistUpdate { blocklist, action } => {
                self.on_blocklist_update(blocklist, *action).await
            }
            InboundEvent::ChatsUpsert(chats) | InboundEvent::ChatsUpdate(chats) => {
                self.on_chats_upsert(chats).await
            }
            InboundEvent::ChatsDelete(ids) => self.on_chats_delete(ids).await,
            InboundEvent::ContactsUpsert(contacts) => self.on_contacts_upsert(contacts).await,
            InboundEvent::HistorySet(history) => self.on_history_set(history).await,
            InboundEvent::PresenceUpdate(update) => self.on_presence_update(update).await,
            InboundEvent::Calls(calls) => self.on_calls(calls).await,
            InboundEvent::LabelsEdit(label) => self.on_labels_edit(label).await,
            InboundEvent::LabelsAssociation(update) => self.on_labels_association(update).await,
            InboundEvent::Newsletter(update) => self.on_newsletter_update(update).await,
            InboundEvent::ConnectionUpdate(_) | InboundEvent::CredentialsUpdate(_) => Vec::new(),
            InboundEvent::Unknown { kind, .. } => {
                info!(event = %kind, "ignoring unrecognized event kind");
                return BindOutcome {
                    kind: kind.clone(),
                    touched: Vec::new(),
                    ignored: true,
                };
            }
        };

        for collection in &touched {
            self.writer.schedule_flush(*collection);
        }
        debug!(event = event.kind(), touched = ?touched, "event applied");
        BindOutcome {
            kind: event.kind().to_string(),
            touched,
            ignored: false,
        }
    }

    async fn on_messages_upsert(&self, upsert: &MessagesUpsert) -> Vec<Collection> {
        let mut changed = false;
        for message in &upsert.messages {
            changed |= self.append_message(message, upsert.kind).await;
        }
        touched_if(changed, Collection::Messages)
    }

    async fn on_messages_update(&self, updates: &[MessageUpdate]) -> Vec<Collection> {
        let mut changed = false;
        for update in updates {
            if !update.update.is_object() {
                debug!(message_id = %update.key.id, "skipping non-object message update");
                continue;
            }
            let patch = update.update.clone();
            let located = self
                .with_located_message(&update.key.remote_jid, &update.key.id, |entry| {
                    merge_shallow(entry, patch);
                })
                .await;
            if !located {
                debug!(
                    chat_id = %update.key.remote_jid,
                    message_id = %update.key.id,
                    "message update for unknown message"
                );
            }
            changed |= located;
        }
        touched_if(changed, Collection::Messages)
    }

    async fn on_messages_media_update(&self, updates: &[MediaUpdate]) -> Vec<Collection> {
        let mut changed = false;
        for update in updates {
            if let Some(error) = &update.error {
                warn!(
                    chat_id = %update.key.remote_jid,
                    message_id = %update.key.id,
                    error = %error,
                    "media update reported an error"
                );
            }
            let Some(media) = update.media.clone() else {
                continue;
            };
            changed |= self
                .with_located_message(&update.key.remote_jid, &update.key.id, |entry| {
                    merge_shallow(entry, serde_json::json!({ "media": media }));
                })
                .await;
        }
        touched_if(changed, Collection::Messages)
    }

    async fn on_messages_delete(&self, deletion: &MessageDeletion) -> Vec<Collection> {
        let changed = match deletion {
            MessageDeletion::All { jid } => {
                self.mutate_chat_messages(jid, |messages| {
                    let had_messages = !messages.is_empty();
                    messages.clear();
                    had_messages
                })
                .await
            }
            MessageDeletion::Keys(keys) => {
                let mut by_chat: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
                for key in keys {
                    by_chat
                        .entry(key.remote_jid.as_str())
                        .or_default()
                        .insert(key.id.as_str());
                }
                let mut changed = false;
                for (chat_id, ids) in by_chat {
                    changed |= self
                        .mutate_chat_messages(chat_id, |messages| {
                            let before = messages.len();
                            messages.retain(|entry| {
                                message_id(entry).map_or(true, |id| !ids.contains(id))
                            });
                            messages.len() != before
                        })
                        .await;
                }
                changed
            }
        };
        touched_if(changed, Collection::Messages)
    }

    async fn on_messages_reaction(&self, reactions: &[ReactionUpdate]) -> Vec<Collection> {
        let mut changed = false;
        for update in reactions {
            let reaction = update.reaction.clone();
            changed |= self
                .with_located_message(&update.key.remote_jid, &update.key.id, |entry| {
                    update_typed_message(entry, |message| {
                        let author = reaction.key.author_id();
                        let position = message
                            .reactions
                            .iter()
                            .position(|existing| existing.key.author_id() == author);
                        match (reaction.is_removal(), position) {
                            (true, Some(index)) => {
                                message.reactions.remove(index);
                            }
                            (true, None) => {}
                            (false, Some(index)) => message.reactions[index] = reaction,
                            (false, None) => message.reactions.push(reaction),
                        }
                    });
                })
                .await;
        }
        touched_if(changed, Collection::Messages)
    }

    async fn on_message_receipt_update(&self, receipts: &[ReceiptUpdate]) -> Vec<Collection> {
        let mut changed = false;
        for update in receipts {
            let receipt = update.receipt.clone();
            changed |= self
                .with_located_message(&update.key.remote_jid, &update.key.id, |entry| {
                    update_typed_message(entry, |message| {
                        match message
                            .user_receipt
                            .iter_mut()
                            .find(|existing| existing.user_jid == receipt.user_jid)
                        {
                            Some(existing) => merge_receipt(existing, receipt),
                            None => message.user_receipt.push(receipt),
                        }
                    });
                })
                .await;
        }
        touched_if(changed, Collection::Messages)
    }

    async fn on_groups_upsert(&self, groups: &[GroupMetadata]) -> Vec<Collection> {
        let mut changed = false;
        for group in groups {
            if let Some(record) = encode_record(&group.id, group) {
                self.store.replace(Collection::Groups, &group.id, record).await;
                changed = true;
            }
        }
        touched_if(changed, Collection::Groups)
    }

    async fn on_groups_update(&self, groups: &[GroupMetadata]) -> Vec<Collection> {
        let mut changed = false;
        for group in groups {
            if let Some(patch) = encode_record(&group.id, group) {
                self.store.upsert(Collection::Groups, &group.id, patch).await;
                changed = true;
            }
        }
        touched_if(changed, Collection::Groups)
    }

    async fn on_group_participants_update(&self, update: &ParticipantsUpdate) -> Vec<Collection> {
        let applied = self
            .store
            .with_entry(Collection::Groups, &update.group_id, |slot| {
                let Some(existing) = slot.as_ref() else {
                    return None;
                };
                let mut group = match serde_json::from_value::<GroupMetadata>(existing.clone()) {
                    Ok(group) => group,
                    Err(error) => return Some(Err(error)),
                };
                apply_participant_action(&mut group, &update.participants, update.action);
                Some(serde_json::to_value(&group).map(|record| {
                    *slot = Some(record);
                }))
            })
            .await;

        match applied {
            None => {
                warn!(
                    group_id = %update.group_id,
                    action = ?update.action,
                    "participants update for unknown group ignored"
                );
                Vec::new()
            }
            Some(Err(error)) => {
                warn!(
                    group_id = %update.group_id,
                    error = %error,
                    "stored group record is malformed; participants update skipped"
                );
                Vec::new()
            }
            Some(Ok(())) => vec![Collection::Groups],
        }
    }

    async fn on_blocklist_set(&self, blocklist: &[String]) -> Vec<Collection> {
        let records = blocklist
            .iter()
            .filter(|jid| !jid.trim().is_empty())
            .map(|jid| (jid.clone(), Value::Bool(true)))
            .collect();
        self.store
            .replace_collection(Collection::Blocklist, records)
            .await;
        vec![Collection::Blocklist]
    }

    async fn on_blocklist_update(
        &self,
        blocklist: &[String],
        action: BlocklistAction,
    ) -> Vec<Collection> {
        let mut changed = false;
        for jid in blocklist.iter().filter(|jid| !jid.trim().is_empty()) {
            match action {
                BlocklistAction::Add => {
                    self.store
                        .replace(Collection::Blocklist, jid, Value::Bool(true))
                        .await;
                    changed = true;
                }
                BlocklistAction::Remove => {
                    changed |= self.store.delete(Collection::Blocklist, jid).await;
                }
            }
        }
        touched_if(changed, Collection::Blocklist)
    }

    async fn on_chats_upsert(&self, chats: &[Chat]) -> Vec<Collection> {
        let mut changed = false;
        for chat in chats {
            if let Some(record) = encode_record(&chat.id, chat) {
                self.store.upsert(Collection::Chats, &chat.id, record).await;
                changed = true;
            }
        }
        touched_if(changed, Collection::Chats)
    }

    async fn on_chats_delete(&self, ids: &[String]) -> Vec<Collection> {
        let mut changed = false;
        for id in ids {
            changed |= self.store.delete(Collection::Chats, id).await;
        }
        touched_if(changed, Collection::Chats)
    }

    async fn on_contacts_upsert(&self, contacts: &[Contact]) -> Vec<Collection> {
        let mut changed = false;
        for contact in contacts {
            if let Some(record) = encode_record(&contact.id, contact) {
                self.store
                    .replace(Collection::Contacts, &contact.id, record)
                    .await;
                changed = true;
            }
        }
        touched_if(changed, Collection::Contacts)
    }

    async fn on_history_set(&self, history: &HistorySync) -> Vec<Collection> {
        if !history.is_latest {
            let mut touched = self.on_chats_upsert(&history.chats).await;
            touched.extend(self.on_contacts_upsert(&history.contacts).await);
            touched.extend(
                self.on_messages_upsert(&MessagesUpsert {
                    messages: history.messages.clone(),
                    kind: UpsertKind::Append,
                })
                .await,
            );
            return touched;
        }

        let chats = history
            .chats
            .iter()
            .filter_map(|chat| Some((chat.id.clone(), encode_record(&chat.id, chat)?)))
            .collect();
        let contacts = history
            .contacts
            .iter()
            .filter_map(|contact| Some((contact.id.clone(), encode_record(&contact.id, contact)?)))
            .collect();
        let mut messages: BTreeMap<String, Value> = BTreeMap::new();
        for message in &history.messages {
            let Some(record) = self.message_record(message, UpsertKind::Append) else {
                continue;
            };
            let slot = messages
                .entry(message.key.remote_jid.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(list) = slot {
                match list
                    .iter_mut()
                    .find(|entry| message_id_matches(entry, &message.key.id))
                {
                    Some(existing) => merge_shallow(existing, record),
                    None => push_capped(list, record, self.config.message_cap),
                }
            }
        }

        info!(
            chats = history.chats.len(),
            contacts = history.contacts.len(),
            messages = history.messages.len(),
            "initial history sync replaces mirrored state"
        );
        self.store
            .replace_collection(Collection::Chats, chats)
            .await;
        self.store
            .replace_collection(Collection::Contacts, contacts)
            .await;
        self.store
            .replace_collection(Collection::Messages, messages)
            .await;
        vec![Collection::Chats, Collection::Contacts, Collection::Messages]
    }

    async fn on_presence_update(&self, update: &PresenceUpdate) -> Vec<Collection> {
        if update.id.trim().is_empty() {
            warn!("dropping presence update without chat id");
            return Vec::new();
        }
        self.store
            .replace(Collection::Presences, &update.id, update.presences.clone())
            .await;
        vec![Collection::Presences]
    }

    async fn on_calls(&self, calls: &[Value]) -> Vec<Collection> {
        let mut changed = false;
        for call in calls {
            let Some(id) = record_id(call) else {
                warn!("dropping call record without id");
                continue;
            };
            self.store.upsert(Collection::Calls, id, call.clone()).await;
            changed = true;
        }
        touched_if(changed, Collection::Calls)
    }

    async fn on_labels_edit(&self, label: &Value) -> Vec<Collection> {
        let Some(id) = record_id(label) else {
            warn!("dropping label without id");
            return Vec::new();
        };
        self.store.replace(Collection::Labels, id, label.clone()).await;
        vec![Collection::Labels]
    }

    async fn on_labels_association(&self, update: &LabelAssociationUpdate) -> Vec<Collection> {
        let target = association_target(&update.association).map(str::to_string);
        let association = update.association.clone();
        let applied = self
            .store
            .with_entry(Collection::Labels, &update.label_id, |slot| {
                let label = slot.as_mut()?;
                let associations = array_field(label, "associations")?;
                associations.retain(|existing| {
                    target.is_none() || association_target(existing) != target.as_deref()
                });
                if update.action == LabelAssociationAction::Add {
                    associations.push(association);
                }
                Some(())
            })
            .await;
        if applied.is_none() {
            warn!(
                label_id = %update.label_id,
                action = ?update.action,
                "label association for unknown label ignored"
            );
            return Vec::new();
        }
        vec![Collection::Labels]
    }

    async fn on_newsletter_update(&self, update: &NewsletterUpdate) -> Vec<Collection> {
        let payload = update.payload.clone();
        let applied = self
            .store
            .with_entry(Collection::Newsletters, &update.newsletter_id, |slot| {
                let record = slot.get_or_insert_with(|| Value::Object(Map::new()));
                match update.change {
                    NewsletterChange::Reaction => {
                        upsert_by_field(array_field(record, "reactions")?, "server_id", payload);
                    }
                    NewsletterChange::Participant => {
                        upsert_by_field(array_field(record, "participants")?, "user", payload);
                    }
                    NewsletterChange::View => {
                        if !record.is_object() {
                            *record = Value::Object(Map::new());
                        }
                        record.as_object_mut()?.insert("view".to_string(), payload);
                    }
                    NewsletterChange::Settings => merge_shallow(record, payload),
                }
                Some(())
            })
            .await;
        touched_if(applied.is_some(), Collection::Newsletters)
    }

    /// Caches group metadata fetched outside the event loop. A record that
    /// already carries participants was written by the event loop and wins;
    /// otherwise the fetched record fills the gaps under any newer fields.
    pub async fn cache_fetched_group(&self, group: &GroupMetadata) -> bool {
        let Some(fetched) = encode_record(&group.id, group) else {
            return false;
        };
        let stored = self
            .store
            .with_entry(Collection::Groups, &group.id, |slot| {
                let Some(existing) = slot.as_mut() else {
                    *slot = Some(fetched);
                    return true;
                };
                if existing
                    .get("participants")
                    .is_some_and(|participants| !participants.is_null())
                {
                    return false;
                }
                let mut merged = fetched;
                merge_shallow(&mut merged, existing.clone());
                *existing = merged;
                true
            })
            .await;
        if stored {
            self.writer.schedule_flush(Collection::Groups);
        } else {
            debug!(group_id = %group.id, "fetched group metadata is older than the mirror");
        }
        stored
    }

    pub async fn group_metadata(&self, group_id: &str) -> Option<GroupMetadata> {
        let record = self.store.get(Collection::Groups, group_id).await?;
        serde_json::from_value(record).ok()
    }

    pub async fn is_blocked(&self, jid: &str) -> bool {
        if self.store.contains(Collection::Blocklist, jid).await {
            return true;
        }
        self.store
            .keys(Collection::Blocklist)
            .await
            .iter()
            .any(|blocked| same_user_jid(blocked, jid))
    }

    pub async fn chat_messages(&self, chat_id: &str) -> Vec<StoredMessage> {
        match self.store.get(Collection::Messages, chat_id).await {
            Some(Value::Array(list)) => list
                .into_iter()
                .filter_map(|entry| serde_json::from_value(entry).ok())
                .collect(),
            _ => Vec::new(),
        }
    }

    async fn append_message(&self, message: &StoredMessage, kind: UpsertKind) -> bool {
        let Some(record) = self.message_record(message, kind) else {
            return false;
        };
        let cap = self.config.message_cap;
        let message_id = message.key.id.clone();
        self.mutate_chat_messages(&message.key.remote_jid, move |messages| {
            match messages
                .iter_mut()
                .find(|entry| message_id_matches(entry, &message_id))
            {
                Some(existing) => merge_shallow(existing, record),
                None => push_capped(messages, record, cap),
            }
            true
        })
        .await
    }

    fn message_record(&self, message: &StoredMessage, kind: UpsertKind) -> Option<Value> {
        if message.key.remote_jid.trim().is_empty() || message.key.id.trim().is_empty() {
            warn!(kind = kind.as_str(), "dropping message without chat or message id");
            return None;
        }
        let mut stamped = message.clone();
        stamped.received_at = Some(current_unix_timestamp_ms());
        stamped.upsert_type = Some(kind.as_str().to_string());
        encode_record(&message.key.id, &stamped)
    }

    async fn mutate_chat_messages<R, F>(&self, chat_id: &str, mutate: F) -> R
    where
        F: FnOnce(&mut Vec<Value>) -> R,
    {
        self.store
            .with_entry(Collection::Messages, chat_id, |slot| {
                let existed = slot.is_some();
                let mut messages = match slot.take() {
                    Some(Value::Array(messages)) => messages,
                    _ => Vec::new(),
                };
                let result = mutate(&mut messages);
                if existed || !messages.is_empty() {
                    *slot = Some(Value::Array(messages));
                }
                result
            })
            .await
    }

    /// Runs `mutate` on the message with `message_id` in `chat_id`; returns
    /// whether it was found.
    async fn with_located_message<F>(&self, chat_id: &str, message_id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut Value),
    {
        self.mutate_chat_messages(chat_id, |messages| {
            match messages
                .iter_mut()
                .find(|entry| message_id_matches(entry, message_id))
            {
                Some(entry) => {
                    mutate(entry);
                    true
                }
                None => false,
            }
        })
        .await
    }
}

fn touched_if(changed: bool, collection: Collection) -> Vec<Collection> {
    if changed {
        vec![collection]
    } else {
        Vec::new()
    }
}

fn message_id(entry: &Value) -> Option<&str> {
    entry.get("key")?.get("id")?.as_str()
}

fn message_id_matches(entry: &Value, id: &str) -> bool {
    message_id(entry) == Some(id)
}

fn record_id(record: &Value) -> Option<&str> {
    record
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
}

fn association_target(association: &Value) -> Option<&str> {
    association
        .get("jid")
        .or_else(|| association.get("chatId"))
        .and_then(Value::as_str)
}

/// Returns the array stored under `field`, creating it (and coercing the
/// record into an object) when needed.
fn array_field<'a>(record: &'a mut Value, field: &str) -> Option<&'a mut Vec<Value>> {
    if !record.is_object() {
        *record = Value::Object(Map::new());
    }
    let slot = record
        .as_object_mut()?
        .entry(field)
        .or_insert_with(|| Value::Array(Vec::new()));
    if !slot.is_array() {
        *slot = Value::Array(Vec::new());
    }
    slot.as_array_mut()
}

fn upsert_by_field(entries: &mut Vec<Value>, field: &str, item: Value) {
    let key = item.get(field).filter(|key| !key.is_null()).cloned();
    match entries
        .iter_mut()
        .find(|entry| key.is_some() && entry.get(field) == key.as_ref())
    {
        Some(existing) => merge_shallow(existing, item),
        None => entries.push(item),
    }
}

fn push_capped(messages: &mut Vec<Value>, record: Value, cap: usize) {
    messages.push(record);
    if messages.len() > cap {
        let excess = messages.len() - cap;
        messages.drain(..excess);
    }
}

fn encode_record<T: serde::Serialize>(id: &str, entity: &T) -> Option<Value> {
    if id.trim().is_empty() {
        warn!("dropping record without id");
        return None;
    }
    match serde_json::to_value(entity) {
        Ok(record) => Some(record),
        Err(error) => {
            warn!(id = %id, error = %error, "failed to encode record");
            None
        }
    }
}

fn update_typed_message(entry: &mut Value, mutate: impl FnOnce(&mut StoredMessage)) {
    let mut message = match serde_json::from_value::<StoredMessage>(entry.clone()) {
        Ok(message) => message,
        Err(error) => {
            warn!(error = %error, "stored message is malformed; update skipped");
            return;
        }
    };
    mutate(&mut message);
    match serde_json::to_value(&message) {
        Ok(record) => *entry = record,
        Err(error) => warn!(error = %error, "failed to encode updated message"),
    }
}

fn merge_receipt(existing: &mut Receipt, incoming: Receipt) {
    if incoming.receipt_timestamp.is_some() {
        existing.receipt_timestamp = incoming.receipt_timestamp;
    }
    if incoming.read_timestamp.is_some() {
        existing.read_timestamp = incoming.read_timestamp;
    }
    existing.extra.extend(incoming.extra);
}

fn apply_participant_action(
    group: &mut GroupMetadata,
    participants: &[String],
    action: ParticipantAction,
) {
    let members = group.participants.get_or_insert_with(Vec::new);
    match action {
        ParticipantAction::Add => {
            for id in participants {
                if !members
                    .iter()
                    .any(|member| same_user_jid(&member.id, id))
                {
                    members.push(GroupParticipant::member(id.clone()));
                }
            }
        }
        ParticipantAction::Remove => {
            members.retain(|member| !participants.iter().any(|id| same_user_jid(&member.id, id)));
        }
        ParticipantAction::Promote | ParticipantAction::Demote => {
            let rank = if action == ParticipantAction::Promote {
                AdminRank::Admin
            } else {
                AdminRank::None
            };
            for member in members
                .iter_mut()
                .filter(|member| participants.iter().any(|id| same_user_jid(&member.id, id)))
            {
                member.admin = rank;
            }
        }
    }
}
