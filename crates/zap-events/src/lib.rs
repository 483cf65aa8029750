//! Event model, envelope parsing and the binder that merges inbound events
//! into the persistent mirror.

mod binder;
mod client;
mod event;
mod journal;
mod model;

pub use binder::{BindOutcome, BinderConfig, EventBinder, DEFAULT_MESSAGE_CAP};
pub use client::{OutboundContent, SendOptions, WhatsappClient};
pub use event::{
    parse_event_envelope, BlocklistAction, ConnectionPhaseReport, ConnectionUpdate,
    DisconnectInfo, HistorySync, InboundEvent, LabelAssociationAction, LabelAssociationUpdate,
    MediaUpdate, MessageDeletion, MessageUpdate, MessagesUpsert, NewsletterChange,
    NewsletterUpdate, ParticipantAction, ParticipantsUpdate, PresenceUpdate, ReactionUpdate,
    ReceiptUpdate, UpsertKind,
};
pub use journal::{EventJournal, JournalEntry, DEFAULT_EVENT_JOURNAL_CAP};
pub use model::{
    AdminRank, Chat, ConnectionState, Contact, GroupMetadata, GroupParticipant, MessageKey,
    Reaction, Receipt, StoredMessage,
};
