//! Helpers for the WhatsApp bot crates that have no home of their own.
//!
//! Collection files and credentials are written with [`write_text_atomic`].
//! Event payloads are folded into stored records with [`merge_shallow`], and
//! group administration compares participants with the [`jid`] helpers.

pub mod atomic_io;
pub mod jid;
pub mod json_merge;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use jid::{is_group_jid, normalize_user_jid, same_user_jid};
pub use json_merge::merge_shallow;
pub use time_utils::current_unix_timestamp_ms;
