//! Helpers for opaque WhatsApp identifiers (JIDs).

const GROUP_SERVER_SUFFIX: &str = "@g.us";

/// Returns true when the identifier addresses a group conversation.
pub fn is_group_jid(jid: &str) -> bool {
    jid.trim().ends_with(GROUP_SERVER_SUFFIX)
}

/// Strips the device part (`user:device@server` -> `user@server`) so the same
/// account compares equal across its linked devices.
pub fn normalize_user_jid(jid: &str) -> String {
    let jid = jid.trim();
    let Some((user, server)) = jid.split_once('@') else {
        return jid.split(':').next().unwrap_or(jid).to_string();
    };
    let user = user.split(':').next().unwrap_or(user);
    format!("{user}@{server}")
}

pub fn same_user_jid(left: &str, right: &str) -> bool {
    normalize_user_jid(left) == normalize_user_jid(right)
}
