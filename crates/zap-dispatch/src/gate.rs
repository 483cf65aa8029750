use crate::command::CommandSpec;

pub const GATE_REASON_BANNED: &str = "dispatch_gate_sender_banned";
pub const GATE_REASON_GROUP_ONLY: &str = "dispatch_gate_group_only";
pub const GATE_REASON_SENDER_NOT_ADMIN: &str = "dispatch_gate_sender_not_admin";
pub const GATE_REASON_BOT_NOT_ADMIN: &str = "dispatch_gate_bot_not_admin";
pub const GATE_REASON_METADATA_UNAVAILABLE: &str = "dispatch_gate_metadata_unavailable";

const REPLY_GROUP_ONLY: &str = "This command can only be used in groups.";
const REPLY_SENDER_NOT_ADMIN: &str = "Only group admins can use this command.";
const REPLY_BOT_NOT_ADMIN: &str = "I need to be a group admin to run this command.";
const REPLY_METADATA_UNAVAILABLE: &str =
    "Could not check group permissions right now. Please try again.";

/// Facts about the invocation that the gates inspect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateContext {
    pub sender_banned: bool,
    pub in_group: bool,
    pub sender_is_admin: bool,
    pub bot_is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    /// Stop without replying.
    Drop { reason_code: &'static str },
    /// Stop and tell the sender why.
    Reject {
        reason_code: &'static str,
        reply: &'static str,
    },
}

impl GateDecision {
    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            GateDecision::Allow => None,
            GateDecision::Drop { reason_code } | GateDecision::Reject { reason_code, .. } => {
                Some(*reason_code)
            }
        }
    }

    pub(crate) fn metadata_unavailable() -> Self {
        GateDecision::Reject {
            reason_code: GATE_REASON_METADATA_UNAVAILABLE,
            reply: REPLY_METADATA_UNAVAILABLE,
        }
    }
}

/// Whether evaluating `spec` needs group admin facts.
pub fn requires_admin_facts(spec: &CommandSpec, in_group: bool) -> bool {
    spec.admin_only && in_group
}

/// Applies the gates in order; the first failure wins.
pub fn evaluate_command_gates(spec: &CommandSpec, context: &GateContext) -> GateDecision {
    if context.sender_banned {
        return GateDecision::Drop {
            reason_code: GATE_REASON_BANNED,
        };
    }
    if (spec.group_only || spec.admin_only) && !context.in_group {
        return GateDecision::Reject {
            reason_code: GATE_REASON_GROUP_ONLY,
            reply: REPLY_GROUP_ONLY,
        };
    }
    if spec.admin_only && !context.sender_is_admin {
        return GateDecision::Reject {
            reason_code: GATE_REASON_SENDER_NOT_ADMIN,
            reply: REPLY_SENDER_NOT_ADMIN,
        };
    }
    if spec.admin_only && !context.bot_is_admin {
        return GateDecision::Reject {
            reason_code: GATE_REASON_BOT_NOT_ADMIN,
            reply: REPLY_BOT_NOT_ADMIN,
        };
    }
    GateDecision::Allow
}
