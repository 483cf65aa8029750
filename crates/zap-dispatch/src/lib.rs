//! Command parsing, registry, authorization gates and dispatch.

mod command;
mod dispatcher;
mod gate;
mod registry;

pub use command::{
    parse_command, CommandHandler, CommandInvocation, CommandOutcome, CommandSpec, ParsedCommand,
};
pub use dispatcher::{
    CommandDispatcher, DispatchOutcome, DispatcherConfig, DEFAULT_COMMAND_PREFIX, MENU_COMMAND,
    REACTION_FAILURE, REACTION_PENDING, REACTION_SUCCESS,
};
pub use gate::{
    evaluate_command_gates, GateContext, GateDecision, GATE_REASON_BANNED,
    GATE_REASON_BOT_NOT_ADMIN, GATE_REASON_GROUP_ONLY, GATE_REASON_METADATA_UNAVAILABLE,
    GATE_REASON_SENDER_NOT_ADMIN,
};
pub use registry::{CommandRegistry, RegisteredCommand};
