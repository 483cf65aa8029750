//! Configuration and startup orchestration for the `zap-bot` binary.

mod bootstrap;
mod cli_args;
mod commands;

pub use bootstrap::{init_tracing, run, start_bot, BotRuntime};
pub use cli_args::Cli;
pub use commands::{register_builtin_commands, GroupInfoCommand, PingCommand};
