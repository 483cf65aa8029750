use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use zap_events::{StoredMessage, WhatsappClient};

/// Command token and argument string split out of a message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Lowercased command name without the prefix.
    pub name: String,
    pub args: String,
}

/// Returns `None` when `text` does not start with `prefix` followed directly
/// by a command token.
pub fn parse_command(text: &str, prefix: &str) -> Option<ParsedCommand> {
    if prefix.is_empty() {
        return None;
    }
    let rest = text.trim_start().strip_prefix(prefix)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        return None;
    }
    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };
    Some(ParsedCommand {
        name: name.to_lowercase(),
        args: args.to_string(),
    })
}

/// Static description of a registered command and its gates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: String,
    pub aliases: Vec<String>,
    pub group_only: bool,
    /// Requires the sender and the bot to be group admins. Implies a group.
    pub admin_only: bool,
    pub description: String,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            group_only: false,
            admin_only: false,
            description: description.into(),
        }
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    pub fn group_only(mut self) -> Self {
        self.group_only = true;
        self
    }

    pub fn admin_only(mut self) -> Self {
        self.admin_only = true;
        self
    }
}

/// Everything a handler receives for one invocation.
#[derive(Clone)]
pub struct CommandInvocation {
    pub client: Arc<dyn WhatsappClient>,
    pub message: StoredMessage,
    pub command: String,
    pub sender_id: String,
    pub chat_id: String,
    pub args: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub success: bool,
    pub message: String,
}

impl CommandOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// External collaborator that implements one command.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, invocation: CommandInvocation) -> Result<CommandOutcome>;
}
