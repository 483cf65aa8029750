use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::Instant;
use zap_dispatch::{
    CommandHandler, CommandInvocation, CommandOutcome, CommandRegistry, CommandSpec,
};
use zap_events::EventBinder;

/// Replies with the process uptime.
pub struct PingCommand {
    started: Instant,
}

impl PingCommand {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for PingCommand {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandHandler for PingCommand {
    async fn handle(&self, _invocation: CommandInvocation) -> Result<CommandOutcome> {
        let uptime = self.started.elapsed().as_secs();
        Ok(CommandOutcome::success(format!(
            "pong (up {}h {}m {}s)",
            uptime / 3_600,
            uptime % 3_600 / 60,
            uptime % 60
        )))
    }
}

/// Summarizes the mirrored metadata of the group the command was sent in.
pub struct GroupInfoCommand {
    binder: Arc<EventBinder>,
}

impl GroupInfoCommand {
    pub fn new(binder: Arc<EventBinder>) -> Self {
        Self { binder }
    }
}

#[async_trait]
impl CommandHandler for GroupInfoCommand {
    async fn handle(&self, invocation: CommandInvocation) -> Result<CommandOutcome> {
        let Some(group) = self.binder.group_metadata(&invocation.chat_id).await else {
            return Ok(CommandOutcome::failure(
                "Group details are not available yet. Try again in a moment.",
            ));
        };
        let participants = group.participants();
        let admins = participants
            .iter()
            .filter(|participant| participant.admin.is_admin())
            .count();
        let mut lines = vec![format!(
            "*{}*",
            group.subject.as_deref().unwrap_or("Untitled group")
        )];
        if let Some(desc) = group.desc.as_deref().filter(|desc| !desc.trim().is_empty()) {
            lines.push(desc.trim().to_string());
        }
        lines.push(format!("Participants: {}", participants.len()));
        lines.push(format!("Admins: {admins}"));
        if group.announce == Some(true) {
            lines.push("Only admins can send messages".to_string());
        }
        Ok(CommandOutcome::success(lines.join("\n")))
    }
}

/// Registers the commands the binary ships with.
pub fn register_builtin_commands(
    registry: &mut CommandRegistry,
    binder: Arc<EventBinder>,
) -> Result<()> {
    registry.register(
        CommandSpec::new("ping", "Check that the bot is responsive").with_aliases(["p"]),
        Arc::new(PingCommand::new()),
    )?;
    registry.register(
        CommandSpec::new("groupinfo", "Show this group's subject and member counts")
            .with_aliases(["info"])
            .group_only(),
        Arc::new(GroupInfoCommand::new(binder)),
    )?;
    Ok(())
}
