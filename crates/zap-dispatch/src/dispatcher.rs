use std::sync::Arc;

use tracing::{debug, error, info, warn};
use zap_core::{is_group_jid, normalize_user_jid};
use zap_events::{
    EventBinder, GroupMetadata, OutboundContent, SendOptions, StoredMessage, WhatsappClient,
};

use crate::command::{parse_command, CommandInvocation, CommandOutcome, ParsedCommand};
use crate::gate::{
    evaluate_command_gates, requires_admin_facts, GateContext, GateDecision, GATE_REASON_BANNED,
};
use crate::registry::{CommandRegistry, RegisteredCommand};

pub const DEFAULT_COMMAND_PREFIX: &str = "/";
pub const MENU_COMMAND: &str = "menu";
pub const REACTION_SUCCESS: &str = "✅";
pub const REACTION_FAILURE: &str = "❌";
pub const REACTION_PENDING: &str = "⏳";
const REPLY_INTERNAL_ERROR: &str =
    "An internal error occurred while running this command. Please try again later.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub command_prefix: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            command_prefix: DEFAULT_COMMAND_PREFIX.to_string(),
        }
    }
}

/// Every way a dispatch can end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    IgnoredOwnMessage,
    NotCommand,
    DroppedBanned,
    UnknownCommand { name: String },
    Rejected {
        command: String,
        reason_code: &'static str,
    },
    MenuShown,
    Completed { command: String, success: bool },
    HandlerFailed { command: String, error: String },
}

/// Turns inbound messages into gated handler invocations and replies.
pub struct CommandDispatcher {
    binder: Arc<EventBinder>,
    registry: CommandRegistry,
    config: DispatcherConfig,
}

impl CommandDispatcher {
    pub fn new(
        binder: Arc<EventBinder>,
        registry: CommandRegistry,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            binder,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn prefix(&self) -> &str {
        &self.config.command_prefix
    }

    pub async fn dispatch(
        &self,
        client: Arc<dyn WhatsappClient>,
        message: &StoredMessage,
    ) -> DispatchOutcome {
        if message.key.from_me {
            return DispatchOutcome::IgnoredOwnMessage;
        }
        let Some(ParsedCommand { name, args }) = message
            .text()
            .and_then(|text| parse_command(text, &self.config.command_prefix))
        else {
            debug!(
                chat_id = %message.chat_id(),
                message_id = %message.key.id,
                "non-command message"
            );
            return DispatchOutcome::NotCommand;
        };

        let chat_id = message.chat_id().to_string();
        let sender_id = message.sender_id().to_string();
        let in_group = is_group_jid(&chat_id);

        if self.binder.is_blocked(&sender_id).await {
            info!(
                command = %name,
                sender = %sender_id,
                chat_id = %chat_id,
                reason_code = GATE_REASON_BANNED,
                "dropping command from banned sender"
            );
            return DispatchOutcome::DroppedBanned;
        }

        let Some(registered) = self.registry.resolve(&name) else {
            if name == MENU_COMMAND {
                self.reply(client.as_ref(), message, &self.render_menu())
                    .await;
                return DispatchOutcome::MenuShown;
            }
            info!(command = %name, chat_id = %chat_id, "unknown command");
            self.reply(
                client.as_ref(),
                message,
                &format!(
                    "Unknown command: {prefix}{name}. Send {prefix}{MENU_COMMAND} to see the available commands.",
                    prefix = self.config.command_prefix
                ),
            )
            .await;
            return DispatchOutcome::UnknownCommand { name };
        };

        let decision = self
            .gate(client.as_ref(), registered, &chat_id, &sender_id, in_group)
            .await;
        if let GateDecision::Reject { reason_code, reply } = decision {
            info!(
                command = %registered.spec.name,
                sender = %sender_id,
                chat_id = %chat_id,
                reason_code,
                "command rejected by gate"
            );
            self.react(client.as_ref(), message, REACTION_FAILURE).await;
            self.reply(client.as_ref(), message, reply).await;
            return DispatchOutcome::Rejected {
                command: registered.spec.name.clone(),
                reason_code,
            };
        }
        if let GateDecision::Drop { reason_code } = decision {
            info!(command = %registered.spec.name, reason_code, "command dropped by gate");
            return DispatchOutcome::DroppedBanned;
        }

        self.invoke(client, message, registered, sender_id, chat_id, args)
            .await
    }

    async fn gate(
        &self,
        client: &dyn WhatsappClient,
        registered: &RegisteredCommand,
        chat_id: &str,
        sender_id: &str,
        in_group: bool,
    ) -> GateDecision {
        let mut context = GateContext {
            sender_banned: false,
            in_group,
            ..GateContext::default()
        };
        if requires_admin_facts(&registered.spec, in_group) {
            let Some(group) = self.group_for_gates(client, chat_id).await else {
                return GateDecision::metadata_unavailable();
            };
            context.sender_is_admin = group.is_admin(sender_id);
            context.bot_is_admin = client
                .own_jid()
                .map(|jid| group.is_admin(&normalize_user_jid(&jid)))
                .unwrap_or(false);
        }
        evaluate_command_gates(&registered.spec, &context)
    }

    /// Reads group metadata from the mirror, fetching it when the group has
    /// not been seen yet. A record the event loop stored while the fetch was
    /// in flight takes precedence over the fetched one.
    async fn group_for_gates(
        &self,
        client: &dyn WhatsappClient,
        group_id: &str,
    ) -> Option<GroupMetadata> {
        if let Some(group) = self.binder.group_metadata(group_id).await {
            if group.participants.is_some() {
                return Some(group);
            }
        }
        match client.group_metadata(group_id).await {
            Ok(fetched) => {
                self.binder.cache_fetched_group(&fetched).await;
                match self.binder.group_metadata(group_id).await {
                    Some(stored) if stored.participants.is_some() => Some(stored),
                    _ => Some(fetched),
                }
            }
            Err(error) => {
                warn!(
                    group_id = %group_id,
                    error = %format!("{error:#}"),
                    "failed to fetch group metadata for command gates"
                );
                None
            }
        }
    }

    async fn invoke(
        &self,
        client: Arc<dyn WhatsappClient>,
        message: &StoredMessage,
        registered: &RegisteredCommand,
        sender_id: String,
        chat_id: String,
        args: String,
    ) -> DispatchOutcome {
        let command = registered.spec.name.clone();
        self.react(client.as_ref(), message, REACTION_PENDING).await;

        let handler = Arc::clone(&registered.handler);
        let invocation = CommandInvocation {
            client: Arc::clone(&client),
            message: message.clone(),
            command: command.clone(),
            sender_id: sender_id.clone(),
            chat_id: chat_id.clone(),
            args: args.clone(),
        };
        // Runs in its own task so a panicking handler surfaces as a JoinError.
        let result = tokio::spawn(async move { handler.handle(invocation).await }).await;

        let failure = match result {
            Ok(Ok(CommandOutcome { success, message: reply })) => {
                debug!(command = %command, success, "command completed");
                self.react(
                    client.as_ref(),
                    message,
                    if success {
                        REACTION_SUCCESS
                    } else {
                        REACTION_FAILURE
                    },
                )
                .await;
                if !reply.trim().is_empty() {
                    self.reply(client.as_ref(), message, &reply).await;
                }
                return DispatchOutcome::Completed { command, success };
            }
            Ok(Err(error)) => format!("{error:#}"),
            Err(join_error) if join_error.is_panic() => {
                format!("handler panicked: {join_error}")
            }
            Err(join_error) => format!("handler task failed: {join_error}"),
        };

        error!(
            command = %command,
            args = %args,
            sender = %sender_id,
            chat_id = %chat_id,
            error = %failure,
            "command handler failed"
        );
        self.react(client.as_ref(), message, REACTION_FAILURE).await;
        self.reply(client.as_ref(), message, REPLY_INTERNAL_ERROR)
            .await;
        DispatchOutcome::HandlerFailed {
            command,
            error: failure,
        }
    }

    fn render_menu(&self) -> String {
        let prefix = &self.config.command_prefix;
        let mut lines = vec!["*Available commands*".to_string()];
        lines.push(format!("{prefix}{MENU_COMMAND} - list commands"));
        for spec in self.registry.specs() {
            let mut line = format!("{prefix}{} - {}", spec.name, spec.description);
            if !spec.aliases.is_empty() {
                line.push_str(&format!(" (aliases: {})", spec.aliases.join(", ")));
            }
            if spec.admin_only {
                line.push_str(" [group admins]");
            } else if spec.group_only {
                line.push_str(" [groups]");
            }
            lines.push(line);
        }
        lines.join("\n")
    }

    async fn reply(&self, client: &dyn WhatsappClient, message: &StoredMessage, text: &str) {
        if let Err(error) = client
            .send_message(
                message.chat_id(),
                OutboundContent::text(text),
                SendOptions::replying_to(message),
            )
            .await
        {
            warn!(
                chat_id = %message.chat_id(),
                error = %format!("{error:#}"),
                "failed to send reply"
            );
        }
    }

    async fn react(&self, client: &dyn WhatsappClient, message: &StoredMessage, glyph: &str) {
        if let Err(error) = client
            .send_reaction(message.chat_id(), glyph, &message.key)
            .await
        {
            warn!(
                chat_id = %message.chat_id(),
                glyph,
                error = %format!("{error:#}"),
                "failed to send reaction"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use serde_json::json;
    use zap_events::{
        BinderConfig, EventBinder, GroupMetadata, InboundEvent, MessageKey, OutboundContent,
        SendOptions, StoredMessage, WhatsappClient,
    };
    use zap_store::{Collection, DebouncedWriter, MemoryBackend, MirrorStore};

    use super::{
        CommandDispatcher, DispatchOutcome, DispatcherConfig, REACTION_FAILURE, REACTION_PENDING,
        REACTION_SUCCESS,
    };
    use crate::command::{CommandHandler, CommandInvocation, CommandOutcome, CommandSpec};
    use crate::gate::{
        GATE_REASON_BOT_NOT_ADMIN, GATE_REASON_GROUP_ONLY, GATE_REASON_SENDER_NOT_ADMIN,
    };
    use crate::registry::CommandRegistry;

    const GROUP: &str = "g1@g.us";
    const ADMIN: &str = "admin@s.whatsapp.net";
    const MEMBER: &str = "member@s.whatsapp.net";
    const BOT: &str = "bot@s.whatsapp.net";

    #[derive(Default)]
    struct FakeClient {
        own_jid: Option<String>,
        remote_group: Option<GroupMetadata>,
        /// Events the event loop applies while a metadata fetch is in flight.
        during_fetch: Option<(Arc<EventBinder>, Vec<InboundEvent>)>,
        sent: Mutex<Vec<(String, String)>>,
        options: Mutex<Vec<SendOptions>>,
        reactions: Mutex<Vec<String>>,
        metadata_fetches: AtomicUsize,
    }

    impl FakeClient {
        fn sent_texts(&self) -> Vec<String> {
            self.sent
                .lock()
                .expect("sent")
                .iter()
                .map(|(_, text)| text.clone())
                .collect()
        }

        fn reactions(&self) -> Vec<String> {
            self.reactions.lock().expect("reactions").clone()
        }
    }

    #[async_trait]
    impl WhatsappClient for FakeClient {
        async fn send_message(
            &self,
            chat_id: &str,
            content: OutboundContent,
            options: SendOptions,
        ) -> Result<()> {
            assert!(options.quoted.is_some());
            self.options.lock().expect("options").push(options);
            let OutboundContent::Text { text } = content;
            self.sent
                .lock()
                .expect("sent")
                .push((chat_id.to_string(), text));
            Ok(())
        }

        async fn send_reaction(
            &self,
            _chat_id: &str,
            glyph: &str,
            _key: &MessageKey,
        ) -> Result<()> {
            self.reactions
                .lock()
                .expect("reactions")
                .push(glyph.to_string());
            Ok(())
        }

        async fn group_metadata(&self, group_id: &str) -> Result<GroupMetadata> {
            self.metadata_fetches.fetch_add(1, Ordering::SeqCst);
            if let Some((binder, events)) = &self.during_fetch {
                for event in events {
                    binder.apply(event).await;
                }
            }
            match &self.remote_group {
                Some(group) if group.id == group_id => Ok(group.clone()),
                _ => bail!("group {group_id} not found"),
            }
        }

        async fn participating_groups(&self) -> Result<Vec<GroupMetadata>> {
            Ok(self.remote_group.iter().cloned().collect())
        }

        fn own_jid(&self) -> Option<String> {
            self.own_jid.clone()
        }
    }

    enum Behavior {
        Succeed,
        Fail,
        Error,
        Panic,
    }

    struct CountingHandler {
        calls: AtomicUsize,
        behavior: Behavior,
        last_args: Mutex<Option<String>>,
    }

    impl CountingHandler {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                behavior,
                last_args: Mutex::new(None),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CommandHandler for CountingHandler {
        async fn handle(&self, invocation: CommandInvocation) -> Result<CommandOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_args.lock().expect("args") = Some(invocation.args.clone());
            match self.behavior {
                Behavior::Succeed => Ok(CommandOutcome::success(format!(
                    "done for {}",
                    invocation.sender_id
                ))),
                Behavior::Fail => Ok(CommandOutcome::failure("nothing to do")),
                Behavior::Error => bail!("sticker pack storage offline"),
                Behavior::Panic => panic!("handler bug"),
            }
        }
    }

    fn group_record(bot_admin: bool) -> GroupMetadata {
        serde_json::from_value(json!({
            "id": GROUP,
            "subject": "Ops",
            "participants": [
                { "id": ADMIN, "admin": "superadmin" },
                { "id": MEMBER, "admin": null },
                { "id": BOT, "admin": if bot_admin { json!("admin") } else { json!(null) } }
            ]
        }))
        .expect("group")
    }

    fn binder() -> Arc<EventBinder> {
        let store = Arc::new(MirrorStore::new(Arc::new(MemoryBackend::new())));
        let writer = Arc::new(DebouncedWriter::new(store.clone(), Duration::from_secs(1)));
        Arc::new(EventBinder::new(store, writer, BinderConfig::default()))
    }

    fn dispatcher_with(
        binder: Arc<EventBinder>,
        spec: CommandSpec,
        handler: Arc<CountingHandler>,
    ) -> CommandDispatcher {
        let mut registry = CommandRegistry::new();
        registry.register(spec, handler).expect("register");
        CommandDispatcher::new(binder, registry, DispatcherConfig::default())
    }

    fn message(chat: &str, sender: Option<&str>, text: &str) -> StoredMessage {
        serde_json::from_value(json!({
            "key": { "remoteJid": chat, "id": "m1", "participant": sender },
            "message": { "conversation": text }
        }))
        .expect("message")
    }

    fn client(bot_admin: bool) -> Arc<FakeClient> {
        Arc::new(FakeClient {
            own_jid: Some("bot:12@s.whatsapp.net".to_string()),
            remote_group: Some(group_record(bot_admin)),
            ..FakeClient::default()
        })
    }

    #[tokio::test]
    async fn integration_non_admin_sender_is_rejected_before_handler_runs() {
        let binder = binder();
        binder
            .apply(&InboundEvent::GroupsUpsert(vec![group_record(true)]))
            .await;
        let handler = CountingHandler::new(Behavior::Succeed);
        let dispatcher = dispatcher_with(
            binder,
            CommandSpec::new("kick", "Remove a member").group_only().admin_only(),
            handler.clone(),
        );
        let client = client(true);

        let outcome = dispatcher
            .dispatch(client.clone(), &message(GROUP, Some(MEMBER), "/kick @x"))
            .await;

        assert_eq!(
            outcome,
            DispatchOutcome::Rejected {
                command: "kick".to_string(),
                reason_code: GATE_REASON_SENDER_NOT_ADMIN
            }
        );
        assert_eq!(handler.calls(), 0);
        assert_eq!(
            client.sent_texts(),
            vec!["Only group admins can use this command.".to_string()]
        );
        assert_eq!(client.reactions(), vec![REACTION_FAILURE.to_string()]);
    }

    #[tokio::test]
    async fn functional_admin_command_runs_when_sender_and_bot_are_admins() {
        let binder = binder();
        let handler = CountingHandler::new(Behavior::Succeed);
        let dispatcher = dispatcher_with(
            binder.clone(),
            CommandSpec::new("kick", "Remove a member").admin_only(),
            handler.clone(),
        );
        let client = client(true);

        let outcome = dispatcher
            .dispatch(client.clone(), &message(GROUP, Some(ADMIN), "/KICK  @x  "))
            .await;

        assert_eq!(
            outcome,
            DispatchOutcome::Completed {
                command: "kick".to_string(),
                success: true
            }
        );
        assert_eq!(handler.calls(), 1);
        assert_eq!(
            handler.last_args.lock().expect("args").as_deref(),
            Some("@x")
        );
        assert_eq!(
            client.reactions(),
            vec![REACTION_PENDING.to_string(), REACTION_SUCCESS.to_string()]
        );
        assert_eq!(client.sent_texts(), vec![format!("done for {ADMIN}")]);
        assert_eq!(client.metadata_fetches.load(Ordering::SeqCst), 1);
        assert!(binder.store().contains(Collection::Groups, GROUP).await);

        dispatcher
            .dispatch(client.clone(), &message(GROUP, Some(ADMIN), "/kick @y"))
            .await;
        assert_eq!(client.metadata_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn regression_stale_metadata_fetch_does_not_undo_concurrent_promote() {
        let binder = binder();
        let handler = CountingHandler::new(Behavior::Succeed);
        let dispatcher = dispatcher_with(
            binder.clone(),
            CommandSpec::new("kick", "Remove a member").admin_only(),
            handler.clone(),
        );
        let client = Arc::new(FakeClient {
            own_jid: Some(BOT.to_string()),
            remote_group: Some(group_record(true)),
            during_fetch: Some((
                binder.clone(),
                vec![
                    InboundEvent::GroupsUpsert(vec![group_record(true)]),
                    InboundEvent::from_parts(
                        "group-participants.update",
                        json!({ "id": GROUP, "participants": [MEMBER], "action": "promote" }),
                    )
                    .expect("promote"),
                ],
            )),
            ..FakeClient::default()
        });

        let outcome = dispatcher
            .dispatch(client.clone(), &message(GROUP, Some(MEMBER), "/kick @x"))
            .await;

        assert_eq!(
            outcome,
            DispatchOutcome::Completed {
                command: "kick".to_string(),
                success: true
            }
        );
        let stored = binder.group_metadata(GROUP).await.expect("group");
        assert!(stored.is_admin(MEMBER));
    }

    #[tokio::test]
    async fn functional_replies_keep_disappearing_message_timer() {
        let dispatcher = dispatcher_with(
            binder(),
            CommandSpec::new("ping", "Ping"),
            CountingHandler::new(Behavior::Succeed),
        );
        let client = client(true);
        let inbound: StoredMessage = serde_json::from_value(json!({
            "key": { "remoteJid": "5511@s.whatsapp.net", "id": "m9" },
            "message": {
                "extendedTextMessage": { "text": "/ping", "contextInfo": { "expiration": 604800 } }
            }
        }))
        .expect("message");

        dispatcher.dispatch(client.clone(), &inbound).await;

        let options = client.options.lock().expect("options").clone();
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].ephemeral_expiration, Some(604_800));
        assert_eq!(options[0].quoted.as_ref().map(|key| key.id.as_str()), Some("m9"));
    }

    #[tokio::test]
    async fn functional_bot_without_admin_rank_is_rejected() {
        let handler = CountingHandler::new(Behavior::Succeed);
        let dispatcher = dispatcher_with(
            binder(),
            CommandSpec::new("kick", "Remove a member").admin_only(),
            handler.clone(),
        );
        let outcome = dispatcher
            .dispatch(client(false), &message(GROUP, Some(ADMIN), "/kick"))
            .await;
        assert_eq!(
            outcome,
            DispatchOutcome::Rejected {
                command: "kick".to_string(),
                reason_code: GATE_REASON_BOT_NOT_ADMIN
            }
        );
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test]
    async fn functional_group_only_command_in_private_chat_is_rejected() {
        let handler = CountingHandler::new(Behavior::Succeed);
        let dispatcher = dispatcher_with(
            binder(),
            CommandSpec::new("tagall", "Mention everyone").group_only(),
            handler.clone(),
        );
        let outcome = dispatcher
            .dispatch(client(true), &message("5511@s.whatsapp.net", None, "/tagall"))
            .await;
        assert_eq!(
            outcome,
            DispatchOutcome::Rejected {
                command: "tagall".to_string(),
                reason_code: GATE_REASON_GROUP_ONLY
            }
        );
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test]
    async fn functional_banned_sender_is_dropped_silently() {
        let binder = binder();
        binder
            .apply(&InboundEvent::BlocklistSet(vec![MEMBER.to_string()]))
            .await;
        let handler = CountingHandler::new(Behavior::Succeed);
        let dispatcher =
            dispatcher_with(binder, CommandSpec::new("ping", "Ping"), handler.clone());
        let client = client(true);
        let outcome = dispatcher
            .dispatch(client.clone(), &message(GROUP, Some(MEMBER), "/ping"))
            .await;
        assert_eq!(outcome, DispatchOutcome::DroppedBanned);
        assert_eq!(handler.calls(), 0);
        assert!(client.sent_texts().is_empty());
        assert!(client.reactions().is_empty());
    }

    #[tokio::test]
    async fn functional_unknown_command_gets_standard_reply() {
        let dispatcher = dispatcher_with(
            binder(),
            CommandSpec::new("ping", "Ping"),
            CountingHandler::new(Behavior::Succeed),
        );
        let client = client(true);
        let outcome = dispatcher
            .dispatch(client.clone(), &message("5511@s.whatsapp.net", None, "/pong"))
            .await;
        assert_eq!(
            outcome,
            DispatchOutcome::UnknownCommand {
                name: "pong".to_string()
            }
        );
        assert!(client.sent_texts()[0].starts_with("Unknown command: /pong."));
    }

    #[tokio::test]
    async fn regression_handler_error_and_panic_become_generic_failure_replies() {
        for behavior in [Behavior::Error, Behavior::Panic] {
            let handler = CountingHandler::new(behavior);
            let dispatcher =
                dispatcher_with(binder(), CommandSpec::new("sticker", "Sticker"), handler.clone());
            let client = client(true);
            let outcome = dispatcher
                .dispatch(client.clone(), &message("5511@s.whatsapp.net", None, "/sticker"))
                .await;
            assert!(matches!(outcome, DispatchOutcome::HandlerFailed { .. }));
            assert_eq!(handler.calls(), 1);
            assert_eq!(
                client.reactions(),
                vec![REACTION_PENDING.to_string(), REACTION_FAILURE.to_string()]
            );
            assert!(client.sent_texts()[0].starts_with("An internal error occurred"));
        }
    }

    #[tokio::test]
    async fn functional_failed_outcome_reacts_with_failure_glyph() {
        let handler = CountingHandler::new(Behavior::Fail);
        let dispatcher =
            dispatcher_with(binder(), CommandSpec::new("unban", "Unban"), handler.clone());
        let client = client(true);
        let outcome = dispatcher
            .dispatch(client.clone(), &message("5511@s.whatsapp.net", None, "/unban 1"))
            .await;
        assert_eq!(
            outcome,
            DispatchOutcome::Completed {
                command: "unban".to_string(),
                success: false
            }
        );
        assert_eq!(client.sent_texts(), vec!["nothing to do".to_string()]);
    }

    #[tokio::test]
    async fn unit_own_and_plain_messages_are_not_dispatched() {
        let handler = CountingHandler::new(Behavior::Succeed);
        let dispatcher =
            dispatcher_with(binder(), CommandSpec::new("ping", "Ping"), handler.clone());
        let mut own = message("5511@s.whatsapp.net", None, "/ping");
        own.key.from_me = true;
        assert_eq!(
            dispatcher.dispatch(client(true), &own).await,
            DispatchOutcome::IgnoredOwnMessage
        );
        assert_eq!(
            dispatcher
                .dispatch(client(true), &message("5511@s.whatsapp.net", None, "hello"))
                .await,
            DispatchOutcome::NotCommand
        );
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test]
    async fn functional_menu_lists_registered_commands() {
        let dispatcher = dispatcher_with(
            binder(),
            CommandSpec::new("ban", "Ban a member")
                .with_aliases(["b"])
                .admin_only(),
            CountingHandler::new(Behavior::Succeed),
        );
        let client = client(true);
        let outcome = dispatcher
            .dispatch(client.clone(), &message("5511@s.whatsapp.net", None, "/menu"))
            .await;
        assert_eq!(outcome, DispatchOutcome::MenuShown);
        let menu = &client.sent_texts()[0];
        assert!(menu.contains("/menu - list commands"));
        assert!(menu.contains("/ban - Ban a member (aliases: b) [group admins]"));
    }
}
