use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use zap_core::current_unix_timestamp_ms;
use zap_dispatch::CommandDispatcher;
use zap_events::{
    ConnectionPhaseReport, ConnectionState, ConnectionUpdate, EventBinder, EventJournal,
    GroupMetadata, InboundEvent, StoredMessage, UpsertKind, WhatsappClient,
};
use zap_store::FlushReport;

use crate::reconnect::{
    ConnectionPhase, DisconnectDecision, DisconnectReason, ReconnectPolicy,
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BACKOFF,
};
use crate::transport::{CredentialStore, Credentials, SessionControl, Transport};

pub const DEFAULT_PAIRING_CODE_DELAY: Duration = Duration::from_millis(3_000);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(5_000);

const JOURNAL_KIND_CONNECTION_STATE: &str = "connection_state";
const JOURNAL_KIND_CONNECTION_FATAL: &str = "connection_fatal";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub max_reconnect_attempts: u32,
    pub reconnect_backoff: Duration,
    pub pairing_code: bool,
    pub phone_number: Option<String>,
    pub pairing_code_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            pairing_code: false,
            phone_number: None,
            pairing_code_delay: DEFAULT_PAIRING_CODE_DELAY,
        }
    }
}

/// Collaborators owned by the supervisor's event loop.
#[derive(Clone)]
pub struct SupervisorDeps {
    pub transport: Arc<dyn Transport>,
    pub credentials: Arc<dyn CredentialStore>,
    pub binder: Arc<EventBinder>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub journal: Arc<EventJournal>,
}

/// Operator-facing status. `Fatal` persists until a manual `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorStatus {
    Idle,
    Running,
    Fatal { reason: String },
}

impl SupervisorStatus {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SupervisorStatus::Fatal { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSnapshot {
    pub phase: ConnectionPhase,
    pub connection: ConnectionState,
    /// Incremented every time a transport session opens.
    pub session_id: u64,
}

enum SupervisorCommand {
    Connect,
    ForceReconnect,
    Shutdown {
        grace: Duration,
        reply: oneshot::Sender<FlushReport>,
    },
}

/// Handle to the connection supervisor task.
pub struct ConnectionSupervisor {
    command_tx: mpsc::UnboundedSender<SupervisorCommand>,
    status_rx: watch::Receiver<SupervisorStatus>,
    snapshot_rx: watch::Receiver<SupervisorSnapshot>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSupervisor {
    /// Spawns the supervisor loop. No connection is attempted until
    /// [`ConnectionSupervisor::connect`] is called.
    pub fn start(config: SupervisorConfig, deps: SupervisorDeps) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("connection supervisor requires an active Tokio runtime")?;
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (group_sync_tx, group_sync_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SupervisorStatus::Idle);
        let (snapshot_tx, snapshot_rx) = watch::channel(SupervisorSnapshot {
            phase: ConnectionPhase::Disconnected,
            connection: ConnectionState::default(),
            session_id: 0,
        });
        let driver = SupervisorDriver {
            policy: ReconnectPolicy::new(config.max_reconnect_attempts, config.reconnect_backoff),
            config,
            deps,
            phase: ConnectionPhase::Disconnected,
            connection: ConnectionState::default(),
            session: None,
            session_id: 0,
            credentials: None,
            reconnect_at: None,
            last_qr: None,
            pairing_task: None,
            group_sync_task: None,
            group_sync_tx,
            dispatch_tasks: JoinSet::new(),
            status_tx,
            snapshot_tx,
        };
        let task = runtime.spawn(driver.run(command_rx, group_sync_rx));
        Ok(Self {
            command_tx,
            status_rx,
            snapshot_rx,
            task: Mutex::new(Some(task)),
        })
    }

    /// Starts a connection. Ignored while a session is being established or
    /// is live. Clears a fatal status.
    pub fn connect(&self) -> Result<()> {
        self.send(SupervisorCommand::Connect)
    }

    /// Tears down the live session through the regular disconnect path, or
    /// connects when there is none.
    pub fn force_reconnect(&self) -> Result<()> {
        self.send(SupervisorCommand::ForceReconnect)
    }

    pub fn status(&self) -> SupervisorStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorStatus> {
        self.status_rx.clone()
    }

    pub fn snapshot(&self) -> SupervisorSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<SupervisorSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Closes the session and flushes pending debounced writes, spending at
    /// most `grace` before giving up on in-flight work.
    pub async fn shutdown(&self, grace: Duration) -> Result<FlushReport> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(SupervisorCommand::Shutdown {
            grace,
            reply: reply_tx,
        })?;
        let report = reply_rx
            .await
            .context("connection supervisor stopped before acknowledging shutdown")?;
        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            if let Err(error) = task.await {
                warn!(error = %error, "connection supervisor task ended abnormally");
            }
        }
        Ok(report)
    }

    fn send(&self, command: SupervisorCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| anyhow!("connection supervisor is not running"))
    }
}

struct ActiveSession {
    id: u64,
    events: mpsc::Receiver<InboundEvent>,
    client: Arc<dyn WhatsappClient>,
    control: Arc<dyn SessionControl>,
}

/// Result of a participating-groups fetch, applied on the driver loop.
struct GroupSync {
    session_id: u64,
    groups: Result<Vec<GroupMetadata>>,
}

struct SupervisorDriver {
    config: SupervisorConfig,
    deps: SupervisorDeps,
    policy: ReconnectPolicy,
    phase: ConnectionPhase,
    connection: ConnectionState,
    session: Option<ActiveSession>,
    session_id: u64,
    credentials: Option<Credentials>,
    reconnect_at: Option<Instant>,
    last_qr: Option<String>,
    pairing_task: Option<JoinHandle<()>>,
    group_sync_task: Option<JoinHandle<()>>,
    group_sync_tx: mpsc::UnboundedSender<GroupSync>,
    dispatch_tasks: JoinSet<()>,
    status_tx: watch::Sender<SupervisorStatus>,
    snapshot_tx: watch::Sender<SupervisorSnapshot>,
}

impl SupervisorDriver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SupervisorCommand>,
        mut group_syncs: mpsc::UnboundedReceiver<GroupSync>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SupervisorCommand::Connect) => self.on_connect_requested().await,
                    Some(SupervisorCommand::ForceReconnect) => self.on_force_reconnect().await,
                    Some(SupervisorCommand::Shutdown { grace, reply }) => {
                        let report = self.shutdown(grace).await;
                        let _ = reply.send(report);
                        return;
                    }
                    None => {
                        self.shutdown(DEFAULT_SHUTDOWN_GRACE).await;
                        return;
                    }
                },
                event = next_session_event(&mut self.session) => match event {
                    Some(event) => self.handle_event(event).await,
                    None => self.handle_disconnect(DisconnectReason::ConnectionLost).await,
                },
                Some(sync) = group_syncs.recv() => self.on_groups_synced(sync).await,
                _ = sleep_until_deadline(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.connect().await;
                }
                Some(joined) = self.dispatch_tasks.join_next(), if !self.dispatch_tasks.is_empty() => {
                    if let Err(error) = joined {
                        warn!(error = %error, "command dispatch task ended abnormally");
                    }
                }
            }
        }
    }

    async fn on_connect_requested(&mut self) {
        let status = self.status_tx.borrow().clone();
        if let SupervisorStatus::Fatal { reason } = status {
            info!(previous = %reason, "manual connect clears fatal status");
            self.policy = ReconnectPolicy::new(
                self.config.max_reconnect_attempts,
                self.config.reconnect_backoff,
            );
            self.connection.connection_attempt_count = 0;
            self.status_tx.send_replace(SupervisorStatus::Idle);
        }
        self.connect().await;
    }

    async fn on_force_reconnect(&mut self) {
        if self.phase.is_connecting() {
            info!(
                phase = self.phase.as_str(),
                "force reconnect ignored; connection attempt already in progress"
            );
            return;
        }
        if self.session.is_some() {
            info!(session_id = self.session_id, "forcing reconnect");
            self.handle_disconnect(DisconnectReason::Forced).await;
        } else {
            self.on_connect_requested().await;
        }
    }

    async fn connect(&mut self) {
        if self.phase != ConnectionPhase::Disconnected {
            info!(
                phase = self.phase.as_str(),
                "connect request ignored; session already active"
            );
            return;
        }
        self.reconnect_at = None;
        self.set_phase(ConnectionPhase::Connecting);

        let credentials = match self.deps.credentials.load_or_create().await {
            Ok(credentials) => credentials,
            Err(error) => {
                error!(error = %format!("{error:#}"), "failed to load credentials");
                self.handle_disconnect(DisconnectReason::Other(format!(
                    "credentials unavailable: {error}"
                )))
                .await;
                return;
            }
        };

        let session = match self.deps.transport.open_session(&credentials).await {
            Ok(session) => session,
            Err(error) => {
                warn!(error = %format!("{error:#}"), "failed to open transport session");
                self.handle_disconnect(DisconnectReason::Other(format!(
                    "failed to open session: {error}"
                )))
                .await;
                return;
            }
        };

        self.session_id = self.session_id.saturating_add(1);
        info!(
            session_id = self.session_id,
            registered = credentials.registered,
            attempt = self.policy.attempts(),
            "transport session opened"
        );
        if self.config.pairing_code && !credentials.registered {
            self.spawn_pairing_code_request(session.control.clone());
        }
        self.credentials = Some(credentials);
        self.session = Some(ActiveSession {
            id: self.session_id,
            events: session.events,
            client: session.client,
            control: session.control,
        });
        self.publish_snapshot();
    }

    fn spawn_pairing_code_request(&mut self, control: Arc<dyn SessionControl>) {
        let Some(phone_number) = self
            .config
            .phone_number
            .as_deref()
            .map(sanitize_phone_number)
            .filter(|digits| !digits.is_empty())
        else {
            error!("pairing-code mode is enabled but no phone number is configured");
            return;
        };
        let delay = self.config.pairing_code_delay;
        self.pairing_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match control.request_pairing_code(&phone_number).await {
                Ok(code) => info!(
                    pairing_code = %format_pairing_code(&code),
                    "enter this pairing code under WhatsApp > Linked devices"
                ),
                Err(error) => warn!(error = %format!("{error:#}"), "pairing code request failed"),
            }
        }));
    }

    async fn handle_event(&mut self, event: InboundEvent) {
        match &event {
            InboundEvent::ConnectionUpdate(update) => self.on_connection_update(update).await,
            InboundEvent::CredentialsUpdate(patch) => self.on_credentials_update(patch).await,
            InboundEvent::MessagesUpsert(upsert) => {
                self.deps.binder.apply(&event).await;
                if upsert.kind == UpsertKind::Notify {
                    self.spawn_dispatches(upsert.messages.iter().cloned());
                }
            }
            _ => {
                self.deps.binder.apply(&event).await;
            }
        }
    }

    fn spawn_dispatches(&mut self, messages: impl Iterator<Item = StoredMessage>) {
        let Some(session) = &self.session else {
            return;
        };
        for message in messages {
            let dispatcher = self.deps.dispatcher.clone();
            let client = session.client.clone();
            self.dispatch_tasks.spawn(async move {
                let outcome = dispatcher.dispatch(client, &message).await;
                debug!(
                    chat_id = %message.chat_id(),
                    message_id = %message.key.id,
                    outcome = ?outcome,
                    "message dispatched"
                );
            });
        }
    }

    async fn on_connection_update(&mut self, update: &ConnectionUpdate) {
        if let Some(qr) = update.qr.as_deref() {
            if self.last_qr.as_deref() != Some(qr) {
                info!(qr = %qr, "scan this QR code with WhatsApp to link the device");
                self.last_qr = Some(qr.to_string());
            }
            if self.phase == ConnectionPhase::Connecting {
                self.set_phase(ConnectionPhase::Authenticating);
            }
        }
        match update.connection {
            Some(ConnectionPhaseReport::Connecting) => {
                if self.phase == ConnectionPhase::Connecting {
                    self.set_phase(ConnectionPhase::Authenticating);
                }
            }
            Some(ConnectionPhaseReport::Open) => self.on_connected().await,
            Some(ConnectionPhaseReport::Close) => {
                let reason = DisconnectReason::from_info(update.last_disconnect.as_ref());
                self.handle_disconnect(reason).await;
            }
            None => {}
        }
    }

    async fn on_connected(&mut self) {
        let Some(session) = &self.session else {
            warn!("transport reported open without a live session");
            return;
        };
        let client = session.client.clone();
        let session_id = session.id;

        self.policy.on_connected();
        self.last_qr = None;
        self.connection.is_connected = true;
        self.connection.last_connected_at = Some(current_unix_timestamp_ms());
        self.connection.connection_attempt_count = 0;
        self.set_phase(ConnectionPhase::Connected);
        self.status_tx.send_replace(SupervisorStatus::Running);
        info!(
            session_id,
            account = client.own_jid().as_deref().unwrap_or("unknown"),
            "connected"
        );
        self.deps
            .journal
            .record(
                JOURNAL_KIND_CONNECTION_STATE,
                json!({ "state": "connected", "sessionId": session_id }),
            )
            .await;

        // The fetch waits on a bridge response; running it inline would stall
        // the session event stream behind it.
        let results = self.group_sync_tx.clone();
        if let Some(previous) = self.group_sync_task.replace(tokio::spawn(async move {
            let groups = client.participating_groups().await;
            let _ = results.send(GroupSync { session_id, groups });
        })) {
            previous.abort();
        }
    }

    async fn on_groups_synced(&mut self, sync: GroupSync) {
        self.group_sync_task = None;
        match sync.groups {
            Ok(groups) => {
                let count = groups.len();
                self.deps
                    .binder
                    .apply(&InboundEvent::GroupsUpsert(groups))
                    .await;
                info!(
                    session_id = sync.session_id,
                    groups = count,
                    "participating groups synced"
                );
            }
            Err(error) => {
                warn!(
                    session_id = sync.session_id,
                    error = %format!("{error:#}"),
                    "failed to fetch participating groups"
                );
            }
        }
    }

    async fn on_credentials_update(&mut self, patch: &Value) {
        let Some(credentials) = self.credentials.as_mut() else {
            warn!("credentials update received without loaded credentials");
            return;
        };
        if let Err(error) = credentials.merge(patch.clone()) {
            warn!(error = %format!("{error:#}"), "ignoring malformed credentials update");
            return;
        }
        match self.deps.credentials.save(credentials).await {
            Ok(()) => debug!(registered = credentials.registered, "credentials saved"),
            Err(error) => warn!(error = %format!("{error:#}"), "failed to save credentials"),
        }
    }

    async fn handle_disconnect(&mut self, reason: DisconnectReason) {
        self.close_session().await;
        self.connection.is_connected = false;
        self.connection.last_disconnected_at = Some(current_unix_timestamp_ms());
        self.set_phase(ConnectionPhase::Disconnected);

        match self.policy.on_disconnect(&reason) {
            DisconnectDecision::Reconnect { attempt, delay } => {
                warn!(
                    reason = reason.as_str(),
                    attempt,
                    max_attempts = self.policy.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "connection closed; reconnect scheduled"
                );
                self.reconnect_at = Some(Instant::now() + delay);
            }
            DisconnectDecision::Fatal(fatal) => {
                error!(
                    reason = reason.as_str(),
                    status = %fatal,
                    "connection supervisor stopped retrying"
                );
                self.reconnect_at = None;
                self.status_tx.send_replace(SupervisorStatus::Fatal {
                    reason: fatal.to_string(),
                });
                self.deps
                    .journal
                    .record(
                        JOURNAL_KIND_CONNECTION_FATAL,
                        json!({ "reason": reason.as_str(), "status": fatal.to_string() }),
                    )
                    .await;
            }
        }
        self.connection.connection_attempt_count = self.policy.attempts();
        self.deps
            .journal
            .record(
                JOURNAL_KIND_CONNECTION_STATE,
                json!({
                    "state": "disconnected",
                    "reason": reason.as_str(),
                    "attempt": self.policy.attempts(),
                }),
            )
            .await;
        self.publish_snapshot();
    }

    async fn close_session(&mut self) {
        if let Some(task) = self.pairing_task.take() {
            task.abort();
        }
        if let Some(task) = self.group_sync_task.take() {
            task.abort();
        }
        if let Some(session) = self.session.take() {
            debug!(session_id = session.id, "closing transport session");
            session.control.close().await;
        }
    }

    async fn shutdown(&mut self, grace: Duration) -> FlushReport {
        let started = Instant::now();
        info!(grace_ms = grace.as_millis() as u64, "connection supervisor shutting down");
        self.reconnect_at = None;
        self.close_session().await;
        self.connection.is_connected = false;
        self.set_phase(ConnectionPhase::Disconnected);

        if !self.dispatch_tasks.is_empty() {
            let tasks = &mut self.dispatch_tasks;
            let drained = tokio::time::timeout(grace / 2, async {
                while tasks.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!(
                    remaining = self.dispatch_tasks.len(),
                    "abandoning in-flight command dispatches"
                );
                self.dispatch_tasks.abort_all();
            }
        }

        self.deps
            .journal
            .record(JOURNAL_KIND_CONNECTION_STATE, json!({ "state": "shutdown" }))
            .await;
        let writer = self.deps.binder.writer().clone();
        let remaining = grace.saturating_sub(started.elapsed());
        let report = match tokio::time::timeout(remaining, writer.flush_pending_now()).await {
            Ok(report) => report,
            Err(_) => {
                error!(
                    grace_ms = grace.as_millis() as u64,
                    "pending writes were not flushed within the shutdown grace period"
                );
                FlushReport::default()
            }
        };
        let fatal = self.status_tx.borrow().is_fatal();
        if !fatal {
            self.status_tx.send_replace(SupervisorStatus::Idle);
        }
        info!(
            flushed = report.flushed.len(),
            failed = report.failed.len(),
            "connection supervisor stopped"
        );
        report
    }

    fn set_phase(&mut self, phase: ConnectionPhase) {
        if self.phase != phase {
            debug!(from = self.phase.as_str(), to = phase.as_str(), "connection phase");
            self.phase = phase;
            self.publish_snapshot();
        }
    }

    fn publish_snapshot(&self) {
        self.snapshot_tx.send_replace(SupervisorSnapshot {
            phase: self.phase,
            connection: self.connection.clone(),
            session_id: self.session_id,
        });
    }
}

async fn next_session_event(session: &mut Option<ActiveSession>) -> Option<InboundEvent> {
    match session {
        Some(session) => session.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn sanitize_phone_number(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Renders `ABCD1234` as `ABCD-1234`.
pub fn format_pairing_code(code: &str) -> String {
    let chars: Vec<char> = code.trim().chars().collect();
    chars
        .chunks(4)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}
