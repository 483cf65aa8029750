use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use zap_connection::{
    ConnectionPhase, ConnectionSupervisor, CredentialStore, Credentials, FileCredentialStore,
    SessionControl, SupervisorConfig, SupervisorDeps, Transport, TransportSession,
};
use zap_dispatch::{
    CommandDispatcher, CommandHandler, CommandInvocation, CommandOutcome, CommandRegistry,
    CommandSpec, DispatcherConfig,
};
use zap_events::{
    BinderConfig, EventBinder, EventJournal, GroupMetadata, InboundEvent, MessageKey,
    OutboundContent, SendOptions, WhatsappClient,
};
use zap_store::{Collection, DebouncedWriter, JsonFileBackend, LoadOutcome, MirrorStore};

static WORKSPACE_COUNTER: AtomicU64 = AtomicU64::new(1);

const GROUP: &str = "120363000000000001@g.us";
const ADMIN: &str = "15550000001@s.whatsapp.net";
const MEMBER: &str = "15550000002@s.whatsapp.net";
const BOT: &str = "15550000009:7@s.whatsapp.net";

struct IsolatedWorkspace {
    root: PathBuf,
}

impl IsolatedWorkspace {
    fn new(label: &str) -> Self {
        let tick = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        let count = WORKSPACE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!(
            "zap-{label}-{}-{tick}-{count}",
            std::process::id()
        ));
        fs::create_dir_all(&root).expect("must create isolated workspace root");
        Self { root }
    }

    fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for IsolatedWorkspace {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

#[derive(Default)]
struct RecordingClient {
    sent: Mutex<Vec<(String, String)>>,
    reactions: Mutex<Vec<String>>,
}

impl RecordingClient {
    fn replies(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("sent").clone()
    }
}

#[async_trait]
impl WhatsappClient for RecordingClient {
    async fn send_message(
        &self,
        chat_id: &str,
        content: OutboundContent,
        _options: SendOptions,
    ) -> Result<()> {
        let OutboundContent::Text { text } = content;
        self.sent
            .lock()
            .expect("sent")
            .push((chat_id.to_string(), text));
        Ok(())
    }

    async fn send_reaction(&self, _chat_id: &str, glyph: &str, _key: &MessageKey) -> Result<()> {
        self.reactions
            .lock()
            .expect("reactions")
            .push(glyph.to_string());
        Ok(())
    }

    async fn group_metadata(&self, group_id: &str) -> Result<GroupMetadata> {
        bail!("metadata for {group_id} should come from the mirror")
    }

    async fn participating_groups(&self) -> Result<Vec<GroupMetadata>> {
        Ok(vec![serde_json::from_value(json!({
            "id": GROUP,
            "subject": "Release crew",
            "participants": [
                { "id": ADMIN, "admin": "superadmin" },
                { "id": MEMBER, "admin": null },
                { "id": "15550000009@s.whatsapp.net", "admin": "admin" }
            ]
        }))?])
    }

    fn own_jid(&self) -> Option<String> {
        Some(BOT.to_string())
    }
}

#[derive(Default)]
struct ClosingControl {
    closed: AtomicUsize,
}

#[async_trait]
impl SessionControl for ClosingControl {
    async fn request_pairing_code(&self, _phone_number: &str) -> Result<String> {
        bail!("pairing not used")
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct ScriptedTransport {
    client: Arc<RecordingClient>,
    control: Arc<ClosingControl>,
    sender: Mutex<Option<mpsc::Sender<InboundEvent>>>,
}

impl ScriptedTransport {
    async fn emit(&self, kind: &str, data: Value) {
        let sender = self
            .sender
            .lock()
            .expect("sender")
            .clone()
            .expect("session must be open");
        let event = InboundEvent::from_parts(kind, data).expect("valid event");
        sender.send(event).await.expect("session alive");
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open_session(&self, _credentials: &Credentials) -> Result<TransportSession> {
        let (tx, rx) = mpsc::channel(32);
        *self.sender.lock().expect("sender") = Some(tx);
        Ok(TransportSession {
            events: rx,
            client: self.client.clone(),
            control: self.control.clone(),
        })
    }
}

#[derive(Default)]
struct MuteHandler {
    calls: AtomicUsize,
}

#[async_trait]
impl CommandHandler for MuteHandler {
    async fn handle(&self, invocation: CommandInvocation) -> Result<CommandOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CommandOutcome::success(format!("muted {}", invocation.args)))
    }
}

async fn wait_for(label: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {label}");
}

fn group_message(id: &str, sender: &str, text: &str) -> Value {
    json!({
        "type": "notify",
        "messages": [{
            "key": { "remoteJid": GROUP, "id": id, "fromMe": false, "participant": sender },
            "message": { "conversation": text },
            "messageTimestamp": 1_700_000_000
        }]
    })
}

fn read_collection(data_dir: &Path, collection: Collection) -> Value {
    let raw = fs::read_to_string(data_dir.join(collection.file_name())).expect("collection file");
    serde_json::from_str(&raw).expect("collection json")
}

#[tokio::test]
async fn integration_event_flow_gates_commands_and_persists_mirror() {
    let workspace = IsolatedWorkspace::new("event-flow");
    let data_dir = workspace.root().join("data");
    let backend = Arc::new(JsonFileBackend::new(&data_dir).expect("backend"));
    let store = Arc::new(MirrorStore::new(backend.clone()));
    store.load_all().await;
    let writer = Arc::new(DebouncedWriter::new(
        store.clone(),
        Duration::from_millis(50),
    ));
    let binder = Arc::new(EventBinder::new(
        store.clone(),
        writer.clone(),
        BinderConfig { message_cap: 3 },
    ));
    let journal = Arc::new(EventJournal::new(store.clone(), writer.clone(), 20));

    let mute = Arc::new(MuteHandler::default());
    let mut registry = CommandRegistry::new();
    registry
        .register(
            CommandSpec::new("mute", "Mute a participant").admin_only(),
            mute.clone(),
        )
        .expect("register");
    let dispatcher = Arc::new(CommandDispatcher::new(
        binder.clone(),
        registry,
        DispatcherConfig::default(),
    ));

    let transport = Arc::new(ScriptedTransport::default());
    let credentials = Arc::new(FileCredentialStore::new(workspace.root().join("session")));
    let supervisor = ConnectionSupervisor::start(
        SupervisorConfig::default(),
        SupervisorDeps {
            transport: transport.clone(),
            credentials: credentials.clone(),
            binder: binder.clone(),
            dispatcher,
            journal,
        },
    )
    .expect("supervisor");

    supervisor.connect().expect("connect");
    wait_for("session open", || transport.sender.lock().expect("sender").is_some()).await;
    transport
        .emit("connection.update", json!({ "connection": "open" }))
        .await;
    wait_for("connected", || {
        supervisor.snapshot().phase == ConnectionPhase::Connected
    })
    .await;
    transport
        .emit(
            "creds.update",
            json!({ "registered": true, "me": { "id": BOT } }),
        )
        .await;

    transport
        .emit("messages.upsert", group_message("m1", MEMBER, "/mute @someone"))
        .await;
    wait_for("member rejection", || transport.client.replies().len() == 1).await;
    assert_eq!(mute.calls.load(Ordering::SeqCst), 0);

    transport
        .emit("messages.upsert", group_message("m2", ADMIN, "/mute 15550000002"))
        .await;
    wait_for("admin command", || mute.calls.load(Ordering::SeqCst) == 1).await;
    wait_for("admin reply", || transport.client.replies().len() == 2).await;
    assert_eq!(transport.client.replies()[1].1, "muted 15550000002");

    for id in ["m3", "m4", "m5"] {
        transport
            .emit("messages.upsert", group_message(id, MEMBER, "hello"))
            .await;
    }
    transport
        .emit(
            "group-participants.update",
            json!({ "id": GROUP, "participants": [MEMBER], "action": "promote" }),
        )
        .await;
    transport
        .emit(
            "blocklist.update",
            json!({ "blocklist": ["15550000666@s.whatsapp.net"], "type": "add" }),
        )
        .await;

    let mut applied = false;
    for _ in 0..200 {
        if binder.is_blocked("15550000666@s.whatsapp.net").await {
            applied = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(applied, "blocklist update should be applied");

    let report = supervisor
        .shutdown(Duration::from_secs(5))
        .await
        .expect("shutdown");
    assert!(report.failed.is_empty());
    assert_eq!(transport.control.closed.load(Ordering::SeqCst), 1);

    let messages = read_collection(&data_dir, Collection::Messages);
    let ids: Vec<&str> = messages[GROUP]
        .as_array()
        .expect("group buffer")
        .iter()
        .filter_map(|message| message["key"]["id"].as_str())
        .collect();
    assert_eq!(ids, vec!["m3", "m4", "m5"]);

    let groups = read_collection(&data_dir, Collection::Groups);
    let promoted = groups[GROUP]["participants"]
        .as_array()
        .expect("participants")
        .iter()
        .find(|participant| participant["id"] == MEMBER)
        .expect("member");
    assert_eq!(promoted["admin"], "admin");

    let blocklist = read_collection(&data_dir, Collection::Blocklist);
    assert!(blocklist.get("15550000666@s.whatsapp.net").is_some());

    let saved = credentials.load_or_create().await.expect("credentials");
    assert!(saved.registered);

    let reopened = MirrorStore::new(backend);
    let outcomes = reopened.load_all().await;
    assert!(outcomes
        .iter()
        .all(|(_, outcome)| !matches!(outcome, LoadOutcome::Recovered { .. })));
    assert_eq!(
        reopened.len(Collection::Groups).await,
        1,
        "groups survive a restart"
    );
}

#[tokio::test]
async fn integration_corrupt_collection_is_backed_up_on_startup() {
    let workspace = IsolatedWorkspace::new("corrupt");
    let data_dir = workspace.root().join("data");
    fs::create_dir_all(&data_dir).expect("data dir");
    fs::write(data_dir.join("groups.json"), "{\"g\": {\"id\": ").expect("seed");

    let store = MirrorStore::new(Arc::new(JsonFileBackend::new(&data_dir).expect("backend")));
    let outcome = store.load(Collection::Groups).await;
    let backup = match outcome {
        LoadOutcome::Recovered { backup } => backup,
        other => panic!("expected recovery, got {other:?}"),
    };
    assert!(store.is_empty(Collection::Groups).await);
    assert_eq!(
        fs::read_to_string(&backup).expect("backup"),
        "{\"g\": {\"id\": "
    );
}
