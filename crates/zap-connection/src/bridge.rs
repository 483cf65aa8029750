use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};
use zap_core::normalize_user_jid;
use zap_events::{
    GroupMetadata, InboundEvent, MessageKey, OutboundContent, SendOptions, WhatsappClient,
};

use crate::transport::{Credentials, SessionControl, Transport, TransportSession};

pub const DEFAULT_BRIDGE_URL: &str = "ws://127.0.0.1:8787";
pub const DEFAULT_BRIDGE_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const EVENT_BUFFER: usize = 256;

/// One decoded text frame from the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeFrame {
    Event(InboundEvent),
    Response {
        id: u64,
        result: std::result::Result<Value, String>,
    },
}

/// Splits bridge traffic into request responses and event envelopes.
pub fn classify_frame(text: &str) -> Result<BridgeFrame> {
    let value: Value = serde_json::from_str(text).context("failed to parse bridge frame")?;
    let Some(object) = value.as_object() else {
        bail!("bridge frame must be a JSON object");
    };

    if let Some(id) = object.get("id").and_then(Value::as_u64) {
        if let Some(error) = object.get("error").filter(|error| !error.is_null()) {
            let message = error
                .as_str()
                .map(str::to_string)
                .or_else(|| {
                    error
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| error.to_string());
            return Ok(BridgeFrame::Response {
                id,
                result: Err(message),
            });
        }
        if object.contains_key("result") || !object.contains_key("event") {
            let result = object.get("result").cloned().unwrap_or(Value::Null);
            return Ok(BridgeFrame::Response {
                id,
                result: Ok(result),
            });
        }
    }

    let Some(kind) = object.get("event").and_then(Value::as_str) else {
        bail!("bridge frame has neither a response id nor an event name");
    };
    let data = object.get("data").cloned().unwrap_or(Value::Null);
    Ok(BridgeFrame::Event(InboundEvent::from_parts(kind, data)?))
}

/// Transport backed by an external bridge process that speaks the WhatsApp
/// protocol and relays it over a websocket.
#[derive(Debug, Clone)]
pub struct BridgeTransport {
    url: String,
    request_timeout: Duration,
}

impl BridgeTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: DEFAULT_BRIDGE_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn open_session(&self, credentials: &Credentials) -> Result<TransportSession> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .with_context(|| format!("failed to connect to bridge at {}", self.url))?;
        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<WsMessage>();
        let (event_tx, event_rx) = mpsc::channel::<InboundEvent>(EVENT_BUFFER);
        // The reader only ever queues events here, so a slow consumer cannot
        // hold back request responses arriving behind them.
        let (backlog_tx, mut backlog_rx) = mpsc::unbounded_channel::<InboundEvent>();
        let shared = Arc::new(BridgeShared {
            outbound: outbound_tx,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            own_jid: Mutex::new(credentials.account_jid().map(normalize_user_jid)),
            closed: AtomicBool::new(false),
            request_timeout: self.request_timeout,
        });

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let closing = matches!(message, WsMessage::Close(_));
                if let Err(error) = sink.send(message).await {
                    debug!(error = %error, "bridge socket write failed");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(event) = backlog_rx.recv().await {
                if event_tx.send(event).await.is_err() {
                    debug!("bridge event dropped; session receiver is gone");
                    break;
                }
            }
        });

        let reader_shared = shared.clone();
        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let message = match frame {
                    Ok(message) => message,
                    Err(error) => {
                        warn!(error = %error, "bridge socket read failed");
                        break;
                    }
                };
                match message {
                    WsMessage::Text(text) => {
                        reader_shared.handle_text(&backlog_tx, text.as_str());
                    }
                    WsMessage::Binary(bytes) => match std::str::from_utf8(&bytes) {
                        Ok(text) => reader_shared.handle_text(&backlog_tx, text),
                        Err(error) => warn!(error = %error, "invalid utf-8 bridge payload"),
                    },
                    WsMessage::Ping(payload) => {
                        let _ = reader_shared.outbound.send(WsMessage::Pong(payload));
                    }
                    WsMessage::Pong(_) | WsMessage::Frame(_) => {}
                    WsMessage::Close(frame) => {
                        info!(frame = ?frame, "bridge closed the socket");
                        break;
                    }
                }
            }
            reader_shared.closed.store(true, Ordering::SeqCst);
            reader_shared.fail_pending("bridge connection closed");
        });

        let started = match shared
            .request("start", json!({ "credentials": credentials }))
            .await
        {
            Ok(started) => started,
            Err(error) => {
                shared.shutdown();
                return Err(error.context("bridge rejected session start"));
            }
        };
        if let Some(jid) = started.get("jid").and_then(Value::as_str) {
            *lock(&shared.own_jid) = Some(normalize_user_jid(jid));
        }
        info!(url = %self.url, "bridge session started");

        Ok(TransportSession {
            events: event_rx,
            client: Arc::new(BridgeClient {
                shared: shared.clone(),
            }),
            control: Arc::new(BridgeControl { shared }),
        })
    }
}

type PendingReply = oneshot::Sender<std::result::Result<Value, String>>;

struct BridgeShared {
    outbound: mpsc::UnboundedSender<WsMessage>,
    pending: Mutex<HashMap<u64, PendingReply>>,
    next_id: AtomicU64,
    own_jid: Mutex<Option<String>>,
    closed: AtomicBool,
    request_timeout: Duration,
}

impl BridgeShared {
    async fn request(&self, op: &str, args: Value) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("bridge session is closed");
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        lock(&self.pending).insert(id, reply_tx);

        let frame = json!({ "id": id, "op": op, "args": args }).to_string();
        if self.outbound.send(WsMessage::Text(frame.into())).is_err() {
            lock(&self.pending).remove(&id);
            bail!("bridge session is closed");
        }

        match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(message))) => Err(anyhow!("bridge {op} failed: {message}")),
            Ok(Err(_)) => Err(anyhow!("bridge {op} abandoned: connection closed")),
            Err(_) => {
                lock(&self.pending).remove(&id);
                Err(anyhow!(
                    "bridge {op} timed out after {}ms",
                    self.request_timeout.as_millis()
                ))
            }
        }
    }

    fn handle_text(&self, events: &mpsc::UnboundedSender<InboundEvent>, text: &str) {
        match classify_frame(text) {
            Ok(BridgeFrame::Response { id, result }) => {
                let reply = lock(&self.pending).remove(&id);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => debug!(id, "response for unknown bridge request"),
                }
            }
            Ok(BridgeFrame::Event(event)) => {
                if let InboundEvent::CredentialsUpdate(patch) = &event {
                    if let Some(jid) = patch
                        .get("me")
                        .and_then(|me| me.get("id"))
                        .and_then(Value::as_str)
                    {
                        *lock(&self.own_jid) = Some(normalize_user_jid(jid));
                    }
                }
                if events.send(event).is_err() {
                    debug!("bridge event dropped; session receiver is gone");
                }
            }
            Err(error) => warn!(error = %format!("{error:#}"), "ignoring malformed bridge frame"),
        }
    }

    fn fail_pending(&self, reason: &str) {
        for (_, reply) in lock(&self.pending).drain() {
            let _ = reply.send(Err(reason.to_string()));
        }
    }

    fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.outbound.send(WsMessage::Close(None));
        }
        self.fail_pending("bridge session closed");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct BridgeClient {
    shared: Arc<BridgeShared>,
}

#[async_trait]
impl WhatsappClient for BridgeClient {
    async fn send_message(
        &self,
        chat_id: &str,
        content: OutboundContent,
        options: SendOptions,
    ) -> Result<()> {
        self.shared
            .request(
                "sendMessage",
                json!({ "jid": chat_id, "content": content, "options": options }),
            )
            .await?;
        Ok(())
    }

    async fn send_reaction(&self, chat_id: &str, glyph: &str, key: &MessageKey) -> Result<()> {
        self.shared
            .request(
                "sendMessage",
                json!({ "jid": chat_id, "content": { "react": { "text": glyph, "key": key } } }),
            )
            .await?;
        Ok(())
    }

    async fn group_metadata(&self, group_id: &str) -> Result<GroupMetadata> {
        let result = self
            .shared
            .request("groupMetadata", json!({ "jid": group_id }))
            .await?;
        serde_json::from_value(result)
            .with_context(|| format!("bridge returned malformed metadata for {group_id}"))
    }

    async fn participating_groups(&self) -> Result<Vec<GroupMetadata>> {
        let result = self
            .shared
            .request("groupFetchAllParticipating", Value::Null)
            .await?;
        match result {
            Value::Null => Ok(Vec::new()),
            Value::Array(_) => serde_json::from_value(result)
                .context("bridge returned malformed participating groups"),
            Value::Object(groups) => groups
                .into_iter()
                .map(|(_, group)| {
                    serde_json::from_value(group)
                        .context("bridge returned malformed participating groups")
                })
                .collect(),
            other => bail!("unexpected participating groups payload: {other}"),
        }
    }

    fn own_jid(&self) -> Option<String> {
        lock(&self.shared.own_jid).clone()
    }
}

struct BridgeControl {
    shared: Arc<BridgeShared>,
}

#[async_trait]
impl SessionControl for BridgeControl {
    async fn request_pairing_code(&self, phone_number: &str) -> Result<String> {
        let result = self
            .shared
            .request("requestPairingCode", json!({ "phoneNumber": phone_number }))
            .await?;
        result
            .as_str()
            .or_else(|| result.get("code").and_then(Value::as_str))
            .map(str::to_string)
            .ok_or_else(|| anyhow!("bridge returned no pairing code"))
    }

    async fn close(&self) {
        self.shared.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};
    use zap_events::{InboundEvent, OutboundContent, SendOptions};

    use super::{classify_frame, BridgeFrame, BridgeTransport};
    use crate::transport::{Credentials, Transport};

    #[test]
    fn unit_classify_frame_separates_responses_and_events() {
        assert_eq!(
            classify_frame(r#"{"id":7,"result":{"jid":"bot@s.whatsapp.net"}}"#).expect("response"),
            BridgeFrame::Response {
                id: 7,
                result: Ok(json!({ "jid": "bot@s.whatsapp.net" }))
            }
        );
        assert_eq!(
            classify_frame(r#"{"id":8,"error":{"message":"not authorized"}}"#).expect("error"),
            BridgeFrame::Response {
                id: 8,
                result: Err("not authorized".to_string())
            }
        );
        match classify_frame(r#"{"event":"blocklist.set","data":{"blocklist":["a@s.whatsapp.net"]}}"#)
            .expect("event")
        {
            BridgeFrame::Event(InboundEvent::BlocklistSet(ids)) => {
                assert_eq!(ids, vec!["a@s.whatsapp.net".to_string()]);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn regression_classify_frame_rejects_unroutable_frames() {
        assert!(classify_frame("[1,2]").is_err());
        assert!(classify_frame(r#"{"hello":"world"}"#).is_err());
        assert!(classify_frame("not json").is_err());
    }

    #[tokio::test]
    async fn regression_response_behind_event_burst_is_not_held_back() {
        let burst = super::EVENT_BUFFER + 44;
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(socket).await.expect("handshake");
            while let Some(Ok(message)) = ws.next().await {
                let WsMessage::Text(text) = message else {
                    continue;
                };
                let request: Value = serde_json::from_str(text.as_str()).expect("request");
                let op = request["op"].as_str().expect("op").to_string();
                let result = match op.as_str() {
                    "start" => json!({ "jid": "bot@s.whatsapp.net" }),
                    _ => json!([{ "id": "g1@g.us", "subject": "Ops" }]),
                };
                let response = json!({ "id": request["id"], "result": result }).to_string();
                ws.send(WsMessage::Text(response.into())).await.expect("respond");
                if op == "start" {
                    for index in 0..burst {
                        let event = json!({
                            "event": "chats.upsert",
                            "data": [{ "id": format!("c{index}@s.whatsapp.net") }]
                        })
                        .to_string();
                        ws.send(WsMessage::Text(event.into())).await.expect("event");
                    }
                } else {
                    break;
                }
            }
            let _ = ws.close(None).await;
        });

        let transport = BridgeTransport::new(format!("ws://{address}"))
            .with_request_timeout(Duration::from_secs(5));
        let mut session = transport
            .open_session(&Credentials::default())
            .await
            .expect("open session");
        tokio::time::sleep(Duration::from_millis(200)).await;

        let groups = session
            .client
            .participating_groups()
            .await
            .expect("groups answered while events are queued");
        assert_eq!(groups.len(), 1);

        let mut received = 0;
        while let Some(event) = session.events.recv().await {
            assert_eq!(event.kind(), "chats.upsert");
            received += 1;
        }
        assert_eq!(received, burst);
        server.await.expect("server");
        session.control.close().await;
    }

    #[tokio::test]
    async fn integration_bridge_session_relays_requests_and_events() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(socket).await.expect("handshake");
            let mut ops = Vec::new();
            while let Some(Ok(message)) = ws.next().await {
                let WsMessage::Text(text) = message else {
                    continue;
                };
                let request: Value = serde_json::from_str(text.as_str()).expect("request");
                let op = request["op"].as_str().expect("op").to_string();
                let id = request["id"].clone();
                ops.push(op.clone());
                let result = match op.as_str() {
                    "start" => json!({ "jid": "15550001111:4@s.whatsapp.net" }),
                    _ => json!({ "ok": true }),
                };
                let response = json!({ "id": id, "result": result }).to_string();
                ws.send(WsMessage::Text(response.into())).await.expect("respond");
                if op == "sendMessage" {
                    let event = json!({
                        "event": "connection.update",
                        "data": { "connection": "open" }
                    })
                    .to_string();
                    ws.send(WsMessage::Text(event.into())).await.expect("event");
                    break;
                }
            }
            let _ = ws.close(None).await;
            ops
        });

        let transport = BridgeTransport::new(format!("ws://{address}"));
        let mut session = transport
            .open_session(&Credentials::default())
            .await
            .expect("open session");
        assert_eq!(
            session.client.own_jid().as_deref(),
            Some("15550001111@s.whatsapp.net")
        );

        session
            .client
            .send_message(
                "user@s.whatsapp.net",
                OutboundContent::text("hi"),
                SendOptions::default(),
            )
            .await
            .expect("send");
        match session.events.recv().await {
            Some(InboundEvent::ConnectionUpdate(update)) => assert!(update.connection.is_some()),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(session.events.recv().await.is_none());

        let ops = server.await.expect("server");
        assert_eq!(ops, vec!["start".to_string(), "sendMessage".to_string()]);
        session.control.close().await;
    }
}
