//! Connection supervisor: session lifecycle, bounded reconnects, the
//! event-processing loop and the websocket bridge transport.

mod bridge;
mod reconnect;
mod supervisor;
mod transport;

pub use bridge::{
    classify_frame, BridgeFrame, BridgeTransport, DEFAULT_BRIDGE_REQUEST_TIMEOUT,
    DEFAULT_BRIDGE_URL,
};
pub use reconnect::{
    ConnectionPhase, DisconnectDecision, DisconnectReason, FatalReason, ReconnectPolicy,
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BACKOFF,
};
pub use supervisor::{
    format_pairing_code, ConnectionSupervisor, SupervisorConfig, SupervisorDeps,
    SupervisorSnapshot, SupervisorStatus, DEFAULT_PAIRING_CODE_DELAY, DEFAULT_SHUTDOWN_GRACE,
};
pub use transport::{
    CredentialStore, Credentials, FileCredentialStore, SessionControl, Transport,
    TransportSession, CREDENTIALS_FILE_NAME,
};
