use std::time::Duration;

use zap_events::DisconnectInfo;

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_millis(10_000);

/// Session lifecycle phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
}

impl ConnectionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionPhase::Disconnected => "disconnected",
            ConnectionPhase::Connecting => "connecting",
            ConnectionPhase::Authenticating => "authenticating",
            ConnectionPhase::Connected => "connected",
        }
    }

    pub fn is_connecting(self) -> bool {
        matches!(
            self,
            ConnectionPhase::Connecting | ConnectionPhase::Authenticating
        )
    }
}

/// Why the transport session ended. Only `LoggedOut` is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    LoggedOut,
    ConnectionClosed,
    ConnectionLost,
    ConnectionReplaced,
    TimedOut,
    BadSession,
    RestartRequired,
    /// Local teardown requested through `force_reconnect`.
    Forced,
    Other(String),
}

impl DisconnectReason {
    pub fn from_info(info: Option<&DisconnectInfo>) -> Self {
        let Some(info) = info else {
            return DisconnectReason::ConnectionClosed;
        };
        if let Some(reason) = info.reason.as_deref().map(str::trim) {
            match reason {
                "loggedOut" => return DisconnectReason::LoggedOut,
                "connectionClosed" => return DisconnectReason::ConnectionClosed,
                "connectionLost" => return DisconnectReason::ConnectionLost,
                "connectionReplaced" => return DisconnectReason::ConnectionReplaced,
                "timedOut" => return DisconnectReason::TimedOut,
                "badSession" => return DisconnectReason::BadSession,
                "restartRequired" => return DisconnectReason::RestartRequired,
                _ => {}
            }
        }
        match info.status_code {
            Some(401) => DisconnectReason::LoggedOut,
            Some(408) => DisconnectReason::TimedOut,
            Some(428) => DisconnectReason::ConnectionClosed,
            Some(440) => DisconnectReason::ConnectionReplaced,
            Some(500) => DisconnectReason::BadSession,
            Some(515) => DisconnectReason::RestartRequired,
            _ => DisconnectReason::Other(
                info.message
                    .clone()
                    .or_else(|| info.reason.clone())
                    .unwrap_or_else(|| "unknown".to_string()),
            ),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DisconnectReason::LoggedOut)
    }

    pub fn as_str(&self) -> &str {
        match self {
            DisconnectReason::LoggedOut => "loggedOut",
            DisconnectReason::ConnectionClosed => "connectionClosed",
            DisconnectReason::ConnectionLost => "connectionLost",
            DisconnectReason::ConnectionReplaced => "connectionReplaced",
            DisconnectReason::TimedOut => "timedOut",
            DisconnectReason::BadSession => "badSession",
            DisconnectReason::RestartRequired => "restartRequired",
            DisconnectReason::Forced => "forced",
            DisconnectReason::Other(message) => message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalReason {
    LoggedOut,
    RetriesExhausted { attempts: u32 },
}

impl std::fmt::Display for FatalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FatalReason::LoggedOut => {
                f.write_str("logged out; delete credentials and link the device again")
            }
            FatalReason::RetriesExhausted { attempts } => write!(
                f,
                "gave up after {attempts} reconnect attempts; restart required"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectDecision {
    Reconnect { attempt: u32, delay: Duration },
    Fatal(FatalReason),
}

/// Bounded fixed-backoff retry counter. With a maximum of N, the first N
/// transient disconnects reconnect and the next one is fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    backoff: Duration,
    attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BACKOFF)
    }
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn on_disconnect(&mut self, reason: &DisconnectReason) -> DisconnectDecision {
        if reason.is_terminal() {
            return DisconnectDecision::Fatal(FatalReason::LoggedOut);
        }
        if self.attempts >= self.max_attempts {
            return DisconnectDecision::Fatal(FatalReason::RetriesExhausted {
                attempts: self.attempts,
            });
        }
        self.attempts = self.attempts.saturating_add(1);
        DisconnectDecision::Reconnect {
            attempt: self.attempts,
            delay: self.backoff,
        }
    }

    pub fn on_connected(&mut self) {
        self.attempts = 0;
    }
}
