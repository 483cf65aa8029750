use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use zap_connection::{SupervisorConfig, DEFAULT_BRIDGE_URL};
use zap_dispatch::DispatcherConfig;
use zap_events::BinderConfig;

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u32(value: &str) -> Result<u32, String> {
    let parsed = value
        .parse::<u32>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_command_prefix(value: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("command prefix must not be empty".to_string());
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err("command prefix must not contain whitespace".to_string());
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Parser)]
#[command(
    name = "zap-bot",
    about = "WhatsApp automation bot with a persistent mirror and gated commands",
    version
)]
pub struct Cli {
    #[arg(
        long = "state-dir",
        env = "ZAP_STATE_DIR",
        default_value = ".zap",
        help = "Root directory for persisted collections and session credentials"
    )]
    pub state_dir: PathBuf,

    #[arg(
        long = "command-prefix",
        env = "ZAP_COMMAND_PREFIX",
        default_value = "/",
        value_parser = parse_command_prefix,
        help = "Prefix that marks a message as a command"
    )]
    pub command_prefix: String,

    #[arg(
        long = "debounce-ms",
        env = "ZAP_DEBOUNCE_MS",
        default_value_t = 1_000,
        value_parser = parse_positive_u64,
        help = "Quiet period before a mutated collection is written"
    )]
    pub debounce_ms: u64,

    #[arg(
        long = "message-cap",
        env = "ZAP_MESSAGE_CAP",
        default_value_t = 100,
        value_parser = parse_positive_usize,
        help = "Messages retained per chat"
    )]
    pub message_cap: usize,

    #[arg(
        long = "event-journal-cap",
        env = "ZAP_EVENT_JOURNAL_CAP",
        default_value_t = 500,
        value_parser = parse_positive_usize,
        help = "Operational events retained in the events collection"
    )]
    pub event_journal_cap: usize,

    #[arg(
        long = "autosave-interval-seconds",
        env = "ZAP_AUTOSAVE_INTERVAL_SECONDS",
        default_value_t = 120,
        value_parser = parse_positive_u64,
        help = "Interval between full-store flushes of dirty collections"
    )]
    pub autosave_interval_seconds: u64,

    #[arg(
        long = "max-reconnect-attempts",
        env = "ZAP_MAX_RECONNECT_ATTEMPTS",
        default_value_t = 5,
        value_parser = parse_positive_u32,
        help = "Consecutive reconnects attempted before giving up"
    )]
    pub max_reconnect_attempts: u32,

    #[arg(
        long = "reconnect-backoff-ms",
        env = "ZAP_RECONNECT_BACKOFF_MS",
        default_value_t = 10_000,
        value_parser = parse_positive_u64,
        help = "Fixed delay before each reconnect"
    )]
    pub reconnect_backoff_ms: u64,

    #[arg(
        long = "pairing-code",
        env = "ZAP_PAIRING_CODE",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Link the device with a pairing code instead of a QR code"
    )]
    pub pairing_code: bool,

    #[arg(
        long = "phone-number",
        env = "ZAP_PHONE_NUMBER",
        help = "Account phone number in international format, used in pairing-code mode"
    )]
    pub phone_number: Option<String>,

    #[arg(
        long = "pairing-code-delay-ms",
        env = "ZAP_PAIRING_CODE_DELAY_MS",
        default_value_t = 3_000,
        value_parser = parse_positive_u64,
        help = "Delay between opening a session and requesting a pairing code"
    )]
    pub pairing_code_delay_ms: u64,

    #[arg(
        long = "bridge-url",
        env = "ZAP_BRIDGE_URL",
        default_value = DEFAULT_BRIDGE_URL,
        help = "Websocket URL of the WhatsApp protocol bridge"
    )]
    pub bridge_url: String,

    #[arg(
        long = "shutdown-grace-ms",
        env = "ZAP_SHUTDOWN_GRACE_MS",
        default_value_t = 5_000,
        value_parser = parse_positive_u64,
        help = "Upper bound for flushing pending writes on shutdown"
    )]
    pub shutdown_grace_ms: u64,
}

impl Cli {
    pub fn data_dir(&self) -> PathBuf {
        self.state_dir.join("data")
    }

    pub fn session_dir(&self) -> PathBuf {
        self.state_dir.join("session")
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn binder_config(&self) -> BinderConfig {
        BinderConfig {
            message_cap: self.message_cap,
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            command_prefix: self.command_prefix.clone(),
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_backoff: Duration::from_millis(self.reconnect_backoff_ms),
            pairing_code: self.pairing_code,
            phone_number: self.phone_number.clone(),
            pairing_code_delay: Duration::from_millis(self.pairing_code_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::Parser;

    use super::Cli;

    #[test]
    fn unit_cli_defaults_match_documented_configuration() {
        let cli = Cli::try_parse_from(["zap-bot"]).expect("parse");
        assert_eq!(cli.command_prefix, "/");
        assert_eq!(cli.debounce_delay(), Duration::from_secs(1));
        assert_eq!(cli.message_cap, 100);
        assert_eq!(cli.event_journal_cap, 500);
        assert_eq!(cli.autosave_interval(), Duration::from_secs(120));
        assert!(!cli.pairing_code);

        let supervisor = cli.supervisor_config();
        assert_eq!(supervisor.max_reconnect_attempts, 5);
        assert_eq!(supervisor.reconnect_backoff, Duration::from_secs(10));
        assert_eq!(cli.data_dir(), cli.state_dir.join("data"));
    }

    #[test]
    fn functional_cli_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "zap-bot",
            "--command-prefix",
            "!",
            "--message-cap",
            "25",
            "--pairing-code",
            "--phone-number",
            "+15550001111",
            "--max-reconnect-attempts",
            "2",
        ])
        .expect("parse");
        assert_eq!(cli.dispatcher_config().command_prefix, "!");
        assert_eq!(cli.binder_config().message_cap, 25);
        let supervisor = cli.supervisor_config();
        assert!(supervisor.pairing_code);
        assert_eq!(supervisor.phone_number.as_deref(), Some("+15550001111"));
        assert_eq!(supervisor.max_reconnect_attempts, 2);
    }

    #[test]
    fn regression_cli_rejects_zero_and_blank_values() {
        assert!(Cli::try_parse_from(["zap-bot", "--debounce-ms", "0"]).is_err());
        assert!(Cli::try_parse_from(["zap-bot", "--message-cap", "0"]).is_err());
        assert!(Cli::try_parse_from(["zap-bot", "--max-reconnect-attempts", "0"]).is_err());
        assert!(Cli::try_parse_from(["zap-bot", "--command-prefix", " "]).is_err());
    }
}
