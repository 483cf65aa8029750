use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use zap_connection::{
    BridgeTransport, ConnectionSupervisor, FileCredentialStore, SupervisorDeps, Transport,
};
use zap_dispatch::{CommandDispatcher, CommandRegistry};
use zap_events::{EventBinder, EventJournal};
use zap_store::{
    start_autosave, AutosaveHandle, DebouncedWriter, JsonFileBackend, LoadOutcome, MirrorStore,
};

use crate::cli_args::Cli;
use crate::commands::register_builtin_commands;

pub fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

/// Every long-lived component of a running bot.
pub struct BotRuntime {
    pub store: Arc<MirrorStore>,
    pub writer: Arc<DebouncedWriter>,
    pub binder: Arc<EventBinder>,
    pub journal: Arc<EventJournal>,
    pub supervisor: ConnectionSupervisor,
    autosave: AutosaveHandle,
}

impl BotRuntime {
    /// Stops the supervisor (which flushes pending writes) and then the
    /// autosave loop.
    pub async fn shutdown(mut self, grace: Duration) -> Result<()> {
        let report = self
            .supervisor
            .shutdown(grace)
            .await
            .context("failed to stop connection supervisor")?;
        if !report.failed.is_empty() {
            warn!(failed = ?report.failed, "some collections could not be flushed on shutdown");
        }
        let autosave = self.autosave.shutdown().await;
        info!(
            flushed = report.flushed.len() + autosave.flushed.len(),
            "bot stopped"
        );
        Ok(())
    }
}

/// Builds the store, binder, dispatcher and supervisor on top of `transport`.
/// Startup aborts when the state directory cannot be created.
pub async fn start_bot(cli: &Cli, transport: Arc<dyn Transport>) -> Result<BotRuntime> {
    let data_dir = cli.data_dir();
    let backend = JsonFileBackend::new(&data_dir)
        .with_context(|| format!("failed to prepare data directory {}", data_dir.display()))?;
    let store = Arc::new(MirrorStore::new(Arc::new(backend)));
    for (collection, outcome) in store.load_all().await {
        if let LoadOutcome::Recovered { backup } = outcome {
            warn!(
                collection = collection.as_str(),
                backup = %backup,
                "collection recovered from corrupt file"
            );
        }
    }

    let autosave = start_autosave(store.clone(), cli.autosave_interval())
        .context("failed to start autosave")?;
    let writer = Arc::new(DebouncedWriter::new(store.clone(), cli.debounce_delay()));
    let binder = Arc::new(EventBinder::new(
        store.clone(),
        writer.clone(),
        cli.binder_config(),
    ));
    let journal = Arc::new(EventJournal::new(
        store.clone(),
        writer.clone(),
        cli.event_journal_cap,
    ));

    let mut registry = CommandRegistry::new();
    register_builtin_commands(&mut registry, binder.clone())?;
    let dispatcher = Arc::new(CommandDispatcher::new(
        binder.clone(),
        registry,
        cli.dispatcher_config(),
    ));

    let supervisor = ConnectionSupervisor::start(
        cli.supervisor_config(),
        SupervisorDeps {
            transport,
            credentials: Arc::new(FileCredentialStore::new(cli.session_dir())),
            binder: binder.clone(),
            dispatcher,
            journal: journal.clone(),
        },
    )?;
    let stats = store.stats().await;
    info!(
        state_dir = %cli.state_dir.display(),
        records = ?stats.records,
        prefix = %cli.command_prefix,
        "bot runtime ready"
    );

    Ok(BotRuntime {
        store,
        writer,
        binder,
        journal,
        supervisor,
        autosave,
    })
}

/// Runs the bot against the configured bridge until Ctrl-C.
pub async fn run(cli: Cli) -> Result<()> {
    let transport = Arc::new(BridgeTransport::new(cli.bridge_url.clone()));
    let runtime = start_bot(&cli, transport).await?;
    runtime.supervisor.connect()?;

    let mut status = runtime.supervisor.subscribe();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for shutdown signal")?;
                info!("shutdown requested");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                info!(status = ?current, "supervisor status changed");
            }
        }
    }

    runtime.shutdown(cli.shutdown_grace()).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use clap::Parser;
    use tempfile::tempdir;
    use zap_connection::{Credentials, Transport, TransportSession};
    use zap_store::Collection;

    use super::start_bot;
    use crate::cli_args::Cli;

    struct UnreachableTransport;

    #[async_trait]
    impl Transport for UnreachableTransport {
        async fn open_session(&self, _credentials: &Credentials) -> Result<TransportSession> {
            bail!("bridge offline")
        }
    }

    fn cli_for(state_dir: &std::path::Path) -> Cli {
        Cli::try_parse_from([
            "zap-bot",
            "--state-dir",
            state_dir.to_str().expect("utf-8 path"),
        ])
        .expect("parse")
    }

    #[tokio::test]
    async fn integration_start_bot_restores_collections_and_flushes_on_shutdown() {
        let temp = tempdir().expect("tempdir");
        let data_dir = temp.path().join("data");
        std::fs::create_dir_all(&data_dir).expect("data dir");
        std::fs::write(
            data_dir.join("blocklist.json"),
            r#"{ "spam@s.whatsapp.net": true }"#,
        )
        .expect("seed");
        std::fs::write(data_dir.join("chats.json"), "{ truncated").expect("seed");

        let cli = cli_for(temp.path());
        let runtime = start_bot(&cli, Arc::new(UnreachableTransport))
            .await
            .expect("start");
        assert!(runtime.binder.is_blocked("spam@s.whatsapp.net").await);
        assert!(runtime.store.is_dirty(Collection::Chats).await);

        runtime
            .journal
            .record("test", serde_json::json!({ "step": 1 }))
            .await;
        runtime
            .shutdown(cli.shutdown_grace())
            .await
            .expect("shutdown");

        let chats = std::fs::read_to_string(data_dir.join("chats.json")).expect("chats");
        assert_eq!(chats.trim(), "{}");
        let events = std::fs::read_to_string(data_dir.join("events.json")).expect("events");
        assert!(events.contains("\"test\""));
        let backups = std::fs::read_dir(&data_dir)
            .expect("list")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().contains(".corrupt-"))
            .count();
        assert_eq!(backups, 1);
    }

    #[tokio::test]
    async fn regression_uncreatable_state_dir_aborts_startup() {
        let temp = tempdir().expect("tempdir");
        let blocker = temp.path().join("state");
        std::fs::write(&blocker, "not a directory").expect("blocker");

        let cli = cli_for(&blocker);
        assert!(start_bot(&cli, Arc::new(UnreachableTransport)).await.is_err());
    }
}
