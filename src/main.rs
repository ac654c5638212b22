//! # taskflow
//!
//! Realtime client binary: loads settings, installs logging, builds the
//! credential chain and the broker client, then logs every logical event
//! until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use taskflow_auth::{
    auth_file_path, ChainedTokenStore, CredentialStore, EnvTokenStore, FileTokenStore,
    StaticTokenStore,
};
use taskflow_core::{EventKey, RealtimeError, WorkspaceId};
use taskflow_realtime::{ConnectionState, ErrorFilter, RealtimeClient, RealtimeConfig};
use taskflow_settings::TaskflowSettings;
use taskflow_telemetry::{init_telemetry, TelemetryConfig};
use tracing::{error, info, warn};

/// Actions the backend publishes on the baseline topics.
const TASK_ACTIONS: &[&str] = &["created", "updated", "deleted", "moved", "assigned"];
const WORKSPACE_ACTIONS: &[&str] = &["created", "updated", "deleted"];
const USER_ACTIONS: &[&str] = &["joined", "left", "online", "offline"];

/// Taskflow realtime client.
#[derive(Parser, Debug)]
#[command(name = "taskflow", about = "Follow taskflow realtime events")]
struct Cli {
    /// Settings file (defaults to ~/.taskflow/settings.json).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Bearer token; takes precedence over TASKFLOW_TOKEN and the token file.
    #[arg(long)]
    token: Option<String>,

    /// Workspace to join. Repeat for several.
    #[arg(long = "workspace")]
    workspaces: Vec<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

fn load_settings(cli: &Cli) -> Result<TaskflowSettings> {
    let mut settings = match &cli.settings {
        Some(path) => taskflow_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => taskflow_settings::load_settings().context("Failed to load settings")?,
    };
    if cli.json_logs {
        settings.logging.json = true;
    }
    Ok(settings)
}

/// `--token`, then `TASKFLOW_TOKEN`, then the token file.
fn credential_chain(cli: &Cli, settings: &TaskflowSettings) -> Arc<dyn CredentialStore> {
    let token_file = settings
        .auth
        .token_file
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| auth_file_path(&taskflow_settings::taskflow_dir()));

    let mut chain = ChainedTokenStore::new();
    if let Some(token) = &cli.token {
        chain = chain.with(Arc::new(StaticTokenStore::new(token.clone())));
    }
    Arc::new(
        chain
            .with(Arc::new(EnvTokenStore::new()))
            .with(Arc::new(FileTokenStore::new(token_file))),
    )
}

fn log_events(client: &RealtimeClient) {
    let mut keys = vec![
        EventKey::NotificationNew,
        EventKey::ConnectionEstablished,
        EventKey::ConnectionReconnecting,
        EventKey::ConnectionLost,
    ];
    keys.extend(TASK_ACTIONS.iter().map(|a| EventKey::task(*a)));
    keys.extend(WORKSPACE_ACTIONS.iter().map(|a| EventKey::workspace(*a)));
    keys.extend(USER_ACTIONS.iter().map(|a| EventKey::user(*a)));

    for key in keys {
        let name = key.to_string();
        let _ = client.on(key, move |event| {
            info!(event = %name, payload = %event.payload(), "realtime event");
        });
    }

    let _ = client.on_error(ErrorFilter::Any, |err: &RealtimeError| {
        warn!(category = %err.category(), error = %err, "realtime error");
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    init_telemetry(TelemetryConfig::from_settings(&settings.logging)?)?;

    let config = RealtimeConfig::from_settings(&settings.realtime);
    info!(url = %config.endpoint_url, "starting taskflow realtime client");

    let credentials = credential_chain(&cli, &settings);

    let client = RealtimeClient::websocket(config, credentials);
    log_events(&client);

    match client.connect().await {
        Ok(()) => {}
        Err(e @ RealtimeError::Auth(_)) => {
            bail!("{e}; pass --token, set TASKFLOW_TOKEN, or write the token file")
        }
        Err(e) => warn!(error = %e, "initial connect failed, retrying in background"),
    }

    for id in &cli.workspaces {
        let workspace_id = WorkspaceId::new(id.as_str());
        let label = workspace_id.clone();
        let joined = client
            .subscribe_to_workspace_channel(&workspace_id, move |message| {
                info!(workspace_id = %label, %message, "workspace message");
            })
            .await;
        match joined {
            Ok(()) => info!(workspace_id = %workspace_id, "joined workspace"),
            Err(e) => warn!(workspace_id = %workspace_id, error = %e, "failed to join workspace"),
        }
    }

    let mut state = client.watch_state();
    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl+c")?;
            info!("shutting down");
            Ok(())
        }
        _ = state.wait_for(|s| *s == ConnectionState::Failed) => {
            error!("broker unreachable, giving up");
            Err(anyhow::anyhow!(
                "gave up after {} reconnection attempts",
                client.config().max_reconnect_attempts
            ))
        }
    };

    for id in &cli.workspaces {
        client.leave_workspace(&WorkspaceId::new(id.as_str()));
    }
    client.disconnect();
    outcome
}
