mod command;
mod config;
mod connection;
mod identity;
mod panel;
mod process;
mod telemetry;
mod update;

use clap::Parser;
use command::{CommandDispatcher, HandlerContext};
use config::AgentConfig;
use connection::{ChannelConfig, ConnectionEvent, ControlChannel};
use identity::{AgentIdentity, FileSecretStore, SharedIdentity};
use panel::{CertCli, PanelCli};
use std::path::PathBuf;
use std::sync::Arc;
use telemetry::{HostStatusCollector, StatusCollector};
use tokio::sync::RwLock;
use update::{GitFetcher, SelfUpdateManager, SupervisedRestart};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "warden-agent", about = "Host-resident control agent")]
struct Args {
    /// Path to the agent config file
    #[arg(long, env = "WARDEN_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let config = AgentConfig::load(args.config.as_deref())?;

    info!("Warden agent starting: {}", config.agent_id);
    info!("  controller: {}", config.server_url);

    // A previously rotated key takes precedence over the configured one
    let secret_store = FileSecretStore::new(&config.secret_file);
    let shared_secret = secret_store
        .load()
        .await
        .unwrap_or_else(|| config.agent_key.clone());
    let identity: SharedIdentity = Arc::new(RwLock::new(AgentIdentity {
        agent_id: config.agent_id.clone(),
        shared_secret,
    }));

    let collector: Arc<dyn StatusCollector> = Arc::new(HostStatusCollector::new());

    let channel_config = ChannelConfig {
        agent_id: config.agent_id.clone(),
        endpoint: config.server_url.clone(),
        ..Default::default()
    };
    let mut channel = ControlChannel::new(channel_config, identity.clone(), collector);

    let updater = Arc::new(SelfUpdateManager::new(
        Arc::new(GitFetcher::new(&config.repo_dir, &config.upstream)),
        Arc::new(SupervisedRestart),
    ));

    let dispatcher = CommandDispatcher::new(HandlerContext {
        channel: channel.handle(),
        identity,
        secret_store: Arc::new(secret_store),
        panel: PanelCli::new(&config.panel_cli),
        cert: CertCli::new(&config.cert_tool),
        updater,
        update_script: config.update_script.clone(),
    });

    // Main event loop
    loop {
        match channel.recv().await {
            Some(ConnectionEvent::Connected) => {
                info!("Connected to controller");
            }
            Some(ConnectionEvent::Disconnected { reason }) => {
                warn!("Disconnected: {}", reason);
            }
            Some(ConnectionEvent::ConnectFailed { reason }) => {
                error!("Connection failed: {}", reason);
            }
            Some(ConnectionEvent::Received(command)) => {
                dispatcher.dispatch(command);
            }
            None => {
                error!("Control channel closed");
                break;
            }
        }
    }

    Ok(())
}
