//! Edgeboot - bring up proxy, tunnel and monitoring binaries behind a single
//! HTTP port and publish the resulting subscription.

mod server;

use clap::Parser;
use edgeboot_bootstrap::{BootstrapConfig, Orchestrator, RestartPolicy, SubscriptionSlot, Supervisor};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "edgeboot")]
#[command(
    author,
    version,
    about = "Bootstrap edge binaries behind one HTTP port and publish a subscription"
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, env = "VERBOSE")]
    verbose: bool,

    /// HTTP port for the health endpoint
    #[arg(long, env = "PORT", default_value = "3000")]
    port: u16,

    /// Working directory for binaries, config and logs
    #[arg(long, env = "FILE_PATH", default_value = "./tmp")]
    file_path: PathBuf,

    /// Route the subscription is published under
    #[arg(long, env = "SUB_PATH", default_value = "sub")]
    sub_path: String,

    /// Shared identity credential for every listener
    #[arg(long, env = "UUID", default_value = edgeboot_bootstrap::config::DEFAULT_CREDENTIAL)]
    uuid: String,

    /// Monitoring server endpoint
    #[arg(long, env = "NEZHA_SERVER")]
    nezha_server: Option<String>,

    /// Monitoring agent key
    #[arg(long, env = "NEZHA_KEY", hide_env_values = true)]
    nezha_key: Option<String>,

    /// Fixed tunnel hostname, skips log discovery
    #[arg(long, env = "ARGO_DOMAIN")]
    argo_domain: Option<String>,

    /// Tunnel token or credentials JSON
    #[arg(long, env = "ARGO_AUTH", hide_env_values = true)]
    argo_auth: Option<String>,

    /// Port of the public listener the tunnel forwards to
    #[arg(long, env = "ARGO_PORT", default_value = "8001")]
    argo_port: u16,

    /// Address clients connect to
    #[arg(long, env = "CFIP", default_value = edgeboot_bootstrap::config::DEFAULT_ADVERTISED_ADDRESS)]
    cfip: String,

    /// Port clients connect to
    #[arg(long, env = "CFPORT", default_value = "443")]
    cfport: u16,

    /// Display name of the node
    #[arg(long, env = "NAME")]
    name: Option<String>,

    /// Download base for engine and tunnel, `{arch}` is replaced
    #[arg(long, env = "ARTIFACT_BASE_URL", default_value = edgeboot_bootstrap::config::DEFAULT_ARTIFACT_BASE_URL)]
    artifact_base_url: String,

    /// Seconds to wait for the tunnel hostname
    #[arg(long, env = "TUNNEL_WAIT_SECS", default_value = "60")]
    tunnel_wait_secs: u64,

    /// Delete binaries and logs this many seconds after launch (0 keeps them)
    #[arg(long, env = "CLEANUP_AFTER_SECS", default_value = "0")]
    cleanup_after_secs: u64,

    /// Write the encoded subscription to the working directory
    #[arg(long, env = "PERSIST_SUB", default_value_t = true, action = clap::ArgAction::Set)]
    persist_sub: bool,

    /// Relaunch crashed binaries up to this many times (0 disables)
    #[arg(long, env = "RESTART_LIMIT", default_value = "0")]
    restart_limit: u32,
}

impl Cli {
    fn bootstrap_config(&self) -> BootstrapConfig {
        BootstrapConfig {
            http_port: self.port,
            work_dir: self.file_path.clone(),
            sub_path: self.sub_path.clone(),
            credential: self.uuid.clone(),
            monitor_server: self.nezha_server.clone(),
            monitor_key: self.nezha_key.clone(),
            tunnel_domain: self.argo_domain.clone(),
            tunnel_auth: self.argo_auth.clone(),
            tunnel_port: self.argo_port,
            advertised_address: self.cfip.clone(),
            advertised_port: self.cfport,
            node_name: self.name.clone(),
            artifact_base_url: self.artifact_base_url.clone(),
            tunnel_wait: Duration::from_secs(self.tunnel_wait_secs),
            cleanup_after: (self.cleanup_after_secs > 0)
                .then(|| Duration::from_secs(self.cleanup_after_secs)),
            persist_subscription: self.persist_sub,
            restart_limit: self.restart_limit,
            ..Default::default()
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let config = cli.bootstrap_config().validate()?;
    std::fs::create_dir_all(&config.work_dir)?;

    let slot = SubscriptionSlot::new();

    // Health checks must be answerable before any slow work starts.
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    let supervisor = Supervisor::new(RestartPolicy::from_limit(config.restart_limit));
    let orchestrator = Orchestrator::new(config, supervisor, slot.clone());
    tokio::spawn(async move {
        match orchestrator.run().await {
            Ok(report) => info!(
                "Bootstrap finished: launched {:?}, published {}",
                report.launched, report.published
            ),
            Err(e) => error!("Bootstrap failed: {}", e),
        }
    });

    axum::serve(listener, server::router(slot))
        .with_graceful_shutdown(server::shutdown_signal())
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
