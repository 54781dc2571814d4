//! Bootstrap configuration and working-directory layout.

use crate::listener::INTERNAL_PORTS;
use edgeboot_common::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_CREDENTIAL: &str = "9afd1229-b893-40c1-84dd-51e7ce204913";
pub const DEFAULT_ADVERTISED_ADDRESS: &str = "cdns.doon.eu.org";
pub const DEFAULT_NODE_NAME: &str = "edge-node";
pub const DEFAULT_ARTIFACT_BASE_URL: &str = "https://{arch}.ssss.nyc.mn";
pub const DEFAULT_AGENT_RELEASE_API: &str =
    "https://api.github.com/repos/komari-monitor/komari-agent/releases/latest";
pub const DEFAULT_AGENT_FALLBACK_URL: &str =
    "https://github.com/komari-monitor/komari-agent/releases/download/v1.1.40/komari-agent-linux-{arch}";

/// Everything the orchestrator needs for one run.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Port of the health endpoint; only used for collision checks.
    pub http_port: u16,
    pub work_dir: PathBuf,
    pub sub_path: String,
    /// Shared secret used by every listener.
    pub credential: String,
    pub monitor_server: Option<String>,
    pub monitor_key: Option<String>,
    pub tunnel_domain: Option<String>,
    pub tunnel_auth: Option<String>,
    /// Port of the public listener the tunnel forwards to.
    pub tunnel_port: u16,
    pub advertised_address: String,
    pub advertised_port: u16,
    pub node_name: Option<String>,
    /// Base URL for engine and tunnel downloads; `{arch}` is replaced with the release tag.
    pub artifact_base_url: String,
    pub agent_release_api: String,
    pub agent_fallback_url: String,
    pub tunnel_wait: Duration,
    pub cleanup_after: Option<Duration>,
    pub persist_subscription: bool,
    /// Relaunch limit per crashed process; zero disables restarts.
    pub restart_limit: u32,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            http_port: 3000,
            work_dir: PathBuf::from("./tmp"),
            sub_path: "sub".to_string(),
            credential: DEFAULT_CREDENTIAL.to_string(),
            monitor_server: None,
            monitor_key: None,
            tunnel_domain: None,
            tunnel_auth: None,
            tunnel_port: 8001,
            advertised_address: DEFAULT_ADVERTISED_ADDRESS.to_string(),
            advertised_port: 443,
            node_name: None,
            artifact_base_url: DEFAULT_ARTIFACT_BASE_URL.to_string(),
            agent_release_api: DEFAULT_AGENT_RELEASE_API.to_string(),
            agent_fallback_url: DEFAULT_AGENT_FALLBACK_URL.to_string(),
            tunnel_wait: Duration::from_secs(60),
            cleanup_after: None,
            persist_subscription: true,
            restart_limit: 0,
        }
    }
}

impl BootstrapConfig {
    /// Check cross-field constraints. Empty optional strings are treated as unset.
    pub fn validate(mut self) -> Result<Self> {
        self.monitor_server = non_empty(self.monitor_server);
        self.monitor_key = non_empty(self.monitor_key);
        self.tunnel_domain = non_empty(self.tunnel_domain);
        self.tunnel_auth = non_empty(self.tunnel_auth);
        self.node_name = non_empty(self.node_name);

        self.sub_path = self.sub_path.trim_matches('/').to_string();
        if self.sub_path.is_empty() {
            return Err(Error::Config("subscription path must not be empty".to_string()));
        }

        if self.tunnel_port == self.http_port {
            return Err(Error::Config(format!(
                "tunnel port {} collides with the HTTP port",
                self.tunnel_port
            )));
        }
        if INTERNAL_PORTS.contains(&self.tunnel_port) {
            return Err(Error::Config(format!(
                "tunnel port {} collides with an internal listener",
                self.tunnel_port
            )));
        }

        if self.credential.is_empty() {
            return Err(Error::Config("identity credential must not be empty".to_string()));
        }
        if uuid::Uuid::parse_str(&self.credential).is_err() {
            warn!("Credential is not a UUID; some clients may reject it");
        }

        if self.cleanup_after.is_some() && self.restart_limit > 0 {
            warn!("Cleanup removes binaries, restarts after cleanup will fail");
        }

        Ok(self)
    }

    /// Monitoring agent is enabled only when both server and key are present.
    pub fn monitor_enabled(&self) -> bool {
        self.monitor_server.is_some() && self.monitor_key.is_some()
    }

    pub fn node_name(&self) -> &str {
        self.node_name.as_deref().unwrap_or(DEFAULT_NODE_NAME)
    }

    pub fn layout(&self) -> WorkLayout {
        WorkLayout::new(&self.work_dir)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Files the bootstrap run reads and writes inside the working directory.
#[derive(Debug, Clone)]
pub struct WorkLayout {
    pub root: PathBuf,
    pub engine: PathBuf,
    pub tunnel: PathBuf,
    pub agent: PathBuf,
    pub engine_config: PathBuf,
    pub boot_log: PathBuf,
    pub tunnel_credentials: PathBuf,
    pub tunnel_config: PathBuf,
    pub subscription: PathBuf,
}

impl WorkLayout {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            engine: root.join("engine"),
            tunnel: root.join("tunnel"),
            agent: root.join("agent"),
            engine_config: root.join("config.json"),
            boot_log: root.join("boot.log"),
            tunnel_credentials: root.join("tunnel.json"),
            tunnel_config: root.join("tunnel.yml"),
            subscription: root.join("sub.txt"),
        }
    }

    /// Files removed by the deferred cleanup. The subscription file is kept.
    pub fn disposable(&self) -> Vec<&Path> {
        vec![
            self.engine.as_path(),
            self.tunnel.as_path(),
            self.agent.as_path(),
            self.engine_config.as_path(),
            self.boot_log.as_path(),
            self.tunnel_credentials.as_path(),
            self.tunnel_config.as_path(),
        ]
    }
}
