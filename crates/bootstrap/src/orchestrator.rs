//! The bootstrap sequence.
//!
//! Stages run strictly in order: platform detection, artifact acquisition,
//! listener config, process launch (engine before tunnel), endpoint
//! discovery, subscription publishing. Every stage failure short of being
//! unable to create the working directory is logged and the run continues
//! in a degraded state.

use crate::artifacts::{is_present, plan_artifacts, Acquirer, DownloadResult};
use crate::config::{BootstrapConfig, WorkLayout};
use crate::listener::EngineConfig;
use crate::publish::SubscriptionSlot;
use crate::subscription::{SubscriptionBundle, SubscriptionParams};
use crate::supervisor::{ProcessSpec, Supervisor};
use crate::tunnel::{EndpointResolver, TunnelEndpoint, TunnelMode};
use edgeboot_common::redact::fingerprint;
use edgeboot_common::{Arch, Result};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What a run achieved.
#[derive(Debug)]
pub struct BootstrapReport {
    pub arch: Arch,
    pub downloads: Vec<DownloadResult>,
    pub launched: Vec<String>,
    pub endpoint: Option<TunnelEndpoint>,
    pub published: bool,
}

pub struct Orchestrator {
    config: BootstrapConfig,
    layout: WorkLayout,
    arch: Arch,
    supervisor: Supervisor,
    publisher: SubscriptionSlot,
    resolver: EndpointResolver,
}

impl Orchestrator {
    /// `publisher` is the only way the run can expose the subscription route.
    pub fn new(config: BootstrapConfig, supervisor: Supervisor, publisher: SubscriptionSlot) -> Self {
        let layout = config.layout();
        let resolver = EndpointResolver::new(config.tunnel_wait);
        Self {
            config,
            layout,
            arch: Arch::detect(),
            supervisor,
            publisher,
            resolver,
        }
    }

    pub fn with_arch(mut self, arch: Arch) -> Self {
        self.arch = arch;
        self
    }

    pub fn with_resolver(mut self, resolver: EndpointResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub async fn run(&self) -> Result<BootstrapReport> {
        tokio::fs::create_dir_all(&self.layout.root).await?;
        info!("Architecture detected: {} ({})", self.arch, self.arch.release_tag());

        let specs = plan_artifacts(self.arch, &self.config, &self.layout);
        let downloads = Acquirer::new(self.arch)?.acquire_all(&specs).await;

        let mut launched = Vec::new();
        if self.start_engine().await {
            launched.push("engine".to_string());
        }
        if self.start_agent().await {
            launched.push("agent".to_string());
        }

        let mode = TunnelMode::select(self.config.tunnel_auth.as_deref());
        let tunnel_started = self.start_tunnel(&mode).await;
        if tunnel_started {
            launched.push("tunnel".to_string());
        }

        let endpoint = self.discover_endpoint(&mode, tunnel_started).await;
        let published = match &endpoint {
            Some(endpoint) => self.publish(endpoint).await,
            None => false,
        };

        if let Some(delay) = self.config.cleanup_after {
            schedule_cleanup(self.layout.clone(), delay);
        }

        Ok(BootstrapReport {
            arch: self.arch,
            downloads,
            launched,
            endpoint,
            published,
        })
    }

    async fn start_engine(&self) -> bool {
        if !is_present(&self.layout.engine) {
            warn!("Engine binary missing, skipping listener config and launch");
            return false;
        }

        let config = EngineConfig::build(self.config.tunnel_port, &self.config.credential);
        if let Err(e) = config.write_to(&self.layout.engine_config) {
            warn!("Failed to write listener config: {}", e);
            return false;
        }

        let args = vec![
            "-c".to_string(),
            self.layout.engine_config.display().to_string(),
        ];
        self.launch(ProcessSpec::new("engine", &self.layout.engine, args))
            .await
    }

    async fn start_agent(&self) -> bool {
        let (Some(server), Some(key)) = (&self.config.monitor_server, &self.config.monitor_key)
        else {
            debug!("Monitoring agent disabled");
            return false;
        };
        if !is_present(&self.layout.agent) {
            warn!("Monitoring agent binary missing, not starting it");
            return false;
        }

        info!("Starting monitoring agent for {} with key {}", server, fingerprint(key));
        let args = vec![
            "-e".to_string(),
            server.clone(),
            "-t".to_string(),
            key.clone(),
        ];
        self.launch(ProcessSpec::new("agent", &self.layout.agent, args))
            .await
    }

    async fn start_tunnel(&self, mode: &TunnelMode) -> bool {
        if !is_present(&self.layout.tunnel) {
            warn!("Tunnel binary missing, not starting it");
            return false;
        }

        if mode.is_quick() {
            // A log left by an earlier run would yield a stale hostname.
            match tokio::fs::remove_file(&self.layout.boot_log).await {
                Ok(()) => debug!("Removed stale tunnel log"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove stale tunnel log {:?}: {}", self.layout.boot_log, e),
            }
        } else if let Some(auth) = &self.config.tunnel_auth {
            info!("Tunnel auth {} ({} mode)", fingerprint(auth), mode.label());
        }

        if let Err(e) = mode.prepare(
            &self.layout,
            self.config.tunnel_port,
            self.config.tunnel_domain.as_deref(),
        ) {
            warn!("Failed to prepare tunnel files: {}", e);
            return false;
        }

        let args = mode.args(&self.layout, self.config.tunnel_port);
        self.launch(ProcessSpec::new("tunnel", &self.layout.tunnel, args))
            .await
    }

    async fn launch(&self, spec: ProcessSpec) -> bool {
        match self.supervisor.launch(spec).await {
            Ok(_) => true,
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    async fn discover_endpoint(&self, mode: &TunnelMode, tunnel_started: bool) -> Option<TunnelEndpoint> {
        let domain = self.config.tunnel_domain.as_deref();

        if domain.is_none() {
            if !mode.is_quick() {
                warn!("Named tunnel without a configured hostname, nothing to publish");
                return None;
            }
            if !tunnel_started {
                warn!("Tunnel not running, hostname cannot be discovered");
                return None;
            }
        }

        match self.resolver.resolve(domain, &self.layout.boot_log).await {
            Ok(endpoint) => Some(endpoint),
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    async fn publish(&self, endpoint: &TunnelEndpoint) -> bool {
        let params = SubscriptionParams {
            credential: self.config.credential.clone(),
            address: self.config.advertised_address.clone(),
            port: self.config.advertised_port,
            tunnel_host: endpoint.hostname.clone(),
            name: self.config.node_name().to_string(),
        };
        let encoded = SubscriptionBundle::build(&params).encode();

        if self.config.persist_subscription {
            match tokio::fs::write(&self.layout.subscription, &encoded).await {
                Ok(()) => debug!("Subscription saved to {:?}", self.layout.subscription),
                Err(e) => warn!("Failed to save subscription: {}", e),
            }
        }

        let published = self.publisher.publish(&self.config.sub_path, encoded);
        if published {
            info!("Node ready on {}", endpoint.hostname);
        }
        published
    }
}

/// Delete binaries, config and logs from the working directory after `delay`.
pub fn schedule_cleanup(layout: WorkLayout, delay: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;

        let mut removed = 0;
        for path in layout.disposable() {
            match tokio::fs::remove_file(path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {:?}: {}", path, e),
            }
        }
        info!("Cleanup removed {} files from {:?}", removed, layout.root);
    })
}
