//! Artifact acquisition: URL resolution, streamed downloads, permissions.
//!
//! A failing artifact is logged and reported in its [`DownloadResult`]; it
//! never stops the remaining downloads. Later stages gate on the presence of
//! the file on disk.

use crate::config::{BootstrapConfig, WorkLayout};
use edgeboot_common::{Arch, Error, Result};
use futures::StreamExt;
use serde::Deserialize;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Mode applied to every downloaded binary.
pub const ARTIFACT_MODE: u32 = 0o775;

const CHECKSUM_SUFFIX: &str = ".sha256";

/// Role of a downloaded binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Proxy engine serving the listener set.
    Engine,
    /// Tunnel client exposing the public listener.
    Tunnel,
    /// Optional monitoring agent.
    Agent,
}

impl ArtifactKind {
    pub fn name(&self) -> &'static str {
        match self {
            ArtifactKind::Engine => "engine",
            ArtifactKind::Tunnel => "tunnel",
            ArtifactKind::Agent => "agent",
        }
    }
}

/// Where the download URL comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    Static(String),
    /// Query a "latest release" endpoint, fall back to a pinned URL.
    LatestRelease { api_url: String, fallback_url: String },
}

#[derive(Debug, Clone)]
pub struct ArtifactSpec {
    pub kind: ArtifactKind,
    pub source: ArtifactSource,
    pub destination: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub kind: ArtifactKind,
    pub success: bool,
    pub path: PathBuf,
}

/// Build the artifact table for a platform. The agent is left out unless
/// both of its credentials are configured.
pub fn plan_artifacts(arch: Arch, config: &BootstrapConfig, layout: &WorkLayout) -> Vec<ArtifactSpec> {
    let base = expand_arch(&config.artifact_base_url, arch);
    let base = base.trim_end_matches('/');

    let mut specs = vec![
        ArtifactSpec {
            kind: ArtifactKind::Engine,
            source: ArtifactSource::Static(format!("{}/web", base)),
            destination: layout.engine.clone(),
        },
        ArtifactSpec {
            kind: ArtifactKind::Tunnel,
            source: ArtifactSource::Static(format!("{}/bot", base)),
            destination: layout.tunnel.clone(),
        },
    ];

    if config.monitor_enabled() {
        specs.push(ArtifactSpec {
            kind: ArtifactKind::Agent,
            source: ArtifactSource::LatestRelease {
                api_url: config.agent_release_api.clone(),
                fallback_url: expand_arch(&config.agent_fallback_url, arch),
            },
            destination: layout.agent.clone(),
        });
    } else {
        debug!("Monitoring agent not configured, skipping");
    }

    specs
}

fn expand_arch(template: &str, arch: Arch) -> String {
    template.replace("{arch}", arch.release_tag())
}

#[derive(Debug, Deserialize)]
pub struct Release {
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

/// First asset built for Linux on `arch` that is not a checksum file.
pub fn select_asset(release: &Release, arch: Arch) -> Option<&str> {
    release
        .assets
        .iter()
        .find(|asset| {
            let name = asset.name.to_lowercase();
            name.contains("linux")
                && name.contains(arch.release_tag())
                && !name.ends_with(CHECKSUM_SUFFIX)
        })
        .map(|asset| asset.browser_download_url.as_str())
}

/// Downloads artifacts one at a time into the working directory.
pub struct Acquirer {
    client: reqwest::Client,
    arch: Arch,
    metadata_timeout: Duration,
    download_timeout: Duration,
}

impl Acquirer {
    pub fn new(arch: Arch) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("edgeboot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            client,
            arch,
            metadata_timeout: Duration::from_secs(10),
            download_timeout: Duration::from_secs(60),
        })
    }

    pub fn with_timeouts(mut self, metadata: Duration, download: Duration) -> Self {
        self.metadata_timeout = metadata;
        self.download_timeout = download;
        self
    }

    /// Acquire every artifact sequentially. Never fails as a whole.
    pub async fn acquire_all(&self, specs: &[ArtifactSpec]) -> Vec<DownloadResult> {
        let mut results = Vec::with_capacity(specs.len());

        for spec in specs {
            let name = spec.kind.name();
            let url = self.resolve_url(&spec.source).await;

            let success = match self.download(name, &url, &spec.destination).await {
                Ok(()) => {
                    info!("{} downloaded to {:?}", name, spec.destination);
                    true
                }
                Err(e) => {
                    warn!("{}", e);
                    false
                }
            };

            results.push(DownloadResult {
                kind: spec.kind,
                success,
                path: spec.destination.clone(),
            });
        }

        results
    }

    /// Resolve a concrete URL. Release lookups degrade to the fallback URL.
    pub async fn resolve_url(&self, source: &ArtifactSource) -> String {
        match source {
            ArtifactSource::Static(url) => url.clone(),
            ArtifactSource::LatestRelease {
                api_url,
                fallback_url,
            } => match self.lookup_release(api_url).await {
                Ok(url) => url,
                Err(e) => {
                    warn!("{}, using {}", e, fallback_url);
                    fallback_url.clone()
                }
            },
        }
    }

    async fn lookup_release(&self, api_url: &str) -> Result<String> {
        debug!("Querying release metadata: {}", api_url);

        let response = self
            .client
            .get(api_url)
            .timeout(self.metadata_timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::ReleaseLookup(e.to_string()))?;

        let release: Release = response
            .json()
            .await
            .map_err(|e| Error::ReleaseLookup(e.to_string()))?;

        select_asset(&release, self.arch)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::ReleaseLookup(format!(
                    "no linux/{} asset in {} assets",
                    self.arch.release_tag(),
                    release.assets.len()
                ))
            })
    }

    async fn download(&self, name: &str, url: &str, destination: &Path) -> Result<()> {
        debug!("Downloading {} from {}", name, url);

        let staging = staging_path(destination);
        let outcome = self.stream_to(url, &staging).await;

        if let Err(e) = outcome {
            let _ = fs::remove_file(&staging).await;
            return Err(Error::Download {
                name: name.to_string(),
                reason: e.to_string(),
            });
        }

        fs::rename(&staging, destination).await?;
        fs::set_permissions(destination, std::fs::Permissions::from_mode(ARTIFACT_MODE)).await?;
        Ok(())
    }

    async fn stream_to(&self, url: &str, staging: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .timeout(self.download_timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Http(e.to_string()))?;

        let mut file = fs::File::create(staging).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Http(e.to_string()))?;
            file.write_all(&chunk).await?;
        }
        file.sync_all().await?;
        Ok(())
    }
}

fn staging_path(destination: &Path) -> PathBuf {
    let mut name = destination.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    destination.with_file_name(name)
}

/// Whether an artifact made it to disk.
pub fn is_present(path: &Path) -> bool {
    path.is_file()
}
