//! Tunnel client run modes and public hostname discovery.

use crate::config::WorkLayout;
use edgeboot_common::{Error, Result, Timestamp};
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Long-form tunnel token. Anchored; shorter or longer strings are not tokens.
pub static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9=]{120,250}$").unwrap());

/// Hostname assigned to a quick tunnel, as printed in the client's log.
pub static QUICK_TUNNEL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://([A-Za-z0-9-]+\.trycloudflare\.com)/?").unwrap());

/// Control-plane host that also shows up in error lines.
const QUICK_TUNNEL_API_HOST: &str = "api.trycloudflare.com";

/// How the tunnel client authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelMode {
    Token(String),
    /// JSON credentials document for a named tunnel.
    Credentials { tunnel_id: String, document: String },
    /// Anonymous tunnel with a random hostname, only visible in the log.
    Quick,
}

impl TunnelMode {
    pub fn select(auth: Option<&str>) -> Self {
        let Some(auth) = auth.map(str::trim).filter(|a| !a.is_empty()) else {
            return TunnelMode::Quick;
        };

        if TOKEN_PATTERN.is_match(auth) {
            return TunnelMode::Token(auth.to_string());
        }

        if auth.contains("TunnelSecret") {
            let tunnel_id = serde_json::from_str::<serde_json::Value>(auth)
                .ok()
                .and_then(|v| v.get("TunnelID").and_then(|id| id.as_str()).map(str::to_string));
            if let Some(tunnel_id) = tunnel_id {
                return TunnelMode::Credentials {
                    tunnel_id,
                    document: auth.to_string(),
                };
            }
            debug!("Tunnel credentials document has no TunnelID");
        }

        TunnelMode::Quick
    }

    pub fn is_quick(&self) -> bool {
        matches!(self, TunnelMode::Quick)
    }

    pub fn label(&self) -> &'static str {
        match self {
            TunnelMode::Token(_) => "token",
            TunnelMode::Credentials { .. } => "credentials",
            TunnelMode::Quick => "quick",
        }
    }

    /// Argument vector for the tunnel client.
    pub fn args(&self, layout: &WorkLayout, local_port: u16) -> Vec<String> {
        let mut args: Vec<String> = ["tunnel", "--edge-ip-version", "auto"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        match self {
            TunnelMode::Token(token) => {
                args.extend(
                    ["--no-autoupdate", "--protocol", "http2", "run", "--token"]
                        .iter()
                        .map(|s| s.to_string()),
                );
                args.push(token.clone());
            }
            TunnelMode::Credentials { .. } => {
                args.push("--config".to_string());
                args.push(layout.tunnel_config.display().to_string());
                args.push("run".to_string());
            }
            TunnelMode::Quick => {
                args.extend(
                    ["--no-autoupdate", "--protocol", "http2", "--logfile"]
                        .iter()
                        .map(|s| s.to_string()),
                );
                args.push(layout.boot_log.display().to_string());
                args.push("--loglevel".to_string());
                args.push("info".to_string());
                args.push("--url".to_string());
                args.push(format!("http://localhost:{}", local_port));
            }
        }

        args
    }

    /// Write credential and ingress files needed before launch.
    pub fn prepare(&self, layout: &WorkLayout, local_port: u16, domain: Option<&str>) -> Result<()> {
        let TunnelMode::Credentials {
            tunnel_id,
            document,
        } = self
        else {
            return Ok(());
        };

        std::fs::write(&layout.tunnel_credentials, document)?;

        let ingress = IngressConfig {
            tunnel: tunnel_id.clone(),
            credentials_file: layout.tunnel_credentials.display().to_string(),
            protocol: "http2".to_string(),
            ingress: vec![
                IngressRule {
                    hostname: domain.map(str::to_string),
                    service: format!("http://localhost:{}", local_port),
                    origin_request: Some(OriginRequest { no_tls_verify: true }),
                },
                IngressRule {
                    hostname: None,
                    service: "http_status:404".to_string(),
                    origin_request: None,
                },
            ],
        };
        std::fs::write(&layout.tunnel_config, serde_yaml::to_string(&ingress)?)?;
        debug!("Tunnel ingress written to {:?}", layout.tunnel_config);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct IngressConfig {
    tunnel: String,
    credentials_file: String,
    protocol: String,
    ingress: Vec<IngressRule>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IngressRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    hostname: Option<String>,
    service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    origin_request: Option<OriginRequest>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OriginRequest {
    #[serde(rename = "noTLSVerify")]
    no_tls_verify: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverySource {
    Static,
    LogScrape,
}

/// Externally reachable hostname of the tunnel.
#[derive(Debug, Clone)]
pub struct TunnelEndpoint {
    pub hostname: String,
    pub source: DiscoverySource,
    pub discovered_at: Timestamp,
}

/// Extract the quick-tunnel hostname from log text.
pub fn scrape_hostname(log: &str) -> Option<String> {
    QUICK_TUNNEL_PATTERN
        .captures_iter(log)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .find(|host| !host.eq_ignore_ascii_case(QUICK_TUNNEL_API_HOST))
        .map(str::to_string)
}

/// Read the log once. A missing file is not an error.
pub async fn read_log_hostname(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(scrape_hostname(&content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Polls the tunnel log with exponential backoff until a hostname appears.
#[derive(Debug, Clone)]
pub struct EndpointResolver {
    pub timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl EndpointResolver {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
        }
    }

    /// A configured hostname wins; otherwise wait for the log.
    pub async fn resolve(&self, static_domain: Option<&str>, log_path: &Path) -> Result<TunnelEndpoint> {
        if let Some(domain) = static_domain {
            info!("Using configured tunnel hostname {}", domain);
            return Ok(TunnelEndpoint {
                hostname: domain.to_string(),
                source: DiscoverySource::Static,
                discovered_at: Timestamp::now(),
            });
        }

        let hostname = self.poll_log(log_path).await?;
        info!("Discovered tunnel hostname {}", hostname);
        Ok(TunnelEndpoint {
            hostname,
            source: DiscoverySource::LogScrape,
            discovered_at: Timestamp::now(),
        })
    }

    async fn poll_log(&self, log_path: &Path) -> Result<String> {
        let deadline = Instant::now() + self.timeout;
        let mut backoff = self.initial_backoff;

        loop {
            match read_log_hostname(log_path).await {
                Ok(Some(hostname)) => return Ok(hostname),
                Ok(None) => debug!("No tunnel hostname in {:?} yet", log_path),
                Err(e) => debug!("Reading {:?} failed: {}", log_path, e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::TunnelTimeout {
                    waited_secs: self.timeout.as_secs(),
                });
            }
            tokio::time::sleep(backoff.min(deadline - now)).await;
            backoff = (backoff * 2).min(self.max_backoff);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LOG: &str = "\
2024-05-01T10:00:00Z INF Requesting new quick Tunnel on trycloudflare.com...
2024-05-01T10:00:01Z INF +--------------------------------------------------------------------------------------------+
2024-05-01T10:00:01Z INF |  Your quick Tunnel has been created! Visit it at (it may take some time to be reachable):  |
2024-05-01T10:00:01Z INF |  https://bright-river-sample-words.trycloudflare.com                                        |
2024-05-01T10:00:01Z INF +--------------------------------------------------------------------------------------------+
";

    fn resolver(timeout_ms: u64) -> EndpointResolver {
        EndpointResolver {
            timeout: Duration::from_millis(timeout_ms),
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        }
    }

    #[test]
    fn test_token_selection_is_strict() {
        let token = format!("{}==", "eyJh".repeat(40));
        assert_eq!(
            TunnelMode::select(Some(token.as_str())),
            TunnelMode::Token(token.clone())
        );

        let too_short = "A".repeat(119);
        let too_long = "A".repeat(251);
        let bad_char = format!("{}-", "A".repeat(150));
        for auth in [&too_short, &too_long, &bad_char] {
            assert_eq!(TunnelMode::select(Some(auth.as_str())), TunnelMode::Quick);
        }
        assert_eq!(TunnelMode::select(None), TunnelMode::Quick);
        assert_eq!(TunnelMode::select(Some("   ")), TunnelMode::Quick);
    }

    #[test]
    fn test_credentials_selection() {
        let doc = r#"{"AccountTag":"acc","TunnelSecret":"s3cr3t","TunnelID":"1234-abcd"}"#;
        match TunnelMode::select(Some(doc)) {
            TunnelMode::Credentials { tunnel_id, .. } => assert_eq!(tunnel_id, "1234-abcd"),
            other => panic!("unexpected mode: {:?}", other),
        }
        assert!(TunnelMode::select(Some(r#"{"TunnelSecret":"x"}"#)).is_quick());
    }

    #[test]
    fn test_args_per_mode() {
        let layout = WorkLayout::new(Path::new("/work"));

        let quick = TunnelMode::Quick.args(&layout, 8001);
        assert_eq!(quick[0], "tunnel");
        assert!(quick.windows(2).any(|w| w == ["--logfile", "/work/boot.log"]));
        assert_eq!(quick.last().unwrap(), "http://localhost:8001");

        let token = TunnelMode::Token("T".repeat(130)).args(&layout, 8001);
        assert!(token.windows(2).any(|w| w[0] == "run" && w[1] == "--token"));
        assert!(!token.iter().any(|a| a == "--logfile"));

        let creds = TunnelMode::Credentials {
            tunnel_id: "id".to_string(),
            document: "{}".to_string(),
        }
        .args(&layout, 8001);
        assert_eq!(creds[creds.len() - 2..], ["/work/tunnel.yml".to_string(), "run".to_string()]);
    }

    #[test]
    fn test_prepare_writes_ingress() {
        let dir = TempDir::new().unwrap();
        let layout = WorkLayout::new(dir.path());
        let mode = TunnelMode::Credentials {
            tunnel_id: "1234-abcd".to_string(),
            document: r#"{"TunnelSecret":"s","TunnelID":"1234-abcd"}"#.to_string(),
        };
        mode.prepare(&layout, 8001, Some("node.example.com")).unwrap();

        let yaml: serde_yaml::Value =
            serde_yaml::from_str(&std::fs::read_to_string(&layout.tunnel_config).unwrap()).unwrap();
        assert_eq!(yaml["tunnel"].as_str(), Some("1234-abcd"));
        assert_eq!(yaml["ingress"][0]["hostname"].as_str(), Some("node.example.com"));
        assert_eq!(yaml["ingress"][0]["service"].as_str(), Some("http://localhost:8001"));
        assert_eq!(yaml["ingress"][0]["originRequest"]["noTLSVerify"].as_bool(), Some(true));
        assert_eq!(yaml["ingress"][1]["service"].as_str(), Some("http_status:404"));
        assert!(layout.tunnel_credentials.exists());

        TunnelMode::Quick.prepare(&layout, 8001, None).unwrap();
    }

    #[test]
    fn test_scrape_hostname() {
        assert_eq!(
            scrape_hostname(LOG).as_deref(),
            Some("bright-river-sample-words.trycloudflare.com")
        );
        assert_eq!(scrape_hostname("no tunnel here"), None);
        assert_eq!(
            scrape_hostname(r#"ERR failed: Post "https://api.trycloudflare.com/tunnel""#),
            None
        );
    }

    #[tokio::test]
    async fn test_missing_log_yields_no_endpoint() {
        let dir = TempDir::new().unwrap();
        let found = read_log_hostname(&dir.path().join("boot.log")).await.unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn test_static_domain_skips_discovery() {
        let endpoint = resolver(10)
            .resolve(Some("node.example.com"), Path::new("/nonexistent/boot.log"))
            .await
            .unwrap();
        assert_eq!(endpoint.hostname, "node.example.com");
        assert_eq!(endpoint.source, DiscoverySource::Static);
    }

    #[tokio::test]
    async fn test_poll_picks_up_late_log() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("boot.log");

        let writer_path = log_path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            tokio::fs::write(writer_path, LOG).await.unwrap();
        });

        let endpoint = resolver(2_000).resolve(None, &log_path).await.unwrap();
        assert_eq!(endpoint.hostname, "bright-river-sample-words.trycloudflare.com");
        assert_eq!(endpoint.source, DiscoverySource::LogScrape);
    }

    #[tokio::test]
    async fn test_poll_times_out() {
        let dir = TempDir::new().unwrap();
        let result = resolver(80).resolve(None, &dir.path().join("boot.log")).await;
        assert!(matches!(result, Err(Error::TunnelTimeout { .. })));
    }
}
