//! Listener configuration for the proxy engine.
//!
//! One public entry listener accepts raw vless on the tunnel port and hands
//! everything else to loopback listeners through its fallback table:
//! requests without a matching path go to the raw vless listener, the
//! websocket paths go to their protocol listener.

use edgeboot_common::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

const LOOPBACK: &str = "127.0.0.1";
const VISION_FLOW: &str = "xtls-rprx-vision";

/// Ports of the loopback listeners.
pub const INTERNAL_PORTS: [u16; 4] = [3001, 3002, 3003, 3004];

/// Wire protocol spoken by a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Vless,
    Vmess,
    Trojan,
}

/// Transport carried below the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Raw,
    Ws(&'static str),
}

/// One internal listener kind: protocol plus transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerKind {
    pub protocol: Protocol,
    pub transport: Transport,
    pub port: u16,
}

impl ListenerKind {
    /// Trojan identifies clients by password, the others by id.
    pub fn uses_password(&self) -> bool {
        matches!(self.protocol, Protocol::Trojan)
    }

    /// Websocket listeners sit behind the tunnel and get traffic sniffing.
    pub fn sniffs(&self) -> bool {
        matches!(self.transport, Transport::Ws(_))
    }

    pub fn ws_path(&self) -> Option<&'static str> {
        match self.transport {
            Transport::Ws(path) => Some(path),
            Transport::Raw => None,
        }
    }
}

/// Every loopback listener the engine runs, in fallback order.
pub const INTERNAL_LISTENERS: [ListenerKind; 4] = [
    ListenerKind {
        protocol: Protocol::Vless,
        transport: Transport::Raw,
        port: INTERNAL_PORTS[0],
    },
    ListenerKind {
        protocol: Protocol::Vless,
        transport: Transport::Ws("/vless-argo"),
        port: INTERNAL_PORTS[1],
    },
    ListenerKind {
        protocol: Protocol::Vmess,
        transport: Transport::Ws("/vmess-argo"),
        port: INTERNAL_PORTS[2],
    },
    ListenerKind {
        protocol: Protocol::Trojan,
        transport: Transport::Ws("/trojan-argo"),
        port: INTERNAL_PORTS[3],
    },
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub log: LogSettings,
    pub inbounds: Vec<Inbound>,
    pub dns: DnsSettings,
    pub outbounds: Vec<Outbound>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSettings {
    pub access: String,
    pub error: String,
    pub loglevel: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inbound {
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
    pub protocol: Protocol,
    pub settings: InboundSettings,
    pub stream_settings: StreamSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sniffing: Option<Sniffing>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundSettings {
    pub clients: Vec<Client>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decryption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallbacks: Option<Vec<Fallback>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alter_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fallback {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub dest: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSettings {
    pub network: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_settings: Option<WsSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsSettings {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sniffing {
    pub enabled: bool,
    pub dest_override: Vec<String>,
    pub metadata_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsSettings {
    pub servers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outbound {
    pub protocol: String,
    pub tag: String,
}

impl EngineConfig {
    /// Build the full listener set sharing one credential.
    pub fn build(public_port: u16, credential: &str) -> Self {
        let mut inbounds = Vec::with_capacity(INTERNAL_LISTENERS.len() + 1);
        inbounds.push(public_inbound(public_port, credential));
        inbounds.extend(
            INTERNAL_LISTENERS
                .iter()
                .map(|kind| internal_inbound(kind, credential)),
        );

        Self {
            log: LogSettings {
                access: "/dev/null".to_string(),
                error: "/dev/null".to_string(),
                loglevel: "none".to_string(),
            },
            inbounds,
            dns: DnsSettings {
                servers: vec!["https+local://8.8.8.8/dns-query".to_string()],
            },
            outbounds: vec![
                Outbound {
                    protocol: "freedom".to_string(),
                    tag: "direct".to_string(),
                },
                Outbound {
                    protocol: "blackhole".to_string(),
                    tag: "block".to_string(),
                },
            ],
        }
    }

    /// The listener reachable from outside the host.
    pub fn public(&self) -> Option<&Inbound> {
        self.inbounds.first()
    }

    pub fn internal(&self) -> &[Inbound] {
        self.inbounds.get(1..).unwrap_or_default()
    }

    /// Serialize and write the config; the engine reads it once at startup.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        debug!("Listener config written to {:?}", path);
        Ok(())
    }
}

fn public_inbound(port: u16, credential: &str) -> Inbound {
    let fallbacks = INTERNAL_LISTENERS
        .iter()
        .map(|kind| Fallback {
            path: kind.ws_path().map(str::to_string),
            dest: kind.port,
        })
        .collect();

    Inbound {
        port,
        listen: None,
        protocol: Protocol::Vless,
        settings: InboundSettings {
            clients: vec![Client {
                id: Some(credential.to_string()),
                password: None,
                flow: Some(VISION_FLOW.to_string()),
                alter_id: None,
            }],
            decryption: Some("none".to_string()),
            fallbacks: Some(fallbacks),
        },
        stream_settings: StreamSettings {
            network: "tcp".to_string(),
            security: None,
            ws_settings: None,
        },
        sniffing: None,
    }
}

fn internal_inbound(kind: &ListenerKind, credential: &str) -> Inbound {
    let client = if kind.uses_password() {
        Client {
            id: None,
            password: Some(credential.to_string()),
            flow: None,
            alter_id: None,
        }
    } else {
        Client {
            id: Some(credential.to_string()),
            password: None,
            flow: None,
            alter_id: (kind.protocol == Protocol::Vmess).then_some(0),
        }
    };

    let decryption = (kind.protocol == Protocol::Vless).then(|| "none".to_string());

    let stream_settings = match kind.transport {
        Transport::Raw => StreamSettings {
            network: "tcp".to_string(),
            security: Some("none".to_string()),
            ws_settings: None,
        },
        Transport::Ws(path) => StreamSettings {
            network: "ws".to_string(),
            security: Some("none".to_string()),
            ws_settings: Some(WsSettings {
                path: path.to_string(),
            }),
        },
    };

    let sniffing = kind.sniffs().then(|| Sniffing {
        enabled: true,
        dest_override: vec!["http".to_string(), "tls".to_string(), "quic".to_string()],
        metadata_only: false,
    });

    Inbound {
        port: kind.port,
        listen: Some(LOOPBACK.to_string()),
        protocol: kind.protocol,
        settings: InboundSettings {
            clients: vec![client],
            decryption,
            fallbacks: None,
        },
        stream_settings,
        sniffing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const CREDENTIAL: &str = "abc-123";

    #[test]
    fn test_one_public_and_one_internal_per_kind() {
        let config = EngineConfig::build(8001, CREDENTIAL);

        assert_eq!(config.inbounds.len(), INTERNAL_LISTENERS.len() + 1);
        assert_eq!(config.public().unwrap().port, 8001);
        assert!(config.public().unwrap().listen.is_none());

        for (inbound, kind) in config.internal().iter().zip(INTERNAL_LISTENERS.iter()) {
            assert_eq!(inbound.listen.as_deref(), Some(LOOPBACK));
            assert_eq!(inbound.port, kind.port);
            assert_eq!(inbound.protocol, kind.protocol);
            assert_eq!(inbound.sniffing.is_some(), kind.sniffs());
        }
    }

    #[test]
    fn test_fallbacks_reference_existing_listeners() {
        let config = EngineConfig::build(8001, CREDENTIAL);
        let fallbacks = config.public().unwrap().settings.fallbacks.as_ref().unwrap();

        assert_eq!(fallbacks.len(), config.internal().len());
        for fallback in fallbacks {
            let target = config
                .internal()
                .iter()
                .find(|inbound| inbound.port == fallback.dest)
                .expect("fallback target exists");
            let target_path = target.stream_settings.ws_settings.as_ref().map(|ws| &ws.path);
            assert_eq!(fallback.path.as_ref(), target_path);
        }
    }

    #[test]
    fn test_empty_inbounds_do_not_panic() {
        let mut config = EngineConfig::build(8001, CREDENTIAL);
        config.inbounds.clear();
        assert!(config.public().is_none());
        assert!(config.internal().is_empty());
    }

    #[test]
    fn test_credential_shared_across_listeners() {
        let config = EngineConfig::build(8001, CREDENTIAL);
        for inbound in &config.inbounds {
            let client = &inbound.settings.clients[0];
            let identity = client.id.as_deref().or(client.password.as_deref());
            assert_eq!(identity, Some(CREDENTIAL));
        }

        let trojan = config
            .internal()
            .iter()
            .find(|i| i.protocol == Protocol::Trojan)
            .unwrap();
        assert!(trojan.settings.clients[0].id.is_none());
    }

    #[test]
    fn test_written_document_shape() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let config = EngineConfig::build(8001, CREDENTIAL);
        config.write_to(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["inbounds"][0]["protocol"], "vless");
        assert_eq!(value["inbounds"][0]["streamSettings"]["network"], "tcp");
        assert_eq!(value["inbounds"][1]["settings"]["decryption"], "none");
        assert_eq!(value["inbounds"][3]["settings"]["clients"][0]["alterId"], 0);
        assert_eq!(
            value["inbounds"][4]["streamSettings"]["wsSettings"]["path"],
            "/trojan-argo"
        );
        assert_eq!(value["outbounds"][0]["protocol"], "freedom");

        let parsed: EngineConfig = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, config);
    }
}
