//! Connection URIs and the encoded subscription bundle.
//!
//! Clients connect to the advertised address and port; the tunnel hostname
//! is only carried as TLS server name and websocket host header.

use crate::listener::{Protocol, INTERNAL_LISTENERS};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;

const FINGERPRINT: &str = "firefox";
const EARLY_DATA: &str = "?ed=2560";

/// Everything except RFC 3986 unreserved characters.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Values shared by every URI in a bundle.
#[derive(Debug, Clone)]
pub struct SubscriptionParams {
    pub credential: String,
    pub address: String,
    pub port: u16,
    pub tunnel_host: String,
    pub name: String,
}

/// Ordered set of connection URIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionBundle {
    pub uris: Vec<String>,
}

impl SubscriptionBundle {
    /// One URI per websocket listener reachable through the tunnel.
    pub fn build(params: &SubscriptionParams) -> Self {
        let uris = INTERNAL_LISTENERS
            .iter()
            .filter_map(|kind| kind.ws_path().map(|path| render(kind.protocol, path, params)))
            .collect();
        Self { uris }
    }

    pub fn to_text(&self) -> String {
        self.uris.join("\n\n")
    }

    pub fn encode(&self) -> String {
        STANDARD.encode(self.to_text())
    }
}

/// Render a single connection URI.
pub fn render(protocol: Protocol, ws_path: &str, params: &SubscriptionParams) -> String {
    let path = format!("{}{}", ws_path, EARLY_DATA);

    match protocol {
        Protocol::Vless => format!(
            "vless://{}@{}:{}?encryption=none&security=tls&sni={}&fp={}&type=ws&host={}&path={}#{}",
            params.credential,
            params.address,
            params.port,
            params.tunnel_host,
            FINGERPRINT,
            params.tunnel_host,
            escape(&path),
            escape(&params.name)
        ),
        Protocol::Trojan => format!(
            "trojan://{}@{}:{}?security=tls&sni={}&fp={}&type=ws&host={}&path={}#{}",
            params.credential,
            params.address,
            params.port,
            params.tunnel_host,
            FINGERPRINT,
            params.tunnel_host,
            escape(&path),
            escape(&params.name)
        ),
        Protocol::Vmess => {
            let body = VmessLink {
                v: "2",
                ps: &params.name,
                add: &params.address,
                port: params.port.to_string(),
                id: &params.credential,
                aid: "0",
                scy: "none",
                net: "ws",
                kind: "none",
                host: &params.tunnel_host,
                path: &path,
                tls: "tls",
                sni: &params.tunnel_host,
                alpn: "",
                fp: FINGERPRINT,
            };
            // Serializing a struct of strings cannot fail.
            let json = serde_json::to_string(&body).unwrap_or_default();
            format!("vmess://{}", STANDARD.encode(json))
        }
    }
}

#[derive(Serialize)]
struct VmessLink<'a> {
    v: &'a str,
    ps: &'a str,
    add: &'a str,
    port: String,
    id: &'a str,
    aid: &'a str,
    scy: &'a str,
    net: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    host: &'a str,
    path: &'a str,
    tls: &'a str,
    sni: &'a str,
    alpn: &'a str,
    fp: &'a str,
}

/// Percent-encode a query value or fragment.
fn escape(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}
