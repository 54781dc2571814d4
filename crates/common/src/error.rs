//! Common error types for edgeboot.

use thiserror::Error;

/// Common error type for edgeboot operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Download of {name} failed: {reason}")]
    Download { name: String, reason: String },

    #[error("Release lookup failed: {0}")]
    ReleaseLookup(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to launch {name}: {reason}")]
    Spawn { name: String, reason: String },

    #[error("Tunnel hostname not discovered within {waited_secs}s")]
    TunnelTimeout { waited_secs: u64 },
}

/// Result type alias using common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::Download {
            name: "engine".to_string(),
            reason: "404 Not Found".to_string(),
        };
        assert_eq!(err.to_string(), "Download of engine failed: 404 Not Found");

        let err = Error::TunnelTimeout { waited_secs: 60 };
        assert_eq!(err.to_string(), "Tunnel hostname not discovered within 60s");
    }
}
