//! Fingerprints for secrets that must not appear in logs.

use sha2::{Digest, Sha256};

const FINGERPRINT_PREFIX: &str = "[HASH:";
const FINGERPRINT_SUFFIX: &str = "]";

/// Compute SHA256 hash of a string.
pub fn sha256_str(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

/// Loggable stand-in for a secret value.
pub fn fingerprint(secret: &str) -> String {
    if secret.is_empty() {
        return "[EMPTY]".to_string();
    }
    let hash = sha256_str(secret);
    format!("{}{}{}", FINGERPRINT_PREFIX, &hash[..12], FINGERPRINT_SUFFIX)
}
