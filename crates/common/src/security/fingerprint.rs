use sha2::{Digest, Sha256};

/// Short SHA-256 fingerprint for identifiers that must not appear raw in
/// logs (account emails, tokens). Stable across runs so log lines correlate.
pub fn fingerprint(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}
