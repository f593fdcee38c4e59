use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Fresh nonce for one connection's challenge.
pub fn new_nonce() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Lowercase hex of `sha256(secret || nonce)`.
pub fn challenge_digest(secret: &str, nonce: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(nonce.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn verify_digest(secret: &str, nonce: &str, digest: &str) -> bool {
    constant_time_eq(challenge_digest(secret, nonce).as_bytes(), digest.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
