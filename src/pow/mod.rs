//! Hash-threshold proof-of-work for protected key-fetch endpoints.
//!
//! The origin hands out decryption keys only to callers presenting a nonce
//! whose challenge digest falls below a threshold. The scheme was lifted
//! from the origin's compiled player module, so the preimage layout below
//! is load-bearing: a verifying relay and this client must agree bit for
//! bit.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::common::errors::PowExhausted;

type HmacSha256 = Hmac<Sha256>;

/// One challenge instance. Never persisted beyond the single fetch the
/// resulting nonce authorizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowChallenge {
    pub resource: String,
    pub key_number: u64,
    pub timestamp: i64,
    pub threshold: u64,
}

/// Digest prefix for a candidate nonce, interpreted as a big-endian
/// integer.
///
/// Preimage: `HMAC-SHA256(secret, resource)` tag bytes, then the ASCII of
/// `resource`, `key_number`, `timestamp` and `nonce` joined with `:`.
fn digest_value(challenge: &PowChallenge, secret: &str, nonce: u64) -> u64 {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(challenge.resource.as_bytes());
    let tag = mac.finalize().into_bytes();

    let mut hasher = Sha256::new();
    hasher.update(tag);
    hasher.update(challenge.resource.as_bytes());
    hasher.update(b":");
    hasher.update(challenge.key_number.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(challenge.timestamp.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(nonce.to_string().as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Find the minimal nonce >= 0 whose digest prefix is below the threshold.
///
/// Synchronous and CPU-bound; with tuned thresholds it completes in low
/// hundreds of iterations. The cap keeps a mistuned threshold from turning
/// into unbounded latency.
pub fn compute_nonce(
    challenge: &PowChallenge,
    secret: &str,
    max_iterations: u32,
) -> Result<u64, PowExhausted> {
    for nonce in 0..u64::from(max_iterations) {
        if digest_value(challenge, secret, nonce) < challenge.threshold {
            return Ok(nonce);
        }
    }
    Err(PowExhausted {
        iterations: max_iterations,
    })
}

/// Check a nonce someone else computed. Agrees bit-exactly with
/// [`compute_nonce`] by construction.
pub fn verify_nonce(challenge: &PowChallenge, secret: &str, nonce: u64) -> bool {
    digest_value(challenge, secret, nonce) < challenge.threshold
}
