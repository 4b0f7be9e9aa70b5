//! Anti-leech playback tokens.
//!
//! Short-lived, HMAC-signed, fingerprint-bound tokens gate segment and key
//! delivery. A used-nonce registry enforces single use per (token,
//! resource): replaying a token against the same resource fails, while one
//! token still covers each distinct segment/key of a playback session once.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::common::errors::{TokenInvalid, TokenReason};
use crate::common::types::{Fingerprint, SessionId, now_secs};
use crate::configs::TokenConfig;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_VERSION: &str = "v1";
const PRUNE_WATERMARK: usize = 4096;

#[derive(Debug, Clone)]
pub struct IssuedToken {
  pub token: String,
  pub expires_at: u64,
}

struct Parsed {
  expires: u64,
  signature: String,
}

pub struct TokenService {
  secret: Vec<u8>,
  ttl_secs: u64,
  used: DashMap<(String, String), u64>,
}

impl TokenService {
  pub fn new(config: &TokenConfig) -> Self {
    let secret = match &config.signing_secret {
      Some(s) if !s.is_empty() => s.as_bytes().to_vec(),
      _ => {
        let mut bytes = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        tracing::info!("no token signing secret configured, generated an ephemeral one");
        bytes
      }
    };
    Self {
      secret,
      ttl_secs: config.ttl_secs,
      used: DashMap::new(),
    }
  }

  pub fn issue(&self, session: &SessionId, fingerprint: &Fingerprint) -> IssuedToken {
    let issued = now_secs();
    let expires = issued + self.ttl_secs;
    let signature = self.sign(session, fingerprint, issued, expires);
    IssuedToken {
      token: format!(
        "{}.{}.{}.{}.{}.{}",
        TOKEN_VERSION, session, fingerprint, issued, expires, signature
      ),
      expires_at: expires,
    }
  }

  /// Validate and burn: a second validation of the same token against the
  /// same resource fails with `replayed`.
  pub fn validate(
    &self,
    token: &str,
    fingerprint: &Fingerprint,
    resource_url: &str,
  ) -> Result<(), TokenInvalid> {
    let parsed = self.check(token, fingerprint)?;

    match self
      .used
      .entry((parsed.signature, resource_url.to_string()))
    {
      Entry::Occupied(_) => Err(TokenInvalid {
        reason: TokenReason::Replayed,
      }),
      Entry::Vacant(slot) => {
        slot.insert(parsed.expires);
        self.prune();
        Ok(())
      }
    }
  }

  /// Validate without burning a nonce. Manifest fetches use this: live
  /// playlists are re-requested continuously by design.
  pub fn validate_reusable(
    &self,
    token: &str,
    fingerprint: &Fingerprint,
  ) -> Result<(), TokenInvalid> {
    self.check(token, fingerprint).map(|_| ())
  }

  fn check(&self, token: &str, fingerprint: &Fingerprint) -> Result<Parsed, TokenInvalid> {
    let malformed = || TokenInvalid {
      reason: TokenReason::Malformed,
    };

    let parts: Vec<&str> = token.split('.').collect();
    let [version, session, carried_fp, issued, expires, signature] = parts[..] else {
      return Err(malformed());
    };
    if version != TOKEN_VERSION {
      return Err(malformed());
    }
    let issued: u64 = issued.parse().map_err(|_| malformed())?;
    let expires: u64 = expires.parse().map_err(|_| malformed())?;

    let sig_bytes = hex::decode(signature).map_err(|_| malformed())?;
    let mut mac = HmacSha256::new_from_slice(&self.secret)
      .expect("HMAC accepts keys of any length");
    mac.update(Self::payload(session, carried_fp, issued, expires).as_bytes());
    if mac.verify_slice(&sig_bytes).is_err() {
      return Err(TokenInvalid {
        reason: TokenReason::BadSignature,
      });
    }

    if expires < now_secs() {
      return Err(TokenInvalid {
        reason: TokenReason::Expired,
      });
    }

    if carried_fp != fingerprint.0 {
      return Err(TokenInvalid {
        reason: TokenReason::FingerprintMismatch,
      });
    }

    Ok(Parsed {
      expires,
      signature: signature.to_string(),
    })
  }

  fn sign(&self, session: &SessionId, fingerprint: &Fingerprint, issued: u64, expires: u64) -> String {
    let mut mac = HmacSha256::new_from_slice(&self.secret)
      .expect("HMAC accepts keys of any length");
    mac.update(Self::payload(session, fingerprint, issued, expires).as_bytes());
    hex::encode(mac.finalize().into_bytes())
  }

  fn payload(
    session: &str,
    fingerprint: &str,
    issued: u64,
    expires: u64,
  ) -> String {
    format!("{}|{}|{}|{}", session, fingerprint, issued, expires)
  }

  /// Drop expired nonce records once the registry grows past the
  /// watermark.
  fn prune(&self) {
    if self.used.len() > PRUNE_WATERMARK {
      let now = now_secs();
      self.used.retain(|_, expires| *expires >= now);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn service(ttl_secs: u64) -> TokenService {
    TokenService::new(&TokenConfig {
      signing_secret: Some("unit-test-secret".to_string()),
      ttl_secs,
    })
  }

  fn fp() -> Fingerprint {
    Fingerprint::derive("203.0.113.9", "VLC/3.0.20")
  }

  #[test]
  fn replay_against_same_resource_fails() {
    let svc = service(300);
    let issued = svc.issue(&SessionId::generate(), &fp());

    let url = "https://cdn.example/key/42/99";
    assert!(svc.validate(&issued.token, &fp(), url).is_ok());
    let err = svc.validate(&issued.token, &fp(), url).unwrap_err();
    assert_eq!(err.reason, TokenReason::Replayed);
  }

  #[test]
  fn distinct_resources_each_pass_once() {
    let svc = service(300);
    let issued = svc.issue(&SessionId::generate(), &fp());

    assert!(svc.validate(&issued.token, &fp(), "https://cdn.example/seg1.ts").is_ok());
    assert!(svc.validate(&issued.token, &fp(), "https://cdn.example/seg2.ts").is_ok());
    assert_eq!(
      svc.validate(&issued.token, &fp(), "https://cdn.example/seg1.ts")
        .unwrap_err()
        .reason,
      TokenReason::Replayed
    );
  }

  #[test]
  fn wrong_fingerprint_is_rejected() {
    let svc = service(300);
    let issued = svc.issue(&SessionId::generate(), &fp());
    let other = Fingerprint::derive("198.51.100.1", "curl/8.5");

    let err = svc
      .validate(&issued.token, &other, "https://cdn.example/seg1.ts")
      .unwrap_err();
    assert_eq!(err.reason, TokenReason::FingerprintMismatch);
  }

  #[test]
  fn tampering_breaks_the_signature() {
    let svc = service(300);
    let issued = svc.issue(&SessionId::generate(), &fp());

    // Stretch the expiry field.
    let mut parts: Vec<String> = issued.token.split('.').map(str::to_string).collect();
    parts[4] = "99999999999".to_string();
    let forged = parts.join(".");

    let err = svc
      .validate(&forged, &fp(), "https://cdn.example/seg1.ts")
      .unwrap_err();
    assert_eq!(err.reason, TokenReason::BadSignature);
  }

  #[test]
  fn expired_tokens_are_rejected() {
    let svc = service(0);
    let issued = svc.issue(&SessionId::generate(), &fp());
    std::thread::sleep(std::time::Duration::from_millis(1100));
    let err = svc
      .validate(&issued.token, &fp(), "https://cdn.example/seg1.ts")
      .unwrap_err();
    assert_eq!(err.reason, TokenReason::Expired);
  }

  #[test]
  fn garbage_is_malformed() {
    let svc = service(300);
    for bad in ["", "v1.a.b", "v2.a.b.1.2.deadbeef", "v1.a.b.x.2.deadbeef"] {
      let err = svc.validate(bad, &fp(), "https://cdn.example/x").unwrap_err();
      assert_eq!(err.reason, TokenReason::Malformed, "input: {:?}", bad);
    }
  }

  #[test]
  fn manifest_validation_does_not_burn() {
    let svc = service(300);
    let issued = svc.issue(&SessionId::generate(), &fp());
    for _ in 0..5 {
      assert!(svc.validate_reusable(&issued.token, &fp()).is_ok());
    }
    // The segment path still gets its single use afterwards.
    assert!(svc.validate(&issued.token, &fp(), "https://cdn.example/seg1.ts").is_ok());
  }
}
