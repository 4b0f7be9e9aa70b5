use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How a variant's origin resources are authenticated at playback time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
  /// Plain fetch, no extra requirements.
  None,
  /// The origin checks the Referer/Origin pair pinned during extraction.
  RefererPinned,
  /// Key fetches additionally need a proof-of-work nonce.
  PowKey,
}

/// One playable quality of a resolved stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
  pub quality: String,
  pub origin_url: String,
  /// Headers the origin requires on every fetch of this variant's
  /// resources; attached server-side, never exposed to the client.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub required_headers: BTreeMap<String, String>,
  pub auth_mode: AuthMode,
  pub expires_at: u64,
}

impl Variant {
  pub fn header_pairs(&self) -> Vec<(String, String)> {
    self
      .required_headers
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect()
  }
}

/// A fully resolved stream: the product of one provider extraction.
/// At least one variant is present on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDescriptor {
  pub provider: String,
  pub content_id: String,
  pub variants: Vec<Variant>,
  pub resolved_at: u64,
  pub expires_at: u64,
}

/// Wire shape of `GET /v1/extract`: the descriptor plus a playback token
/// and ready-to-use proxied manifest URLs.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractResponse {
  pub provider: String,
  pub content_id: String,
  pub token: String,
  pub resolved_at: u64,
  pub expires_at: u64,
  pub variants: Vec<VariantView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantView {
  pub quality: String,
  pub origin_url: String,
  pub auth_mode: AuthMode,
  pub proxied_url: String,
}
