use std::collections::BTreeMap;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::trace;

use crate::api::descriptor::AuthMode;
use crate::common::errors::{ExtractionError, Stage};
use crate::configs::VidcloudConfig;
use crate::decoder::DecodeHints;
use crate::fetch::FetchResponse;

use super::plugin::{HopOutcome, ProviderContext, ProviderPlugin, RawPayload, RawVariant};
use super::session::ExtractionSession;

/// VOD embed provider.
///
/// Chain: embed page carrying a `data-id` hash, then an intermediate page
/// that names one of two mutually exclusive sources-endpoint families
/// (`/embed-1/.../e-1/` vs `/embed-2/.../e-2/`), then the sources payload
/// itself, which arrives plain, JSON-wrapped, or packer-obfuscated. Which
/// family a given content id takes varies, so every hop is decided off the
/// response we actually got.
pub struct VidcloudProvider {
  config: VidcloudConfig,
  data_id_re: Regex,
  hash_re: Regex,
}

impl VidcloudProvider {
  pub fn new(config: VidcloudConfig) -> Result<Self, String> {
    Ok(Self {
      config,
      data_id_re: Regex::new(r#"data-id="(?<id>[A-Za-z0-9]+)""#).map_err(|e| e.to_string())?,
      hash_re: Regex::new(r#"data-hash="(?<hash>[A-Za-z0-9]+)"|"hash"\s*:\s*"(?<jhash>[A-Za-z0-9]+)""#)
        .map_err(|e| e.to_string())?,
    })
  }

  fn base(&self) -> &str {
    self.config.base_url.trim_end_matches('/')
  }

  fn find_hash(&self, body: &str) -> Option<String> {
    let caps = self.hash_re.captures(body)?;
    caps
      .name("hash")
      .or_else(|| caps.name("jhash"))
      .map(|m| m.as_str().to_string())
  }
}

#[async_trait]
impl ProviderPlugin for VidcloudProvider {
  fn id(&self) -> &'static str {
    "vidcloud"
  }

  fn entry_url(&self, content_id: &str) -> String {
    format!("{}/embed/{}", self.base(), content_id)
  }

  async fn follow_hop(
    &self,
    _ctx: &ProviderContext<'_>,
    session: &mut ExtractionSession,
    response: &FetchResponse,
  ) -> Result<HopOutcome, ExtractionError> {
    let body = response.text();

    // Sources payload? Either a JSON envelope with a `sources` member, or
    // a bare packer blob.
    if let Ok(json) = serde_json::from_str::<Value>(&body) {
      match json.get("sources") {
        Some(Value::String(obfuscated)) => {
          trace!("vidcloud: obfuscated sources string");
          return Ok(HopOutcome::Payload(RawPayload {
            body: obfuscated.clone(),
            hints: DecodeHints::default(),
          }));
        }
        Some(Value::Array(_)) => {
          trace!("vidcloud: plain sources array");
          return Ok(HopOutcome::Payload(RawPayload {
            body,
            hints: DecodeHints::default(),
          }));
        }
        _ => {}
      }
    }
    if body.contains("p,a,c,k,e") {
      return Ok(HopOutcome::Payload(RawPayload {
        body,
        hints: DecodeHints::default(),
      }));
    }

    // Intermediate page: names the sources-endpoint family and carries the
    // second hash.
    if let Some(hash) = self.find_hash(&body) {
      let family = if body.contains("/embed-1/") {
        Some(1)
      } else if body.contains("/embed-2/") {
        Some(2)
      } else {
        None
      };
      if let Some(n) = family {
        session.vars.insert("sources_hash".to_string(), hash.clone());
        return Ok(HopOutcome::Next(format!(
          "{}/embed-{}/ajax/e-{}/getSources?id={}",
          self.base(),
          n,
          n,
          hash
        )));
      }
    }

    // Entry page: carries the embed hash.
    if let Some(caps) = self.data_id_re.captures(&body) {
      let id = &caps["id"];
      return Ok(HopOutcome::Next(format!("{}/ajax/embed/{}", self.base(), id)));
    }

    Err(ExtractionError::Failed {
      stage: Stage::Hop,
      cause: format!("unrecognized hop response from {}", session.current_url()),
    })
  }

  fn extract_variants(
    &self,
    session: &ExtractionSession,
    decoded: &str,
  ) -> Result<Vec<RawVariant>, ExtractionError> {
    let headers = vec![("Referer".to_string(), session.entry_url.clone())];
    let mut variants = Vec::new();

    match serde_json::from_str::<Value>(decoded.trim()) {
      Ok(Value::Object(map)) => {
        if let Some(Value::Array(sources)) = map.get("sources") {
          for source in sources {
            let Some(file) = source.get("file").and_then(Value::as_str) else {
              continue;
            };
            if url::Url::parse(file).is_err() {
              continue;
            }
            let quality = source
              .get("label")
              .and_then(Value::as_str)
              .unwrap_or("auto")
              .to_string();
            variants.push(RawVariant {
              quality,
              url: file.to_string(),
              required_headers: headers.clone(),
              auth_mode: AuthMode::RefererPinned,
            });
          }
        } else {
          // Dictionary-packed configs decode to a flat quality -> URL map.
          let ordered: BTreeMap<&String, &Value> = map.iter().collect();
          for (quality, value) in ordered {
            let Some(target) = value.as_str() else { continue };
            if url::Url::parse(target).is_ok() {
              variants.push(RawVariant {
                quality: quality.clone(),
                url: target.to_string(),
                required_headers: headers.clone(),
                auth_mode: AuthMode::RefererPinned,
              });
            }
          }
        }
      }
      _ => {
        let trimmed = decoded.trim();
        if url::Url::parse(trimmed).is_ok() {
          variants.push(RawVariant {
            quality: "auto".to_string(),
            url: trimmed.to_string(),
            required_headers: headers,
            auth_mode: AuthMode::RefererPinned,
          });
        }
      }
    }

    if variants.is_empty() {
      return Err(ExtractionError::Failed {
        stage: Stage::Decode,
        cause: "decoded config contains no playable URLs".to_string(),
      });
    }
    Ok(variants)
  }
}
