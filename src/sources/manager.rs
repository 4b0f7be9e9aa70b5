use std::collections::BTreeMap;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::api::descriptor::{StreamDescriptor, Variant};
use crate::common::errors::{DecodeError, ExtractionError, Stage};
use crate::common::types::now_secs;
use crate::configs::Config;
use crate::render::RenderClient;

use super::livearena::LivearenaProvider;
use super::plugin::{
  HopOutcome, KeyFetchPlan, ProviderContext, ProviderPlugin, RawVariant,
};
use super::session::ExtractionSession;
use super::vidcloud::VidcloudProvider;

/// Upper bound on chain length; a provider bouncing us around longer than
/// this is looping, not converging.
const MAX_HOPS: usize = 8;

/// Provider registry and extraction orchestrator.
pub struct ProviderManager {
  pub providers: Vec<Box<dyn ProviderPlugin>>,
  max_concurrent_variants: usize,
  extract_deadline: Duration,
  descriptor_ttl: Duration,
  render: Option<RenderClient>,
}

impl ProviderManager {
  pub fn new(config: &Config) -> Self {
    let mut providers: Vec<Box<dyn ProviderPlugin>> = Vec::new();

    macro_rules! register_provider {
      ($enabled:expr, $name:literal, $ctor:expr) => {
        if $enabled {
          match $ctor {
            Ok(provider) => {
              tracing::info!("Loaded provider: {}", $name);
              providers.push(Box::new(provider));
            }
            Err(e) => {
              tracing::error!("{} provider failed to initialize: {}", $name, e);
            }
          }
        }
      };
    }

    register_provider!(
      config.providers.vidcloud,
      "vidcloud",
      VidcloudProvider::new(config.vidcloud.clone().unwrap_or_default())
    );
    register_provider!(
      config.providers.livearena,
      "livearena",
      LivearenaProvider::new(config.livearena.clone().unwrap_or_default())
    );

    let render = config
      .providers
      .render_endpoint
      .as_deref()
      .and_then(|endpoint| match RenderClient::new(endpoint) {
        Ok(client) => Some(client),
        Err(e) => {
          tracing::error!("render client failed to initialize: {}", e);
          None
        }
      });

    Self {
      providers,
      max_concurrent_variants: config.providers.max_concurrent_variants,
      extract_deadline: Duration::from_secs(config.providers.extract_deadline_secs),
      descriptor_ttl: Duration::from_secs(config.cache.descriptor_ttl_secs),
      render,
    }
  }

  pub fn get(&self, id: &str) -> Option<&dyn ProviderPlugin> {
    self
      .providers
      .iter()
      .find(|p| p.id() == id)
      .map(|b| b.as_ref())
  }

  pub fn provider_ids(&self) -> Vec<&'static str> {
    self.providers.iter().map(|p| p.id()).collect()
  }

  /// Run the full chain for one piece of content: entry fetch, hop walk,
  /// decode, variant fan-out. Partial success is success; whatever subset
  /// of variants resolves is returned.
  pub async fn extract(
    &self,
    ctx: &ProviderContext<'_>,
    provider_id: &str,
    content_id: &str,
    variant_hint: Option<&str>,
  ) -> Result<StreamDescriptor, ExtractionError> {
    let provider = self
      .get(provider_id)
      .ok_or_else(|| ExtractionError::UnknownProvider(provider_id.to_string()))?;

    let entry_url = provider.entry_url(content_id);
    let deadline = Instant::now() + self.extract_deadline;
    let mut session = ExtractionSession::new(entry_url.clone(), deadline);

    debug!("extracting {}:{} starting at {}", provider_id, content_id, entry_url);

    let mut response = ctx
      .fetcher
      .fetch(&entry_url, &[], deadline)
      .await
      .map_err(|e| ExtractionError::from_fetch(Stage::Entry, &e))?;
    session.record_hop(&entry_url);

    // Hop traversal is strictly sequential: each response is required
    // input to the next request.
    let raw = loop {
      if session.hops.len() > MAX_HOPS {
        return Err(ExtractionError::Failed {
          stage: Stage::Hop,
          cause: format!("hop chain exceeded {} hops", MAX_HOPS),
        });
      }
      match provider.follow_hop(ctx, &mut session, &response).await? {
        HopOutcome::Payload(payload) => break payload,
        HopOutcome::Next(url) => {
          session.check_deadline(Stage::Hop)?;
          response = ctx
            .fetcher
            .fetch(&url, &session.referer_headers(), deadline)
            .await
            .map_err(|e| ExtractionError::from_fetch(Stage::Hop, &e))?;
          session.record_hop(&url);
        }
      }
    };

    let decoded = match ctx.decoder.decode(&raw.body, &raw.hints) {
      Ok(decoded) => {
        debug!("payload decoded by strategy {}", decoded.algorithm);
        decoded.text
      }
      // Deterministic failure: retrying the decoder with identical input
      // cannot change the outcome. Hand the page to the render
      // collaborator if one is configured, otherwise surface immediately.
      Err(DecodeError::UnsupportedFormat) => match &self.render {
        Some(render) => {
          session.check_deadline(Stage::Decode)?;
          render.render(session.current_url()).await.map_err(|e| {
            warn!("render fallback failed: {}", e);
            ExtractionError::Unsupported { stage: Stage::Decode }
          })?
        }
        None => return Err(ExtractionError::Unsupported { stage: Stage::Decode }),
      },
    };

    let mut raw_variants = provider.extract_variants(&session, &decoded)?;

    if let Some(hint) = variant_hint {
      let matched: Vec<RawVariant> = raw_variants
        .iter()
        .filter(|v| v.quality == hint)
        .cloned()
        .collect();
      if matched.is_empty() {
        debug!("variant hint '{}' matched nothing, returning all", hint);
      } else {
        raw_variants = matched;
      }
    }

    self
      .resolve_variants(ctx, provider_id, content_id, raw_variants, deadline)
      .await
  }

  /// Bounded concurrent fan-out over candidate variants,
  /// first-success-per-variant. If 3 of 5 resolve, those 3 are the result.
  async fn resolve_variants(
    &self,
    ctx: &ProviderContext<'_>,
    provider_id: &str,
    content_id: &str,
    raw_variants: Vec<RawVariant>,
    deadline: Instant,
  ) -> Result<StreamDescriptor, ExtractionError> {
    let resolved_at = now_secs();
    let expires_at = resolved_at + self.descriptor_ttl.as_secs();
    let total = raw_variants.len();

    let results: Vec<Result<Variant, ExtractionError>> =
      futures::stream::iter(raw_variants.into_iter().map(|variant| async move {
        probe_variant(ctx, variant, deadline, expires_at).await
      }))
      .buffer_unordered(self.max_concurrent_variants.max(1))
      .collect()
      .await;

    let mut variants = Vec::new();
    let mut first_err = None;
    for result in results {
      match result {
        Ok(variant) => variants.push(variant),
        Err(err) => {
          if first_err.is_none() {
            first_err = Some(err);
          }
        }
      }
    }

    if variants.is_empty() {
      return Err(first_err.unwrap_or(ExtractionError::ProviderOffline { stage: Stage::Hop }));
    }
    if variants.len() < total {
      warn!(
        "{}:{} resolved {} of {} variants",
        provider_id,
        content_id,
        variants.len(),
        total
      );
    }
    variants.sort_by(|a, b| a.quality.cmp(&b.quality));

    Ok(StreamDescriptor {
      provider: provider_id.to_string(),
      content_id: content_id.to_string(),
      variants,
      resolved_at,
      expires_at,
    })
  }

  /// Headers the origin wants on a playback-time fetch of `url`. The
  /// owning provider answers if it recognizes the URL; the fallback pins
  /// the URL's own origin, which most CDNs accept.
  pub fn origin_headers_for(&self, url: &str) -> Vec<(String, String)> {
    for provider in &self.providers {
      if let Some(headers) = provider.origin_headers(url) {
        return headers;
      }
    }
    match url::Url::parse(url) {
      Ok(parsed) => match parsed.host_str() {
        Some(host) => vec![(
          "Referer".to_string(),
          format!("{}://{}/", parsed.scheme(), host),
        )],
        None => Vec::new(),
      },
      Err(_) => Vec::new(),
    }
  }

  /// Authorization plans for a key fetch. Unprotected keys get one plain
  /// plan; PoW-protected ones get a plan per timestamp-skew candidate.
  pub fn key_fetch_plans(
    &self,
    ctx: &ProviderContext<'_>,
    url: &str,
  ) -> Result<Vec<KeyFetchPlan>, ExtractionError> {
    for provider in &self.providers {
      if let Some(plans) = provider.key_fetch_plans(ctx, url) {
        return plans;
      }
    }
    Ok(vec![KeyFetchPlan {
      query: Vec::new(),
      headers: self.origin_headers_for(url),
    }])
  }
}

async fn probe_variant(
  ctx: &ProviderContext<'_>,
  variant: RawVariant,
  deadline: Instant,
  expires_at: u64,
) -> Result<Variant, ExtractionError> {
  let response = ctx
    .fetcher
    .fetch(&variant.url, &variant.required_headers, deadline)
    .await
    .map_err(|e| ExtractionError::from_fetch(Stage::Hop, &e))?;

  // A playlist URL answering without a playlist is a dead variant even
  // when the status is fine.
  let path = variant.url.split(['?', '#']).next().unwrap_or("");
  if path.ends_with(".m3u8") && !response.text().contains("#EXTM3U") {
    return Err(ExtractionError::ProviderOffline { stage: Stage::Hop });
  }

  Ok(Variant {
    quality: variant.quality,
    origin_url: variant.url,
    required_headers: variant.required_headers.into_iter().collect::<BTreeMap<_, _>>(),
    auth_mode: variant.auth_mode,
    expires_at,
  })
}
