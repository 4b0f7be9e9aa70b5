use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::trace;
use url::Url;

use crate::api::descriptor::AuthMode;
use crate::common::errors::{ExtractionError, Stage};
use crate::common::types::now_secs;
use crate::configs::LivearenaConfig;
use crate::decoder::DecodeHints;
use crate::fetch::FetchResponse;
use crate::pow::{PowChallenge, compute_nonce};

use super::plugin::{
  HopOutcome, KeyFetchPlan, ProviderContext, ProviderPlugin, RawPayload, RawVariant,
};
use super::session::ExtractionSession;

/// Live-channel provider.
///
/// Chain: channel page framing a player, player page carrying the channel
/// key and a server-lookup path, then the lookup response naming the edge
/// node the playlist lives on. The lookup answer comes in (at least) two
/// shapes; both are matched at runtime. Key fetches against the edge are
/// proof-of-work gated.
pub struct LivearenaProvider {
  config: LivearenaConfig,
  iframe_re: Regex,
  channel_key_re: Regex,
  lookup_re: Regex,
  key_path_re: Regex,
}

impl LivearenaProvider {
  pub fn new(config: LivearenaConfig) -> Result<Self, String> {
    Ok(Self {
      config,
      iframe_re: Regex::new(r#"<iframe[^>]+src="(?<src>[^"]+)""#).map_err(|e| e.to_string())?,
      channel_key_re: Regex::new(r#"(?:const|var|let)\s+CHANNEL_KEY\s*=\s*"(?<key>[^"]+)""#)
        .map_err(|e| e.to_string())?,
      lookup_re: Regex::new(r#"['"](?<path>[^'"]*server_lookup[^'"]*)['"]"#)
        .map_err(|e| e.to_string())?,
      key_path_re: Regex::new(r"/key/(?<kn>\d+)/").map_err(|e| e.to_string())?,
    })
  }

  fn base(&self) -> &str {
    self.config.base_url.trim_end_matches('/')
  }

  fn playback_headers(&self) -> Vec<(String, String)> {
    vec![
      ("Referer".to_string(), format!("{}/", self.base())),
      ("Origin".to_string(), self.base().to_string()),
    ]
  }

  fn build_plans(
    &self,
    ctx: &ProviderContext<'_>,
    resource: &str,
    key_number: u64,
  ) -> Result<Vec<KeyFetchPlan>, ExtractionError> {
    let pow_cfg = ctx.secrets.pow();
    let secret = ctx.secrets.pow_secret(self.id()).ok_or_else(|| {
      ExtractionError::Failed {
        stage: Stage::Auth,
        cause: "no proof-of-work secret configured".to_string(),
      }
    })?;

    let now = now_secs() as i64;
    let mut plans = Vec::with_capacity(pow_cfg.skew_candidates_secs.len());
    // The origin checks that the timestamp lies a small window in the
    // past; the window shifts without notice, so each configured skew gets
    // its own plan and the caller probes them in order.
    for skew in &pow_cfg.skew_candidates_secs {
      let timestamp = now - skew;
      let challenge = PowChallenge {
        resource: resource.to_string(),
        key_number,
        timestamp,
        threshold: pow_cfg.threshold,
      };
      let nonce = compute_nonce(&challenge, &secret, pow_cfg.max_iterations).map_err(|e| {
        ExtractionError::Failed {
          stage: Stage::Auth,
          cause: e.to_string(),
        }
      })?;
      plans.push(KeyFetchPlan {
        query: vec![
          ("kn".to_string(), key_number.to_string()),
          ("ts".to_string(), timestamp.to_string()),
          ("n".to_string(), nonce.to_string()),
        ],
        headers: self.playback_headers(),
      });
    }
    Ok(plans)
  }
}

#[async_trait]
impl ProviderPlugin for LivearenaProvider {
  fn id(&self) -> &'static str {
    "livearena"
  }

  fn entry_url(&self, content_id: &str) -> String {
    format!("{}/watch/{}", self.base(), content_id)
  }

  async fn follow_hop(
    &self,
    _ctx: &ProviderContext<'_>,
    session: &mut ExtractionSession,
    response: &FetchResponse,
  ) -> Result<HopOutcome, ExtractionError> {
    let body = response.text();

    // Server-lookup answer: names the edge node. Two shapes seen so far.
    if let Ok(json) = serde_json::from_str::<Value>(&body) {
      if let Some(server_key) = json.get("server_key").and_then(Value::as_str) {
        let channel_key = session.vars.get("channel_key").cloned().ok_or_else(|| {
          ExtractionError::Failed {
            stage: Stage::Hop,
            cause: "server lookup answered before a channel key was seen".to_string(),
          }
        })?;
        let edge = &self.config.edge_suffix;
        let playlist = if server_key == "top1/cdn" {
          format!("https://top1.{}/top1/cdn/{}/mono.m3u8", edge, channel_key)
        } else {
          format!(
            "https://{}new.{}/{}/{}/mono.m3u8",
            server_key, edge, server_key, channel_key
          )
        };
        trace!("livearena: edge {} -> {}", server_key, playlist);
        return Ok(HopOutcome::Payload(RawPayload {
          body: playlist,
          hints: DecodeHints::default(),
        }));
      }
    }

    // Player page: channel key + lookup path.
    if let Some(caps) = self.channel_key_re.captures(&body) {
      let channel_key = caps["key"].to_string();
      let lookup_path = self
        .lookup_re
        .captures(&body)
        .map(|c| c["path"].to_string())
        .ok_or_else(|| ExtractionError::Failed {
          stage: Stage::Hop,
          cause: "player page carries no server-lookup path".to_string(),
        })?;

      let current = Url::parse(session.current_url()).map_err(|e| ExtractionError::Failed {
        stage: Stage::Hop,
        cause: e.to_string(),
      })?;
      let mut lookup = current
        .join(&lookup_path)
        .map_err(|e| ExtractionError::Failed {
          stage: Stage::Hop,
          cause: e.to_string(),
        })?
        .to_string();
      if lookup.ends_with('=') {
        lookup.push_str(&urlencoding::encode(&channel_key));
      } else {
        lookup.push_str(&format!("?channel_id={}", urlencoding::encode(&channel_key)));
      }

      session.vars.insert("channel_key".to_string(), channel_key);
      return Ok(HopOutcome::Next(lookup));
    }

    // Channel page: framed player.
    if let Some(caps) = self.iframe_re.captures(&body) {
      let src = &caps["src"];
      let current = Url::parse(session.current_url()).map_err(|e| ExtractionError::Failed {
        stage: Stage::Hop,
        cause: e.to_string(),
      })?;
      let next = current.join(src).map_err(|e| ExtractionError::Failed {
        stage: Stage::Hop,
        cause: e.to_string(),
      })?;
      return Ok(HopOutcome::Next(next.to_string()));
    }

    Err(ExtractionError::Failed {
      stage: Stage::Hop,
      cause: format!("unrecognized hop response from {}", session.current_url()),
    })
  }

  fn extract_variants(
    &self,
    _session: &ExtractionSession,
    decoded: &str,
  ) -> Result<Vec<RawVariant>, ExtractionError> {
    let trimmed = decoded.trim();
    if Url::parse(trimmed).is_err() {
      return Err(ExtractionError::Failed {
        stage: Stage::Decode,
        cause: "expected a playlist URL".to_string(),
      });
    }
    Ok(vec![RawVariant {
      quality: "live".to_string(),
      url: trimmed.to_string(),
      required_headers: self.playback_headers(),
      auth_mode: AuthMode::PowKey,
    }])
  }

  fn origin_headers(&self, url: &str) -> Option<Vec<(String, String)>> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    host
      .ends_with(&self.config.edge_suffix)
      .then(|| self.playback_headers())
  }

  fn key_fetch_plans(
    &self,
    ctx: &ProviderContext<'_>,
    url: &str,
  ) -> Option<Result<Vec<KeyFetchPlan>, ExtractionError>> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    if !host.ends_with(&self.config.edge_suffix) {
      return None;
    }
    let caps = self.key_path_re.captures(parsed.path())?;
    let key_number: u64 = caps["kn"].parse().ok()?;
    Some(self.build_plans(ctx, parsed.path(), key_number))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::configs::SecretStore;
  use crate::decoder::DecoderEngine;
  use crate::fetch::OriginFetcher;
  use std::time::Duration;
  use tokio::time::Instant;

  fn provider() -> LivearenaProvider {
    LivearenaProvider::new(LivearenaConfig {
      base_url: "https://livearena.su".to_string(),
      edge_suffix: "iosplayer.ru".to_string(),
    })
    .unwrap()
  }

  fn session() -> ExtractionSession {
    let mut s = ExtractionSession::new(
      "https://livearena.su/watch/sports-1".to_string(),
      Instant::now() + Duration::from_secs(10),
    );
    s.record_hop("https://livearena.su/watch/sports-1");
    s
  }

  struct CtxParts {
    fetcher: OriginFetcher,
    decoder: DecoderEngine,
    secrets: SecretStore,
  }

  fn ctx_parts(secrets_path: &str) -> CtxParts {
    CtxParts {
      fetcher: OriginFetcher::new(&crate::configs::FetchConfig::default()).unwrap(),
      decoder: DecoderEngine::new(),
      secrets: SecretStore::open(secrets_path),
    }
  }

  #[tokio::test]
  async fn lookup_shapes_produce_different_edges() {
    let provider = provider();
    let parts = ctx_parts("/nonexistent/secrets.toml");
    let ctx = ProviderContext {
      fetcher: &parts.fetcher,
      decoder: &parts.decoder,
      secrets: &parts.secrets,
    };

    for (lookup_json, expected) in [
      (
        r#"{"server_key":"top1/cdn"}"#,
        "https://top1.iosplayer.ru/top1/cdn/sports1hd/mono.m3u8",
      ),
      (
        r#"{"server_key":"wind"}"#,
        "https://windnew.iosplayer.ru/wind/sports1hd/mono.m3u8",
      ),
    ] {
      let mut session = session();
      session
        .vars
        .insert("channel_key".to_string(), "sports1hd".to_string());
      let response = crate::fetch::FetchResponse {
        status: 200,
        content_type: Some("application/json".to_string()),
        body: bytes::Bytes::from(lookup_json.to_string()),
        tier: crate::common::errors::FetchTier::Direct,
      };
      match provider.follow_hop(&ctx, &mut session, &response).await.unwrap() {
        HopOutcome::Payload(payload) => assert_eq!(payload.body, expected),
        HopOutcome::Next(url) => panic!("expected payload, got hop to {}", url),
      }
    }
  }

  #[tokio::test]
  async fn player_page_yields_lookup_hop_with_channel_key() {
    let provider = provider();
    let parts = ctx_parts("/nonexistent/secrets.toml");
    let ctx = ProviderContext {
      fetcher: &parts.fetcher,
      decoder: &parts.decoder,
      secrets: &parts.secrets,
    };

    let mut session = session();
    session.record_hop("https://player.livearena.su/embed/sports-1");
    let body = concat!(
      "<script>\n",
      "const CHANNEL_KEY = \"sports1hd\";\n",
      "fetchWithRetry('/server_lookup.php?channel_id=' + CHANNEL_KEY);\n",
      "</script>",
    );
    let response = crate::fetch::FetchResponse {
      status: 200,
      content_type: Some("text/html".to_string()),
      body: bytes::Bytes::from(body),
      tier: crate::common::errors::FetchTier::Direct,
    };

    match provider.follow_hop(&ctx, &mut session, &response).await.unwrap() {
      HopOutcome::Next(url) => {
        assert_eq!(
          url,
          "https://player.livearena.su/server_lookup.php?channel_id=sports1hd"
        );
        assert_eq!(session.vars.get("channel_key").unwrap(), "sports1hd");
      }
      HopOutcome::Payload(_) => panic!("expected a hop"),
    }
  }

  #[test]
  fn key_plans_cover_every_skew_candidate() {
    let dir = std::env::temp_dir().join(format!("sg-livearena-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("secrets.toml");
    std::fs::write(
      &path,
      "[pow]\nskew_candidates_secs = [12, 30]\n[pow.secrets]\nlivearena = \"s3cr3t\"\n",
    )
    .unwrap();

    let provider = provider();
    let parts = ctx_parts(path.to_str().unwrap());
    let ctx = ProviderContext {
      fetcher: &parts.fetcher,
      decoder: &parts.decoder,
      secrets: &parts.secrets,
    };

    let plans = provider
      .key_fetch_plans(&ctx, "https://top1.iosplayer.ru/top1/cdn/sports1hd/key/42/99")
      .unwrap()
      .unwrap();
    assert_eq!(plans.len(), 2);
    for plan in &plans {
      assert!(plan.query.iter().any(|(k, _)| k == "n"));
      assert!(plan.query.iter().any(|(k, v)| k == "kn" && v == "42"));
    }

    // Non-key edge URLs carry no plans; foreign hosts are not ours at all.
    assert!(
      provider
        .key_fetch_plans(&ctx, "https://top1.iosplayer.ru/top1/cdn/sports1hd/mono.m3u8")
        .is_none()
    );
    assert!(
      provider
        .key_fetch_plans(&ctx, "https://cdn.example/key/42/99")
        .is_none()
    );

    let _ = std::fs::remove_dir_all(&dir);
  }

  #[test]
  fn missing_secret_fails_at_auth_stage() {
    let provider = provider();
    let parts = ctx_parts("/nonexistent/secrets.toml");
    let ctx = ProviderContext {
      fetcher: &parts.fetcher,
      decoder: &parts.decoder,
      secrets: &parts.secrets,
    };
    let err = provider
      .key_fetch_plans(&ctx, "https://top1.iosplayer.ru/top1/cdn/sports1hd/key/42/99")
      .unwrap()
      .unwrap_err();
    assert!(matches!(err, ExtractionError::Failed { stage: Stage::Auth, .. }));
  }
}
