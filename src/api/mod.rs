pub mod descriptor;

pub use descriptor::*;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::debug;

use crate::common::errors::{ApiError, ExtractionError, FetchError, Stage};
use crate::common::types::{Fingerprint, SessionId};
use crate::fetch::FetchResponse;
use crate::playlist::{self, RewriteContext};
use crate::server::AppState;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Derive the caller's fingerprint from transport metadata. The raw inputs
/// are hashed immediately and never stored.
fn fingerprint_of(headers: &HeaderMap) -> Fingerprint {
    let addr = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
        .unwrap_or_else(|| "local".to_string());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    Fingerprint::derive(&addr, user_agent)
}

fn fetch_api_error(err: &FetchError, path: &str) -> ApiError {
    ApiError::from_extraction(&ExtractionError::from_fetch(Stage::Hop, err), path)
}

fn proxy_deadline(state: &AppState) -> Instant {
    Instant::now() + Duration::from_secs(state.config.fetch.request_timeout_secs)
}

fn binary_response(response: FetchResponse) -> Response {
    let content_type = response
        .content_type
        .unwrap_or_else(|| "application/octet-stream".to_string());
    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        response.body,
    )
        .into_response()
}

fn append_query(url: &str, query: &[(String, String)]) -> String {
    if query.is_empty() {
        return url.to_string();
    }
    let mut out = String::with_capacity(url.len() + 32);
    out.push_str(url);
    let mut sep = if url.contains('?') { '&' } else { '?' };
    for (key, value) in query {
        out.push(sep);
        out.push_str(key);
        out.push('=');
        out.push_str(&urlencoding::encode(value));
        sep = '&';
    }
    out
}

#[derive(Debug, Deserialize)]
pub struct ExtractParams {
    pub provider: String,
    pub id: String,
    pub variant: Option<String>,
}

/// GET /v1/extract?provider=...&id=...&variant=...
pub async fn extract(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ExtractParams>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Json<ExtractResponse>, ApiError> {
    let path = uri.path().to_string();
    debug!("extract request: {}:{}", params.provider, params.id);

    // External catalogue ids are translated by the metadata collaborator.
    let content_id = match params.id.strip_prefix("ext:") {
        Some(external) => match &state.metadata {
            Some(metadata) => metadata
                .translate(external)
                .await
                .unwrap_or_else(|| params.id.clone()),
            None => params.id.clone(),
        },
        None => params.id.clone(),
    };

    let key = format!(
        "{}:{}:{}",
        params.provider,
        content_id,
        params.variant.as_deref().unwrap_or("*")
    );
    let ctx = state.provider_ctx();
    let descriptor = state
        .descriptors
        .get_or_compute(
            &key,
            state
                .providers
                .extract(&ctx, &params.provider, &content_id, params.variant.as_deref()),
            ExtractionError::stale_serve_ok,
            || ExtractionError::Failed {
                stage: Stage::Entry,
                cause: "extraction task died".to_string(),
            },
        )
        .await
        .map_err(|e| ApiError::from_extraction(&e, path.as_str()))?;

    let fingerprint = fingerprint_of(&headers);
    let session = SessionId::generate();
    let issued = state.tokens.issue(&session, &fingerprint);
    let proxy_origin = state.proxy_origin();

    let variants = descriptor
        .variants
        .iter()
        .map(|v| VariantView {
            quality: v.quality.clone(),
            origin_url: v.origin_url.clone(),
            auth_mode: v.auth_mode,
            proxied_url: format!(
                "{}/v1/proxy/manifest?url={}&token={}",
                proxy_origin,
                urlencoding::encode(&v.origin_url),
                issued.token
            ),
        })
        .collect();

    Ok(Json(ExtractResponse {
        provider: descriptor.provider.clone(),
        content_id: descriptor.content_id.clone(),
        token: issued.token,
        resolved_at: descriptor.resolved_at,
        expires_at: descriptor.expires_at,
        variants,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ProxyParams {
    pub url: String,
    pub token: String,
}

/// GET /v1/proxy/manifest?url=...&token=...
///
/// Live playlists are re-fetched continuously, so manifest validation does
/// not burn a replay nonce; segment and key fetches do.
pub async fn proxy_manifest(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ProxyParams>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, ApiError> {
    let path = uri.path().to_string();
    let fingerprint = fingerprint_of(&headers);
    state
        .tokens
        .validate_reusable(&params.token, &fingerprint)
        .map_err(|e| ApiError::from_token(&e, path.as_str()))?;

    let origin_headers = state.providers.origin_headers_for(&params.url);
    let response = state
        .fetcher
        .fetch(&params.url, &origin_headers, proxy_deadline(&state))
        .await
        .map_err(|e| fetch_api_error(&e, &path))?;

    let rewritten = playlist::rewrite(
        &response.text(),
        &RewriteContext {
            base_url: &params.url,
            proxy_origin: &state.proxy_origin(),
            token: &params.token,
            segment_policy: state.config.providers.segment_policy,
        },
    );

    Ok((
        [
            (
                header::CONTENT_TYPE,
                "application/vnd.apple.mpegurl".to_string(),
            ),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        rewritten,
    )
        .into_response())
}

/// GET /v1/proxy/segment?url=...&token=...
pub async fn proxy_segment(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ProxyParams>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, ApiError> {
    let path = uri.path().to_string();
    let fingerprint = fingerprint_of(&headers);
    state
        .tokens
        .validate(&params.token, &fingerprint, &params.url)
        .map_err(|e| ApiError::from_token(&e, path.as_str()))?;

    let origin_headers = state.providers.origin_headers_for(&params.url);
    let response = state
        .fetcher
        .fetch(&params.url, &origin_headers, proxy_deadline(&state))
        .await
        .map_err(|e| fetch_api_error(&e, &path))?;

    Ok(binary_response(response))
}

/// GET /v1/proxy/key?url=...&token=...
///
/// Key endpoints may demand proof-of-work with a timestamp the origin
/// checks against its own clock; each authorization plan carries one skew
/// candidate, probed in order until the origin accepts.
pub async fn proxy_key(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ProxyParams>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, ApiError> {
    let path = uri.path().to_string();
    let fingerprint = fingerprint_of(&headers);
    state
        .tokens
        .validate(&params.token, &fingerprint, &params.url)
        .map_err(|e| ApiError::from_token(&e, path.as_str()))?;

    let ctx = state.provider_ctx();
    let plans = state
        .providers
        .key_fetch_plans(&ctx, &params.url)
        .map_err(|e| ApiError::from_extraction(&e, path.as_str()))?;

    let deadline = proxy_deadline(&state);
    let mut last_err = None;
    for plan in plans {
        let url = append_query(&params.url, &plan.query);
        match state.fetcher.fetch(&url, &plan.headers, deadline).await {
            Ok(response) => return Ok(binary_response(response)),
            Err(err) => {
                debug!("key fetch plan rejected ({}), trying next", err);
                last_err = Some(err);
            }
        }
    }

    let err = last_err.unwrap_or(FetchError::Soft {
        tier: crate::common::errors::FetchTier::Direct,
        status: None,
        message: "no key fetch plan available".to_string(),
    });
    Err(fetch_api_error(&err, &path))
}

/// GET /version
pub async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
