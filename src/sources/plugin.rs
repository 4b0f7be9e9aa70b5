use async_trait::async_trait;

use crate::api::descriptor::AuthMode;
use crate::common::errors::ExtractionError;
use crate::configs::SecretStore;
use crate::decoder::{DecodeHints, DecoderEngine};
use crate::fetch::{FetchResponse, OriginFetcher};

use super::session::ExtractionSession;

/// Shared services handed to provider hooks.
pub struct ProviderContext<'a> {
    pub fetcher: &'a OriginFetcher,
    pub decoder: &'a DecoderEngine,
    pub secrets: &'a SecretStore,
}

/// A payload ready for the decoder engine, plus whatever the provider
/// knows about its encoding.
pub struct RawPayload {
    pub body: String,
    pub hints: DecodeHints,
}

/// What a hop response led to.
pub enum HopOutcome {
    /// Fetch this URL next (with the session's pinned referer).
    Next(String),
    /// The chain is done; decode this.
    Payload(RawPayload),
}

/// A candidate variant before it has been probed.
#[derive(Debug, Clone)]
pub struct RawVariant {
    pub quality: String,
    pub url: String,
    pub required_headers: Vec<(String, String)>,
    pub auth_mode: AuthMode,
}

/// One authorization attempt for a protected key fetch. Providers whose
/// key endpoints demand proof-of-work emit several plans, one per
/// timestamp-skew candidate, probed in order.
#[derive(Debug)]
pub struct KeyFetchPlan {
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

/// Trait all providers implement.
///
/// The hop chain's shape is never assumed: `follow_hop` pattern-matches
/// each response to decide the next step, because the same provider can
/// expose different topologies for different content within one session.
#[async_trait]
pub trait ProviderPlugin: Send + Sync {
    /// Registry key, referenced by `GET /v1/extract?provider=`.
    fn id(&self) -> &'static str;

    /// First URL of the chain for a content id.
    fn entry_url(&self, content_id: &str) -> String;

    /// Inspect a hop response and decide what happens next.
    async fn follow_hop(
        &self,
        ctx: &ProviderContext<'_>,
        session: &mut ExtractionSession,
        response: &FetchResponse,
    ) -> Result<HopOutcome, ExtractionError>;

    /// Turn the decoded payload into candidate variants.
    fn extract_variants(
        &self,
        session: &ExtractionSession,
        decoded: &str,
    ) -> Result<Vec<RawVariant>, ExtractionError>;

    /// Headers the origin requires when fetching playback-time resources
    /// (manifests, segments, keys) belonging to this provider. `None`
    /// when the URL is not recognized as this provider's.
    fn origin_headers(&self, url: &str) -> Option<Vec<(String, String)>> {
        let _ = url;
        None
    }

    /// Authorization plans for a protected key URL, or `None` when this
    /// provider does not protect it.
    fn key_fetch_plans(
        &self,
        ctx: &ProviderContext<'_>,
        url: &str,
    ) -> Option<Result<Vec<KeyFetchPlan>, ExtractionError>> {
        let _ = (ctx, url);
        None
    }
}
