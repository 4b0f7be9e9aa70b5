use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::api;
use crate::api::descriptor::StreamDescriptor;
use crate::cache::ResolveCache;
use crate::common::errors::ExtractionError;
use crate::common::types::AnyResult;
use crate::configs::{Config, SecretStore};
use crate::decoder::DecoderEngine;
use crate::fetch::OriginFetcher;
use crate::metadata::MetadataClient;
use crate::sources::{ProviderContext, ProviderManager};
use crate::tokens::TokenService;

/// Top-level application state. Only the descriptor cache and the token
/// service's used-nonce registry are shared mutable state; everything else
/// is per-request.
pub struct AppState {
    pub config: Config,
    pub providers: ProviderManager,
    pub fetcher: OriginFetcher,
    pub decoder: DecoderEngine,
    pub secrets: SecretStore,
    pub tokens: TokenService,
    pub descriptors: ResolveCache<StreamDescriptor, ExtractionError>,
    pub metadata: Option<MetadataClient>,
}

impl AppState {
    pub fn new(config: Config) -> AnyResult<Self> {
        let providers = ProviderManager::new(&config);
        let fetcher = OriginFetcher::new(&config.fetch)?;
        let decoder = DecoderEngine::new();
        let secrets = SecretStore::open(config.secrets_path.as_str());
        let tokens = TokenService::new(&config.tokens);
        let descriptors = ResolveCache::new(&config.cache);
        let metadata = match config.providers.metadata_endpoint.as_deref() {
            Some(endpoint) => Some(MetadataClient::new(endpoint)?),
            None => None,
        };

        Ok(Self {
            config,
            providers,
            fetcher,
            decoder,
            secrets,
            tokens,
            descriptors,
            metadata,
        })
    }

    pub fn provider_ctx(&self) -> ProviderContext<'_> {
        ProviderContext {
            fetcher: &self.fetcher,
            decoder: &self.decoder,
            secrets: &self.secrets,
        }
    }

    pub fn proxy_origin(&self) -> String {
        self.config.server.public_origin()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/extract", get(api::extract))
        .route("/v1/proxy/manifest", get(api::proxy_manifest))
        .route("/v1/proxy/segment", get(api::proxy_segment))
        .route("/v1/proxy/key", get(api::proxy_key))
        .route("/version", get(api::version))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
