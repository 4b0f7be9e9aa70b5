use serde::Deserialize;
use tracing::warn;

use crate::common::http::HttpClient;
use crate::common::types::AnyResult;

/// Client for the id-translation collaborator: maps an external catalogue
/// id (prefixed `ext:`) to a provider content id. Its internals are out of
/// scope here; unresolvable ids simply fall through unchanged.
pub struct MetadataClient {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(rename = "contentId")]
    content_id: Option<String>,
}

impl MetadataClient {
    pub fn new(endpoint: &str) -> AnyResult<Self> {
        Ok(Self {
            client: HttpClient::new()?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub async fn translate(&self, external_id: &str) -> Option<String> {
        let response = self
            .client
            .get(format!("{}/lookup", self.endpoint))
            .query(&[("id", external_id)])
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => match resp.json::<LookupResponse>().await {
                Ok(body) => body.content_id,
                Err(e) => {
                    warn!("metadata lookup for {} returned junk: {}", external_id, e);
                    None
                }
            },
            Ok(resp) => {
                warn!(
                    "metadata lookup for {} failed with status {}",
                    external_id,
                    resp.status()
                );
                None
            }
            Err(e) => {
                warn!("metadata service unreachable: {}", e);
                None
            }
        }
    }
}
