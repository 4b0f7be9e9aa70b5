use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::common::http::HttpClient;
use crate::common::types::AnyResult;

/// Client for the optional headless-rendering collaborator.
///
/// Invoked as a last resort when the decoder engine reports an unsupported
/// format: some payloads genuinely require script execution, which never
/// happens in this process. The call is opaque; whatever the service does
/// behind `render(url)` is its business.
pub struct RenderClient {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("render service unreachable: {0}")]
    Transport(String),
    #[error("render service failed: {0}")]
    Failed(String),
}

#[derive(Serialize)]
struct RenderRequest<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct RenderResponse {
    #[serde(rename = "decodedUrl")]
    decoded_url: Option<String>,
    error: Option<String>,
}

impl RenderClient {
    pub fn new(endpoint: &str) -> AnyResult<Self> {
        Ok(Self {
            client: HttpClient::new()?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub async fn render(&self, url: &str) -> Result<String, RenderError> {
        debug!("handing {} to the render collaborator", url);
        let response = self
            .client
            .post(format!("{}/render", self.endpoint))
            .json(&RenderRequest { url })
            .send()
            .await
            .map_err(|e| RenderError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RenderError::Failed(format!(
                "status {}",
                response.status()
            )));
        }

        let body: RenderResponse = response
            .json()
            .await
            .map_err(|e| RenderError::Failed(e.to_string()))?;

        match (body.decoded_url, body.error) {
            (Some(url), _) => Ok(url),
            (None, Some(err)) => Err(RenderError::Failed(err)),
            (None, None) => Err(RenderError::Failed("empty render response".to_string())),
        }
    }
}
