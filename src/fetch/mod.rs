pub mod egress;

pub use egress::EgressPlanner;

use std::net::IpAddr;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Client;
use tokio::time::Instant;
use tracing::debug;

use crate::common::errors::{FetchError, FetchTier};
use crate::common::http::HttpClient;
use crate::common::types::AnyResult;
use crate::configs::FetchConfig;

#[derive(Debug)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
    pub tier: FetchTier,
}

impl FetchResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

enum RelayEgress {
    Proxy(Client),
    Pool(EgressPlanner),
}

/// Tiered outbound fetcher. The direct tier runs first; a soft failure
/// (transport error or blocking status) advances to the relay tier when one
/// is configured. Tiers run sequentially, never raced, so a blocking origin
/// is not hit twice at once.
pub struct OriginFetcher {
    direct: Client,
    relay: Option<RelayEgress>,
    timeout: Duration,
}

impl OriginFetcher {
    pub fn new(config: &FetchConfig) -> AnyResult<Self> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let direct = HttpClient::with_timeout(timeout)?;

        let relay = match &config.relay {
            None => None,
            Some(relay) => {
                if let Some(url) = &relay.proxy_url {
                    Some(RelayEgress::Proxy(HttpClient::with_proxy(
                        url,
                        relay.proxy_username.as_deref(),
                        relay.proxy_password.as_deref(),
                        timeout,
                    )?))
                } else if !relay.egress_blocks.is_empty() {
                    Some(RelayEgress::Pool(EgressPlanner::new(
                        &relay.egress_blocks,
                        Duration::from_secs(relay.cooldown_secs),
                    )?))
                } else {
                    None
                }
            }
        };

        Ok(Self {
            direct,
            relay,
            timeout,
        })
    }

    /// Fetch `url` with the given request headers, observing `deadline`.
    /// The caller sees only the final tier's outcome.
    pub async fn fetch(
        &self,
        url: &str,
        headers: &[(String, String)],
        deadline: Instant,
    ) -> Result<FetchResponse, FetchError> {
        let direct_err = match self
            .attempt(FetchTier::Direct, &self.direct, None, url, headers, deadline)
            .await
        {
            Ok(resp) => return Ok(resp),
            // A hard answer is authoritative: the origin responded and the
            // content is simply not there. Relaying cannot change that.
            Err(err) if err.is_hard() => return Err(err),
            Err(err) => err,
        };

        let Some(relay) = &self.relay else {
            return Err(direct_err);
        };

        debug!("direct fetch of {} failed ({}), advancing to relay tier", url, direct_err);

        match relay {
            RelayEgress::Proxy(client) => {
                self.attempt(FetchTier::Relay, client, None, url, headers, deadline)
                    .await
            }
            RelayEgress::Pool(planner) => {
                let Some(addr) = planner.next_address() else {
                    return Err(FetchError::Soft {
                        tier: FetchTier::Relay,
                        status: None,
                        message: "no egress address outside cooldown".to_string(),
                    });
                };
                let client = HttpClient::with_local_address(addr, self.timeout).map_err(|e| {
                    FetchError::Soft {
                        tier: FetchTier::Relay,
                        status: None,
                        message: e.to_string(),
                    }
                })?;
                let result = self
                    .attempt(FetchTier::Relay, &client, Some(addr), url, headers, deadline)
                    .await;
                if let Err(FetchError::Soft { status: None, .. }) = &result {
                    planner.mark_failed(addr);
                }
                result
            }
        }
    }

    async fn attempt(
        &self,
        tier: FetchTier,
        client: &Client,
        bound_addr: Option<IpAddr>,
        url: &str,
        headers: &[(String, String)],
        deadline: Instant,
    ) -> Result<FetchResponse, FetchError> {
        let now = Instant::now();
        if now >= deadline {
            return Err(FetchError::DeadlineExceeded { tier });
        }
        let budget = (deadline - now).min(self.timeout);

        if let Some(addr) = bound_addr {
            debug!("{:?} fetch of {} via egress {}", tier, url, addr);
        }

        let mut request = client.get(url).timeout(budget);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| FetchError::Soft {
            tier,
            status: None,
            message: e.to_string(),
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = response.bytes().await.map_err(|e| FetchError::Soft {
            tier,
            status: Some(status),
            message: e.to_string(),
        })?;

        classify(tier, status, content_type, body)
    }
}

/// Sort a completed exchange into success / hard / soft.
///
/// Hard: the origin answered coherently and there is simply nothing to play.
/// Soft: blocking or broken transport, worth advancing a tier over.
fn classify(
    tier: FetchTier,
    status: u16,
    content_type: Option<String>,
    body: Bytes,
) -> Result<FetchResponse, FetchError> {
    match status {
        401 | 403 | 407 | 429 | 451 => Err(FetchError::Soft {
            tier,
            status: Some(status),
            message: format!("origin blocked the request with status {}", status),
        }),
        s if s >= 500 => Err(FetchError::Soft {
            tier,
            status: Some(status),
            message: format!("origin errored with status {}", status),
        }),
        404 | 410 => Err(FetchError::Hard { tier, status }),
        s if (200..300).contains(&s) => {
            if body.is_empty() {
                Err(FetchError::Hard { tier, status })
            } else {
                Ok(FetchResponse {
                    status,
                    content_type,
                    body,
                    tier,
                })
            }
        }
        s => Err(FetchError::Soft {
            tier,
            status: Some(s),
            message: format!("unexpected status {}", s),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocking_statuses_are_soft() {
        for status in [401u16, 403, 407, 429, 451, 500, 502, 503] {
            let err = classify(FetchTier::Direct, status, None, Bytes::from_static(b"x"))
                .unwrap_err();
            assert!(!err.is_hard(), "status {} must be soft", status);
        }
    }

    #[test]
    fn absent_content_is_hard() {
        let err = classify(FetchTier::Direct, 404, None, Bytes::new()).unwrap_err();
        assert!(err.is_hard());

        let err = classify(FetchTier::Direct, 200, None, Bytes::new()).unwrap_err();
        assert!(err.is_hard());
    }

    #[test]
    fn success_carries_tier_and_body() {
        let resp = classify(
            FetchTier::Relay,
            200,
            Some("application/json".into()),
            Bytes::from_static(b"{}"),
        )
        .unwrap();
        assert_eq!(resp.tier, FetchTier::Relay);
        assert_eq!(resp.status, 200);
        assert_eq!(resp.text(), "{}");
    }
}
