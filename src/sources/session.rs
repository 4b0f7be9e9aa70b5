use std::collections::HashMap;

use tokio::time::Instant;
use url::Url;

use crate::common::errors::{ExtractionError, Stage};

/// Ephemeral per-request extraction state. Owned by exactly one extraction
/// invocation and discarded when it completes.
pub struct ExtractionSession {
  /// The original entry URL. Pinned for the lifetime of the session: every
  /// subsequent hop sends it as Referer/Origin. Sending the preceding
  /// hop's URL instead makes the origin reject the request.
  pub entry_url: String,
  pub deadline: Instant,
  /// Hop trail, entry first. Diagnostic only.
  pub hops: Vec<String>,
  /// Values collected along the chain (channel keys, lookup paths).
  pub vars: HashMap<String, String>,
}

impl ExtractionSession {
  pub fn new(entry_url: String, deadline: Instant) -> Self {
    Self {
      entry_url,
      deadline,
      hops: Vec::new(),
      vars: HashMap::new(),
    }
  }

  /// Headers for every hop after the entry fetch.
  pub fn referer_headers(&self) -> Vec<(String, String)> {
    let mut headers = vec![("Referer".to_string(), self.entry_url.clone())];
    if let Ok(parsed) = Url::parse(&self.entry_url) {
      if let Some(host) = parsed.host_str() {
        headers.push((
          "Origin".to_string(),
          format!("{}://{}", parsed.scheme(), host),
        ));
      }
    }
    headers
  }

  /// Cooperative cancellation: checked between network calls so a
  /// disconnected client doesn't leave the chain running to completion.
  pub fn check_deadline(&self, stage: Stage) -> Result<(), ExtractionError> {
    if Instant::now() >= self.deadline {
      Err(ExtractionError::Failed {
        stage,
        cause: "deadline exceeded".to_string(),
      })
    } else {
      Ok(())
    }
  }

  pub fn record_hop(&mut self, url: &str) {
    self.hops.push(url.to_string());
  }

  pub fn current_url(&self) -> &str {
    self.hops.last().map(String::as_str).unwrap_or(&self.entry_url)
  }
}
