use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TokenConfig {
    /// HMAC signing secret for playback tokens. A random secret is
    /// generated at startup when unset, which invalidates tokens across
    /// restarts; set it explicitly when load-balancing.
    pub signing_secret: Option<String>,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_ttl_secs() -> u64 {
    300
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            signing_secret: None,
            ttl_secs: default_ttl_secs(),
        }
    }
}
