use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Relay tier used when the direct tier is blocked. Absent means the
    /// engine runs direct-only and blocking failures surface immediately.
    pub relay: Option<RelayConfig>,
}

fn default_request_timeout_secs() -> u64 {
    12
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            relay: None,
        }
    }
}

/// Alternate egress for the relay tier: either an HTTP(S) proxy, or a pool
/// of local addresses drawn from CIDR blocks routed to this host.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct RelayConfig {
    pub proxy_url: Option<String>,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
    #[serde(default)]
    pub egress_blocks: Vec<String>,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_cooldown_secs() -> u64 {
    3600
}
