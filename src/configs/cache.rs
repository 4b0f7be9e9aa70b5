use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_descriptor_ttl_secs")]
    pub descriptor_ttl_secs: u64,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// How long past its TTL a cached descriptor may still be served when a
    /// recompute fails with a transient error.
    #[serde(default = "default_stale_serve_secs")]
    pub stale_serve_secs: u64,
}

fn default_descriptor_ttl_secs() -> u64 {
    1800
}

fn default_capacity() -> usize {
    512
}

fn default_stale_serve_secs() -> u64 {
    90
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            descriptor_ttl_secs: default_descriptor_ttl_secs(),
            capacity: default_capacity(),
            stale_serve_secs: default_stale_serve_secs(),
        }
    }
}
