use serde::{Deserialize, Serialize};

use crate::playlist::SegmentPolicy;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    #[serde(default = "default_true")]
    pub vidcloud: bool,
    #[serde(default = "default_true")]
    pub livearena: bool,
    /// Upper bound on concurrent variant resolution per extraction.
    #[serde(default = "default_max_concurrent_variants")]
    pub max_concurrent_variants: usize,
    #[serde(default = "default_extract_deadline_secs")]
    pub extract_deadline_secs: u64,
    /// Whether media segment URIs are routed through this engine or left
    /// pointing at the origin CDN. Keys are always proxied.
    #[serde(default)]
    pub segment_policy: SegmentPolicy,
    /// Optional headless-rendering collaborator, called once per extraction
    /// as a last resort when no decoder strategy understands a payload.
    pub render_endpoint: Option<String>,
    /// Optional id-translation collaborator (external id -> content id).
    pub metadata_endpoint: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_variants() -> usize {
    4
}

fn default_extract_deadline_secs() -> u64 {
    20
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            vidcloud: true,
            livearena: true,
            max_concurrent_variants: default_max_concurrent_variants(),
            extract_deadline_secs: default_extract_deadline_secs(),
            segment_policy: SegmentPolicy::default(),
            render_endpoint: None,
            metadata_endpoint: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VidcloudConfig {
    #[serde(default = "default_vidcloud_base")]
    pub base_url: String,
}

fn default_vidcloud_base() -> String {
    "https://vidcloud.stream".to_string()
}

impl Default for VidcloudConfig {
    fn default() -> Self {
        Self {
            base_url: default_vidcloud_base(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LivearenaConfig {
    #[serde(default = "default_livearena_base")]
    pub base_url: String,
    /// Host suffix the origin's edge nodes hang off, discovered from the
    /// server-lookup response at extraction time.
    #[serde(default = "default_livearena_edge")]
    pub edge_suffix: String,
}

fn default_livearena_base() -> String {
    "https://livearena.su".to_string()
}

fn default_livearena_edge() -> String {
    "iosplayer.ru".to_string()
}

impl Default for LivearenaConfig {
    fn default() -> Self {
        Self {
            base_url: default_livearena_base(),
            edge_suffix: default_livearena_edge(),
        }
    }
}
