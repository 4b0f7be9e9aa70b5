//! Pluggable payload decoding.
//!
//! Provider config payloads arrive in several generations of obfuscation.
//! Each generation is a [`DecodeStrategy`]; the engine walks them in order
//! and short-circuits on the first output that contains a well-formed URL.
//! Strategies are pure transformations: no third-party code is ever
//! executed, and a payload that would need script execution comes back as
//! [`DecodeError::UnsupportedFormat`] for the caller to hand to the
//! headless-render collaborator if it has one.

pub mod packed;
pub mod simple;

use regex::Regex;
use tracing::{debug, trace};

use crate::common::errors::DecodeError;

/// Optional provider-supplied knowledge about a payload.
#[derive(Debug, Clone, Default)]
pub struct DecodeHints {
    /// Known charcode offset for shifted-base64 payloads; absent means the
    /// strategy scans a small window.
    pub charcode_offset: Option<i32>,
    /// Key for xor-hex payloads. Without it that strategy stays inert.
    pub xor_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub text: String,
    pub algorithm: &'static str,
}

pub trait DecodeStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    /// Cheap byte/charset signature check, run before any transform.
    fn sniff(&self, payload: &str) -> bool;
    fn decode(&self, payload: &str, hints: &DecodeHints) -> Option<String>;
}

pub struct DecoderEngine {
    strategies: Vec<Box<dyn DecodeStrategy>>,
    url_re: Regex,
}

impl DecoderEngine {
    pub fn new() -> Self {
        // Order matters: the cheap pass-through first, then the dictionary
        // interpreter, then the byte-level transforms.
        let strategies: Vec<Box<dyn DecodeStrategy>> = vec![
            Box::new(simple::PlainStrategy),
            Box::new(packed::PackedDictStrategy::new()),
            Box::new(simple::ShiftedBase64Strategy),
            Box::new(simple::XorHexStrategy),
        ];
        Self {
            strategies,
            url_re: Regex::new(r#"https?://[^\s'"<>\\]+"#).expect("static regex"),
        }
    }

    pub fn decode(&self, payload: &str, hints: &DecodeHints) -> Result<Decoded, DecodeError> {
        for strategy in &self.strategies {
            if !strategy.sniff(payload) {
                continue;
            }
            trace!("trying decode strategy {}", strategy.name());
            if let Some(text) = strategy.decode(payload, hints) {
                if self.looks_playable(&text) {
                    debug!("decoded payload with strategy {}", strategy.name());
                    return Ok(Decoded {
                        text,
                        algorithm: strategy.name(),
                    });
                }
            }
        }
        Err(DecodeError::UnsupportedFormat)
    }

    /// Structural validity: the output must contain at least one
    /// well-formed http(s) URL.
    fn looks_playable(&self, text: &str) -> bool {
        self.url_re
            .find_iter(text)
            .any(|m| url::Url::parse(m.as_str()).is_ok())
    }
}

impl Default for DecoderEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_is_unsupported() {
        let engine = DecoderEngine::new();
        let err = engine
            .decode("not a payload at all", &DecodeHints::default())
            .unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat));
    }

    #[test]
    fn script_only_payload_is_unsupported() {
        // A payload that genuinely needs script execution: nothing static
        // to substitute, no recognizable encoding.
        let engine = DecoderEngine::new();
        let payload = "var a=window.x();document.write(a(makeUrl()));";
        assert!(engine.decode(payload, &DecodeHints::default()).is_err());
    }

    #[test]
    fn plain_json_config_short_circuits() {
        let engine = DecoderEngine::new();
        let payload = r#"{"sources":[{"file":"https://cdn.example/x.m3u8","label":"1080p"}]}"#;
        let decoded = engine.decode(payload, &DecodeHints::default()).unwrap();
        assert_eq!(decoded.algorithm, "plain");
        assert_eq!(decoded.text, payload);
    }

    #[test]
    fn reports_the_algorithm_used() {
        let engine = DecoderEngine::new();
        let packed = packed::tests_support::pack(
            r#"{"a":"https://cdn.example/x.m3u8"}"#,
            &["https://cdn.example/x.m3u8"],
        );
        let decoded = engine.decode(&packed, &DecodeHints::default()).unwrap();
        assert_eq!(decoded.algorithm, "packed-dict");
    }
}
