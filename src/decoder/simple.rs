use base64::prelude::*;

use super::{DecodeHints, DecodeStrategy};

/// Pass-through for payloads that are already usable: a bare URL, or a
/// JSON player config. Ordered first so unobfuscated origins cost nothing.
pub struct PlainStrategy;

impl DecodeStrategy for PlainStrategy {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn sniff(&self, payload: &str) -> bool {
        let t = payload.trim();
        t.starts_with("http://")
            || t.starts_with("https://")
            || ((t.starts_with('{') || t.starts_with('['))
                && serde_json::from_str::<serde_json::Value>(t).is_ok())
    }

    fn decode(&self, payload: &str, _hints: &DecodeHints) -> Option<String> {
        Some(payload.trim().to_string())
    }
}

/// Base64 with a per-byte charcode offset, optionally string-reversed
/// before transmission. The offset comes from hints when the provider
/// knows it; otherwise a small window is scanned. Handles one extra
/// base64 layer, which some origins stack on top.
pub struct ShiftedBase64Strategy;

impl DecodeStrategy for ShiftedBase64Strategy {
    fn name(&self) -> &'static str {
        "shifted-base64"
    }

    fn sniff(&self, payload: &str) -> bool {
        is_base64_shape(payload)
    }

    fn decode(&self, payload: &str, hints: &DecodeHints) -> Option<String> {
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();

        let offsets: Vec<i32> = match hints.charcode_offset {
            Some(offset) => vec![offset],
            None => {
                let mut v = vec![0];
                for k in 1..=7 {
                    v.push(k);
                    v.push(-k);
                }
                v
            }
        };

        for reversed in [false, true] {
            let candidate = if reversed {
                reverse_base64(&compact)
            } else {
                compact.clone()
            };
            let Ok(data) = BASE64_STANDARD.decode(candidate.as_bytes()) else {
                continue;
            };
            for &offset in &offsets {
                let shifted: Vec<u8> = data
                    .iter()
                    .map(|b| (*b as i16 - offset as i16).rem_euclid(256) as u8)
                    .collect();
                let Ok(text) = String::from_utf8(shifted) else {
                    continue;
                };
                if text.contains("http") {
                    return Some(text);
                }
                // One more layer of plain base64.
                let inner: String = text.chars().filter(|c| !c.is_whitespace()).collect();
                if is_base64_shape(&inner) {
                    if let Ok(inner_data) = BASE64_STANDARD.decode(inner.as_bytes()) {
                        if let Ok(inner_text) = String::from_utf8(inner_data) {
                            if inner_text.contains("http") {
                                return Some(inner_text);
                            }
                        }
                    }
                }
            }
        }
        None
    }
}

/// Hex-encoded bytes xored with a repeating key. The key is per-provider
/// knowledge and must arrive via hints; without it the strategy stays
/// inert rather than brute-forcing.
pub struct XorHexStrategy;

impl DecodeStrategy for XorHexStrategy {
    fn name(&self) -> &'static str {
        "xor-hex"
    }

    fn sniff(&self, payload: &str) -> bool {
        let t = payload.trim();
        t.len() >= 32 && t.len() % 2 == 0 && t.chars().all(|c| c.is_ascii_hexdigit())
    }

    fn decode(&self, payload: &str, hints: &DecodeHints) -> Option<String> {
        let key = hints.xor_key.as_ref()?;
        if key.is_empty() {
            return None;
        }
        let data = hex::decode(payload.trim()).ok()?;
        let key_bytes = key.as_bytes();
        let plain: Vec<u8> = data
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ key_bytes[i % key_bytes.len()])
            .collect();
        let text = String::from_utf8(plain).ok()?;
        text.contains("http").then_some(text)
    }
}

fn is_base64_shape(s: &str) -> bool {
    let compact: Vec<u8> = s.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    compact.len() >= 24
        && compact.len() % 4 == 0
        && compact
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
}

/// Reverse a base64 string, keeping any `=` padding at the tail where the
/// decoder expects it.
fn reverse_base64(s: &str) -> String {
    let stripped = s.trim_end_matches('=');
    let pad = s.len() - stripped.len();
    let mut out: String = s.chars().rev().skip(pad).collect();
    out.extend(std::iter::repeat_n('=', pad));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_shifted(plain: &str, offset: i32, reversed: bool) -> String {
        let shifted: Vec<u8> = plain
            .bytes()
            .map(|b| (b as i16 + offset as i16).rem_euclid(256) as u8)
            .collect();
        let encoded = BASE64_STANDARD.encode(shifted);
        if reversed {
            reverse_base64(&encoded)
        } else {
            encoded
        }
    }

    fn encode_xor(plain: &str, key: &str) -> String {
        let key_bytes = key.as_bytes();
        let data: Vec<u8> = plain
            .bytes()
            .enumerate()
            .map(|(i, b)| b ^ key_bytes[i % key_bytes.len()])
            .collect();
        hex::encode(data)
    }

    const SAMPLE: &str = r#"{"file":"https://cdn.example/stream/master.m3u8"}"#;

    #[test]
    fn shifted_base64_roundtrip() {
        let strategy = ShiftedBase64Strategy;
        for offset in [0, 3, -4] {
            let payload = encode_shifted(SAMPLE, offset, false);
            assert!(strategy.sniff(&payload));
            assert_eq!(
                strategy.decode(&payload, &DecodeHints::default()).as_deref(),
                Some(SAMPLE),
                "offset {}",
                offset
            );
        }
    }

    #[test]
    fn shifted_base64_reversed_roundtrip() {
        let strategy = ShiftedBase64Strategy;
        let payload = encode_shifted(SAMPLE, 5, true);
        assert_eq!(
            strategy.decode(&payload, &DecodeHints::default()).as_deref(),
            Some(SAMPLE)
        );
    }

    #[test]
    fn shifted_base64_uses_hinted_offset() {
        let strategy = ShiftedBase64Strategy;
        let payload = encode_shifted(SAMPLE, 6, false);
        let hints = DecodeHints {
            charcode_offset: Some(6),
            ..Default::default()
        };
        assert_eq!(strategy.decode(&payload, &hints).as_deref(), Some(SAMPLE));
    }

    #[test]
    fn double_base64_layer() {
        let strategy = ShiftedBase64Strategy;
        let inner = BASE64_STANDARD.encode(SAMPLE);
        let payload = encode_shifted(&inner, 2, false);
        assert_eq!(
            strategy.decode(&payload, &DecodeHints::default()).as_deref(),
            Some(SAMPLE)
        );
    }

    #[test]
    fn xor_hex_roundtrip_with_key() {
        let strategy = XorHexStrategy;
        let payload = encode_xor(SAMPLE, "k9f2");
        assert!(strategy.sniff(&payload));

        let hints = DecodeHints {
            xor_key: Some("k9f2".to_string()),
            ..Default::default()
        };
        assert_eq!(strategy.decode(&payload, &hints).as_deref(), Some(SAMPLE));

        // Without the key the strategy stays inert.
        assert!(strategy.decode(&payload, &DecodeHints::default()).is_none());
    }

    #[test]
    fn plain_accepts_bare_urls_and_json_only() {
        let strategy = PlainStrategy;
        assert!(strategy.sniff("https://cdn.example/x.m3u8"));
        assert!(strategy.sniff(SAMPLE));
        assert!(!strategy.sniff("eval(function(p,a,c,k,e,d){}"));
        assert!(!strategy.sniff("aGVsbG8gd29ybGQhIQ=="));
    }
}
