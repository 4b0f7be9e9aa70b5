use regex::Regex;

use super::{DecodeHints, DecodeStrategy};

/// Generic interpreter for the `eval(function(p,a,c,k,e,d)...)` packer
/// family: a payload whose word tokens are radix-encoded indices into a
/// `|`-separated dictionary. One substitution pass recovers the original
/// text; no per-site tables, no script execution.
pub struct PackedDictStrategy {
    call_re: Regex,
    token_re: Regex,
}

impl PackedDictStrategy {
    pub fn new() -> Self {
        Self {
            // Matches the packer invocation tail:
            //   }('payload',radix,count,'dict'.split('|')...
            call_re: Regex::new(
                r"\}\s*\(\s*'((?:[^'\\]|\\.)*)'\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*'((?:[^'\\]|\\.)*)'\s*\.split\('\|'\)",
            )
            .expect("static regex"),
            token_re: Regex::new(r"\b\w+\b").expect("static regex"),
        }
    }
}

impl Default for PackedDictStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeStrategy for PackedDictStrategy {
    fn name(&self) -> &'static str {
        "packed-dict"
    }

    fn sniff(&self, payload: &str) -> bool {
        payload.contains("p,a,c,k,e")
    }

    fn decode(&self, payload: &str, _hints: &DecodeHints) -> Option<String> {
        let caps = self.call_re.captures(payload)?;
        let packed = unescape_js(&caps[1]);
        let radix: u32 = caps[2].parse().ok()?;
        let count: usize = caps[3].parse().ok()?;
        let dict_raw = unescape_js(&caps[4]);

        if !(2..=62).contains(&radix) {
            return None;
        }

        let words: Vec<&str> = dict_raw.split('|').collect();
        // Packers emit exactly `count` words; tolerate a short dictionary
        // but never index past it.
        let _ = count;

        let out = self.token_re.replace_all(&packed, |c: &regex::Captures| {
            let token = &c[0];
            match decode_radix(token, radix) {
                Some(idx) if idx < words.len() && !words[idx].is_empty() => {
                    words[idx].to_string()
                }
                _ => token.to_string(),
            }
        });
        Some(out.into_owned())
    }
}

/// Digit alphabet used by the packer's radix encoding: 0-9, then a-z, then
/// A-Z for radices above 36.
fn decode_radix(token: &str, radix: u32) -> Option<usize> {
    let mut value: usize = 0;
    for ch in token.chars() {
        let digit = match ch {
            '0'..='9' => ch as u32 - '0' as u32,
            'a'..='z' => ch as u32 - 'a' as u32 + 10,
            'A'..='Z' => ch as u32 - 'A' as u32 + 36,
            _ => return None,
        };
        if digit >= radix {
            return None;
        }
        value = value
            .checked_mul(radix as usize)?
            .checked_add(digit as usize)?;
    }
    Some(value)
}

/// Undo JS single-quoted-string escapes in the captured literals.
fn unescape_js(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}
