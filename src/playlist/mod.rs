//! HLS playlist rewriting.
//!
//! Protected sub-resources (encryption keys, nested playlists) are routed
//! back through this engine; media segments follow a policy switch because
//! origin CDNs serve them faster than a proxy hop does. Some origins split
//! long URIs across physical lines to break per-line proxies, so logical
//! URIs are reassembled before any rewriting happens.

use serde::{Deserialize, Serialize};
use url::Url;

/// Whether media segment URIs route through the proxy or stay pointed at
/// the origin CDN. Keys are always proxied regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentPolicy {
    #[default]
    Direct,
    Proxied,
}

pub struct RewriteContext<'a> {
    /// URL the manifest was fetched from; relative URIs resolve against it.
    pub base_url: &'a str,
    /// Externally visible origin of this engine.
    pub proxy_origin: &'a str,
    /// Playback token appended to every rewritten URL.
    pub token: &'a str,
    pub segment_policy: SegmentPolicy,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ResourceClass {
    Manifest,
    Segment,
    Key,
}

/// Rewrite a manifest. Idempotent: URIs already pointing at the proxy are
/// recognized by prefix and left alone.
pub fn rewrite(manifest: &str, ctx: &RewriteContext) -> String {
    let base = Url::parse(ctx.base_url).ok();
    let proxy_prefix = format!("{}/v1/proxy/", ctx.proxy_origin.trim_end_matches('/'));

    let mut out: Vec<String> = Vec::new();
    let mut lines = manifest.lines().peekable();

    while let Some(line) = lines.next() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            out.push(line.to_string());
            continue;
        }
        if trimmed.starts_with('#') {
            out.push(rewrite_tag_line(trimmed, base.as_ref(), &proxy_prefix, ctx));
            continue;
        }

        // A URI line. A line that opens with a scheme may have been split:
        // following lines that are non-empty, non-comment and not
        // themselves scheme-started are continuations, concatenated
        // verbatim.
        let mut uri = trimmed.to_string();
        if starts_with_scheme(trimmed) {
            while let Some(next) = lines.peek() {
                let next_trimmed = next.trim();
                if next_trimmed.is_empty()
                    || next_trimmed.starts_with('#')
                    || starts_with_scheme(next_trimmed)
                {
                    break;
                }
                uri.push_str(next_trimmed);
                lines.next();
            }
        }

        let class = classify_uri(&uri);
        out.push(rewrite_uri(&uri, class, base.as_ref(), &proxy_prefix, ctx));
    }

    let mut result = out.join("\n");
    if manifest.ends_with('\n') {
        result.push('\n');
    }
    result
}

fn starts_with_scheme(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Standalone URI lines are either nested playlists or media segments.
fn classify_uri(uri: &str) -> ResourceClass {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    if path.ends_with(".m3u8") || path.ends_with(".m3u") {
        ResourceClass::Manifest
    } else {
        ResourceClass::Segment
    }
}

fn absolutize(uri: &str, base: Option<&Url>) -> String {
    if starts_with_scheme(uri) {
        return uri.to_string();
    }
    match base.and_then(|b| b.join(uri).ok()) {
        Some(joined) => joined.to_string(),
        None => uri.to_string(),
    }
}

fn rewrite_uri(
    uri: &str,
    class: ResourceClass,
    base: Option<&Url>,
    proxy_prefix: &str,
    ctx: &RewriteContext,
) -> String {
    if uri.starts_with(proxy_prefix) {
        return uri.to_string();
    }
    let absolute = absolutize(uri, base);
    match class {
        ResourceClass::Key => proxied(proxy_prefix, "key", &absolute, ctx.token),
        ResourceClass::Manifest => proxied(proxy_prefix, "manifest", &absolute, ctx.token),
        ResourceClass::Segment => match ctx.segment_policy {
            SegmentPolicy::Direct => absolute,
            SegmentPolicy::Proxied => proxied(proxy_prefix, "segment", &absolute, ctx.token),
        },
    }
}

fn proxied(proxy_prefix: &str, kind: &str, absolute: &str, token: &str) -> String {
    format!(
        "{}{}?url={}&token={}",
        proxy_prefix,
        kind,
        urlencoding::encode(absolute),
        token
    )
}

/// Rewrite `URI="…"` attributes inside the tags that reference protected
/// resources. Unknown tags pass through untouched.
fn rewrite_tag_line(
    line: &str,
    base: Option<&Url>,
    proxy_prefix: &str,
    ctx: &RewriteContext,
) -> String {
    let class = if line.starts_with("#EXT-X-KEY") || line.starts_with("#EXT-X-SESSION-KEY") {
        Some(ResourceClass::Key)
    } else if line.starts_with("#EXT-X-MAP") {
        Some(ResourceClass::Segment)
    } else if line.starts_with("#EXT-X-MEDIA") || line.starts_with("#EXT-X-I-FRAME-STREAM-INF") {
        Some(ResourceClass::Manifest)
    } else {
        None
    };
    let Some(class) = class else {
        return line.to_string();
    };

    let pattern = "URI=\"";
    let mut result = String::with_capacity(line.len());
    let mut remaining = line;

    while let Some(start) = remaining.find(pattern) {
        result.push_str(&remaining[..start + pattern.len()]);
        remaining = &remaining[start + pattern.len()..];

        match remaining.find('"') {
            Some(end) => {
                let uri = &remaining[..end];
                result.push_str(&rewrite_uri(uri, class, base, proxy_prefix, ctx));
                result.push('"');
                remaining = &remaining[end + 1..];
            }
            None => {
                result.push_str(remaining);
                remaining = "";
            }
        }
    }

    result.push_str(remaining);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://cdn.example/path/playlist.m3u8";
    const PROXY: &str = "https://gate.example";

    fn ctx(policy: SegmentPolicy) -> RewriteContext<'static> {
        RewriteContext {
            base_url: BASE,
            proxy_origin: PROXY,
            token: "tok123",
            segment_policy: policy,
        }
    }

    #[test]
    fn key_is_proxied_and_segment_follows_policy() {
        let manifest = "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,URI=\"key/42/99\"\n#EXTINF:4.0,\nseg1.ts\n";

        let direct = rewrite(manifest, &ctx(SegmentPolicy::Direct));
        let expected_key = format!(
            "{}/v1/proxy/key?url={}&token=tok123",
            PROXY,
            urlencoding::encode("https://cdn.example/path/key/42/99")
        );
        assert!(direct.contains(&expected_key), "got: {}", direct);
        assert!(direct.contains("\nhttps://cdn.example/path/seg1.ts\n"));

        let proxied = rewrite(manifest, &ctx(SegmentPolicy::Proxied));
        let expected_seg = format!(
            "{}/v1/proxy/segment?url={}&token=tok123",
            PROXY,
            urlencoding::encode("https://cdn.example/path/seg1.ts")
        );
        assert!(proxied.contains(&expected_seg), "got: {}", proxied);
    }

    #[test]
    fn rewrite_is_idempotent() {
        let manifest = concat!(
            "#EXTM3U\n",
            "#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n",
            "#EXTINF:4.0,\n",
            "https://cdn.example/path/seg1.ts\n",
            "#EXTINF:4.0,\n",
            "seg2.ts\n",
        );
        let once = rewrite(manifest, &ctx(SegmentPolicy::Proxied));
        let twice = rewrite(&once, &ctx(SegmentPolicy::Proxied));
        assert_eq!(once, twice);
    }

    #[test]
    fn split_uri_reassembles_without_loss() {
        // A 300-character URI deliberately split across 3 physical lines.
        let prefix = "https://cdn.example/long/";
        let tail = "x".repeat(300 - prefix.len() - ".ts".len());
        let original = format!("{}{}.ts", prefix, tail);
        assert_eq!(original.len(), 300);

        let (a, rest) = original.split_at(100);
        let (b, c) = rest.split_at(100);
        let manifest = format!("#EXTM3U\n#EXTINF:4.0,\n{}\n{}\n{}\n", a, b, c);

        let rewritten = rewrite(&manifest, &ctx(SegmentPolicy::Proxied));
        let url_param = rewritten
            .lines()
            .find(|l| l.starts_with(&format!("{}/v1/proxy/segment?url=", PROXY)))
            .expect("proxied segment line");
        let encoded = url_param
            .split("url=")
            .nth(1)
            .unwrap()
            .split('&')
            .next()
            .unwrap();
        let decoded = urlencoding::decode(encoded).unwrap();
        assert_eq!(decoded.len(), 300);
        assert_eq!(decoded, original);
    }

    #[test]
    fn relative_line_after_comment_is_not_a_continuation() {
        let manifest = "#EXTM3U\n#EXTINF:4.0,\nseg1.ts\n#EXTINF:4.0,\nseg2.ts\n";
        let rewritten = rewrite(manifest, &ctx(SegmentPolicy::Direct));
        assert!(rewritten.contains("https://cdn.example/path/seg1.ts"));
        assert!(rewritten.contains("https://cdn.example/path/seg2.ts"));
    }

    #[test]
    fn nested_playlists_route_through_manifest_proxy() {
        let manifest = concat!(
            "#EXTM3U\n",
            "#EXT-X-STREAM-INF:BANDWIDTH=2000000,RESOLUTION=1920x1080\n",
            "1080/index.m3u8\n",
        );
        let rewritten = rewrite(manifest, &ctx(SegmentPolicy::Direct));
        let expected = format!(
            "{}/v1/proxy/manifest?url={}&token=tok123",
            PROXY,
            urlencoding::encode("https://cdn.example/path/1080/index.m3u8")
        );
        assert!(rewritten.contains(&expected), "got: {}", rewritten);
    }

    #[test]
    fn media_rendition_uri_attribute_is_rewritten() {
        let manifest =
            "#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",URI=\"audio/en.m3u8\",NAME=\"en\"\n";
        let rewritten = rewrite(manifest, &ctx(SegmentPolicy::Direct));
        assert!(rewritten.contains("/v1/proxy/manifest?url="));
        assert!(rewritten.contains("NAME=\"en\""));
    }

    #[test]
    fn already_proxied_uris_are_left_alone() {
        let manifest = format!(
            "#EXT-X-KEY:METHOD=AES-128,URI=\"{}/v1/proxy/key?url=abc&token=tok123\"\n",
            PROXY
        );
        let rewritten = rewrite(&manifest, &ctx(SegmentPolicy::Direct));
        assert_eq!(rewritten, manifest);
    }
}
