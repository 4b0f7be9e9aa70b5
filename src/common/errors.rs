use serde::Serialize;

use crate::common::types::now_ms;

/// Which extraction stage a failure happened in. Carried on every
/// [`ExtractionError`] so callers can tell "origin offline" apart from
/// "our decoder is stale".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Entry,
    Hop,
    Decode,
    Auth,
}

/// Coarse classification exposed to callers for rendering. The machine
/// `stage` stays alongside it for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Offline,
    Blocked,
    Unsupported,
    Unknown,
}

/// Which network tier a fetch attempt ran on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchTier {
    Direct,
    Relay,
}

/// Failure of a tiered origin fetch.
///
/// `Hard` means the origin was reachable and answered with a well-formed
/// envelope that simply carries no content (the stream is not live, the id
/// does not exist). `Soft` covers transport failures, malformed envelopes
/// and blocking status codes; soft failures on the direct tier advance to
/// the relay tier.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("origin answered with no usable content (status {status}, {tier:?} tier)")]
    Hard { tier: FetchTier, status: u16 },
    #[error("{tier:?} tier failed: {message}")]
    Soft {
        tier: FetchTier,
        status: Option<u16>,
        message: String,
    },
    #[error("deadline exceeded before {tier:?} fetch")]
    DeadlineExceeded { tier: FetchTier },
}

impl FetchError {
    pub fn is_hard(&self) -> bool {
        matches!(self, Self::Hard { .. })
    }

    pub fn tier(&self) -> FetchTier {
        match self {
            Self::Hard { tier, .. }
            | Self::Soft { tier, .. }
            | Self::DeadlineExceeded { tier } => *tier,
        }
    }
}

/// The decoder engine ran out of strategies.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DecodeError {
    #[error("no decoder strategy produced a playable URL")]
    UnsupportedFormat,
}

/// The proof-of-work search hit its iteration cap without finding a nonce.
#[derive(Debug, Clone, thiserror::Error)]
#[error("proof-of-work search exhausted after {iterations} iterations")]
pub struct PowExhausted {
    pub iterations: u32,
}

/// Why a playback token was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenReason {
    Malformed,
    BadSignature,
    Expired,
    FingerprintMismatch,
    Replayed,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("token rejected: {reason:?}")]
pub struct TokenInvalid {
    pub reason: TokenReason,
}

/// Failure of a provider extraction, tagged with the stage it died in.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExtractionError {
    #[error("provider '{0}' is not registered")]
    UnknownProvider(String),
    #[error("content is offline at the origin ({stage:?} stage)")]
    ProviderOffline { stage: Stage },
    #[error("origin unreachable at {stage:?} stage: {cause}")]
    ProviderUnreachable { stage: Stage, cause: String },
    #[error("unsupported payload format at {stage:?} stage")]
    Unsupported { stage: Stage },
    #[error("{stage:?} stage failed: {cause}")]
    Failed { stage: Stage, cause: String },
}

impl ExtractionError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::UnknownProvider(_) => None,
            Self::ProviderOffline { stage }
            | Self::ProviderUnreachable { stage, .. }
            | Self::Unsupported { stage }
            | Self::Failed { stage, .. } => Some(*stage),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ProviderOffline { .. } => ErrorKind::Offline,
            Self::ProviderUnreachable { .. } => ErrorKind::Blocked,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::UnknownProvider(_) | Self::Failed { .. } => ErrorKind::Unknown,
        }
    }

    /// Lift a fetch failure into an extraction failure at the given stage.
    pub fn from_fetch(stage: Stage, err: &FetchError) -> Self {
        if err.is_hard() {
            Self::ProviderOffline { stage }
        } else {
            Self::ProviderUnreachable {
                stage,
                cause: err.to_string(),
            }
        }
    }

    /// Whether a cached value may be served in place of this failure.
    /// Hard "offline" answers are authoritative; everything else is
    /// transient enough for bounded-staleness serving.
    pub fn stale_serve_ok(&self) -> bool {
        !matches!(self, Self::ProviderOffline { .. })
    }
}

/// JSON error envelope returned by the HTTP API.
///
/// Raw upstream response bodies and secret material never end up in
/// `message`; the `kind`/`stage` pair is all a caller gets.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    /// HTTP status code.
    pub status: u16,
    /// HTTP status reason phrase (e.g. "Bad Request").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
    /// The request path that caused the error.
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
}

impl ApiError {
    fn new(status: u16, error: &str, message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            timestamp: now_ms(),
            status,
            error: error.to_string(),
            message: message.into(),
            path: path.into(),
            kind: None,
            stage: None,
        }
    }

    pub fn bad_request(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(400, "Bad Request", message, path)
    }

    pub fn forbidden(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(403, "Forbidden", message, path)
    }

    pub fn bad_gateway(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(502, "Bad Gateway", message, path)
    }

    pub fn service_unavailable(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(503, "Service Unavailable", message, path)
    }

    pub fn unprocessable(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(422, "Unprocessable Entity", message, path)
    }

    pub fn internal(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(500, "Internal Server Error", message, path)
    }

    pub fn from_extraction(err: &ExtractionError, path: impl Into<String>) -> Self {
        let mut out = match err.kind() {
            ErrorKind::Offline => Self::service_unavailable(err.to_string(), path),
            ErrorKind::Blocked => Self::bad_gateway(err.to_string(), path),
            ErrorKind::Unsupported => Self::unprocessable(err.to_string(), path),
            ErrorKind::Unknown => match err {
                ExtractionError::UnknownProvider(_) => Self::new(
                    400,
                    "Bad Request",
                    err.to_string(),
                    path,
                ),
                _ => Self::internal(err.to_string(), path),
            },
        };
        out.kind = Some(err.kind());
        out.stage = err.stage();
        out
    }

    pub fn from_token(err: &TokenInvalid, path: impl Into<String>) -> Self {
        Self::forbidden(err.to_string(), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_error_kinds_map_to_statuses() {
        let offline = ExtractionError::ProviderOffline { stage: Stage::Entry };
        assert_eq!(ApiError::from_extraction(&offline, "/v1/extract").status, 503);

        let blocked = ExtractionError::ProviderUnreachable {
            stage: Stage::Hop,
            cause: "tcp reset".into(),
        };
        assert_eq!(ApiError::from_extraction(&blocked, "/v1/extract").status, 502);

        let unsupported = ExtractionError::Unsupported { stage: Stage::Decode };
        let api = ApiError::from_extraction(&unsupported, "/v1/extract");
        assert_eq!(api.status, 422);
        assert_eq!(api.kind, Some(ErrorKind::Unsupported));
        assert_eq!(api.stage, Some(Stage::Decode));
    }

    #[test]
    fn hard_fetch_errors_become_offline() {
        let err = FetchError::Hard {
            tier: FetchTier::Direct,
            status: 404,
        };
        let ex = ExtractionError::from_fetch(Stage::Entry, &err);
        assert!(matches!(ex, ExtractionError::ProviderOffline { .. }));
        assert!(!ex.stale_serve_ok());

        let soft = FetchError::Soft {
            tier: FetchTier::Relay,
            status: Some(403),
            message: "blocked".into(),
        };
        let ex = ExtractionError::from_fetch(Stage::Hop, &soft);
        assert!(matches!(ex, ExtractionError::ProviderUnreachable { .. }));
        assert!(ex.stale_serve_ok());
    }
}
