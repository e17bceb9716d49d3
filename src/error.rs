//! Error taxonomy for the interpreter client.
//!
//! Every failure the client surfaces falls into one of these buckets so an
//! embedder can map them onto user-facing messages without string matching.

use thiserror::Error;

/// Errors surfaced by session setup, transport, and configuration.
#[derive(Debug, Error)]
pub enum Error {
    /// The platform refused microphone access.
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable capture device: missing, busy, or an unsupported format.
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The SDP offer/answer exchange failed (non-2xx status, unreachable
    /// endpoint, or an unusable answer).
    #[error("signaling failed: {0}")]
    Signaling(String),

    /// The peer transport failed, during setup or after connect.
    #[error("transport failed: {0}")]
    Transport(String),

    /// A language code outside the supported set.
    #[error("unknown language code: {0:?}")]
    UnknownLanguage(String),

    /// A configuration file or value problem.
    #[error("config error: {0}")]
    Config(String),
}

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_reason() {
        let err = Error::Signaling("endpoint returned HTTP 502".into());
        assert_eq!(err.to_string(), "signaling failed: endpoint returned HTTP 502");
    }

    #[test]
    fn unknown_language_quotes_code() {
        let err = Error::UnknownLanguage("xx".into());
        assert!(err.to_string().contains("\"xx\""));
    }
}
