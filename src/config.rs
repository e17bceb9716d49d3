//! Client configuration: signaling endpoint, language pair, VAD tuning,
//! routing windows.
//!
//! Settings load from a TOML file in the platform config dir, with `TOLK_*`
//! environment overrides layered on top by the caller. Every field has a
//! default, so an empty or missing file yields a working config pointed at a
//! local signaling endpoint.

use crate::error::{Error, Result};
use crate::lang::LanguageCode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Server-side voice-activity-detection tuning, forwarded verbatim in the
/// `session.update` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadTuning {
    /// Speech detection threshold in `[0, 1]`. Higher values need louder
    /// speech before a turn opens. Recommended: 0.7–0.85 for a shared desk
    /// microphone in a noisy lobby.
    pub threshold: f32,
    /// Milliseconds of audio kept from before the detected speech onset.
    pub prefix_padding_ms: u32,
    /// Trailing silence before the service closes the utterance. Shorter
    /// values feel snappier but split slow speakers mid-sentence.
    pub silence_duration_ms: u32,
}

impl Default for VadTuning {
    fn default() -> Self {
        Self {
            threshold: 0.77,
            prefix_padding_ms: 300,
            silence_duration_ms: 1000,
        }
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Signaling endpoint receiving the SDP offer. The language pair is
    /// appended as query parameters.
    pub signal_url: String,
    /// Party A's language (the desk side).
    pub party_a: LanguageCode,
    /// Party B's language (the visitor side).
    pub party_b: LanguageCode,
    /// VAD tuning pushed to the service.
    pub vad: VadTuning,
    /// Transcription model requested for user speech.
    pub transcription_model: String,
    /// How long a committed line suppresses identical commits, in ms.
    pub dedup_window_ms: u64,
    /// Drop a pending response with no terminal event after this long, in
    /// ms. 0 disables reaping.
    pub stale_response_timeout_ms: u64,
    /// Capture device name. `None` uses the system default input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_device: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signal_url: "http://127.0.0.1:8080/api/rtc-connect".to_string(),
            party_a: LanguageCode::En,
            party_b: LanguageCode::Ar,
            vad: VadTuning::default(),
            transcription_model: "gpt-4o-mini-transcribe".to_string(),
            dedup_window_ms: 7000,
            stale_response_timeout_ms: 30_000,
            input_device: None,
        }
    }
}

impl Config {
    /// Default config file location for this platform, if one can be
    /// determined.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "tolk")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from the default location. A missing file yields defaults; a
    /// present but unreadable or malformed file is an error.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load from an explicit file path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        let config: Config = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TOLK_SIGNAL_URL`, `TOLK_PARTY_A` and `TOLK_PARTY_B` from the
    /// environment on top of the loaded values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("TOLK_SIGNAL_URL") {
            self.signal_url = url;
        }
        if let Ok(code) = std::env::var("TOLK_PARTY_A") {
            self.party_a =
                LanguageCode::from_str_code(&code).ok_or(Error::UnknownLanguage(code))?;
        }
        if let Ok(code) = std::env::var("TOLK_PARTY_B") {
            self.party_b =
                LanguageCode::from_str_code(&code).ok_or(Error::UnknownLanguage(code))?;
        }
        Ok(())
    }

    /// Reject values the service would misbehave on.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.vad.threshold) {
            return Err(Error::Config(format!(
                "vad.threshold must be within [0, 1], got {}",
                self.vad.threshold
            )));
        }
        if self.vad.silence_duration_ms == 0 {
            return Err(Error::Config(
                "vad.silence_duration_ms must be greater than 0".into(),
            ));
        }
        if self.signal_url.trim().is_empty() {
            return Err(Error::Config("signal_url must not be empty".into()));
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_service_contract() {
        let config = Config::default();
        assert_eq!(config.party_a, LanguageCode::En);
        assert_eq!(config.party_b, LanguageCode::Ar);
        assert_eq!(config.transcription_model, "gpt-4o-mini-transcribe");
        assert_eq!(config.dedup_window_ms, 7000);
        assert_eq!(config.stale_response_timeout_ms, 30_000);
        assert!(config.input_device.is_none());
        assert!((config.vad.threshold - 0.77).abs() < f32::EPSILON);
        assert_eq!(config.vad.prefix_padding_ms, 300);
        assert_eq!(config.vad.silence_duration_ms, 1000);
    }

    #[test]
    fn load_from_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
signal_url = "https://desk.example.com/api/rtc-connect"
party_a = "de"
party_b = "tr"
dedup_window_ms = 5000

[vad]
threshold = 0.8
prefix_padding_ms = 200
silence_duration_ms = 800
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.signal_url, "https://desk.example.com/api/rtc-connect");
        assert_eq!(config.party_a, LanguageCode::De);
        assert_eq!(config.party_b, LanguageCode::Tr);
        assert_eq!(config.dedup_window_ms, 5000);
        assert!((config.vad.threshold - 0.8).abs() < f32::EPSILON);
        assert_eq!(config.vad.silence_duration_ms, 800);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "party_b = \"ja\"").unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.party_b, LanguageCode::Ja);
        assert_eq!(config.party_a, LanguageCode::En);
        assert_eq!(config.dedup_window_ms, 7000);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "party_a = [not toml").unwrap();
        let err = Config::load_from(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn unknown_language_in_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "party_a = \"xx\"").unwrap();
        assert!(Config::load_from(file.path()).is_err());
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let mut config = Config::default();
        config.vad.threshold = 1.5;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn env_override_signal_url() {
        std::env::set_var("TOLK_SIGNAL_URL", "https://override.example.com/rtc");
        let _cleanup = scopeguard::guard((), |_| std::env::remove_var("TOLK_SIGNAL_URL"));

        let mut config = Config::default();
        config.apply_env_overrides().unwrap();
        assert_eq!(config.signal_url, "https://override.example.com/rtc");
    }

    #[test]
    fn env_override_party_b() {
        std::env::set_var("TOLK_PARTY_B", "fr");
        let _cleanup = scopeguard::guard((), |_| std::env::remove_var("TOLK_PARTY_B"));

        let mut config = Config::default();
        config.apply_env_overrides().unwrap();
        assert_eq!(config.party_b, LanguageCode::Fr);
    }

    #[test]
    fn env_override_rejects_unknown_code() {
        std::env::set_var("TOLK_PARTY_A", "klingon");
        let _cleanup = scopeguard::guard((), |_| std::env::remove_var("TOLK_PARTY_A"));

        let mut config = Config::default();
        let err = config.apply_env_overrides().unwrap_err();
        assert!(matches!(err, Error::UnknownLanguage(code) if code == "klingon"));
    }
}
