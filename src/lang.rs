//! Language codes and writing-system detection.
//!
//! The supported set mirrors what the interpreter service accepts. Script
//! detection exists for one purpose: attributing an untagged finished
//! utterance to one of the two session parties. It is a fallback, never the
//! primary routing signal.

use serde::{Deserialize, Serialize};

// ── Language codes ────────────────────────────────────────────────

/// Languages a session party can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageCode {
    // East Asia
    Ko,
    Ja,
    Zh,
    // South Asia
    Hi,
    Ur,
    // Middle East
    Ar,
    // Western Europe
    En,
    Es,
    Fr,
    De,
    It,
    Pt,
    Nl,
    // Nordics
    Sv,
    Da,
    No,
    Fi,
    // Central and Eastern Europe
    Pl,
    Cs,
    Sk,
    Hu,
    Ro,
    Bg,
    El,
    Ru,
    Tr,
}

impl LanguageCode {
    /// ISO 639-1 code, as used on the wire and in config files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ko => "ko",
            Self::Ja => "ja",
            Self::Zh => "zh",
            Self::Hi => "hi",
            Self::Ur => "ur",
            Self::Ar => "ar",
            Self::En => "en",
            Self::Es => "es",
            Self::Fr => "fr",
            Self::De => "de",
            Self::It => "it",
            Self::Pt => "pt",
            Self::Nl => "nl",
            Self::Sv => "sv",
            Self::Da => "da",
            Self::No => "no",
            Self::Fi => "fi",
            Self::Pl => "pl",
            Self::Cs => "cs",
            Self::Sk => "sk",
            Self::Hu => "hu",
            Self::Ro => "ro",
            Self::Bg => "bg",
            Self::El => "el",
            Self::Ru => "ru",
            Self::Tr => "tr",
        }
    }

    /// English display name, used in prompts and transcript headers.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Ko => "Korean",
            Self::Ja => "Japanese",
            Self::Zh => "Chinese",
            Self::Hi => "Hindi",
            Self::Ur => "Urdu",
            Self::Ar => "Arabic",
            Self::En => "English",
            Self::Es => "Spanish",
            Self::Fr => "French",
            Self::De => "German",
            Self::It => "Italian",
            Self::Pt => "Portuguese",
            Self::Nl => "Dutch",
            Self::Sv => "Swedish",
            Self::Da => "Danish",
            Self::No => "Norwegian",
            Self::Fi => "Finnish",
            Self::Pl => "Polish",
            Self::Cs => "Czech",
            Self::Sk => "Slovak",
            Self::Hu => "Hungarian",
            Self::Ro => "Romanian",
            Self::Bg => "Bulgarian",
            Self::El => "Greek",
            Self::Ru => "Russian",
            Self::Tr => "Turkish",
        }
    }

    /// Parse a code like "en" or "AR" (case-insensitive).
    pub fn from_str_code(code: &str) -> Option<Self> {
        match code.to_lowercase().as_str() {
            "ko" => Some(Self::Ko),
            "ja" => Some(Self::Ja),
            "zh" => Some(Self::Zh),
            "hi" => Some(Self::Hi),
            "ur" => Some(Self::Ur),
            "ar" => Some(Self::Ar),
            "en" => Some(Self::En),
            "es" => Some(Self::Es),
            "fr" => Some(Self::Fr),
            "de" => Some(Self::De),
            "it" => Some(Self::It),
            "pt" => Some(Self::Pt),
            "nl" => Some(Self::Nl),
            "sv" => Some(Self::Sv),
            "da" => Some(Self::Da),
            "no" => Some(Self::No),
            "fi" => Some(Self::Fi),
            "pl" => Some(Self::Pl),
            "cs" => Some(Self::Cs),
            "sk" => Some(Self::Sk),
            "hu" => Some(Self::Hu),
            "ro" => Some(Self::Ro),
            "bg" => Some(Self::Bg),
            "el" => Some(Self::El),
            "ru" => Some(Self::Ru),
            "tr" => Some(Self::Tr),
            _ => None,
        }
    }

    /// All supported codes, in display order.
    pub fn all() -> &'static [LanguageCode] {
        &[
            Self::Ko,
            Self::Ja,
            Self::Zh,
            Self::Hi,
            Self::Ur,
            Self::Ar,
            Self::En,
            Self::Es,
            Self::Fr,
            Self::De,
            Self::It,
            Self::Pt,
            Self::Nl,
            Self::Sv,
            Self::Da,
            Self::No,
            Self::Fi,
            Self::Pl,
            Self::Cs,
            Self::Sk,
            Self::Hu,
            Self::Ro,
            Self::Bg,
            Self::El,
            Self::Ru,
            Self::Tr,
        ]
    }
}

// ── Script detection ──────────────────────────────────────────────

/// Writing system detected in a text sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Hangul,
    Kana,
    Cjk,
    Arabic,
    Devanagari,
    Cyrillic,
    Greek,
}

impl Script {
    /// Whether `lang` is normally written in this script.
    ///
    /// Arabic script covers both Arabic and Urdu; Cyrillic covers Russian
    /// and Bulgarian. CJK without kana is treated as Chinese.
    pub fn claims(self, lang: LanguageCode) -> bool {
        matches!(
            (self, lang),
            (Script::Hangul, LanguageCode::Ko)
                | (Script::Kana, LanguageCode::Ja)
                | (Script::Cjk, LanguageCode::Zh)
                | (Script::Arabic, LanguageCode::Ar | LanguageCode::Ur)
                | (Script::Devanagari, LanguageCode::Hi)
                | (Script::Cyrillic, LanguageCode::Ru | LanguageCode::Bg)
                | (Script::Greek, LanguageCode::El)
        )
    }
}

/// Best-effort script detection for a short text sample.
///
/// Counts characters per script range, skipping whitespace and ASCII
/// punctuation. A script wins once it covers more than 20% of the counted
/// characters. Latin text always returns `None`: Latin-script languages
/// cannot be told apart here, so callers fall through to the next routing
/// fallback.
pub fn detect_script(text: &str) -> Option<Script> {
    let mut hangul = 0usize;
    let mut kana = 0usize;
    let mut cjk = 0usize;
    let mut arabic = 0usize;
    let mut devanagari = 0usize;
    let mut cyrillic = 0usize;
    let mut greek = 0usize;
    let mut total = 0usize;

    for c in text.chars() {
        if c.is_whitespace() || c.is_ascii_punctuation() {
            continue;
        }
        total += 1;
        match c as u32 {
            // Hangul syllables, jamo, compatibility jamo
            0xAC00..=0xD7AF | 0x1100..=0x11FF | 0x3130..=0x318F => hangul += 1,
            // Hiragana, katakana, katakana phonetic extensions
            0x3040..=0x309F | 0x30A0..=0x30FF | 0x31F0..=0x31FF => kana += 1,
            // CJK unified ideographs + extension A
            0x4E00..=0x9FFF | 0x3400..=0x4DBF => cjk += 1,
            // Arabic, supplement, extended-A
            0x0600..=0x06FF | 0x0750..=0x077F | 0x08A0..=0x08FF => arabic += 1,
            0x0900..=0x097F => devanagari += 1,
            0x0400..=0x052F => cyrillic += 1,
            0x0370..=0x03FF => greek += 1,
            _ => {}
        }
    }

    if total == 0 {
        return None;
    }
    let threshold = total / 5;

    if hangul > threshold {
        Some(Script::Hangul)
    } else if kana > threshold {
        Some(Script::Kana)
    } else if cjk > threshold && kana == 0 {
        // Ideographs with no kana at all: Chinese, not Japanese
        Some(Script::Cjk)
    } else if arabic > threshold {
        Some(Script::Arabic)
    } else if devanagari > threshold {
        Some(Script::Devanagari)
    } else if cyrillic > threshold {
        Some(Script::Cyrillic)
    } else if greek > threshold {
        Some(Script::Greek)
    } else {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────
