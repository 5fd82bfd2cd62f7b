//! Reply language selection.
//!
//! [`LanguageSelector`] never fails: any detection error maps to the
//! configured default code.

use std::sync::Arc;

use tracing::debug;

use crate::error::DetectionError;

/// Fallback language when detection fails.
pub const DEFAULT_LANGUAGE: &str = "es";

/// Text → language code (`en`, `es`, ...).
pub trait LanguageDetector: Send + Sync {
    fn detect(&self, text: &str) -> Result<String, DetectionError>;
}

/// Wraps a detector with the silent fallback policy.
#[derive(Clone)]
pub struct LanguageSelector {
    detector: Arc<dyn LanguageDetector>,
    default: String,
}

impl LanguageSelector {
    pub fn new(detector: Arc<dyn LanguageDetector>, default: impl Into<String>) -> Self {
        Self {
            detector,
            default: default.into(),
        }
    }

    /// Best-effort language code for `text`.
    pub fn detect(&self, text: &str) -> String {
        match self.detector.detect(text) {
            Ok(code) => code,
            Err(e) => {
                debug!(error = %e, default = %self.default, "Language detection failed, using default");
                self.default.clone()
            }
        }
    }

    pub fn default_code(&self) -> &str {
        &self.default
    }
}

// ── Statistical detector ────────────────────────────────────────────

/// Trigram-based detector backed by `whatlang`.
///
/// Always answers with its best guess, like the detector the support team
/// used before; only text without any usable letters is undetermined.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhatlangDetector;

impl WhatlangDetector {
    pub fn new() -> Self {
        Self
    }
}

impl LanguageDetector for WhatlangDetector {
    fn detect(&self, text: &str) -> Result<String, DetectionError> {
        let info = whatlang::detect(text).ok_or(DetectionError::Undetermined {
            chars: text.chars().count(),
        })?;
        debug!(
            lang = info.lang().code(),
            confidence = info.confidence(),
            reliable = info.is_reliable(),
            "Detected language"
        );
        Ok(iso_639_1(info.lang()).to_string())
    }
}

/// Two-letter code where one exists for the languages seen in practice;
/// whatlang's three-letter code otherwise.
fn iso_639_1(lang: whatlang::Lang) -> &'static str {
    use whatlang::Lang;
    match lang {
        Lang::Eng => "en",
        Lang::Spa => "es",
        Lang::Por => "pt",
        Lang::Fra => "fr",
        Lang::Deu => "de",
        Lang::Ita => "it",
        Lang::Nld => "nl",
        Lang::Cat => "ca",
        other => other.code(),
    }
}
