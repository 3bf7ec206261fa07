/// Dialogue timing and selection settings, loaded from RON or built in code.
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("letters_per_second must be positive, got {0}")]
    InvalidReadingSpeed(f32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueSettings {
    /// Reading speed used for reading-time line durations.
    pub letters_per_second: f32,
    /// Floor for reading-time line durations.
    pub min_text_display_seconds: f32,
    /// Pick the only available reply without waiting for input.
    pub auto_select_single_response: bool,
    /// Order sibling nodes by X instead of Y.
    pub vertical_wiring: bool,
    /// Line length used by networked sessions when audio or sequence length is unknown.
    pub networked_fallback_seconds: f32,
    /// Pause appended to audio-timed lines in networked sessions.
    pub line_audio_silence: f32,
}

impl Default for DialogueSettings {
    fn default() -> Self {
        Self {
            letters_per_second: 25.0,
            min_text_display_seconds: 2.0,
            auto_select_single_response: false,
            vertical_wiring: false,
            networked_fallback_seconds: 0.2,
            line_audio_silence: 0.5,
        }
    }
}

impl DialogueSettings {
    pub fn load_from_ron(path: &Path) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    pub fn parse_ron(input: &str) -> Result<Self, SettingsError> {
        let settings: DialogueSettings = ron::from_str(input)?;
        if settings.letters_per_second <= 0.0 {
            return Err(SettingsError::InvalidReadingSpeed(settings.letters_per_second));
        }
        Ok(settings)
    }

    /// `max(len / letters_per_second, min_text_display_seconds)`.
    pub fn reading_time(&self, text: &str) -> f32 {
        let letters = text.chars().count() as f32;
        (letters / self.letters_per_second).max(self.min_text_display_seconds)
    }
}
