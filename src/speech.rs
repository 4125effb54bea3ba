//! Spoken output.
//!
//! At most one utterance plays at a time: `Speaker::speak` cuts off whatever
//! is playing before starting the new text.

use std::sync::{Mutex, PoisonError};

pub const PREFERRED_LANGUAGE: &str = "ko-KR";
pub const SPEECH_RATE: f32 = 0.55;
pub const SPEECH_VOLUME: f32 = 1.0;

#[derive(Clone, Debug, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub rate: f32,
    pub volume: f32,
    /// `None` means the synthesizer's default voice.
    pub language: Option<String>,
}

/// Platform speech synthesizer.
pub trait Voice: Send {
    fn is_speaking(&self) -> bool;
    /// Cut off the current utterance immediately.
    fn stop_speaking(&mut self);
    fn speak(&mut self, utterance: Utterance);
    /// Whether a voice for `language` is installed.
    fn has_language(&self, language: &str) -> bool;
}

/// Interrupt-then-speak wrapper around a `Voice`.
pub struct Speaker<V: Voice> {
    voice: Mutex<V>,
    language: Option<String>,
}

impl<V: Voice> Speaker<V> {
    pub fn new(voice: V) -> Self {
        let language = if voice.has_language(PREFERRED_LANGUAGE) {
            Some(PREFERRED_LANGUAGE.to_string())
        } else {
            log::warn!(
                "no {} voice installed; falling back to the default voice",
                PREFERRED_LANGUAGE
            );
            None
        };
        Self {
            voice: Mutex::new(voice),
            language,
        }
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn speak(&self, text: &str) {
        let mut voice = self.voice.lock().unwrap_or_else(PoisonError::into_inner);
        if voice.is_speaking() {
            voice.stop_speaking();
        }
        voice.speak(Utterance {
            text: text.to_string(),
            rate: SPEECH_RATE,
            volume: SPEECH_VOLUME,
            language: self.language.clone(),
        });
    }

    /// Run `f` against the underlying voice.
    pub fn with_voice<R>(&self, f: impl FnOnce(&mut V) -> R) -> R {
        let mut voice = self.voice.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut voice)
    }
}

/// Voice for headless deployments: utterances go to the log.
#[derive(Debug, Default)]
pub struct LogVoice {
    spoken: u64,
}

impl LogVoice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spoken(&self) -> u64 {
        self.spoken
    }
}

impl Voice for LogVoice {
    fn is_speaking(&self) -> bool {
        false
    }

    fn stop_speaking(&mut self) {}

    fn speak(&mut self, utterance: Utterance) {
        self.spoken += 1;
        log::info!(
            "speak [{}] {}",
            utterance.language.as_deref().unwrap_or("default"),
            utterance.text
        );
    }

    fn has_language(&self, _language: &str) -> bool {
        true
    }
}
