//! **Text-to-Speech (TTS)**: assistant text to playable clips.

use crate::api::{ApiClient, Service};
use crate::clip::{AudioClip, ClipEncoding};
use crate::config::VoiceConfig;
use crate::error::{VoiceError, VoiceResult};
use serde::Serialize;
use tracing::{info, warn};

/// Backend that turns text into an encoded clip.
pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize(&self, text: &str, voice: &str, speed: f32) -> VoiceResult<AudioClip>;
}

/// Speech from an OpenAI-compatible `/audio/speech` endpoint, returned as mp3.
#[derive(Debug, Clone)]
pub struct OpenAiTts {
    api: ApiClient,
    /// tts-1 is faster, tts-1-hd sounds better.
    pub model: String,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'static str,
}

impl OpenAiTts {
    /// Sample rate of the service's mp3 output.
    const OUTPUT_RATE: u32 = 24_000;

    pub fn new(api: ApiClient, model: impl Into<String>) -> Self {
        Self {
            api,
            model: model.into(),
        }
    }

    pub fn from_config(config: &VoiceConfig) -> VoiceResult<Self> {
        let api = ApiClient::from_settings(Service::Tts, &config.services)?;
        Ok(Self::new(api, config.services.tts_model.clone()))
    }
}

impl SpeechSynthesizer for OpenAiTts {
    fn synthesize(&self, text: &str, voice: &str, speed: f32) -> VoiceResult<AudioClip> {
        let text = text.trim();
        if text.is_empty() {
            return Err(VoiceError::Tts("nothing to synthesize".to_string()));
        }
        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice,
            speed,
            response_format: "mp3",
        };
        let res = self.api.send(self.api.post("audio/speech").json(&request))?;
        let mp3 = res
            .bytes()
            .map_err(|e| self.api.error(format!("reading audio: {}", e)))?;
        if mp3.is_empty() {
            return Err(self.api.error("empty audio body"));
        }
        Ok(AudioClip::encoded(mp3.to_vec(), ClipEncoding::Mp3, Self::OUTPUT_RATE, 1))
    }
}

/// Offline synthesizer: silence whose length follows the text, so playback timing is
/// still realistic without a TTS service.
#[derive(Debug, Clone)]
pub struct SilentTts {
    sample_rate: u32,
}

impl SilentTts {
    const PER_CHAR_MS: u64 = 60;
    const MIN_MS: u64 = 500;
    const MAX_MS: u64 = 8000;

    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

impl Default for SilentTts {
    fn default() -> Self {
        Self::new(16000)
    }
}

impl SpeechSynthesizer for SilentTts {
    fn synthesize(&self, text: &str, _voice: &str, speed: f32) -> VoiceResult<AudioClip> {
        let chars = text.trim().chars().count() as u64;
        if chars == 0 {
            return Err(VoiceError::Tts("nothing to synthesize".to_string()));
        }
        let speed = if speed > 0.0 { speed } else { 1.0 };
        let ms = ((chars * Self::PER_CHAR_MS) as f32 / speed) as u64;
        let ms = ms.clamp(Self::MIN_MS, Self::MAX_MS);
        let samples = (self.sample_rate as u64 * ms / 1000) as usize;
        Ok(AudioClip::from_pcm16(&vec![0i16; samples], self.sample_rate))
    }
}

/// Pick OpenAiTts when an API key is configured, SilentTts otherwise.
pub fn create_best_tts(config: &VoiceConfig) -> Box<dyn SpeechSynthesizer> {
    match OpenAiTts::from_config(config) {
        Ok(tts) => {
            info!("🗣️ TTS: {} ({})", tts.model, tts.api.base_url());
            Box::new(tts)
        }
        Err(e) => {
            warn!("No TTS backend ({}); replies will be silent", e);
            Box::new(SilentTts::new(config.audio.sample_rate))
        }
    }
}

/// Synthesize, or `None` when the service fails. Callers skip playback on `None`.
pub fn synthesize_or_none(
    tts: &dyn SpeechSynthesizer,
    text: &str,
    voice: &str,
    speed: f32,
) -> Option<AudioClip> {
    match tts.synthesize(text, voice, speed) {
        Ok(clip) if !clip.is_empty() => Some(clip),
        Ok(_) => {
            warn!("TTS returned an empty clip, skipping playback");
            None
        }
        Err(e) => {
            warn!("TTS failed, skipping playback: {}", e);
            None
        }
    }
}
