//! **Speech-to-Text (STT)**: turn captured clips into text for the conversation loop.
//!
//! Implement [`SpeechTranscriber`] for a remote API or a local model. Callers inside the
//! loop go through [`transcribe_or_empty`], which folds every failure into "nothing heard".

use crate::api::{ApiClient, Service};
use crate::clip::AudioClip;
use crate::config::VoiceConfig;
use crate::error::{VoiceError, VoiceResult};
use reqwest::blocking::multipart::{Form, Part};
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{info, warn};

/// Converts a clip to text. Returns an empty string when nothing intelligible was said.
pub trait SpeechTranscriber: Send + Sync {
    fn transcribe(&self, clip: &AudioClip, language: &str) -> VoiceResult<String>;
}

/// Transcription over an OpenAI-compatible `/audio/transcriptions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiStt {
    api: ApiClient,
    /// whisper-1, gpt-4o-transcribe, ...
    pub model: String,
}

impl OpenAiStt {
    pub fn new(api: ApiClient, model: impl Into<String>) -> Self {
        Self {
            api,
            model: model.into(),
        }
    }

    pub fn from_config(config: &VoiceConfig) -> VoiceResult<Self> {
        let api = ApiClient::from_settings(Service::Stt, &config.services)?;
        Ok(Self::new(api, config.services.stt_model.clone()))
    }
}

impl SpeechTranscriber for OpenAiStt {
    fn transcribe(&self, clip: &AudioClip, language: &str) -> VoiceResult<String> {
        if clip.is_empty() {
            return Ok(String::new());
        }
        let upload = Part::bytes(clip.to_wav_bytes()?)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| self.api.error(e.to_string()))?;
        let mut form = Form::new().part("file", upload).text("model", self.model.clone());
        if !language.is_empty() {
            form = form.text("language", language.to_string());
        }

        let res = self.api.send(self.api.post("audio/transcriptions").multipart(form))?;
        let body: TranscriptionResponse = res
            .json()
            .map_err(|e| self.api.error(format!("bad transcription body: {}", e)))?;
        Ok(body.text.trim().to_string())
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

/// Local transcription with whisper.cpp; built only with the `whisper` feature.
#[cfg(feature = "whisper")]
mod whisper_stt {
    use super::*;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, WhisperState};

    const WHISPER_RATE: u32 = 16_000;

    fn failed(stage: &str, e: impl std::fmt::Display) -> VoiceError {
        VoiceError::Stt(format!("whisper {}: {}", stage, e))
    }

    /// A loaded ggml model (ggml-base.bin, ggml-small.bin, ...) and one decoding state.
    pub struct WhisperStt {
        // The state borrows the model's weights; keep the context alive with it.
        _context: WhisperContext,
        state: Mutex<WhisperState>,
    }

    impl WhisperStt {
        pub fn new(model_path: &str) -> VoiceResult<Self> {
            let context =
                WhisperContext::new_with_params(model_path, WhisperContextParameters::default())
                    .map_err(|e| failed("load", e))?;
            let state = context.create_state().map_err(|e| failed("state", e))?;
            Ok(Self {
                _context: context,
                state: Mutex::new(state),
            })
        }

        /// Load the model named by `WHISPER_MODEL_PATH`.
        pub fn from_env() -> VoiceResult<Self> {
            match std::env::var("WHISPER_MODEL_PATH") {
                Ok(path) if !path.trim().is_empty() => Self::new(path.trim()),
                _ => Err(VoiceError::Config("WHISPER_MODEL_PATH is not set".to_string())),
            }
        }
    }

    impl SpeechTranscriber for WhisperStt {
        fn transcribe(&self, clip: &AudioClip, language: &str) -> VoiceResult<String> {
            if clip.is_empty() {
                return Ok(String::new());
            }
            if clip.sample_rate() != WHISPER_RATE {
                return Err(failed("input", format!("{} Hz clip, need 16 kHz", clip.sample_rate())));
            }
            let samples = clip.samples_f32()?;

            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            params.set_language((!language.is_empty()).then_some(language));
            params.set_no_timestamps(true);
            params.set_print_progress(false);
            params.set_print_realtime(false);

            let mut state = self.state.lock().map_err(|e| failed("lock", e))?;
            state.full(params, &samples).map_err(|e| failed("decode", e))?;
            let segments: Vec<String> = state
                .as_iter()
                .filter_map(|segment| segment.to_str().ok().map(str::to_string))
                .collect();
            Ok(segments.join(" ").trim().to_string())
        }
    }
}

#[cfg(feature = "whisper")]
pub use whisper_stt::WhisperStt;

/// Canned transcriber for offline runs and tests. Each call pops the next scripted result;
/// once the script is exhausted every call returns an empty string.
#[derive(Debug, Default)]
pub struct ScriptedStt {
    script: Mutex<VecDeque<Result<String, String>>>,
    heard: Mutex<Vec<AudioClip>>,
}

impl ScriptedStt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stt = Self::new();
        for t in texts {
            stt.push_text(t);
        }
        stt
    }

    pub fn push_text(&self, text: impl Into<String>) {
        if let Ok(mut q) = self.script.lock() {
            q.push_back(Ok(text.into()));
        }
    }

    /// Queue a service failure.
    pub fn push_failure(&self, message: impl Into<String>) {
        if let Ok(mut q) = self.script.lock() {
            q.push_back(Err(message.into()));
        }
    }

    /// Every clip passed to `transcribe`, in call order.
    pub fn heard(&self) -> Vec<AudioClip> {
        self.heard.lock().map(|h| h.clone()).unwrap_or_default()
    }
}

impl SpeechTranscriber for ScriptedStt {
    fn transcribe(&self, clip: &AudioClip, _language: &str) -> VoiceResult<String> {
        if let Ok(mut h) = self.heard.lock() {
            h.push(clip.clone());
        }
        let next = self.script.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(msg)) => Err(VoiceError::Stt(msg)),
            None => Ok(String::new()),
        }
    }
}

/// Create the best available transcriber.
/// Priority: (1) WhisperStt if `WHISPER_MODEL_PATH` is set and loads (requires the `whisper`
/// feature), (2) OpenAiStt if an API key is set, (3) an empty ScriptedStt.
pub fn create_best_stt(config: &VoiceConfig) -> Box<dyn SpeechTranscriber> {
    #[cfg(feature = "whisper")]
    {
        match WhisperStt::from_env() {
            Ok(w) => {
                info!("🧠 STT: local Whisper");
                return Box::new(w);
            }
            Err(e) => info!("Local Whisper unavailable: {}", e),
        }
    }
    match OpenAiStt::from_config(config) {
        Ok(stt) => {
            info!("🧠 STT: {} ({})", stt.model, stt.api.base_url());
            Box::new(stt)
        }
        Err(e) => {
            warn!("No transcription backend ({}); every utterance will be empty", e);
            Box::new(ScriptedStt::new())
        }
    }
}

/// Transcribe, treating any failure as "nothing intelligible".
pub fn transcribe_or_empty(stt: &dyn SpeechTranscriber, clip: &AudioClip, language: &str) -> String {
    match stt.transcribe(clip, language) {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            warn!("STT failed, treating as silence: {}", e);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip() -> AudioClip {
        AudioClip::from_samples(&[0.0; 480], 16000)
    }

    #[test]
    fn scripted_pops_in_order_then_empty() {
        let stt = ScriptedStt::with_texts(["أبغى أجدد الجواز", "شكراً"]);
        assert_eq!(stt.transcribe(&clip(), "ar").unwrap(), "أبغى أجدد الجواز");
        assert_eq!(stt.transcribe(&clip(), "ar").unwrap(), "شكراً");
        assert_eq!(stt.transcribe(&clip(), "ar").unwrap(), "");
        assert_eq!(stt.heard().len(), 3);
    }

    #[test]
    fn failure_degrades_to_empty() {
        let stt = ScriptedStt::new();
        stt.push_failure("timeout");
        assert!(stt.transcribe(&clip(), "ar").is_err());

        stt.push_failure("timeout");
        assert_eq!(transcribe_or_empty(&stt, &clip(), "ar"), "");
    }

    #[test]
    fn result_is_trimmed() {
        let stt = ScriptedStt::with_texts(["  مرحبا \n"]);
        assert_eq!(transcribe_or_empty(&stt, &clip(), "ar"), "مرحبا");
    }
}
