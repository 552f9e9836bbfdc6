//! Runtime configuration for the assistant.
//!
//! Precedence: environment (`SAMM_<SECTION>__<KEY>`) > TOML file (`SAMM_CONFIG`, default
//! `config/samm.toml`) > built-in defaults. Thresholds and timings are tuning policy, so
//! every one of them can be overridden without a rebuild.

use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config/samm.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub audio: AudioSettings,
    pub barge_in: BargeInSettings,
    pub conversation: ConversationSettings,
    pub services: ServiceSettings,
    pub playback: PlaybackSettings,
    pub archive: ArchiveSettings,
}

/// Microphone capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Sample rate in Hz (default: 16000)
    pub sample_rate: u32,
    /// Samples per polling quantum (default: 512, 32ms at 16kHz)
    pub chunk_size: usize,
    /// Length of a regular (non barge-in) recording in seconds
    pub capture_seconds: f32,
    /// Number of countdown steps before a recording with lead-in
    pub lead_in_steps: u32,
    /// Length of each countdown step
    pub lead_in_step_ms: u64,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            chunk_size: 512,
            capture_seconds: 5.0,
            lead_in_steps: 3,
            lead_in_step_ms: 800,
        }
    }
}

impl AudioSettings {
    pub fn capture_duration(&self) -> Duration {
        Duration::from_secs_f32(self.capture_seconds)
    }

    pub fn lead_in_step(&self) -> Duration {
        Duration::from_millis(self.lead_in_step_ms)
    }
}

/// Which detector classifies microphone chunks as speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Mean absolute amplitude against `threshold`.
    Amplitude,
    /// WebRTC VAD over the 30ms frames of each chunk.
    Webrtc,
}

/// Barge-in policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BargeInSettings {
    /// Mean absolute amplitude above which a chunk counts as speech (default: 0.05)
    pub threshold: f32,
    /// Interruptions are ignored for this long after playback starts (default: 800ms)
    pub grace_ms: u64,
    /// Continuous silence that ends an interrupting capture (default: 500ms)
    pub silence_ms: u64,
    /// Hard cap on an interrupting capture (default: 15s)
    pub max_capture_ms: u64,
    /// How long a terminated player may take to exit before it is killed (default: 500ms)
    pub terminate_timeout_ms: u64,
    pub detector: DetectorKind,
    /// WebRTC aggressiveness, 0-3 (only used with `detector = "webrtc"`)
    pub webrtc_mode: u8,
}

impl Default for BargeInSettings {
    fn default() -> Self {
        Self {
            threshold: 0.05,
            grace_ms: 800,
            silence_ms: 500,
            max_capture_ms: 15_000,
            terminate_timeout_ms: 500,
            detector: DetectorKind::Amplitude,
            webrtc_mode: 2,
        }
    }
}

/// Turn-taking policy and the fixed utterances of the assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationSettings {
    /// Number of history entries kept for reply context (default: 6)
    pub history_cap: usize,
    /// Maximum number of turns in one session (default: 20)
    pub max_turns: u32,
    /// Case-insensitive substrings that end the session
    pub exit_keywords: Vec<String>,
    pub greeting: String,
    pub farewell: String,
    pub retry_prompt: String,
    /// Spoken when reply generation fails
    pub apology: String,
    /// Language hint passed to the transcriber
    pub language: String,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            history_cap: 6,
            max_turns: 20,
            exit_keywords: [
                "توقف", "خروج", "stop", "انهاء", "إنهاء", "شكرا", "شكراً", "شكرًا",
                "مع السلامة", "باي", "bye", "انتهيت", "كفاية",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            greeting: "السلام عليكم! معك سَمّ، مساعدك الشخصي لخدمات أبشر. كيف أقدر أخدمك اليوم؟"
                .to_string(),
            farewell: "العفو يا غالي، الله يسعدك. في أمان الله.".to_string(),
            retry_prompt: "ما سمعت شي واضح. لو تتكلم بصوت أعلى شوي؟".to_string(),
            apology: "عذراً، صار عندي خطأ بسيط. ممكن تعيد طلبك؟".to_string(),
            language: "ar".to_string(),
        }
    }
}

/// OpenAI-compatible service endpoints and models.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Base URL without trailing slash
    pub base_url: String,
    pub stt_model: String,
    pub tts_model: String,
    pub voice: String,
    pub speed: f32,
    pub reply_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub system_prompt: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            stt_model: "whisper-1".to_string(),
            tts_model: "tts-1-hd".to_string(),
            voice: "nova".to_string(),
            speed: 0.95,
            reply_model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 100,
            timeout_secs: 10,
            system_prompt: "أنت سَمّ، مساعد صوتي لخدمات أبشر. ردودك قصيرة وواضحة (جملتين أو ثلاث)، \
                            بلهجة سعودية خفيفة. لا تطلب معلومات حساسة، وذكّر أنك مساعد تدريبي."
                .to_string(),
        }
    }
}

impl ServiceSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Which output device implementation plays synthesized speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackBackend {
    /// In-process rodio sink on the default output device.
    Rodio,
    /// External player process (afplay, aplay, mpg123, ...).
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    pub backend: PlaybackBackend,
    /// Player program for the `command` backend; the clip path is appended to `args`.
    pub command: String,
    pub args: Vec<String>,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        let command = if cfg!(target_os = "macos") { "afplay" } else { "mpg123" };
        Self {
            backend: PlaybackBackend::Rodio,
            command: command.to_string(),
            args: Vec::new(),
        }
    }
}

/// Diagnostics archive of captured and synthesized clips.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("audio_files"),
        }
    }
}

impl VoiceConfig {
    /// Load defaults, then the TOML file named by `SAMM_CONFIG` (if present), then `SAMM_*` env.
    pub fn load() -> VoiceResult<Self> {
        let path = std::env::var("SAMM_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Same as [`VoiceConfig::load`] with an explicit file path.
    pub fn load_from(path: &Path) -> VoiceResult<Self> {
        let defaults = config::Config::try_from(&VoiceConfig::default())?;
        let builder = config::Config::builder().add_source(defaults);

        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix("SAMM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: VoiceConfig = built.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the audio loop cannot run with.
    pub fn validate(&self) -> VoiceResult<()> {
        if self.audio.sample_rate == 0 {
            return Err(VoiceError::Config("audio.sample_rate must be positive".to_string()));
        }
        if self.audio.chunk_size == 0 {
            return Err(VoiceError::Config("audio.chunk_size must be positive".to_string()));
        }
        if !(self.audio.capture_seconds > 0.0) {
            return Err(VoiceError::Config(format!(
                "audio.capture_seconds must be positive, got {}",
                self.audio.capture_seconds
            )));
        }
        if !(self.barge_in.threshold > 0.0 && self.barge_in.threshold <= 1.0) {
            return Err(VoiceError::Config(format!(
                "barge_in.threshold must be in (0, 1], got {}",
                self.barge_in.threshold
            )));
        }
        if self.barge_in.silence_ms == 0 || self.barge_in.max_capture_ms == 0 {
            return Err(VoiceError::Config(
                "barge_in.silence_ms and barge_in.max_capture_ms must be positive".to_string(),
            ));
        }
        if self.barge_in.detector == DetectorKind::Webrtc && self.barge_in.webrtc_mode > 3 {
            return Err(VoiceError::Config(format!(
                "barge_in.webrtc_mode must be 0-3, got {}",
                self.barge_in.webrtc_mode
            )));
        }
        if self.conversation.history_cap == 0 {
            return Err(VoiceError::Config("conversation.history_cap must be positive".to_string()));
        }
        if self.conversation.max_turns == 0 {
            return Err(VoiceError::Config("conversation.max_turns must be positive".to_string()));
        }
        Ok(())
    }
}

/// API key for the OpenAI-compatible services: OPENAI_API_KEY, else the per-service key.
pub fn api_key_from_env(service_var: &str) -> Option<String> {
    std::env::var("OPENAI_API_KEY")
        .or_else(|_| std::env::var(service_var))
        .ok()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
}
