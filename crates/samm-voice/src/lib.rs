//! # Samm Voice - Barge-in Voice Assistant Core
//!
//! Local-microphone voice assistant: record an utterance, transcribe it, generate a reply,
//! and speak the reply while listening for the user to talk over it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     ConversationLoop                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐        │
//! │  │ AudioCapture │→ │     STT      │→ │    Reply     │        │
//! │  │    (cpal)    │  │  (whisper)   │  │ (chat model) │        │
//! │  └──────────────┘  └──────────────┘  └──────────────┘        │
//! │         ↑                 ↑                  ↓                │
//! │         │          ┌──────────────┐  ┌──────────────┐        │
//! │   no interruption  │BargeInPlayer │← │     TTS      │        │
//! │         └──────────│ grace/VAD/   │  └──────────────┘        │
//! │                    │ silence gate │                          │
//! │                    └──────────────┘                          │
//! │              playback (rodio | player process)               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Devices sit behind [`AudioInput`] and [`AudioOutput`]; [`sim`] provides a virtual
//! clock, microphone and speaker so the whole loop runs deterministically offline.

pub mod api;
pub mod archive;
pub mod audio;
pub mod barge_in;
pub mod cancel;
pub mod capture;
pub mod clip;
pub mod clock;
pub mod config;
pub mod conversation;
pub mod error;
pub mod history;
pub mod playback;
pub mod reply;
pub mod session;
pub mod sim;
pub mod stt;
pub mod tts;
pub mod vad;

pub use api::{ApiClient, Service};
pub use archive::{ClipArchive, ClipKind};
pub use audio::{
    list_input_devices, list_output_devices, AudioInput, AudioOutput, CpalInput, MicStream,
    PlaybackHandle, PlaybackState,
};
pub use barge_in::{BargeInConfig, BargeInOutcome, BargeInPlayer, BargeInState, PlayOutcome};
pub use cancel::{install_ctrl_c_handler, CancelFlag};
pub use capture::AudioCapture;
pub use clip::{mean_abs_amplitude, AudioClip, ClipEncoding};
pub use clock::{Clock, MonotonicClock};
pub use config::VoiceConfig;
pub use conversation::{
    is_exit_phrase, Collaborators, ConversationLoop, Devices, EndReason, SessionSummary,
};
pub use error::{VoiceError, VoiceResult};
pub use history::{ConversationHistory, ConversationTurn, Role};
pub use playback::{CommandOutput, RodioOutput};
pub use reply::{
    create_best_reply, reply_or_apology, ChatCompletionsReply, KeywordReply, ReplyGenerator,
    ScriptedReply,
};
pub use session::{SessionEntry, SessionId, SessionStore};
pub use stt::{create_best_stt, transcribe_or_empty, OpenAiStt, ScriptedStt, SpeechTranscriber};
#[cfg(feature = "whisper")]
pub use stt::WhisperStt;
pub use tts::{create_best_tts, synthesize_or_none, OpenAiTts, SilentTts, SpeechSynthesizer};
pub use vad::{detector_from_settings, AmplitudeDetector, VoiceActivityDetector, WebRtcDetector};
