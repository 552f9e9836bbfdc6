//! Error types for the Samm voice assistant

use thiserror::Error;

pub type VoiceResult<T> = Result<T, VoiceError>;

/// Failures of the audio devices and of the collaborator services.
///
/// Collaborator variants (`Stt`, `Tts`, `Reply`) never end a session: the conversation
/// loop folds them into "nothing heard", "skip playback" and the apology respectively.
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("No usable audio device: {0}")]
    AudioDevice(String),

    #[error("Microphone stream failed: {0}")]
    AudioStream(String),

    #[error("Playback failed: {0}")]
    Playback(String),

    #[error("Unusable audio clip: {0}")]
    Clip(String),

    #[error("Voice activity detector setup failed: {0}")]
    VadInit(String),

    #[error("Transcription failed: {0}")]
    Stt(String),

    #[error("Speech synthesis failed: {0}")]
    Tts(String),

    #[error("Reply generation failed: {0}")]
    Reply(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The session was aborted (Ctrl+C).
    #[error("Cancelled")]
    Cancelled,

    #[error("WAV encoding: {0}")]
    Wav(#[from] hound::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

macro_rules! string_error {
    ($($err:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$err> for VoiceError {
                fn from(err: $err) -> Self {
                    VoiceError::$variant(err.to_string())
                }
            }
        )*
    };
}

string_error! {
    cpal::DevicesError => AudioDevice,
    cpal::DefaultStreamConfigError => AudioDevice,
    cpal::BuildStreamError => AudioStream,
    cpal::PlayStreamError => AudioStream,
    config::ConfigError => Config,
}
