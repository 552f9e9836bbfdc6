//! **BargeInPlayer**: play a reply while listening for the user to talk over it.
//!
//! ```text
//!   Idle ──start──▶ Playing ──clip ends──────────────▶ NaturallyFinished
//!                      │
//!                      │ active chunk after the grace period
//!                      ▼
//!                 Interrupting ──terminate playback──▶ Capturing
//!                                                          │
//!                          trailing silence / max length   │   stream lost
//!                      CaptureComplete ◀───────────────────┴──────────▶ CaptureAbandoned
//! ```
//!
//! One controlling thread runs the whole loop: every iteration blocks on one microphone
//! chunk (the polling quantum), then checks playback liveness and voice activity. All
//! timing decisions use elapsed time from a monotonic [`Clock`].

use crate::archive::{ClipArchive, ClipKind};
use crate::audio::{AudioInput, AudioOutput, MicStream, PlaybackHandle};
use crate::cancel::CancelFlag;
use crate::clip::AudioClip;
use crate::clock::Clock;
use crate::config::VoiceConfig;
use crate::error::VoiceResult;
use crate::stt::{transcribe_or_empty, SpeechTranscriber};
use crate::vad::VoiceActivityDetector;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timing policy for one player.
#[derive(Debug, Clone)]
pub struct BargeInConfig {
    /// Interruptions are ignored while playback has been running for less than this.
    pub grace: Duration,
    /// Continuous silence that ends a capture.
    pub silence: Duration,
    /// Upper bound on one capture, measured from the interruption.
    pub max_capture: Duration,
    /// How long terminated playback may take to stop before it is forced.
    pub terminate_timeout: Duration,
    pub sample_rate: u32,
    pub chunk_size: usize,
    /// Language hint for transcribing the interruption.
    pub language: String,
}

impl BargeInConfig {
    pub fn from_config(config: &VoiceConfig) -> Self {
        let b = &config.barge_in;
        Self {
            grace: Duration::from_millis(b.grace_ms),
            silence: Duration::from_millis(b.silence_ms),
            max_capture: Duration::from_millis(b.max_capture_ms),
            terminate_timeout: Duration::from_millis(b.terminate_timeout_ms),
            sample_rate: config.audio.sample_rate,
            chunk_size: config.audio.chunk_size,
            language: config.conversation.language.clone(),
        }
    }
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self::from_config(&VoiceConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BargeInState {
    Idle,
    Playing,
    NaturallyFinished,
    Interrupting,
    Capturing,
    CaptureComplete,
    CaptureAbandoned,
}

/// Audio collected since the interruption.
struct CaptureSession {
    chunks: Vec<Vec<f32>>,
    started_at: Duration,
    /// Start of the current run of silent chunks, if the last chunk was silent.
    silence_started: Option<Duration>,
}

/// Result of [`BargeInPlayer::play`]. Times are measured from playback start.
#[derive(Debug, Clone)]
pub enum PlayOutcome {
    NaturallyFinished,
    Captured {
        clip: AudioClip,
        interrupted_at: Duration,
        ended_at: Duration,
    },
    /// Playback was interrupted but the microphone stream failed mid-capture.
    Abandoned { interrupted_at: Duration },
    Cancelled,
}

/// Result of [`BargeInPlayer::speak_with_barge_in`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BargeInOutcome {
    NotInterrupted,
    /// Playback was cut short. `text` is empty when nothing intelligible was captured.
    Interrupted { text: String },
    Cancelled,
}

impl BargeInOutcome {
    /// The interrupting utterance, if there was a usable one.
    pub fn text(&self) -> Option<&str> {
        match self {
            BargeInOutcome::Interrupted { text } if !text.is_empty() => Some(text),
            _ => None,
        }
    }
}

pub struct BargeInPlayer {
    config: BargeInConfig,
    detector: Box<dyn VoiceActivityDetector>,
    clock: Arc<dyn Clock>,
    cancel: CancelFlag,
    archive: Option<ClipArchive>,
    transitions: Vec<BargeInState>,
}

impl BargeInPlayer {
    pub fn new(
        config: BargeInConfig,
        detector: Box<dyn VoiceActivityDetector>,
        clock: Arc<dyn Clock>,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            config,
            detector,
            clock,
            cancel,
            archive: None,
            transitions: vec![BargeInState::Idle],
        }
    }

    /// Persist interrupting captures.
    pub fn with_archive(mut self, archive: Option<ClipArchive>) -> Self {
        self.archive = archive;
        self
    }

    pub fn config(&self) -> &BargeInConfig {
        &self.config
    }

    pub fn state(&self) -> BargeInState {
        self.transitions.last().copied().unwrap_or(BargeInState::Idle)
    }

    /// States visited by the most recent call, starting with `Idle`.
    pub fn transitions(&self) -> &[BargeInState] {
        &self.transitions
    }

    fn enter(&mut self, state: BargeInState) {
        debug!("Barge-in state: {:?} → {:?}", self.state(), state);
        self.transitions.push(state);
    }

    /// Play `clip` on `output` while monitoring `input`; on interruption, stop playback and
    /// capture the interrupting speech until trailing silence.
    ///
    /// Fails only if playback cannot be started. A microphone that cannot be opened or that
    /// fails before any interruption degrades to plain playback.
    pub fn play(
        &mut self,
        clip: &AudioClip,
        input: &dyn AudioInput,
        output: &dyn AudioOutput,
    ) -> VoiceResult<PlayOutcome> {
        self.transitions.clear();
        self.transitions.push(BargeInState::Idle);

        let mut playback = output.start(clip)?;
        let start = self.clock.now();
        self.enter(BargeInState::Playing);

        let mut mic = match input.open(self.config.sample_rate, self.config.chunk_size) {
            Ok(mic) => mic,
            Err(e) => {
                warn!("Microphone unavailable, playing without barge-in: {}", e);
                return Ok(self.wait_for_natural_end(playback.as_mut()));
            }
        };

        loop {
            if self.cancel.is_cancelled() {
                return Ok(self.cancel_playback(playback.as_mut()));
            }
            if playback.is_finished() {
                self.enter(BargeInState::NaturallyFinished);
                info!("✅ Playback finished without interruption");
                return Ok(PlayOutcome::NaturallyFinished);
            }

            let chunk = match mic.read_chunk() {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    warn!("Microphone stream closed, finishing playback without barge-in");
                    return Ok(self.wait_for_natural_end(playback.as_mut()));
                }
                Err(e) => {
                    warn!("Microphone read failed, finishing playback without barge-in: {}", e);
                    return Ok(self.wait_for_natural_end(playback.as_mut()));
                }
            };

            let now = self.clock.now();
            let elapsed = now.saturating_sub(start);
            if elapsed < self.config.grace {
                continue;
            }

            let level = self.detector.level(&chunk);
            debug!("t={:.3}s level={:.4}", elapsed.as_secs_f32(), level);
            if !self.detector.is_active(level) {
                continue;
            }
            // Activity that arrives after the clip already ended is not an interruption.
            if playback.is_finished() {
                self.enter(BargeInState::NaturallyFinished);
                info!("✅ Playback finished without interruption");
                return Ok(PlayOutcome::NaturallyFinished);
            }

            self.enter(BargeInState::Interrupting);
            info!("🛑 Interruption detected at {:.2}s (level {:.3})", elapsed.as_secs_f32(), level);
            self.terminate_quietly(playback.as_mut());
            drop(playback);

            return Ok(self.capture_interruption(mic.as_mut(), chunk, start, now));
        }
    }

    fn capture_interruption(
        &mut self,
        mic: &mut dyn MicStream,
        trigger: Vec<f32>,
        start: Duration,
        detected_at: Duration,
    ) -> PlayOutcome {
        self.enter(BargeInState::Capturing);
        info!("🎤 Capturing interruption");

        let mut session = CaptureSession {
            chunks: vec![trigger],
            started_at: detected_at,
            silence_started: None,
        };
        let interrupted_at = detected_at.saturating_sub(start);

        loop {
            if self.cancel.is_cancelled() {
                self.enter(BargeInState::CaptureAbandoned);
                info!("⚠️ Capture cancelled");
                return PlayOutcome::Cancelled;
            }

            let chunk = match mic.read_chunk() {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    warn!("Microphone stream closed mid-capture, discarding interruption");
                    self.enter(BargeInState::CaptureAbandoned);
                    return PlayOutcome::Abandoned { interrupted_at };
                }
                Err(e) => {
                    warn!("Microphone read failed mid-capture, discarding interruption: {}", e);
                    self.enter(BargeInState::CaptureAbandoned);
                    return PlayOutcome::Abandoned { interrupted_at };
                }
            };

            let now = self.clock.now();
            let level = self.detector.level(&chunk);
            let chunk_len = self.chunk_duration(chunk.len());
            session.chunks.push(chunk);

            if self.detector.is_active(level) {
                session.silence_started = None;
            } else {
                let since = *session
                    .silence_started
                    .get_or_insert(now.saturating_sub(chunk_len));
                if now.saturating_sub(since) >= self.config.silence {
                    debug!("Trailing silence reached");
                    break;
                }
            }

            if now.saturating_sub(session.started_at) >= self.config.max_capture {
                warn!("Interruption reached {:?} cap, ending capture", self.config.max_capture);
                break;
            }
        }

        let ended_at = self.clock.now().saturating_sub(start);
        let clip = AudioClip::from_chunks(&session.chunks, self.config.sample_rate);
        self.enter(BargeInState::CaptureComplete);
        info!(
            "✅ Interruption captured ({} chunks, {:.2}s → {:.2}s)",
            session.chunks.len(),
            interrupted_at.as_secs_f32(),
            ended_at.as_secs_f32()
        );
        if let Some(archive) = &self.archive {
            archive.store(ClipKind::Interrupt, &clip);
        }

        PlayOutcome::Captured {
            clip,
            interrupted_at,
            ended_at,
        }
    }

    /// Block until playback ends on its own, polling once per chunk period.
    fn wait_for_natural_end(&mut self, playback: &mut dyn PlaybackHandle) -> PlayOutcome {
        let poll = self.chunk_duration(self.config.chunk_size);
        loop {
            if self.cancel.is_cancelled() {
                return self.cancel_playback(playback);
            }
            if playback.is_finished() {
                self.enter(BargeInState::NaturallyFinished);
                info!("✅ Playback finished");
                return PlayOutcome::NaturallyFinished;
            }
            self.clock.sleep(poll);
        }
    }

    fn cancel_playback(&mut self, playback: &mut dyn PlaybackHandle) -> PlayOutcome {
        info!("⚠️ Playback cancelled");
        self.terminate_quietly(playback);
        PlayOutcome::Cancelled
    }

    /// Playback termination never fails the call; a stubborn player is logged and treated
    /// as stopped.
    fn terminate_quietly(&self, playback: &mut dyn PlaybackHandle) {
        if let Err(e) = playback.terminate(self.config.terminate_timeout) {
            warn!("Playback termination failed, treating as stopped: {}", e);
        }
    }

    fn chunk_duration(&self, samples: usize) -> Duration {
        let rate = self.config.sample_rate.max(1) as u64;
        Duration::from_nanos(samples as u64 * 1_000_000_000 / rate)
    }

    /// Play `clip` with barge-in and transcribe whatever interrupted it.
    ///
    /// Never fails: a playback that cannot start counts as not interrupted, and an empty or
    /// failed transcription yields `Interrupted` with empty text.
    pub fn speak_with_barge_in(
        &mut self,
        clip: &AudioClip,
        input: &dyn AudioInput,
        output: &dyn AudioOutput,
        transcriber: &dyn SpeechTranscriber,
    ) -> BargeInOutcome {
        match self.play(clip, input, output) {
            Ok(PlayOutcome::NaturallyFinished) => BargeInOutcome::NotInterrupted,
            Ok(PlayOutcome::Captured { clip, .. }) => {
                let text = transcribe_or_empty(transcriber, &clip, &self.config.language);
                if text.is_empty() {
                    info!("Interruption was not intelligible");
                } else {
                    info!("🗨️ Interruption: {}", text);
                }
                BargeInOutcome::Interrupted { text }
            }
            Ok(PlayOutcome::Abandoned { .. }) => BargeInOutcome::Interrupted {
                text: String::new(),
            },
            Ok(PlayOutcome::Cancelled) => BargeInOutcome::Cancelled,
            Err(e) => {
                warn!("Playback failed to start: {}", e);
                BargeInOutcome::NotInterrupted
            }
        }
    }
}
