//! **ConversationLoop**: turn-taking session around the barge-in player.
//!
//! Each turn obtains one user utterance (from an interruption of the previous reply when
//! there was one, otherwise from a fresh recording), checks it for an exit phrase, asks
//! the reply generator with the capped history, and speaks the answer with barge-in.

use crate::archive::{ClipArchive, ClipKind};
use crate::audio::{AudioInput, AudioOutput};
use crate::barge_in::{BargeInConfig, BargeInOutcome, BargeInPlayer};
use crate::cancel::CancelFlag;
use crate::capture::AudioCapture;
use crate::clock::Clock;
use crate::config::{ConversationSettings, VoiceConfig};
use crate::error::{VoiceError, VoiceResult};
use crate::history::ConversationTurn;
use crate::reply::{reply_or_apology, ReplyGenerator};
use crate::session::{SessionId, SessionStore};
use crate::stt::{transcribe_or_empty, SpeechTranscriber};
use crate::tts::{synthesize_or_none, SpeechSynthesizer};
use crate::vad::detector_from_settings;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Microphone and speaker used by one loop.
pub struct Devices {
    pub input: Box<dyn AudioInput>,
    pub output: Box<dyn AudioOutput>,
}

/// External services used by one loop.
#[derive(Clone)]
pub struct Collaborators {
    pub stt: Arc<dyn SpeechTranscriber>,
    pub tts: Arc<dyn SpeechSynthesizer>,
    pub replies: Arc<dyn ReplyGenerator>,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    ExitKeyword,
    TurnLimit,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session: SessionId,
    /// Loop iterations, including the ones spent on retries.
    pub turns: u32,
    /// Turns where nothing intelligible was heard.
    pub retries: u32,
    /// Replies (or prompts) the user talked over.
    pub interruptions: u32,
    pub ended_by: EndReason,
    /// Final history, oldest first.
    pub history: Vec<ConversationTurn>,
}

/// Case-insensitive substring match against the exit phrases.
pub fn is_exit_phrase(text: &str, keywords: &[String]) -> bool {
    let lower = text.to_lowercase();
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .any(|k| lower.contains(&k.to_lowercase()))
}

pub struct ConversationLoop {
    settings: ConversationSettings,
    voice: String,
    speed: f32,
    sample_rate: u32,
    capture_duration: Duration,
    devices: Devices,
    collaborators: Collaborators,
    capture: AudioCapture,
    player: BargeInPlayer,
    archive: Option<ClipArchive>,
    sessions: Arc<SessionStore>,
    cancel: CancelFlag,
}

impl ConversationLoop {
    pub fn new(
        config: &VoiceConfig,
        devices: Devices,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        cancel: CancelFlag,
    ) -> VoiceResult<Self> {
        config.validate()?;
        let detector = detector_from_settings(&config.barge_in, config.audio.sample_rate)?;
        let archive = ClipArchive::from_settings(&config.archive);
        let player = BargeInPlayer::new(
            BargeInConfig::from_config(config),
            detector,
            Arc::clone(&clock),
            cancel.clone(),
        )
        .with_archive(archive.clone());
        let capture = AudioCapture::new(&config.audio, clock, cancel.clone());

        Ok(Self {
            settings: config.conversation.clone(),
            voice: config.services.voice.clone(),
            speed: config.services.speed,
            sample_rate: config.audio.sample_rate,
            capture_duration: config.audio.capture_duration(),
            devices,
            collaborators,
            capture,
            player,
            archive,
            sessions: Arc::new(SessionStore::new(config.conversation.history_cap)),
            cancel,
        })
    }

    /// Share a session store with other front ends.
    pub fn with_sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Run one session to completion.
    pub fn run(&mut self) -> SessionSummary {
        let session = self.sessions.create();
        let mut summary = SessionSummary {
            session,
            turns: 0,
            retries: 0,
            interruptions: 0,
            ended_by: EndReason::TurnLimit,
            history: Vec::new(),
        };
        info!("🚀 Session {} started", session);

        let greeting = self.settings.greeting.clone();
        let mut pending = match self.speak(&greeting, &mut summary) {
            Ok(pending) => pending,
            Err(_) => return self.finish(summary, EndReason::Cancelled),
        };
        self.sessions.record(session, ConversationTurn::assistant(greeting));

        let mut lead_in = true;
        while summary.turns < self.settings.max_turns {
            if self.cancel.is_cancelled() {
                return self.finish(summary, EndReason::Cancelled);
            }
            summary.turns += 1;

            let utterance = match pending.take() {
                Some(text) => text,
                None => self.listen(lead_in),
            };

            if utterance.is_empty() {
                if self.cancel.is_cancelled() {
                    return self.finish(summary, EndReason::Cancelled);
                }
                summary.retries += 1;
                info!("🔁 Nothing heard (retry {})", summary.retries);
                let prompt = self.settings.retry_prompt.clone();
                pending = match self.speak(&prompt, &mut summary) {
                    Ok(pending) => pending,
                    Err(_) => return self.finish(summary, EndReason::Cancelled),
                };
                lead_in = false;
                continue;
            }
            lead_in = true;
            info!("👤 User: {}", utterance);

            if is_exit_phrase(&utterance, &self.settings.exit_keywords) {
                info!("👋 Exit phrase heard");
                let farewell = self.settings.farewell.clone();
                // Talking over the farewell changes nothing.
                let _ = self.speak(&farewell, &mut summary);
                return self.finish(summary, EndReason::ExitKeyword);
            }

            let history = self.sessions.history(session).unwrap_or_default();
            let reply = reply_or_apology(
                self.collaborators.replies.as_ref(),
                &utterance,
                &history,
                &self.settings.apology,
            );
            self.sessions.record_exchange(session, &utterance, &reply);
            info!("🤖 Samm: {}", reply);

            pending = match self.speak(&reply, &mut summary) {
                Ok(pending) => pending,
                Err(_) => return self.finish(summary, EndReason::Cancelled),
            };
        }

        info!("⏹️ Turn limit ({}) reached", self.settings.max_turns);
        let farewell = self.settings.farewell.clone();
        let _ = self.speak(&farewell, &mut summary);
        self.finish(summary, EndReason::TurnLimit)
    }

    fn finish(&self, mut summary: SessionSummary, reason: EndReason) -> SessionSummary {
        summary.ended_by = reason;
        if let Some(entry) = self.sessions.end(summary.session) {
            summary.history = entry.history.to_vec();
        }
        info!(
            "🏁 Session ended ({:?}): {} turns, {} retries, {} interruptions",
            reason, summary.turns, summary.retries, summary.interruptions
        );
        summary
    }

    /// Speak `text` with barge-in. Returns the interrupting utterance, if any, or
    /// `Err(Cancelled)` when the session was aborted during playback.
    fn speak(&mut self, text: &str, summary: &mut SessionSummary) -> VoiceResult<Option<String>> {
        let Some(clip) = synthesize_or_none(self.collaborators.tts.as_ref(), text, &self.voice, self.speed)
        else {
            return Ok(None);
        };
        if let Some(archive) = &self.archive {
            archive.store(ClipKind::Assistant, &clip);
        }

        let outcome = self.player.speak_with_barge_in(
            &clip,
            self.devices.input.as_ref(),
            self.devices.output.as_ref(),
            self.collaborators.stt.as_ref(),
        );
        match outcome {
            BargeInOutcome::NotInterrupted => Ok(None),
            BargeInOutcome::Interrupted { text } => {
                summary.interruptions += 1;
                Ok(if text.is_empty() { None } else { Some(text) })
            }
            BargeInOutcome::Cancelled => Err(VoiceError::Cancelled),
        }
    }

    /// Record and transcribe one utterance. Empty on any failure.
    fn listen(&mut self, lead_in: bool) -> String {
        let clip = match self.capture.capture(
            self.devices.input.as_ref(),
            self.capture_duration,
            self.sample_rate,
            lead_in,
        ) {
            Ok(clip) => clip,
            Err(VoiceError::Cancelled) => return String::new(),
            Err(e) => {
                warn!("Recording failed: {}", e);
                return String::new();
            }
        };
        if let Some(archive) = &self.archive {
            archive.store(ClipKind::User, &clip);
        }
        transcribe_or_empty(self.collaborators.stt.as_ref(), &clip, &self.settings.language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keywords() -> Vec<String> {
        VoiceConfig::default().conversation.exit_keywords
    }

    #[test]
    fn exit_phrase_is_substring_match() {
        assert!(is_exit_phrase("شكراً على المساعدة", &keywords()));
        assert!(is_exit_phrase("OK, STOP now", &keywords()));
        assert!(is_exit_phrase("خلاص مع السلامة", &keywords()));
        assert!(!is_exit_phrase("أبي أجدد الجواز", &keywords()));
    }

    #[test]
    fn blank_keywords_never_match() {
        let kw = vec!["  ".to_string(), String::new()];
        assert!(!is_exit_phrase("anything", &kw));
    }
}
