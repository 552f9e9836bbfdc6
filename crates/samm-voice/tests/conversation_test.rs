//! Conversation scenarios on simulated devices with scripted collaborators.

use samm_voice::sim::{AmplitudeProfile, PlaybackEvent, SimClock, SimInput, SimOutput};
use samm_voice::{
    AudioClip, CancelFlag, Collaborators, ConversationLoop, ConversationTurn, Devices, EndReason,
    ScriptedReply, ScriptedStt, SilentTts, SpeechSynthesizer, VoiceConfig, VoiceError,
    VoiceResult,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// SilentTts that remembers what it was asked to say, or fails every call.
#[derive(Default)]
struct RecordingTts {
    inner: SilentTts,
    spoken: Mutex<Vec<String>>,
    broken: bool,
}

impl RecordingTts {
    fn broken() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }

    fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

impl SpeechSynthesizer for RecordingTts {
    fn synthesize(&self, text: &str, voice: &str, speed: f32) -> VoiceResult<AudioClip> {
        self.spoken.lock().unwrap().push(text.to_string());
        if self.broken {
            return Err(VoiceError::Tts("503 Service Unavailable".to_string()));
        }
        self.inner.synthesize(text, voice, speed)
    }
}

struct Session {
    config: VoiceConfig,
    input: SimInput,
    output: SimOutput,
    stt: Arc<ScriptedStt>,
    tts: Arc<RecordingTts>,
    replies: Arc<ScriptedReply>,
    conversation: ConversationLoop,
}

fn session_with(stt: ScriptedStt, tts: RecordingTts, cancel: CancelFlag) -> Session {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut config = VoiceConfig::default();
    config.archive.enabled = false;

    let clock = SimClock::new();
    let input = SimInput::new(clock.clone());
    let output = SimOutput::new(clock.clone());
    let stt = Arc::new(stt);
    let tts = Arc::new(tts);
    let replies = Arc::new(ScriptedReply::new("تمام، أبشر."));

    let conversation = ConversationLoop::new(
        &config,
        Devices {
            input: Box::new(input.clone()),
            output: Box::new(output.clone()),
        },
        Collaborators {
            stt: stt.clone(),
            tts: tts.clone(),
            replies: replies.clone(),
        },
        Arc::new(clock),
        cancel,
    )
    .unwrap();

    Session {
        config,
        input,
        output,
        stt,
        tts,
        replies,
        conversation,
    }
}

fn session(stt: ScriptedStt) -> Session {
    session_with(stt, RecordingTts::default(), CancelFlag::new())
}

fn playbacks(output: &SimOutput) -> usize {
    output
        .events()
        .iter()
        .filter(|e| matches!(e, PlaybackEvent::Started { .. }))
        .count()
}

#[test]
fn nothing_heard_reprompts_until_turn_limit() {
    let mut s = session(ScriptedStt::new());

    let summary = s.conversation.run();

    assert_eq!(summary.ended_by, EndReason::TurnLimit);
    assert_eq!(summary.turns, 20);
    assert_eq!(summary.retries, 20);
    assert!(s.replies.calls().is_empty());
    // Greeting, 20 retry prompts, farewell.
    assert_eq!(playbacks(&s.output), 22);
    let spoken = s.tts.spoken();
    assert_eq!(spoken.iter().filter(|t| **t == s.config.conversation.retry_prompt).count(), 20);
    assert_eq!(s.stt.heard().len(), 20);
}

#[test]
fn thank_you_ends_the_session_without_a_reply() {
    let mut s = session(ScriptedStt::with_texts(["شكراً"]));

    let summary = s.conversation.run();

    assert_eq!(summary.ended_by, EndReason::ExitKeyword);
    assert_eq!(summary.turns, 1);
    assert!(s.replies.calls().is_empty());
    assert_eq!(
        s.tts.spoken(),
        vec![
            s.config.conversation.greeting.clone(),
            s.config.conversation.farewell.clone()
        ]
    );
    assert_eq!(playbacks(&s.output), 2);
}

#[test]
fn interruption_becomes_the_next_user_turn() {
    let mut s = session(ScriptedStt::with_texts(["أبي أجدد الجواز", "شكراً"]));
    // The greeting playback is talked over at 1.0s.
    s.input.push_profile(
        AmplitudeProfile::silent().burst(Duration::from_millis(1000), Duration::from_millis(400), 0.2),
    );

    let summary = s.conversation.run();

    assert_eq!(summary.ended_by, EndReason::ExitKeyword);
    assert_eq!(summary.interruptions, 1);
    assert_eq!(summary.turns, 2);

    let calls = s.replies.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "أبي أجدد الجواز");
    assert_eq!(
        calls[0].1,
        vec![ConversationTurn::assistant(s.config.conversation.greeting.clone())]
    );
    assert_eq!(
        summary.history,
        vec![
            ConversationTurn::assistant(s.config.conversation.greeting.clone()),
            ConversationTurn::user("أبي أجدد الجواز"),
            ConversationTurn::assistant("تمام، أبشر."),
        ]
    );
    // Greeting terminated once; the reply and the farewell played out.
    assert_eq!(s.output.terminations(), 1);
}

#[test]
fn history_never_exceeds_the_cap() {
    let mut texts: Vec<String> = (0..12).map(|i| format!("question {}", i)).collect();
    texts.push("bye".to_string());
    let mut s = session(ScriptedStt::with_texts(texts));

    let summary = s.conversation.run();

    assert_eq!(summary.ended_by, EndReason::ExitKeyword);
    let calls = s.replies.calls();
    assert_eq!(calls.len(), 12);
    assert!(calls.iter().all(|(_, history)| history.len() <= 6));
    assert_eq!(summary.history.len(), 6);
    assert_eq!(summary.history[0], ConversationTurn::user("question 9"));
    assert_eq!(summary.history[5], ConversationTurn::assistant("تمام، أبشر."));
}

#[test]
fn reply_failure_is_spoken_as_an_apology() {
    let mut s = session(ScriptedStt::with_texts(["كم رصيد المحفظة", "شكراً"]));
    s.replies.push_failure("timeout");

    let summary = s.conversation.run();

    assert_eq!(summary.ended_by, EndReason::ExitKeyword);
    let apology = s.config.conversation.apology.clone();
    assert!(s.tts.spoken().contains(&apology));
    assert_eq!(summary.history.last(), Some(&ConversationTurn::assistant(apology)));
}

#[test]
fn synthesis_failure_skips_playback() {
    let mut s = session_with(
        ScriptedStt::with_texts(["مرحبا", "شكراً"]),
        RecordingTts::broken(),
        CancelFlag::new(),
    );

    let summary = s.conversation.run();

    assert_eq!(summary.ended_by, EndReason::ExitKeyword);
    assert_eq!(s.replies.calls().len(), 1);
    assert!(s.output.events().is_empty());
    // Nothing was played, so the microphone was only opened to record.
    assert_eq!(s.input.open_count(), 2);
}

#[test]
fn cancellation_ends_the_session() {
    let cancel = CancelFlag::new();
    let mut s = session_with(ScriptedStt::with_texts(["مرحبا"]), RecordingTts::default(), cancel.clone());
    cancel.cancel();

    let summary = s.conversation.run();

    assert_eq!(summary.ended_by, EndReason::Cancelled);
    assert_eq!(summary.turns, 0);
    assert_eq!(s.output.terminations(), 1);
    assert!(s.conversation.sessions().is_empty());
}
