//! Barge-in timing scenarios on simulated devices.
//!
//! The simulated microphone delivers 512-sample chunks at 16 kHz, so every decision lands
//! on a 32ms boundary and the expected instants below are exact.

use samm_voice::sim::{AmplitudeProfile, PlaybackEvent, SimClock, SimInput, SimOutput};
use samm_voice::{
    AmplitudeDetector, AudioClip, AudioInput, BargeInConfig, BargeInOutcome, BargeInPlayer,
    BargeInState, CancelFlag, Clock, MicStream, PlayOutcome, ScriptedStt, VoiceResult,
};
use std::sync::Arc;
use std::time::Duration;

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

fn silent_clip(len: Duration) -> AudioClip {
    let samples = (len.as_millis() as usize) * 16;
    AudioClip::from_pcm16(&vec![0; samples], 16000)
}

struct Rig {
    clock: SimClock,
    input: SimInput,
    output: SimOutput,
    player: BargeInPlayer,
}

fn rig(profile: AmplitudeProfile) -> Rig {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let clock = SimClock::new();
    let input = SimInput::new(clock.clone()).with_profile(profile);
    let output = SimOutput::new(clock.clone());
    let player = BargeInPlayer::new(
        BargeInConfig::default(),
        Box::new(AmplitudeDetector::new(0.05)),
        Arc::new(clock.clone()),
        CancelFlag::new(),
    );
    Rig {
        clock,
        input,
        output,
        player,
    }
}

#[test]
fn silent_microphone_never_terminates_playback() {
    let mut r = rig(AmplitudeProfile::silent().burst(ms(0), ms(3000), 0.04));
    let stt = ScriptedStt::with_texts(["should not be used"]);

    let outcome = r
        .player
        .speak_with_barge_in(&silent_clip(ms(3000)), &r.input, &r.output, &stt);

    assert_eq!(outcome, BargeInOutcome::NotInterrupted);
    assert_eq!(r.output.terminations(), 0);
    assert!(r.clock.now() >= ms(3000));
    assert!(stt.heard().is_empty());
    assert_eq!(r.player.state(), BargeInState::NaturallyFinished);
}

#[test]
fn activity_inside_grace_period_is_ignored() {
    let mut r = rig(AmplitudeProfile::silent().burst(ms(100), ms(600), 0.5));

    let outcome = r.player.play(&silent_clip(ms(2000)), &r.input, &r.output).unwrap();

    assert!(matches!(outcome, PlayOutcome::NaturallyFinished));
    assert_eq!(r.output.terminations(), 0);
}

#[test]
fn activity_after_grace_period_terminates_within_one_quantum() {
    let mut r = rig(AmplitudeProfile::silent().burst(ms(900), ms(400), 0.2));

    let outcome = r.player.play(&silent_clip(ms(3000)), &r.input, &r.output).unwrap();

    let interrupted_at = match outcome {
        PlayOutcome::Captured { interrupted_at, .. } => interrupted_at,
        other => panic!("expected a capture, got {:?}", other),
    };
    // Burst starts at 900ms; the chunk [896, 928) is mostly active.
    assert_eq!(interrupted_at, ms(928));
    assert!(interrupted_at - ms(900) <= ms(32));
    let terminated: Vec<_> = r
        .output
        .events()
        .into_iter()
        .filter_map(|e| match e {
            PlaybackEvent::Terminated { at } => Some(at),
            _ => None,
        })
        .collect();
    assert_eq!(terminated, vec![ms(928)]);
}

#[test]
fn three_second_clip_interrupted_at_one_second() {
    // Silent until 1.0s, amplitude 0.2 for 0.6s, then silent.
    let mut r = rig(AmplitudeProfile::silent().burst(ms(1000), ms(600), 0.2));
    let stt = ScriptedStt::with_texts(["لحظة لحظة، أبي أسأل عن الجواز"]);

    let outcome = r
        .player
        .speak_with_barge_in(&silent_clip(ms(3000)), &r.input, &r.output, &stt);

    assert_eq!(outcome.text(), Some("لحظة لحظة، أبي أسأل عن الجواز"));
    assert_eq!(r.output.terminations(), 1);
    assert_eq!(
        r.output.events()[1],
        PlaybackEvent::Terminated { at: ms(1024) }
    );
    // Silence begins at 1.6s; 0.5s later is 2.1s, reached on the chunk ending at 2.112s.
    assert_eq!(r.clock.now(), ms(2112));

    let heard = stt.heard();
    assert_eq!(heard.len(), 1);
    // Chunks [992ms, 2112ms): 35 chunks of 512 samples.
    assert_eq!(heard[0].duration(), Some(ms(1120)));
    assert_eq!(r.player.state(), BargeInState::CaptureComplete);
}

#[test]
fn short_pause_does_not_end_capture() {
    // Two bursts separated by a 300ms pause, shorter than the 500ms silence window.
    let profile = AmplitudeProfile::silent()
        .burst(ms(1000), ms(400), 0.2)
        .burst(ms(1700), ms(300), 0.2);
    let mut r = rig(profile);

    let outcome = r.player.play(&silent_clip(ms(4000)), &r.input, &r.output).unwrap();

    let (clip, interrupted_at, ended_at) = match outcome {
        PlayOutcome::Captured { clip, interrupted_at, ended_at } => (clip, interrupted_at, ended_at),
        other => panic!("expected a capture, got {:?}", other),
    };
    assert_eq!(interrupted_at, ms(1024));
    // Second burst ends at 2.0s; silence counted from the chunk starting at 2.016s.
    assert_eq!(ended_at, ms(2528));

    // The pause is in the clip, unchanged and in order.
    let samples = clip.samples_f32().unwrap();
    assert_eq!(samples.len(), 48 * 512);
    let at = |t: Duration| {
        let offset = t - ms(992);
        samples[(offset.as_micros() as usize) * 16 / 1000]
    };
    assert!(at(ms(1200)) > 0.19);
    assert_eq!(at(ms(1550)), 0.0);
    assert!(at(ms(1800)) > 0.19);
    assert_eq!(at(ms(2300)), 0.0);
}

#[test]
fn full_silence_window_ends_capture() {
    let mut r = rig(AmplitudeProfile::silent().burst(ms(992), ms(320), 0.2));

    let outcome = r.player.play(&silent_clip(ms(4000)), &r.input, &r.output).unwrap();

    let ended_at = match outcome {
        PlayOutcome::Captured { ended_at, .. } => ended_at,
        other => panic!("expected a capture, got {:?}", other),
    };
    // Burst ends on a chunk boundary (1312ms); 500ms of silence is reached at 1812ms,
    // i.e. on the chunk ending at 1824ms.
    assert_eq!(ended_at, ms(1824));
}

#[test]
fn identical_input_gives_identical_capture() {
    let profile = AmplitudeProfile::silent()
        .burst(ms(1000), ms(250), 0.3)
        .burst(ms(1250), ms(250), 0.1);

    let run = |profile: AmplitudeProfile| {
        let mut r = rig(profile);
        match r.player.play(&silent_clip(ms(3000)), &r.input, &r.output).unwrap() {
            PlayOutcome::Captured { clip, .. } => clip,
            other => panic!("expected a capture, got {:?}", other),
        }
    };

    let a = run(profile.clone());
    let b = run(profile);
    assert_eq!(a.bytes(), b.bytes());
}

#[test]
fn unintelligible_interruption_returns_empty_text() {
    let mut r = rig(AmplitudeProfile::silent().burst(ms(1000), ms(200), 0.2));
    let stt = ScriptedStt::new();
    stt.push_failure("503 Service Unavailable");

    let outcome = r
        .player
        .speak_with_barge_in(&silent_clip(ms(3000)), &r.input, &r.output, &stt);

    assert_eq!(outcome, BargeInOutcome::Interrupted { text: String::new() });
    assert_eq!(outcome.text(), None);
}

/// Input whose streams raise `cancel` during their `after`-th read, as if Ctrl+C arrived
/// while that chunk was being recorded.
struct CancelOnRead {
    inner: SimInput,
    cancel: CancelFlag,
    after: usize,
}

struct CancelOnReadStream {
    inner: Box<dyn MicStream>,
    cancel: CancelFlag,
    after: usize,
    reads: usize,
}

impl AudioInput for CancelOnRead {
    fn open(&self, sample_rate: u32, chunk_size: usize) -> VoiceResult<Box<dyn MicStream>> {
        Ok(Box::new(CancelOnReadStream {
            inner: self.inner.open(sample_rate, chunk_size)?,
            cancel: self.cancel.clone(),
            after: self.after,
            reads: 0,
        }))
    }
}

impl MicStream for CancelOnReadStream {
    fn read_chunk(&mut self) -> VoiceResult<Option<Vec<f32>>> {
        self.reads += 1;
        if self.reads == self.after {
            self.cancel.cancel();
        }
        self.inner.read_chunk()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }
}

fn player_with(clock: &SimClock, cancel: &CancelFlag) -> BargeInPlayer {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    BargeInPlayer::new(
        BargeInConfig::default(),
        Box::new(AmplitudeDetector::new(0.05)),
        Arc::new(clock.clone()),
        cancel.clone(),
    )
}

#[test]
fn cancellation_before_playback_leaves_nothing_running() {
    let clock = SimClock::new();
    let input = SimInput::new(clock.clone());
    let output = SimOutput::new(clock.clone());
    let cancel = CancelFlag::new();
    let mut player = player_with(&clock, &cancel);
    cancel.cancel();

    let outcome = player.speak_with_barge_in(&silent_clip(ms(3000)), &input, &output, &ScriptedStt::new());

    assert_eq!(outcome, BargeInOutcome::Cancelled);
    assert_eq!(output.terminations(), 1);
}

#[test]
fn cancellation_inside_grace_period_stops_playback() {
    let clock = SimClock::new();
    let cancel = CancelFlag::new();
    let input = CancelOnRead {
        inner: SimInput::new(clock.clone()),
        cancel: cancel.clone(),
        after: 5,
    };
    let output = SimOutput::new(clock.clone());
    let mut player = player_with(&clock, &cancel);

    let outcome = player.play(&silent_clip(ms(3000)), &input, &output).unwrap();

    assert!(matches!(outcome, PlayOutcome::Cancelled));
    assert_eq!(clock.now(), ms(160));
    assert_eq!(output.terminations(), 1);
}

#[test]
fn cancellation_during_capture_abandons_it() {
    let clock = SimClock::new();
    let cancel = CancelFlag::new();
    let input = CancelOnRead {
        inner: SimInput::new(clock.clone())
            .with_profile(AmplitudeProfile::silent().burst(ms(1000), ms(3000), 0.3)),
        cancel: cancel.clone(),
        // Interruption lands on read 32 (1.024s); read 40 is mid-capture.
        after: 40,
    };
    let output = SimOutput::new(clock.clone());
    let mut player = player_with(&clock, &cancel);
    let stt = ScriptedStt::with_texts(["should not be used"]);

    let outcome = player.speak_with_barge_in(&silent_clip(ms(5000)), &input, &output, &stt);

    assert_eq!(outcome, BargeInOutcome::Cancelled);
    assert_eq!(output.terminations(), 1);
    assert_eq!(
        player.transitions().last(),
        Some(&BargeInState::CaptureAbandoned)
    );
    assert!(player.transitions().contains(&BargeInState::Capturing));
    assert!(stt.heard().is_empty());
}

#[test]
fn stalled_microphone_degrades_to_plain_playback() {
    let clock = SimClock::new();
    let input = SimInput::stalled(clock.clone());
    let output = SimOutput::new(clock.clone());
    let mut player = player_with(&clock, &CancelFlag::new());

    let outcome = player.play(&silent_clip(ms(2000)), &input, &output).unwrap();

    assert!(matches!(outcome, PlayOutcome::NaturallyFinished));
    assert!(clock.now() >= ms(2000));
    assert_eq!(output.terminations(), 0);
}

#[test]
fn stalled_microphone_still_honours_cancellation() {
    let clock = SimClock::new();
    let cancel = CancelFlag::new();
    let input = CancelOnRead {
        inner: SimInput::stalled(clock.clone()),
        cancel: cancel.clone(),
        after: 1,
    };
    let output = SimOutput::new(clock.clone());
    let mut player = player_with(&clock, &cancel);

    let outcome = player.play(&silent_clip(ms(3000)), &input, &output).unwrap();

    assert!(matches!(outcome, PlayOutcome::Cancelled));
    assert_eq!(output.terminations(), 1);
    assert!(clock.now() < ms(3000));
}

#[test]
fn activity_as_the_clip_ends_is_not_an_interruption() {
    // The burst starts in the chunk [992ms, 1024ms) that crosses the end of a 1s clip.
    let mut r = rig(AmplitudeProfile::silent().burst(ms(992), ms(500), 0.2));

    let outcome = r.player.play(&silent_clip(ms(1000)), &r.input, &r.output).unwrap();

    assert!(matches!(outcome, PlayOutcome::NaturallyFinished));
    assert_eq!(r.output.terminations(), 0);
    assert_eq!(r.clock.now(), ms(1024));
    assert_eq!(r.player.state(), BargeInState::NaturallyFinished);
}
