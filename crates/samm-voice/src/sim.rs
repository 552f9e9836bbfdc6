//! Simulated devices for offline runs (`--simulate`) and deterministic tests.
//!
//! Everything shares one [`SimClock`]. Time only moves when a simulated microphone
//! delivers a chunk or someone sleeps on the clock, so a 3-second playback takes
//! microseconds of wall time and every timing decision is reproducible.

use crate::audio::{stall_limit, AudioInput, AudioOutput, MicStream, PlaybackHandle, PlaybackState};
use crate::clip::AudioClip;
use crate::clock::Clock;
use crate::error::{VoiceError, VoiceResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Virtual monotonic clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    nanos: Arc<AtomicU64>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for SimClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Microphone amplitude over time, relative to the moment the stream was opened.
/// Silence everywhere except the listed bursts.
#[derive(Debug, Clone, Default)]
pub struct AmplitudeProfile {
    bursts: Vec<(Duration, Duration, f32)>,
}

impl AmplitudeProfile {
    pub fn silent() -> Self {
        Self::default()
    }

    /// Add a burst of constant amplitude `level` on `[start, start + len)`.
    pub fn burst(mut self, start: Duration, len: Duration, level: f32) -> Self {
        self.bursts.push((start, start + len, level));
        self
    }

    pub fn at(&self, t: Duration) -> f32 {
        self.bursts
            .iter()
            .rev()
            .find(|(start, end, _)| t >= *start && t < *end)
            .map(|(_, _, level)| *level)
            .unwrap_or(0.0)
    }
}

/// Simulated input device. Each `open` consumes the next queued profile; once the queue is
/// empty streams are silent.
#[derive(Debug, Clone)]
pub struct SimInput {
    clock: SimClock,
    profiles: Arc<Mutex<VecDeque<AmplitudeProfile>>>,
    opened: Arc<AtomicU64>,
    unavailable: bool,
    stalled: bool,
}

impl SimInput {
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            profiles: Arc::new(Mutex::new(VecDeque::new())),
            opened: Arc::new(AtomicU64::new(0)),
            unavailable: false,
            stalled: false,
        }
    }

    /// An input whose device can never be opened.
    pub fn unavailable(clock: SimClock) -> Self {
        Self {
            unavailable: true,
            ..Self::new(clock)
        }
    }

    /// An input that opens but never delivers audio. Each read gives up after the same
    /// stall limit a real device stream uses.
    pub fn stalled(clock: SimClock) -> Self {
        Self {
            stalled: true,
            ..Self::new(clock)
        }
    }

    /// Queue the profile used by the next stream that gets opened.
    pub fn push_profile(&self, profile: AmplitudeProfile) {
        if let Ok(mut q) = self.profiles.lock() {
            q.push_back(profile);
        }
    }

    pub fn with_profile(self, profile: AmplitudeProfile) -> Self {
        self.push_profile(profile);
        self
    }

    /// Number of streams opened so far.
    pub fn open_count(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }
}

impl AudioInput for SimInput {
    fn open(&self, sample_rate: u32, chunk_size: usize) -> VoiceResult<Box<dyn MicStream>> {
        if self.unavailable {
            return Err(VoiceError::AudioDevice("No input device available".to_string()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let profile = self
            .profiles
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or_default();
        Ok(Box::new(SimMicStream {
            clock: self.clock.clone(),
            profile,
            opened_at: self.clock.now(),
            sample_rate,
            chunk_size,
            stalled: self.stalled,
        }))
    }
}

/// Stream that synthesises each sample from the profile at that sample's instant.
pub struct SimMicStream {
    clock: SimClock,
    profile: AmplitudeProfile,
    opened_at: Duration,
    sample_rate: u32,
    chunk_size: usize,
    stalled: bool,
}

impl MicStream for SimMicStream {
    fn read_chunk(&mut self) -> VoiceResult<Option<Vec<f32>>> {
        if self.stalled {
            let limit = stall_limit(self.chunk_size, self.sample_rate);
            self.clock.advance(limit);
            return Err(VoiceError::AudioStream(format!(
                "no audio from the device for {:?}",
                limit
            )));
        }
        let start = self.clock.now().saturating_sub(self.opened_at);
        let rate = self.sample_rate.max(1) as u64;
        let chunk = (0..self.chunk_size as u64)
            .map(|i| self.profile.at(start + Duration::from_nanos(i * 1_000_000_000 / rate)))
            .collect();
        self.clock
            .advance(Duration::from_nanos(self.chunk_size as u64 * 1_000_000_000 / rate));
        Ok(Some(chunk))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// What happened to simulated playbacks, in order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackEvent {
    Started { at: Duration, length: Duration },
    Terminated { at: Duration },
}

/// Simulated output device. A playback runs until the clip's duration has elapsed on the
/// shared clock or until it is terminated.
#[derive(Debug, Clone)]
pub struct SimOutput {
    clock: SimClock,
    events: Arc<Mutex<Vec<PlaybackEvent>>>,
    fallback_length: Duration,
}

impl SimOutput {
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            events: Arc::new(Mutex::new(Vec::new())),
            fallback_length: Duration::from_secs(1),
        }
    }

    pub fn events(&self) -> Vec<PlaybackEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn terminations(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, PlaybackEvent::Terminated { .. }))
            .count()
    }

    fn record(&self, event: PlaybackEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl AudioOutput for SimOutput {
    fn start(&self, clip: &AudioClip) -> VoiceResult<Box<dyn PlaybackHandle>> {
        let length = clip.duration().unwrap_or(self.fallback_length);
        let at = self.clock.now();
        self.record(PlaybackEvent::Started { at, length });
        Ok(Box::new(SimPlayback {
            output: self.clone(),
            ends_at: at + length,
            terminated: false,
        }))
    }
}

pub struct SimPlayback {
    output: SimOutput,
    ends_at: Duration,
    terminated: bool,
}

impl PlaybackHandle for SimPlayback {
    fn state(&mut self) -> PlaybackState {
        if self.terminated || self.output.clock.now() >= self.ends_at {
            PlaybackState::Stopped
        } else {
            PlaybackState::Running
        }
    }

    fn terminate(&mut self, _timeout: Duration) -> VoiceResult<()> {
        if self.state() == PlaybackState::Stopped {
            return Ok(());
        }
        self.terminated = true;
        self.output.record(PlaybackEvent::Terminated {
            at: self.output.clock.now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_a_chunk_advances_the_clock() {
        let clock = SimClock::new();
        let input = SimInput::new(clock.clone());
        let mut mic = input.open(16000, 512).unwrap();
        mic.read_chunk().unwrap();
        assert_eq!(clock.now(), Duration::from_millis(32));
        assert_eq!(input.open_count(), 1);
    }

    #[test]
    fn stalled_stream_fails_after_the_stall_limit() {
        let clock = SimClock::new();
        let input = SimInput::stalled(clock.clone());
        let mut mic = input.open(16000, 512).unwrap();
        assert!(matches!(mic.read_chunk(), Err(VoiceError::AudioStream(_))));
        assert_eq!(clock.now(), Duration::from_millis(500));
    }

    #[test]
    fn profile_is_relative_to_stream_open() {
        let clock = SimClock::new();
        clock.advance(Duration::from_secs(10));
        let input = SimInput::new(clock.clone())
            .with_profile(AmplitudeProfile::silent().burst(Duration::ZERO, Duration::from_millis(64), 0.3));
        let mut mic = input.open(16000, 512).unwrap();
        let chunk = mic.read_chunk().unwrap().unwrap();
        assert!(chunk.iter().all(|&s| (s - 0.3).abs() < 1e-6));
    }

    #[test]
    fn partial_burst_chunk_mixes_levels() {
        let profile = AmplitudeProfile::silent().burst(Duration::from_millis(16), Duration::from_secs(1), 0.2);
        let clock = SimClock::new();
        let input = SimInput::new(clock).with_profile(profile);
        let mut mic = input.open(16000, 512).unwrap();
        let chunk = mic.read_chunk().unwrap().unwrap();
        let amp = crate::clip::mean_abs_amplitude(&chunk);
        assert!((amp - 0.1).abs() < 1e-3);
    }

    #[test]
    fn playback_stops_at_clip_end() {
        let clock = SimClock::new();
        let output = SimOutput::new(clock.clone());
        let clip = AudioClip::from_samples(&vec![0.0; 16000], 16000);
        let mut handle = output.start(&clip).unwrap();
        assert_eq!(handle.state(), PlaybackState::Running);
        clock.advance(Duration::from_secs(1));
        assert!(handle.is_finished());
        handle.terminate(Duration::from_millis(500)).unwrap();
        assert_eq!(output.terminations(), 0);
    }
}
