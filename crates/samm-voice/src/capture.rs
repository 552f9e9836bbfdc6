//! **AudioCapture**: fixed-length microphone recording with an optional countdown.

use crate::audio::AudioInput;
use crate::cancel::CancelFlag;
use crate::clip::AudioClip;
use crate::clock::Clock;
use crate::config::AudioSettings;
use crate::error::{VoiceError, VoiceResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Records mono 16-bit clips from an [`AudioInput`].
pub struct AudioCapture {
    chunk_size: usize,
    lead_in_steps: u32,
    lead_in_step: Duration,
    clock: Arc<dyn Clock>,
    cancel: CancelFlag,
}

impl AudioCapture {
    pub fn new(settings: &AudioSettings, clock: Arc<dyn Clock>, cancel: CancelFlag) -> Self {
        Self {
            chunk_size: settings.chunk_size.max(1),
            lead_in_steps: settings.lead_in_steps,
            lead_in_step: settings.lead_in_step(),
            clock,
            cancel,
        }
    }

    /// Record exactly `duration` of audio at `sample_rate`.
    ///
    /// With `lead_in` the countdown runs before the device is opened, so nothing said
    /// during it is recorded. Device failures and a stream that closes early are errors;
    /// callers treat them as "no input".
    pub fn capture(
        &self,
        input: &dyn AudioInput,
        duration: Duration,
        sample_rate: u32,
        lead_in: bool,
    ) -> VoiceResult<AudioClip> {
        if duration.is_zero() || sample_rate == 0 {
            return Err(VoiceError::Config(
                "capture needs a positive duration and sample rate".to_string(),
            ));
        }

        if lead_in {
            for remaining in (1..=self.lead_in_steps).rev() {
                if self.cancel.is_cancelled() {
                    return Err(VoiceError::Cancelled);
                }
                info!("⏳ Recording in {}...", remaining);
                self.clock.sleep(self.lead_in_step);
            }
        }

        let target = (duration.as_nanos() * sample_rate as u128 / 1_000_000_000) as usize;
        let mut stream = input.open(sample_rate, self.chunk_size)?;
        info!("🎤 Recording {:.1}s", duration.as_secs_f32());

        let mut samples = Vec::with_capacity(target);
        while samples.len() < target {
            if self.cancel.is_cancelled() {
                return Err(VoiceError::Cancelled);
            }
            match stream.read_chunk()? {
                Some(chunk) => samples.extend_from_slice(&chunk),
                None => {
                    return Err(VoiceError::AudioStream(format!(
                        "input closed after {} of {} samples",
                        samples.len(),
                        target
                    )))
                }
            }
        }
        samples.truncate(target);
        debug!("Captured {} samples", samples.len());
        info!("✅ Recording finished");

        Ok(AudioClip::from_samples(&samples, sample_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{AmplitudeProfile, SimClock, SimInput};

    fn capture_with(clock: &SimClock, cancel: CancelFlag) -> AudioCapture {
        AudioCapture::new(&AudioSettings::default(), Arc::new(clock.clone()), cancel)
    }

    #[test]
    fn records_exact_duration() {
        let clock = SimClock::new();
        let input = SimInput::new(clock.clone());
        let capture = capture_with(&clock, CancelFlag::new());

        let clip = capture
            .capture(&input, Duration::from_secs(5), 16000, false)
            .unwrap();
        assert_eq!(clip.duration(), Some(Duration::from_secs(5)));
        assert_eq!(clip.samples_i16().unwrap().len(), 80_000);
    }

    #[test]
    fn lead_in_runs_before_the_device_opens() {
        let clock = SimClock::new();
        let input = SimInput::new(clock.clone())
            .with_profile(AmplitudeProfile::silent().burst(Duration::ZERO, Duration::from_secs(1), 0.5));
        let capture = capture_with(&clock, CancelFlag::new());

        let clip = capture
            .capture(&input, Duration::from_millis(500), 16000, true)
            .unwrap();
        // 3 steps of 800ms, then 500ms of reads rounded up to whole 32ms chunks.
        assert_eq!(clock.now(), Duration::from_millis(2400 + 512));
        let samples = clip.samples_f32().unwrap();
        assert_eq!(samples.len(), 8000);
        // The stream was opened after the countdown, so its first chunk is the burst.
        assert!(samples[0] > 0.4);
        assert_eq!(input.open_count(), 1);
    }

    #[test]
    fn missing_device_is_an_error() {
        let clock = SimClock::new();
        let input = SimInput::unavailable(clock.clone());
        let capture = capture_with(&clock, CancelFlag::new());
        assert!(matches!(
            capture.capture(&input, Duration::from_secs(1), 16000, false),
            Err(VoiceError::AudioDevice(_))
        ));
    }

    #[test]
    fn stalled_device_fails_instead_of_hanging() {
        let clock = SimClock::new();
        let input = SimInput::stalled(clock.clone());
        let capture = capture_with(&clock, CancelFlag::new());
        assert!(matches!(
            capture.capture(&input, Duration::from_secs(5), 16000, false),
            Err(VoiceError::AudioStream(_))
        ));
        assert!(clock.now() < Duration::from_secs(5));
    }

    #[test]
    fn cancelled_capture_stops() {
        let clock = SimClock::new();
        let input = SimInput::new(clock.clone());
        let cancel = CancelFlag::new();
        cancel.cancel();
        let capture = capture_with(&clock, cancel);
        assert!(matches!(
            capture.capture(&input, Duration::from_secs(1), 16000, true),
            Err(VoiceError::Cancelled)
        ));
        assert_eq!(input.open_count(), 0);
    }
}
