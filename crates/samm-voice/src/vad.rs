//! Voice activity detection for microphone chunks.
//!
//! The default [`AmplitudeDetector`] is a mean-absolute-amplitude gate. [`WebRtcDetector`]
//! wraps WebRTC VAD for noisy rooms where a plain level gate misfires.

use crate::clip::mean_abs_amplitude;
use crate::config::{BargeInSettings, DetectorKind};
use crate::error::{VoiceError, VoiceResult};
use tracing::{debug, info};
use webrtc_vad::{SampleRate, Vad, VadMode};

/// Classifies a chunk as speech or silence.
pub trait VoiceActivityDetector {
    /// Activity level of the chunk (amplitude, or 1.0/0.0 for binary detectors).
    fn level(&mut self, chunk: &[f32]) -> f32;

    /// Whether `level` counts as speech.
    fn is_active(&self, level: f32) -> bool;
}

/// Mean absolute amplitude compared against a fixed threshold.
#[derive(Debug, Clone)]
pub struct AmplitudeDetector {
    threshold: f32,
}

impl AmplitudeDetector {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl VoiceActivityDetector for AmplitudeDetector {
    fn level(&mut self, chunk: &[f32]) -> f32 {
        mean_abs_amplitude(chunk)
    }

    fn is_active(&self, level: f32) -> bool {
        level > self.threshold
    }
}

/// WebRTC VAD over the 30ms frames contained in each chunk. A chunk is speech if any of
/// its full frames is voiced; a trailing partial frame is ignored.
pub struct WebRtcDetector {
    vad: Vad,
    frame_size: usize,
    frame_i16: Vec<i16>,
}

impl WebRtcDetector {
    pub fn new(sample_rate: u32, mode: u8) -> VoiceResult<Self> {
        let rate = match sample_rate {
            8000 => SampleRate::Rate8kHz,
            16000 => SampleRate::Rate16kHz,
            32000 => SampleRate::Rate32kHz,
            48000 => SampleRate::Rate48kHz,
            _ => {
                return Err(VoiceError::VadInit(format!(
                    "WebRTC VAD only supports 8000, 16000, 32000, or 48000 Hz, got {}",
                    sample_rate
                )))
            }
        };
        let vad_mode = match mode {
            0 => VadMode::Quality,
            1 => VadMode::LowBitrate,
            2 => VadMode::Aggressive,
            3 => VadMode::VeryAggressive,
            _ => return Err(VoiceError::VadInit(format!("VAD mode must be 0-3, got {}", mode))),
        };

        let mut vad = Vad::new();
        vad.set_mode(vad_mode);
        vad.set_sample_rate(rate);

        // At 16kHz: 16000 samples/sec * 0.03 sec = 480 samples
        let frame_size = (sample_rate as usize * 30) / 1000;
        info!("🎙️ WebRTC VAD ready (mode {}, {} samples/frame)", mode, frame_size);

        Ok(Self {
            vad,
            frame_size,
            frame_i16: vec![0; frame_size],
        })
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }
}

impl VoiceActivityDetector for WebRtcDetector {
    fn level(&mut self, chunk: &[f32]) -> f32 {
        for frame in chunk.chunks_exact(self.frame_size) {
            for (dst, &s) in self.frame_i16.iter_mut().zip(frame) {
                *dst = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
            }
            match self.vad.is_voice_segment(&self.frame_i16) {
                Ok(true) => return 1.0,
                Ok(false) => {}
                Err(e) => debug!("VAD Error: {:?}", e),
            }
        }
        0.0
    }

    fn is_active(&self, level: f32) -> bool {
        level > 0.5
    }
}

/// Build the detector selected by the barge-in settings.
pub fn detector_from_settings(
    settings: &BargeInSettings,
    sample_rate: u32,
) -> VoiceResult<Box<dyn VoiceActivityDetector>> {
    match settings.detector {
        DetectorKind::Amplitude => Ok(Box::new(AmplitudeDetector::new(settings.threshold))),
        DetectorKind::Webrtc => Ok(Box::new(WebRtcDetector::new(sample_rate, settings.webrtc_mode)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amplitude_gate_is_strictly_above_threshold() {
        let mut d = AmplitudeDetector::new(0.05);
        let quiet = d.level(&[0.05; 512]);
        assert!(!d.is_active(quiet));
        let loud = d.level(&[0.2; 512]);
        assert!(d.is_active(loud));
        let negative = d.level(&[-0.2; 512]);
        assert!(d.is_active(negative));
    }

    #[test]
    fn webrtc_rejects_unsupported_rate() {
        assert!(WebRtcDetector::new(44100, 2).is_err());
        assert!(WebRtcDetector::new(16000, 7).is_err());
    }

    #[test]
    fn webrtc_silence_is_inactive() {
        let mut d = WebRtcDetector::new(16000, 3).unwrap();
        assert_eq!(d.frame_size(), 480);
        let level = d.level(&vec![0.0f32; 512]);
        assert!(!d.is_active(level));
    }

    #[test]
    fn settings_select_detector() {
        let mut settings = BargeInSettings::default();
        assert!(detector_from_settings(&settings, 16000).is_ok());
        settings.detector = DetectorKind::Webrtc;
        assert!(detector_from_settings(&settings, 22050).is_err());
    }
}
