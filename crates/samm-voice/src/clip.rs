//! **AudioClip**: immutable audio buffers handed between capture, synthesis, playback and STT.
//!
//! A clip is either raw 16-bit little-endian PCM (what the microphone produces) or an
//! encoded container returned by a TTS service. Bytes are shared behind an `Arc`, so
//! cloning a clip never copies audio and nothing can mutate it after creation.

use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// How the clip bytes are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipEncoding {
    /// Raw interleaved 16-bit little-endian PCM.
    Pcm16,
    /// RIFF/WAV container.
    Wav,
    /// MPEG layer 3 (OpenAI-compatible TTS default).
    Mp3,
}

impl ClipEncoding {
    /// File extension used when the clip is archived. PCM is archived as WAV.
    pub fn extension(&self) -> &'static str {
        match self {
            ClipEncoding::Pcm16 | ClipEncoding::Wav => "wav",
            ClipEncoding::Mp3 => "mp3",
        }
    }
}

/// Immutable audio buffer with its format metadata.
#[derive(Debug, Clone)]
pub struct AudioClip {
    bytes: Arc<[u8]>,
    encoding: ClipEncoding,
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
}

impl AudioClip {
    /// Quantise mono f32 samples (-1.0..1.0) into a 16-bit PCM clip.
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Self {
        let pcm: Vec<i16> = samples.iter().map(|&s| f32_to_i16(s)).collect();
        Self::from_pcm16(&pcm, sample_rate)
    }

    /// Build a mono clip from 16-bit samples.
    pub fn from_pcm16(samples: &[i16], sample_rate: u32) -> Self {
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        Self {
            bytes: bytes.into(),
            encoding: ClipEncoding::Pcm16,
            sample_rate,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    /// Concatenate captured chunks, in arrival order, into one mono PCM clip.
    pub fn from_chunks(chunks: &[Vec<f32>], sample_rate: u32) -> Self {
        let total: usize = chunks.iter().map(Vec::len).sum();
        let mut samples = Vec::with_capacity(total);
        for chunk in chunks {
            samples.extend_from_slice(chunk);
        }
        Self::from_samples(&samples, sample_rate)
    }

    /// Wrap bytes produced by an encoder (e.g. a TTS response). Metadata is nominal for
    /// compressed encodings; the decoder reads the real values from the stream.
    pub fn encoded(bytes: Vec<u8>, encoding: ClipEncoding, sample_rate: u32, channels: u16) -> Self {
        Self {
            bytes: bytes.into(),
            encoding,
            sample_rate,
            channels,
            bits_per_sample: 16,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn encoding(&self) -> ClipEncoding {
        self.encoding
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Playback length. Known exactly for PCM and WAV; `None` for compressed clips.
    pub fn duration(&self) -> Option<Duration> {
        match self.encoding {
            ClipEncoding::Pcm16 => {
                let frames = self.bytes.len() / (2 * self.channels.max(1) as usize);
                Some(frames_to_duration(frames as u64, self.sample_rate))
            }
            ClipEncoding::Wav => {
                let reader = hound::WavReader::new(Cursor::new(self.bytes.to_vec())).ok()?;
                let spec = reader.spec();
                Some(frames_to_duration(reader.duration() as u64, spec.sample_rate))
            }
            ClipEncoding::Mp3 => None,
        }
    }

    /// Interleaved 16-bit samples for PCM and WAV clips.
    pub fn samples_i16(&self) -> VoiceResult<Vec<i16>> {
        match self.encoding {
            ClipEncoding::Pcm16 => Ok(self
                .bytes
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect()),
            ClipEncoding::Wav => {
                let reader = hound::WavReader::new(Cursor::new(self.bytes.to_vec()))?;
                let samples = reader
                    .into_samples::<i16>()
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(samples)
            }
            ClipEncoding::Mp3 => Err(VoiceError::Clip(
                "mp3 clips cannot be read as PCM samples".to_string(),
            )),
        }
    }

    /// Normalised f32 samples (-1.0..1.0) for PCM and WAV clips.
    pub fn samples_f32(&self) -> VoiceResult<Vec<f32>> {
        Ok(self
            .samples_i16()?
            .into_iter()
            .map(|s| s as f32 / 32768.0f32)
            .collect())
    }

    /// WAV container bytes, for uploads and archiving.
    pub fn to_wav_bytes(&self) -> VoiceResult<Vec<u8>> {
        match self.encoding {
            ClipEncoding::Wav => Ok(self.bytes.to_vec()),
            ClipEncoding::Pcm16 => {
                let mut cursor = Cursor::new(Vec::with_capacity(self.bytes.len() + 44));
                {
                    let mut writer = hound::WavWriter::new(&mut cursor, self.wav_spec())?;
                    for s in self.samples_i16()? {
                        writer.write_sample(s)?;
                    }
                    writer.finalize()?;
                }
                Ok(cursor.into_inner())
            }
            ClipEncoding::Mp3 => Err(VoiceError::Clip(
                "mp3 clips cannot be re-encoded as WAV".to_string(),
            )),
        }
    }

    /// Persist the clip. PCM is written as a WAV file; encoded clips are written verbatim.
    pub fn write_to(&self, path: &Path) -> VoiceResult<()> {
        match self.encoding {
            ClipEncoding::Pcm16 => {
                let mut writer = hound::WavWriter::create(path, self.wav_spec())?;
                for s in self.samples_i16()? {
                    writer.write_sample(s)?;
                }
                writer.finalize()?;
            }
            ClipEncoding::Wav | ClipEncoding::Mp3 => std::fs::write(path, &self.bytes)?,
        }
        Ok(())
    }

    fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        }
    }
}

/// Mean absolute value of the samples: the voice-activity metric. 0.0 for an empty chunk.
pub fn mean_abs_amplitude(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.abs()).sum::<f32>() / samples.len() as f32
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(frames * 1_000_000_000 / sample_rate as u64)
}
