//! Audio device seams and the CPAL microphone.
//!
//! The barge-in loop talks to devices only through [`AudioInput`]/[`MicStream`] and
//! [`AudioOutput`]/[`PlaybackHandle`], so the same loop runs against real hardware or the
//! simulated devices in [`crate::sim`].

use crate::clip::AudioClip;
use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Reads give up after this many chunk periods without audio.
const STALL_CHUNKS: u64 = 4;
/// Floor for the stall limit; devices can take a moment to deliver their first buffer.
const MIN_STALL: Duration = Duration::from_millis(500);

/// A live microphone stream delivering fixed-size mono chunks.
pub trait MicStream {
    /// Block until the next chunk is available, for a bounded time. `Ok(None)` once the
    /// stream has closed; `Err` when the device failed or stopped delivering audio.
    fn read_chunk(&mut self) -> VoiceResult<Option<Vec<f32>>>;

    fn sample_rate(&self) -> u32;
}

/// Factory for microphone streams. Each capture or playback call opens its own stream so
/// no stale audio from a previous turn is ever read.
pub trait AudioInput {
    fn open(&self, sample_rate: u32, chunk_size: usize) -> VoiceResult<Box<dyn MicStream>>;
}

/// Lifecycle of one playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Running,
    Terminating,
    Stopped,
}

/// A cancelable playback in progress.
pub trait PlaybackHandle {
    fn state(&mut self) -> PlaybackState;

    fn is_finished(&mut self) -> bool {
        self.state() == PlaybackState::Stopped
    }

    /// Request a graceful stop, wait up to `timeout`, then force it. Succeeds when the
    /// playback had already ended.
    fn terminate(&mut self, timeout: Duration) -> VoiceResult<()>;
}

/// Factory for playbacks on an output device.
pub trait AudioOutput {
    fn start(&self, clip: &AudioClip) -> VoiceResult<Box<dyn PlaybackHandle>>;
}

/// Default input device via CPAL.
#[derive(Debug, Default, Clone)]
pub struct CpalInput;

impl CpalInput {
    pub fn new() -> Self {
        Self
    }
}

impl AudioInput for CpalInput {
    fn open(&self, sample_rate: u32, chunk_size: usize) -> VoiceResult<Box<dyn MicStream>> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| VoiceError::AudioDevice("No input device available".to_string()))?;

        debug!(
            "📱 Using input device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let default_config = device.default_input_config()?;
        let device_rate = default_config.sample_rate().0;
        let channels = default_config.channels() as usize;
        let stream_config: StreamConfig = default_config.clone().into();

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel::<Vec<f32>>();
        let mut chunker = Chunker::new(chunk_size, channels, device_rate, sample_rate, chunk_tx);
        let fault: StreamFault = Arc::new(Mutex::new(None));
        let receiver = ChunkReceiver::new(
            chunk_rx,
            stall_limit(chunk_size, sample_rate),
            Arc::clone(&fault),
        )?;

        let stream = match default_config.sample_format() {
            SampleFormat::F32 => {
                let fault = Arc::clone(&fault);
                device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| chunker.push(data),
                    move |err| report_fault(&fault, err),
                    None,
                )?
            }
            SampleFormat::I16 => {
                let fault = Arc::clone(&fault);
                device.build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let samples: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0f32).collect();
                        chunker.push(&samples);
                    },
                    move |err| report_fault(&fault, err),
                    None,
                )?
            }
            other => {
                return Err(VoiceError::AudioDevice(format!(
                    "Unsupported sample format {:?} (need F32 or I16)",
                    other
                )))
            }
        };

        stream.play()?;
        debug!(
            "🎤 Capture stream open ({}Hz device → {}Hz mono, {} samples/chunk)",
            device_rate, sample_rate, chunk_size
        );

        Ok(Box::new(CpalMicStream {
            _stream: stream,
            receiver,
            sample_rate,
        }))
    }
}

/// First error reported by the device callback, if any.
type StreamFault = Arc<Mutex<Option<String>>>;

fn report_fault(fault: &StreamFault, err: cpal::StreamError) {
    warn!("Audio stream error: {}", err);
    if let Ok(mut slot) = fault.lock() {
        slot.get_or_insert_with(|| err.to_string());
    }
}

pub(crate) fn stall_limit(chunk_size: usize, sample_rate: u32) -> Duration {
    let chunk_nanos = chunk_size as u64 * 1_000_000_000 / sample_rate.max(1) as u64;
    Duration::from_nanos(chunk_nanos * STALL_CHUNKS).max(MIN_STALL)
}

/// Microphone stream: the CPAL callback thread hands finished chunks over a channel and
/// the controlling thread waits on the receiving side.
pub struct CpalMicStream {
    _stream: Stream,
    receiver: ChunkReceiver,
    sample_rate: u32,
}

impl MicStream for CpalMicStream {
    fn read_chunk(&mut self) -> VoiceResult<Option<Vec<f32>>> {
        self.receiver.recv()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Receiving end of the callback hand-off. The sender lives in the stream callback, so the
/// channel never closes while the stream exists; every wait is bounded by `stall_limit`.
struct ChunkReceiver {
    rx: mpsc::UnboundedReceiver<Vec<f32>>,
    rt: tokio::runtime::Runtime,
    stall_limit: Duration,
    fault: StreamFault,
}

impl ChunkReceiver {
    fn new(
        rx: mpsc::UnboundedReceiver<Vec<f32>>,
        stall_limit: Duration,
        fault: StreamFault,
    ) -> VoiceResult<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        Ok(Self {
            rx,
            rt,
            stall_limit,
            fault,
        })
    }

    fn fault(&self) -> Option<String> {
        self.fault.lock().ok().and_then(|f| f.clone())
    }

    fn recv(&mut self) -> VoiceResult<Option<Vec<f32>>> {
        if let Some(err) = self.fault() {
            return Err(VoiceError::AudioStream(err));
        }
        let waited = self
            .rt
            .block_on(tokio::time::timeout(self.stall_limit, self.rx.recv()));
        match waited {
            Ok(chunk) => Ok(chunk),
            Err(_) => Err(VoiceError::AudioStream(self.fault().unwrap_or_else(|| {
                format!("no audio from the device for {:?}", self.stall_limit)
            }))),
        }
    }
}

/// Downmixes and resamples callback buffers, then cuts them into fixed-size chunks.
///
/// Resampling picks the nearest source sample. The read position is carried across
/// callbacks, so rates that do not divide evenly lose nothing at buffer boundaries.
struct Chunker {
    chunk_size: usize,
    channels: usize,
    step: f64,
    /// Source index of the next output sample, relative to the next buffer.
    position: f64,
    pending: Vec<f32>,
    tx: mpsc::UnboundedSender<Vec<f32>>,
}

impl Chunker {
    fn new(
        chunk_size: usize,
        channels: usize,
        from_rate: u32,
        to_rate: u32,
        tx: mpsc::UnboundedSender<Vec<f32>>,
    ) -> Self {
        let step = if from_rate == 0 || to_rate == 0 {
            1.0
        } else {
            from_rate as f64 / to_rate as f64
        };
        Self {
            chunk_size,
            channels,
            step,
            position: 0.0,
            pending: Vec::with_capacity(chunk_size),
            tx,
        }
    }

    /// Accepts interleaved samples straight from the device callback.
    fn push(&mut self, interleaved: &[f32]) {
        let mono = downmix(interleaved, self.channels);
        while (self.position as usize) < mono.len() {
            self.pending.push(mono[self.position as usize]);
            self.position += self.step;
            if self.pending.len() >= self.chunk_size {
                let chunk = std::mem::replace(&mut self.pending, Vec::with_capacity(self.chunk_size));
                // Receiver dropped means the stream is being torn down.
                if self.tx.send(chunk).is_err() {
                    return;
                }
            }
        }
        self.position -= mono.len() as f64;
    }
}

fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => samples
            .chunks_exact(n)
            .map(|frame| frame.iter().sum::<f32>() / n as f32)
            .collect(),
    }
}

/// List available input devices
pub fn list_input_devices() -> VoiceResult<Vec<String>> {
    let host = cpal::default_host();
    let names = host
        .input_devices()?
        .filter_map(|d| d.name().ok())
        .collect();
    Ok(names)
}

/// List available output devices
pub fn list_output_devices() -> VoiceResult<Vec<String>> {
    let host = cpal::default_host();
    let names = host
        .output_devices()?
        .filter_map(|d| d.name().ok())
        .collect();
    Ok(names)
}
