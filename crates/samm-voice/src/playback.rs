//! **Playback**: synthesized speech output and the interruption kill-switch.
//!
//! Two [`AudioOutput`] implementations:
//! - [`RodioOutput`]: in-process rodio sink. Completion is signalled by a callback source
//!   queued after the clip, so liveness is a flag read rather than a device poll.
//! - [`CommandOutput`]: an external player process (afplay, aplay, mpg123). Termination is
//!   SIGTERM, a bounded wait, then SIGKILL.

use crate::audio::{AudioOutput, PlaybackHandle, PlaybackState};
use crate::clip::{AudioClip, ClipEncoding};
use crate::error::{VoiceError, VoiceResult};
use rodio::{OutputStream, Sink, Source};
use std::io::Cursor;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const TERMINATE_POLL: Duration = Duration::from_millis(10);

/// Plays clips on the default output device through a rodio sink.
#[derive(Debug, Default, Clone)]
pub struct RodioOutput;

impl RodioOutput {
    pub fn new() -> Self {
        Self
    }
}

impl AudioOutput for RodioOutput {
    fn start(&self, clip: &AudioClip) -> VoiceResult<Box<dyn PlaybackHandle>> {
        let (stream, stream_handle) =
            OutputStream::try_default().map_err(|e| VoiceError::Playback(e.to_string()))?;
        let sink = Sink::try_new(&stream_handle).map_err(|e| VoiceError::Playback(e.to_string()))?;

        match clip.encoding() {
            ClipEncoding::Pcm16 => {
                let source = rodio::buffer::SamplesBuffer::new(
                    clip.channels(),
                    clip.sample_rate(),
                    clip.samples_i16()?,
                );
                sink.append(source);
            }
            ClipEncoding::Wav | ClipEncoding::Mp3 => {
                let cursor = Cursor::new(clip.bytes().to_vec());
                let source = rodio::Decoder::new(cursor)
                    .map_err(|e| VoiceError::Playback(format!("Decode failed: {}", e)))?;
                sink.append(source.convert_samples::<f32>());
            }
        }

        let finished = Arc::new(AtomicBool::new(false));
        let done = Arc::clone(&finished);
        sink.append(rodio::source::EmptyCallback::<f32>::new(Box::new(move || {
            done.store(true, Ordering::SeqCst);
        })));

        info!("🔊 Playback started");
        Ok(Box::new(RodioPlayback {
            stream: Some(stream),
            sink,
            finished,
            terminating: false,
        }))
    }
}

/// Active rodio playback. Dropping the output stream is the forced stop.
pub struct RodioPlayback {
    stream: Option<OutputStream>,
    sink: Sink,
    finished: Arc<AtomicBool>,
    terminating: bool,
}

impl PlaybackHandle for RodioPlayback {
    fn state(&mut self) -> PlaybackState {
        if self.stream.is_none() || self.finished.load(Ordering::SeqCst) || self.sink.empty() {
            PlaybackState::Stopped
        } else if self.terminating {
            PlaybackState::Terminating
        } else {
            PlaybackState::Running
        }
    }

    fn terminate(&mut self, timeout: Duration) -> VoiceResult<()> {
        if self.state() == PlaybackState::Stopped {
            return Ok(());
        }
        self.terminating = true;
        self.sink.stop();

        let deadline = Instant::now() + timeout;
        while !self.sink.empty() && Instant::now() < deadline {
            thread::sleep(TERMINATE_POLL);
        }
        if !self.sink.empty() {
            warn!("Playback did not stop within {:?}, closing output stream", timeout);
        }
        self.stream = None;
        info!("⏹️ Playback stopped");
        Ok(())
    }
}

/// Plays clips by spawning an external player on a temporary file.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    program: String,
    args: Vec<String>,
    scratch_dir: PathBuf,
}

impl CommandOutput {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// Directory for the temporary clip files handed to the player.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }
}

impl AudioOutput for CommandOutput {
    fn start(&self, clip: &AudioClip) -> VoiceResult<Box<dyn PlaybackHandle>> {
        let path = self.scratch_dir.join(format!(
            "samm_playback_{}.{}",
            uuid::Uuid::new_v4().simple(),
            clip.encoding().extension()
        ));
        clip.write_to(&path)?;

        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                let _ = std::fs::remove_file(&path);
                VoiceError::Playback(format!("failed to spawn {}: {}", self.program, e))
            })?;

        info!("🔊 Playback started ({} pid {})", self.program, child.id());
        Ok(Box::new(CommandPlayback {
            child,
            path,
            terminating: false,
            exited: false,
        }))
    }
}

/// External player process. Never outlives its handle.
pub struct CommandPlayback {
    child: Child,
    path: PathBuf,
    terminating: bool,
    exited: bool,
}

impl CommandPlayback {
    fn poll_exit(&mut self) -> bool {
        if self.exited {
            return true;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!("Player exited: {}", status);
                self.exited = true;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Player status unavailable, treating as stopped: {}", e);
                self.exited = true;
            }
        }
        self.exited
    }

    fn request_terminate(&mut self) {
        #[cfg(unix)]
        {
            // SAFETY: plain syscall on a pid we spawned and have not yet reaped.
            let rc = unsafe { libc::kill(self.child.id() as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                debug!("SIGTERM failed: {}", std::io::Error::last_os_error());
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.kill();
        }
    }
}

impl PlaybackHandle for CommandPlayback {
    fn state(&mut self) -> PlaybackState {
        if self.poll_exit() {
            PlaybackState::Stopped
        } else if self.terminating {
            PlaybackState::Terminating
        } else {
            PlaybackState::Running
        }
    }

    fn terminate(&mut self, timeout: Duration) -> VoiceResult<()> {
        if self.poll_exit() {
            return Ok(());
        }
        self.terminating = true;
        self.request_terminate();

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.poll_exit() {
                info!("⏹️ Playback stopped");
                return Ok(());
            }
            thread::sleep(TERMINATE_POLL);
        }

        warn!("Player ignored terminate for {:?}, killing", timeout);
        if let Err(e) = self.child.kill() {
            warn!("Kill failed, treating playback as stopped: {}", e);
        }
        let _ = self.child.wait();
        self.exited = true;
        info!("⏹️ Playback stopped");
        Ok(())
    }
}

impl Drop for CommandPlayback {
    fn drop(&mut self) {
        if !self.poll_exit() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
        let _ = std::fs::remove_file(&self.path);
    }
}
