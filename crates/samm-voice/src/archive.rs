//! Diagnostics archive: captured, interrupting, and synthesized clips written to disk.
//!
//! Purely for auditability. A failed write is logged and otherwise ignored.

use crate::clip::AudioClip;
use crate::config::ArchiveSettings;
use crate::error::VoiceResult;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// What a clip was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipKind {
    /// Regular microphone recording.
    User,
    /// Speech captured while interrupting playback.
    Interrupt,
    /// Synthesized reply.
    Assistant,
}

impl ClipKind {
    fn prefix(&self) -> &'static str {
        match self {
            ClipKind::User => "user",
            ClipKind::Interrupt => "interrupt",
            ClipKind::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClipArchive {
    dir: PathBuf,
}

impl ClipArchive {
    pub fn new(dir: impl Into<PathBuf>) -> VoiceResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Archive configured by settings, or `None` when disabled or the directory is unusable.
    pub fn from_settings(settings: &ArchiveSettings) -> Option<Self> {
        if !settings.enabled {
            return None;
        }
        match Self::new(&settings.dir) {
            Ok(a) => Some(a),
            Err(e) => {
                warn!("Archive disabled, cannot create {}: {}", settings.dir.display(), e);
                None
            }
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `clip` as `<kind>_<timestamp>.<ext>`. Returns the path on success.
    pub fn store(&self, kind: ClipKind, clip: &AudioClip) -> Option<PathBuf> {
        if clip.is_empty() {
            return None;
        }
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");
        let path = self.dir.join(format!(
            "{}_{}.{}",
            kind.prefix(),
            stamp,
            clip.encoding().extension()
        ));
        match clip.write_to(&path) {
            Ok(()) => {
                debug!("💾 Archived {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Failed to archive {}: {}", path.display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::ClipEncoding;

    #[test]
    fn stores_pcm_as_wav_with_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ClipArchive::new(dir.path().join("audio_files")).unwrap();
        let clip = AudioClip::from_samples(&[0.1; 160], 16000);

        let path = archive.store(ClipKind::Interrupt, &clip).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("interrupt_"));
        assert!(name.ends_with(".wav"));

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.len(), 160);
    }

    #[test]
    fn mp3_is_written_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ClipArchive::new(dir.path()).unwrap();
        let clip = AudioClip::encoded(vec![1, 2, 3], ClipEncoding::Mp3, 24000, 1);
        let path = archive.store(ClipKind::Assistant, &clip).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn disabled_settings_give_no_archive() {
        let settings = ArchiveSettings {
            enabled: false,
            dir: PathBuf::from("unused"),
        };
        assert!(ClipArchive::from_settings(&settings).is_none());
    }

    #[test]
    fn empty_clip_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ClipArchive::new(dir.path()).unwrap();
        assert!(archive.store(ClipKind::User, &AudioClip::from_samples(&[], 16000)).is_none());
    }
}
