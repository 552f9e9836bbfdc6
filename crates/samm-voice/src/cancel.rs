//! External abort signal shared between the Ctrl+C handler and the audio loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

/// Cloneable cancellation flag. Once raised it stays raised.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    raised: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}

/// Raise `flag` on Ctrl+C. The signal is awaited on a small dedicated runtime thread so the
/// audio loops stay plain blocking code.
pub fn install_ctrl_c_handler(flag: CancelFlag) -> std::io::Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    thread::Builder::new()
        .name("samm-ctrl-c".to_string())
        .spawn(move || {
            rt.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("⚠️ Ctrl+C received, stopping session");
                        flag.cancel();
                    }
                    Err(e) => warn!("Ctrl+C handler unavailable: {}", e),
                }
            });
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let a = CancelFlag::new();
        let b = a.clone();
        assert!(!b.is_cancelled());
        a.cancel();
        assert!(b.is_cancelled());
    }
}
