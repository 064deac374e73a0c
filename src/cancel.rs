use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::warn;

/// Set once by the Ctrl-C handler, polled between tiles, files and
/// download chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn install_ctrlc_handler(&self) -> Result<(), ctrlc::Error> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            warn!("Interrupt received, stopping after the current chunk...");
            token.cancel();
        })
    }
}
