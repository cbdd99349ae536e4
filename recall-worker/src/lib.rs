//! recall-worker - background processing for the archive
//!
//! Three long-lived loops, all cancellation-cooperative via a shared run
//! flag: embedding workers draining `generate_embedding` jobs, transcription
//! workers draining `youtube_transcription` jobs, and the watch-folder
//! poller feeding new export files into the import service.

pub mod embedding;
pub mod transcription;
pub mod watch;

pub use embedding::{EmbeddingWorker, EmbeddingWorkerConfig, WorkerPool};
pub use transcription::TranscriptionWorker;
pub use watch::{WatchFolderService, WatchFolderWorker, WatchScanResult};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cooperative shutdown flag. Signal handlers flip it; loops check
/// it between jobs, so in-flight work finishes before the task exits.
#[derive(Clone)]
pub struct RunFlag(Arc<AtomicBool>);

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl RunFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}
