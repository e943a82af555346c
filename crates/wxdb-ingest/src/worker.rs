//! Parser worker: drains the queue into the sink
//!
//! The worker owns every path it pops. A stored file is deleted. A file that
//! cannot be decoded at all is renamed to `<path>.rejected` and never retried.
//! A file whose batch could not be persisted stays on disk and on an in-memory
//! retry list that is worked off before the next pop.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::feed::Feed;
use crate::queue::FileQueue;
use crate::sink::RecordSink;

pub const REJECTED_SUFFIX: &str = ".rejected";

/// What happened to one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Stored { records: usize },
    /// Renamed to the returned path
    Rejected { moved_to: PathBuf },
    /// Gone before it could be read
    Missing,
    /// Kept for a later attempt
    Deferred,
}

pub struct ParserWorker {
    queue: Arc<dyn FileQueue>,
    sink: Arc<dyn RecordSink>,
    feed: Feed,
    idle_sleep: Duration,
    pop_timeout: Duration,
    cancel: CancellationToken,
    pending: Vec<PathBuf>,
}

impl ParserWorker {
    pub fn new(
        queue: Arc<dyn FileQueue>,
        sink: Arc<dyn RecordSink>,
        feed: Feed,
        idle_sleep: Duration,
        pop_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue,
            sink,
            feed,
            idle_sleep,
            pop_timeout,
            cancel,
            pending: Vec::new(),
        }
    }

    /// Paths waiting for another persistence attempt
    pub fn pending(&self) -> &[PathBuf] {
        &self.pending
    }

    pub async fn run(&mut self) -> Result<()> {
        info!(feed = %self.feed, queue = self.queue.name(), "Parser worker started");

        while !self.cancel.is_cancelled() {
            let idle = match self.run_once().await {
                Ok(Some(FileOutcome::Deferred)) | Ok(None) => true,
                Ok(Some(_)) => false,
                Err(e) => {
                    error!("Failed to read from queue: {:#}", e);
                    true
                },
            };

            if idle {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.idle_sleep) => {},
                }
            }
        }

        if !self.pending.is_empty() {
            warn!(
                count = self.pending.len(),
                "Stopping with unpersisted files left on disk: {:?}",
                self.pending
            );
        }
        info!("Parser worker stopped");
        Ok(())
    }

    /// Retry the pending list, then handle at most one queued path. Returns
    /// the outcome of the popped path, or `None` when the queue stayed empty.
    pub async fn run_once(&mut self) -> Result<Option<FileOutcome>> {
        if !self.pending.is_empty() {
            let retry: Vec<PathBuf> = std::mem::take(&mut self.pending);
            for path in retry {
                if self.process(&path).await == FileOutcome::Deferred {
                    self.pending.push(path);
                }
            }
            if !self.pending.is_empty() {
                return Ok(Some(FileOutcome::Deferred));
            }
        }

        let Some(path) = self.queue.pop(self.pop_timeout).await? else {
            debug!(queue = self.queue.name(), "Queue empty");
            return Ok(None);
        };

        let path = PathBuf::from(path);
        let outcome = self.process(&path).await;
        if outcome == FileOutcome::Deferred {
            self.pending.push(path);
        }
        Ok(Some(outcome))
    }

    /// Decode and persist one file
    pub async fn process(&self, path: &Path) -> FileOutcome {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "File vanished before it could be parsed");
                return FileOutcome::Missing;
            },
            Err(e) => {
                error!(path = %path.display(), "Failed to read file: {}", e);
                return FileOutcome::Deferred;
            },
        };

        let text = String::from_utf8_lossy(&bytes);
        let decoded = match self.feed.decode(&text) {
            Ok(decoded) => decoded,
            Err(e) => {
                error!(path = %path.display(), "Rejecting undecodable file: {}", e);
                return reject(path).await;
            },
        };

        match self.sink.write(&decoded, self.feed).await {
            Ok(records) => {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    warn!(path = %path.display(), "Failed to delete parsed file: {}", e);
                }
                info!(path = %path.display(), records, "Parsed file");
                FileOutcome::Stored { records }
            },
            Err(e) => {
                error!(path = %path.display(), "Failed to persist records, keeping file: {}", e);
                FileOutcome::Deferred
            },
        }
    }
}

async fn reject(path: &Path) -> FileOutcome {
    let mut moved_to = path.as_os_str().to_owned();
    moved_to.push(REJECTED_SUFFIX);
    let moved_to = PathBuf::from(moved_to);

    if let Err(e) = tokio::fs::rename(path, &moved_to).await {
        warn!(path = %path.display(), "Failed to rename rejected file: {}", e);
    }
    FileOutcome::Rejected { moved_to }
}
