//! Harvester: polls a remote archive and hands changed items to the parser
//!
//! One cycle walks every selected partition and, for each item:
//!
//! 1. asks the [`ItemFilter`]; excluded items are skipped before any remote call
//! 2. fetches the item's change token and compares it with the ledger
//! 3. downloads, unpacks and writes the payload under the data directory
//! 4. pushes the local path onto the queue
//! 5. records the token in the ledger, only once the queue accepted the path
//!
//! An item that is dropped or fails anywhere leaves the ledger untouched, so
//! the next cycle tries it again. Remote calls go through the shared
//! [`RetryPolicy`]; a connection-limit signal drops the session before the
//! cooldown.

use anyhow::{Context, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wxdb_common::checksum::short_digest;

use crate::decompression::unpack;
use crate::filter::ItemFilter;
use crate::ledger::ChangeLedger;
use crate::queue::{enqueue, Enqueued, FileQueue, QueueFullPolicy};
use crate::remote::{RemoteError, RemoteItem, RemoteSource};
use crate::retry::{RetryClass, RetryError, RetryPolicy};

/// Knobs of a harvester, independent of the remote
#[derive(Debug, Clone)]
pub struct HarvestOptions {
    pub data_dir: PathBuf,
    /// Only items whose names end with this are harvested
    pub item_suffix: String,
    /// Partitions are years: keep all-digit names, sorted numerically
    pub numeric_partitions: bool,
    /// Skip numeric partitions before this one
    pub start_partition: Option<u32>,
    /// Pause after each item that touched the remote
    pub pacing: Duration,
    /// Pause between cycles
    pub poll_interval: Duration,
    pub queue_full_policy: QueueFullPolicy,
}

impl HarvestOptions {
    pub fn new(data_dir: impl Into<PathBuf>, item_suffix: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            item_suffix: item_suffix.into(),
            numeric_partitions: true,
            start_partition: None,
            pacing: Duration::from_secs(1),
            poll_interval: Duration::from_secs(600),
            queue_full_policy: QueueFullPolicy::Wait,
        }
    }
}

/// Counters for one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub partitions: usize,
    pub failed_partitions: usize,
    pub filtered: usize,
    pub unchanged: usize,
    pub enqueued: usize,
    pub dropped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Filtered,
    Unchanged,
    Enqueued,
    Dropped,
    Failed,
    Cancelled,
}

pub struct Harvester {
    source: Arc<dyn RemoteSource>,
    ledger: Arc<dyn ChangeLedger>,
    queue: Arc<dyn FileQueue>,
    filter: Arc<dyn ItemFilter>,
    retry: RetryPolicy,
    options: HarvestOptions,
    cancel: CancellationToken,
}

impl Harvester {
    pub fn new(
        source: Arc<dyn RemoteSource>,
        ledger: Arc<dyn ChangeLedger>,
        queue: Arc<dyn FileQueue>,
        filter: Arc<dyn ItemFilter>,
        retry: RetryPolicy,
        options: HarvestOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            ledger,
            queue,
            filter,
            retry: retry.with_cancellation(cancel.clone()),
            options,
            cancel,
        }
    }

    /// Run cycles until cancelled. A failed cycle is logged and retried after
    /// the poll interval.
    pub async fn run(&self) -> Result<()> {
        info!(source = %self.source.describe(), "Harvester started");

        while !self.cancel.is_cancelled() {
            match self.run_cycle().await {
                Ok(stats) => info!(
                    partitions = stats.partitions,
                    enqueued = stats.enqueued,
                    unchanged = stats.unchanged,
                    filtered = stats.filtered,
                    dropped = stats.dropped,
                    failed = stats.failed,
                    "Harvest cycle finished"
                ),
                Err(e) => error!("Harvest cycle failed: {:#}", e),
            }

            if !self.pause(self.options.poll_interval).await {
                break;
            }
        }

        info!("Harvester stopped");
        Ok(())
    }

    /// One pass over the archive. The session is closed on every exit path.
    pub async fn run_cycle(&self) -> Result<CycleStats> {
        let mut stats = CycleStats::default();
        let result = self.walk(&mut stats).await;
        self.source.disconnect().await;
        result.map(|_| stats)
    }

    async fn walk(&self, stats: &mut CycleStats) -> Result<()> {
        self.call("connect", || self.source.connect())
            .await
            .context("Failed to connect to remote source")?;

        let partitions = self
            .call("list partitions", || self.source.list_partitions())
            .await
            .context("Failed to list partitions")?;
        let partitions = select_partitions(
            partitions,
            self.options.numeric_partitions,
            self.options.start_partition,
        );
        debug!(count = partitions.len(), "Selected partitions");

        for partition in partitions {
            if self.cancel.is_cancelled() {
                break;
            }
            stats.partitions += 1;

            let items = match self
                .call("list items", || self.source.list_items(&partition))
                .await
            {
                Ok(items) => items,
                Err(e) => {
                    warn!(partition = %partition, "Skipping partition: {}", e);
                    stats.failed_partitions += 1;
                    continue;
                },
            };

            let mut names: Vec<String> = items
                .into_iter()
                .filter(|name| name.ends_with(&self.options.item_suffix))
                .collect();
            names.sort();
            info!(partition = %partition, items = names.len(), "Harvesting partition");

            for name in names {
                if self.cancel.is_cancelled() {
                    return Ok(());
                }

                let item = RemoteItem::new(partition.clone(), name);
                match self.harvest_item(&item).await? {
                    ItemOutcome::Filtered => {
                        stats.filtered += 1;
                        continue;
                    },
                    ItemOutcome::Unchanged => stats.unchanged += 1,
                    ItemOutcome::Enqueued => stats.enqueued += 1,
                    ItemOutcome::Dropped => stats.dropped += 1,
                    ItemOutcome::Failed => stats.failed += 1,
                    ItemOutcome::Cancelled => return Ok(()),
                }

                if !self.pause(self.options.pacing).await {
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    /// Errors returned here are store or local-disk failures; remote failures
    /// only skip the item
    async fn harvest_item(&self, item: &RemoteItem) -> Result<ItemOutcome> {
        if !self.filter.is_allowed(item) {
            debug!(item = %item.path(), "Excluded by filter");
            return Ok(ItemOutcome::Filtered);
        }

        let key = item.ledger_key(self.source.base_dir());

        let token = match self.call("fetch change token", || self.source.change_token(item)).await {
            Ok(token) => token,
            Err(e) => {
                warn!(item = %item.path(), "Skipping item: {}", e);
                return Ok(ItemOutcome::Failed);
            },
        };

        if self.ledger.get(&key).await?.as_deref() == Some(token.as_str()) {
            debug!(item = %item.path(), "Unchanged");
            return Ok(ItemOutcome::Unchanged);
        }

        let payload = match self.call("download", || self.source.fetch(item)).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(item = %item.path(), "Skipping item: {}", e);
                return Ok(ItemOutcome::Failed);
            },
        };

        let (local_name, data) = match unpack(&item.name, payload) {
            Ok(unpacked) => unpacked,
            Err(e) => {
                warn!(item = %item.path(), "Skipping item: {:#}", e);
                return Ok(ItemOutcome::Failed);
            },
        };

        let path = local_path(&self.options.data_dir, &item.partition, &local_name, &token);
        write_file(&path, &data).await?;
        let path_str = path.to_string_lossy().to_string();

        match enqueue(
            self.queue.as_ref(),
            &path_str,
            self.options.queue_full_policy,
            &self.cancel,
        )
        .await?
        {
            Enqueued::Accepted { depth } => {
                self.ledger.set(&key, &token).await?;
                info!(item = %item.path(), token = %token, depth, "Queued {}", path_str);
                Ok(ItemOutcome::Enqueued)
            },
            Enqueued::Dropped { .. } => {
                discard(&path).await;
                Ok(ItemOutcome::Dropped)
            },
            Enqueued::Cancelled => {
                discard(&path).await;
                Ok(ItemOutcome::Cancelled)
            },
        }
    }

    /// Remote call through the retry policy; a cooldown closes the session
    async fn call<T, Op, Fut>(&self, label: &str, op: Op) -> Result<T, RetryError<RemoteError>>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let source = &self.source;
        self.retry
            .run(label, op, RemoteError::retry_class, |class| async move {
                if class == RetryClass::RetryAfterCooldown {
                    source.disconnect().await;
                }
            })
            .await
    }

    /// Sleep unless cancelled; false when cancelled
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

/// Partitions to harvest, in harvest order
pub fn select_partitions(partitions: Vec<String>, numeric: bool, start: Option<u32>) -> Vec<String> {
    if !numeric {
        let mut partitions = partitions;
        partitions.sort();
        return partitions;
    }

    let mut years: Vec<(u32, String)> = partitions
        .into_iter()
        .filter(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|p| p.parse::<u32>().ok().map(|year| (year, p)))
        .filter(|(year, _)| start.is_none_or(|start| *year >= start))
        .collect();
    years.sort();
    years.into_iter().map(|(_, p)| p).collect()
}

/// `data_dir/<partition>/<stem>.<token-digest>.<ext>`; the digest keeps two
/// versions of one item apart while the older one is still queued
pub fn local_path(data_dir: &Path, partition: &str, name: &str, token: &str) -> PathBuf {
    let digest = short_digest(token);
    let file_name = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}.{}.{}", stem, digest, ext),
        _ => format!("{}.{}", name, digest),
    };
    let path = data_dir.join(partition).join(file_name);
    std::path::absolute(&path).unwrap_or(path)
}

async fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, data)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), "Failed to remove unqueued file: {}", e);
    }
}
