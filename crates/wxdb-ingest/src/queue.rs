//! Bounded FIFO of local file paths between harvester and parser
//!
//! The depth cap is the system's backpressure: a harvester that finds the
//! queue full either waits for a consumer ([`QueueFullPolicy::Wait`]) or drops
//! the item ([`QueueFullPolicy::Drop`]) and picks it up again next cycle.
//!
//! [`PgFileQueue`] keeps the entries in Postgres so separate processes can
//! share them:
//!
//! - push takes a transaction-scoped advisory lock keyed by the queue name,
//!   so the depth check and the insert cannot interleave with another producer
//! - pop deletes the oldest row with `FOR UPDATE SKIP LOCKED`, so two
//!   consumers never receive the same path

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Default depth cap
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// Queue name used by the GSOD pipeline
pub const GSOD_QUEUE: &str = "file_queue";

/// Queue name used by the space-weather pipeline
pub const SPACE_WEATHER_QUEUE: &str = "space_weather_queue";

/// How often a blocked producer or an idle Postgres consumer re-checks
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Result of a single push attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted { depth: usize },
    /// The queue was at its cap; nothing was stored
    Rejected { depth: usize },
}

#[async_trait]
pub trait FileQueue: Send + Sync {
    fn name(&self) -> &str;

    fn max_depth(&self) -> usize;

    async fn push(&self, path: &str) -> Result<PushOutcome>;

    /// Oldest path, waiting up to `timeout` for one to arrive
    async fn pop(&self, timeout: Duration) -> Result<Option<String>>;

    async fn depth(&self) -> Result<usize>;
}

/// What the producer does when the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueFullPolicy {
    #[default]
    Wait,
    Drop,
}

impl FromStr for QueueFullPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "wait" | "block" => Ok(QueueFullPolicy::Wait),
            "drop" => Ok(QueueFullPolicy::Drop),
            other => Err(anyhow::anyhow!("Invalid queue-full policy: {}", other)),
        }
    }
}

/// Final outcome of [`enqueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Accepted { depth: usize },
    Dropped { depth: usize },
    /// Cancelled while waiting for room
    Cancelled,
}

/// Push `path`, applying `policy` when the queue is full
pub async fn enqueue(
    queue: &dyn FileQueue,
    path: &str,
    policy: QueueFullPolicy,
    cancel: &CancellationToken,
) -> Result<Enqueued> {
    let mut logged_wait = false;

    loop {
        match queue.push(path).await? {
            PushOutcome::Accepted { depth } => return Ok(Enqueued::Accepted { depth }),
            PushOutcome::Rejected { depth } => match policy {
                QueueFullPolicy::Drop => {
                    error!(
                        queue = queue.name(),
                        depth,
                        path = %path,
                        "Queue full, dropping item; it will be harvested again next cycle"
                    );
                    return Ok(Enqueued::Dropped { depth });
                },
                QueueFullPolicy::Wait => {
                    if !logged_wait {
                        debug!(queue = queue.name(), depth, "Queue full, waiting for the parser");
                        logged_wait = true;
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(Enqueued::Cancelled),
                        _ = tokio::time::sleep(POLL_INTERVAL) => {},
                    }
                },
            },
        }
    }
}

/// Queue stored in the `file_queue` table
#[derive(Clone)]
pub struct PgFileQueue {
    pool: PgPool,
    name: String,
    max_depth: usize,
}

impl PgFileQueue {
    pub fn new(pool: PgPool, name: impl Into<String>, max_depth: usize) -> Self {
        Self {
            pool,
            name: name.into(),
            max_depth,
        }
    }

    async fn try_pop(&self) -> Result<Option<String>> {
        let path: Option<String> = sqlx::query_scalar(
            r#"
            DELETE FROM file_queue
            WHERE id = (
                SELECT id FROM file_queue
                WHERE queue_name = $1
                ORDER BY id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING path
            "#,
        )
        .bind(&self.name)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to pop from queue {}", self.name))?;

        Ok(path)
    }
}

#[async_trait]
impl FileQueue for PgFileQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_depth(&self) -> usize {
        self.max_depth
    }

    async fn push(&self, path: &str) -> Result<PushOutcome> {
        let mut tx = self.pool.begin().await.context("Failed to start queue transaction")?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&self.name)
            .execute(&mut *tx)
            .await
            .context("Failed to lock queue")?;

        let depth: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM file_queue WHERE queue_name = $1")
            .bind(&self.name)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to read queue depth")?;
        let depth = depth.max(0) as usize;

        if depth >= self.max_depth {
            tx.rollback().await.context("Failed to release queue lock")?;
            return Ok(PushOutcome::Rejected { depth });
        }

        sqlx::query("INSERT INTO file_queue (queue_name, path) VALUES ($1, $2)")
            .bind(&self.name)
            .bind(path)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to push {} onto queue {}", path, self.name))?;

        tx.commit().await.context("Failed to commit queue push")?;

        Ok(PushOutcome::Accepted { depth: depth + 1 })
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(path) = self.try_pop().await? {
                return Ok(Some(path));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn depth(&self) -> Result<usize> {
        let depth: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM file_queue WHERE queue_name = $1")
            .bind(&self.name)
            .fetch_one(&self.pool)
            .await
            .context("Failed to read queue depth")?;
        Ok(depth.max(0) as usize)
    }
}

/// Process-local queue
#[derive(Debug)]
pub struct MemoryQueue {
    name: String,
    max_depth: usize,
    entries: Mutex<VecDeque<String>>,
    arrived: Notify,
}

impl MemoryQueue {
    pub fn new(max_depth: usize) -> Self {
        Self {
            name: "memory".to_string(),
            max_depth,
            entries: Mutex::new(VecDeque::new()),
            arrived: Notify::new(),
        }
    }

    /// Current contents, oldest first
    pub fn snapshot(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, VecDeque<String>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("queue lock poisoned"))
    }
}

#[async_trait]
impl FileQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_depth(&self) -> usize {
        self.max_depth
    }

    async fn push(&self, path: &str) -> Result<PushOutcome> {
        let depth = {
            let mut entries = self.lock()?;
            if entries.len() >= self.max_depth {
                return Ok(PushOutcome::Rejected { depth: entries.len() });
            }
            entries.push_back(path.to_string());
            entries.len()
        };
        self.arrived.notify_one();
        Ok(PushOutcome::Accepted { depth })
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            let next = self.lock()?.pop_front();
            if next.is_some() {
                return Ok(next);
            }
            if tokio::time::timeout_at(deadline, self.arrived.notified()).await.is_err() {
                let last_chance = self.lock()?.pop_front();
                return Ok(last_chance);
            }
        }
    }

    async fn depth(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }
}
