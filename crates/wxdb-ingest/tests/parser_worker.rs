//! Parser worker behaviour with an in-memory queue and a recording sink

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wxdb_ingest::decoder::{Decoded, FieldValue};
use wxdb_ingest::queue::{FileQueue, MemoryQueue};
use wxdb_ingest::sink::{RecordSink, SinkError};
use wxdb_ingest::{Feed, FileOutcome, ParserWorker};

const GSOD_TEXT: &str = "STN--- WBAN YEARMODA TEMP\n010010 9999 20230115 32.0\n";

const SPACE_WEATHER_JSON: &str = r#"{
    "xray": {"ball": 2, "time": "2024-05-01 12:00:00", "description": "moderate"}
}"#;

/// Sink that keeps every batch and can be told to fail
#[derive(Default)]
struct RecordingSink {
    batches: Mutex<Vec<(Feed, Decoded)>>,
    failing: AtomicBool,
}

impl RecordingSink {
    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn batches(&self) -> Vec<(Feed, Decoded)> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordSink for RecordingSink {
    async fn write(&self, decoded: &Decoded, feed: Feed) -> Result<usize, SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Io(std::io::Error::other("store unavailable")));
        }
        self.batches.lock().unwrap().push((feed, decoded.clone()));
        Ok(decoded.records.len())
    }
}

struct Rig {
    queue: Arc<MemoryQueue>,
    sink: Arc<RecordingSink>,
    dir: tempfile::TempDir,
    cancel: CancellationToken,
}

impl Rig {
    fn new() -> Self {
        Self {
            queue: Arc::new(MemoryQueue::new(10)),
            sink: Arc::new(RecordingSink::default()),
            dir: tempfile::tempdir().unwrap(),
            cancel: CancellationToken::new(),
        }
    }

    fn worker(&self, feed: Feed) -> ParserWorker {
        ParserWorker::new(
            self.queue.clone(),
            self.sink.clone(),
            feed,
            Duration::from_millis(10),
            Duration::from_millis(10),
            self.cancel.clone(),
        )
    }

    async fn queue_file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        self.queue.push(&path.to_string_lossy()).await.unwrap();
        path
    }
}

fn rejected_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.rejected", path.display()))
}

#[tokio::test]
async fn test_stored_file_is_deleted() -> Result<()> {
    let rig = Rig::new();
    let path = rig.queue_file("010010-9999-2023.abcd1234.op", GSOD_TEXT).await;
    let mut worker = rig.worker(Feed::Gsod);

    let outcome = worker.run_once().await?;
    assert_eq!(outcome, Some(FileOutcome::Stored { records: 1 }));
    assert!(!path.exists());

    let batches = rig.sink.batches();
    assert_eq!(batches.len(), 1);
    let (feed, decoded) = &batches[0];
    assert_eq!(*feed, Feed::Gsod);
    assert_eq!(
        decoded.field_names,
        vec!["STN---", "WBAN", "YEARMODA", "TEMP", "station_id"]
    );

    let record = &decoded.records[0];
    assert_eq!(record.get("TEMP"), Some(&FieldValue::Number(0.0)));
    assert_eq!(record.get("station_id"), Some(&FieldValue::Text("010010-9999".into())));
    Ok(())
}

#[tokio::test]
async fn test_space_weather_feed_uses_json_decoder() -> Result<()> {
    let rig = Rig::new();
    rig.queue_file("current-space-weather.0a1b2c3d.json", SPACE_WEATHER_JSON).await;
    let mut worker = rig.worker(Feed::SpaceWeather);

    // One record per section, present or not
    let outcome = worker.run_once().await?;
    assert_eq!(outcome, Some(FileOutcome::Stored { records: 3 }));

    let batches = rig.sink.batches();
    let record = &batches[0].1.records[0];
    assert_eq!(record.get("type"), Some(&FieldValue::Text("xray".into())));
    assert_eq!(record.get("value"), Some(&FieldValue::Number(2.0)));
    Ok(())
}

#[tokio::test]
async fn test_undecodable_file_is_renamed() -> Result<()> {
    let rig = Rig::new();
    let path = rig.queue_file("broken.json", "{ not json").await;
    let mut worker = rig.worker(Feed::SpaceWeather);

    let outcome = worker.run_once().await?;
    assert_eq!(
        outcome,
        Some(FileOutcome::Rejected {
            moved_to: rejected_path(&path)
        })
    );
    assert!(!path.exists());
    assert!(rejected_path(&path).exists());
    assert!(rig.sink.batches().is_empty());
    assert!(worker.pending().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_empty_gsod_file_is_rejected() -> Result<()> {
    let rig = Rig::new();
    let path = rig.queue_file("empty.op", "").await;
    let mut worker = rig.worker(Feed::Gsod);

    let outcome = worker.run_once().await?;
    assert!(matches!(outcome, Some(FileOutcome::Rejected { .. })));
    assert!(rejected_path(&path).exists());
    Ok(())
}

#[tokio::test]
async fn test_persistence_failure_keeps_file_for_retry() -> Result<()> {
    let rig = Rig::new();
    let path = rig.queue_file("010010-9999-2023.op", GSOD_TEXT).await;
    let mut worker = rig.worker(Feed::Gsod);

    rig.sink.set_failing(true);
    let outcome = worker.run_once().await?;
    assert_eq!(outcome, Some(FileOutcome::Deferred));
    assert!(path.exists());
    assert_eq!(worker.pending(), &[path.clone()]);

    // Still failing: the pending file is retried and nothing new is popped
    let later = rig.queue_file("010020-9999-2023.op", GSOD_TEXT).await;
    assert_eq!(worker.run_once().await?, Some(FileOutcome::Deferred));
    assert_eq!(rig.queue.depth().await?, 1);

    rig.sink.set_failing(false);
    let outcome = worker.run_once().await?;
    assert_eq!(outcome, Some(FileOutcome::Stored { records: 1 }));
    assert!(!path.exists());
    assert!(!later.exists());
    assert!(worker.pending().is_empty());
    assert_eq!(rig.sink.batches().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_missing_path_is_skipped() -> Result<()> {
    let rig = Rig::new();
    let path = rig.dir.path().join("gone.op");
    rig.queue.push(&path.to_string_lossy()).await?;
    let mut worker = rig.worker(Feed::Gsod);

    assert_eq!(worker.run_once().await?, Some(FileOutcome::Missing));
    assert!(worker.pending().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_empty_queue_yields_nothing() -> Result<()> {
    let rig = Rig::new();
    let mut worker = rig.worker(Feed::Gsod);
    assert_eq!(worker.run_once().await?, None);
    Ok(())
}

#[tokio::test]
async fn test_run_drains_queue_until_cancelled() -> Result<()> {
    let rig = Rig::new();
    let first = rig.queue_file("a.op", GSOD_TEXT).await;
    let second = rig.queue_file("b.op", GSOD_TEXT).await;
    let mut worker = rig.worker(Feed::Gsod);

    let cancel = rig.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
    });

    tokio::time::timeout(Duration::from_secs(5), worker.run()).await??;
    assert!(!first.exists());
    assert!(!second.exists());
    assert_eq!(rig.sink.batches().len(), 2);
    Ok(())
}
