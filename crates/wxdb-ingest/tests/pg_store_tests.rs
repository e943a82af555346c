//! Ledger, queue and sink against a real PostgreSQL
//!
//! These tests start a container and are marked with #[ignore]. Run them with:
//!
//! ```bash
//! cargo test --test pg_store_tests -- --ignored --nocapture
//! ```

use anyhow::Result;
use serial_test::serial;
use sqlx::postgres::PgPoolOptions;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::info;
use wxdb_ingest::ledger::{ChangeLedger, PgLedger};
use wxdb_ingest::queue::{FileQueue, PgFileQueue, PushOutcome};
use wxdb_ingest::decoder::{Decoded, FieldValue, Record};
use wxdb_ingest::sink::{RecordSink, SinkError, SinkWriter, BATCH_SIZE};
use wxdb_ingest::Feed;

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,wxdb_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

struct StoreTestEnv {
    _postgres_container: ContainerAsync<Postgres>,
    db_pool: sqlx::PgPool,
}

impl StoreTestEnv {
    async fn new() -> Result<Self> {
        let postgres_container = Postgres::default().with_tag("16-alpine").start().await?;

        let host = postgres_container.get_host().await?;
        let port = postgres_container.get_host_port_ipv4(5432).await?;
        let conn_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        info!("PostgreSQL connection: {}", conn_string);

        let db_pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&conn_string)
            .await?;

        sqlx::migrate!("../../migrations").run(&db_pool).await?;

        Ok(Self {
            _postgres_container: postgres_container,
            db_pool,
        })
    }

    fn pool(&self) -> sqlx::PgPool {
        self.db_pool.clone()
    }
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_ledger_upsert() -> Result<()> {
    init_tracing();
    let env = StoreTestEnv::new().await?;
    let ledger = PgLedger::new(env.pool());

    let key = "/pub/data/gsod/2023/010010-99999-2023.op.gz";
    assert_eq!(ledger.get(key).await?, None);

    ledger.set(key, "2023-05-01T10:00:00").await?;
    assert_eq!(ledger.get(key).await?.as_deref(), Some("2023-05-01T10:00:00"));

    ledger.set(key, "2023-06-01T10:00:00").await?;
    assert_eq!(ledger.get(key).await?.as_deref(), Some("2023-06-01T10:00:00"));

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM harvest_ledger")
        .fetch_one(&env.pool())
        .await?;
    assert_eq!(rows, 1);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_queue_bound_and_order() -> Result<()> {
    init_tracing();
    let env = StoreTestEnv::new().await?;
    let queue = PgFileQueue::new(env.pool(), "file_queue", 2);
    let other = PgFileQueue::new(env.pool(), "space_weather_queue", 2);

    assert_eq!(queue.push("/data/a.op").await?, PushOutcome::Accepted { depth: 1 });
    assert_eq!(queue.push("/data/b.op").await?, PushOutcome::Accepted { depth: 2 });
    assert_eq!(queue.push("/data/c.op").await?, PushOutcome::Rejected { depth: 2 });

    // Queues are independent
    assert_eq!(other.push("/data/x.json").await?, PushOutcome::Accepted { depth: 1 });
    assert_eq!(queue.depth().await?, 2);

    let short = Duration::from_millis(100);
    assert_eq!(queue.pop(short).await?.as_deref(), Some("/data/a.op"));
    assert_eq!(queue.pop(short).await?.as_deref(), Some("/data/b.op"));
    assert_eq!(queue.pop(short).await?, None);
    assert_eq!(other.depth().await?, 1);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_concurrent_producers_respect_cap() -> Result<()> {
    init_tracing();
    let env = StoreTestEnv::new().await?;
    let queue = Arc::new(PgFileQueue::new(env.pool(), "file_queue", 3));

    let mut handles = Vec::new();
    for i in 0..10 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move { queue.push(&format!("/data/{}.op", i)).await }));
    }

    let mut accepted = 0;
    for handle in handles {
        if let PushOutcome::Accepted { .. } = handle.await?? {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 3);
    assert_eq!(queue.depth().await?, 3);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_concurrent_consumers_never_share_a_path() -> Result<()> {
    init_tracing();
    let env = StoreTestEnv::new().await?;
    let queue = Arc::new(PgFileQueue::new(env.pool(), "file_queue", 20));
    for i in 0..20 {
        queue.push(&format!("/data/{}.op", i)).await?;
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let mut got = Vec::new();
            while let Some(path) = queue.pop(Duration::from_millis(100)).await? {
                got.push(path);
            }
            anyhow::Ok(got)
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for path in handle.await?? {
            assert!(seen.insert(path.clone()), "{} delivered twice", path);
        }
    }
    assert_eq!(seen.len(), 20);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_sink_writes_table_and_audit() -> Result<()> {
    init_tracing();
    let env = StoreTestEnv::new().await?;
    let dir = tempfile::tempdir()?;
    let audit = dir.path().join("gsod.csv");
    let sink = SinkWriter::new(env.pool(), &audit);

    let text = "STN--- WBAN YEARMODA TEMP   MAX\n\
                010010 9999 20230115 32.0   212\n\
                010020 9999 2023011x        50*\n";
    let decoded = Feed::Gsod.decode(text)?;
    assert_eq!(sink.write(&decoded, Feed::Gsod).await?, 2);

    let rows: Vec<(String, Option<chrono::NaiveDate>, Option<f64>, Option<f64>)> = sqlx::query_as(
        "SELECT stn, yearmoda, temp, max_temp FROM station_daily_summaries ORDER BY stn",
    )
    .fetch_all(&env.pool())
    .await?;

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0, "010010");
    assert_eq!(rows[0].1, chrono::NaiveDate::from_ymd_opt(2023, 1, 15));
    assert_eq!(rows[0].2, Some(0.0));
    assert_eq!(rows[0].3, Some(100.0));
    // invalid date and blank value are stored as NULL
    assert_eq!(rows[1].1, None);
    assert_eq!(rows[1].2, None);

    let contents = std::fs::read_to_string(&audit)?;
    let mut lines = contents.lines();
    assert_eq!(lines.next(), Some("STN---;WBAN;YEARMODA;TEMP;MAX;station_id"));
    assert_eq!(lines.next(), Some("010010;9999;2023-01-15T00:00:00;0;100;010010-9999"));
    assert_eq!(lines.next(), Some("010020;9999;invalid-date:2023011x;;10;010020-9999"));
    Ok(())
}

async fn summary_rows(pool: &sqlx::PgPool) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM station_daily_summaries")
        .fetch_one(pool)
        .await?)
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_sink_audit_failure_commits_nothing() -> Result<()> {
    init_tracing();
    let env = StoreTestEnv::new().await?;
    let dir = tempfile::tempdir()?;
    let audit = dir.path().join("gsod.csv");
    std::fs::write(&audit, "OTHER;HEADER\n")?;
    let sink = SinkWriter::new(env.pool(), &audit);

    let decoded = Feed::Gsod.decode("STN--- WBAN YEARMODA TEMP\n010010 9999 20230115 32.0\n")?;

    // Every retry fails the same way and must not add rows
    for _ in 0..3 {
        let err = sink.write(&decoded, Feed::Gsod).await.unwrap_err();
        assert!(matches!(err, SinkError::SchemaMismatch { .. }), "{}", err);
    }

    assert_eq!(summary_rows(&env.pool()).await?, 0);
    assert_eq!(std::fs::read_to_string(&audit)?, "OTHER;HEADER\n");
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_sink_failing_later_chunk_commits_nothing() -> Result<()> {
    init_tracing();
    let env = StoreTestEnv::new().await?;
    sqlx::query(
        "ALTER TABLE station_daily_summaries ADD CONSTRAINT stn_not_rejected CHECK (stn <> 'REJECT')",
    )
    .execute(&env.pool())
    .await?;

    let dir = tempfile::tempdir()?;
    let audit = dir.path().join("gsod.csv");
    let sink = SinkWriter::new(env.pool(), &audit);

    // First chunk is valid; the last record lands in the second chunk
    let total = BATCH_SIZE + 1;
    let records = (0..total)
        .map(|i| {
            let stn = if i == total - 1 { "REJECT".to_string() } else { format!("{:06}", i) };
            let mut record = Record::new();
            record.push("STN---", FieldValue::Text(stn));
            record.push("WBAN", FieldValue::Text("9999".into()));
            record
        })
        .collect();
    let decoded = Decoded {
        records,
        field_names: vec!["STN---".to_string(), "WBAN".to_string()],
    };

    let err = sink.write(&decoded, Feed::Gsod).await.unwrap_err();
    assert!(matches!(err, SinkError::Database(_)), "{}", err);

    assert_eq!(summary_rows(&env.pool()).await?, 0);
    assert!(!audit.exists());
    Ok(())
}
