//! WXDB Parser - drains the parse queue into the database and audit file

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use wxdb_common::logging::{init_logging, LogConfig};
use wxdb_ingest::queue::PgFileQueue;
use wxdb_ingest::sink::SinkWriter;
use wxdb_ingest::{db, shutdown, Config, Feed, ParserWorker};

#[derive(Parser, Debug)]
#[command(name = "wxdb-parse")]
#[command(author, version, about = "Parse queued files into the database")]
struct Cli {
    /// Feed whose queue to drain
    #[arg(long, value_enum, default_value_t = Feed::Gsod)]
    feed: Feed,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _guard = init_logging(&LogConfig::from_env("parser")?)?;

    let config = Config::from_env(cli.feed)?;
    info!(feed = %config.feed, audit = %config.audit_csv.display(), "Configuration loaded");

    let pool = db::connect(&config.database_url, config.db_max_connections).await?;
    let queue = Arc::new(PgFileQueue::new(
        pool.clone(),
        config.feed.queue_name(),
        config.queue_max_depth,
    ));
    let sink = Arc::new(SinkWriter::new(pool, config.audit_csv.clone()));

    let mut worker = ParserWorker::new(
        queue,
        sink,
        config.feed,
        config.parser_sleep,
        config.pop_timeout,
        shutdown::cancel_on_shutdown(),
    );
    worker.run().await
}
