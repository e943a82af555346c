//! WXDB Harvester - polls a remote archive and queues changed items

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use wxdb_common::logging::{init_logging, LogConfig};
use wxdb_ingest::filter::{load_filter, AllowAll, ItemFilter};
use wxdb_ingest::ledger::PgLedger;
use wxdb_ingest::queue::PgFileQueue;
use wxdb_ingest::remote::{FtpArchive, HttpFeed, RemoteSource};
use wxdb_ingest::{db, shutdown, Config, Feed, HarvestOptions, Harvester};

#[derive(Parser, Debug)]
#[command(name = "wxdb-harvest")]
#[command(author, version, about = "Harvest changed items into the parse queue")]
struct Cli {
    /// Feed to harvest
    #[arg(long, value_enum, default_value_t = Feed::Gsod)]
    feed: Feed,

    /// First year to harvest; overrides WXDB_START_YEAR
    start_year: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _guard = init_logging(&LogConfig::from_env("harvester")?)?;

    let mut config = Config::from_env(cli.feed)?;
    if cli.start_year.is_some() {
        config.start_year = cli.start_year;
    }
    info!(feed = %config.feed, start_year = ?config.start_year, "Configuration loaded");

    let source: Arc<dyn RemoteSource> = match config.feed {
        Feed::Gsod => {
            let settings = config.ftp.clone().context("FTP settings missing for the gsod feed")?;
            Arc::new(FtpArchive::new(settings))
        },
        Feed::SpaceWeather => Arc::new(HttpFeed::new(config.space_weather_url.clone())?),
    };

    let filter: Arc<dyn ItemFilter> = match config.feed {
        Feed::Gsod => Arc::from(load_filter(config.allow_list.as_deref())?),
        Feed::SpaceWeather => Arc::new(AllowAll),
    };

    let pool = db::connect(&config.database_url, config.db_max_connections).await?;
    let ledger = Arc::new(PgLedger::new(pool.clone()));
    let queue = Arc::new(PgFileQueue::new(pool, config.feed.queue_name(), config.queue_max_depth));

    let options = HarvestOptions {
        data_dir: config.data_dir.clone(),
        item_suffix: config.feed.item_suffix().to_string(),
        numeric_partitions: config.feed.numeric_partitions(),
        start_partition: config.start_year,
        pacing: config.download_pause,
        poll_interval: config.poll_interval,
        queue_full_policy: config.queue_full_policy,
    };

    let harvester = Harvester::new(
        source,
        ledger,
        queue,
        filter,
        config.retry.clone(),
        options,
        shutdown::cancel_on_shutdown(),
    );
    harvester.run().await
}
