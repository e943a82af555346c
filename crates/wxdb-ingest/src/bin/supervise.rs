//! WXDB Supervisor - runs and restarts the harvester and parser processes

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use wxdb_common::logging::{init_logging, LogConfig};
use wxdb_ingest::shutdown;
use wxdb_ingest::supervisor::{Mode, Supervisor};

#[derive(Parser, Debug)]
#[command(name = "wxdb-supervise")]
#[command(author, version, about = "Keep the WXDB pipeline processes running")]
struct Cli {
    /// Which pipelines to run
    #[arg(value_enum)]
    mode: Mode,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _guard = init_logging(&LogConfig::from_env("supervisor")?)?;

    let exe = std::env::current_exe().context("Failed to locate the supervisor binary")?;
    let bin_dir = exe
        .parent()
        .context("Supervisor binary has no parent directory")?
        .to_path_buf();

    let specs = cli.mode.specs(&bin_dir);
    info!(mode = ?cli.mode, processes = specs.len(), "Starting supervisor");

    Supervisor::new(specs).run(shutdown::cancel_on_shutdown()).await
}
