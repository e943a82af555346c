//! Keeps the harvester and parser processes running
//!
//! Each [`ProcessSpec`] gets its own restart loop. A child that exits with a
//! non-zero status (or cannot be spawned) is restarted after its backoff
//! delay; a clean exit ends that loop. Cancellation kills every child.

use anyhow::Result;
use clap::ValueEnum;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::feed::Feed;

pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(5);

pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(300);

/// A child that stays up this long starts its failure count afresh
pub const STABLE_UPTIME: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Always wait `restart_delay`
    Fixed,
    /// Double `restart_delay` per consecutive failure, up to `max`
    Exponential { max: Duration },
}

#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub restart_delay: Duration,
    pub backoff: Backoff,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            restart_delay: DEFAULT_RESTART_DELAY,
            backoff: Backoff::Fixed,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay before restart number `failures` (1 = first failure)
    pub fn delay_after(&self, failures: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.restart_delay,
            Backoff::Exponential { max } => {
                let exponent = failures.saturating_sub(1).min(31);
                self.restart_delay
                    .checked_mul(1u32 << exponent)
                    .unwrap_or(max)
                    .min(max)
            },
        }
    }
}

/// Process groups selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// GSOD harvester and parser
    Ftp,
    /// Space-weather harvester and parser
    Ecomonitoring,
    /// Both pipelines
    All,
}

impl Mode {
    pub fn feeds(self) -> &'static [Feed] {
        match self {
            Mode::Ftp => &[Feed::Gsod],
            Mode::Ecomonitoring => &[Feed::SpaceWeather],
            Mode::All => &[Feed::Gsod, Feed::SpaceWeather],
        }
    }

    /// Harvester and parser for each feed, using binaries found in `bin_dir`
    pub fn specs(self, bin_dir: &Path) -> Vec<ProcessSpec> {
        let backoff = Backoff::Exponential {
            max: DEFAULT_MAX_BACKOFF,
        };

        self.feeds()
            .iter()
            .flat_map(|feed| {
                ["wxdb-harvest", "wxdb-parse"].into_iter().map(move |bin| {
                    ProcessSpec::new(format!("{} ({})", bin, feed), bin_dir.join(bin))
                        .arg("--feed")
                        .arg(feed.name())
                        .with_backoff(backoff)
                })
            })
            .collect()
    }
}

pub struct Supervisor {
    specs: Vec<ProcessSpec>,
}

impl Supervisor {
    pub fn new(specs: Vec<ProcessSpec>) -> Self {
        Self { specs }
    }

    /// Run until every child has exited cleanly or `cancel` fires
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let mut tasks = JoinSet::new();
        for spec in self.specs {
            tasks.spawn(keep_running(spec, cancel.clone()));
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Supervisor task failed: {}", e);
            }
        }

        info!("All processes finished");
        Ok(())
    }
}

async fn keep_running(spec: ProcessSpec, cancel: CancellationToken) {
    let mut failures = 0u32;

    while !cancel.is_cancelled() {
        info!(process = %spec.name, program = %spec.program.display(), "Starting process");
        let started = Instant::now();

        let spawned = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                error!(process = %spec.name, "Failed to start process: {}", e);
                failures += 1;
                if !wait_before_restart(&spec, failures, &cancel).await {
                    return;
                }
                continue;
            },
        };

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                info!(process = %spec.name, "Stopping process");
                if let Err(e) = child.kill().await {
                    warn!(process = %spec.name, "Failed to kill process: {}", e);
                }
                return;
            },
            status = child.wait() => status,
        };

        match status {
            Ok(status) if status.success() => {
                info!(process = %spec.name, "Process exited cleanly, not restarting");
                return;
            },
            Ok(status) => warn!(process = %spec.name, %status, "Process exited, restarting"),
            Err(e) => error!(process = %spec.name, "Failed to wait for process: {}", e),
        }

        if started.elapsed() >= STABLE_UPTIME {
            failures = 0;
        }
        failures += 1;
        if !wait_before_restart(&spec, failures, &cancel).await {
            return;
        }
    }
}

/// False when cancelled during the wait
async fn wait_before_restart(spec: &ProcessSpec, failures: u32, cancel: &CancellationToken) -> bool {
    let delay = spec.delay_after(failures);
    info!(process = %spec.name, failures, "Restarting in {:?}", delay);
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff() {
        let spec = ProcessSpec::new("p", "/bin/true").with_restart_delay(Duration::from_secs(5));
        assert_eq!(spec.delay_after(1), Duration::from_secs(5));
        assert_eq!(spec.delay_after(10), Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let spec = ProcessSpec::new("p", "/bin/true")
            .with_restart_delay(Duration::from_secs(5))
            .with_backoff(Backoff::Exponential {
                max: Duration::from_secs(60),
            });

        assert_eq!(spec.delay_after(1), Duration::from_secs(5));
        assert_eq!(spec.delay_after(2), Duration::from_secs(10));
        assert_eq!(spec.delay_after(4), Duration::from_secs(40));
        assert_eq!(spec.delay_after(5), Duration::from_secs(60));
        assert_eq!(spec.delay_after(100), Duration::from_secs(60));
    }

    #[test]
    fn test_mode_specs() {
        let specs = Mode::All.specs(Path::new("/opt/wxdb/bin"));
        assert_eq!(specs.len(), 4);
        assert_eq!(specs[0].program, PathBuf::from("/opt/wxdb/bin/wxdb-harvest"));
        assert_eq!(specs[0].args, vec!["--feed", "gsod"]);
        assert_eq!(specs[3].args, vec!["--feed", "space-weather"]);

        let ftp = Mode::Ftp.specs(Path::new("/bin"));
        assert_eq!(ftp.len(), 2);
        assert!(ftp.iter().all(|s| s.args[1] == "gsod"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_clean_exit_is_not_restarted() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("runs");
        let spec = ProcessSpec::new("ok", "sh")
            .arg("-c")
            .arg(format!("echo run >> {}", marker.display()))
            .with_restart_delay(Duration::from_millis(10));

        Supervisor::new(vec![spec]).run(CancellationToken::new()).await.unwrap();

        let runs = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(runs.lines().count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_process_is_restarted_until_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("runs");
        let spec = ProcessSpec::new("flaky", "sh")
            .arg("-c")
            .arg(format!("echo run >> {}; exit 1", marker.display()))
            .with_restart_delay(Duration::from_millis(10));

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            stopper.cancel();
        });

        Supervisor::new(vec![spec]).run(cancel).await.unwrap();

        let runs = std::fs::read_to_string(&marker).unwrap();
        assert!(runs.lines().count() >= 2, "expected restarts, got {:?}", runs);
    }
}
