//! GSOD archive over FTP
//!
//! suppaftp's blocking client runs on the blocking pool. One session is kept
//! open across calls and re-opened lazily after [`RemoteSource::disconnect`]
//! or after an error that leaves the control connection in doubt.
//!
//! # Examples
//!
//! ```rust,ignore
//! use wxdb_ingest::remote::{FtpArchive, FtpSettings, RemoteSource};
//!
//! let archive = FtpArchive::new(FtpSettings {
//!     host: "ftp.ncei.noaa.gov".to_string(),
//!     base_dir: "/pub/data/gsod".to_string(),
//!     ..FtpSettings::default()
//! });
//! archive.connect().await?;
//! let years = archive.list_partitions().await?;
//! ```

use async_trait::async_trait;
use std::io::Read;
use std::net::ToSocketAddrs;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Mode, Status};
use tracing::{debug, warn};

use super::{RemoteError, RemoteErrorKind, RemoteItem, RemoteSource};

/// Socket connect and read timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Connection settings for the FTP archive
#[derive(Debug, Clone)]
pub struct FtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,

    /// Directory holding one sub-directory per partition
    pub base_dir: String,

    pub timeout: Duration,
}

impl Default for FtpSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 21,
            username: "anonymous".to_string(),
            password: String::new(),
            base_dir: "/".to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// FTP-backed [`RemoteSource`]
pub struct FtpArchive {
    settings: FtpSettings,
    session: Arc<Mutex<Option<FtpStream>>>,
}

impl FtpArchive {
    pub fn new(settings: FtpSettings) -> Self {
        Self {
            settings,
            session: Arc::new(Mutex::new(None)),
        }
    }

    pub fn settings(&self) -> &FtpSettings {
        &self.settings
    }

    /// Run `f` against the open session on the blocking pool, opening one first
    /// if needed. Errors that may have broken the session drop it.
    async fn with_session<T, F>(&self, f: F) -> Result<T, RemoteError>
    where
        F: FnOnce(&mut FtpStream) -> Result<T, FtpError> + Send + 'static,
        T: Send + 'static,
    {
        let session = Arc::clone(&self.session);
        let settings = self.settings.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = session
                .lock()
                .map_err(|_| RemoteError::new(RemoteErrorKind::Protocol, "FTP session lock poisoned"))?;

            if guard.is_none() {
                *guard = Some(open_session(&settings)?);
            }
            let stream = match guard.as_mut() {
                Some(stream) => stream,
                None => {
                    return Err(RemoteError::new(RemoteErrorKind::Connection, "FTP session unavailable"))
                },
            };

            f(stream).map_err(|e| {
                let error = classify_ftp_error(e);
                if error.kind != RemoteErrorKind::NotFound {
                    // The control channel may be mid-reply; start over next time
                    guard.take();
                }
                error
            })
        })
        .await
        .map_err(|e| RemoteError::new(RemoteErrorKind::Protocol, format!("FTP task panicked: {}", e)))?
    }
}

fn open_session(settings: &FtpSettings) -> Result<FtpStream, RemoteError> {
    debug!("Connecting to FTP server: {}:{}", settings.host, settings.port);

    let addr = (settings.host.as_str(), settings.port)
        .to_socket_addrs()
        .map_err(|e| {
            RemoteError::new(
                RemoteErrorKind::Connection,
                format!("cannot resolve {}: {}", settings.host, e),
            )
        })?
        .next()
        .ok_or_else(|| {
            RemoteError::new(
                RemoteErrorKind::Connection,
                format!("no address for {}", settings.host),
            )
        })?;

    let mut stream = FtpStream::connect_timeout(addr, settings.timeout).map_err(classify_ftp_error)?;
    if let Err(e) = stream.get_ref().set_read_timeout(Some(settings.timeout)) {
        warn!("Failed to set FTP read timeout: {}", e);
    }

    // Extended passive mode works behind NAT and in containers
    stream.set_mode(Mode::ExtendedPassive);

    debug!("Logging in as: {}", settings.username);
    stream
        .login(&settings.username, &settings.password)
        .map_err(classify_ftp_error)?;
    stream
        .transfer_type(FileType::Binary)
        .map_err(classify_ftp_error)?;
    stream.cwd(&settings.base_dir).map_err(classify_ftp_error)?;

    Ok(stream)
}

/// 530 and 421 are how the archive says "too many anonymous users"
fn classify_ftp_error(error: FtpError) -> RemoteError {
    let kind = match &error {
        FtpError::ConnectionError(_) => RemoteErrorKind::Connection,
        FtpError::UnexpectedResponse(response) => match response.status {
            Status::NotLoggedIn | Status::NotAvailable => RemoteErrorKind::ConnectionLimit,
            Status::FileUnavailable => RemoteErrorKind::NotFound,
            _ => RemoteErrorKind::Protocol,
        },
        _ => RemoteErrorKind::Protocol,
    };
    RemoteError::new(kind, error.to_string())
}

/// Listing entries may come back as `partition/name`; keep the last segment
fn entry_name(entry: &str) -> &str {
    entry.trim_end_matches('/').rsplit('/').next().unwrap_or(entry)
}

#[async_trait]
impl RemoteSource for FtpArchive {
    fn describe(&self) -> String {
        format!("ftp://{}:{}{}", self.settings.host, self.settings.port, self.settings.base_dir)
    }

    fn base_dir(&self) -> &str {
        &self.settings.base_dir
    }

    async fn connect(&self) -> Result<(), RemoteError> {
        self.with_session(|stream| stream.noop()).await
    }

    async fn disconnect(&self) {
        let session = Arc::clone(&self.session);
        let closed = tokio::task::spawn_blocking(move || {
            let stream = match session.lock() {
                Ok(mut guard) => guard.take(),
                Err(poisoned) => poisoned.into_inner().take(),
            };
            if let Some(mut stream) = stream {
                if let Err(e) = stream.quit() {
                    debug!("Failed to quit FTP session gracefully: {}", e);
                }
            }
        })
        .await;

        if let Err(e) = closed {
            warn!("FTP disconnect task panicked: {}", e);
        }
    }

    async fn list_partitions(&self) -> Result<Vec<String>, RemoteError> {
        let entries = self.with_session(|stream| stream.nlst(None)).await?;
        Ok(entries.iter().map(|e| entry_name(e).to_string()).collect())
    }

    async fn list_items(&self, partition: &str) -> Result<Vec<String>, RemoteError> {
        let partition = partition.to_string();
        let entries = self
            .with_session(move |stream| stream.nlst(Some(&partition)))
            .await?;
        Ok(entries.iter().map(|e| entry_name(e).to_string()).collect())
    }

    async fn change_token(&self, item: &RemoteItem) -> Result<String, RemoteError> {
        let path = item.path();
        let modified = self.with_session(move |stream| stream.mdtm(&path)).await?;
        Ok(modified.format("%Y-%m-%dT%H:%M:%S").to_string())
    }

    async fn fetch(&self, item: &RemoteItem) -> Result<Vec<u8>, RemoteError> {
        let path = item.path();
        let mut reader = self
            .with_session(move |stream| stream.retr_as_buffer(&path))
            .await?;

        let mut data = Vec::new();
        reader.read_to_end(&mut data).map_err(|e| {
            RemoteError::new(RemoteErrorKind::Connection, format!("failed to read payload: {}", e))
        })?;

        debug!("Downloaded {} bytes from {}", data.len(), item.path());
        Ok(data)
    }
}
