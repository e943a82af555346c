//! Remote archives the harvester polls
//!
//! - [`ftp::FtpArchive`]: GSOD yearly directories on an FTP server
//! - [`http::HttpFeed`]: a single JSON document served over HTTP
//!
//! Both expose the same partition/item view through [`RemoteSource`], and
//! both report failures as [`RemoteError`] so the retry policy can treat them
//! alike.

pub mod ftp;
pub mod http;

use async_trait::async_trait;
use thiserror::Error;

use crate::retry::RetryClass;

pub use ftp::FtpArchive;
pub use http::HttpFeed;

/// One harvestable file: `partition/name`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteItem {
    pub partition: String,
    pub name: String,
}

impl RemoteItem {
    pub fn new(partition: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            name: name.into(),
        }
    }

    /// Path relative to the source root
    pub fn path(&self) -> String {
        format!("{}/{}", self.partition, self.name)
    }

    /// Ledger key: `baseDir/partition/itemName`
    pub fn ledger_key(&self, base_dir: &str) -> String {
        format!("{}/{}", base_dir.trim_end_matches('/'), self.path())
    }
}

/// What went wrong talking to the remote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Network-level failure, timeouts, dropped sessions
    Connection,
    /// The server is throttling us (FTP 530/421, HTTP 429/503)
    ConnectionLimit,
    /// Unexpected reply that may succeed on a fresh session
    Protocol,
    /// The item does not exist
    NotFound,
    /// The request was refused and will be refused again
    Rejected,
}

impl std::fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RemoteErrorKind::Connection => "connection error",
            RemoteErrorKind::ConnectionLimit => "connection limit reached",
            RemoteErrorKind::Protocol => "protocol error",
            RemoteErrorKind::NotFound => "not found",
            RemoteErrorKind::Rejected => "request rejected",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Map onto the retry policy's classes
    pub fn retry_class(&self) -> RetryClass {
        match self.kind {
            RemoteErrorKind::Connection | RemoteErrorKind::Protocol => RetryClass::RetryNow,
            RemoteErrorKind::ConnectionLimit => RetryClass::RetryAfterCooldown,
            RemoteErrorKind::NotFound | RemoteErrorKind::Rejected => RetryClass::Fatal,
        }
    }
}

/// A remote archive seen as partitions of named items.
///
/// Methods take `&self`; implementations keep their session behind interior
/// mutability so the retry hook can drop it while an operation is pending.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Name used in log lines
    fn describe(&self) -> String;

    /// Root prefix of ledger keys
    fn base_dir(&self) -> &str;

    /// Open a session if none is open
    async fn connect(&self) -> Result<(), RemoteError>;

    /// Close the session; never fails
    async fn disconnect(&self);

    async fn list_partitions(&self) -> Result<Vec<String>, RemoteError>;

    /// Item names (not paths) inside `partition`
    async fn list_items(&self, partition: &str) -> Result<Vec<String>, RemoteError>;

    /// Current change token of `item`, without downloading the payload
    async fn change_token(&self, item: &RemoteItem) -> Result<String, RemoteError>;

    /// Raw payload of `item`
    async fn fetch(&self, item: &RemoteItem) -> Result<Vec<u8>, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_key_layout() {
        let item = RemoteItem::new("2023", "010010-99999-2023.op.gz");
        assert_eq!(item.path(), "2023/010010-99999-2023.op.gz");
        assert_eq!(
            item.ledger_key("/pub/data/gsod/"),
            "/pub/data/gsod/2023/010010-99999-2023.op.gz"
        );
    }

    #[test]
    fn test_retry_classes() {
        let class = |kind| RemoteError::new(kind, "x").retry_class();
        assert_eq!(class(RemoteErrorKind::Connection), RetryClass::RetryNow);
        assert_eq!(class(RemoteErrorKind::Protocol), RetryClass::RetryNow);
        assert_eq!(class(RemoteErrorKind::ConnectionLimit), RetryClass::RetryAfterCooldown);
        assert_eq!(class(RemoteErrorKind::NotFound), RetryClass::Fatal);
        assert_eq!(class(RemoteErrorKind::Rejected), RetryClass::Fatal);
    }
}
