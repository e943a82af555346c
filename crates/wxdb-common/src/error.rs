//! Error types for WXDB

use thiserror::Error;

/// Result type alias for WXDB operations
pub type Result<T> = std::result::Result<T, WxdbError>;

/// Errors raised by the shared WXDB types
#[derive(Error, Debug)]
pub enum WxdbError {
    #[error("Invalid station key: {0}")]
    InvalidStationKey(String),
}
