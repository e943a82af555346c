//! WXDB Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the WXDB harvesting workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`WxdbError`] and the [`Result`] alias
//! - **Checksums**: digests used as change tokens and local file suffixes
//! - **Logging**: console plus per-component warning log files
//! - **Types**: station identity shared by the filter and the decoder
//!
//! # Example
//!
//! ```no_run
//! use wxdb_common::types::StationKey;
//!
//! let key: StationKey = "010010-99999".parse().unwrap();
//! assert_eq!(key.usaf, "010010");
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, WxdbError};
pub use types::StationKey;
