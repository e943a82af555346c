//! WXDB Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Harvest → queue → parse → store pipeline for weather archives.
//!
//! # Feeds
//!
//! - **GSOD**: NOAA Global Summary of the Day, yearly directories of
//!   gzipped fixed-width station files on FTP
//! - **Space weather**: a single JSON document served over HTTP
//!
//! # Pipeline
//!
//! A [`harvester::Harvester`] polls a [`remote::RemoteSource`], compares change
//! tokens against the [`ledger::ChangeLedger`] and pushes changed files onto a
//! bounded [`queue::FileQueue`]. A [`worker::ParserWorker`] pops them, decodes
//! with the feed's decoder and writes through a [`sink::RecordSink`].
//!
//! # Example
//!
//! ```no_run
//! use wxdb_ingest::{decoder::FixedWidthDecoder, units::f_to_c};
//!
//! let decoded = FixedWidthDecoder::gsod().decode("STN--- WBAN   YEARMODA    TEMP\n").unwrap();
//! assert!(decoded.records.is_empty());
//! assert_eq!(f_to_c(212.0), 100.0);
//! ```

pub mod config;
pub mod db;
pub mod decoder;
pub mod decompression;
pub mod feed;
pub mod filter;
pub mod harvester;
pub mod ledger;
pub mod queue;
pub mod remote;
pub mod retry;
pub mod shutdown;
pub mod sink;
pub mod space_weather;
pub mod supervisor;
pub mod units;
pub mod worker;

pub use config::Config;
pub use feed::Feed;
pub use harvester::{CycleStats, HarvestOptions, Harvester};
pub use worker::{FileOutcome, ParserWorker};
