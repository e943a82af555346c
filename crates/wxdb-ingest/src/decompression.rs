//! Gzip handling for harvested payloads

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::io::Read;
use tracing::debug;

/// Decompress gzip-compressed data
pub fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .context("Failed to decompress gzip data")?;
    debug!("Decompressed {} -> {} bytes", data.len(), decompressed.len());
    Ok(decompressed)
}

/// Gunzip `data` when `name` says it is compressed.
///
/// Returns the payload and the name it should be stored under
/// (`010010-99999-2023.op.gz` -> `010010-99999-2023.op`).
pub fn unpack(name: &str, data: Vec<u8>) -> Result<(String, Vec<u8>)> {
    match name.strip_suffix(".gz") {
        Some(stem) => {
            let data = decompress_gzip(&data).with_context(|| format!("Failed to unpack {}", name))?;
            Ok((stem.to_string(), data))
        },
        None => Ok((name.to_string(), data)),
    }
}
