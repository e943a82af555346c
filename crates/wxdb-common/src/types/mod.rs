//! Common types used across WXDB

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::WxdbError;

/// Composite identity of a weather station: USAF id plus WBAN id.
///
/// Rendered as `USAF-WBAN`, which is both the allow-list lookup key and the
/// `station_id` output column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StationKey {
    pub usaf: String,
    pub wban: String,
}

impl StationKey {
    pub fn new(usaf: impl Into<String>, wban: impl Into<String>) -> Self {
        Self {
            usaf: usaf.into(),
            wban: wban.into(),
        }
    }

    /// Derive the key from a GSOD file name such as `010010-99999-2023.op.gz`.
    ///
    /// Returns `None` when the name does not carry two dash-separated ids.
    pub fn from_item_name(name: &str) -> Option<Self> {
        let mut parts = name.split('-');
        let usaf = parts.next().filter(|s| !s.is_empty())?;
        let wban = parts.next().filter(|s| !s.is_empty())?;
        // The WBAN part may still carry the extension when there is no year part
        let wban = wban.split('.').next().unwrap_or(wban);
        if wban.is_empty() {
            return None;
        }
        Some(Self::new(usaf, wban))
    }
}

impl std::fmt::Display for StationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.usaf, self.wban)
    }
}

impl FromStr for StationKey {
    type Err = WxdbError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (usaf, wban) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| WxdbError::InvalidStationKey(s.to_string()))?;
        if usaf.is_empty() || wban.is_empty() {
            return Err(WxdbError::InvalidStationKey(s.to_string()));
        }
        Ok(Self::new(usaf, wban))
    }
}
