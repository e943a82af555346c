//! Station allow-list consulted before harvesting an item
//!
//! The list is the catalog CSV produced by the station geocoding job:
//! comma-delimited with at least `USAF`, `WBAN` and `flag` columns. Rows with
//! `flag == true` are harvested; everything else is skipped.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};
use wxdb_common::StationKey;

use crate::remote::RemoteItem;

pub trait ItemFilter: Send + Sync {
    fn is_allowed(&self, item: &RemoteItem) -> bool;
}

/// Accepts everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ItemFilter for AllowAll {
    fn is_allowed(&self, _item: &RemoteItem) -> bool {
        true
    }
}

#[derive(Debug, Deserialize)]
struct CatalogRow {
    #[serde(rename = "USAF")]
    usaf: String,
    #[serde(rename = "WBAN")]
    wban: String,
    #[serde(default)]
    flag: String,
}

/// Stations flagged for harvesting
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    stations: HashSet<StationKey>,
}

impl AllowList {
    pub fn from_stations(stations: impl IntoIterator<Item = StationKey>) -> Self {
        Self {
            stations: stations.into_iter().collect(),
        }
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv = csv::Reader::from_reader(reader);
        let mut stations = HashSet::new();

        for row in csv.deserialize::<CatalogRow>() {
            let row = row.context("Failed to read allow-list row")?;
            let (usaf, wban) = (row.usaf.trim(), row.wban.trim());
            if row.flag.trim().eq_ignore_ascii_case("true") && !usaf.is_empty() && !wban.is_empty() {
                stations.insert(StationKey::new(usaf, wban));
            }
        }

        Ok(Self { stations })
    }

    /// Load the catalog; `None` when the file does not exist
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let file = match std::fs::File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to open allow-list {}", path.display()))
            },
        };
        let list = Self::from_reader(file)
            .with_context(|| format!("Failed to parse allow-list {}", path.display()))?;
        Ok(Some(list))
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn contains(&self, key: &StationKey) -> bool {
        self.stations.contains(key)
    }
}

impl ItemFilter for AllowList {
    /// Names that carry no station key are rejected
    fn is_allowed(&self, item: &RemoteItem) -> bool {
        StationKey::from_item_name(&item.name).is_some_and(|key| self.contains(&key))
    }
}

/// Filter for a harvester: the allow-list at `path`, or [`AllowAll`] when no
/// path is configured or the file is missing
pub fn load_filter(path: Option<&Path>) -> Result<Box<dyn ItemFilter>> {
    let Some(path) = path else {
        info!("No allow-list configured, harvesting every station");
        return Ok(Box::new(AllowAll));
    };

    match AllowList::load(path)? {
        Some(list) => {
            info!(path = %path.display(), stations = list.len(), "Loaded station allow-list");
            Ok(Box::new(list))
        },
        None => {
            warn!(path = %path.display(), "Allow-list not found, filtering disabled");
            Ok(Box::new(AllowAll))
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const CATALOG: &str = "\
USAF,WBAN,STATION NAME,flag,display_name
010010,99999,JAN MAYEN,false,Norway
276120,99999,MOSCOW,true,Russia
276125,99999,VNUKOVO,TRUE,Russia
222170,,KANDALAKSA,true,Russia
";

    #[test]
    fn test_only_flagged_stations_are_loaded() {
        let list = AllowList::from_reader(CATALOG.as_bytes()).unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.contains(&StationKey::new("276120", "99999")));
        assert!(!list.contains(&StationKey::new("010010", "99999")));
    }

    #[test]
    fn test_item_names_are_matched_by_station() {
        let list = AllowList::from_reader(CATALOG.as_bytes()).unwrap();
        assert!(list.is_allowed(&RemoteItem::new("2023", "276120-99999-2023.op.gz")));
        assert!(!list.is_allowed(&RemoteItem::new("2023", "010010-99999-2023.op.gz")));
        assert!(!list.is_allowed(&RemoteItem::new("2023", "readme.txt")));
    }

    #[test]
    fn test_missing_file_disables_filtering() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("stations.csv");
        assert!(AllowList::load(&missing).unwrap().is_none());

        let filter = load_filter(Some(&missing)).unwrap();
        assert!(filter.is_allowed(&RemoteItem::new("2023", "010010-99999-2023.op.gz")));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stations.csv");
        std::fs::write(&path, CATALOG).unwrap();

        let filter = load_filter(Some(&path)).unwrap();
        assert!(filter.is_allowed(&RemoteItem::new("2024", "276125-99999-2024.op.gz")));
        assert!(!filter.is_allowed(&RemoteItem::new("2024", "010010-99999-2024.op.gz")));
    }
}
