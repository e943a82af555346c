//! The two feeds and their fixed table layouts
//!
//! Table and column identifiers used by the sink come only from the constants
//! here, never from decoded input.

use clap::ValueEnum;
use std::fmt;

use crate::decoder::{DecodeError, Decoded, FixedWidthDecoder};
use crate::queue::{GSOD_QUEUE, SPACE_WEATHER_QUEUE};
use crate::space_weather;

/// How a record field is bound into its table column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Float,
    Date,
    Timestamp,
}

/// One table column and the decoded field that feeds it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub column: &'static str,
    pub field: &'static str,
    pub kind: ColumnKind,
}

const fn col(column: &'static str, field: &'static str, kind: ColumnKind) -> ColumnSpec {
    ColumnSpec { column, field, kind }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub table: &'static str,
    pub columns: &'static [ColumnSpec],
}

impl TableSpec {
    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.column)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub const STATION_DAILY_SUMMARIES: TableSpec = TableSpec {
    table: "station_daily_summaries",
    columns: &[
        col("stn", "STN---", ColumnKind::Text),
        col("wban", "WBAN", ColumnKind::Text),
        col("yearmoda", "YEARMODA", ColumnKind::Date),
        col("temp", "TEMP", ColumnKind::Float),
        col("dewp", "DEWP", ColumnKind::Float),
        col("slp", "SLP", ColumnKind::Float),
        col("stp", "STP", ColumnKind::Float),
        col("visib", "VISIB", ColumnKind::Float),
        col("wdsp", "WDSP", ColumnKind::Float),
        col("mxspd", "MXSPD", ColumnKind::Float),
        col("gust", "GUST", ColumnKind::Float),
        col("max_temp", "MAX", ColumnKind::Float),
        col("min_temp", "MIN", ColumnKind::Float),
        col("prcp", "PRCP", ColumnKind::Float),
        col("sndp", "SNDP", ColumnKind::Float),
        col("frshtt", "FRSHTT", ColumnKind::Text),
    ],
};

pub const SPACE_WEATHER_DATA: TableSpec = TableSpec {
    table: "space_weather_data",
    columns: &[
        col("type", "type", ColumnKind::Text),
        col("time", "time", ColumnKind::Timestamp),
        col("value", "value", ColumnKind::Float),
        col("description", "description", ColumnKind::Text),
    ],
};

/// Data feeds the pipeline knows how to harvest and parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Feed {
    /// NOAA GSOD daily summaries over FTP
    #[default]
    Gsod,
    /// Current space-weather JSON over HTTP
    SpaceWeather,
}

impl Feed {
    pub fn name(self) -> &'static str {
        match self {
            Feed::Gsod => "gsod",
            Feed::SpaceWeather => "space-weather",
        }
    }

    pub fn queue_name(self) -> &'static str {
        match self {
            Feed::Gsod => GSOD_QUEUE,
            Feed::SpaceWeather => SPACE_WEATHER_QUEUE,
        }
    }

    pub fn table(self) -> &'static TableSpec {
        match self {
            Feed::Gsod => &STATION_DAILY_SUMMARIES,
            Feed::SpaceWeather => &SPACE_WEATHER_DATA,
        }
    }

    /// Remote items of this feed end with this suffix
    pub fn item_suffix(self) -> &'static str {
        match self {
            Feed::Gsod => ".op.gz",
            Feed::SpaceWeather => ".json",
        }
    }

    /// Whether partitions are years that honour the start-year cutoff
    pub fn numeric_partitions(self) -> bool {
        matches!(self, Feed::Gsod)
    }

    pub fn decode(self, raw: &str) -> Result<Decoded, DecodeError> {
        match self {
            Feed::Gsod => FixedWidthDecoder::gsod().decode(raw),
            Feed::SpaceWeather => space_weather::decode(raw),
        }
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_gsod_table_maps_renamed_columns() {
        let max = STATION_DAILY_SUMMARIES
            .columns
            .iter()
            .find(|c| c.column == "max_temp")
            .unwrap();
        assert_eq!(max.field, "MAX");
        assert_eq!(STATION_DAILY_SUMMARIES.columns.len(), 16);
    }

    #[test]
    fn test_column_list() {
        assert_eq!(SPACE_WEATHER_DATA.column_list(), "type, time, value, description");
    }

    #[test]
    fn test_feed_parses_from_cli_value() {
        assert_eq!(Feed::from_str("gsod", true).unwrap(), Feed::Gsod);
        assert_eq!(Feed::from_str("space-weather", true).unwrap(), Feed::SpaceWeather);
        assert_eq!(Feed::SpaceWeather.to_string(), "space-weather");
    }

    #[test]
    fn test_feed_routing() {
        assert_eq!(Feed::Gsod.queue_name(), "file_queue");
        assert_eq!(Feed::SpaceWeather.table().table, "space_weather_data");
        assert!(Feed::Gsod.numeric_partitions());
        assert!(Feed::SpaceWeather.decode("{}").is_ok());
    }
}
