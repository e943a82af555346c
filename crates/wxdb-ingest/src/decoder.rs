//! Fixed-width record decoder
//!
//! The first line of a file is a header whose tokens fix the column spans of
//! every following line: a column starts where a header token starts and ends
//! where the token ends. The last column ends with the header line.
//!
//! ```text
//! STN--- WBAN   YEARMODA    TEMP
//! 010010 99999  20230115    28.5
//! ```
//!
//! Each span is cleaned (`*` and `I` flag characters removed, whitespace
//! collapsed) and its first token parsed as a number. Spans that do not parse
//! keep their trimmed text. Columns in the unit table are then converted to
//! metric, and the date column is rewritten as ISO-8601.

use chrono::{NaiveDate, NaiveDateTime};
use std::fmt;
use thiserror::Error;
use tracing::warn;
use wxdb_common::StationKey;

use crate::units::{rule_for, UnitRule, GSOD_UNITS};

/// Name of the derived composite-key column
pub const STATION_ID_FIELD: &str = "station_id";

/// Prefix written in place of a date that could not be parsed
pub const INVALID_DATE_PREFIX: &str = "invalid-date:";

const DATE_MARKERS: &[&str] = &["YEARMODA", "DATE"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("input has no header line")]
    MissingHeader,

    #[error("malformed document: {0}")]
    Malformed(String),
}

/// One decoded field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    /// A date column whose raw value could not be parsed
    InvalidDate(String),
    /// No value: empty span, sentinel, or a non-numeric value in a numeric column
    Missing,
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    /// Text form for text-typed columns; `None` for missing values
    pub fn as_text(&self) -> Option<String> {
        match self {
            FieldValue::Missing => None,
            other => Some(other.to_string()),
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(date) => Some(*date),
            FieldValue::Timestamp(ts) => Some(ts.date()),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            FieldValue::Timestamp(ts) => Some(*ts),
            FieldValue::Date(date) => date.and_hms_opt(0, 0, 0),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FieldValue::Missing)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(value) => write!(f, "{}", value),
            FieldValue::Text(text) => f.write_str(text),
            FieldValue::Date(date) => write!(f, "{}T00:00:00", date.format("%Y-%m-%d")),
            FieldValue::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%dT%H:%M:%S")),
            FieldValue::InvalidDate(raw) => write!(f, "{}{}", INVALID_DATE_PREFIX, raw),
            FieldValue::Missing => Ok(()),
        }
    }
}

/// One decoded line: fields in header order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, FieldValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }
}

/// Records plus the ordered field names they share
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
    pub records: Vec<Record>,
    pub field_names: Vec<String>,
}

/// A column span in characters, `[start, end)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub start: usize,
    pub end: usize,
}

/// Column spans from the header's token positions
pub fn parse_header(header: &str) -> Vec<Column> {
    let chars: Vec<char> = header.chars().collect();
    let mut columns = Vec::new();
    let mut start = None;

    for (i, ch) in chars.iter().enumerate() {
        match (ch.is_whitespace(), start) {
            (false, None) => start = Some(i),
            (true, Some(s)) => {
                columns.push(Column {
                    name: chars[s..i].iter().collect(),
                    start: s,
                    end: i,
                });
                start = None;
            },
            _ => {},
        }
    }
    if let Some(s) = start {
        columns.push(Column {
            name: chars[s..].iter().collect(),
            start: s,
            end: chars.len(),
        });
    }

    // The last column runs to the end of the header line
    if let Some(last) = columns.last_mut() {
        last.end = chars.len();
    }
    columns
}

/// Decoder configuration: which columns are text and which units apply
#[derive(Debug, Clone, Default)]
pub struct FixedWidthDecoder {
    text_columns: Vec<String>,
    units: &'static [UnitRule],
    derive_station_id: bool,
}

impl FixedWidthDecoder {
    /// Generic decoder: every column numeric-or-text, no unit table
    pub fn new() -> Self {
        Self::default()
    }

    /// GSOD `.op` files: identifiers and the event flags stay text, imperial
    /// units become metric, and `station_id` is appended
    pub fn gsod() -> Self {
        Self {
            text_columns: vec!["STN---".to_string(), "WBAN".to_string(), "FRSHTT".to_string()],
            units: GSOD_UNITS,
            derive_station_id: true,
        }
    }

    pub fn with_units(mut self, units: &'static [UnitRule]) -> Self {
        self.units = units;
        self
    }

    fn is_text_column(&self, name: &str) -> bool {
        self.text_columns.iter().any(|c| c.eq_ignore_ascii_case(name))
    }

    /// Decode a whole file. Only a missing header fails the file; bad lines
    /// are logged and skipped.
    pub fn decode(&self, raw: &str) -> Result<Decoded, DecodeError> {
        let mut lines = raw.lines();
        let header = lines
            .next()
            .filter(|h| !h.trim().is_empty())
            .ok_or(DecodeError::MissingHeader)?;

        let columns = parse_header(header);
        let min_width = columns.last().map(|c| c.end).unwrap_or(0);
        let date_column = date_column(&columns);

        let mut records = Vec::new();
        for (index, line) in lines.enumerate() {
            let line_number = index + 2;
            if line.trim().is_empty() {
                continue;
            }

            let chars: Vec<char> = line.chars().collect();
            if chars.len() < min_width {
                warn!(
                    line = line_number,
                    width = chars.len(),
                    expected = min_width,
                    "Line {} too short, skipping",
                    line_number
                );
                continue;
            }

            let mut record = Record::new();
            for (position, column) in columns.iter().enumerate() {
                let span: String = chars[column.start..column.end].iter().collect();
                let value = if Some(position) == date_column {
                    normalize_date(span.trim(), line_number)
                } else if self.is_text_column(&column.name) {
                    text_value(span.trim())
                } else {
                    self.normalize_units(&column.name, extract_value(&span))
                };
                record.push(column.name.clone(), value);
            }

            if self.derive_station_id {
                let station = station_key(&record);
                record.push(STATION_ID_FIELD, text_value(&station));
            }
            records.push(record);
        }

        let mut field_names: Vec<String> = columns.into_iter().map(|c| c.name).collect();
        if self.derive_station_id {
            field_names.push(STATION_ID_FIELD.to_string());
        }

        Ok(Decoded {
            records,
            field_names,
        })
    }

    fn normalize_units(&self, name: &str, value: FieldValue) -> FieldValue {
        let Some(rule) = rule_for(self.units, name) else {
            return value;
        };
        match value {
            FieldValue::Number(n) => rule.normalize(n).map_or(FieldValue::Missing, FieldValue::Number),
            // Unparsable source values in a converted column are missing, never zero
            _ => FieldValue::Missing,
        }
    }
}

/// Index of the first column whose name carries a date marker
fn date_column(columns: &[Column]) -> Option<usize> {
    columns.iter().position(|column| {
        let upper = column.name.to_uppercase();
        DATE_MARKERS.iter().any(|marker| upper.contains(marker))
    })
}

fn text_value(text: &str) -> FieldValue {
    if text.is_empty() {
        FieldValue::Missing
    } else {
        FieldValue::Text(text.to_string())
    }
}

/// Strip flag characters, collapse whitespace, parse the first token
fn extract_value(span: &str) -> FieldValue {
    let cleaned: String = span.chars().filter(|c| *c != '*' && *c != 'I').collect();
    let first = cleaned.split_whitespace().next();

    match first.map(str::parse::<f64>) {
        Some(Ok(value)) => FieldValue::Number(value),
        _ => text_value(span.trim()),
    }
}

/// `YYYYMMDD`, then `YYYY-MM-DD`; anything after a `T` is ignored
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let clean = raw.split('T').next().unwrap_or(raw).trim();

    if clean.len() == 8 && clean.bytes().all(|b| b.is_ascii_digit()) {
        let year = clean[0..4].parse().ok()?;
        let month = clean[4..6].parse().ok()?;
        let day = clean[6..8].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    NaiveDate::parse_from_str(clean, "%Y-%m-%d").ok()
}

fn normalize_date(raw: &str, line_number: usize) -> FieldValue {
    if raw.is_empty() {
        return FieldValue::Missing;
    }
    match parse_date(raw) {
        Some(date) => FieldValue::Date(date),
        None => {
            warn!(line = line_number, value = %raw, "Unparsable date, keeping marker");
            FieldValue::InvalidDate(raw.to_string())
        },
    }
}

/// `USAF-WBAN` from the identifier columns
fn station_key(record: &Record) -> String {
    let part = |name: &str| record.get(name).and_then(FieldValue::as_text).unwrap_or_default();
    StationKey::new(part("STN---"), part("WBAN")).to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    const HEADER: &str = "STN--- WBAN   YEARMODA    TEMP       DEWP      SLP        STP       VISIB      WDSP     MXSPD   GUST    MAX     MIN   PRCP   SNDP   FRSHTT";

    /// Data line with each value at its header column's start; values must
    /// fit the header token width
    fn line_for(values: &[&str]) -> String {
        let columns = parse_header(HEADER);
        let mut line: Vec<char> = vec![' '; columns.last().unwrap().end];
        for (column, value) in columns.iter().zip(values) {
            for (offset, ch) in value.chars().enumerate() {
                line[column.start + offset] = ch;
            }
        }
        line.into_iter().collect()
    }

    fn sample_values() -> Vec<&'static str> {
        vec![
            "010010", "9999", "20230115", "50.0", "32.0", "987", "950", "10.0", "10.0", "999.9",
            "20.0", "68*", "14*", "0.1I", "", "001000",
        ]
    }

    #[test]
    fn test_parse_header_offsets() {
        let columns = parse_header("AB  CDE F");
        assert_eq!(
            columns,
            vec![
                Column { name: "AB".into(), start: 0, end: 2 },
                Column { name: "CDE".into(), start: 4, end: 7 },
                Column { name: "F".into(), start: 8, end: 9 },
            ]
        );
    }

    #[test]
    fn test_one_field_per_header_column_in_order() {
        let raw = format!("{}\n{}\n", HEADER, line_for(&sample_values()));
        let decoded = FixedWidthDecoder::new().decode(&raw).unwrap();

        let header_names: Vec<&str> = HEADER.split_whitespace().collect();
        assert_eq!(decoded.field_names, header_names);
        assert_eq!(decoded.records.len(), 1);
        let names: Vec<&str> = decoded.records[0].names().collect();
        assert_eq!(names, header_names);
    }

    #[test]
    fn test_gsod_units_and_station_id() {
        let raw = format!("{}\n{}\n", HEADER, line_for(&sample_values()));
        let decoded = FixedWidthDecoder::gsod().decode(&raw).unwrap();
        let record = &decoded.records[0];

        assert_eq!(decoded.field_names.last().unwrap(), STATION_ID_FIELD);
        assert_eq!(record.get("STN---"), Some(&FieldValue::Text("010010".into())));
        assert_eq!(record.get("TEMP").unwrap().as_f64(), Some(10.0));
        assert_eq!(record.get("DEWP").unwrap().as_f64(), Some(0.0));
        assert_eq!(record.get("SLP").unwrap().as_f64(), Some(987.0));
        assert_eq!(record.get("VISIB").unwrap().as_f64(), Some(16.09));
        assert_eq!(record.get("WDSP").unwrap().as_f64(), Some(4.47));
        assert_eq!(record.get("MAX").unwrap().as_f64(), Some(20.0));
        assert_eq!(record.get("MIN").unwrap().as_f64(), Some(-10.0));
        assert_eq!(record.get("PRCP").unwrap().as_f64(), Some(2.54));
        assert_eq!(record.get("MXSPD"), Some(&FieldValue::Missing));
        assert_eq!(record.get("GUST").unwrap().as_f64(), Some(8.94));
        assert_eq!(record.get("SNDP"), Some(&FieldValue::Missing));
        assert_eq!(record.get("FRSHTT"), Some(&FieldValue::Text("001000".into())));
        assert_eq!(record.get(STATION_ID_FIELD).unwrap().to_string(), "010010-9999");
    }

    #[test]
    fn test_short_lines_are_skipped() {
        let good = line_for(&sample_values());
        let raw = format!("{}\n{}\n010010 99999  2023\n\n{}\n", HEADER, good, good);
        let decoded = FixedWidthDecoder::gsod().decode(&raw).unwrap();
        assert_eq!(decoded.records.len(), 2);
    }

    #[test]
    fn test_missing_header_fails() {
        assert_eq!(FixedWidthDecoder::gsod().decode(""), Err(DecodeError::MissingHeader));
        assert_eq!(FixedWidthDecoder::gsod().decode("   \nx"), Err(DecodeError::MissingHeader));
    }

    #[test]
    fn test_date_forms_normalize_to_iso() {
        let raw = "OBSERVDATE V\n20230115   1\n2023-01-15 2\n";
        let decoded = FixedWidthDecoder::new().decode(raw).unwrap();
        for record in &decoded.records {
            assert_eq!(record.get("OBSERVDATE").unwrap().to_string(), "2023-01-15T00:00:00");
        }
    }

    #[test]
    fn test_invalid_date_keeps_marker_and_record() {
        let raw = "YEARMODA  V\n20231345  1\n";
        let decoded = FixedWidthDecoder::new().decode(raw).unwrap();
        assert_eq!(decoded.records.len(), 1);
        let date = decoded.records[0].get("YEARMODA").unwrap();
        assert_eq!(date, &FieldValue::InvalidDate("20231345".into()));
        assert_eq!(date.to_string(), "invalid-date:20231345");
    }

    #[test]
    fn test_non_numeric_values_keep_text() {
        let raw = "CODE  V\nabc   1\n";
        let decoded = FixedWidthDecoder::new().decode(raw).unwrap();
        assert_eq!(decoded.records[0].get("CODE"), Some(&FieldValue::Text("abc".into())));
        assert_eq!(decoded.records[0].get("V").unwrap().as_f64(), Some(1.0));
    }

    #[test]
    fn test_zero_is_not_missing() {
        let raw = "PRCP  TEMP\n0.00  xx  \n";
        let decoded = FixedWidthDecoder::new().with_units(GSOD_UNITS).decode(raw).unwrap();
        assert_eq!(decoded.records[0].get("PRCP").unwrap().as_f64(), Some(0.0));
        assert!(decoded.records[0].get("TEMP").unwrap().is_missing());
    }

    #[test]
    fn test_parse_date_forms() {
        let expected = NaiveDate::from_ymd_opt(2023, 1, 15);
        assert_eq!(parse_date("20230115"), expected);
        assert_eq!(parse_date("2023-01-15"), expected);
        assert_eq!(parse_date("2023-01-15T00:00:00"), expected);
        assert_eq!(parse_date("15/01/2023"), None);
    }
}
