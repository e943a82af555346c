//! Unit normalization for GSOD daily summaries
//!
//! GSOD publishes imperial units. Values are converted to metric and rounded
//! to two decimals. Each column also has a missing-data sentinel (`9999.9`,
//! `999.9` or `99.99`) that maps to "no value" rather than to a number.

/// Round to two decimals, half away from zero
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn f_to_c(fahrenheit: f64) -> f64 {
    round2((fahrenheit - 32.0) * 5.0 / 9.0)
}

pub fn mile_to_km(miles: f64) -> f64 {
    round2(miles * 1.60934)
}

pub fn mph_to_mps(mph: f64) -> f64 {
    round2(mph * 0.44704)
}

pub fn inch_to_mm(inches: f64) -> f64 {
    round2(inches * 25.4)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    FahrenheitToCelsius,
    MilesToKm,
    MphToMps,
    InchesToMm,
}

impl Conversion {
    pub fn apply(self, value: f64) -> f64 {
        match self {
            Conversion::FahrenheitToCelsius => f_to_c(value),
            Conversion::MilesToKm => mile_to_km(value),
            Conversion::MphToMps => mph_to_mps(value),
            Conversion::InchesToMm => inch_to_mm(value),
        }
    }
}

/// How one named column is normalized
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitRule {
    pub field: &'static str,
    pub conversion: Option<Conversion>,
    pub sentinel: Option<f64>,
}

impl UnitRule {
    const fn new(field: &'static str, conversion: Option<Conversion>, sentinel: f64) -> Self {
        Self {
            field,
            conversion,
            sentinel: Some(sentinel),
        }
    }

    /// `None` when `value` is the column's missing-data sentinel
    pub fn normalize(&self, value: f64) -> Option<f64> {
        if let Some(sentinel) = self.sentinel {
            if (value - sentinel).abs() < 1e-9 {
                return None;
            }
        }
        Some(match self.conversion {
            Some(conversion) => conversion.apply(value),
            None => value,
        })
    }
}

use Conversion::*;

/// GSOD column table
pub const GSOD_UNITS: &[UnitRule] = &[
    UnitRule::new("TEMP", Some(FahrenheitToCelsius), 9999.9),
    UnitRule::new("DEWP", Some(FahrenheitToCelsius), 9999.9),
    UnitRule::new("MAX", Some(FahrenheitToCelsius), 9999.9),
    UnitRule::new("MIN", Some(FahrenheitToCelsius), 9999.9),
    UnitRule::new("SLP", None, 9999.9),
    UnitRule::new("STP", None, 9999.9),
    UnitRule::new("VISIB", Some(MilesToKm), 999.9),
    UnitRule::new("WDSP", Some(MphToMps), 999.9),
    UnitRule::new("MXSPD", Some(MphToMps), 999.9),
    UnitRule::new("GUST", Some(MphToMps), 999.9),
    UnitRule::new("PRCP", Some(InchesToMm), 99.99),
    UnitRule::new("SNDP", Some(InchesToMm), 999.9),
];

/// Rule for `field`, matched case-insensitively
pub fn rule_for(rules: &'static [UnitRule], field: &str) -> Option<&'static UnitRule> {
    rules.iter().find(|rule| rule.field.eq_ignore_ascii_case(field))
}
