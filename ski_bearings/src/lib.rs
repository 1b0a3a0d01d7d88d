//! Directional statistics for downhill ski run segments.
//!
//! Bearings are summarized per ski area (mean bearing, alignment, poleward and
//! eastward affinity plus multi-resolution histograms) and then rolled up into
//! coarser groups from the stored per-area summaries alone.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod aggregate;
pub mod analyze;
pub mod histogram;
pub mod segment;
pub mod stats;

pub use aggregate::{
    aggregate_ski_areas, by_country, by_hemisphere, by_status, by_us_state, display_filters,
    world_rose_groupings, GroupField, GroupMetrics, RoseGrouping, SkiAreaFilter,
};
pub use analyze::{analyze_ski_areas, SkiArea, SkiAreaMetrics};
pub use histogram::{
    bearing_histogram, bearing_histograms, bin_label, sum_histograms, BearingBin,
    BearingHistogram, BEARING_LABELS, DEFAULT_BIN_RESOLUTIONS,
};
pub use segment::{hemisphere_from_latitude, RunSegment, Segment};
pub use stats::{bearing_summary_stats, summarize_segments, BearingSummaryStats, ResultantVector};

/// Decimal places kept in every reported statistic.
pub const OUTPUT_PRECISION: i32 = 7;

/// Denominators and resultant lengths at or below this are treated as zero.
pub const ZERO_EPSILON: f64 = 1e-10;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BearingError {
    #[error("length mismatch for {field}: expected {expected}, got {actual}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("bearing at index {index} must be finite and within [0, 360), got {value}")]
    InvalidBearing { index: usize, value: f64 },
    #[error("{field} at index {index} must be finite and non-negative, got {value}")]
    InvalidMagnitude {
        field: &'static str,
        index: usize,
        value: f64,
    },
    #[error("summed net magnitude {net} exceeds summed cumulative magnitude {cum}")]
    NetExceedsCumulative { net: f64, cum: f64 },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("unknown hemisphere: {0}")]
    UnknownHemisphere(String),
    #[error("unknown operating status: {0}")]
    UnknownStatus(String),
    #[error("unknown grouping field: {0}")]
    UnknownGroupField(String),
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Hemisphere {
    North,
    South,
}

impl Hemisphere {
    pub fn as_str(&self) -> &'static str {
        match self {
            Hemisphere::North => "north",
            Hemisphere::South => "south",
        }
    }
}

impl fmt::Display for Hemisphere {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Hemisphere {
    type Err = BearingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "north" => Ok(Hemisphere::North),
            "south" => Ok(Hemisphere::South),
            _ => Err(BearingError::UnknownHemisphere(s.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OperatingStatus {
    Operating,
    Abandoned,
    Proposed,
    Disused,
}

impl OperatingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingStatus::Operating => "operating",
            OperatingStatus::Abandoned => "abandoned",
            OperatingStatus::Proposed => "proposed",
            OperatingStatus::Disused => "disused",
        }
    }
}

impl fmt::Display for OperatingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatingStatus {
    type Err = BearingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "operating" => Ok(OperatingStatus::Operating),
            "abandoned" => Ok(OperatingStatus::Abandoned),
            "proposed" => Ok(OperatingStatus::Proposed),
            "disused" => Ok(OperatingStatus::Disused),
            _ => Err(BearingError::UnknownStatus(s.to_string())),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Params {
    pub bin_resolutions: Vec<u32>,
    pub display_min_run_count: usize,
    pub display_min_combined_vertical: f64,
    pub rose_min_combined_vertical: f64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            bin_resolutions: DEFAULT_BIN_RESOLUTIONS.to_vec(),
            display_min_run_count: 3,
            display_min_combined_vertical: 50.0,
            rose_min_combined_vertical: 10_000.0,
        }
    }
}

impl Params {
    /// Parse parameters from JSON; missing keys keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, BearingError> {
        let params: Params =
            serde_json::from_str(text).map_err(|e| BearingError::InvalidConfig(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), BearingError> {
        if self.bin_resolutions.is_empty() {
            return Err(BearingError::InvalidConfig(
                "bin_resolutions must not be empty".into(),
            ));
        }
        if let Some(zero) = self.bin_resolutions.iter().find(|&&n| n == 0) {
            return Err(BearingError::InvalidConfig(format!(
                "bin resolution must be positive, got {zero}"
            )));
        }
        if let Some(n) = histogram::duplicate_resolution(&self.bin_resolutions) {
            return Err(BearingError::InvalidConfig(format!(
                "bin resolution {n} listed more than once"
            )));
        }
        if !self.display_min_combined_vertical.is_finite()
            || !self.rose_min_combined_vertical.is_finite()
        {
            return Err(BearingError::InvalidConfig(
                "combined vertical thresholds must be finite".into(),
            ));
        }
        Ok(())
    }
}

/// Round to [`OUTPUT_PRECISION`] decimals, folding `-0.0` into `0.0`.
pub fn round_output(value: f64) -> f64 {
    round_to(value, OUTPUT_PRECISION)
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    let rounded = (value * scale).round() / scale;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_output_clears_negative_zero() {
        let value = round_output(-1e-12);
        assert_eq!(value, 0.0);
        assert!(value.is_sign_positive());
        assert_eq!(round_output(0.70710678118), 0.7071068);
    }

    #[test]
    fn test_params_from_json_keeps_defaults() {
        let params = Params::from_json(r#"{"rose_min_combined_vertical": 500}"#).unwrap();
        assert_eq!(params.rose_min_combined_vertical, 500.0);
        assert_eq!(params.bin_resolutions, vec![2, 4, 8, 32]);
        assert_eq!(params.display_min_run_count, 3);
    }

    #[test]
    fn test_params_rejects_zero_resolution() {
        let err = Params::from_json(r#"{"bin_resolutions": [4, 0]}"#).unwrap_err();
        assert!(matches!(err, BearingError::InvalidConfig(_)));
    }

    #[test]
    fn test_params_rejects_repeated_resolution() {
        let err = Params::from_json(r#"{"bin_resolutions": [4, 4]}"#).unwrap_err();
        assert!(matches!(err, BearingError::InvalidConfig(_)));

        let params = Params {
            bin_resolutions: vec![2, 8, 2],
            ..Params::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_tag_parsing() {
        assert_eq!("North".parse::<Hemisphere>().unwrap(), Hemisphere::North);
        assert_eq!(
            "abandoned".parse::<OperatingStatus>().unwrap(),
            OperatingStatus::Abandoned
        );
        assert!("equator".parse::<Hemisphere>().is_err());
    }
}
