use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

use crate::segment::{check_bearing, check_magnitude, Segment};
use crate::{round_output, round_to, BearingError, Hemisphere, ZERO_EPSILON};

/// Decimal places applied to the mean direction in radians before it is
/// converted to degrees, so an exact cancellation cannot wrap to 360.
const RADIAN_PRECISION: i32 = 12;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct BearingSummaryStats {
    /// Mean bearing in degrees, `[0, 360)`.
    pub bearing_mean: f64,
    /// Resultant length over cumulative magnitude; 1 when every segment points
    /// the same way.
    pub bearing_alignment: f64,
    pub bearing_magnitude_net: f64,
    pub bearing_magnitude_cum: f64,
    /// Positive toward the nearest pole, negative toward the equator. `None`
    /// when the hemisphere is unknown.
    pub poleward_affinity: Option<f64>,
    pub eastward_affinity: f64,
}

/// Running vector sum of weighted bearings plus the cumulative magnitude.
///
/// Unlike the mean bearing this is additive, which is what lets group summaries
/// be rebuilt from member summaries.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ResultantVector {
    pub x: f64,
    pub y: f64,
    pub cum: f64,
}

impl ResultantVector {
    pub fn from_bearing(bearing: f64, net_magnitude: f64, cum_magnitude: f64) -> Self {
        let rad = bearing.to_radians();
        Self {
            x: net_magnitude * rad.cos(),
            y: net_magnitude * rad.sin(),
            cum: cum_magnitude,
        }
    }

    pub fn from_segment(segment: &Segment) -> Self {
        Self::from_bearing(
            segment.bearing,
            segment.net_magnitude,
            segment.cum_magnitude,
        )
    }

    /// Reconstruct the resultant of an already summarized entity.
    pub fn from_stats(stats: &BearingSummaryStats) -> Self {
        Self::from_bearing(
            stats.bearing_mean,
            stats.bearing_magnitude_net,
            stats.bearing_magnitude_cum,
        )
    }

    pub fn magnitude(&self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn summarize(&self, hemisphere: Option<Hemisphere>) -> BearingSummaryStats {
        let magnitude_net = self.magnitude();
        let alignment = if self.cum > ZERO_EPSILON {
            magnitude_net / self.cum
        } else {
            0.0
        };
        let mean_rad = if magnitude_net > ZERO_EPSILON {
            round_to(self.y.atan2(self.x), RADIAN_PRECISION)
        } else {
            0.0
        };
        let mut bearing_mean = round_output(mean_rad.to_degrees().rem_euclid(360.0));
        if bearing_mean >= 360.0 {
            bearing_mean = 0.0;
        }
        let poleward = hemisphere.map(|h| match h {
            Hemisphere::North => alignment * mean_rad.cos(),
            Hemisphere::South => -alignment * mean_rad.cos(),
        });
        BearingSummaryStats {
            bearing_mean,
            bearing_alignment: round_output(alignment),
            bearing_magnitude_net: round_output(magnitude_net),
            bearing_magnitude_cum: round_output(self.cum),
            poleward_affinity: poleward.map(round_output),
            eastward_affinity: round_output(alignment * mean_rad.sin()),
        }
    }
}

impl Add for ResultantVector {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
            cum: self.cum + rhs.cum,
        }
    }
}

impl AddAssign for ResultantVector {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for ResultantVector {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

/// Summary statistics for parallel sequences of bearings and magnitudes.
///
/// Missing magnitude sequences default to 1 per bearing. Empty or all-zero
/// input yields the degenerate summary (mean 0, alignment 0) rather than an
/// error.
///
/// The summed net magnitude may not exceed the summed cumulative magnitude;
/// that bound is what keeps alignment in `[0, 1]` and the affinities in
/// `[-1, 1]`, so input breaking it is rejected.
pub fn bearing_summary_stats(
    bearings: &[f64],
    net_magnitudes: Option<&[f64]>,
    cum_magnitudes: Option<&[f64]>,
    hemisphere: Option<Hemisphere>,
) -> Result<BearingSummaryStats, BearingError> {
    let n = bearings.len();
    for (field, values) in [
        ("net_magnitude", net_magnitudes),
        ("cum_magnitude", cum_magnitudes),
    ] {
        if let Some(values) = values {
            if values.len() != n {
                return Err(BearingError::LengthMismatch {
                    field,
                    expected: n,
                    actual: values.len(),
                });
            }
        }
    }

    let mut total = ResultantVector::default();
    let mut net_total = 0.0;
    for (idx, &bearing) in bearings.iter().enumerate() {
        let net = net_magnitudes.map_or(1.0, |v| v[idx]);
        let cum = cum_magnitudes.map_or(1.0, |v| v[idx]);
        check_bearing(idx, bearing)?;
        check_magnitude("net_magnitude", idx, net)?;
        check_magnitude("cum_magnitude", idx, cum)?;
        net_total += net;
        total += ResultantVector::from_bearing(bearing, net, cum);
    }
    check_net_within_cum(net_total, total.cum)?;
    Ok(total.summarize(hemisphere))
}

pub fn summarize_segments(
    segments: &[Segment],
    hemisphere: Option<Hemisphere>,
) -> Result<BearingSummaryStats, BearingError> {
    let mut total = ResultantVector::default();
    let mut net_total = 0.0;
    for (idx, segment) in segments.iter().enumerate() {
        segment.validate(idx)?;
        net_total += segment.net_magnitude;
        total += ResultantVector::from_segment(segment);
    }
    check_net_within_cum(net_total, total.cum)?;
    Ok(total.summarize(hemisphere))
}

fn check_net_within_cum(net: f64, cum: f64) -> Result<(), BearingError> {
    // relative slack for float summation
    if net - cum > ZERO_EPSILON * cum.max(1.0) {
        return Err(BearingError::NetExceedsCumulative { net, cum });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_single_bearing_north() {
        let stats =
            bearing_summary_stats(&[0.0], Some(&[2.0]), Some(&[2.0]), Some(Hemisphere::North))
                .unwrap();
        assert_eq!(stats.bearing_mean, 0.0);
        assert_eq!(stats.bearing_alignment, 1.0);
        assert_eq!(stats.poleward_affinity, Some(1.0));
        assert_eq!(stats.eastward_affinity, 0.0);
        assert_eq!(stats.bearing_magnitude_net, 2.0);
        assert_eq!(stats.bearing_magnitude_cum, 2.0);
    }

    #[test]
    fn test_default_cum_magnitude() {
        let stats =
            bearing_summary_stats(&[0.0, 90.0], Some(&[1.0, 1.0]), None, Some(Hemisphere::South))
                .unwrap();
        assert_close(stats.bearing_mean, 45.0);
        assert_close(stats.bearing_alignment, 0.7071068);
        assert_close(stats.poleward_affinity.unwrap(), -0.5);
        assert_close(stats.eastward_affinity, 0.5);
    }

    #[test]
    fn test_default_net_magnitude() {
        let stats =
            bearing_summary_stats(&[0.0, 90.0], None, Some(&[2.0, 2.0]), Some(Hemisphere::North))
                .unwrap();
        assert_close(stats.bearing_mean, 45.0);
        assert_close(stats.bearing_alignment, 0.3535534);
        assert_close(stats.poleward_affinity.unwrap(), 0.25);
        assert_close(stats.eastward_affinity, 0.25);
    }

    #[test]
    fn test_half_weights() {
        let stats = bearing_summary_stats(
            &[0.0, 90.0],
            Some(&[0.5, 0.5]),
            Some(&[0.5, 0.5]),
            Some(Hemisphere::North),
        )
        .unwrap();
        assert_close(stats.bearing_mean, 45.0);
        assert_close(stats.bearing_alignment, 0.7071068);
        assert_close(stats.poleward_affinity.unwrap(), 0.5);
        assert_close(stats.eastward_affinity, 0.5);
    }

    #[test]
    fn test_zero_net_weight_keeps_cum_denominator() {
        let stats = bearing_summary_stats(
            &[0.0, 90.0],
            Some(&[0.0, 1.0]),
            Some(&[0.5, 1.5]),
            Some(Hemisphere::North),
        )
        .unwrap();
        assert_close(stats.bearing_mean, 90.0);
        assert_close(stats.bearing_alignment, 0.5);
        assert_close(stats.poleward_affinity.unwrap(), 0.0);
        assert_close(stats.eastward_affinity, 0.5);
    }

    #[test]
    fn test_opposing_bearings_cancel() {
        let stats = bearing_summary_stats(&[90.0, 270.0], None, None, Some(Hemisphere::North))
            .unwrap();
        assert_eq!(stats.bearing_mean, 0.0);
        assert_eq!(stats.bearing_alignment, 0.0);
        assert_eq!(stats.poleward_affinity, Some(0.0));
        assert_eq!(stats.eastward_affinity, 0.0);
        assert_eq!(stats.bearing_magnitude_cum, 2.0);
        assert!(stats.bearing_mean.is_sign_positive());
    }

    #[test]
    fn test_zero_weight_single_bearing() {
        let stats = bearing_summary_stats(&[90.0], Some(&[0.0]), None, Some(Hemisphere::North))
            .unwrap();
        assert_eq!(stats.bearing_mean, 0.0);
        assert_eq!(stats.bearing_alignment, 0.0);
        assert_eq!(stats.poleward_affinity, Some(0.0));
        assert_eq!(stats.eastward_affinity, 0.0);
    }

    #[test]
    fn test_unequal_net_and_cum() {
        let stats = bearing_summary_stats(
            &[0.0, 90.0],
            Some(&[2.0, 4.0]),
            Some(&[10.0, 10.0]),
            Some(Hemisphere::North),
        )
        .unwrap();
        assert_close(stats.bearing_mean, 63.4349488);
        assert_close(stats.bearing_alignment, 0.2236068);
        assert_close(stats.poleward_affinity.unwrap(), 0.1);
        assert_close(stats.eastward_affinity, 0.2);
    }

    #[test]
    fn test_unknown_hemisphere_has_no_poleward() {
        let stats = bearing_summary_stats(&[200.0], None, None, None).unwrap();
        assert_eq!(stats.poleward_affinity, None);
        assert_close(stats.bearing_mean, 200.0);
        assert!(stats.eastward_affinity < 0.0);
    }

    #[test]
    fn test_empty_input_is_degenerate_not_error() {
        let stats = bearing_summary_stats(&[], None, None, Some(Hemisphere::South)).unwrap();
        assert_eq!(stats.bearing_mean, 0.0);
        assert_eq!(stats.bearing_alignment, 0.0);
        assert_eq!(stats.bearing_magnitude_net, 0.0);
        assert_eq!(stats.bearing_magnitude_cum, 0.0);
        assert_eq!(stats.poleward_affinity, Some(0.0));
    }

    #[test]
    fn test_near_north_does_not_wrap_to_360() {
        let stats = bearing_summary_stats(&[359.99999999, 0.00000001], None, None, None).unwrap();
        assert_eq!(stats.bearing_mean, 0.0);
    }

    #[test]
    fn test_rejects_contract_violations() {
        let err = bearing_summary_stats(&[0.0, 1.0], Some(&[1.0]), None, None).unwrap_err();
        assert_eq!(
            err,
            BearingError::LengthMismatch {
                field: "net_magnitude",
                expected: 2,
                actual: 1
            }
        );
        assert!(matches!(
            bearing_summary_stats(&[0.0], None, Some(&[-1.0]), None),
            Err(BearingError::InvalidMagnitude {
                field: "cum_magnitude",
                ..
            })
        ));
        assert!(matches!(
            bearing_summary_stats(&[-5.0], None, None, None),
            Err(BearingError::InvalidBearing { .. })
        ));
    }

    #[test]
    fn test_net_above_cum_is_rejected() {
        assert_eq!(
            bearing_summary_stats(&[90.0], Some(&[3.0]), Some(&[1.0]), None),
            Err(BearingError::NetExceedsCumulative { net: 3.0, cum: 1.0 })
        );
        // defaulted cum of 1 per bearing
        assert!(matches!(
            bearing_summary_stats(&[0.0, 10.0], Some(&[2.0, 2.0]), None, None),
            Err(BearingError::NetExceedsCumulative { .. })
        ));
        assert!(matches!(
            summarize_segments(&[Segment::new(45.0, 5.0, 2.0)], Some(Hemisphere::North)),
            Err(BearingError::NetExceedsCumulative { .. })
        ));
        // one segment above its own cum is fine while the totals hold
        let stats = bearing_summary_stats(
            &[90.0, 90.0],
            Some(&[2.0, 0.0]),
            Some(&[1.0, 1.0]),
            Some(Hemisphere::North),
        )
        .unwrap();
        assert_eq!(stats.bearing_alignment, 1.0);
        assert_eq!(stats.eastward_affinity, 1.0);
    }

    #[test]
    fn test_reconstructed_resultant_matches() {
        let segments = [
            Segment::from_vertical(10.0, 3.0),
            Segment::from_vertical(80.0, 1.0),
            Segment::new(300.0, 2.0, 2.5),
        ];
        let stats = summarize_segments(&segments, Some(Hemisphere::North)).unwrap();
        let rebuilt = ResultantVector::from_stats(&stats).summarize(Some(Hemisphere::North));
        assert_close(rebuilt.bearing_mean, stats.bearing_mean);
        assert_close(rebuilt.bearing_alignment, stats.bearing_alignment);
        assert_close(rebuilt.bearing_magnitude_net, stats.bearing_magnitude_net);
        assert_close(rebuilt.bearing_magnitude_cum, stats.bearing_magnitude_cum);
    }

    #[test]
    fn test_resultant_sum() {
        let total: ResultantVector = [
            ResultantVector::from_bearing(0.0, 1.0, 1.0),
            ResultantVector::from_bearing(180.0, 1.0, 2.0),
        ]
        .into_iter()
        .sum();
        assert!(total.magnitude() < 1e-12);
        assert_eq!(total.cum, 3.0);
    }
}
