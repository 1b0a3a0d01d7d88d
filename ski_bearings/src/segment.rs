use serde::{Deserialize, Serialize};

use crate::{BearingError, Hemisphere};

/// One directed edge of a run: travel direction plus the two weights used by the
/// circular statistics.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub bearing: f64,
    pub net_magnitude: f64,
    pub cum_magnitude: f64,
}

impl Segment {
    pub fn new(bearing: f64, net_magnitude: f64, cum_magnitude: f64) -> Self {
        Self {
            bearing,
            net_magnitude,
            cum_magnitude,
        }
    }

    /// Segment whose net and cumulative weights are both the vertical drop.
    pub fn from_vertical(bearing: f64, vertical_drop: f64) -> Self {
        Self::new(bearing, vertical_drop, vertical_drop)
    }

    pub fn validate(&self, index: usize) -> Result<(), BearingError> {
        check_bearing(index, self.bearing)?;
        check_magnitude("net_magnitude", index, self.net_magnitude)?;
        check_magnitude("cum_magnitude", index, self.cum_magnitude)
    }
}

/// Segment as delivered by the geometry extraction step, tagged with its run
/// and ski area.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RunSegment {
    pub ski_area_id: String,
    pub run_id: String,
    pub bearing: f64,
    pub vertical_drop: f64,
    #[serde(default)]
    pub distance_3d: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// Elevation at the downhill end of the segment.
    pub elevation: f64,
}

impl RunSegment {
    pub fn segment(&self) -> Segment {
        Segment::from_vertical(self.bearing, self.vertical_drop)
    }

    pub fn hemisphere(&self) -> Option<Hemisphere> {
        hemisphere_from_latitude(self.latitude)
    }

    pub fn validate(&self, index: usize) -> Result<(), BearingError> {
        self.segment().validate(index)?;
        check_magnitude("distance_3d", index, self.distance_3d)?;
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(BearingError::InvalidParameter(format!(
                "latitude at index {index} out of range: {}",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(BearingError::InvalidParameter(format!(
                "longitude at index {index} out of range: {}",
                self.longitude
            )));
        }
        if !self.elevation.is_finite() {
            return Err(BearingError::InvalidParameter(format!(
                "elevation at index {index} is not finite"
            )));
        }
        Ok(())
    }
}

pub(crate) fn check_bearing(index: usize, value: f64) -> Result<(), BearingError> {
    if value.is_finite() && (0.0..360.0).contains(&value) {
        Ok(())
    } else {
        Err(BearingError::InvalidBearing { index, value })
    }
}

pub(crate) fn check_magnitude(
    field: &'static str,
    index: usize,
    value: f64,
) -> Result<(), BearingError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(BearingError::InvalidMagnitude {
            field,
            index,
            value,
        })
    }
}

/// Hemisphere of a latitude; the equator itself is unassigned.
pub fn hemisphere_from_latitude(latitude: f64) -> Option<Hemisphere> {
    if latitude > 0.0 {
        Some(Hemisphere::North)
    } else if latitude < 0.0 {
        Some(Hemisphere::South)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hemisphere_from_latitude() {
        assert_eq!(hemisphere_from_latitude(44.3), Some(Hemisphere::North));
        assert_eq!(hemisphere_from_latitude(-33.1), Some(Hemisphere::South));
        assert_eq!(hemisphere_from_latitude(0.0), None);
    }

    #[test]
    fn test_segment_validation() {
        assert!(Segment::new(359.9, 1.0, 1.0).validate(0).is_ok());
        assert!(matches!(
            Segment::new(360.0, 1.0, 1.0).validate(3),
            Err(BearingError::InvalidBearing { index: 3, .. })
        ));
        assert!(matches!(
            Segment::new(10.0, -0.5, 1.0).validate(0),
            Err(BearingError::InvalidMagnitude {
                field: "net_magnitude",
                ..
            })
        ));
        assert!(Segment::new(f64::NAN, 1.0, 1.0).validate(0).is_err());
    }
}
