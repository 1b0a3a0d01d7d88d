use std::collections::{BTreeMap, BTreeSet, HashSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::histogram::{bearing_histograms, BearingHistogram};
use crate::segment::{RunSegment, Segment};
use crate::stats::{summarize_segments, BearingSummaryStats};
use crate::{BearingError, Hemisphere, OperatingStatus, Params};

/// Ski area metadata, keyed on `ski_area_id`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SkiArea {
    pub ski_area_id: String,
    #[serde(default)]
    pub ski_area_name: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub locality: Option<String>,
    #[serde(default)]
    pub status: Option<OperatingStatus>,
    #[serde(default)]
    pub lift_count: u32,
}

impl SkiArea {
    pub fn new(ski_area_id: impl Into<String>) -> Self {
        Self {
            ski_area_id: ski_area_id.into(),
            ski_area_name: None,
            country: None,
            region: None,
            locality: None,
            status: None,
            lift_count: 0,
        }
    }
}

/// Per ski area rollup of its downhill segments.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SkiAreaMetrics {
    #[serde(flatten)]
    pub area: SkiArea,
    pub run_count: usize,
    pub segment_count: usize,
    pub combined_vertical: f64,
    pub combined_distance: f64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub min_elevation: Option<f64>,
    pub max_elevation: Option<f64>,
    pub vertical_drop: Option<f64>,
    pub hemisphere: Option<Hemisphere>,
    /// `None` when the area has no segments.
    pub bearing_stats: Option<BearingSummaryStats>,
    pub bearings: BearingHistogram,
}

impl SkiAreaMetrics {
    /// Row for an area without any qualifying segments. The histogram is left
    /// without bins; [`analyze_ski_areas`] fills in zero bins per resolution.
    pub fn empty(area: SkiArea) -> Self {
        Self {
            area,
            run_count: 0,
            segment_count: 0,
            combined_vertical: 0.0,
            combined_distance: 0.0,
            latitude: None,
            longitude: None,
            min_elevation: None,
            max_elevation: None,
            vertical_drop: None,
            hemisphere: None,
            bearing_stats: None,
            bearings: BearingHistogram::default(),
        }
    }

    pub fn ski_area_id(&self) -> &str {
        &self.area.ski_area_id
    }
}

/// Summarize every ski area from its segments.
///
/// Areas are returned in input order. Areas without segments still produce a
/// row with zero counts and no statistics; segments that reference an unknown
/// ski area are dropped.
pub fn analyze_ski_areas(
    areas: &[SkiArea],
    segments: &[RunSegment],
    params: &Params,
) -> Result<Vec<SkiAreaMetrics>, BearingError> {
    params.validate()?;
    for (idx, segment) in segments.iter().enumerate() {
        segment.validate(idx)?;
    }

    let mut known: HashSet<&str> = HashSet::with_capacity(areas.len());
    for area in areas {
        if !known.insert(area.ski_area_id.as_str()) {
            return Err(BearingError::InvalidParameter(format!(
                "duplicate ski_area_id {}",
                area.ski_area_id
            )));
        }
    }

    let mut by_area: BTreeMap<&str, Vec<&RunSegment>> = BTreeMap::new();
    let mut orphaned = 0usize;
    for segment in segments {
        if known.contains(segment.ski_area_id.as_str()) {
            by_area
                .entry(segment.ski_area_id.as_str())
                .or_default()
                .push(segment);
        } else {
            orphaned += 1;
        }
    }
    if orphaned > 0 {
        warn!("Dropped {} segments referencing unknown ski areas", orphaned);
    }

    let metrics = areas
        .par_iter()
        .map(|area| {
            let members = by_area
                .get(area.ski_area_id.as_str())
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            summarize_area(area, members, params)
        })
        .collect::<Result<Vec<_>, _>>()?;

    debug!(
        "Analyzed {} ski areas from {} segments",
        metrics.len(),
        segments.len() - orphaned
    );
    Ok(metrics)
}

fn summarize_area(
    area: &SkiArea,
    segments: &[&RunSegment],
    params: &Params,
) -> Result<SkiAreaMetrics, BearingError> {
    if segments.is_empty() {
        let mut row = SkiAreaMetrics::empty(area.clone());
        row.bearings = bearing_histograms(&[], &[], &params.bin_resolutions)?;
        return Ok(row);
    }

    let count = segments.len() as f64;
    let runs: BTreeSet<&str> = segments.iter().map(|s| s.run_id.as_str()).collect();
    let hemispheres: BTreeSet<Option<Hemisphere>> =
        segments.iter().map(|s| s.hemisphere()).collect();
    let hemisphere = match hemispheres.iter().next() {
        Some(&only) if hemispheres.len() == 1 => only,
        _ => None,
    };

    let min_elevation = segments
        .iter()
        .map(|s| s.elevation)
        .fold(f64::INFINITY, f64::min);
    let max_elevation = segments
        .iter()
        .map(|s| s.elevation)
        .fold(f64::NEG_INFINITY, f64::max);

    let plain: Vec<Segment> = segments.iter().map(|s| s.segment()).collect();
    let bearings: Vec<f64> = plain.iter().map(|s| s.bearing).collect();
    let weights: Vec<f64> = plain.iter().map(|s| s.net_magnitude).collect();

    Ok(SkiAreaMetrics {
        area: area.clone(),
        run_count: runs.len(),
        segment_count: segments.len(),
        combined_vertical: segments.iter().map(|s| s.vertical_drop).sum(),
        combined_distance: segments.iter().map(|s| s.distance_3d).sum(),
        latitude: Some(segments.iter().map(|s| s.latitude).sum::<f64>() / count),
        longitude: Some(segments.iter().map(|s| s.longitude).sum::<f64>() / count),
        min_elevation: Some(min_elevation),
        max_elevation: Some(max_elevation),
        vertical_drop: Some(max_elevation - min_elevation),
        hemisphere,
        bearing_stats: Some(summarize_segments(&plain, hemisphere)?),
        bearings: bearing_histograms(&bearings, &weights, &params.bin_resolutions)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(area: &str, run: &str, bearing: f64, drop: f64, lat: f64, elev: f64) -> RunSegment {
        RunSegment {
            ski_area_id: area.to_string(),
            run_id: run.to_string(),
            bearing,
            vertical_drop: drop,
            distance_3d: drop * 4.0,
            latitude: lat,
            longitude: -71.2,
            elevation: elev,
        }
    }

    #[test]
    fn test_analyze_rolls_up_segments() {
        let areas = vec![SkiArea::new("a"), SkiArea::new("b")];
        let segments = vec![
            seg("a", "r1", 0.0, 10.0, 44.0, 900.0),
            seg("a", "r1", 0.0, 5.0, 44.0, 895.0),
            seg("a", "r2", 90.0, 15.0, 44.2, 700.0),
            seg("zzz", "r9", 10.0, 1.0, 44.0, 100.0),
        ];
        let metrics = analyze_ski_areas(&areas, &segments, &Params::default()).unwrap();
        assert_eq!(metrics.len(), 2);

        let a = &metrics[0];
        assert_eq!(a.ski_area_id(), "a");
        assert_eq!(a.run_count, 2);
        assert_eq!(a.segment_count, 3);
        assert_eq!(a.combined_vertical, 30.0);
        assert_eq!(a.combined_distance, 120.0);
        assert_eq!(a.min_elevation, Some(700.0));
        assert_eq!(a.max_elevation, Some(900.0));
        assert_eq!(a.vertical_drop, Some(200.0));
        assert_eq!(a.hemisphere, Some(Hemisphere::North));
        let stats = a.bearing_stats.unwrap();
        assert!((stats.bearing_mean - 45.0).abs() < 1e-6);
        assert!((stats.bearing_magnitude_cum - 30.0).abs() < 1e-9);
        assert!((a.bearings.total_count(32) - 30.0).abs() < 1e-9);
        assert!(stats.poleward_affinity.is_some());
    }

    #[test]
    fn test_area_without_segments_is_kept() {
        let areas = vec![SkiArea::new("empty")];
        let metrics = analyze_ski_areas(&areas, &[], &Params::default()).unwrap();
        assert_eq!(metrics.len(), 1);
        let row = &metrics[0];
        assert_eq!(row.area, SkiArea::new("empty"));
        assert_eq!(row.segment_count, 0);
        assert_eq!(row.bearing_stats, None);
        assert_eq!(row.bearings.resolutions(), vec![2, 4, 8, 32]);
        assert_eq!(row.bearings.bins.len(), 2 + 4 + 8 + 32);
        assert!(row
            .bearings
            .bins
            .iter()
            .all(|b| b.bin_count == 0.0 && b.bin_proportion == 0.0));
    }

    #[test]
    fn test_mixed_hemispheres_leave_hemisphere_unknown() {
        let areas = vec![SkiArea::new("x")];
        let segments = vec![
            seg("x", "r1", 180.0, 10.0, 0.5, 10.0),
            seg("x", "r1", 180.0, 10.0, -0.5, 0.0),
        ];
        let metrics = analyze_ski_areas(&areas, &segments, &Params::default()).unwrap();
        assert_eq!(metrics[0].hemisphere, None);
        assert_eq!(metrics[0].bearing_stats.unwrap().poleward_affinity, None);
    }

    #[test]
    fn test_invalid_segment_is_rejected() {
        let areas = vec![SkiArea::new("a")];
        let segments = vec![seg("a", "r1", 400.0, 1.0, 45.0, 0.0)];
        let err = analyze_ski_areas(&areas, &segments, &Params::default()).unwrap_err();
        assert!(matches!(err, BearingError::InvalidBearing { index: 0, .. }));
    }

    #[test]
    fn test_duplicate_area_ids_rejected() {
        let areas = vec![SkiArea::new("a"), SkiArea::new("a")];
        assert!(analyze_ski_areas(&areas, &[], &Params::default()).is_err());
    }
}
