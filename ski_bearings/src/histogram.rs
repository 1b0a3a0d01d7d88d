//! Multi-resolution bearing histograms.
//!
//! Bin edges are not placed at multiples of `360 / n`: that would split common
//! headings such as due north across two bins. Instead each resolution is built
//! from `2n` half-width bins which are rotated by one position and merged in
//! pairs, so every reported bin is centered on a multiple of `360 / n`.

use std::collections::{BTreeMap, BTreeSet};

use ndarray::{s, Array1};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::segment::{check_bearing, check_magnitude};
use crate::BearingError;

pub const DEFAULT_BIN_RESOLUTIONS: [u32; 4] = [2, 4, 8, 32];

/// 32-wind compass rose labels keyed by heading, sorted by heading.
pub const BEARING_LABELS: [(f64, &str); 32] = [
    (0.0, "N"),
    (11.25, "NbE"),
    (22.5, "NNE"),
    (33.75, "NEbN"),
    (45.0, "NE"),
    (56.25, "NEbE"),
    (67.5, "ENE"),
    (78.75, "EbN"),
    (90.0, "E"),
    (101.25, "EbS"),
    (112.5, "ESE"),
    (123.75, "SEbE"),
    (135.0, "SE"),
    (146.25, "SEbS"),
    (157.5, "SSE"),
    (168.75, "SbE"),
    (180.0, "S"),
    (191.25, "SbW"),
    (202.5, "SSW"),
    (213.75, "SWbS"),
    (225.0, "SW"),
    (236.25, "SWbW"),
    (247.5, "WSW"),
    (258.75, "WbS"),
    (270.0, "W"),
    (281.25, "WbN"),
    (292.5, "WNW"),
    (303.75, "NWbW"),
    (315.0, "NW"),
    (326.25, "NWbN"),
    (337.5, "NNW"),
    (348.75, "NbW"),
];

/// Compass label for a bin center, if it is one of the 32 canonical winds.
pub fn bin_label(center: f64) -> Option<&'static str> {
    BEARING_LABELS
        .binary_search_by_key(&OrderedFloat(center), |(heading, _)| OrderedFloat(*heading))
        .ok()
        .map(|idx| BEARING_LABELS[idx].1)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BearingBin {
    pub num_bins: u32,
    /// 1-based position within its resolution.
    pub bin_index: u32,
    pub bin_center: f64,
    pub bin_count: f64,
    pub bin_proportion: f64,
    pub bin_label: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct BearingHistogram {
    pub bins: Vec<BearingBin>,
}

impl BearingHistogram {
    pub fn resolutions(&self) -> Vec<u32> {
        let mut out: Vec<u32> = self.bins.iter().map(|b| b.num_bins).collect();
        out.dedup();
        out
    }

    pub fn resolution(&self, num_bins: u32) -> impl Iterator<Item = &BearingBin> + '_ {
        self.bins.iter().filter(move |b| b.num_bins == num_bins)
    }

    pub fn total_count(&self, num_bins: u32) -> f64 {
        self.resolution(num_bins).map(|b| b.bin_count).sum()
    }
}

/// Weighted histogram of `bearings` at a single resolution.
pub fn bearing_histogram(
    bearings: &[f64],
    weights: &[f64],
    num_bins: u32,
) -> Result<Vec<BearingBin>, BearingError> {
    validate_inputs(bearings, weights)?;
    if num_bins == 0 {
        return Err(BearingError::InvalidParameter(
            "num_bins must be positive".into(),
        ));
    }
    Ok(build_resolution(bearings, weights, num_bins))
}

/// Histograms at each of `resolutions`, concatenated in the given order.
pub fn bearing_histograms(
    bearings: &[f64],
    weights: &[f64],
    resolutions: &[u32],
) -> Result<BearingHistogram, BearingError> {
    validate_inputs(bearings, weights)?;
    if resolutions.contains(&0) {
        return Err(BearingError::InvalidParameter(
            "num_bins must be positive".into(),
        ));
    }
    if let Some(n) = duplicate_resolution(resolutions) {
        return Err(BearingError::InvalidParameter(format!(
            "bin resolution {n} listed more than once"
        )));
    }
    let bins = resolutions
        .iter()
        .flat_map(|&n| build_resolution(bearings, weights, n))
        .collect();
    Ok(BearingHistogram { bins })
}

/// First resolution that appears more than once, if any.
pub(crate) fn duplicate_resolution(resolutions: &[u32]) -> Option<u32> {
    let mut seen = BTreeSet::new();
    resolutions.iter().copied().find(|&n| !seen.insert(n))
}

fn validate_inputs(bearings: &[f64], weights: &[f64]) -> Result<(), BearingError> {
    if bearings.len() != weights.len() {
        return Err(BearingError::LengthMismatch {
            field: "weights",
            expected: bearings.len(),
            actual: weights.len(),
        });
    }
    for (idx, (&bearing, &weight)) in bearings.iter().zip(weights).enumerate() {
        check_bearing(idx, bearing)?;
        check_magnitude("weight", idx, weight)?;
    }
    Ok(())
}

fn build_resolution(bearings: &[f64], weights: &[f64], num_bins: u32) -> Vec<BearingBin> {
    let split_bins = num_bins as usize * 2;
    let edges: Vec<f64> = (0..=split_bins)
        .map(|k| (k * 360) as f64 / split_bins as f64)
        .collect();

    let mut split = Array1::<f64>::zeros(split_bins);
    for (&bearing, &weight) in bearings.iter().zip(weights) {
        // index of the last edge <= bearing, matching a right-searchsorted lookup
        let idx = edges
            .partition_point(|&edge| edge <= bearing)
            .saturating_sub(1)
            .min(split_bins - 1);
        split[idx] += weight;
    }

    let mut rolled = Array1::<f64>::zeros(split_bins);
    rolled[0] = split[split_bins - 1];
    rolled
        .slice_mut(s![1..])
        .assign(&split.slice(s![..split_bins - 1]));
    let counts = &rolled.slice(s![..;2]) + &rolled.slice(s![1..;2]);

    let total: f64 = counts.sum();
    counts
        .iter()
        .enumerate()
        .map(|(i, &count)| {
            let center = edges[2 * i];
            BearingBin {
                num_bins,
                bin_index: i as u32 + 1,
                bin_center: center,
                bin_count: count,
                bin_proportion: proportion(count, total),
                bin_label: bin_label(center).map(str::to_string),
            }
        })
        .collect()
}

pub(crate) fn proportion(count: f64, total: f64) -> f64 {
    if total > 0.0 {
        count / total
    } else {
        0.0
    }
}

/// Combine member histograms by summing counts per `(num_bins, bin_index)` and
/// recomputing proportions against each resolution's combined total.
pub fn sum_histograms<'a, I>(histograms: I) -> BearingHistogram
where
    I: IntoIterator<Item = &'a BearingHistogram>,
{
    let mut merged: BTreeMap<(u32, u32), BearingBin> = BTreeMap::new();
    for histogram in histograms {
        for bin in &histogram.bins {
            merged
                .entry((bin.num_bins, bin.bin_index))
                .and_modify(|acc| acc.bin_count += bin.bin_count)
                .or_insert_with(|| bin.clone());
        }
    }

    let mut totals: BTreeMap<u32, f64> = BTreeMap::new();
    for ((num_bins, _), bin) in &merged {
        *totals.entry(*num_bins).or_insert(0.0) += bin.bin_count;
    }

    let bins = merged
        .into_values()
        .map(|mut bin| {
            let total = totals.get(&bin.num_bins).copied().unwrap_or(0.0);
            bin.bin_proportion = proportion(bin.bin_count, total);
            bin
        })
        .collect();
    BearingHistogram { bins }
}
