//! Roll ski area summaries up into groups (region, country, hemisphere, ...).
//!
//! Group statistics are rebuilt from each member's stored resultant vector and
//! cumulative magnitude; raw segments are never revisited. Histograms are
//! combined by summing counts per bin.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::analyze::SkiAreaMetrics;
use crate::histogram::{sum_histograms, BearingHistogram};
use crate::stats::{BearingSummaryStats, ResultantVector};
use crate::{BearingError, Hemisphere, OperatingStatus, Params};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GroupField {
    Hemisphere,
    Country,
    Region,
    Status,
}

impl GroupField {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupField::Hemisphere => "hemisphere",
            GroupField::Country => "country",
            GroupField::Region => "region",
            GroupField::Status => "status",
        }
    }

    pub fn value(&self, area: &SkiAreaMetrics) -> Option<String> {
        match self {
            GroupField::Hemisphere => area.hemisphere.map(|h| h.to_string()),
            GroupField::Country => area.area.country.clone(),
            GroupField::Region => area.area.region.clone(),
            GroupField::Status => area.area.status.map(|s| s.to_string()),
        }
    }
}

impl fmt::Display for GroupField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupField {
    type Err = BearingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hemisphere" => Ok(GroupField::Hemisphere),
            "country" => Ok(GroupField::Country),
            "region" => Ok(GroupField::Region),
            "status" => Ok(GroupField::Status),
            _ => Err(BearingError::UnknownGroupField(s.to_string())),
        }
    }
}

/// Predicate on a ski area; a filter list matches when every entry matches.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SkiAreaFilter {
    CountryIs(String),
    HasCountry,
    HasRegion,
    HasHemisphere,
    HemisphereIs(Hemisphere),
    StatusIn(Vec<OperatingStatus>),
    HasName,
    MinRunCount(usize),
    MinCombinedVertical(f64),
}

impl SkiAreaFilter {
    pub fn matches(&self, area: &SkiAreaMetrics) -> bool {
        match self {
            SkiAreaFilter::CountryIs(country) => {
                area.area.country.as_deref() == Some(country.as_str())
            }
            SkiAreaFilter::HasCountry => area.area.country.is_some(),
            SkiAreaFilter::HasRegion => area.area.region.is_some(),
            SkiAreaFilter::HasHemisphere => area.hemisphere.is_some(),
            SkiAreaFilter::HemisphereIs(h) => area.hemisphere == Some(*h),
            SkiAreaFilter::StatusIn(statuses) => area
                .area
                .status
                .map_or(false, |status| statuses.contains(&status)),
            SkiAreaFilter::HasName => area.area.ski_area_name.is_some(),
            SkiAreaFilter::MinRunCount(min) => area.run_count >= *min,
            SkiAreaFilter::MinCombinedVertical(min) => area.combined_vertical >= *min,
        }
    }

    pub fn matches_all(filters: &[SkiAreaFilter], area: &SkiAreaMetrics) -> bool {
        filters.iter().all(|f| f.matches(area))
    }
}

/// Filters selecting the ski areas worth displaying individually.
pub fn display_filters(params: &Params) -> Vec<SkiAreaFilter> {
    vec![
        SkiAreaFilter::MinRunCount(params.display_min_run_count),
        SkiAreaFilter::MinCombinedVertical(params.display_min_combined_vertical),
        SkiAreaFilter::HasName,
    ]
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GroupMetrics {
    pub group_by: Vec<GroupField>,
    /// One value per `group_by` field.
    pub key: Vec<Option<String>>,
    pub group_name: Option<String>,
    pub ski_area_ids: Vec<String>,
    pub ski_areas_count: usize,
    pub country_count: usize,
    pub run_count: usize,
    pub segment_count: usize,
    pub lift_count: u64,
    pub combined_vertical: f64,
    pub combined_distance: f64,
    pub min_elevation: Option<f64>,
    pub max_elevation: Option<f64>,
    pub vertical_drop: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub hemisphere: Option<Hemisphere>,
    pub bearing_stats: BearingSummaryStats,
    pub bearings: BearingHistogram,
}

impl GroupMetrics {
    pub fn key_value(&self, field: GroupField) -> Option<&str> {
        self.group_by
            .iter()
            .position(|f| *f == field)
            .and_then(|idx| self.key.get(idx))
            .and_then(|v| v.as_deref())
    }

    /// Human readable label: the explicit group name, else the key values.
    pub fn label(&self) -> String {
        if let Some(name) = &self.group_name {
            return name.clone();
        }
        self.key
            .iter()
            .map(|v| v.as_deref().unwrap_or("null"))
            .collect::<Vec<_>>()
            .join(" / ")
    }
}

/// Group ski areas by `group_by` and combine each group's summaries.
///
/// Groups come from the data: only keys with at least one member are emitted,
/// sorted by key with missing values first.
pub fn aggregate_ski_areas(
    areas: &[SkiAreaMetrics],
    group_by: &[GroupField],
    filters: &[SkiAreaFilter],
) -> Result<Vec<GroupMetrics>, BearingError> {
    if group_by.is_empty() {
        return Err(BearingError::InvalidParameter(
            "at least one grouping field is required".into(),
        ));
    }

    let mut groups: BTreeMap<Vec<Option<String>>, Vec<&SkiAreaMetrics>> = BTreeMap::new();
    for area in areas
        .iter()
        .filter(|a| SkiAreaFilter::matches_all(filters, a))
    {
        let key = group_by.iter().map(|f| f.value(area)).collect();
        groups.entry(key).or_default().push(area);
    }
    debug!(
        "Aggregating {} ski areas into {} groups by {:?}",
        groups.values().map(Vec::len).sum::<usize>(),
        groups.len(),
        group_by
    );

    let groups: Vec<_> = groups.into_iter().collect();
    Ok(groups
        .into_par_iter()
        .map(|(key, members)| combine_group(group_by, key, &members))
        .collect())
}

fn combine_group(
    group_by: &[GroupField],
    key: Vec<Option<String>>,
    members: &[&SkiAreaMetrics],
) -> GroupMetrics {
    let countries: BTreeSet<&str> = members
        .iter()
        .filter_map(|m| m.area.country.as_deref())
        .collect();

    let min_elevation = members
        .iter()
        .filter_map(|m| m.min_elevation)
        .reduce(f64::min);
    let max_elevation = members
        .iter()
        .filter_map(|m| m.max_elevation)
        .reduce(f64::max);

    let (resultant, hemispheres) = members
        .iter()
        .filter_map(|m| m.bearing_stats.as_ref().map(|s| (s, m.hemisphere)))
        .fold(
            (ResultantVector::default(), BTreeSet::new()),
            |(total, mut seen), (stats, hemisphere)| {
                seen.insert(hemisphere);
                (total + ResultantVector::from_stats(stats), seen)
            },
        );
    let hemisphere = match hemispheres.iter().next() {
        Some(&only) if hemispheres.len() == 1 => only,
        _ => None,
    };

    GroupMetrics {
        group_by: group_by.to_vec(),
        key,
        group_name: None,
        ski_area_ids: members.iter().map(|m| m.area.ski_area_id.clone()).collect(),
        ski_areas_count: members.len(),
        country_count: countries.len(),
        run_count: members.iter().map(|m| m.run_count).sum(),
        segment_count: members.iter().map(|m| m.segment_count).sum(),
        lift_count: members.iter().map(|m| u64::from(m.area.lift_count)).sum(),
        combined_vertical: members.iter().map(|m| m.combined_vertical).sum(),
        combined_distance: members.iter().map(|m| m.combined_distance).sum(),
        min_elevation,
        max_elevation,
        vertical_drop: min_elevation
            .zip(max_elevation)
            .map(|(lo, hi)| hi - lo),
        latitude: mean(members.iter().filter_map(|m| m.latitude)),
        longitude: mean(members.iter().filter_map(|m| m.longitude)),
        hemisphere,
        bearing_stats: resultant.summarize(hemisphere),
        bearings: sum_histograms(members.iter().map(|m| &m.bearings)),
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

const OPERATING: &[OperatingStatus] = &[OperatingStatus::Operating];

/// Operating, named ski areas in the United States grouped by state.
pub fn by_us_state(areas: &[SkiAreaMetrics]) -> Result<Vec<GroupMetrics>, BearingError> {
    aggregate_ski_areas(
        areas,
        &[GroupField::Region],
        &[
            SkiAreaFilter::CountryIs("United States".into()),
            SkiAreaFilter::HasRegion,
            SkiAreaFilter::StatusIn(OPERATING.to_vec()),
            SkiAreaFilter::HasName,
        ],
    )
}

pub fn by_hemisphere(areas: &[SkiAreaMetrics]) -> Result<Vec<GroupMetrics>, BearingError> {
    aggregate_ski_areas(
        areas,
        &[GroupField::Hemisphere],
        &[
            SkiAreaFilter::HasHemisphere,
            SkiAreaFilter::StatusIn(OPERATING.to_vec()),
            SkiAreaFilter::HasName,
        ],
    )
}

/// Operating versus abandoned ski areas, northern hemisphere only.
pub fn by_status(areas: &[SkiAreaMetrics]) -> Result<Vec<GroupMetrics>, BearingError> {
    let mut groups = aggregate_ski_areas(
        areas,
        &[GroupField::Hemisphere, GroupField::Status],
        &[
            SkiAreaFilter::HemisphereIs(Hemisphere::North),
            SkiAreaFilter::StatusIn(vec![OperatingStatus::Abandoned, OperatingStatus::Operating]),
        ],
    )?;
    for group in &mut groups {
        let status = group.key_value(GroupField::Status).unwrap_or("unknown");
        let hemisphere = group.key_value(GroupField::Hemisphere).unwrap_or("unknown");
        group.group_name = Some(format!(
            "{} in {} Hem.",
            title_case(status),
            title_case(hemisphere)
        ));
    }
    Ok(groups)
}

pub fn by_country(areas: &[SkiAreaMetrics]) -> Result<Vec<GroupMetrics>, BearingError> {
    aggregate_ski_areas(
        areas,
        &[GroupField::Country],
        &[
            SkiAreaFilter::HasCountry,
            SkiAreaFilter::StatusIn(OPERATING.to_vec()),
            SkiAreaFilter::HasName,
        ],
    )
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// One preset grouping with its qualifying groups.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RoseGrouping {
    pub grouping: String,
    pub groups: Vec<GroupMetrics>,
}

/// Every preset grouping, keeping groups with enough combined vertical to
/// make a meaningful rose. Groupings left without groups are omitted.
pub fn world_rose_groupings(
    areas: &[SkiAreaMetrics],
    params: &Params,
) -> Result<Vec<RoseGrouping>, BearingError> {
    let presets: [(&str, fn(&[SkiAreaMetrics]) -> Result<Vec<GroupMetrics>, BearingError>); 4] = [
        ("hemisphere", by_hemisphere),
        ("group_name", by_status),
        ("country", by_country),
        ("region", by_us_state),
    ];
    let mut out = Vec::with_capacity(presets.len());
    for (grouping, preset) in presets {
        let groups: Vec<GroupMetrics> = preset(areas)?
            .into_iter()
            .filter(|g| g.combined_vertical >= params.rose_min_combined_vertical)
            .collect();
        if groups.is_empty() {
            info!(
                "Skipping {} roses: no groups with combined_vertical >= {}m",
                grouping, params.rose_min_combined_vertical
            );
            continue;
        }
        out.push(RoseGrouping {
            grouping: grouping.to_string(),
            groups,
        });
    }
    Ok(out)
}
