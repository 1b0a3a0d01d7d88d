use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use ski_bearings::{
    aggregate_ski_areas, analyze_ski_areas, by_country, by_hemisphere, by_status, by_us_state,
    display_filters, world_rose_groupings, BearingHistogram, BearingSummaryStats, GroupField,
    GroupMetrics, Params, RunSegment, SkiArea, SkiAreaFilter, SkiAreaMetrics,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Ski run bearing statistics CLI", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// JSON parameter overrides
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Log stage timings
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    profile: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Summarize every ski area from its run segments
    Analyze(AnalyzeArgs),
    /// Roll stored ski area summaries up into groups
    Aggregate(AggregateArgs),
    /// Write group tables for every preset grouping
    Roses(RosesArgs),
}

#[derive(Parser, Debug)]
struct AnalyzeArgs {
    /// Segment CSV (ski_area_id, run_id, bearing, vertical_drop, distance_3d, latitude, longitude, elevation)
    #[arg(long, value_hint = ValueHint::FilePath)]
    segments: PathBuf,

    /// Ski area metadata CSV
    #[arg(long, value_hint = ValueHint::FilePath)]
    ski_areas: PathBuf,

    /// Output JSON path for per-area metrics
    #[arg(short, long, default_value = "ski_area_metrics.json", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Optional flat per-area summary CSV
    #[arg(long, value_hint = ValueHint::FilePath)]
    summary_csv: Option<PathBuf>,

    /// Optional per-area histogram CSV
    #[arg(long, value_hint = ValueHint::FilePath)]
    bins_csv: Option<PathBuf>,

    /// Bin resolutions (comma separated)
    #[arg(long)]
    resolutions: Option<String>,

    /// Restrict CSV outputs to areas passing the display filters
    #[arg(long, action = ArgAction::SetTrue)]
    display_only: bool,
}

#[derive(Parser, Debug)]
struct AggregateArgs {
    /// Per-area metrics JSON written by `analyze`
    #[arg(long, default_value = "ski_area_metrics.json", value_hint = ValueHint::FilePath)]
    metrics: PathBuf,

    /// Grouping fields (comma separated: hemisphere,country,region,status)
    #[arg(long, conflicts_with = "preset")]
    by: Option<String>,

    /// Predefined grouping with its filters
    #[arg(long, value_enum)]
    preset: Option<PresetOpt>,

    /// Optional JSON list of ski area filters
    #[arg(long, value_hint = ValueHint::FilePath)]
    filters: Option<PathBuf>,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "groups.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Optional group histogram CSV
    #[arg(long, value_hint = ValueHint::FilePath)]
    bins_output: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct RosesArgs {
    /// Per-area metrics JSON written by `analyze`
    #[arg(long, default_value = "ski_area_metrics.json", value_hint = ValueHint::FilePath)]
    metrics: PathBuf,

    /// Directory receiving one group and one histogram CSV per grouping
    #[arg(long, default_value = "roses", value_hint = ValueHint::DirPath)]
    output_dir: PathBuf,

    /// Minimum combined vertical (m) for a group to be kept
    #[arg(long)]
    min_combined_vertical: Option<f64>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PresetOpt {
    UsState,
    Hemisphere,
    Status,
    Country,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.global.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let params = load_params(cli.global.config.as_deref())?;
    match cli.command {
        Command::Analyze(args) => handle_analyze(args, params, &cli.global),
        Command::Aggregate(args) => handle_aggregate(args, &cli.global),
        Command::Roses(args) => handle_roses(args, params, &cli.global),
    }
}

fn load_params(path: Option<&Path>) -> Result<Params> {
    let Some(path) = path else {
        return Ok(Params::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    Params::from_json(&text).with_context(|| format!("invalid config {}", path.display()))
}

fn handle_analyze(args: AnalyzeArgs, mut params: Params, global: &GlobalArgs) -> Result<()> {
    if let Some(list) = args.resolutions.as_deref() {
        params.bin_resolutions = parse_resolutions(list)?;
        params
            .validate()
            .with_context(|| format!("invalid --resolutions '{}'", list))?;
    }

    let t_read = Instant::now();
    let areas: Vec<SkiArea> = read_csv(&args.ski_areas)?;
    let segments: Vec<RunSegment> = read_csv(&args.segments)?;
    if global.profile {
        info!(
            "Read stage: {:.1} ms ({} areas, {} segments)",
            t_read.elapsed().as_secs_f64() * 1000.0,
            areas.len(),
            segments.len()
        );
    }

    let t_compute = Instant::now();
    let metrics = analyze_ski_areas(&areas, &segments, &params)?;
    if global.profile {
        info!(
            "Compute stage: {:.1} ms",
            t_compute.elapsed().as_secs_f64() * 1000.0
        );
    }
    let without_segments = metrics.iter().filter(|m| m.segment_count == 0).count();
    info!(
        "Analyzed {} ski areas ({} without segments)",
        metrics.len(),
        without_segments
    );

    let file = File::create(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;
    let mut out = io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut out, &metrics)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    out.flush()?;
    info!("Wrote ski area metrics: {}", args.output.display());

    let filters = if args.display_only {
        display_filters(&params)
    } else {
        Vec::new()
    };
    let selected: Vec<&SkiAreaMetrics> = metrics
        .iter()
        .filter(|m| SkiAreaFilter::matches_all(&filters, m))
        .collect();
    if args.display_only {
        info!("Display filters kept {} of {} areas", selected.len(), metrics.len());
    }

    if let Some(path) = args.summary_csv.as_ref() {
        let mut writer = csv_writer(path)?;
        write_area_rows(&selected, &mut writer)?;
        info!("Wrote area summary CSV: {}", path.display());
    }
    if let Some(path) = args.bins_csv.as_ref() {
        let mut writer = csv_writer(path)?;
        writer.write_record(
            ["ski_area_id"]
                .into_iter()
                .chain(BIN_COLUMNS)
                .collect::<Vec<_>>(),
        )?;
        for area in &selected {
            write_bin_rows(&[area.ski_area_id()], &area.bearings, &mut writer)?;
        }
        writer.flush()?;
        info!("Wrote area histogram CSV: {}", path.display());
    }
    Ok(())
}

fn handle_aggregate(args: AggregateArgs, global: &GlobalArgs) -> Result<()> {
    let metrics = read_metrics(&args.metrics)?;
    let extra_filters: Vec<SkiAreaFilter> = match args.filters.as_ref() {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read filters {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("{} is not a valid filter list", path.display()))?
        }
        None => Vec::new(),
    };

    let t_compute = Instant::now();
    let groups = match (args.preset, args.by.as_deref()) {
        (Some(preset), _) => {
            if !extra_filters.is_empty() {
                warn!("--filters is ignored when a preset is selected");
            }
            run_preset(preset, &metrics)?
        }
        (None, Some(by)) => {
            let fields = parse_group_fields(by)?;
            aggregate_ski_areas(&metrics, &fields, &extra_filters)?
        }
        (None, None) => return Err(anyhow!("either --by or --preset is required")),
    };
    if global.profile {
        info!(
            "Aggregate stage: {:.1} ms",
            t_compute.elapsed().as_secs_f64() * 1000.0
        );
    }
    info!("Aggregated {} areas into {} groups", metrics.len(), groups.len());

    if args.output.as_os_str() == "-" {
        let stdout = io::stdout();
        let mut writer = csv::Writer::from_writer(stdout.lock());
        write_group_rows(&groups, &mut writer)?;
    } else {
        let mut writer = csv_writer(&args.output)?;
        write_group_rows(&groups, &mut writer)?;
        info!("Wrote group CSV: {}", args.output.display());
    }
    if let Some(path) = args.bins_output.as_ref() {
        let mut writer = csv_writer(path)?;
        write_group_bins(&groups, &mut writer)?;
        info!("Wrote group histogram CSV: {}", path.display());
    }
    Ok(())
}

fn handle_roses(args: RosesArgs, mut params: Params, global: &GlobalArgs) -> Result<()> {
    if let Some(min) = args.min_combined_vertical {
        params.rose_min_combined_vertical = min;
    }
    let metrics = read_metrics(&args.metrics)?;
    let t_compute = Instant::now();
    let groupings = world_rose_groupings(&metrics, &params)?;
    if global.profile {
        info!(
            "Grouping stage: {:.1} ms",
            t_compute.elapsed().as_secs_f64() * 1000.0
        );
    }
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("failed to create {}", args.output_dir.display()))?;

    groupings
        .par_iter()
        .map(|grouping| -> Result<()> {
            let groups_path = args
                .output_dir
                .join(format!("{}_groups.csv", grouping.grouping));
            let mut writer = csv_writer(&groups_path)?;
            write_group_rows(&grouping.groups, &mut writer)?;

            let bins_path = args
                .output_dir
                .join(format!("{}_bins.csv", grouping.grouping));
            let mut writer = csv_writer(&bins_path)?;
            write_group_bins(&grouping.groups, &mut writer)?;
            info!(
                "Wrote {} roses by {}: {}",
                grouping.groups.len(),
                grouping.grouping,
                groups_path.display()
            );
            Ok(())
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(())
}

fn run_preset(preset: PresetOpt, metrics: &[SkiAreaMetrics]) -> Result<Vec<GroupMetrics>> {
    let groups = match preset {
        PresetOpt::UsState => by_us_state(metrics)?,
        PresetOpt::Hemisphere => by_hemisphere(metrics)?,
        PresetOpt::Status => by_status(metrics)?,
        PresetOpt::Country => by_country(metrics)?,
    };
    Ok(groups)
}

fn parse_resolutions(input: &str) -> Result<Vec<u32>> {
    let mut out = Vec::new();
    for token in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let value: u32 = token
            .parse()
            .with_context(|| format!("invalid bin resolution '{}'", token))?;
        if value == 0 {
            return Err(anyhow!("bin resolutions must be > 0"));
        }
        out.push(value);
    }
    if out.is_empty() {
        return Err(anyhow!("--resolutions list was empty"));
    }
    Ok(out)
}

fn parse_group_fields(input: &str) -> Result<Vec<GroupField>> {
    let fields = input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<GroupField>())
        .collect::<Result<Vec<_>, _>>()?;
    if fields.is_empty() {
        return Err(anyhow!("--by list was empty"));
    }
    Ok(fields)
}

fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut rows = Vec::new();
    for (idx, row) in reader.deserialize().enumerate() {
        let row: T =
            row.with_context(|| format!("{}: bad record at row {}", path.display(), idx + 1))?;
        rows.push(row);
    }
    Ok(rows)
}

fn read_metrics(path: &Path) -> Result<Vec<SkiAreaMetrics>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let metrics: Vec<SkiAreaMetrics> = serde_json::from_reader(io::BufReader::new(file))
        .with_context(|| format!("{} is not a ski area metrics file", path.display()))?;
    info!("Loaded {} ski areas from {}", metrics.len(), path.display());
    Ok(metrics)
}

fn csv_writer(path: &Path) -> Result<csv::Writer<File>> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    Ok(csv::Writer::from_writer(file))
}

const STATS_COLUMNS: [&str; 6] = [
    "bearing_mean",
    "bearing_alignment",
    "bearing_magnitude_net",
    "bearing_magnitude_cum",
    "poleward_affinity",
    "eastward_affinity",
];

const BIN_COLUMNS: [&str; 6] = [
    "num_bins",
    "bin_index",
    "bin_center",
    "bin_count",
    "bin_proportion",
    "bin_label",
];

fn fmt_opt(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn stats_fields(stats: Option<&BearingSummaryStats>) -> Vec<String> {
    match stats {
        Some(s) => vec![
            s.bearing_mean.to_string(),
            s.bearing_alignment.to_string(),
            s.bearing_magnitude_net.to_string(),
            s.bearing_magnitude_cum.to_string(),
            fmt_opt(s.poleward_affinity),
            s.eastward_affinity.to_string(),
        ],
        None => vec![String::new(); STATS_COLUMNS.len()],
    }
}

fn write_area_rows<W: Write>(
    areas: &[&SkiAreaMetrics],
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    let header: Vec<&str> = [
        "ski_area_id",
        "ski_area_name",
        "country",
        "region",
        "status",
        "hemisphere",
        "run_count",
        "segment_count",
        "lift_count",
        "combined_vertical",
        "combined_distance",
        "latitude",
        "longitude",
        "min_elevation",
        "max_elevation",
        "vertical_drop",
    ]
    .into_iter()
    .chain(STATS_COLUMNS)
    .collect();
    writer.write_record(&header)?;

    for area in areas {
        let meta = &area.area;
        let mut row = vec![
            meta.ski_area_id.clone(),
            meta.ski_area_name.clone().unwrap_or_default(),
            meta.country.clone().unwrap_or_default(),
            meta.region.clone().unwrap_or_default(),
            meta.status.map(|s| s.to_string()).unwrap_or_default(),
            area.hemisphere.map(|h| h.to_string()).unwrap_or_default(),
            area.run_count.to_string(),
            area.segment_count.to_string(),
            meta.lift_count.to_string(),
            format!("{:.3}", area.combined_vertical),
            format!("{:.3}", area.combined_distance),
            fmt_opt(area.latitude),
            fmt_opt(area.longitude),
            fmt_opt(area.min_elevation),
            fmt_opt(area.max_elevation),
            fmt_opt(area.vertical_drop),
        ];
        row.extend(stats_fields(area.bearing_stats.as_ref()));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_bin_rows<W: Write>(
    key: &[&str],
    histogram: &BearingHistogram,
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    for bin in &histogram.bins {
        let mut row: Vec<String> = key.iter().map(|k| k.to_string()).collect();
        row.extend([
            bin.num_bins.to_string(),
            bin.bin_index.to_string(),
            bin.bin_center.to_string(),
            bin.bin_count.to_string(),
            bin.bin_proportion.to_string(),
            bin.bin_label.clone().unwrap_or_default(),
        ]);
        writer.write_record(&row)?;
    }
    Ok(())
}

fn group_key_header(groups: &[GroupMetrics]) -> Vec<String> {
    groups
        .first()
        .map(|g| g.group_by.iter().map(|f| f.to_string()).collect())
        .unwrap_or_default()
}

fn write_group_rows<W: Write>(groups: &[GroupMetrics], writer: &mut csv::Writer<W>) -> Result<()> {
    let mut header = group_key_header(groups);
    header.extend(
        [
            "group_name",
            "ski_areas_count",
            "country_count",
            "run_count",
            "segment_count",
            "lift_count",
            "combined_vertical",
            "combined_distance",
            "min_elevation",
            "max_elevation",
            "vertical_drop",
            "latitude",
            "longitude",
        ]
        .into_iter()
        .chain(STATS_COLUMNS)
        .map(String::from),
    );
    writer.write_record(&header)?;

    for group in groups {
        let mut row: Vec<String> = group
            .key
            .iter()
            .map(|v| v.clone().unwrap_or_default())
            .collect();
        row.extend([
            group.label(),
            group.ski_areas_count.to_string(),
            group.country_count.to_string(),
            group.run_count.to_string(),
            group.segment_count.to_string(),
            group.lift_count.to_string(),
            format!("{:.3}", group.combined_vertical),
            format!("{:.3}", group.combined_distance),
            fmt_opt(group.min_elevation),
            fmt_opt(group.max_elevation),
            fmt_opt(group.vertical_drop),
            fmt_opt(group.latitude),
            fmt_opt(group.longitude),
        ]);
        row.extend(stats_fields(Some(&group.bearing_stats)));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_group_bins<W: Write>(groups: &[GroupMetrics], writer: &mut csv::Writer<W>) -> Result<()> {
    let mut header = group_key_header(groups);
    header.extend(BIN_COLUMNS.into_iter().map(String::from));
    writer.write_record(&header)?;
    for group in groups {
        let key: Vec<&str> = group
            .key
            .iter()
            .map(|v| v.as_deref().unwrap_or(""))
            .collect();
        write_bin_rows(&key, &group.bearings, writer)?;
    }
    writer.flush()?;
    Ok(())
}
