use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use takeoff_core::geometry::{self, Geometry};
use takeoff_core::{
    scale_detection, BatchOutcome, Condition, MeasurementId, MeasurementType, PageId, ProjectId,
    Takeoff,
};
use takeoff_storage::Storage;

#[derive(Debug, Parser)]
#[command(name = "takeoff-cli")]
#[command(about = "Takeoff quantity tools")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Compute the quantity of a geometry.
    Quantity {
        /// Geometry as JSON: {"geometry_type": "...", "points": [{"x": .., "y": ..}]}
        #[arg(long)]
        geometry: String,
        #[arg(long = "type", value_enum)]
        measurement_type: Kind,
        /// Real-world units per pixel
        #[arg(long, default_value_t = 1.0)]
        ratio: f64,
        #[arg(long)]
        depth_inches: Option<f64>,
        /// Presentation unit (LF, SF, SY, CF, CY, EA)
        #[arg(long)]
        unit: Option<String>,
    },
    /// Find scale notations in text.
    DetectScale {
        #[arg(long)]
        text: String,
        /// Render resolution used to turn the notation into a ratio
        #[arg(long, default_value_t = 150.0)]
        dpi: f64,
    },
    /// Recalculate measurements in a saved takeoff.
    Recalculate {
        #[arg(long, value_name = "DIR")]
        data_dir: PathBuf,
        /// Only this page; all pages otherwise
        #[arg(long)]
        page: Option<PageId>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    Linear,
    Area,
    Volume,
    Count,
}

impl From<Kind> for MeasurementType {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Linear => MeasurementType::Linear,
            Kind::Area => MeasurementType::Area,
            Kind::Volume => MeasurementType::Volume,
            Kind::Count => MeasurementType::Count,
        }
    }
}

#[derive(Debug, Serialize)]
struct QuantityOutput {
    measurement_type: MeasurementType,
    geometry_type: geometry::GeometryType,
    pixel_length: Option<f64>,
    pixel_area: Option<f64>,
    quantity: f64,
    unit: String,
    display_value: f64,
    label: String,
}

#[derive(Debug, Serialize)]
struct ScaleOutput {
    source_text: String,
    unit: String,
    real_per_inch: f64,
    ratio: f64,
    confidence: f64,
}

#[derive(Debug, Serialize)]
struct RecalculateOutput {
    status: &'static str,
    pages: usize,
    recalculated_count: usize,
    failed_count: usize,
    failed_ids: Vec<MeasurementId>,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    match cli.command {
        Commands::Quantity { geometry, measurement_type, ratio, depth_inches, unit } => {
            run_quantity(&geometry, measurement_type.into(), ratio, depth_inches, unit)
        }
        Commands::DetectScale { text, dpi } => run_detect_scale(&text, dpi),
        Commands::Recalculate { data_dir, page } => run_recalculate(&data_dir, page),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn default_unit(measurement_type: MeasurementType) -> &'static str {
    match measurement_type {
        MeasurementType::Linear => "LF",
        MeasurementType::Area => "SF",
        MeasurementType::Volume => "CF",
        MeasurementType::Count => "EA",
    }
}

fn run_quantity(
    geometry_json: &str,
    measurement_type: MeasurementType,
    ratio: f64,
    depth_inches: Option<f64>,
    unit: Option<String>,
) -> Result<()> {
    let shape: Geometry =
        serde_json::from_str(geometry_json).context("failed to parse geometry")?;

    let unit = unit.unwrap_or_else(|| default_unit(measurement_type).to_string());
    let mut condition = Condition::new(ProjectId::nil(), "cli", measurement_type, unit);
    condition.depth_inches = depth_inches;

    let quantity = geometry::quantity(&condition, &shape, ratio)?;
    let metrics = geometry::pixel_metrics(&shape);

    let payload = QuantityOutput {
        measurement_type,
        geometry_type: shape.geometry_type(),
        pixel_length: metrics.pixel_length,
        pixel_area: metrics.pixel_area,
        quantity,
        display_value: condition.display_value(quantity),
        label: condition.format_quantity(quantity),
        unit: condition.unit,
    };

    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn run_detect_scale(text: &str, dpi: f64) -> Result<()> {
    if !(dpi.is_finite() && dpi > 0.0) {
        anyhow::bail!("--dpi must be positive");
    }

    let scales: Vec<ScaleOutput> = scale_detection::detect_scales(text)
        .into_iter()
        .map(|scale| ScaleOutput {
            ratio: scale.ratio_for_dpi(dpi),
            source_text: scale.source_text,
            unit: scale.unit,
            real_per_inch: scale.real_per_inch,
            confidence: scale.confidence,
        })
        .collect();

    if scales.is_empty() {
        anyhow::bail!("no scale notation found");
    }

    println!("{}", serde_json::to_string_pretty(&scales)?);
    Ok(())
}

fn run_recalculate(data_dir: &Path, page: Option<PageId>) -> Result<()> {
    if !data_dir.is_dir() {
        anyhow::bail!("data directory does not exist: {}", data_dir.display());
    }

    let storage = Storage::with_root(data_dir);
    let snapshot = storage.load_snapshot().context("failed to load takeoff")?;
    let mut takeoff = Takeoff::from(snapshot);

    let pages: Vec<PageId> = match page {
        Some(id) => vec![takeoff.page(id)?.id],
        None => takeoff.catalog().page_ids(),
    };

    let mut total = BatchOutcome::default();
    for page_id in &pages {
        let outcome = takeoff.recalculate_page(*page_id)?;
        tracing::debug!(
            page_id = %page_id,
            recalculated = outcome.recalculated_count,
            failed = outcome.failed_count,
            "page recalculated"
        );
        total.recalculated_count += outcome.recalculated_count;
        total.failed_count += outcome.failed_count;
        total.failed_ids.extend(outcome.failed_ids);
    }

    storage.save_snapshot(&takeoff.snapshot()).context("failed to save takeoff")?;

    let payload = RecalculateOutput {
        status: total.status(),
        pages: pages.len(),
        recalculated_count: total.recalculated_count,
        failed_count: total.failed_count,
        failed_ids: total.failed_ids,
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
