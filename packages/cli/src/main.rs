#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line entry point for the dengue map toolchain.
//!
//! `aggregate` joins the prediction table onto the region layer and writes
//! area-weighted means per date, `split` breaks an aggregated `GeoJSON`
//! into daily files, `summary` reports risk tiers from an aggregated file,
//! and `compare` times sequential against parallel execution.
//!
//! Logging goes through [`dengue_map_cli_utils::init_logger`] so that
//! `RUST_LOG` output and progress bars share the terminal.

mod config;
mod pipeline;
mod summary;

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use dengue_map_ingest::join::JoinKind;
use dengue_map_ingest::regions::DEFAULT_REGION_KEY;
use dengue_map_region_models::{CandidateStrategy, SearchMode, Statistic};
use dengue_map_store_models::HIGH_RISK_PERCENTAGE;

#[derive(Parser)]
#[command(
    name = "dengue_map_cli",
    about = "Area-weighted aggregation of dengue predictions over city regions"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate predictions over overlapping regions, one date at a time
    Aggregate(AggregateArgs),
    /// Split an aggregated `GeoJSON` file into one file per date
    Split {
        /// Aggregated `GeoJSON` file
        #[arg(long)]
        input: PathBuf,
        /// Directory for the `YYYYMMDD_predictions.geojson` files
        #[arg(long)]
        output_dir: PathBuf,
    },
    /// Summarize risk tiers from an aggregated `GeoJSON` file
    Summary {
        /// Aggregated `GeoJSON` file
        #[arg(long)]
        input: PathBuf,
        /// Only report this date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Percentage at or above which a region is listed as high risk
        #[arg(long, default_value_t = HIGH_RISK_PERCENTAGE)]
        threshold: f64,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Time sequential against parallel aggregation on the same data
    Compare {
        #[command(flatten)]
        inputs: InputArgs,
        #[command(flatten)]
        overrides: ConfigArgs,
        /// Only use the first N dates
        #[arg(long)]
        sample_size: Option<usize>,
    },
}

/// Region layer and prediction table locations.
#[derive(Args, Debug, Clone)]
struct InputArgs {
    /// Region polygons (`GeoJSON` `FeatureCollection`)
    #[arg(long)]
    regions: PathBuf,
    /// Prediction table (CSV)
    #[arg(long)]
    predictions: PathBuf,
    /// Region property matched against `townvill`
    #[arg(long, default_value = DEFAULT_REGION_KEY)]
    region_key: String,
    /// Only keep regions in these towns (comma-separated)
    #[arg(long, value_delimiter = ',')]
    towns: Vec<String>,
    /// Only keep regions in Tainan's nine central districts
    #[arg(long, conflicts_with = "towns")]
    central_districts: bool,
    /// How prediction rows without a region are handled
    #[arg(long, default_value_t = JoinKind::Left)]
    join: JoinKind,
}

/// Aggregation settings. Flags override values from `--config`.
#[derive(Args, Debug, Clone, Default)]
struct ConfigArgs {
    /// TOML file with aggregation settings
    #[arg(long)]
    config: Option<PathBuf>,
    /// Neighbor search geometry (exact, expanded)
    #[arg(long)]
    mode: Option<SearchMode>,
    /// Buffer distance for expanded mode, in CRS units
    #[arg(long)]
    buffer: Option<f64>,
    /// Worker threads (defaults to available parallelism)
    #[arg(long)]
    workers: Option<usize>,
    /// Intersection areas at or below this are ignored
    #[arg(long)]
    epsilon: Option<f64>,
    /// Attributes to aggregate (comma-separated)
    #[arg(long, value_delimiter = ',')]
    targets: Vec<String>,
    /// Candidate pair strategy (indexed, all-pairs)
    #[arg(long)]
    strategy: Option<CandidateStrategy>,
    /// Neighbor statistic (area-weighted, simple)
    #[arg(long)]
    statistic: Option<Statistic>,
}

#[derive(Args, Debug, Clone)]
struct AggregateArgs {
    #[command(flatten)]
    inputs: InputArgs,
    #[command(flatten)]
    overrides: ConfigArgs,
    /// CSV output path
    #[arg(long)]
    output: PathBuf,
    /// Also write a `GeoJSON` `FeatureCollection` here
    #[arg(long)]
    geojson_output: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = dengue_map_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Aggregate(args) => pipeline::aggregate(&args, &multi)?,
        Commands::Split { input, output_dir } => {
            let written = dengue_map_ingest::export::split_geojson_by_date(&input, &output_dir)?;
            println!("Wrote {} daily files to {}", written.len(), output_dir.display());
        }
        Commands::Summary {
            input,
            date,
            threshold,
            json,
        } => summary::run(&input, date, threshold, json)?,
        Commands::Compare {
            inputs,
            overrides,
            sample_size,
        } => pipeline::compare(&inputs, &overrides, sample_size)?,
    }

    Ok(())
}
