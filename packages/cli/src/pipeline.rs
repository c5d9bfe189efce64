//! The `aggregate` and `compare` commands.
//!
//! Both load the region layer and prediction table the same way; they
//! differ only in what they do with the joined records.

use std::time::Instant;

use dengue_map_aggregate::{RunOutcome, compare_execution, partition_by_date, run_partitions};
use dengue_map_cli_utils::{IndicatifProgress, MultiProgress};
use dengue_map_ingest::IngestError;
use dengue_map_ingest::export::{write_csv_file, write_geojson};
use dengue_map_ingest::join::attach_regions;
use dengue_map_ingest::predictions::load_predictions;
use dengue_map_ingest::regions::{TAINAN_CENTRAL_DISTRICTS, filter_towns, load_regions};
use dengue_map_region_models::RegionRecord;

use crate::{AggregateArgs, ConfigArgs, InputArgs, config};

/// Loads, joins, aggregates and writes one dataset.
///
/// Failed dates are reported but do not make the command fail.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or an input or output
/// file cannot be read or written.
pub fn aggregate(
    args: &AggregateArgs,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let settings = config::build(&args.overrides)?.validate()?;

    let steps = IndicatifProgress::steps_bar(multi, "Pipeline", 3);
    steps.set_message("Loading inputs".to_string());
    let records = load_inputs(&args.inputs)?;
    steps.inc(1);

    steps.set_message("Aggregating".to_string());
    let dates = IndicatifProgress::dates_bar(multi, "Aggregating");
    let outcome = run_partitions(partition_by_date(records), &settings, dates.as_ref());
    steps.inc(1);

    steps.set_message("Writing output".to_string());
    write_csv_file(&args.output, &outcome.records)?;
    if let Some(path) = &args.geojson_output {
        write_geojson(path, &outcome.records)?;
    }
    steps.inc(1);
    steps.finish(format!("Done in {:.1}s", start.elapsed().as_secs_f64()));

    print_report(&outcome);
    Ok(())
}

/// Runs the dataset once on a single worker and once on the pool and
/// prints both timings.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or an input file cannot
/// be read.
pub fn compare(
    inputs: &InputArgs,
    overrides: &ConfigArgs,
    sample_size: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let settings = config::build(overrides)?.validate()?;
    let records = load_inputs(inputs)?;

    let comparison = compare_execution(&records, &settings, sample_size);

    println!("Execution comparison ({} dates)", comparison.sequential.dates_total);
    println!(
        "  sequential: {:>8.2}s ({} worker)",
        comparison.sequential.elapsed.as_secs_f64(),
        comparison.sequential.workers
    );
    println!(
        "  parallel:   {:>8.2}s ({} workers)",
        comparison.parallel.elapsed.as_secs_f64(),
        comparison.parallel.workers
    );
    println!("  speedup:    {:>8.2}x", comparison.speedup());
    if comparison.identical {
        println!("  results:    identical");
    } else {
        println!("  results:    DIFFER");
        log::warn!("Sequential and parallel runs produced different aggregates");
    }

    Ok(())
}

fn load_inputs(inputs: &InputArgs) -> Result<Vec<RegionRecord>, IngestError> {
    let mut regions = load_regions(&inputs.regions, &inputs.region_key)?;
    if inputs.central_districts {
        regions = filter_towns(regions, TAINAN_CENTRAL_DISTRICTS);
    } else {
        regions = filter_towns(regions, inputs.towns.as_slice());
    }

    let predictions = load_predictions(&inputs.predictions)?;
    Ok(attach_regions(predictions, &regions, inputs.join))
}

fn print_report(outcome: &RunOutcome) {
    let report = &outcome.report;

    println!();
    println!("Aggregation report");
    println!("  dates processed: {}", report.dates_total);
    println!("  dates succeeded: {}", report.dates_succeeded);
    println!("  dates failed:    {}", report.dates_failed);
    if report.dates_skipped > 0 {
        println!("  dates skipped:   {}", report.dates_skipped);
    }
    println!("  rows written:    {}", report.rows);
    println!("  workers:         {}", report.workers);
    println!(
        "  elapsed:         {:.2}s ({:.3}s per date, {:.0} rows/s)",
        report.elapsed.as_secs_f64(),
        report.avg_per_date().as_secs_f64(),
        report.rows_per_second()
    );

    if !outcome.is_complete() {
        println!();
        println!("Failed dates:");
        for failure in &outcome.failures {
            println!("  {}: {}", failure.date, failure.error);
        }
    }
}
