//! Parallel date scheduler.
//!
//! Splits a multi-date dataset into one partition per date and maps
//! [`aggregate_partition`] over the partitions on a dedicated `rayon`
//! pool. Partitions share nothing: each task owns its rows and returns its
//! output by value, and a failing (or panicking) date is reported in
//! [`RunOutcome::failures`] without affecting the others.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use dengue_map_region_models::{
    AggregatedRecord, AggregationConfig, AggregationSettings, ConfigError, RegionRecord,
};
use dengue_map_spatial::panic_message;
use rayon::prelude::*;

use crate::PartitionError;
use crate::progress::{NullProgress, ProgressCallback};
use crate::weighted::aggregate_partition;

/// All rows of one date.
#[derive(Debug, Clone, PartialEq)]
pub struct DatePartition {
    /// Partition key.
    pub date: NaiveDate,
    /// Rows in their original input order.
    pub records: Vec<RegionRecord>,
}

/// A date whose aggregation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFailure {
    /// The failed date.
    pub date: NaiveDate,
    /// Why it failed.
    pub error: PartitionError,
}

/// Counters and timing for one scheduler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Non-empty partitions handed to the pool.
    pub dates_total: usize,
    /// Partitions that produced output.
    pub dates_succeeded: usize,
    /// Partitions reported in [`RunOutcome::failures`].
    pub dates_failed: usize,
    /// Empty partitions that were skipped.
    pub dates_skipped: usize,
    /// Output rows.
    pub rows: usize,
    /// Worker threads used (1 = sequential).
    pub workers: usize,
    /// Wall-clock time of the run.
    pub elapsed: Duration,
}

impl RunReport {
    /// Mean wall-clock time per processed date.
    #[must_use]
    pub fn avg_per_date(&self) -> Duration {
        u32::try_from(self.dates_total)
            .ok()
            .filter(|&n| n > 0)
            .map_or(Duration::ZERO, |n| self.elapsed / n)
    }

    /// Output rows per second of wall-clock time.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rows_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.rows as f64 / secs
        } else {
            0.0
        }
    }
}

/// Result of a scheduler run: a partial success when any date failed.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// Aggregated rows of every successful date, dates ascending, rows of
    /// one date in input order.
    pub records: Vec<AggregatedRecord>,
    /// Dates that failed, ascending.
    pub failures: Vec<PartitionFailure>,
    /// Counters and timing.
    pub report: RunReport,
}

impl RunOutcome {
    /// Whether every date succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Timings of the same dataset run sequentially and in parallel.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionComparison {
    /// Report of the single-worker run.
    pub sequential: RunReport,
    /// Report of the pooled run.
    pub parallel: RunReport,
    /// Whether both runs produced the same aggregates.
    pub identical: bool,
}

impl ExecutionComparison {
    /// Sequential time divided by parallel time.
    #[must_use]
    pub fn speedup(&self) -> f64 {
        let parallel = self.parallel.elapsed.as_secs_f64();
        if parallel > 0.0 {
            self.sequential.elapsed.as_secs_f64() / parallel
        } else {
            0.0
        }
    }
}

/// Groups rows by date, dates ascending, keeping each date's rows in
/// input order.
#[must_use]
pub fn partition_by_date(records: Vec<RegionRecord>) -> Vec<DatePartition> {
    let mut by_date: BTreeMap<NaiveDate, Vec<RegionRecord>> = BTreeMap::new();
    for record in records {
        by_date.entry(record.date).or_default().push(record);
    }

    by_date
        .into_iter()
        .map(|(date, records)| DatePartition { date, records })
        .collect()
}

/// Number of workers for `dates` partitions: the requested count or the
/// available parallelism, never more than `dates`, never less than 1.
#[must_use]
pub fn resolve_workers(requested: Option<NonZeroUsize>, dates: usize) -> usize {
    let available = requested
        .or_else(|| thread::available_parallelism().ok())
        .map_or(1, NonZeroUsize::get);
    available.min(dates).max(1)
}

/// Validates `config`, partitions `records` by date and aggregates every
/// partition.
///
/// # Errors
///
/// Returns the [`ConfigError`] for the first invalid parameter. No
/// partition is processed in that case.
pub fn run(
    records: Vec<RegionRecord>,
    config: &AggregationConfig,
    progress: &dyn ProgressCallback,
) -> Result<RunOutcome, ConfigError> {
    let settings = config.validate()?;
    Ok(run_partitions(partition_by_date(records), &settings, progress))
}

/// Aggregates already-partitioned data.
///
/// Empty partitions are skipped. With a single worker the partitions run
/// in order on the calling thread; otherwise they run on a dedicated pool.
/// Both paths call the same per-date function.
#[must_use]
pub fn run_partitions(
    partitions: Vec<DatePartition>,
    settings: &AggregationSettings,
    progress: &dyn ProgressCallback,
) -> RunOutcome {
    run_partitions_with(partitions, settings, progress, aggregate_partition)
}

fn run_partitions_with<A>(
    partitions: Vec<DatePartition>,
    settings: &AggregationSettings,
    progress: &dyn ProgressCallback,
    aggregate: A,
) -> RunOutcome
where
    A: Fn(Vec<RegionRecord>, &AggregationSettings) -> Result<Vec<AggregatedRecord>, PartitionError>
        + Sync,
{
    let start = Instant::now();

    let (partitions, empty): (Vec<_>, Vec<_>) =
        partitions.into_iter().partition(|p| !p.records.is_empty());
    for partition in &empty {
        log::debug!("Skipping {}: no rows", partition.date);
    }

    let workers = resolve_workers(settings.workers, partitions.len());
    let dates_total = partitions.len();
    log::info!("Aggregating {dates_total} dates on {workers} worker(s)");
    progress.set_total(dates_total as u64);

    let results: Vec<PartitionResult> = if workers > 1 {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("aggregate-{i}"))
            .build()
        {
            Ok(pool) => pool.install(|| {
                partitions
                    .into_par_iter()
                    .map(|partition| process_partition(partition, settings, progress, &aggregate))
                    .collect()
            }),
            Err(e) => {
                log::warn!("Failed to build worker pool, running sequentially: {e}");
                run_sequential(partitions, settings, progress, &aggregate)
            }
        }
    } else {
        run_sequential(partitions, settings, progress, &aggregate)
    };

    let mut records = Vec::new();
    let mut failures = Vec::new();
    for (date, result) in results {
        match result {
            Ok(rows) => records.extend(rows),
            Err(error) => {
                log::error!("Aggregation failed for {date}: {error}");
                failures.push(PartitionFailure { date, error });
            }
        }
    }

    let report = RunReport {
        dates_total,
        dates_succeeded: dates_total - failures.len(),
        dates_failed: failures.len(),
        dates_skipped: empty.len(),
        rows: records.len(),
        workers,
        elapsed: start.elapsed(),
    };

    log::info!(
        "Aggregated {} of {} dates ({} rows) in {:.2}s, {:.2}s per date",
        report.dates_succeeded,
        report.dates_total,
        report.rows,
        report.elapsed.as_secs_f64(),
        report.avg_per_date().as_secs_f64()
    );
    progress.finish(format!(
        "{} dates aggregated, {} failed",
        report.dates_succeeded, report.dates_failed
    ));

    RunOutcome {
        records,
        failures,
        report,
    }
}

/// Runs the same dataset with one worker and with `settings.workers`
/// workers and reports both timings.
///
/// `sample_size` restricts both runs to the first N dates.
#[must_use]
pub fn compare_execution(
    records: &[RegionRecord],
    settings: &AggregationSettings,
    sample_size: Option<usize>,
) -> ExecutionComparison {
    let mut partitions = partition_by_date(records.to_vec());
    if let Some(n) = sample_size {
        partitions.truncate(n);
    }
    log::info!("Comparing execution modes on {} dates", partitions.len());

    let sequential = run_partitions(
        partitions.clone(),
        &settings.with_workers(NonZeroUsize::MIN),
        &NullProgress,
    );
    let parallel = run_partitions(partitions, settings, &NullProgress);

    let comparison = ExecutionComparison {
        identical: aggregates(&sequential) == aggregates(&parallel),
        sequential: sequential.report,
        parallel: parallel.report,
    };
    log::info!(
        "Sequential {:.2}s, parallel {:.2}s ({:.2}x)",
        comparison.sequential.elapsed.as_secs_f64(),
        comparison.parallel.elapsed.as_secs_f64(),
        comparison.speedup()
    );

    comparison
}

type PartitionResult = (NaiveDate, Result<Vec<AggregatedRecord>, PartitionError>);

fn run_sequential<A>(
    partitions: Vec<DatePartition>,
    settings: &AggregationSettings,
    progress: &dyn ProgressCallback,
    aggregate: &A,
) -> Vec<PartitionResult>
where
    A: Fn(Vec<RegionRecord>, &AggregationSettings) -> Result<Vec<AggregatedRecord>, PartitionError>,
{
    partitions
        .into_iter()
        .map(|partition| process_partition(partition, settings, progress, aggregate))
        .collect()
}

fn process_partition<A>(
    partition: DatePartition,
    settings: &AggregationSettings,
    progress: &dyn ProgressCallback,
    aggregate: &A,
) -> PartitionResult
where
    A: Fn(Vec<RegionRecord>, &AggregationSettings) -> Result<Vec<AggregatedRecord>, PartitionError>,
{
    let DatePartition { date, records } = partition;
    log::debug!("Processing {date}: {} regions", records.len());

    let result = panic::catch_unwind(AssertUnwindSafe(move || aggregate(records, settings)))
    .unwrap_or_else(|payload| {
        Err(PartitionError::Panicked {
            message: panic_message(payload.as_ref()),
        })
    });

    progress.inc(1);
    (date, result)
}

fn aggregates(outcome: &RunOutcome) -> Vec<(NaiveDate, &str, Option<f64>, Option<f64>)> {
    outcome
        .records
        .iter()
        .map(|r| {
            (
                r.record.date,
                r.record.region_id.as_str(),
                r.actual_weighted_mean,
                r.predicted_weighted_mean,
            )
        })
        .collect()
}
