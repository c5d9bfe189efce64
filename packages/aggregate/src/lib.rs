#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Area-weighted spatial aggregation of region predictions.
//!
//! [`weighted`] computes, for every region of one date, the mean of a
//! case / prediction value over all regions overlapping it, weighted by
//! overlap area. [`scheduler`] splits a multi-date dataset into date
//! partitions and maps the aggregator over them on a bounded worker pool,
//! isolating failures per date.

pub mod progress;
pub mod scheduler;
pub mod weighted;

use chrono::NaiveDate;

pub use scheduler::{
    DatePartition, ExecutionComparison, PartitionFailure, RunOutcome, RunReport,
    compare_execution, partition_by_date, run, run_partitions,
};
pub use weighted::{
    Neighbor, aggregate_partition, neighbor_weights, simple_mean, weighted_mean,
};

/// Errors that abort the aggregation of a single date partition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartitionError {
    /// The same region id appeared twice in one date.
    #[error("Duplicate region {region_id} on {date}")]
    DuplicateRegion {
        /// Partition date.
        date: NaiveDate,
        /// The repeated region id.
        region_id: String,
    },

    /// Aggregation panicked while processing the partition.
    #[error("Aggregation panicked: {message}")]
    Panicked {
        /// Panic payload, if it was a string.
        message: String,
    },
}
