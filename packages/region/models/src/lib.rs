#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Region-date record types shared across the dengue map toolchain.
//!
//! A [`RegionRecord`] is one observation: a statistical sub-area on a
//! given date, joined with its polygon and the case / prediction values
//! produced upstream. The aggregation engine turns each record into an
//! [`AggregatedRecord`] carrying the area-weighted means.

pub mod config;

use chrono::NaiveDate;
use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use config::{
    AggregationConfig, AggregationSettings, CandidateStrategy, ConfigError, NeighborSearch,
    SearchMode, Statistic,
};

/// Default buffer distance (in CRS units, metres for EPSG:3826) used by the
/// expanded neighbor search.
pub const DEFAULT_BUFFER_DISTANCE: f64 = 500.0;

/// Default intersection-area threshold below which a pair is treated as
/// non-intersecting.
pub const DEFAULT_EPSILON: f64 = 1e-10;

/// A region polygon as loaded from the statistical-area layer.
///
/// Regions never change shape between dates, so one [`Region`] is joined
/// onto every prediction row carrying its id.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// Region code (`CODEBASE` in the source layer).
    pub id: String,
    /// District name (`TOWN`).
    pub town: Option<String>,
    /// County name (`COUNTY`).
    pub county: Option<String>,
    /// Polygon in the layer's planar CRS. `None` when the feature had no
    /// usable geometry.
    pub geometry: Option<MultiPolygon<f64>>,
}

/// One region on one date, joined with its geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionRecord {
    /// Partition key.
    pub date: NaiveDate,
    /// Region code (`townvill`), unique within a date.
    pub region_id: String,
    /// District name, if the region layer provided one.
    pub town: Option<String>,
    /// County name, if the region layer provided one.
    pub county: Option<String>,
    /// Region polygon. `None` means the join found no usable geometry.
    pub geometry: Option<MultiPolygon<f64>>,
    /// Observed case count (`case_lag_future_14`).
    pub actual_value: Option<f64>,
    /// Model-predicted case count (`predicted_case_lag_future_14`).
    pub predicted_value: Option<f64>,
    /// Binary outbreak prediction (`predicted_case_lag_future_14_binary`).
    pub predicted_binary: Option<u8>,
    /// Predicted outbreak probability in percent
    /// (`predicted_case_lag_future_14_percentage`).
    pub predicted_percentage: Option<f64>,
}

impl RegionRecord {
    /// Creates a record with only the partition key, region id and
    /// geometry set.
    #[must_use]
    pub const fn new(
        date: NaiveDate,
        region_id: String,
        geometry: Option<MultiPolygon<f64>>,
    ) -> Self {
        Self {
            date,
            region_id,
            town: None,
            county: None,
            geometry,
            actual_value: None,
            predicted_value: None,
            predicted_binary: None,
            predicted_percentage: None,
        }
    }

    /// Sets both aggregated attributes.
    #[must_use]
    pub const fn with_values(mut self, actual: Option<f64>, predicted: Option<f64>) -> Self {
        self.actual_value = actual;
        self.predicted_value = predicted;
        self
    }

    /// Returns the raw value of `target` for this record.
    #[must_use]
    pub const fn value(&self, target: AggregationTarget) -> Option<f64> {
        match target {
            AggregationTarget::Actual => self.actual_value,
            AggregationTarget::Predicted => self.predicted_value,
        }
    }
}

/// A [`RegionRecord`] with its spatially aggregated attributes appended.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRecord {
    /// The untouched input row.
    pub record: RegionRecord,
    /// Area-weighted mean of `actual_value` over intersecting regions.
    pub actual_weighted_mean: Option<f64>,
    /// Area-weighted mean of `predicted_value` over intersecting regions.
    pub predicted_weighted_mean: Option<f64>,
}

impl AggregatedRecord {
    /// Wraps `record` with both aggregates unset.
    #[must_use]
    pub const fn unaggregated(record: RegionRecord) -> Self {
        Self {
            record,
            actual_weighted_mean: None,
            predicted_weighted_mean: None,
        }
    }

    /// Returns the aggregate computed for `target`.
    #[must_use]
    pub const fn weighted_mean(&self, target: AggregationTarget) -> Option<f64> {
        match target {
            AggregationTarget::Actual => self.actual_weighted_mean,
            AggregationTarget::Predicted => self.predicted_weighted_mean,
        }
    }

    /// Stores the aggregate for `target`.
    pub const fn set_weighted_mean(&mut self, target: AggregationTarget, value: Option<f64>) {
        match target {
            AggregationTarget::Actual => self.actual_weighted_mean = value,
            AggregationTarget::Predicted => self.predicted_weighted_mean = value,
        }
    }
}

/// A numeric attribute that can be spatially aggregated.
///
/// Parses from the prediction table's column name or a short alias
/// (`actual`, `predicted`).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum AggregationTarget {
    /// Observed case count.
    #[serde(rename = "case_lag_future_14", alias = "actual")]
    #[strum(to_string = "case_lag_future_14", serialize = "actual")]
    Actual,
    /// Model-predicted case count.
    #[serde(rename = "predicted_case_lag_future_14", alias = "predicted")]
    #[strum(to_string = "predicted_case_lag_future_14", serialize = "predicted")]
    Predicted,
}

impl AggregationTarget {
    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Actual, Self::Predicted]
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use super::*;

    #[test]
    fn parses_target_column_names_and_aliases() {
        assert_eq!(
            AggregationTarget::from_str("case_lag_future_14").unwrap(),
            AggregationTarget::Actual
        );
        assert_eq!(
            AggregationTarget::from_str("predicted").unwrap(),
            AggregationTarget::Predicted
        );
        assert!(AggregationTarget::from_str("cases").is_err());
    }

    #[test]
    fn displays_target_as_column_name() {
        assert_eq!(
            AggregationTarget::Predicted.to_string(),
            "predicted_case_lag_future_14"
        );
    }

    #[test]
    fn reads_and_writes_per_target_values() {
        let date = NaiveDate::from_ymd_opt(2023, 6, 20).unwrap();
        let record = RegionRecord::new(date, "A01".to_string(), None).with_values(Some(1.0), None);
        assert_eq!(record.value(AggregationTarget::Actual), Some(1.0));
        assert_eq!(record.value(AggregationTarget::Predicted), None);

        let mut aggregated = AggregatedRecord::unaggregated(record);
        aggregated.set_weighted_mean(AggregationTarget::Predicted, Some(0.5));
        assert_eq!(aggregated.weighted_mean(AggregationTarget::Predicted), Some(0.5));
        assert_eq!(aggregated.weighted_mean(AggregationTarget::Actual), None);
    }
}
