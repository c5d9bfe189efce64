#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Read-only queries over aggregated region predictions.
//!
//! [`PredictionStore`] owns the aggregated rows and keeps two indexes: one
//! by date and one by region id. Every query borrows from the store, so a
//! store built once can serve any number of lookups.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use dengue_map_region_models::AggregatedRecord;
use dengue_map_store_models::{DailySummary, RiskTier, StoreStats};

pub use dengue_map_store_models as models;

/// Aggregated rows indexed by date and region.
#[derive(Debug, Clone, Default)]
pub struct PredictionStore {
    records: Vec<AggregatedRecord>,
    by_date: BTreeMap<NaiveDate, Vec<usize>>,
    by_region: BTreeMap<String, Vec<usize>>,
}

impl PredictionStore {
    /// Builds the date and region indexes over `records`.
    #[must_use]
    pub fn new(records: Vec<AggregatedRecord>) -> Self {
        let mut by_date: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
        let mut by_region: BTreeMap<String, Vec<usize>> = BTreeMap::new();

        for (i, aggregated) in records.iter().enumerate() {
            let record = &aggregated.record;
            by_date.entry(record.date).or_default().push(i);
            by_region
                .entry(record.region_id.clone())
                .or_default()
                .push(i);
        }

        for indices in by_region.values_mut() {
            indices.sort_by_key(|&i| records[i].record.date);
        }

        log::debug!(
            "Indexed {} rows over {} dates and {} regions",
            records.len(),
            by_date.len(),
            by_region.len()
        );

        Self {
            records,
            by_date,
            by_region,
        }
    }

    /// Distinct dates in ascending order.
    #[must_use]
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.by_date.keys().copied().collect()
    }

    /// All rows for `date`, highest predicted percentage first. Rows without
    /// a percentage sort last.
    #[must_use]
    pub fn predictions_by_date(&self, date: NaiveDate) -> Vec<&AggregatedRecord> {
        let mut rows = self.rows_on(date);
        rows.sort_by(|a, b| by_percentage_desc(a, b));
        rows
    }

    /// Rows for one region in date order, optionally limited to the
    /// inclusive range `(start, end)`.
    #[must_use]
    pub fn region_series(
        &self,
        region_id: &str,
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> Vec<&AggregatedRecord> {
        self.by_region
            .get(region_id)
            .into_iter()
            .flatten()
            .map(|&i| &self.records[i])
            .filter(|row| {
                range.is_none_or(|(start, end)| (start..=end).contains(&row.record.date))
            })
            .collect()
    }

    /// Rows on `date` whose predicted percentage is at least `threshold`,
    /// highest first.
    #[must_use]
    pub fn high_risk_regions(&self, date: NaiveDate, threshold: f64) -> Vec<&AggregatedRecord> {
        let mut rows: Vec<&AggregatedRecord> = self
            .rows_on(date)
            .into_iter()
            .filter(|row| {
                row.record
                    .predicted_percentage
                    .is_some_and(|p| p >= threshold)
            })
            .collect();
        rows.sort_by(|a, b| by_percentage_desc(a, b));
        rows
    }

    /// Totals and risk-tier counts for `date`, or `None` if the date has no
    /// rows.
    #[must_use]
    pub fn daily_summary(&self, date: NaiveDate) -> Option<DailySummary> {
        let rows = self.rows_on(date);
        if rows.is_empty() {
            return None;
        }

        let predicted: Vec<f64> = rows
            .iter()
            .filter_map(|row| row.record.predicted_value)
            .filter(|v| v.is_finite())
            .collect();
        let total: f64 = predicted.iter().sum();
        #[allow(clippy::cast_precision_loss)]
        let avg = (!predicted.is_empty()).then(|| total / predicted.len() as f64);

        let mut summary = DailySummary {
            date,
            total_regions: rows.len(),
            total_predicted_cases: total,
            avg_prediction: avg,
            max_prediction: predicted.iter().copied().reduce(f64::max),
            min_prediction: predicted.iter().copied().reduce(f64::min),
            high_risk_regions: 0,
            medium_risk_regions: 0,
            low_risk_regions: 0,
        };
        for row in &rows {
            match RiskTier::from_percentage(row.record.predicted_percentage) {
                RiskTier::High => summary.high_risk_regions += 1,
                RiskTier::Medium => summary.medium_risk_regions += 1,
                RiskTier::Low => summary.low_risk_regions += 1,
            }
        }

        Some(summary)
    }

    /// Row, date and region counts plus the covered date range.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            total_predictions: self.records.len(),
            total_dates: self.by_date.len(),
            total_regions: self.by_region.len(),
            first_date: self.by_date.keys().next().copied(),
            last_date: self.by_date.keys().next_back().copied(),
        }
    }

    fn rows_on(&self, date: NaiveDate) -> Vec<&AggregatedRecord> {
        self.by_date
            .get(&date)
            .into_iter()
            .flatten()
            .map(|&i| &self.records[i])
            .collect()
    }
}

fn by_percentage_desc(a: &AggregatedRecord, b: &AggregatedRecord) -> Ordering {
    match (a.record.predicted_percentage, b.record.predicted_percentage) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Lazily computed list of the store's dates.
///
/// Created by the caller and passed by reference to whatever needs the date
/// list. Call [`DatesCache::invalidate`] after swapping in a new store.
#[derive(Debug, Default)]
pub struct DatesCache {
    dates: Option<Vec<NaiveDate>>,
}

impl DatesCache {
    /// Creates an empty cache.
    #[must_use]
    pub const fn new() -> Self {
        Self { dates: None }
    }

    /// Returns the cached dates, loading them from `store` on first use.
    pub fn get_or_load(&mut self, store: &PredictionStore) -> &[NaiveDate] {
        self.dates.get_or_insert_with(|| {
            log::debug!("Loading date list into cache");
            store.dates()
        })
    }

    /// Whether the cache currently holds a date list.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.dates.is_some()
    }

    /// Drops the cached list so the next lookup reloads it.
    pub fn invalidate(&mut self) {
        self.dates = None;
    }
}
