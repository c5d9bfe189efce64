//! Prediction table loading.
//!
//! The model writes one CSV row per region and date. Only the columns the
//! toolchain needs are read; everything else in the file is ignored.

use std::io;
use std::path::Path;

use chrono::NaiveDate;
use dengue_map_region_models::RegionRecord;
use serde::Deserialize;

use crate::{IngestError, binary_flag};

#[derive(Debug, Deserialize)]
struct PredictionRow {
    date: String,
    townvill: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    case_lag_future_14: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    predicted_case_lag_future_14: Option<f64>,
    #[serde(default, deserialize_with = "binary_flag")]
    predicted_case_lag_future_14_binary: Option<u8>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    predicted_case_lag_future_14_percentage: Option<f64>,
}

/// Loads the prediction CSV at `path` into geometry-less records.
///
/// # Errors
///
/// Returns an error if the file cannot be read, a row is malformed, or a
/// date cannot be parsed.
pub fn load_predictions(path: &Path) -> Result<Vec<RegionRecord>, IngestError> {
    let file = std::fs::File::open(path)?;
    let records = read_predictions(file)?;
    log::info!("Loaded {} prediction rows from {}", records.len(), path.display());
    Ok(records)
}

/// Reads prediction rows from any CSV source.
///
/// # Errors
///
/// Returns an error if a row is malformed or a date cannot be parsed.
pub fn read_predictions<R: io::Read>(reader: R) -> Result<Vec<RegionRecord>, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut records = Vec::new();
    for (i, row) in reader.deserialize::<PredictionRow>().enumerate() {
        let row = row?;
        let date = parse_date(&row.date).ok_or_else(|| IngestError::Format {
            message: format!("row {}: invalid date {:?}", i + 1, row.date),
        })?;

        let mut record = RegionRecord::new(date, row.townvill, None).with_values(
            row.case_lag_future_14,
            row.predicted_case_lag_future_14,
        );
        record.predicted_binary = row.predicted_case_lag_future_14_binary;
        record.predicted_percentage = row.predicted_case_lag_future_14_percentage;
        records.push(record);
    }

    Ok(records)
}

/// Parses `YYYY-MM-DD`, also accepting a trailing time component
/// (`2023-06-20 00:00:00`, `2023-06-20T00:00:00`).
#[must_use]
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| NaiveDate::parse_from_str(s.get(..10)?, "%Y-%m-%d").ok())
}
