#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Loading, joining and exporting region prediction data.
//!
//! Region polygons come from a `GeoJSON` `FeatureCollection` keyed by the
//! statistical-area code, predictions from the model's CSV output keyed by
//! `townvill`. [`join::attach_regions`] combines them into
//! [`RegionRecord`](dengue_map_region_models::RegionRecord)s for the
//! aggregation engine, and [`export`] writes the aggregated rows back out
//! as CSV or `GeoJSON`.

pub mod export;
pub mod join;
pub mod predictions;
pub mod regions;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Errors that can occur while reading or writing region data.
#[derive(Debug, Error)]
pub enum IngestError {
    /// File I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// `GeoJSON` parsing failed.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// CSV reading or writing failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The input parsed but did not have the expected shape.
    #[error("Format error: {message}")]
    Format {
        /// Description of what went wrong.
        message: String,
    },
}

/// Reads a 0/1 flag that may have been written as an integer or a float.
fn binary_flag<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.map(|v| u8::from(v >= 0.5)))
}
