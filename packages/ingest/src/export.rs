//! Writing aggregated rows as CSV or `GeoJSON`, and reading them back.
//!
//! Both formats share one flat row layout: the prediction columns as they
//! arrived, the region names from the join, and one weighted-mean column
//! per aggregation target.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write as _};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use dengue_map_region_models::{AggregatedRecord, RegionRecord};
use dengue_map_spatial::{geometry_to_multipolygon, multipolygon_to_geometry};
use geojson::{Feature, FeatureCollection, GeoJson};
use serde::{Deserialize, Serialize};

use crate::predictions::parse_date;
use crate::{IngestError, binary_flag};

/// Flat attribute layout of one aggregated output row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRow {
    pub date: String,
    pub townvill: String,
    #[serde(rename = "TOWN", default)]
    pub town: Option<String>,
    #[serde(rename = "COUNTY", default)]
    pub county: Option<String>,
    #[serde(default)]
    pub case_lag_future_14: Option<f64>,
    #[serde(default)]
    pub predicted_case_lag_future_14: Option<f64>,
    #[serde(default, deserialize_with = "binary_flag")]
    pub predicted_case_lag_future_14_binary: Option<u8>,
    #[serde(default)]
    pub predicted_case_lag_future_14_percentage: Option<f64>,
    #[serde(default)]
    pub case_weighted_mean: Option<f64>,
    #[serde(default)]
    pub pred_weighted_mean: Option<f64>,
}

impl From<&AggregatedRecord> for AggregatedRow {
    fn from(value: &AggregatedRecord) -> Self {
        let record = &value.record;
        Self {
            date: record.date.format("%Y-%m-%d").to_string(),
            townvill: record.region_id.clone(),
            town: record.town.clone(),
            county: record.county.clone(),
            case_lag_future_14: record.actual_value,
            predicted_case_lag_future_14: record.predicted_value,
            predicted_case_lag_future_14_binary: record.predicted_binary,
            predicted_case_lag_future_14_percentage: record.predicted_percentage,
            case_weighted_mean: value.actual_weighted_mean,
            pred_weighted_mean: value.predicted_weighted_mean,
        }
    }
}

impl AggregatedRow {
    /// Rebuilds the aggregated record, attaching `geometry`.
    ///
    /// # Errors
    ///
    /// Returns an error if the `date` column cannot be parsed.
    pub fn into_record(
        self,
        geometry: Option<geo::MultiPolygon<f64>>,
    ) -> Result<AggregatedRecord, IngestError> {
        let date = parse_date(&self.date).ok_or_else(|| IngestError::Format {
            message: format!("region {}: invalid date {:?}", self.townvill, self.date),
        })?;

        let mut record = RegionRecord::new(date, self.townvill, geometry).with_values(
            self.case_lag_future_14,
            self.predicted_case_lag_future_14,
        );
        record.town = self.town;
        record.county = self.county;
        record.predicted_binary = self.predicted_case_lag_future_14_binary;
        record.predicted_percentage = self.predicted_case_lag_future_14_percentage;

        Ok(AggregatedRecord {
            record,
            actual_weighted_mean: self.case_weighted_mean,
            predicted_weighted_mean: self.pred_weighted_mean,
        })
    }
}

/// Writes aggregated rows as CSV. Geometry is not included.
///
/// # Errors
///
/// Returns an error if a row cannot be written.
pub fn write_csv<W: io::Write>(writer: W, records: &[AggregatedRecord]) -> Result<(), IngestError> {
    let mut writer = csv::Writer::from_writer(writer);
    for record in records {
        writer.serialize(AggregatedRow::from(record))?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes aggregated rows to a CSV file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_csv_file(path: &Path, records: &[AggregatedRecord]) -> Result<(), IngestError> {
    write_csv(BufWriter::new(File::create(path)?), records)?;
    log::info!("Wrote {} rows to {}", records.len(), path.display());
    Ok(())
}

/// Builds one feature per aggregated row.
///
/// # Errors
///
/// Returns an error if a row cannot be serialized into properties.
pub fn to_feature_collection(
    records: &[AggregatedRecord],
) -> Result<FeatureCollection, IngestError> {
    let features = records
        .iter()
        .map(|record| {
            let properties = match serde_json::to_value(AggregatedRow::from(record))? {
                serde_json::Value::Object(map) => map,
                _ => serde_json::Map::new(),
            };
            Ok(Feature {
                bbox: None,
                geometry: record.record.geometry.as_ref().map(multipolygon_to_geometry),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            })
        })
        .collect::<Result<Vec<_>, IngestError>>()?;

    Ok(FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    })
}

/// Writes aggregated rows as a `GeoJSON` `FeatureCollection` at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_geojson(path: &Path, records: &[AggregatedRecord]) -> Result<(), IngestError> {
    let collection = to_feature_collection(records)?;
    write_collection(path, &collection)?;
    log::info!("Wrote {} features to {}", records.len(), path.display());
    Ok(())
}

/// Reads an aggregated `GeoJSON` file back into records.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not a
/// `FeatureCollection`, or a feature lacks the row columns.
pub fn load_aggregated_geojson(path: &Path) -> Result<Vec<AggregatedRecord>, IngestError> {
    let contents = fs::read_to_string(path)?;
    let records = parse_aggregated_geojson(&contents)?;
    log::info!("Loaded {} aggregated rows from {}", records.len(), path.display());
    Ok(records)
}

/// Parses aggregated `GeoJSON` text into records.
///
/// # Errors
///
/// Returns an error if the text is not a `FeatureCollection` or a feature
/// lacks the row columns.
pub fn parse_aggregated_geojson(contents: &str) -> Result<Vec<AggregatedRecord>, IngestError> {
    read_collection(contents)?
        .features
        .into_iter()
        .map(|feature| {
            let properties = feature.properties.unwrap_or_default();
            let row: AggregatedRow =
                serde_json::from_value(serde_json::Value::Object(properties))?;
            row.into_record(feature.geometry.and_then(geometry_to_multipolygon))
        })
        .collect()
}

/// Splits an aggregated `GeoJSON` file into one file per date, named
/// `{YYYYMMDD}_predictions.geojson`, inside `output_dir`.
///
/// Features are copied unchanged. Features with a missing or unparseable
/// `date` property are skipped with a warning. A [`SplitIndex`] is written
/// to [`SPLIT_INDEX_FILE`] alongside. Returns the daily file paths in date
/// order.
///
/// # Errors
///
/// Returns an error if the input cannot be read or an output file cannot be
/// written.
pub fn split_geojson_by_date(input: &Path, output_dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let collection = read_collection(&fs::read_to_string(input)?)?;
    fs::create_dir_all(output_dir)?;

    let mut by_date: BTreeMap<NaiveDate, Vec<Feature>> = BTreeMap::new();
    let mut skipped = 0_usize;
    for feature in collection.features {
        let date = match feature.property("date") {
            Some(serde_json::Value::String(s)) => parse_date(s),
            _ => None,
        };
        match date {
            Some(date) => by_date.entry(date).or_default().push(feature),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        log::warn!("Skipped {skipped} features without a valid date");
    }

    let index = SplitIndex::new(by_date.keys().copied());
    let mut written = Vec::with_capacity(by_date.len());
    for (date, features) in by_date {
        let path = output_dir.join(format!("{}_predictions.geojson", date.format("%Y%m%d")));
        let count = features.len();
        write_collection(
            &path,
            &FeatureCollection {
                bbox: None,
                features,
                foreign_members: None,
            },
        )?;
        log::debug!("Wrote {count} features to {}", path.display());
        written.push(path);
    }

    let index_path = output_dir.join(SPLIT_INDEX_FILE);
    let mut writer = BufWriter::new(File::create(&index_path)?);
    serde_json::to_writer_pretty(&mut writer, &index)?;
    writer.flush()?;
    log::debug!("Wrote date index to {}", index_path.display());

    log::info!(
        "Split {} into {} daily files under {}",
        input.display(),
        written.len(),
        output_dir.display()
    );
    Ok(written)
}

/// Name of the date index written next to the daily split files.
pub const SPLIT_INDEX_FILE: &str = "index.json";

/// Contents of [`SPLIT_INDEX_FILE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitIndex {
    /// Dates with a daily file, ascending, as `YYYY-MM-DD`.
    pub dates: Vec<String>,
    /// Number of daily files.
    pub total_files: usize,
    /// First and last date, absent when no file was written.
    pub date_range: Option<DateRange>,
}

/// Inclusive date range of a split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

impl SplitIndex {
    fn new(dates: impl Iterator<Item = NaiveDate>) -> Self {
        let dates: Vec<String> = dates.map(|d| d.format("%Y-%m-%d").to_string()).collect();
        let date_range = dates.first().zip(dates.last()).map(|(start, end)| DateRange {
            start: start.clone(),
            end: end.clone(),
        });
        Self {
            total_files: dates.len(),
            dates,
            date_range,
        }
    }
}

fn read_collection(contents: &str) -> Result<FeatureCollection, IngestError> {
    match contents.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(collection) => Ok(collection),
        _ => Err(IngestError::Format {
            message: "expected a FeatureCollection".to_string(),
        }),
    }
}

fn write_collection(path: &Path, collection: &FeatureCollection) -> Result<(), IngestError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, collection)?;
    writer.flush()?;
    Ok(())
}
