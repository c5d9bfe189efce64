//! Region polygon loading.

use std::fs;
use std::path::Path;

use dengue_map_region_models::Region;
use dengue_map_spatial::geometry_to_multipolygon;
use geojson::{Feature, GeoJson};

use crate::IngestError;

/// Property holding the region code in the statistical-area layer.
pub const DEFAULT_REGION_KEY: &str = "CODEBASE";

/// The nine central districts of Tainan covered by the prediction model.
pub const TAINAN_CENTRAL_DISTRICTS: &[&str] = &[
    "東區",
    "南區",
    "北區",
    "安平區",
    "安南區",
    "中西區",
    "永康區",
    "歸仁區",
    "仁德區",
];

/// Loads region polygons from a `GeoJSON` `FeatureCollection` file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a
/// `FeatureCollection`.
pub fn load_regions(path: &Path, region_key: &str) -> Result<Vec<Region>, IngestError> {
    let contents = fs::read_to_string(path)?;
    let regions = parse_regions(&contents, region_key)?;
    log::info!("Loaded {} regions from {}", regions.len(), path.display());
    Ok(regions)
}

/// Parses region polygons from `GeoJSON` text.
///
/// Features without a `region_key` property are skipped. Features whose
/// geometry is missing or not a (multi)polygon are kept with `None`
/// geometry so that their predictions still produce (null) output rows.
///
/// # Errors
///
/// Returns an error if the text is not a `GeoJSON` `FeatureCollection`.
pub fn parse_regions(contents: &str, region_key: &str) -> Result<Vec<Region>, IngestError> {
    let GeoJson::FeatureCollection(collection) = contents.parse::<GeoJson>()? else {
        return Err(IngestError::Format {
            message: "region layer is not a FeatureCollection".to_string(),
        });
    };

    let mut regions = Vec::with_capacity(collection.features.len());
    for feature in collection.features {
        let Some(id) = property_string(&feature, region_key) else {
            log::warn!("Skipping region feature without a {region_key} property");
            continue;
        };
        let town = property_string(&feature, "TOWN");
        let county = property_string(&feature, "COUNTY");
        let geometry = feature.geometry.and_then(geometry_to_multipolygon);
        if geometry.is_none() {
            log::warn!("Region {id} has no usable polygon geometry");
        }

        regions.push(Region {
            id,
            town,
            county,
            geometry,
        });
    }

    Ok(regions)
}

/// Keeps only regions whose town is listed in `towns`. An empty list keeps
/// everything.
#[must_use]
pub fn filter_towns<S: AsRef<str>>(regions: Vec<Region>, towns: &[S]) -> Vec<Region> {
    if towns.is_empty() {
        return regions;
    }

    let before = regions.len();
    let kept: Vec<Region> = regions
        .into_iter()
        .filter(|region| {
            region
                .town
                .as_deref()
                .is_some_and(|town| towns.iter().any(|t| t.as_ref() == town))
        })
        .collect();
    log::info!("Kept {} of {before} regions in the selected towns", kept.len());
    kept
}

/// Reads a property as text, accepting strings and numbers.
pub(crate) fn property_string(feature: &Feature, key: &str) -> Option<String> {
    match feature.property(key)? {
        serde_json::Value::String(s) => Some(s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
