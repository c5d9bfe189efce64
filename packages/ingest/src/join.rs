//! Joining prediction rows onto region polygons.

use std::collections::BTreeMap;

use dengue_map_region_models::{Region, RegionRecord};
use strum_macros::{AsRefStr, Display, EnumString};

/// How prediction rows without a matching region are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum JoinKind {
    /// Keep every prediction row; unmatched rows get no geometry.
    #[default]
    Left,
    /// Drop prediction rows whose region is unknown.
    Inner,
}

/// Attaches region geometry and names to each prediction record by id.
///
/// Row order is preserved. When `regions` holds the same id twice the first
/// occurrence wins.
#[must_use]
pub fn attach_regions(
    records: Vec<RegionRecord>,
    regions: &[Region],
    kind: JoinKind,
) -> Vec<RegionRecord> {
    let mut by_id: BTreeMap<&str, &Region> = BTreeMap::new();
    for region in regions {
        by_id.entry(region.id.as_str()).or_insert(region);
    }

    let total = records.len();
    let mut unmatched = 0_usize;
    let joined: Vec<RegionRecord> = records
        .into_iter()
        .filter_map(|mut record| {
            if let Some(region) = by_id.get(record.region_id.as_str()) {
                record.geometry.clone_from(&region.geometry);
                record.town.clone_from(&region.town);
                record.county.clone_from(&region.county);
                return Some(record);
            }

            unmatched += 1;
            match kind {
                JoinKind::Left => Some(record),
                JoinKind::Inner => None,
            }
        })
        .collect();

    if unmatched > 0 {
        log::warn!("{unmatched} of {total} prediction rows have no matching region ({kind} join)");
    }

    joined
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use geo::{MultiPolygon, polygon};

    use super::*;

    fn square() -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
        ]])
    }

    fn record(id: &str) -> RegionRecord {
        let date = NaiveDate::from_ymd_opt(2023, 6, 20).unwrap();
        RegionRecord::new(date, id.to_string(), None).with_values(Some(1.0), Some(2.0))
    }

    fn regions() -> Vec<Region> {
        vec![Region {
            id: "A01".to_string(),
            town: Some("東區".to_string()),
            county: Some("臺南市".to_string()),
            geometry: Some(square()),
        }]
    }

    #[test]
    fn left_join_keeps_unmatched_rows_without_geometry() {
        let joined = attach_regions(vec![record("A01"), record("Z99")], &regions(), JoinKind::Left);
        assert_eq!(joined.len(), 2);
        assert_eq!(joined[0].geometry, Some(square()));
        assert_eq!(joined[0].town.as_deref(), Some("東區"));
        assert_eq!(joined[0].actual_value, Some(1.0));
        assert_eq!(joined[1].region_id, "Z99");
        assert!(joined[1].geometry.is_none());
    }

    #[test]
    fn inner_join_drops_unmatched_rows() {
        let joined = attach_regions(vec![record("Z99"), record("A01")], &regions(), JoinKind::Inner);
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].region_id, "A01");
    }

    #[test]
    fn parses_join_kind() {
        assert_eq!("inner".parse::<JoinKind>().unwrap(), JoinKind::Inner);
        assert_eq!(JoinKind::default().to_string(), "left");
    }
}
