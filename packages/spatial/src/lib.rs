#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-memory spatial index and polygon overlap helpers.
//!
//! Builds an R-tree over the envelopes of one date's region polygons and
//! surfaces candidate neighbors for a search polygon. Exact overlap is
//! measured with [`intersection_area`], which never propagates a panic
//! from the boolean-ops backend.

use std::any::Any;
use std::panic;

use geo::{Area, BooleanOps, BoundingRect, Buffer, CoordsIter, MultiPolygon};
use rstar::{AABB, RTree, RTreeObject};

/// Errors from geometry operations on a single polygon or pair.
#[derive(Debug, thiserror::Error)]
pub enum SpatialError {
    /// The boolean-ops or buffer backend panicked on this input.
    #[error("Geometry operation failed: {message}")]
    Geometry {
        /// Panic payload, if it was a string.
        message: String,
    },

    /// The computed area was NaN or infinite.
    #[error("Non-finite intersection area: {area}")]
    NonFiniteArea {
        /// The offending value.
        area: f64,
    },
}

/// A region envelope stored in the R-tree, pointing back at its row.
struct RegionEntry {
    index: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for RegionEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// R-tree over the region polygons of one date partition.
///
/// Entries are keyed by their position in the slice the index was built
/// from. Rows without geometry (or with an empty one) are not indexed and
/// are never returned as candidates.
pub struct RegionIndex {
    tree: RTree<RegionEntry>,
}

impl RegionIndex {
    /// Bulk-loads the envelopes of `geometries`, in row order.
    pub fn build<'a, I>(geometries: I) -> Self
    where
        I: IntoIterator<Item = Option<&'a MultiPolygon<f64>>>,
    {
        let entries: Vec<RegionEntry> = geometries
            .into_iter()
            .enumerate()
            .filter_map(|(index, geometry)| {
                let envelope = compute_envelope(geometry?)?;
                Some(RegionEntry { index, envelope })
            })
            .collect();

        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Number of indexed regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Whether no region was indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Row indices whose envelope intersects the envelope of `search`,
    /// ascending.
    ///
    /// Envelopes that merely touch are included; callers filter on the
    /// exact intersection area.
    #[must_use]
    pub fn candidates(&self, search: &MultiPolygon<f64>) -> Vec<usize> {
        let Some(query_env) = compute_envelope(search) else {
            return Vec::new();
        };

        let mut found: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&query_env)
            .map(|entry| entry.index)
            .collect();
        found.sort_unstable();
        found
    }
}

/// Compute the bounding box envelope for a [`MultiPolygon`].
///
/// Returns `None` for a geometry with no coordinates or with a non-finite
/// bound.
#[must_use]
pub fn compute_envelope(mp: &MultiPolygon<f64>) -> Option<AABB<[f64; 2]>> {
    let rect = mp.bounding_rect()?;
    let (min, max) = (rect.min(), rect.max());
    [min.x, min.y, max.x, max.y]
        .iter()
        .all(|v| v.is_finite())
        .then(|| AABB::from_corners([min.x, min.y], [max.x, max.y]))
}

/// Whether `mp` has at least one coordinate and every coordinate is finite.
#[must_use]
pub fn is_usable(mp: &MultiPolygon<f64>) -> bool {
    mp.coords_count() > 0 && mp.coords_iter().all(|c| c.x.is_finite() && c.y.is_finite())
}

/// Area of `a ∩ b`.
///
/// # Errors
///
/// Returns [`SpatialError::Geometry`] if the intersection panicked and
/// [`SpatialError::NonFiniteArea`] if the result is not a finite number.
pub fn intersection_area(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> Result<f64, SpatialError> {
    let area = panic::catch_unwind(|| a.intersection(b).unsigned_area()).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        log::debug!("Intersection panicked: {message}");
        SpatialError::Geometry { message }
    })?;

    if area.is_finite() {
        Ok(area)
    } else {
        Err(SpatialError::NonFiniteArea { area })
    }
}

/// Dilates `mp` outward by `distance` CRS units.
///
/// # Errors
///
/// Returns [`SpatialError::Geometry`] if the buffer backend panicked.
pub fn expand(mp: &MultiPolygon<f64>, distance: f64) -> Result<MultiPolygon<f64>, SpatialError> {
    panic::catch_unwind(|| mp.buffer(distance)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        log::debug!("Buffer by {distance} panicked: {message}");
        SpatialError::Geometry { message }
    })
}

/// Renders a caught panic payload as text.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Converts a `GeoJSON` geometry into a [`MultiPolygon`].
/// Handles both `Polygon` and `MultiPolygon` geometry types.
#[must_use]
pub fn geometry_to_multipolygon(geometry: geojson::Geometry) -> Option<MultiPolygon<f64>> {
    let geo_geom: geo::Geometry<f64> = geometry.try_into().ok()?;
    match geo_geom {
        geo::Geometry::MultiPolygon(mp) => Some(mp),
        geo::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        _ => None,
    }
}

/// Converts a [`MultiPolygon`] into a `GeoJSON` geometry.
#[must_use]
pub fn multipolygon_to_geometry(mp: &MultiPolygon<f64>) -> geojson::Geometry {
    geojson::Geometry::new(geojson::Value::from(mp))
}

#[cfg(test)]
mod tests {
    use geo::{Rect, coord};
    use geojson::GeoJson;

    use super::*;

    fn parse_polygon(text: &str) -> Option<MultiPolygon<f64>> {
        match text.parse::<GeoJson>().ok()? {
            GeoJson::Geometry(geometry) => geometry_to_multipolygon(geometry),
            _ => None,
        }
    }

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![
            Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 }).to_polygon(),
        ])
    }

    #[test]
    fn measures_overlap_of_offset_squares() {
        let a = square(0.0, 0.0, 2.0, 2.0);
        let b = square(1.0, 1.0, 3.0, 3.0);
        let area = intersection_area(&a, &b).unwrap();
        assert!((area - 1.0).abs() < 1e-9);
    }

    #[test]
    fn touching_squares_have_zero_overlap() {
        let a = square(0.0, 0.0, 1.0, 1.0);
        let b = square(1.0, 0.0, 2.0, 1.0);
        assert!(intersection_area(&a, &b).unwrap() < 1e-10);
    }

    #[test]
    fn self_overlap_is_own_area() {
        let a = square(0.0, 0.0, 3.0, 2.0);
        assert!((intersection_area(&a, &a).unwrap() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn index_surfaces_envelope_neighbors_only() {
        let geoms = [
            Some(square(0.0, 0.0, 1.0, 1.0)),
            Some(square(1.0, 0.0, 2.0, 1.0)),
            None,
            Some(square(5.0, 5.0, 6.0, 6.0)),
        ];
        let index = RegionIndex::build(geoms.iter().map(Option::as_ref));
        assert_eq!(index.len(), 3);

        let found = index.candidates(&square(0.0, 0.0, 1.0, 1.0));
        assert_eq!(found, vec![0, 1]);

        let found = index.candidates(&square(5.5, 5.5, 7.0, 7.0));
        assert_eq!(found, vec![3]);
    }

    #[test]
    fn empty_geometry_has_no_envelope() {
        let empty = MultiPolygon::<f64>(vec![]);
        assert!(compute_envelope(&empty).is_none());

        let index = RegionIndex::build([Some(&empty)]);
        assert!(index.is_empty());
        assert!(index.candidates(&empty).is_empty());
    }

    #[test]
    fn non_finite_geometry_is_not_indexed() {
        let bad = square(f64::NAN, 0.0, 1.0, 1.0);
        let good = square(0.0, 0.0, 1.0, 1.0);
        assert!(!is_usable(&bad));
        assert!(is_usable(&good));
        assert!(!is_usable(&MultiPolygon(vec![])));

        let inf = square(0.0, 0.0, f64::INFINITY, 1.0);
        assert!(compute_envelope(&inf).is_none());

        let index = RegionIndex::build([Some(&good), Some(&inf)]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.candidates(&good), vec![0]);
    }

    #[test]
    fn expand_grows_the_footprint() {
        let a = square(0.0, 0.0, 1.0, 1.0);
        let grown = expand(&a, 1.0).unwrap();
        assert!(grown.unsigned_area() > a.unsigned_area());

        let reach = square(1.5, 0.0, 2.5, 1.0);
        assert!(intersection_area(&grown, &reach).unwrap() > 0.0);
    }

    #[test]
    fn parses_polygon_geojson() {
        let mp = parse_polygon(
            r#"{"type":"Polygon","coordinates":[[[0,0],[2,0],[2,2],[0,2],[0,0]]]}"#,
        )
        .unwrap();
        assert_eq!(mp.0.len(), 1);
        assert!((mp.unsigned_area() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_point_geojson() {
        assert!(parse_polygon(r#"{"type":"Point","coordinates":[1,2]}"#).is_none());
    }

    #[test]
    fn round_trips_through_geojson_geometry() {
        let a = square(0.0, 0.0, 1.0, 1.0);
        let back = geometry_to_multipolygon(multipolygon_to_geometry(&a)).unwrap();
        assert_eq!(a, back);
    }
}
