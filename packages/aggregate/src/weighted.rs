//! Area-weighted aggregation over one date partition.
//!
//! For every region the overlapping regions of the same date are found
//! (through the R-tree or by scanning every pair), their overlap areas
//! are measured once, and each configured target is averaged over them,
//! weighted by area or plainly. A region that overlaps nothing by more
//! than `epsilon`, itself included, gets `None`.

use std::borrow::Cow;
use std::collections::BTreeSet;

use dengue_map_region_models::{
    AggregatedRecord, AggregationSettings, AggregationTarget, CandidateStrategy, NeighborSearch,
    RegionRecord, Statistic,
};
use dengue_map_spatial::{RegionIndex, SpatialError, expand, intersection_area, is_usable};
use geo::MultiPolygon;

use crate::PartitionError;

/// A region overlapping the target region, with its overlap area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Row of the neighbor within the partition.
    pub index: usize,
    /// Area of `search(target) ∩ base(neighbor)`, always `> epsilon`.
    pub area: f64,
}

/// Aggregates every configured target for one date partition.
///
/// Returns one [`AggregatedRecord`] per input row, in input order. The
/// neighbor set of each region is computed once and shared by all
/// targets. Rows without usable geometry come back with every aggregate
/// unset.
///
/// # Errors
///
/// Returns [`PartitionError::DuplicateRegion`] if a region id occurs more
/// than once.
pub fn aggregate_partition(
    records: Vec<RegionRecord>,
    settings: &AggregationSettings,
) -> Result<Vec<AggregatedRecord>, PartitionError> {
    let mut seen = BTreeSet::new();
    for record in &records {
        if !seen.insert(record.region_id.as_str()) {
            return Err(PartitionError::DuplicateRegion {
                date: record.date,
                region_id: record.region_id.clone(),
            });
        }
    }

    let weights = neighbor_weights(&records, settings);

    let means: Vec<Vec<(AggregationTarget, Option<f64>)>> = weights
        .iter()
        .map(|neighbors| {
            settings
                .targets
                .iter()
                .map(|&target| {
                    let value = |j: usize| records[j].value(target);
                    let mean = match settings.statistic {
                        Statistic::AreaWeighted => weighted_mean(neighbors, value),
                        Statistic::Simple => simple_mean(neighbors, value),
                    };
                    (target, mean)
                })
                .collect()
        })
        .collect();

    let isolated = weights.iter().filter(|n| n.is_empty()).count();
    if isolated > 0 {
        if let Some(first) = records.first() {
            log::debug!(
                "{isolated} of {} regions on {} have no overlapping region",
                records.len(),
                first.date
            );
        }
    }

    Ok(records
        .into_iter()
        .zip(means)
        .map(|(record, values)| {
            let mut out = AggregatedRecord::unaggregated(record);
            for (target, value) in values {
                out.set_weighted_mean(target, value);
            }
            out
        })
        .collect())
}

/// Computes the overlapping neighbors of every row.
///
/// Row `i`'s search geometry is its own polygon, or that polygon buffered
/// outward in expanded mode. Overlap is always measured against the
/// neighbors' unbuffered polygons. A row with a non-degenerate polygon is
/// always its own neighbor. Polygons with non-finite coordinates are
/// treated as missing by both strategies.
#[must_use]
pub fn neighbor_weights(
    records: &[RegionRecord],
    settings: &AggregationSettings,
) -> Vec<Vec<Neighbor>> {
    neighbor_weights_with(records, settings, intersection_area)
}

/// Area-weighted mean of `value` over `neighbors`.
///
/// Neighbors whose value is missing or not finite are skipped. Falls back
/// to the plain mean when the remaining weights sum to zero, and returns
/// `None` when nothing remains.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn weighted_mean(neighbors: &[Neighbor], value: impl Fn(usize) -> Option<f64>) -> Option<f64> {
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    let mut plain_sum = 0.0;
    let mut count = 0_usize;

    for neighbor in neighbors {
        let Some(v) = value(neighbor.index).filter(|v| v.is_finite()) else {
            continue;
        };
        weighted_sum += v * neighbor.area;
        total_weight += neighbor.area;
        plain_sum += v;
        count += 1;
    }

    if count == 0 {
        None
    } else if total_weight > 0.0 {
        Some(weighted_sum / total_weight)
    } else {
        Some(plain_sum / count as f64)
    }
}

/// Unweighted mean of `value` over `neighbors`, skipping missing or
/// non-finite values.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn simple_mean(neighbors: &[Neighbor], value: impl Fn(usize) -> Option<f64>) -> Option<f64> {
    let (sum, count) = neighbors
        .iter()
        .filter_map(|n| value(n.index).filter(|v| v.is_finite()))
        .fold((0.0, 0_usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn neighbor_weights_with<F>(
    records: &[RegionRecord],
    settings: &AggregationSettings,
    measure: F,
) -> Vec<Vec<Neighbor>>
where
    F: Fn(&MultiPolygon<f64>, &MultiPolygon<f64>) -> Result<f64, SpatialError>,
{
    let bases: Vec<Option<&MultiPolygon<f64>>> = records.iter().map(usable_geometry).collect();
    let search: Vec<Option<Cow<'_, MultiPolygon<f64>>>> = records
        .iter()
        .zip(&bases)
        .map(|(record, base)| search_geometry(record, *base, settings.search))
        .collect();

    let pairs = Pairs {
        records,
        bases: &bases,
        epsilon: settings.epsilon,
        measure: &measure,
    };

    match settings.strategy {
        CandidateStrategy::Indexed => {
            let index = RegionIndex::build(bases.iter().copied());
            log::trace!("Indexed {} of {} regions", index.len(), records.len());
            search
                .iter()
                .enumerate()
                .map(|(i, geom)| {
                    geom.as_ref()
                        .map_or_else(Vec::new, |geom| pairs.overlaps(i, geom, index.candidates(geom)))
                })
                .collect()
        }
        CandidateStrategy::AllPairs => search
            .iter()
            .enumerate()
            .map(|(i, geom)| {
                geom.as_ref()
                    .map_or_else(Vec::new, |geom| pairs.overlaps(i, geom, 0..records.len()))
            })
            .collect(),
    }
}

fn usable_geometry(record: &RegionRecord) -> Option<&MultiPolygon<f64>> {
    let Some(geometry) = record.geometry.as_ref() else {
        log::debug!("Region {} on {} has no geometry", record.region_id, record.date);
        return None;
    };
    if !is_usable(geometry) {
        log::warn!(
            "Region {} on {} has an empty or non-finite polygon, treating it as missing",
            record.region_id,
            record.date
        );
        return None;
    }
    Some(geometry)
}

fn search_geometry<'a>(
    record: &RegionRecord,
    base: Option<&'a MultiPolygon<f64>>,
    search: NeighborSearch,
) -> Option<Cow<'a, MultiPolygon<f64>>> {
    let base = base?;
    match search {
        NeighborSearch::Exact => Some(Cow::Borrowed(base)),
        NeighborSearch::Expanded { buffer_distance } => match expand(base, buffer_distance) {
            Ok(grown) => Some(Cow::Owned(grown)),
            Err(e) => {
                log::warn!(
                    "Failed to buffer region {} on {}: {e}",
                    record.region_id,
                    record.date
                );
                None
            }
        },
    }
}

/// Everything needed to measure one target against its candidates.
struct Pairs<'a, F> {
    records: &'a [RegionRecord],
    bases: &'a [Option<&'a MultiPolygon<f64>>],
    epsilon: f64,
    measure: &'a F,
}

impl<F> Pairs<'_, F>
where
    F: Fn(&MultiPolygon<f64>, &MultiPolygon<f64>) -> Result<f64, SpatialError>,
{
    fn overlaps(
        &self,
        target: usize,
        search: &MultiPolygon<f64>,
        candidates: impl IntoIterator<Item = usize>,
    ) -> Vec<Neighbor> {
        candidates
            .into_iter()
            .filter_map(|j| {
                let base = self.bases[j]?;
                match (self.measure)(search, base) {
                    Ok(area) if area > self.epsilon => Some(Neighbor { index: j, area }),
                    Ok(_) => None,
                    Err(e) => {
                        log::warn!(
                            "Treating regions {} and {} on {} as disjoint: {e}",
                            self.records[target].region_id,
                            self.records[j].region_id,
                            self.records[target].date
                        );
                        None
                    }
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use dengue_map_region_models::{AggregationConfig, SearchMode};
    use geo::{Area as _, Rect, coord};

    use super::*;

    const TOLERANCE: f64 = 1e-6;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 7, 1).unwrap()
    }

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![
            Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 }).to_polygon(),
        ])
    }

    fn record(id: &str, geometry: Option<MultiPolygon<f64>>, value: f64) -> RegionRecord {
        RegionRecord::new(date(), id.to_string(), geometry).with_values(Some(value), Some(value * 2.0))
    }

    fn abc() -> Vec<RegionRecord> {
        vec![
            record("A", Some(square(0.0, 0.0, 1.0, 1.0)), 10.0),
            record("B", Some(square(1.0, 0.0, 2.0, 1.0)), 20.0),
            record("C", Some(square(5.0, 5.0, 6.0, 6.0)), 30.0),
        ]
    }

    fn expanded(buffer_distance: f64) -> AggregationSettings {
        AggregationConfig {
            mode: SearchMode::Expanded,
            buffer_distance,
            ..AggregationConfig::default()
        }
        .validate()
        .unwrap()
    }

    fn all_pairs() -> AggregationSettings {
        AggregationSettings {
            strategy: CandidateStrategy::AllPairs,
            ..AggregationSettings::default()
        }
    }

    fn assert_close(actual: Option<f64>, expected: f64) {
        let actual = actual.expect("expected a value, got None");
        assert!(
            (actual - expected).abs() < TOLERANCE,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn touching_squares_only_see_themselves() {
        let out = aggregate_partition(abc(), &AggregationSettings::default()).unwrap();
        assert_eq!(out.len(), 3);
        assert_close(out[0].actual_weighted_mean, 10.0);
        assert_close(out[1].actual_weighted_mean, 20.0);
        assert_close(out[2].actual_weighted_mean, 30.0);
        assert_close(out[0].predicted_weighted_mean, 20.0);
    }

    #[test]
    fn single_region_is_its_own_mean() {
        let out = aggregate_partition(
            vec![record("A", Some(square(3.0, 4.0, 7.0, 9.0)), 4.5)],
            &AggregationSettings::default(),
        )
        .unwrap();
        assert_close(out[0].actual_weighted_mean, 4.5);
        assert_close(out[0].predicted_weighted_mean, 9.0);
    }

    #[test]
    fn overlapping_regions_blend_by_area() {
        let records = vec![
            record("A", Some(square(0.0, 0.0, 2.0, 2.0)), 10.0),
            record("B", Some(square(1.0, 1.0, 3.0, 3.0)), 30.0),
        ];
        let out = aggregate_partition(records, &AggregationSettings::default()).unwrap();
        // A: self 4, overlap with B 1
        assert_close(out[0].actual_weighted_mean, (10.0 * 4.0 + 30.0) / 5.0);
        assert_close(out[1].actual_weighted_mean, (30.0 * 4.0 + 10.0) / 5.0);
    }

    #[test]
    fn buffered_search_pulls_in_the_neighbor() {
        let out = aggregate_partition(abc(), &expanded(0.5)).unwrap();
        // buffered A reaches a 0.5 x 1 strip of B; C stays isolated
        assert_close(out[0].actual_weighted_mean, (10.0 + 20.0 * 0.5) / 1.5);
        assert_close(out[1].actual_weighted_mean, (20.0 + 10.0 * 0.5) / 1.5);
        assert_close(out[2].actual_weighted_mean, 30.0);
    }

    #[test]
    fn buffered_neighbors_are_weighted_by_raw_geometry() {
        let records = abc();
        let weights = neighbor_weights(&records, &expanded(0.5));
        let areas: Vec<(usize, f64)> = weights[0].iter().map(|n| (n.index, n.area)).collect();
        assert_eq!(areas.len(), 2);
        assert_eq!(areas[0].0, 0);
        assert!((areas[0].1 - 1.0).abs() < TOLERANCE);
        assert_eq!(areas[1].0, 1);
        assert!((areas[1].1 - 0.5).abs() < TOLERANCE);
    }

    #[test]
    fn missing_geometry_yields_null_and_keeps_the_row() {
        let mut records = abc();
        records.insert(1, record("X", None, 99.0));
        let out = aggregate_partition(records, &AggregationSettings::default()).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[1].record.region_id, "X");
        assert_eq!(out[1].actual_weighted_mean, None);
        assert_eq!(out[1].predicted_weighted_mean, None);
        assert_close(out[0].actual_weighted_mean, 10.0);
        assert_close(out[2].actual_weighted_mean, 20.0);
    }

    #[test]
    fn sub_epsilon_region_is_null_not_zero() {
        let records = vec![
            record("tiny", Some(square(0.0, 0.0, 1e-6, 1e-6)), 0.0),
            record("far", Some(square(10.0, 10.0, 11.0, 11.0)), 0.0),
        ];
        let out = aggregate_partition(records, &AggregationSettings::default()).unwrap();
        assert_eq!(out[0].actual_weighted_mean, None);
        assert_eq!(out[1].actual_weighted_mean, Some(0.0));
    }

    #[test]
    fn every_row_is_returned_even_when_all_are_isolated() {
        let records: Vec<RegionRecord> = (0..5)
            .map(|i| record(&format!("R{i}"), None, f64::from(i)))
            .collect();
        let out = aggregate_partition(records, &AggregationSettings::default()).unwrap();
        assert_eq!(out.len(), 5);
        assert!(out.iter().all(|r| r.actual_weighted_mean.is_none()));
    }

    #[test]
    fn missing_values_are_skipped_per_target() {
        let mut records = vec![
            record("A", Some(square(0.0, 0.0, 2.0, 2.0)), 10.0),
            record("B", Some(square(1.0, 1.0, 3.0, 3.0)), 30.0),
        ];
        records[1].predicted_value = None;
        let out = aggregate_partition(records, &AggregationSettings::default()).unwrap();
        assert_close(out[0].predicted_weighted_mean, 20.0);
        assert_close(out[1].predicted_weighted_mean, 20.0);
        assert_close(out[0].actual_weighted_mean, 14.0);
    }

    #[test]
    fn only_configured_targets_are_filled() {
        let settings = AggregationSettings {
            targets: vec![AggregationTarget::Predicted],
            ..AggregationSettings::default()
        };
        let out = aggregate_partition(abc(), &settings).unwrap();
        assert!(out.iter().all(|r| r.actual_weighted_mean.is_none()));
        assert_close(out[0].predicted_weighted_mean, 20.0);
    }

    #[test]
    fn permuting_rows_does_not_change_values() {
        let records = vec![
            record("A", Some(square(0.0, 0.0, 2.0, 2.0)), 10.0),
            record("B", Some(square(1.0, 1.0, 3.0, 3.0)), 30.0),
            record("C", Some(square(1.5, 0.0, 4.0, 1.5)), 5.0),
            record("D", Some(square(8.0, 8.0, 9.0, 9.0)), 7.0),
        ];
        let mut reversed = records.clone();
        reversed.reverse();

        let settings = AggregationSettings::default();
        let forward = aggregate_partition(records, &settings).unwrap();
        let backward = aggregate_partition(reversed, &settings).unwrap();

        for row in &forward {
            let other = backward
                .iter()
                .find(|r| r.record.region_id == row.record.region_id)
                .unwrap();
            let (a, b) = (row.actual_weighted_mean.unwrap(), other.actual_weighted_mean.unwrap());
            assert!((a - b).abs() < 1e-9, "{}: {a} != {b}", row.record.region_id);
        }
    }

    #[test]
    fn all_pairs_matches_indexed() {
        let records = vec![
            record("A", Some(square(0.0, 0.0, 2.0, 2.0)), 10.0),
            record("B", Some(square(1.0, 1.0, 3.0, 3.0)), 30.0),
            record("C", Some(square(1.5, 0.0, 4.0, 1.5)), 5.0),
            record("D", None, 1.0),
            record("E", Some(square(8.0, 8.0, 9.0, 9.0)), 7.0),
        ];
        let indexed = aggregate_partition(records.clone(), &AggregationSettings::default()).unwrap();
        let scanned = aggregate_partition(records, &all_pairs()).unwrap();
        assert_eq!(indexed, scanned);
    }

    #[test]
    fn rejects_duplicate_region_ids() {
        let mut records = abc();
        records.push(record("A", Some(square(0.0, 0.0, 1.0, 1.0)), 1.0));
        let err = aggregate_partition(records, &AggregationSettings::default()).unwrap_err();
        assert_eq!(
            err,
            PartitionError::DuplicateRegion {
                date: date(),
                region_id: "A".to_string()
            }
        );
    }

    #[test]
    fn non_finite_polygon_is_missing_under_both_strategies() {
        let mut records: Vec<RegionRecord> = (0..20)
            .map(|i| {
                let x = f64::from(i);
                record(&format!("R{i}"), Some(square(x, 0.0, x + 1.0, 1.0)), x)
            })
            .collect();
        records.push(record("bad", Some(square(f64::NAN, 0.0, 3.0, 1.0)), 99.0));

        let indexed = aggregate_partition(records.clone(), &AggregationSettings::default()).unwrap();
        let scanned = aggregate_partition(records, &all_pairs()).unwrap();
        assert_eq!(indexed, scanned);
        assert_eq!(indexed.len(), 21);
        assert!(indexed[..20].iter().all(|r| r.actual_weighted_mean.is_some()));
        assert_close(indexed[3].actual_weighted_mean, 3.0);
        assert_eq!(indexed[20].actual_weighted_mean, None);
        assert_eq!(indexed[20].predicted_weighted_mean, None);
    }

    #[test]
    fn failed_pair_is_treated_as_disjoint() {
        let records = vec![
            record("A", Some(square(0.0, 0.0, 2.0, 2.0)), 10.0),
            record("B", Some(square(1.0, 1.0, 4.0, 4.0)), 30.0),
        ];
        // only the A/B pair fails; each region still measures itself
        let weights = neighbor_weights_with(&records, &AggregationSettings::default(), |a, b| {
            if (a.unsigned_area() > 5.0) == (b.unsigned_area() > 5.0) {
                intersection_area(a, b)
            } else {
                Err(SpatialError::NonFiniteArea { area: f64::NAN })
            }
        });
        assert_eq!(weights[0].len(), 1);
        assert_eq!(weights[0][0].index, 0);
        assert_eq!(weights[1].len(), 1);
        assert_eq!(weights[1][0].index, 1);

        let unfailed = neighbor_weights(&records, &AggregationSettings::default());
        assert_eq!(unfailed[0].len(), 2);
    }

    #[test]
    fn simple_statistic_ignores_overlap_area() {
        let records = vec![
            record("A", Some(square(0.0, 0.0, 2.0, 2.0)), 10.0),
            record("B", Some(square(1.0, 1.0, 3.0, 3.0)), 30.0),
            record("C", Some(square(5.0, 5.0, 6.0, 6.0)), 7.0),
        ];
        let settings = AggregationSettings {
            statistic: Statistic::Simple,
            ..AggregationSettings::default()
        };
        let out = aggregate_partition(records.clone(), &settings).unwrap();
        assert_close(out[0].actual_weighted_mean, 20.0);
        assert_close(out[1].actual_weighted_mean, 20.0);
        assert_close(out[2].actual_weighted_mean, 7.0);

        let weighted = aggregate_partition(records, &AggregationSettings::default()).unwrap();
        assert_close(weighted[0].actual_weighted_mean, 14.0);
    }

    #[test]
    fn simple_mean_skips_missing_values() {
        let neighbors = [
            Neighbor { index: 0, area: 9.0 },
            Neighbor { index: 1, area: 1.0 },
            Neighbor { index: 2, area: 1.0 },
        ];
        let values = [Some(2.0), None, Some(6.0)];
        assert_close(simple_mean(&neighbors, |i| values[i]), 4.0);
        assert_eq!(simple_mean(&neighbors[1..2], |i| values[i]), None);
    }

    #[test]
    fn weighted_mean_falls_back_to_plain_mean_on_zero_weight() {
        let neighbors = [
            Neighbor { index: 0, area: 0.0 },
            Neighbor { index: 1, area: 0.0 },
        ];
        let values = [2.0, 4.0];
        assert_close(weighted_mean(&neighbors, |i| Some(values[i])), 3.0);
        assert_eq!(weighted_mean(&[], |_| Some(1.0)), None);
        assert_eq!(weighted_mean(&neighbors, |_| Some(f64::NAN)), None);
    }
}
