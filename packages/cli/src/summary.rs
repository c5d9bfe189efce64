//! The `summary` command: risk-tier reporting over an aggregated file.

use std::path::Path;

use chrono::NaiveDate;
use dengue_map_ingest::export::load_aggregated_geojson;
use dengue_map_store::models::DailySummary;
use dengue_map_store::{DatesCache, PredictionStore};

/// Prints store statistics and per-date summaries. With `date`, prints that
/// date's summary followed by the regions at or above `threshold`.
///
/// # Errors
///
/// Returns an error if the input cannot be loaded or JSON output fails.
pub fn run(
    input: &Path,
    date: Option<NaiveDate>,
    threshold: f64,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = PredictionStore::new(load_aggregated_geojson(input)?);
    let mut dates = DatesCache::new();

    let selected: Vec<NaiveDate> = match date {
        Some(date) => vec![date],
        None => dates.get_or_load(&store).to_vec(),
    };
    let summaries: Vec<DailySummary> = selected
        .iter()
        .filter_map(|&d| {
            let summary = store.daily_summary(d);
            if summary.is_none() {
                log::warn!("No predictions for {d}");
            }
            summary
        })
        .collect();

    if json {
        let value = serde_json::json!({
            "stats": store.stats(),
            "days": summaries,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let stats = store.stats();
    println!(
        "{} predictions, {} regions, {} dates",
        stats.total_predictions, stats.total_regions, stats.total_dates
    );
    if let (Some(first), Some(last)) = (stats.first_date, stats.last_date) {
        println!("Date range: {first} to {last}");
    }

    println!();
    println!(
        "{:<12} {:>8} {:>10} {:>8} {:>8} {:>6} {:>6} {:>6}",
        "date", "regions", "predicted", "avg", "max", "high", "medium", "low"
    );
    for s in &summaries {
        println!(
            "{:<12} {:>8} {:>10.2} {:>8} {:>8} {:>6} {:>6} {:>6}",
            s.date.to_string(),
            s.total_regions,
            s.total_predicted_cases,
            format_value(s.avg_prediction),
            format_value(s.max_prediction),
            s.high_risk_regions,
            s.medium_risk_regions,
            s.low_risk_regions
        );
    }

    if let Some(date) = date {
        let high = store.high_risk_regions(date, threshold);
        println!();
        println!("{} regions at or above {threshold}% on {date}", high.len());
        for row in high {
            let record = &row.record;
            println!(
                "  {:<12} {:<8} {:>6.1}%  weighted {}",
                record.region_id,
                record.town.as_deref().unwrap_or("-"),
                record.predicted_percentage.unwrap_or_default(),
                format_value(row.predicted_weighted_mean)
            );
        }
    }

    Ok(())
}

fn format_value(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"))
}
