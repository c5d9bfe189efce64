#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Result types returned by prediction store queries.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Outbreak percentage at or above which a region is high risk.
pub const HIGH_RISK_PERCENTAGE: f64 = 50.0;

/// Outbreak percentage at or above which a region is medium risk.
pub const MEDIUM_RISK_PERCENTAGE: f64 = 20.0;

/// Risk tier derived from the predicted outbreak percentage.
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
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RiskTier {
    /// Below 20%, or no percentage available.
    Low,
    /// 20% up to 50%.
    Medium,
    /// 50% and above.
    High,
}

impl RiskTier {
    /// Classifies a predicted percentage. Missing or NaN values are low.
    #[must_use]
    pub fn from_percentage(percentage: Option<f64>) -> Self {
        match percentage {
            Some(p) if p >= HIGH_RISK_PERCENTAGE => Self::High,
            Some(p) if p >= MEDIUM_RISK_PERCENTAGE => Self::Medium,
            _ => Self::Low,
        }
    }
}

/// Per-date aggregate over every region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySummary {
    /// The summarized date.
    pub date: NaiveDate,
    /// Number of region rows on the date.
    pub total_regions: usize,
    /// Sum of predicted case counts.
    pub total_predicted_cases: f64,
    /// Mean predicted case count over rows that have one.
    pub avg_prediction: Option<f64>,
    /// Largest predicted case count.
    pub max_prediction: Option<f64>,
    /// Smallest predicted case count.
    pub min_prediction: Option<f64>,
    /// Rows in [`RiskTier::High`].
    pub high_risk_regions: usize,
    /// Rows in [`RiskTier::Medium`].
    pub medium_risk_regions: usize,
    /// Rows in [`RiskTier::Low`], including rows without a percentage.
    pub low_risk_regions: usize,
}

/// Overall store contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    /// Number of stored rows.
    pub total_predictions: usize,
    /// Number of distinct dates.
    pub total_dates: usize,
    /// Number of distinct region ids.
    pub total_regions: usize,
    /// Earliest date, if any rows are stored.
    pub first_date: Option<NaiveDate>,
    /// Latest date, if any rows are stored.
    pub last_date: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_tier_boundaries() {
        assert_eq!(RiskTier::from_percentage(Some(50.0)), RiskTier::High);
        assert_eq!(RiskTier::from_percentage(Some(49.9)), RiskTier::Medium);
        assert_eq!(RiskTier::from_percentage(Some(20.0)), RiskTier::Medium);
        assert_eq!(RiskTier::from_percentage(Some(19.99)), RiskTier::Low);
        assert_eq!(RiskTier::from_percentage(None), RiskTier::Low);
        assert_eq!(RiskTier::from_percentage(Some(f64::NAN)), RiskTier::Low);
    }

    #[test]
    fn tier_names_are_snake_case() {
        assert_eq!(RiskTier::High.to_string(), "high");
        assert_eq!("medium".parse::<RiskTier>().unwrap(), RiskTier::Medium);
        assert_eq!(serde_json::to_string(&RiskTier::Low).unwrap(), "\"low\"");
    }
}
