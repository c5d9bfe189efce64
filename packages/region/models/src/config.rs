//! Aggregation configuration.
//!
//! [`AggregationConfig`] is the raw, user-facing surface: it deserializes
//! from TOML and is patched by CLI flags. [`AggregationConfig::validate`]
//! turns it into [`AggregationSettings`], the only form the engine
//! accepts, so every bad parameter is rejected before any partition work
//! starts.

use std::num::NonZeroUsize;
use std::str::FromStr as _;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::{AggregationTarget, DEFAULT_BUFFER_DISTANCE, DEFAULT_EPSILON};

/// Errors raised while loading or validating an [`AggregationConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file was not valid TOML or had unknown keys.
    #[error("Invalid aggregation config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A target name did not match any known attribute.
    #[error("Invalid aggregation target {name:?}: expected one of case_lag_future_14, predicted_case_lag_future_14, actual, predicted")]
    UnknownTarget {
        /// The rejected name.
        name: String,
    },

    /// The target list was empty.
    #[error("Invalid aggregation targets: at least one target is required")]
    NoTargets,

    /// `buffer_distance` must be a positive, finite number in expanded mode.
    #[error("Invalid buffer_distance {value}: must be positive and finite")]
    InvalidBufferDistance {
        /// The rejected distance.
        value: f64,
    },

    /// `epsilon` must be a non-negative, finite number.
    #[error("Invalid epsilon {value}: must be non-negative and finite")]
    InvalidEpsilon {
        /// The rejected threshold.
        value: f64,
    },

    /// `workers` must be at least 1 when given.
    #[error("Invalid workers 0: must be at least 1")]
    ZeroWorkers,
}

/// Which geometry is used to look for neighbors.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SearchMode {
    /// Neighbors overlap the region's own footprint.
    #[default]
    Exact,
    /// Neighbors overlap the region's footprint dilated by
    /// `buffer_distance`.
    Expanded,
}

/// How candidate pairs are surfaced before exact intersection.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum CandidateStrategy {
    /// R-tree over region envelopes.
    #[default]
    Indexed,
    /// Every region is tested against every other region.
    AllPairs,
}

/// How the neighbor values of a region are combined.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Statistic {
    /// Mean weighted by overlap area.
    #[default]
    AreaWeighted,
    /// Plain mean over the overlapping regions.
    Simple,
}

/// Raw aggregation configuration, as read from a TOML file or built from
/// CLI flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AggregationConfig {
    /// Attribute names to aggregate.
    pub targets: Vec<String>,
    /// Neighbor-search geometry.
    pub mode: SearchMode,
    /// Dilation distance for [`SearchMode::Expanded`], in CRS units.
    pub buffer_distance: f64,
    /// Worker count. Defaults to the available parallelism.
    pub workers: Option<usize>,
    /// Intersection areas at or below this are discarded.
    pub epsilon: f64,
    /// Candidate-pair strategy.
    pub strategy: CandidateStrategy,
    /// Combination of neighbor values.
    pub statistic: Statistic,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            targets: AggregationTarget::all()
                .iter()
                .map(ToString::to_string)
                .collect(),
            mode: SearchMode::default(),
            buffer_distance: DEFAULT_BUFFER_DISTANCE,
            workers: None,
            epsilon: DEFAULT_EPSILON,
            strategy: CandidateStrategy::default(),
            statistic: Statistic::default(),
        }
    }
}

impl AggregationConfig {
    /// Parses a config from TOML. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the TOML is malformed or contains
    /// unknown keys.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Checks every parameter and resolves target names.
    ///
    /// Duplicate targets are collapsed, keeping first-seen order.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] naming the first invalid parameter.
    pub fn validate(&self) -> Result<AggregationSettings, ConfigError> {
        let mut targets = Vec::with_capacity(self.targets.len());
        for name in &self.targets {
            let target = AggregationTarget::from_str(name.trim()).map_err(|_| {
                ConfigError::UnknownTarget {
                    name: name.clone(),
                }
            })?;
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
        if targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }

        let search = match self.mode {
            SearchMode::Exact => NeighborSearch::Exact,
            SearchMode::Expanded => {
                if !self.buffer_distance.is_finite() || self.buffer_distance <= 0.0 {
                    return Err(ConfigError::InvalidBufferDistance {
                        value: self.buffer_distance,
                    });
                }
                NeighborSearch::Expanded {
                    buffer_distance: self.buffer_distance,
                }
            }
        };

        if !self.epsilon.is_finite() || self.epsilon < 0.0 {
            return Err(ConfigError::InvalidEpsilon {
                value: self.epsilon,
            });
        }

        let workers = match self.workers {
            Some(n) => Some(NonZeroUsize::new(n).ok_or(ConfigError::ZeroWorkers)?),
            None => None,
        };

        Ok(AggregationSettings {
            targets,
            search,
            workers,
            epsilon: self.epsilon,
            strategy: self.strategy,
            statistic: self.statistic,
        })
    }
}

/// Resolved neighbor-search geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NeighborSearch {
    /// Search with the base geometry.
    Exact,
    /// Search with the base geometry buffered outward.
    Expanded {
        /// Dilation distance in CRS units. Always positive.
        buffer_distance: f64,
    },
}

/// Validated configuration consumed by the aggregation engine.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationSettings {
    /// Targets to aggregate, deduplicated.
    pub targets: Vec<AggregationTarget>,
    /// Neighbor-search geometry.
    pub search: NeighborSearch,
    /// Requested worker count, if any.
    pub workers: Option<NonZeroUsize>,
    /// Intersection-area threshold.
    pub epsilon: f64,
    /// Candidate-pair strategy.
    pub strategy: CandidateStrategy,
    /// Combination of neighbor values.
    pub statistic: Statistic,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            targets: AggregationTarget::all().to_vec(),
            search: NeighborSearch::Exact,
            workers: None,
            epsilon: DEFAULT_EPSILON,
            strategy: CandidateStrategy::default(),
            statistic: Statistic::default(),
        }
    }
}

impl AggregationSettings {
    /// Returns a copy pinned to `workers` workers.
    #[must_use]
    pub fn with_workers(&self, workers: NonZeroUsize) -> Self {
        Self {
            workers: Some(workers),
            ..self.clone()
        }
    }
}
