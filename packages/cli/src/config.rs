//! Builds the aggregation config from an optional TOML file plus flags.

use std::fs;

use dengue_map_region_models::AggregationConfig;

use crate::ConfigArgs;

/// Reads `--config` (or starts from defaults) and applies every flag that
/// was given on top.
///
/// # Errors
///
/// Returns an error if the config file cannot be read or parsed.
pub fn build(args: &ConfigArgs) -> Result<AggregationConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => {
            log::info!("Reading aggregation config from {}", path.display());
            AggregationConfig::from_toml_str(&fs::read_to_string(path)?)?
        }
        None => AggregationConfig::default(),
    };

    apply_overrides(&mut config, args);
    Ok(config)
}

fn apply_overrides(config: &mut AggregationConfig, args: &ConfigArgs) {
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(buffer) = args.buffer {
        config.buffer_distance = buffer;
    }
    if let Some(workers) = args.workers {
        config.workers = Some(workers);
    }
    if let Some(epsilon) = args.epsilon {
        config.epsilon = epsilon;
    }
    if !args.targets.is_empty() {
        config.targets.clone_from(&args.targets);
    }
    if let Some(strategy) = args.strategy {
        config.strategy = strategy;
    }
    if let Some(statistic) = args.statistic {
        config.statistic = statistic;
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use dengue_map_region_models::{CandidateStrategy, SearchMode, Statistic};

    use super::*;

    #[test]
    fn defaults_without_file_or_flags() {
        let config = build(&ConfigArgs::default()).unwrap();
        assert_eq!(config, AggregationConfig::default());
    }

    #[test]
    fn flags_override_file_values() {
        let path = std::env::temp_dir().join(format!("dengue_map_cli_{}.toml", std::process::id()));
        fs::write(
            &path,
            "mode = \"expanded\"\nbuffer_distance = 250.0\nworkers = 2\ntargets = [\"actual\"]\n",
        )
        .unwrap();

        let args = ConfigArgs {
            config: Some(path.clone()),
            buffer: Some(100.0),
            strategy: Some(CandidateStrategy::AllPairs),
            statistic: Some(Statistic::Simple),
            ..ConfigArgs::default()
        };
        let config = build(&args).unwrap();
        fs::remove_file(path).unwrap();

        assert_eq!(config.mode, SearchMode::Expanded);
        assert!((config.buffer_distance - 100.0).abs() < f64::EPSILON);
        assert_eq!(config.workers, Some(2));
        assert_eq!(config.targets, vec!["actual".to_string()]);
        assert_eq!(config.strategy, CandidateStrategy::AllPairs);
        assert_eq!(config.statistic, Statistic::Simple);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let args = ConfigArgs {
            config: Some(PathBuf::from("/nonexistent/dengue_map.toml")),
            ..ConfigArgs::default()
        };
        assert!(build(&args).is_err());
    }

    #[test]
    fn zero_workers_flag_is_rejected_on_validate() {
        let args = ConfigArgs {
            workers: Some(0),
            ..ConfigArgs::default()
        };
        let config = build(&args).unwrap();
        assert!(config.validate().is_err());
    }
}
