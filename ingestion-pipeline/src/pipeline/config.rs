use std::{path::PathBuf, time::Duration};

use common::utils::config::{AppConfig, MultipleValuesPolicy};

#[derive(Debug, Clone)]
pub struct IngestionTuning {
    pub debounce_window: Duration,
    pub cooldown_window: Duration,
    pub read_chunk_bytes: usize,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(500),
            cooldown_window: Duration::from_secs(10),
            read_chunk_bytes: 8 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub tuning: IngestionTuning,
    pub watch_dir: PathBuf,
    pub extension: String,
    pub multiple_values: MultipleValuesPolicy,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            tuning: IngestionTuning::default(),
            watch_dir: PathBuf::from("./uploads"),
            extension: "json".to_string(),
            multiple_values: MultipleValuesPolicy::default(),
        }
    }
}

impl IngestionConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            tuning: IngestionTuning {
                debounce_window: config.debounce_window(),
                cooldown_window: config.cooldown_window(),
                // A zero chunk would never make progress.
                read_chunk_bytes: config.read_chunk_bytes.max(1),
            },
            watch_dir: PathBuf::from(&config.watch_dir),
            extension: config.ingest_extension.clone(),
            multiple_values: config.multiple_values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_config_tunables_carry_over() {
        let app = AppConfig {
            debounce_ms: 50,
            cooldown_secs: 3,
            read_chunk_bytes: 0,
            watch_dir: "/srv/drop".to_string(),
            multiple_values: MultipleValuesPolicy::First,
            ..AppConfig::default()
        };

        let config = IngestionConfig::from_app_config(&app);
        assert_eq!(config.tuning.debounce_window, Duration::from_millis(50));
        assert_eq!(config.tuning.cooldown_window, Duration::from_secs(3));
        assert_eq!(config.tuning.read_chunk_bytes, 1);
        assert_eq!(config.watch_dir, PathBuf::from("/srv/drop"));
        assert_eq!(config.extension, "json");
        assert_eq!(config.multiple_values, MultipleValuesPolicy::First);
    }
}
