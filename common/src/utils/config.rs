use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use json_stream_parser::MultipleValues;
use serde::Deserialize;

/// How a file holding several top-level JSON values is treated.
#[derive(Clone, Copy, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MultipleValuesPolicy {
    #[default]
    Reject,
    First,
}

impl From<MultipleValuesPolicy> for MultipleValues {
    fn from(policy: MultipleValuesPolicy) -> Self {
        match policy {
            MultipleValuesPolicy::Reject => MultipleValues::Reject,
            MultipleValuesPolicy::First => MultipleValues::KeepFirst,
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_watch_dir")]
    pub watch_dir: String,
    #[serde(default = "default_export_dir")]
    pub export_dir: String,
    #[serde(default = "default_ingest_extension")]
    pub ingest_extension: String,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_read_chunk_bytes")]
    pub read_chunk_bytes: usize,
    #[serde(default)]
    pub multiple_values: MultipleValuesPolicy,
}

impl AppConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn cooldown_window(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            surrealdb_address: "mem://".to_string(),
            surrealdb_username: "root".to_string(),
            surrealdb_password: "root".to_string(),
            surrealdb_namespace: "file_uploader".to_string(),
            surrealdb_database: "json_files".to_string(),
            http_port: default_http_port(),
            watch_dir: default_watch_dir(),
            export_dir: default_export_dir(),
            ingest_extension: default_ingest_extension(),
            debounce_ms: default_debounce_ms(),
            cooldown_secs: default_cooldown_secs(),
            read_chunk_bytes: default_read_chunk_bytes(),
            multiple_values: MultipleValuesPolicy::default(),
        }
    }
}

fn default_http_port() -> u16 {
    3000
}

fn default_watch_dir() -> String {
    "./uploads".to_string()
}

fn default_export_dir() -> String {
    "./outputs".to_string()
}

fn default_ingest_extension() -> String {
    "json".to_string()
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_cooldown_secs() -> u64 {
    10
}

fn default_read_chunk_bytes() -> usize {
    8 * 1024
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
