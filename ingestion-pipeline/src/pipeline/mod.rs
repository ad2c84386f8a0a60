mod config;
mod services;

pub use config::{IngestionConfig, IngestionTuning};
#[allow(clippy::module_name_repetitions)]
pub use services::{RecordStore, SurrealRecordStore};

use std::{
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::ingested_record::IngestedRecord},
};
use json_stream_parser::{FeedStatus, JsonStreamParser};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

use crate::watcher::{debounce::SettledFile, guard::DedupGuard};

/// Why a parse+commit cycle stopped. The stage decides how long the
/// filename stays blocked afterwards.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("parse failed: {0}")]
    Parse(#[source] AppError),
    #[error("commit failed: {0}")]
    Commit(#[source] AppError),
}

impl CycleError {
    /// Commit failures hold the filename for the cooldown; parse failures
    /// free it at once.
    pub const fn needs_cooldown(&self) -> bool {
        matches!(self, Self::Commit(_))
    }

    pub fn into_inner(self) -> AppError {
        match self {
            Self::Parse(err) | Self::Commit(err) => err,
        }
    }
}

#[allow(clippy::module_name_repetitions)]
pub struct IngestionPipeline {
    pipeline_config: IngestionConfig,
    store: Arc<dyn RecordStore>,
}

impl IngestionPipeline {
    pub fn new(db: Arc<SurrealDbClient>, pipeline_config: IngestionConfig) -> Self {
        Self::with_store(pipeline_config, Arc::new(SurrealRecordStore::new(db)))
    }

    pub fn with_store(pipeline_config: IngestionConfig, store: Arc<dyn RecordStore>) -> Self {
        Self {
            pipeline_config,
            store,
        }
    }

    pub fn config(&self) -> &IngestionConfig {
        &self.pipeline_config
    }

    fn duration_millis(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    /// Reads `reader` in fixed size chunks and builds the top-level value as
    /// the bytes arrive. Only one chunk is buffered at a time.
    pub async fn parse_reader<R>(&self, mut reader: R) -> Result<Value, AppError>
    where
        R: AsyncRead + Unpin,
    {
        let mut parser =
            JsonStreamParser::with_policy(self.pipeline_config.multiple_values.into());
        let mut chunk = vec![0_u8; self.pipeline_config.tuning.read_chunk_bytes.max(1)];

        loop {
            let read = reader.read(&mut chunk).await?;
            if read == 0 {
                break;
            }
            if parser.feed(&chunk[..read])? == FeedStatus::Complete {
                break;
            }
        }

        debug!(bytes = parser.bytes_consumed(), "stream parsed");
        Ok(parser.finish()?)
    }

    async fn parse_file(&self, path: &Path) -> Result<Value, AppError> {
        let file = tokio::fs::File::open(path).await?;
        self.parse_reader(file).await
    }

    /// Exactly one insert; failures are returned, never retried.
    pub async fn commit(&self, filename: &str, data: Value) -> Result<IngestedRecord, AppError> {
        let record = IngestedRecord::new(filename.to_string(), data);
        self.store.insert(record).await
    }

    /// Parse and commit an upload that did not come through the watched
    /// directory.
    #[tracing::instrument(skip_all, fields(filename = %filename))]
    pub async fn ingest_reader<R>(
        &self,
        filename: &str,
        reader: R,
    ) -> Result<IngestedRecord, CycleError>
    where
        R: AsyncRead + Unpin,
    {
        let data = self.parse_reader(reader).await.map_err(CycleError::Parse)?;
        let record = self
            .commit(filename, data)
            .await
            .map_err(CycleError::Commit)?;

        info!(%filename, record_id = %record.id, "upload committed");
        Ok(record)
    }

    /// Runs one cycle for an admitted file. The caller owns the guard entry
    /// and releases it based on the outcome.
    #[tracing::instrument(skip_all, fields(filename = %file.filename))]
    pub async fn process_file(
        &self,
        file: &SettledFile,
        guard: &DedupGuard,
    ) -> Result<IngestedRecord, CycleError> {
        let cycle_started = Instant::now();

        let data = self
            .parse_file(&file.path)
            .await
            .map_err(CycleError::Parse)?;
        let parse_duration = cycle_started.elapsed();

        guard
            .mark_committing(&file.filename)
            .map_err(CycleError::Commit)?;

        let commit_started = Instant::now();
        let record = self
            .commit(&file.filename, data)
            .await
            .map_err(CycleError::Commit)?;

        debug!(
            filename = %file.filename,
            record_id = %record.id,
            parse_ms = Self::duration_millis(parse_duration),
            commit_ms = Self::duration_millis(commit_started.elapsed()),
            total_ms = Self::duration_millis(cycle_started.elapsed()),
            "ingestion cycle finished"
        );

        Ok(record)
    }
}

#[cfg(test)]
mod tests;
