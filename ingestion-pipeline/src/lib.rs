#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod pipeline;
pub mod watcher;

#[cfg(test)]
mod test_support;

use common::{error::AppError, storage::db::SurrealDbClient, utils::config::AppConfig};
pub use pipeline::{CycleError, IngestionConfig, IngestionPipeline, IngestionTuning};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
pub use watcher::IngestionWatcher;

/// Builds the pipeline from application config and watches the drop folder
/// until `shutdown` fires. Filesystem failures end the loop with an error.
pub async fn run_ingestion_watcher(
    db: Arc<SurrealDbClient>,
    config: &AppConfig,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let pipeline = Arc::new(IngestionPipeline::new(
        db,
        IngestionConfig::from_app_config(config),
    ));

    IngestionWatcher::new(pipeline).run(shutdown).await
}
