use std::sync::Arc;

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::ingested_record::IngestedRecord},
};

/// Write side of the document store, as seen by the committer.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert(&self, record: IngestedRecord) -> Result<IngestedRecord, AppError>;
}

pub struct SurrealRecordStore {
    db: Arc<SurrealDbClient>,
}

impl SurrealRecordStore {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RecordStore for SurrealRecordStore {
    async fn insert(&self, record: IngestedRecord) -> Result<IngestedRecord, AppError> {
        let id = record.id.clone();
        self.db
            .store_item(record)
            .await?
            .ok_or_else(|| AppError::InternalError(format!("store returned no record for {id}")))
    }
}
