use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use common::{error::AppError, storage::types::ingested_record::IngestedRecord};

use crate::pipeline::{IngestionConfig, IngestionPipeline, RecordStore};

/// In-memory store that records every insert and can be told to stall or fail.
#[derive(Default)]
pub struct MockStore {
    records: Mutex<Vec<IngestedRecord>>,
    attempts: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    delay: Duration,
    fail: bool,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<IngestedRecord> {
        self.records.lock().expect("records lock").clone()
    }

    pub fn records_for(&self, filename: &str) -> Vec<IngestedRecord> {
        self.records()
            .into_iter()
            .filter(|record| record.filename == filename)
            .collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Highest number of inserts that were running at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for MockStore {
    async fn insert(&self, record: IngestedRecord) -> Result<IngestedRecord, AppError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            return Err(AppError::InternalError("store unavailable".to_string()));
        }
        self.records.lock().expect("records lock").push(record.clone());
        Ok(record)
    }
}

pub fn pipeline_with(store: Arc<MockStore>, config: IngestionConfig) -> Arc<IngestionPipeline> {
    Arc::new(IngestionPipeline::with_store(config, store))
}
