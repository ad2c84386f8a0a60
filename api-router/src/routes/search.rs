use axum::{extract::State, response::IntoResponse, Json};
use common::storage::types::ingested_record::IngestedRecord;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub field: Option<String>,
    /// `None` only when the key is absent; an explicit `null` is a value.
    #[serde(default, deserialize_with = "present")]
    pub value: Option<Value>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Records whose `data.<field>` equals `value`. Both are required.
pub async fn search_records(
    State(state): State<ApiState>,
    Json(params): Json<SearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (Some(field), Some(value)) = (params.field, params.value) else {
        return Err(ApiError::ValidationError(
            "Both field and value are required".to_string(),
        ));
    };
    if field.trim().is_empty() {
        return Err(ApiError::ValidationError(
            "Both field and value are required".to_string(),
        ));
    }

    let records = IngestedRecord::search_by_field(&state.db, &field, value).await?;
    debug!(%field, matches = records.len(), "search finished");

    Ok(Json(records))
}
