use axum::{
    body::Body,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use common::storage::types::ingested_record::IngestedRecord;
use futures::TryStreamExt;
use serde_json::json;
use tokio_util::io::StreamReader;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

pub async fn list_files(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let summaries = IngestedRecord::list_summaries(&state.db).await?;
    Ok(Json(summaries))
}

pub async fn get_file(
    State(state): State<ApiState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = IngestedRecord::find_by_filename(&state.db, &filename)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no record for {filename}")))?;

    Ok(Json(record))
}

/// Streams the request body through the same parser and committer the
/// watcher uses.
pub async fn upload_file(
    State(state): State<ApiState>,
    Path(filename): Path<String>,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    validate_filename(&filename)?;
    info!(%filename, "Received upload");

    let reader = StreamReader::new(body.into_data_stream().map_err(std::io::Error::other));
    let record = state.pipeline.ingest_reader(&filename, reader).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": record.id,
            "filename": record.filename,
            "uploaded_at": record.uploaded_at,
        })),
    ))
}

fn validate_filename(filename: &str) -> Result<(), ApiError> {
    let trimmed = filename.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains(['/', '\\'])
    {
        return Err(ApiError::ValidationError(format!(
            "invalid filename {filename:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_must_be_single_components() {
        assert!(validate_filename("a.json").is_ok());
        assert!(validate_filename("report 2024.json").is_ok());
        assert!(validate_filename("").is_err());
        assert!(validate_filename("..").is_err());
        assert!(validate_filename("../etc/passwd").is_err());
        assert!(validate_filename("dir\\a.json").is_err());
    }
}
