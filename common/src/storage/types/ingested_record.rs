use serde_json::Value;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(IngestedRecord, "ingested_record", {
    filename: String,
    data: Value,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    uploaded_at: DateTime<Utc>
});

/// Listing row: everything but the payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordSummary {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    pub filename: String,
    #[serde(
        serialize_with = "serialize_datetime",
        deserialize_with = "deserialize_datetime"
    )]
    pub uploaded_at: DateTime<Utc>,
}

impl IngestedRecord {
    /// Builds a record stamped with the current time.
    pub fn new(filename: String, data: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            filename,
            data,
            uploaded_at: Utc::now(),
        }
    }

    pub async fn list_summaries(db: &SurrealDbClient) -> Result<Vec<RecordSummary>, AppError> {
        let summaries: Vec<RecordSummary> = db
            .query(
                "SELECT id, filename, uploaded_at FROM type::table($table)
                 ORDER BY uploaded_at DESC",
            )
            .bind(("table", Self::table_name()))
            .await?
            .take(0)?;

        Ok(summaries)
    }

    /// Most recent record stored under `filename`.
    pub async fn find_by_filename(
        db: &SurrealDbClient,
        filename: &str,
    ) -> Result<Option<IngestedRecord>, AppError> {
        let mut records: Vec<IngestedRecord> = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE filename = $filename
                 ORDER BY uploaded_at DESC
                 LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("filename", filename.to_string()))
            .await?
            .take(0)?;

        Ok(records.pop())
    }

    /// Records whose `data.<field_path>` equals `value`.
    ///
    /// `field_path` is a dot separated path into the stored document, for
    /// example `address.city`.
    pub async fn search_by_field(
        db: &SurrealDbClient,
        field_path: &str,
        value: Value,
    ) -> Result<Vec<IngestedRecord>, AppError> {
        let idiom = data_idiom(field_path)?;
        let records: Vec<IngestedRecord> = db
            .query(format!(
                "SELECT * FROM type::table($table)
                 WHERE {idiom} = $value
                 ORDER BY uploaded_at DESC"
            ))
            .bind(("table", Self::table_name()))
            .bind(("value", value))
            .await?
            .take(0)?;

        Ok(records)
    }
}

/// Turns `address.city` into a SurrealQL idiom rooted at `data`. Plain
/// identifier segments are used as-is, anything else is backtick-quoted.
fn data_idiom(field_path: &str) -> Result<String, AppError> {
    let mut idiom = String::from("data");
    for segment in field_path.split('.') {
        if segment.is_empty() || segment.contains('`') {
            return Err(AppError::Validation(format!(
                "invalid field path {field_path:?}"
            )));
        }
        let plain = segment
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        idiom.push('.');
        if plain {
            idiom.push_str(segment);
        } else {
            idiom.push('`');
            idiom.push_str(segment);
            idiom.push('`');
        }
    }
    Ok(idiom)
}
