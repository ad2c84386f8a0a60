use api_state::ApiState;
use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use routes::{
    files::{get_file, list_files, upload_file},
    liveness::live,
    readiness::ready,
    search::search_records,
};

pub mod api_state;
pub mod error;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Probes (for k8s/systemd)
    let probes = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    let records = Router::new()
        .route("/files", get(list_files))
        .route("/files/{filename}", get(get_file).post(upload_file))
        .route("/search", post(search_records));

    probes.merge(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::Response,
    };
    use common::{
        storage::{db::SurrealDbClient, types::ingested_record::IngestedRecord},
        utils::config::AppConfig,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn test_state() -> ApiState {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("in-memory surrealdb"),
        );
        db.ensure_initialized().await.expect("schema");
        let config = AppConfig {
            read_chunk_bytes: 8,
            ..AppConfig::default()
        };
        ApiState::with_db(db, &config)
    }

    fn app(state: ApiState) -> Router {
        Router::new()
            .nest("/api/v1", api_routes_v1())
            .with_state(state)
    }

    async fn send(app: &Router, request: Request<Body>) -> Response {
        app.clone().oneshot(request).await.expect("router response")
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn post_raw(uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::from(body))
            .expect("request")
    }

    async fn seed(state: &ApiState, filename: &str, data: Value) {
        state
            .db
            .store_item(IngestedRecord::new(filename.to_string(), data))
            .await
            .expect("seed record");
    }

    #[tokio::test]
    async fn probes_report_ok() {
        let app = app(test_state().await);

        assert_eq!(send(&app, get("/api/v1/live")).await.status(), StatusCode::OK);

        let ready = send(&app, get("/api/v1/ready")).await;
        assert_eq!(ready.status(), StatusCode::OK);
        assert_eq!(body_json(ready).await["checks"]["db"], "ok");
    }

    #[tokio::test]
    async fn list_and_get_files() {
        let state = test_state().await;
        seed(&state, "a.json", json!({"name": "john"})).await;
        let app = app(state);

        let listed = send(&app, get("/api/v1/files")).await;
        assert_eq!(listed.status(), StatusCode::OK);
        let listed = body_json(listed).await;
        assert_eq!(listed.as_array().map(Vec::len), Some(1));
        assert_eq!(listed[0]["filename"], "a.json");
        assert!(listed[0].get("data").is_none());

        let found = send(&app, get("/api/v1/files/a.json")).await;
        assert_eq!(found.status(), StatusCode::OK);
        assert_eq!(body_json(found).await["data"], json!({"name": "john"}));

        let missing = send(&app, get("/api/v1/files/nope.json")).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn search_requires_field_and_value() {
        let state = test_state().await;
        seed(&state, "a.json", json!({"address": {"city": "Oslo"}})).await;
        seed(&state, "b.json", json!({"address": {"city": "Bergen"}})).await;
        let app = app(state);

        let found = send(
            &app,
            post_json("/api/v1/search", &json!({"field": "address.city", "value": "Oslo"})),
        )
        .await;
        assert_eq!(found.status(), StatusCode::OK);
        let found = body_json(found).await;
        assert_eq!(found.as_array().map(Vec::len), Some(1));
        assert_eq!(found[0]["filename"], "a.json");

        for incomplete in [json!({"field": "name"}), json!({"value": 1}), json!({})] {
            let response = send(&app, post_json("/api/v1/search", &incomplete)).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }

        let missing_value =
            send(&app, post_json("/api/v1/search", &json!({"field": "name"}))).await;
        assert_eq!(
            body_json(missing_value).await["error"],
            "Both field and value are required"
        );

        let bad_path = send(
            &app,
            post_json("/api/v1/search", &json!({"field": "a..b", "value": 1})),
        )
        .await;
        assert_eq!(bad_path.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn search_accepts_null_value() {
        let state = test_state().await;
        seed(&state, "a.json", json!({"deleted": null})).await;
        seed(&state, "b.json", json!({"deleted": 1})).await;
        let app = app(state);

        let found = send(
            &app,
            post_json("/api/v1/search", &json!({"field": "deleted", "value": null})),
        )
        .await;
        assert_eq!(found.status(), StatusCode::OK);
        let filenames: Vec<Value> = body_json(found)
            .await
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|record| record["filename"].clone())
            .collect();
        assert!(filenames.contains(&json!("a.json")));
        assert!(!filenames.contains(&json!("b.json")));
    }

    #[tokio::test]
    async fn upload_streams_through_pipeline() {
        let state = test_state().await;
        let db = Arc::clone(&state.db);
        let app = app(state);

        let created = send(
            &app,
            post_raw(
                "/api/v1/files/upload.json",
                r#"{"name": "jane", "tags": ["x", "y"], "n": 1.5}"#,
            ),
        )
        .await;
        assert_eq!(created.status(), StatusCode::CREATED);
        assert_eq!(body_json(created).await["filename"], "upload.json");

        let stored = IngestedRecord::find_by_filename(&db, "upload.json")
            .await
            .expect("query")
            .expect("record stored");
        assert_eq!(stored.data, json!({"name": "jane", "tags": ["x", "y"], "n": 1.5}));
    }

    #[tokio::test]
    async fn malformed_upload_is_rejected_without_commit() {
        let state = test_state().await;
        let db = Arc::clone(&state.db);
        let app = app(state);

        let rejected = send(&app, post_raw("/api/v1/files/c.json", r#"{"name": "jo"#)).await;
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(rejected).await["status"], "error");

        let stored = IngestedRecord::find_by_filename(&db, "c.json")
            .await
            .expect("query");
        assert!(stored.is_none());
    }
}
