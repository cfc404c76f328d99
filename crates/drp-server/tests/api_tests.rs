//! HTTP integration tests
//!
//! Drives the full router: multipart upload, background ingestion through the
//! job scheduler, status polling, export and deletion.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use sqlx::PgPool;
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;
use tower::ServiceExt;
use tracing_subscriber::{fmt, EnvFilter};

use drp_server::{
    config::Config,
    features::FeatureState,
    ingest::{BroadcastNotifier, ExportCompleted},
    storage::{self, StorageConfig},
};

const BOUNDARY: &str = "drp-test-boundary";

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,drp_server=debug")),
        )
        .with_test_writer()
        .try_init();
}

struct TestApp {
    router: Router,
    notifier: BroadcastNotifier,
    files: TempDir,
}

fn create_test_app(pool: PgPool) -> TestApp {
    let files = TempDir::new().unwrap();

    let mut config = Config::default();
    config.storage = StorageConfig::local(files.path(), "http://localhost:8000/files");
    config.ingest.batch_size = 2;
    config.ingest.backoff_secs = vec![0];

    let store = storage::build_store(&config.storage);
    let notifier = BroadcastNotifier::new(16);
    let (scheduler, _workers) =
        drp_server::start_workers(pool.clone(), store.clone(), &config.ingest, Arc::new(notifier.clone()));

    let state = FeatureState {
        db: pool,
        store,
        scheduler: Some(scheduler),
    };

    TestApp {
        router: drp_server::app(state, &config),
        notifier,
        files,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

async fn get_request(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

async fn upload_file(app: &Router, data_type: &str, filename: &str, content: &str, country: &str) -> (StatusCode, Value) {
    let body = format!(
        "--{b}\r\n\
         Content-Disposition: form-data; name=\"country\"\r\n\r\n\
         {country}\r\n\
         --{b}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
         Content-Type: text/csv\r\n\r\n\
         {content}\r\n\
         --{b}--\r\n",
        b = BOUNDARY,
    );
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/uploads/{}", data_type))
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", BOUNDARY))
        .body(Body::from(body))
        .unwrap();
    send(app, request).await
}

/// Poll an upload until it leaves `pending`/`processing`
async fn wait_for_upload(app: &Router, data_type: &str, id: i64) -> Value {
    for _ in 0..200 {
        let (status, body) = get_request(app, &format!("/api/v1/uploads/{}/{}", data_type, id)).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] == "completed" || body["status"] == "failed" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("upload {} did not finish", id);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_health(pool: PgPool) {
    init_tracing();
    let app = create_test_app(pool);

    let (status, body) = get_request(&app.router, "/api/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["storage"], "local");
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_upload_is_ingested_in_background(pool: PgPool) {
    init_tracing();
    let app = create_test_app(pool.clone());

    let csv = "phone,name\n13800000001,Alice\n13800000002,Bob\n13800000001,Alice again\n";
    let (status, body) = upload_file(&app.router, "raw", "leads.csv", csv, "China").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = body["upload_record_id"].as_i64().unwrap();
    assert!(body["filename"].as_str().unwrap().ends_with("_leads.csv"));

    let upload = wait_for_upload(&app.router, "raw", id).await;
    assert_eq!(upload["status"], "completed");
    assert_eq!(upload["total_count"], 3);
    assert_eq!(upload["success_count"], 2);
    assert_eq!(upload["duplicate_count"], 1);
    assert_eq!(upload["country"], "China");
    assert_eq!(upload["original_filename"], "leads.csv");

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM raw_data_records")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 2);

    // The source file is removed right after the upload is marked completed
    let uploads_dir = app.files.path().join("raw_uploads");
    let mut remaining = usize::MAX;
    for _ in 0..200 {
        remaining = std::fs::read_dir(&uploads_dir).map(|d| d.count()).unwrap_or(0);
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(remaining, 0);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_header_only_upload_completes_empty(pool: PgPool) {
    init_tracing();
    let app = create_test_app(pool);

    let (status, body) = upload_file(&app.router, "used", "empty.csv", "phone,name\n", "China").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = body["upload_record_id"].as_i64().unwrap();

    let upload = wait_for_upload(&app.router, "used", id).await;
    assert_eq!(upload["status"], "completed");
    assert_eq!(upload["total_count"], 0);
    assert_eq!(upload["success_count"], 0);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_upload_rejects_unsupported_file(pool: PgPool) {
    init_tracing();
    let app = create_test_app(pool);

    let (status, body) = upload_file(&app.router, "raw", "report.pdf", "not a table", "China").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("report.pdf"));

    let (status, _) = upload_file(&app.router, "archived", "leads.csv", "phone\n1\n", "China").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_export_after_upload(pool: PgPool) {
    init_tracing();
    let app = create_test_app(pool);
    let mut events = app.notifier.subscribe();

    let csv = "phone,name\n13800000001,Alice\n13800000002,Bob\n";
    let (_, body) = upload_file(&app.router, "refined", "leads.csv", csv, "China").await;
    let id = body["upload_record_id"].as_i64().unwrap();
    wait_for_upload(&app.router, "refined", id).await;

    let (status, body) = post_json(
        &app.router,
        "/api/v1/exports",
        json!({
            "data_type": "refined",
            "format": "csv",
            "filters": { "upload_record_id": id },
            "user_id": 7
        }),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "queued");

    let event: ExportCompleted = tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.record_count, 2);
    assert_eq!(event.owner_id, Some(7));
    assert!(event.download_url.ends_with(&event.filename));

    let exported = std::fs::read_to_string(app.files.path().join("exports").join(&event.filename)).unwrap();
    assert_eq!(exported, "phone,name\n13800000001,Alice\n13800000002,Bob\n");

    let (status, body) = get_request(&app.router, "/api/v1/exports?user_id=7").await;
    assert_eq!(status, StatusCode::OK);
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["status"], "completed");
    assert_eq!(items[0]["record_count"], 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_export_rejects_inverted_dates(pool: PgPool) {
    init_tracing();
    let app = create_test_app(pool);

    let (status, _) = post_json(
        &app.router,
        "/api/v1/exports",
        json!({
            "data_type": "raw",
            "filters": { "date_from": "2024-02-01", "date_to": "2024-01-01" }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_delete_upload_removes_records(pool: PgPool) {
    init_tracing();
    let app = create_test_app(pool.clone());

    let (_, body) = upload_file(&app.router, "raw", "leads.csv", "phone\n13800000009\n", "China").await;
    let id = body["upload_record_id"].as_i64().unwrap();
    wait_for_upload(&app.router, "raw", id).await;

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/v1/uploads/raw/{}", id))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = get_request(&app.router, &format!("/api/v1/uploads/raw/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["status"], 404);

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM raw_data_records")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}
