//! HTTP API tests driven through the router without a socket.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use sluice::config::{FeedConfig, IngestSettings};
use sluice::job::{JobController, JobControllerRef, JobState};
use sluice::pipeline::Pipeline;
use sluice::record::DI319_COLUMNS;
use sluice::server::{AppState, build_router};
use sluice::sink::MemorySink;

const BOUNDARY: &str = "sluice-test-boundary";

struct TestApp {
    router: Router,
    controller: JobControllerRef,
    sink: Arc<MemorySink>,
}

impl TestApp {
    fn new(max_upload_bytes: usize) -> Self {
        let controller = JobController::new();
        let sink = Arc::new(MemorySink::new());
        let settings = IngestSettings {
            workers: 2,
            queue_capacity: 8,
            batch_size: 3,
            ..IngestSettings::default()
        };
        let pipeline = Pipeline::new("di319", FeedConfig::default(), settings, sink.clone());
        let mut pipelines = IndexMap::new();
        pipelines.insert("di319".to_string(), Arc::new(pipeline));

        let state = AppState::new(Arc::clone(&controller), pipelines, max_upload_bytes);
        Self {
            router: build_router(state),
            controller,
            sink,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn upload(&self, feed: &str, part: Part<'_>) -> (StatusCode, Value) {
        let request = Request::post(format!("/api/feeds/{feed}/import"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(part.encode()))
            .unwrap();
        self.send(request).await
    }

    async fn wait_until_finished(&self) {
        for _ in 0..500 {
            if self.controller.state().is_terminal() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("import did not finish");
    }
}

struct Part<'a> {
    name: &'a str,
    file_name: &'a str,
    content_type: &'a str,
    data: String,
}

impl<'a> Part<'a> {
    fn csv(data: String) -> Self {
        Self {
            name: "file",
            file_name: "extract.csv",
            content_type: "text/csv",
            data,
        }
    }

    fn encode(&self) -> String {
        format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
             Content-Type: {}\r\n\r\n\
             {}\r\n\
             --{BOUNDARY}--\r\n",
            self.name, self.file_name, self.content_type, self.data
        )
    }
}

/// Extract with `qualifying` rows dropping 90% and `skipped` rows dropping 10%.
fn extract(qualifying: usize, skipped: usize) -> String {
    let mut text = DI319_COLUMNS.join(";");
    text.push('\n');
    for i in 0..qualifying + skipped {
        let balance = if i < qualifying { "100" } else { "900" };
        text.push_str(&format!(
            "2025-01-31;KANWIL;001;CIF{i};{i};TAB;Nasabah;PN;{balance};0;1000;2020-05-01\n"
        ));
    }
    text
}

#[tokio::test]
async fn test_import_then_progress_and_summary() {
    let app = TestApp::new(1024 * 1024);

    let (status, body) = app.upload("di319", Part::csv(extract(4, 6))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    app.wait_until_finished().await;

    let (status, body) = app.get("/api/feeds/di319/import/progress").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "completed");
    assert_eq!(body["job"]["id"], job_id.as_str());
    assert_eq!(body["progress"]["is_completed"], true);
    assert_eq!(body["progress"]["processed_rows"], 10);
    assert_eq!(body["progress"]["imported_rows"], 4);

    let (status, body) = app.get("/api/feeds/di319/import/summary").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job_id"], job_id.as_str());
    assert_eq!(body["total_rows"], 10);
    assert_eq!(body["imported_rows"], 4);
    assert_eq!(body["skipped_rows"], 6);
    assert_eq!(app.sink.records().len(), 4);
}

#[tokio::test]
async fn test_idle_progress_and_missing_summary() {
    let app = TestApp::new(1024);

    let (status, body) = app.get("/api/feeds/di319/import/progress").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "idle");
    assert_eq!(body["progress"]["processed_rows"], 0);

    let (status, body) = app.get("/api/feeds/di319/import/summary").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_unknown_feed() {
    let app = TestApp::new(1024);
    let (status, _) = app.upload("di999", Part::csv(extract(1, 0))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.get("/api/feeds/di999/import/progress").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_rejected_while_busy() {
    let app = TestApp::new(1024 * 1024);
    let _running = app.controller.begin("di319", "other.csv").unwrap();

    let (status, body) = app.upload("di319", Part::csv(extract(1, 0))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("uploading"));
    assert_eq!(app.controller.state(), JobState::Uploading);
}

#[tokio::test]
async fn test_non_csv_upload_rejected() {
    let app = TestApp::new(1024 * 1024);
    let part = Part {
        file_name: "extract.xlsx",
        ..Part::csv(extract(1, 0))
    };
    let (status, _) = app.upload("di319", part).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(app.controller.state(), JobState::Idle);

    let part = Part {
        content_type: "image/png",
        ..Part::csv(extract(1, 0))
    };
    let (status, _) = app.upload("di319", part).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_oversized_upload_rejected() {
    let app = TestApp::new(256);
    let (status, _) = app.upload("di319", Part::csv(extract(50, 50))).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(app.controller.state(), JobState::Failed);
    assert!(!app.controller.is_busy());
    assert!(app.sink.records().is_empty());
}

#[tokio::test]
async fn test_missing_file_field() {
    let app = TestApp::new(1024);
    let part = Part {
        name: "attachment",
        ..Part::csv(extract(1, 0))
    };
    let (status, _) = app.upload("di319", part).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.controller.state(), JobState::Idle);
}

#[tokio::test]
async fn test_delete_records() {
    let app = TestApp::new(1024 * 1024);
    let (status, _) = app.upload("di319", Part::csv(extract(5, 1))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    app.wait_until_finished().await;

    let delete = || {
        Request::delete("/api/feeds/di319/records")
            .body(Body::empty())
            .unwrap()
    };

    let (status, body) = app.send(delete()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 5);
    assert!(app.sink.records().is_empty());

    let _running = app.controller.begin("di319", "next.csv").unwrap();
    let (status, _) = app.send(delete()).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new(1024);
    let response = app
        .router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
