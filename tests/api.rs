use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::extract::State;
use axum::http::{Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use tower::ServiceExt;

use npi_profiler::client::{ClientConfig, EnrichmentClient};
use npi_profiler::server::{AppState, router};

#[derive(Clone)]
enum Reply {
    Json(Value),
    Status(u16),
    Slow(Duration, Value),
}

#[derive(Clone)]
struct Fake {
    reply: Arc<Mutex<Reply>>,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl Fake {
    fn set(&self, reply: Reply) {
        *self.reply.lock().unwrap() = reply;
    }
}

async fn fake_profiles(State(f): State<Fake>, Json(body): Json<Value>) -> Response {
    f.requests.lock().unwrap().push(body);
    let reply = f.reply.lock().unwrap().clone();
    match reply {
        Reply::Json(v) => Json(v).into_response(),
        Reply::Status(code) => (StatusCode::from_u16(code).unwrap(), "backend exploded").into_response(),
        Reply::Slow(delay, v) => {
            tokio::time::sleep(delay).await;
            Json(v).into_response()
        }
    }
}

async fn fake_email(Json(body): Json<Value>) -> Response {
    if body["to"][0] == "bounce@example.org" {
        return (StatusCode::UNPROCESSABLE_ENTITY, "bad recipient").into_response();
    }
    Json(json!({ "status": "sent" })).into_response()
}

async fn spawn_backend(reply: Reply) -> (String, Fake) {
    let fake = Fake {
        reply: Arc::new(Mutex::new(reply)),
        requests: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/profile/agents", post(fake_profiles))
        .route("/email/dispatch", post(fake_email))
        .with_state(fake.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), fake)
}

fn app_for(backend_url: &str, timeout: Duration) -> Router {
    let client = EnrichmentClient::new(ClientConfig {
        backend_url: backend_url.to_string(),
        timeout,
        max_retries: 2,
        initial_backoff: Duration::from_millis(10),
    })
    .unwrap();
    router(AppState::new(client))
}

const BOUNDARY: &str = "npi-profiler-test-boundary";

fn upload(content: &str) -> Request<Body> {
    let body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"list.csv\"\r\nContent-Type: text/csv\r\n\r\n{content}\r\n--{BOUNDARY}--\r\n"
    );
    Request::post("/api/ingest")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::post(uri).body(Body::empty()).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn send_json(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, req).await;
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn upload_process_view_and_export() {
    let (url, fake) = spawn_backend(Reply::Json(json!([
        { "npi": "1234567890", "fullName": "Dr. Ada Chen", "specialty": "Oncology", "publications": 12 },
        { "npi": "9876543210", "specialty": "Cardiology", "publications": "3" },
    ])))
    .await;
    let app = app_for(&url, Duration::from_secs(5));

    let (status, npis) = send_json(&app, upload("NPI,Name\n1234567890,A\nabc,B\n9876543210,C\n1234567890,D\n")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(npis, json!(["1234567890", "9876543210"]));

    let (status, body) = send_json(&app, post_empty("/api/process")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["profiles"].as_array().unwrap().len(), 2);
    assert_eq!(body["profiles"][1]["fullName"], "NPI 9876543210");
    assert_eq!(body["profiles"][1]["id"], json!(9876543210u64));
    assert_eq!(
        fake.requests.lock().unwrap()[0],
        json!({ "npi_list": ["1234567890", "9876543210"] })
    );

    let (_, state) = send_json(&app, get("/api/state")).await;
    assert_eq!(state["status"], "completed");
    assert_eq!(state["profiles"], 2);

    let (_, view) = send_json(&app, get("/api/profiles?q=CARDIO")).await;
    assert_eq!(view["total"], 2);
    assert_eq!(view["shown"], 1);

    send_json(&app, post_json("/api/view/sort", json!({ "key": "publications" }))).await;
    let (_, view) = send_json(&app, get("/api/profiles")).await;
    assert_eq!(view["profiles"][0]["npi"], "9876543210");
    let (_, snap) = send_json(&app, post_json("/api/view/sort", json!({ "key": "publications" }))).await;
    assert_eq!(snap["view"]["sort"]["direction"], "desc");
    let (_, view) = send_json(&app, get("/api/profiles")).await;
    assert_eq!(view["profiles"][0]["npi"], "1234567890");

    let resp = app.clone().oneshot(get("/api/export")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let disposition = resp.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
    assert!(disposition.contains("hcp_profiles_"));
    let csv = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let csv = String::from_utf8(csv.to_vec()).unwrap();
    assert_eq!(csv.lines().count(), 3);
    assert!(csv.lines().next().unwrap().starts_with("\"Full Name\""));
}

#[tokio::test]
async fn wrapped_and_partial_responses_are_displayed_as_is() {
    let (url, _) = spawn_backend(Reply::Json(json!({ "profiles": [{ "fullName": "Only One" }] }))).await;
    let app = app_for(&url, Duration::from_secs(5));

    let (status, body) = send_json(
        &app,
        post_json("/api/process", json!({ "npi_list": ["1111111111", "2222222222"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let profiles = body["profiles"].as_array().unwrap();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0]["fullName"], "Only One");
    assert!(profiles[0]["id"].is_string());
    assert_eq!(profiles[0]["npi"], "");
}

#[tokio::test]
async fn empty_enrichment_is_zero_rows_not_an_error() {
    let (url, _) = spawn_backend(Reply::Json(json!([]))).await;
    let app = app_for(&url, Duration::from_secs(5));

    let ids: Vec<String> = (0..5).map(|i| format!("100000000{i}")).collect();
    let (status, body) = send_json(&app, post_json("/api/process", json!(ids))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["profiles"], json!([]));

    let (_, state) = send_json(&app, get("/api/state")).await;
    assert_eq!(state["status"], "completed");
    assert_eq!(state["last_error"], Value::Null);
}

#[tokio::test]
async fn backend_failure_keeps_previous_records_and_allows_retry() {
    let (url, fake) = spawn_backend(Reply::Json(json!([{ "npi": "1234567890" }]))).await;
    let app = app_for(&url, Duration::from_secs(5));

    let (status, _) = send_json(&app, post_json("/api/process", json!(["1234567890"]))).await;
    assert_eq!(status, StatusCode::OK);

    fake.set(Reply::Status(500));
    let (status, body) = send_json(&app, post_empty("/api/process")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("500"));
    // retried once before giving up
    assert_eq!(fake.requests.lock().unwrap().len(), 3);

    let (_, state) = send_json(&app, get("/api/state")).await;
    assert_eq!(state["status"], "idle");
    assert_eq!(state["profiles"], 1);
    assert!(state["last_error"].is_string());

    fake.set(Reply::Json(json!([{ "npi": "1234567890" }, { "npi": "1234567890" }])));
    let (status, body) = send_json(&app, post_empty("/api/process")).await;
    assert_eq!(status, StatusCode::OK);
    let profiles = body["profiles"].as_array().unwrap();
    assert_ne!(profiles[0]["id"], profiles[1]["id"]);
}

#[tokio::test]
async fn unreachable_backend_is_a_bad_gateway() {
    let app = app_for("http://127.0.0.1:9", Duration::from_secs(5));
    let (status, body) = send_json(&app, post_json("/api/process", json!(["1234567890"]))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn hung_backend_times_out() {
    let (url, _) = spawn_backend(Reply::Slow(Duration::from_secs(10), json!([]))).await;
    let app = app_for(&url, Duration::from_millis(300));

    let (status, _) = send_json(&app, post_json("/api/process", json!(["1234567890"]))).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);

    let (_, state) = send_json(&app, get("/api/state")).await;
    assert_eq!(state["status"], "idle");
}

#[tokio::test]
async fn cancel_ends_in_flight_cycle_and_blocks_overlap() {
    let (url, _) = spawn_backend(Reply::Slow(Duration::from_secs(10), json!([]))).await;
    let app = app_for(&url, Duration::from_secs(30));

    let in_flight = {
        let app = app.clone();
        tokio::spawn(async move { send_json(&app, post_json("/api/process", json!(["1234567890"]))).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    let (status, _) = send_json(&app, post_empty("/api/process")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = send(&app, upload("1111111111")).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = send_json(&app, post_empty("/api/cancel")).await;
    assert_eq!(body["cancelled"], true);

    let (status, body) = tokio::time::timeout(Duration::from_secs(5), in_flight)
        .await
        .expect("cancel unblocks the request")
        .unwrap();
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "processing cancelled");

    let (_, state) = send_json(&app, get("/api/state")).await;
    assert_eq!(state["status"], "idle");
}

#[tokio::test]
async fn abandoned_request_still_finishes_the_cycle() {
    let (url, fake) = spawn_backend(Reply::Slow(Duration::from_secs(30), json!([]))).await;
    let app = app_for(&url, Duration::from_millis(500));

    let gave_up = tokio::time::timeout(
        Duration::from_millis(100),
        send_json(&app, post_json("/api/process", json!(["1234567890"]))),
    )
    .await;
    assert!(gave_up.is_err());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let (_, state) = send_json(&app, get("/api/state")).await;
    assert_eq!(state["status"], "idle");
    assert!(state["last_error"].as_str().unwrap().contains("timed out"));

    fake.set(Reply::Json(json!([{ "npi": "1234567890" }])));
    let (status, _) = send_json(&app, post_empty("/api/process")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn rejected_empty_request_keeps_the_upload() {
    let (url, fake) = spawn_backend(Reply::Json(json!([]))).await;
    let app = app_for(&url, Duration::from_secs(5));

    let (status, _) = send_json(&app, upload("npi\n1234567890\n")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send_json(&app, post_json("/api/process", json!({ "npi_list": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "no identifiers to process");

    let (_, state) = send_json(&app, get("/api/state")).await;
    assert_eq!(state["identifiers"], 1);

    let (status, _) = send_json(&app, post_empty("/api/process")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        fake.requests.lock().unwrap()[0],
        json!({ "npi_list": ["1234567890"] })
    );
}

#[tokio::test]
async fn bad_requests_are_rejected() {
    let (url, _) = spawn_backend(Reply::Json(json!([]))).await;
    let app = app_for(&url, Duration::from_secs(5));

    let (status, _) = send_json(&app, post_empty("/api/process")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_json(&app, post_json("/api/process", json!(["12345"]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_json(&app, post_json("/api/view/sort", json!({ "key": "summary" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_json(&app, get("/api/profiles?sort=bogus")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let empty_form = Request::post("/api/ingest")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(format!("--{BOUNDARY}--\r\n")))
        .unwrap();
    let (status, body) = send(&app, empty_form).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, b"file is required");
}

#[tokio::test]
async fn upload_without_usable_ids_is_an_empty_list() {
    let (url, _) = spawn_backend(Reply::Json(json!([]))).await;
    let app = app_for(&url, Duration::from_secs(5));
    let (status, body) = send_json(&app, upload("name,city\nDr. A,Reno\n")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn reset_clears_session() {
    let (url, _) = spawn_backend(Reply::Json(json!([{ "npi": "1234567890" }]))).await;
    let app = app_for(&url, Duration::from_secs(5));
    send_json(&app, post_json("/api/process", json!(["1234567890"]))).await;
    send_json(&app, post_json("/api/view/filter", json!({ "q": "x" }))).await;

    let (_, state) = send_json(&app, post_empty("/api/reset")).await;
    assert_eq!(state["status"], "idle");
    assert_eq!(state["profiles"], 0);
    assert_eq!(state["identifiers"], 0);
    assert_eq!(state["view"]["search"], "");
}

#[tokio::test]
async fn email_dispatch_validates_and_forwards() {
    let (url, _) = spawn_backend(Reply::Json(json!([]))).await;
    let app = app_for(&url, Duration::from_secs(5));

    let (status, body) = send_json(
        &app,
        post_json("/api/email/dispatch", json!({ "to": [], "subject": "s", "html": "<p/>" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("to"));

    let (status, body) = send_json(
        &app,
        post_json(
            "/api/email/dispatch",
            json!({ "to": ["team@example.org"], "subject": "Profiles", "html": "<p>ready</p>" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "sent");

    let (status, body) = send(
        &app,
        post_json(
            "/api/email/dispatch",
            json!({ "to": ["bounce@example.org"], "subject": "Profiles", "html": "<p>ready</p>" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body, b"bad recipient");
}

#[tokio::test]
async fn health_is_ok() {
    let app = app_for("http://127.0.0.1:9", Duration::from_secs(1));
    let (status, body) = send_json(&app, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
