use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Mutex, oneshot};
use tower_http::cors::{Any, CorsLayer};

use crate::cli::ServeArgs;
use crate::client::{EmailRequest, EnrichmentClient};
use crate::constants::MAX_UPLOAD_BYTES;
use crate::error::{EmailError, EnrichError, ExtractError};
use crate::export::{profiles_to_csv, today_file_name};
use crate::npi::{extract_npis_from_bytes, is_valid_npi};
use crate::profile::{DisplayProfile, reconcile};
use crate::store::{CycleId, Dashboard, Snapshot, TransitionError};
use crate::view::{Sort, SortDirection, SortKey};

struct Session {
    board: Dashboard,
    cancel: Option<oneshot::Sender<()>>,
}

#[derive(Clone)]
pub struct AppState {
    session: Arc<Mutex<Session>>,
    client: EnrichmentClient,
}

impl AppState {
    pub fn new(client: EnrichmentClient) -> Self {
        Self {
            session: Arc::new(Mutex::new(Session {
                board: Dashboard::new(),
                cancel: None,
            })),
            client,
        }
    }
}

pub async fn run(opts: ServeArgs) -> anyhow::Result<()> {
    let client =
        EnrichmentClient::new(opts.backend.client_config()).context("build enrichment client")?;
    tracing::info!(
        backend = %client.config().backend_url,
        timeout_secs = client.config().timeout.as_secs(),
        "Enrichment backend configured"
    );

    let app = router(AppState::new(client));

    let addr: SocketAddr = format!("{}:{}", opts.host, opts.port)
        .parse()
        .context("parse host:port")?;

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(api_health))
        .route("/api/ingest", post(api_ingest))
        .route("/api/process", post(api_process))
        .route("/api/cancel", post(api_cancel))
        .route("/api/reset", post(api_reset))
        .route("/api/state", get(api_state))
        .route("/api/error/dismiss", post(api_dismiss_error))
        .route("/api/profiles", get(api_profiles))
        .route("/api/view/filter", post(api_set_filter))
        .route("/api/view/sort", post(api_set_sort))
        .route("/api/export", get(api_export))
        .route("/api/email/dispatch", post(api_email_dispatch))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}

fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn api_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn api_ingest(State(st): State<AppState>, mut multipart: Multipart) -> Response {
    let bytes = match read_upload(&mut multipart).await {
        Ok(Some(b)) => b,
        Ok(None) => return (StatusCode::BAD_REQUEST, "file is required").into_response(),
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let npis = extract_npis_from_bytes(&bytes);
    let mut session = st.session.lock().await;
    if let Err(e) = session.board.set_upload(npis.clone()) {
        return (StatusCode::CONFLICT, e.to_string()).into_response();
    }
    tracing::info!(bytes = bytes.len(), identifiers = npis.len(), "Upload ingested");
    Json(npis).into_response()
}

/// The `file` field, or the first field carrying a file name.
async fn read_upload(multipart: &mut Multipart) -> Result<Option<Bytes>, ExtractError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ExtractError::Upload(e.body_text()))?
    {
        if field.name() == Some("file") || field.file_name().is_some() {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ExtractError::Upload(e.body_text()))?;
            return Ok(Some(bytes));
        }
    }
    Ok(None)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProcessRequest {
    List(Vec<String>),
    Wrapped { npi_list: Vec<String> },
}

#[derive(Debug, Serialize)]
struct ProcessResponse<'a> {
    cycle: u64,
    submitted: usize,
    profiles: &'a [DisplayProfile],
}

async fn api_process(State(st): State<AppState>, body: Bytes) -> Response {
    let requested = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        match serde_json::from_slice::<ProcessRequest>(&body) {
            Ok(ProcessRequest::List(ids)) | Ok(ProcessRequest::Wrapped { npi_list: ids }) => {
                Some(ids)
            }
            Err(e) => return json_error(StatusCode::BAD_REQUEST, format!("invalid body: {e}")),
        }
    };

    if let Some(ids) = &requested {
        let invalid: Vec<&String> = ids.iter().filter(|n| !is_valid_npi(n)).collect();
        if !invalid.is_empty() {
            return json_error(
                StatusCode::BAD_REQUEST,
                format!("invalid NPIs (expected 10 digits): {invalid:?}"),
            );
        }
    }

    let (cycle, npis, cancelled) = {
        let mut session = st.session.lock().await;
        let (cycle, npis) = match session.board.begin_processing(requested) {
            Ok(v) => v,
            Err(e @ TransitionError::Busy) => return json_error(StatusCode::CONFLICT, e.to_string()),
            Err(e @ TransitionError::NoIdentifiers) => {
                return json_error(StatusCode::BAD_REQUEST, e.to_string());
            }
        };
        let (tx, rx) = oneshot::channel();
        session.cancel = Some(tx);
        (cycle, npis, rx)
    };
    tracing::info!(cycle, identifiers = npis.len(), "Enrichment cycle started");

    // The cycle runs detached so a dropped request still reaches a terminal state.
    let submitted = npis.len();
    let task = tokio::spawn(run_cycle(st.clone(), cycle, npis, cancelled));
    match task.await {
        Ok(CycleOutcome::Completed(profiles)) => Json(ProcessResponse {
            cycle,
            submitted,
            profiles: &profiles,
        })
        .into_response(),
        Ok(CycleOutcome::Cancelled) => json_error(StatusCode::CONFLICT, "processing cancelled"),
        Ok(CycleOutcome::Failed(e)) => {
            let status = match e {
                EnrichError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            };
            json_error(status, e.to_string())
        }
        Err(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("enrichment task failed: {e}"),
        ),
    }
}

enum CycleOutcome {
    Completed(Vec<DisplayProfile>),
    Cancelled,
    Failed(EnrichError),
}

/// Fetch, reconcile and install the results of one cycle, or record why it
/// ended without them.
async fn run_cycle(
    st: AppState,
    cycle: CycleId,
    npis: Vec<String>,
    cancelled: oneshot::Receiver<()>,
) -> CycleOutcome {
    // A dropped sender (reset) counts as a cancel too.
    let outcome = tokio::select! {
        r = st.client.fetch_profiles(&npis) => r,
        _ = cancelled => Err(EnrichError::Cancelled),
    };

    let mut session = st.session.lock().await;
    match outcome {
        Ok(results) => {
            let returned = results.len();
            let profiles = reconcile(&npis, results);
            if !session.board.set_results(cycle, profiles) {
                return CycleOutcome::Cancelled;
            }
            session.cancel = None;
            tracing::info!(
                cycle,
                submitted = npis.len(),
                returned,
                "Enrichment cycle completed"
            );
            CycleOutcome::Completed(session.board.profiles().to_vec())
        }
        Err(EnrichError::Cancelled) => {
            tracing::info!(cycle, "Enrichment cycle cancelled");
            CycleOutcome::Cancelled
        }
        Err(e) => {
            tracing::warn!(cycle, error = %e, "Enrichment cycle failed");
            if session.board.fail(cycle, e.to_string()) {
                session.cancel = None;
            }
            CycleOutcome::Failed(e)
        }
    }
}

async fn api_cancel(State(st): State<AppState>) -> impl IntoResponse {
    let mut session = st.session.lock().await;
    let cancelled = session.board.cancel();
    if let Some(tx) = session.cancel.take() {
        let _ = tx.send(());
    }
    if let Some(cycle) = cancelled {
        tracing::info!(cycle, "Cancel requested");
    }
    Json(json!({ "cancelled": cancelled.is_some() }))
}

async fn api_reset(State(st): State<AppState>) -> Json<Snapshot> {
    let mut session = st.session.lock().await;
    session.board.reset();
    session.cancel = None;
    Json(session.board.snapshot())
}

async fn api_state(State(st): State<AppState>) -> Json<Snapshot> {
    Json(st.session.lock().await.board.snapshot())
}

async fn api_dismiss_error(State(st): State<AppState>) -> Json<Snapshot> {
    let mut session = st.session.lock().await;
    session.board.dismiss_error();
    Json(session.board.snapshot())
}

#[derive(Debug, Deserialize)]
struct ProfilesParams {
    q: Option<String>,
    sort: Option<String>,
    dir: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProfilesResponse<'a> {
    total: usize,
    shown: usize,
    profiles: Vec<&'a DisplayProfile>,
}

async fn api_profiles(State(st): State<AppState>, Query(p): Query<ProfilesParams>) -> Response {
    let session = st.session.lock().await;
    let mut view = session.board.view_state().clone();

    if let Some(q) = p.q {
        view.set_search(q);
    }
    if let Some(sort) = p.sort.as_deref() {
        let Some(key) = SortKey::parse(sort) else {
            return json_error(StatusCode::BAD_REQUEST, format!("unknown sort key: {sort}"));
        };
        let direction = match p.dir.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("desc") => SortDirection::Desc,
            _ => SortDirection::Asc,
        };
        view.sort = Some(Sort { key, direction });
    }

    let all = session.board.profiles();
    let rows = view.apply(all);
    Json(ProfilesResponse {
        total: all.len(),
        shown: rows.len(),
        profiles: rows,
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
struct FilterBody {
    #[serde(default)]
    q: String,
}

async fn api_set_filter(State(st): State<AppState>, Json(b): Json<FilterBody>) -> Json<Snapshot> {
    let mut session = st.session.lock().await;
    session.board.set_filter(b.q);
    Json(session.board.snapshot())
}

#[derive(Debug, Deserialize)]
struct SortBody {
    key: String,
}

async fn api_set_sort(State(st): State<AppState>, Json(b): Json<SortBody>) -> Response {
    let Some(key) = SortKey::parse(&b.key) else {
        return json_error(StatusCode::BAD_REQUEST, format!("unknown sort key: {}", b.key));
    };
    let mut session = st.session.lock().await;
    session.board.set_sort(key);
    Json(session.board.snapshot()).into_response()
}

async fn api_export(State(st): State<AppState>) -> Response {
    let session = st.session.lock().await;
    let rows: Vec<&DisplayProfile> = session.board.profiles().iter().collect();
    match profiles_to_csv(&rows) {
        Ok(bytes) => {
            let disposition = format!("attachment; filename=\"{}\"", today_file_name());
            (
                [
                    (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn api_email_dispatch(
    State(st): State<AppState>,
    Json(req): Json<EmailRequest>,
) -> Response {
    let missing = req.missing_fields();
    if !missing.is_empty() {
        return json_error(
            StatusCode::BAD_REQUEST,
            format!("Missing required fields: {}", missing.join(", ")),
        );
    }

    match st.client.send_email(&req).await {
        Ok(body) => {
            tracing::info!(recipients = req.to.len(), "Email dispatched");
            ([(header::CONTENT_TYPE, "application/json")], body).into_response()
        }
        Err(EmailError::Status { status, body }) => {
            tracing::warn!(%status, "Email backend rejected dispatch");
            (status, body).into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "Email dispatch failed");
            json_error(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}
