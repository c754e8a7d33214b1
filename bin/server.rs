// Roster Sync - Web Server
// REST API over the reconciliation session and calendar sync

use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Local;
use clap::Parser;
use roster_sync::{
    calendar, db, roster::RosterDocument, ApplyReport, AuthoritativeList, CalendarEvent, Config,
    MemberRecord, PlanSummary, ReconciliationPlan, RecordStore, RosterSession, SessionError,
    SqliteStore, StoredEvent, SyncReport,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Roster reconciliation API", long_about = None)]
struct Args {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database file (overrides config and ROSTER_SYNC_DB)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:3000 (overrides config and ROSTER_SYNC_BIND)
    #[arg(short, long)]
    bind: Option<String>,
}

/// Shared application state.
///
/// One lock around the whole session: planning and applying never overlap.
#[derive(Clone)]
struct AppState {
    session: Arc<Mutex<RosterSession<SqliteStore>>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        (
            StatusCode::OK,
            Json(Self {
                success: true,
                data: Some(data),
                error: None,
            }),
        )
            .into_response()
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let message = message.into();
    if status.is_server_error() {
        error!(status = %status, error = %message, "request failed");
    }
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message),
        }),
    )
        .into_response()
}

fn lock_session(state: &AppState) -> Result<MutexGuard<'_, RosterSession<SqliteStore>>, Response> {
    state
        .session
        .lock()
        .map_err(|_| error_response(StatusCode::INTERNAL_SERVER_ERROR, "session lock poisoned"))
}

/// Staged plan as the review UI sees it
#[derive(Serialize)]
struct PlanResponse {
    fingerprint: String,
    summary: PlanSummary,
    report: Vec<String>,
    plan: ReconciliationPlan,
}

impl From<&ReconciliationPlan> for PlanResponse {
    fn from(plan: &ReconciliationPlan) -> Self {
        Self {
            fingerprint: plan.fingerprint(),
            summary: plan.summary(),
            report: plan.report_lines(),
            plan: plan.clone(),
        }
    }
}

#[derive(Deserialize)]
struct ApplyRequest {
    fingerprint: String,
}

#[derive(Deserialize)]
struct MemberQuery {
    name: Option<String>,
}

#[derive(Serialize)]
struct DiscardResponse {
    discarded: bool,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> Response {
    ApiResponse::ok("OK")
}

/// GET /api/members - All members, or those matching `?name=`
async fn get_members(State(state): State<AppState>, Query(query): Query<MemberQuery>) -> Response {
    let session = match lock_session(&state) {
        Ok(session) => session,
        Err(response) => return response,
    };

    let result = match query.name {
        Some(name) => db::find_members_by_full_name(session.store().connection(), &name),
        None => session.store().list_all(),
    };

    match result {
        Ok(members) => ApiResponse::<Vec<MemberRecord>>::ok(members),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// POST /api/roster/plan - Plan against a roster document and stage it
async fn create_plan(State(state): State<AppState>, Json(document): Json<RosterDocument>) -> Response {
    let list = match AuthoritativeList::from_groups(document) {
        Ok(list) => list,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let mut session = match lock_session(&state) {
        Ok(session) => session,
        Err(response) => return response,
    };

    match session.plan(&list) {
        Ok(plan) => ApiResponse::ok(PlanResponse::from(plan)),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

/// GET /api/roster/plan - Currently staged plan
async fn get_plan(State(state): State<AppState>) -> Response {
    let session = match lock_session(&state) {
        Ok(session) => session,
        Err(response) => return response,
    };

    match session.staged() {
        Some(plan) => ApiResponse::ok(PlanResponse::from(plan)),
        None => error_response(StatusCode::NOT_FOUND, SessionError::NothingStaged.to_string()),
    }
}

/// DELETE /api/roster/plan - Drop the staged plan
async fn discard_plan(State(state): State<AppState>) -> Response {
    let mut session = match lock_session(&state) {
        Ok(session) => session,
        Err(response) => return response,
    };

    let discarded = session.discard().is_some();
    ApiResponse::ok(DiscardResponse { discarded })
}

/// POST /api/roster/apply - Apply the staged plan if it is the one reviewed
async fn apply_plan(State(state): State<AppState>, Json(request): Json<ApplyRequest>) -> Response {
    let mut session = match lock_session(&state) {
        Ok(session) => session,
        Err(response) => return response,
    };

    match session.apply(Some(request.fingerprint.as_str())) {
        Ok(report) => {
            info!(succeeded = report.succeeded(), failed = report.failed(), "plan applied via API");
            ApiResponse::<ApplyReport>::ok(report.clone())
        }
        Err(e @ (SessionError::NothingStaged | SessionError::FingerprintMismatch { .. })) => {
            error_response(StatusCode::CONFLICT, e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// POST /api/calendar/sync - Upsert feed events
async fn sync_calendar(State(state): State<AppState>, Json(events): Json<Vec<CalendarEvent>>) -> Response {
    let session = match lock_session(&state) {
        Ok(session) => session,
        Err(response) => return response,
    };

    match calendar::sync_calendar_events(session.store().connection(), &events) {
        Ok(report) => ApiResponse::<SyncReport>::ok(report),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
    }
}

/// GET /api/calendar/upcoming - Stored events from today on
async fn upcoming_events(State(state): State<AppState>) -> Response {
    let session = match lock_session(&state) {
        Ok(session) => session,
        Err(response) => return response,
    };

    let today = Local::now().date_naive();
    match calendar::list_events_from(session.store().connection(), today) {
        Ok(events) => ApiResponse::<Vec<StoredEvent>>::ok(events),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
    }
}

fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/members", get(get_members))
        .route("/roster/plan", post(create_plan).get(get_plan).delete(discard_plan))
        .route("/roster/apply", post(apply_plan))
        .route("/calendar/sync", post(sync_calendar))
        .route("/calendar/upcoming", get(upcoming_events))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(database) = args.database {
        config.database_path = database;
    }
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }

    let store = SqliteStore::open(&config.database_path)?.with_actor("api");
    info!(database = ?config.database_path, "database opened");

    let state = AppState {
        session: Arc::new(Mutex::new(RosterSession::new(store))),
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Server listening on {}", config.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
