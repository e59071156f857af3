use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::ScheduleError;
use crate::scheduler::Scheduler;
use crate::status::StatusSnapshot;
use crate::valve::Actuator;
use crate::weather::RainSensor;

// ---------------------------------------------------------------------------
// State & request bodies
// ---------------------------------------------------------------------------

pub struct AppState<A, S> {
    pub scheduler: Scheduler<A, S>,
    /// Used by zone runs that don't name a duration.
    pub default_duration_min: u32,
}

impl<A, S> Clone for AppState<A, S> {
    fn clone(&self) -> Self {
        Self {
            scheduler: self.scheduler.clone(),
            default_duration_min: self.default_duration_min,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct DurationRequest {
    duration: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ProgramRequest {
    #[serde(default)]
    zones: Vec<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

enum ApiError {
    BadRequest(String),
    Schedule(ScheduleError),
}

impl From<ScheduleError> for ApiError {
    fn from(e: ScheduleError) -> Self {
        Self::Schedule(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Schedule(e) => {
                let status = match e {
                    ScheduleError::ZoneNotFound(_) => StatusCode::NOT_FOUND,
                    ScheduleError::WeatherUnsafe => StatusCode::PRECONDITION_FAILED,
                    ScheduleError::ActuatorCommandFailed(_) => StatusCode::BAD_GATEWAY,
                    ScheduleError::AlreadyRunning
                    | ScheduleError::AlreadyActive(_)
                    | ScheduleError::BatchInProgress(_)
                    | ScheduleError::NotPaused
                    | ScheduleError::NotActive(_) => StatusCode::CONFLICT,
                };
                (status, e.to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": msg }))).into_response()
    }
}

/// Parse an optional JSON body; an empty body means "all defaults".
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid body: {e}")))
}

fn positive(duration: Option<u32>) -> Result<Option<u32>, ApiError> {
    match duration {
        Some(0) => Err(ApiError::BadRequest("duration must be positive".to_string())),
        d => Ok(d),
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router<A: Actuator, S: RainSensor>(state: AppState<A, S>) -> Router {
    Router::new()
        .route("/api/status", get(api_status::<A, S>))
        .route("/api/start", post(api_start::<A, S>))
        .route("/api/stop", post(api_stop::<A, S>))
        .route("/api/resume", post(api_resume::<A, S>))
        .route("/api/zones/{zone}/run", post(api_run_zone::<A, S>))
        .route("/api/zones/{zone}/stop", post(api_stop_zone::<A, S>))
        .route("/api/programs/{program}/run", post(api_run_program::<A, S>))
        .with_state(state)
}

type ApiResult = Result<Json<StatusSnapshot>, ApiError>;

async fn api_status<A: Actuator, S: RainSensor>(
    State(app): State<AppState<A, S>>,
) -> Json<StatusSnapshot> {
    Json(app.scheduler.status().await)
}

async fn api_start<A: Actuator, S: RainSensor>(
    State(app): State<AppState<A, S>>,
    body: Bytes,
) -> ApiResult {
    let req: DurationRequest = parse_body(&body)?;
    let duration = positive(req.duration)?;
    app.scheduler.start_all(duration).await?;
    Ok(Json(app.scheduler.status().await))
}

async fn api_stop<A: Actuator, S: RainSensor>(State(app): State<AppState<A, S>>) -> ApiResult {
    app.scheduler.stop_all().await?;
    Ok(Json(app.scheduler.status().await))
}

async fn api_resume<A: Actuator, S: RainSensor>(State(app): State<AppState<A, S>>) -> ApiResult {
    app.scheduler.resume().await?;
    Ok(Json(app.scheduler.status().await))
}

async fn api_run_zone<A: Actuator, S: RainSensor>(
    State(app): State<AppState<A, S>>,
    Path(zone): Path<String>,
    body: Bytes,
) -> ApiResult {
    let req: DurationRequest = parse_body(&body)?;
    let duration = positive(req.duration)?.unwrap_or(app.default_duration_min);
    app.scheduler.run_zone(&zone, duration).await?;
    Ok(Json(app.scheduler.status().await))
}

async fn api_stop_zone<A: Actuator, S: RainSensor>(
    State(app): State<AppState<A, S>>,
    Path(zone): Path<String>,
) -> ApiResult {
    app.scheduler.stop_zone(&zone).await?;
    Ok(Json(app.scheduler.status().await))
}

async fn api_run_program<A: Actuator, S: RainSensor>(
    State(app): State<AppState<A, S>>,
    Path(program): Path<String>,
    body: Bytes,
) -> ApiResult {
    let req: ProgramRequest = parse_body(&body)?;
    app.scheduler.run_program(&program, &req.zones).await?;
    Ok(Json(app.scheduler.status().await))
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve<A: Actuator, S: RainSensor>(state: AppState<A, S>) {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, "failed to bind web port: {e}");
            return;
        }
    };

    info!("control api listening on http://{addr}");

    if let Err(e) = axum::serve(listener, router(state)).await {
        error!("web server error: {e}");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
