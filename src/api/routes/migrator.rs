use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use log::error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::MigratorError;
use crate::migrator::{Entity, Scheduler, SchedulerStatus};

const CODE_OK: i32 = 0;
const CODE_SYSTEM_ERROR: i32 = 5;

/// Body of every control-plane response
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ApiResult {
    pub code: i32,
    pub msg: String,
}

type ApiResponse = (StatusCode, Json<ApiResult>);

/// Request structure for starting an incremental validation
#[derive(Debug, Deserialize)]
pub struct StartIncrRequest {
    /// Rows updated at or before this time are ignored
    pub utime: i64,
    /// Polling interval in milliseconds; zero or negative means a single pass
    pub interval: i64,
}

/// Control-plane routes for one migrated entity.
pub fn router<T: Entity>(scheduler: Arc<Scheduler<T>>) -> Router {
    Router::new()
        .route("/src_only", post(src_only::<T>))
        .route("/src_first", post(src_first::<T>))
        .route("/dst_first", post(dst_first::<T>))
        .route("/dst_only", post(dst_only::<T>))
        .route("/full/start", post(start_full::<T>))
        .route("/full/stop", post(stop_full::<T>))
        .route("/incr/start", post(start_incr::<T>))
        .route("/incr/stop", post(stop_incr::<T>))
        .route("/status", get(status::<T>))
        .with_state(scheduler)
}

fn respond(result: Result<(), MigratorError>, action: &str) -> ApiResponse {
    match result {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResult {
                code: CODE_OK,
                msg: "OK".to_string(),
            }),
        ),
        Err(e) => {
            error!("Failed to {}: {}", action, e);
            system_error()
        }
    }
}

fn system_error() -> ApiResponse {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResult {
            code: CODE_SYSTEM_ERROR,
            msg: "system error".to_string(),
        }),
    )
}

/// POST /src_only
pub async fn src_only<T: Entity>(State(scheduler): State<Arc<Scheduler<T>>>) -> ApiResponse {
    respond(scheduler.src_only(), "switch to SRC_ONLY")
}

/// POST /src_first
pub async fn src_first<T: Entity>(State(scheduler): State<Arc<Scheduler<T>>>) -> ApiResponse {
    respond(scheduler.src_first(), "switch to SRC_FIRST")
}

/// POST /dst_first
pub async fn dst_first<T: Entity>(State(scheduler): State<Arc<Scheduler<T>>>) -> ApiResponse {
    respond(scheduler.dst_first(), "switch to DST_FIRST")
}

/// POST /dst_only
pub async fn dst_only<T: Entity>(State(scheduler): State<Arc<Scheduler<T>>>) -> ApiResponse {
    respond(scheduler.dst_only(), "switch to DST_ONLY")
}

/// POST /full/start
///
/// Replaces any full validation already running.
pub async fn start_full<T: Entity>(State(scheduler): State<Arc<Scheduler<T>>>) -> ApiResponse {
    respond(scheduler.start_full_validation(), "start full validation")
}

/// POST /full/stop
pub async fn stop_full<T: Entity>(State(scheduler): State<Arc<Scheduler<T>>>) -> ApiResponse {
    respond(scheduler.stop_full_validation(), "stop full validation")
}

/// POST /incr/start
pub async fn start_incr<T: Entity>(
    State(scheduler): State<Arc<Scheduler<T>>>,
    Json(req): Json<StartIncrRequest>,
) -> ApiResponse {
    respond(
        scheduler.start_incr_validation(req.utime, req.interval),
        "start incremental validation",
    )
}

/// POST /incr/stop
pub async fn stop_incr<T: Entity>(State(scheduler): State<Arc<Scheduler<T>>>) -> ApiResponse {
    respond(scheduler.stop_incr_validation(), "stop incremental validation")
}

/// GET /status
pub async fn status<T: Entity>(
    State(scheduler): State<Arc<Scheduler<T>>>,
) -> Result<Json<SchedulerStatus>, ApiResponse> {
    scheduler.status().map(Json).map_err(|e| {
        error!("Failed to read scheduler status: {}", e);
        system_error()
    })
}
