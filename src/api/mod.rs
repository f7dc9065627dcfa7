//! HTTP surface for the execution service, mounted under `/api`.
//!
//! | Method | Path | Success |
//! |---|---|---|
//! | GET | /api/health | 200 |
//! | GET | /api/recipes | 200 `[RecipeDto]` |
//! | GET | /api/recipes/{recipeId} | 200 `RecipeDto` |
//! | POST | /api/recipes/{recipeId}/install | 200 `RecipeDto` (before completion) |
//! | POST | /api/recipes/{recipeId}/uninstall | 200 `RecipeDto` (before completion) |
//! | GET | /api/recipes/{recipeId}/status | 200 `ExecutionDto` |
//! | POST | /api/recipes/{recipeId}/cancel | 202 `ExecutionDto` |
//! | POST | /api/recipes/{recipeId}/steps/{stepNumber}/apply | 200 `StepDto` |
//! | POST | /api/recipes/{recipeId}/steps/{stepNumber}/revert | 200 `StepDto` |

use crate::core::error::{RecipeError, Result};
use crate::core::executor::RecipeExecutionService;
use crate::core::types::{ExecutionDto, RecipeDto, StepDto};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

type AppState = Arc<RecipeExecutionService>;

/// JSON error body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// HTTP status for each error kind.
pub fn status_code(err: &RecipeError) -> StatusCode {
    match err {
        RecipeError::RecipeNotFound(_) | RecipeError::NoExecution(_) => StatusCode::NOT_FOUND,
        RecipeError::StepIndexOutOfRange { .. } | RecipeError::BadRequest(_) => {
            StatusCode::BAD_REQUEST
        }
        RecipeError::ExecutionInProgress(_) | RecipeError::NotRunning(_) => StatusCode::CONFLICT,
        RecipeError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        RecipeError::StepApplication { .. }
        | RecipeError::StepRevert { .. }
        | RecipeError::Validation(_)
        | RecipeError::Config(_)
        | RecipeError::State(_)
        | RecipeError::Io(_)
        | RecipeError::Yaml(_)
        | RecipeError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for RecipeError {
    fn into_response(self) -> Response {
        let status = status_code(&self);
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Build the application router.
pub fn router(service: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/recipes", get(list_recipes))
        .route("/recipes/{recipe_id}", get(get_recipe))
        .route("/recipes/{recipe_id}/install", post(install))
        .route("/recipes/{recipe_id}/uninstall", post(uninstall))
        .route("/recipes/{recipe_id}/status", get(status))
        .route("/recipes/{recipe_id}/cancel", post(cancel))
        .route(
            "/recipes/{recipe_id}/steps/{step_number}/apply",
            post(apply_step),
        )
        .route(
            "/recipes/{recipe_id}/steps/{step_number}/revert",
            post(revert_step),
        );

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve(
    service: AppState,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn parse_step_number(raw: &str) -> Result<usize> {
    raw.parse()
        .map_err(|_| RecipeError::bad_request(format!("step number '{}' is not a non-negative integer", raw)))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_recipes(State(svc): State<AppState>) -> Json<Vec<RecipeDto>> {
    Json(svc.list_recipes())
}

async fn get_recipe(
    State(svc): State<AppState>,
    Path(recipe_id): Path<String>,
) -> Result<Json<RecipeDto>> {
    Ok(Json(svc.get_recipe(&recipe_id)?))
}

async fn install(
    State(svc): State<AppState>,
    Path(recipe_id): Path<String>,
) -> Result<Json<RecipeDto>> {
    Ok(Json(svc.install(&recipe_id).await?))
}

async fn uninstall(
    State(svc): State<AppState>,
    Path(recipe_id): Path<String>,
) -> Result<Json<RecipeDto>> {
    Ok(Json(svc.uninstall(&recipe_id).await?))
}

async fn status(
    State(svc): State<AppState>,
    Path(recipe_id): Path<String>,
) -> Result<Json<ExecutionDto>> {
    Ok(Json(svc.execution_status(&recipe_id)?))
}

async fn cancel(
    State(svc): State<AppState>,
    Path(recipe_id): Path<String>,
) -> Result<(StatusCode, Json<ExecutionDto>)> {
    Ok((StatusCode::ACCEPTED, Json(svc.cancel(&recipe_id)?)))
}

async fn apply_step(
    State(svc): State<AppState>,
    Path((recipe_id, step_number)): Path<(String, String)>,
) -> Result<Json<StepDto>> {
    let index = parse_step_number(&step_number)?;
    Ok(Json(svc.apply_step(&recipe_id, index).await?))
}

async fn revert_step(
    State(svc): State<AppState>,
    Path((recipe_id, step_number)): Path<(String, String)>,
) -> Result<Json<StepDto>> {
    let index = parse_step_number(&step_number)?;
    Ok(Json(svc.revert_step(&recipe_id, index).await?))
}
