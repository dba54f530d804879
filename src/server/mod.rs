//! HTTP transport
//!
//! Maps requests onto the repository and the grading service. Every error
//! response is `{"error": message}`.

pub mod handlers;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::core::GradeError;
use crate::grader::GradingService;
use crate::repository::{ProblemRepository, RepositoryError};

pub struct AppState {
    pub grader: GradingService,
    pub repository: Arc<dyn ProblemRepository>,
    /// Wall-clock budget for each grading request
    pub time_limit: Duration,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/list_problems", get(handlers::list_problems))
        .route("/get_problem", post(handlers::get_problem))
        .route("/get_function_name", post(handlers::get_function_name))
        .route("/run_pytest", post(handlers::run_pytest))
        .route("/grade", post(handlers::grade))
        .with_state(state)
}

/// Error returned by a handler
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound(_) | RepositoryError::Malformed(_) => {
                ApiError::NotFound(e.to_string())
            }
            RepositoryError::Unavailable(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<GradeError> for ApiError {
    fn from(e: GradeError) -> Self {
        match e {
            GradeError::InvalidProblemDescriptor(_) => ApiError::BadRequest(e.to_string()),
            GradeError::Infrastructure { .. } => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
