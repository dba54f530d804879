// HTTP route handlers

use axum::extract::State;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::{ApiError, AppState};
use crate::core::{FailureKind, GradeVerdict, ProblemDescriptor, Submission};
use crate::repository::{ProblemId, ProblemRecord, ProblemSummary, RepositoryError};

/// Body naming a problem by `id`, or by `date` for date-keyed problem sets
#[derive(Debug, Default, Deserialize)]
pub struct ProblemRequest {
    #[serde(default)]
    pub id: Option<ProblemId>,
    #[serde(default)]
    pub date: Option<ProblemId>,
}

impl ProblemRequest {
    fn problem_id(&self) -> Result<&str, ApiError> {
        self.id
            .as_ref()
            .or(self.date.as_ref())
            .map(ProblemId::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ApiError::BadRequest("missing parameter: id".to_string()))
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmissionRequest {
    #[serde(default)]
    pub code: String,
    #[serde(flatten)]
    pub problem: ProblemRequest,
}

#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /list_problems
pub async fn list_problems(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ProblemSummary>>, ApiError> {
    let problems = state
        .repository
        .list_problems()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(problems))
}

/// POST /get_problem
pub async fn get_problem(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProblemRequest>,
) -> Result<Json<Value>, ApiError> {
    let id = request.problem_id()?;
    let record = state.repository.fetch_problem(id).await?;

    let description = record
        .description
        .as_deref()
        .unwrap_or_default()
        .replace('\n', "<br>");

    Ok(Json(json!({
        "function": record.function,
        "description": description,
        "params": record.params,
        "problem": {
            "title": record.title(),
            "example": record.example(),
        }
    })))
}

/// Answer of `/get_function_name` for a date with no problem file
const UNKNOWN_FUNCTION_DESCRIPTION: &str = "Không tìm thấy bài tập tương ứng.";

/// POST /get_function_name - stored fields as authored, with a fallback for unknown problems
pub async fn get_function_name(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProblemRequest>,
) -> Result<Json<Value>, ApiError> {
    let id = request.problem_id()?;
    let record = match state.repository.fetch_problem(id).await {
        Ok(record) => record,
        Err(RepositoryError::NotFound(_)) => {
            return Ok(Json(json!({
                "function": "unknown",
                "description": UNKNOWN_FUNCTION_DESCRIPTION,
                "params": [],
                "problem": {}
            })))
        }
        Err(e) => return Err(e.into()),
    };

    let params = match record.params {
        Value::Null => json!([]),
        params => params,
    };
    Ok(Json(json!({
        "function": record.function.as_deref().unwrap_or("unknown"),
        "description": record.description.as_deref().unwrap_or_default(),
        "params": params,
        "problem": record.problem.unwrap_or_else(|| json!({})),
    })))
}

/// POST /run_pytest - raw output of the grading run
pub async fn run_pytest(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmissionRequest>,
) -> Result<Json<RunOutput>, ApiError> {
    let (submission, problem) = load(&state, &request).await?;
    let run = state
        .grader
        .run(&submission, &problem, state.time_limit)
        .await?;

    match (run.verdict.failure_kind, run.exit_code) {
        (FailureKind::Timeout, _) => Err(ApiError::Internal(format!(
            "time limit of {} ms exceeded while running tests",
            state.time_limit.as_millis()
        ))),
        (FailureKind::InfrastructureError, _) | (_, None) => {
            Err(ApiError::Internal(run.verdict.raw_stderr))
        }
        (_, Some(returncode)) => Ok(Json(RunOutput {
            stdout: run.verdict.raw_stdout,
            stderr: run.verdict.raw_stderr,
            returncode,
        })),
    }
}

/// POST /grade - structured verdict
pub async fn grade(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmissionRequest>,
) -> Result<Json<GradeVerdict>, ApiError> {
    let (submission, problem) = load(&state, &request).await?;
    let verdict = state
        .grader
        .grade(&submission, &problem, state.time_limit)
        .await?;

    if verdict.failure_kind == FailureKind::InfrastructureError {
        return Err(ApiError::Internal(verdict.raw_stderr));
    }
    Ok(Json(verdict))
}

async fn load(
    state: &AppState,
    request: &SubmissionRequest,
) -> Result<(Submission, ProblemDescriptor), ApiError> {
    let id = request.problem.problem_id()?;
    let record: ProblemRecord = state.repository.fetch_problem(id).await?;
    let problem = record.descriptor()?;

    info!(
        "Grading submission for problem {} ({} bytes, {} cases)",
        id,
        request.code.len(),
        problem.cases.len()
    );
    Ok((Submission::new(request.code.clone()), problem))
}
