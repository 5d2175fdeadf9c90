//! Route handlers for the job API.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Map, Value};

use codemend_core::types::{AgentRole, Job, Step, StepState};
use codemend_engine::{JobService, ServiceError, SubmitJob};

use crate::dto::{JobResponse, StepResponse, SubmitJobRequest};

#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobService>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ErrorBody>)>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/jobs", post(submit_job))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/steps", get(get_steps))
        .route("/jobs/{id}/report", get(get_report))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> ApiResult<impl IntoResponse> {
    let git_ref = request.git_ref_or_default();
    let job = state
        .jobs
        .submit(SubmitJob {
            repo_url: request.repo_url,
            git_ref,
            task_description: request.task_description,
            failing_test: request.failing_test,
        })
        .await
        .map_err(internal_error)?;
    Ok((StatusCode::CREATED, Json(JobResponse::from(&job))))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobResponse>> {
    let job = find_job(&state, &id).await?;
    Ok(Json(JobResponse::from(&job)))
}

async fn get_steps(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<StepResponse>>> {
    find_job(&state, &id).await?;
    let steps = state.jobs.steps(&id).await.map_err(internal_error)?;
    Ok(Json(steps.iter().map(StepResponse::from).collect()))
}

/// The structured run summary produced by the Finalizer agent.
///
/// 200 — the Finalizer result is available (parsed and enriched)
/// 202 — the job is still running
/// 404 — unknown job id
async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let job = find_job(&state, &id).await?;
    let steps = state.jobs.steps(&id).await.map_err(internal_error)?;
    let (status, body) = build_report(&job, &steps);
    Ok((status, Json(body)))
}

/// Pure report shaping so it is testable without a router.
fn build_report(job: &Job, steps: &[Step]) -> (StatusCode, Value) {
    let finalizer = steps.iter().find(|s| {
        s.role == AgentRole::Finalizer && s.state == StepState::Done && s.result_json.is_some()
    });
    let Some(finalizer) = finalizer else {
        return (
            StatusCode::ACCEPTED,
            json!({
                "status": "pending",
                "jobState": job.state.as_str(),
            }),
        );
    };
    let raw = finalizer.result_json.as_deref().unwrap_or_default();

    match serde_json::from_str::<Map<String, Value>>(raw) {
        Ok(mut report) => {
            report.insert("jobId".to_string(), json!(job.id));
            report.insert("jobState".to_string(), json!(job.state.as_str()));
            report.insert("createdAt".to_string(), json!(job.created_at));
            report.insert("updatedAt".to_string(), json!(job.updated_at));
            report.insert("iterations".to_string(), json!(job.iteration_count));
            (StatusCode::OK, Value::Object(report))
        }
        // The Finalizer emitted something that is not a JSON object —
        // surface it as raw text instead of failing the request.
        Err(_) => (
            StatusCode::OK,
            json!({
                "jobId": job.id,
                "jobState": job.state.as_str(),
                "report": raw,
            }),
        ),
    }
}

async fn find_job(state: &AppState, id: &str) -> ApiResult<Job> {
    state
        .jobs
        .find_job(id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorBody {
                    code: "not_found".to_string(),
                    message: format!("Job not found: {id}"),
                }),
            )
        })
}

fn internal_error(err: ServiceError) -> (StatusCode, Json<ErrorBody>) {
    tracing::error!(error = %err, "job api internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            code: "internal".to_string(),
            message: err.to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use codemend_core::types::JobState;

    fn done_job() -> Job {
        let mut job = Job::new("git://example/r.git", "main", None, None);
        job.iteration_count = 1;
        job.set_state(JobState::Done);
        job
    }

    fn finalizer_step(job: &Job, result_json: &str) -> Step {
        let mut step = Step::new(&job.id, AgentRole::Finalizer);
        step.state = StepState::Done;
        step.finished_at = Some(Utc::now());
        step.result_json = Some(result_json.to_string());
        step
    }

    #[test]
    fn test_report_pending_before_finalizer_completes() {
        let mut job = done_job();
        job.set_state(JobState::Test);
        let steps = vec![Step::new(&job.id, AgentRole::Finalizer)];
        let (status, body) = build_report(&job, &steps);
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "pending");
        assert_eq!(body["jobState"], "TEST");
    }

    #[test]
    fn test_report_enriches_finalizer_json() {
        let job = done_job();
        let steps = vec![finalizer_step(&job, r#"{"summary": "repaired"}"#)];
        let (status, body) = build_report(&job, &steps);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"], "repaired");
        assert_eq!(body["jobId"], job.id.as_str());
        assert_eq!(body["jobState"], "DONE");
        assert_eq!(body["iterations"], 1);
        assert!(body.get("createdAt").is_some());
    }

    #[test]
    fn test_report_falls_back_to_raw_text_for_invalid_json() {
        let job = done_job();
        let steps = vec![finalizer_step(&job, "not json at all")];
        let (status, body) = build_report(&job, &steps);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["report"], "not json at all");
        assert_eq!(body["jobId"], job.id.as_str());
        assert!(body.get("summary").is_none());
    }
}
