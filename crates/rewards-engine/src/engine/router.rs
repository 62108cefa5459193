use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::catalog::RuleDefinition;
use super::domain::{RuleId, SubjectId};
use super::repository::{AssignmentRepository, AuditSink, MetricSource};
use super::service::{EngineServiceError, EvaluationService};

/// Router builder exposing preview, apply, and the assignment read surface.
pub fn engine_router<M, R, S>(service: Arc<EvaluationService<M, R, S>>) -> Router
where
    M: MetricSource + 'static,
    R: AssignmentRepository + 'static,
    S: AuditSink + 'static,
{
    Router::new()
        .route("/api/v1/rules/preview", post(preview_handler::<M, R, S>))
        .route(
            "/api/v1/evaluations/apply",
            post(apply_handler::<M, R, S>),
        )
        .route(
            "/api/v1/subjects/:subject_id/assignments",
            get(assignments_handler::<M, R, S>),
        )
        .with_state(service)
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApplyRequest {
    #[serde(default)]
    pub(crate) rule_id: Option<String>,
    #[serde(default)]
    pub(crate) actor: Option<String>,
}

pub(crate) async fn preview_handler<M, R, S>(
    State(service): State<Arc<EvaluationService<M, R, S>>>,
    axum::Json(definition): axum::Json<RuleDefinition>,
) -> Response
where
    M: MetricSource + 'static,
    R: AssignmentRepository + 'static,
    S: AuditSink + 'static,
{
    match service.preview(&definition) {
        Ok(outcome) => (StatusCode::OK, axum::Json(outcome)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn apply_handler<M, R, S>(
    State(service): State<Arc<EvaluationService<M, R, S>>>,
    request: Option<axum::Json<ApplyRequest>>,
) -> Response
where
    M: MetricSource + 'static,
    R: AssignmentRepository + 'static,
    S: AuditSink + 'static,
{
    let request = request.map(|axum::Json(body)| body).unwrap_or_default();
    let actor = request.actor.unwrap_or_else(|| "system".to_string());
    let now = Utc::now();

    let result = match request.rule_id {
        Some(rule_id) => service.apply_rule(&RuleId(rule_id), &actor, now),
        None => service.apply(&actor, now),
    };

    match result {
        Ok(outcome) => (
            StatusCode::OK,
            axum::Json(json!({
                "ok": true,
                "evaluated": outcome.evaluated,
                "tier_changes": outcome.tier_changes,
                "badge_grants": outcome.badge_grants,
                "gift_awards": outcome.gift_awards,
                "failures": outcome.failures,
            })),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn assignments_handler<M, R, S>(
    State(service): State<Arc<EvaluationService<M, R, S>>>,
    Path(subject_id): Path<String>,
) -> Response
where
    M: MetricSource + 'static,
    R: AssignmentRepository + 'static,
    S: AuditSink + 'static,
{
    match service.assignments(&SubjectId(subject_id), Utc::now()) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(error) => error_response(error),
    }
}

fn error_response(error: EngineServiceError) -> Response {
    let status = match &error {
        EngineServiceError::Shape(_) | EngineServiceError::Evaluation(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        EngineServiceError::UnknownRule(_) => StatusCode::NOT_FOUND,
        EngineServiceError::Snapshot(_)
        | EngineServiceError::Repository(_)
        | EngineServiceError::Audit(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let payload = json!({ "error": error.to_string() });
    (status, axum::Json(payload)).into_response()
}
