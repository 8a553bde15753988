use crate::cache::{AttemptRecord, CaseFingerprint};
use crate::error::{AppError, ErrorDetail};
use crate::models::{validate_case, CaseRecord, ValidationIssue};
use crate::shuffle::ShuffleResult;
use crate::state::AppState;
use crate::validator::{grade_selection, matches_shown_option, ValidationInput};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn validation_error(issues: Vec<ValidationIssue>, req_id: String) -> AppError {
    AppError::new(
        StatusCode::BAD_REQUEST,
        "VALIDATION_ERROR",
        "case validation failed",
        req_id,
    )
    .with_details(
        issues
            .into_iter()
            .map(|i| ErrorDetail {
                field: i.field,
                issue: i.issue,
            })
            .collect(),
    )
}

#[derive(Debug, Serialize)]
pub struct CaseIdResponse {
    pub case_id: String,
}

pub async fn create_case(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(case): Json<CaseRecord>,
) -> Result<(StatusCode, Json<CaseIdResponse>), AppError> {
    let req_id = request_id_from_headers(&headers);
    if let Err(issues) = validate_case(&case) {
        return Err(validation_error(issues, req_id));
    }
    let case_id = case.id.clone();
    if !state.insert_new(case).await {
        return Err(AppError::new(StatusCode::CONFLICT, "CONFLICT", "case already exists", req_id));
    }
    info!("case {} created", case_id);
    Ok((StatusCode::CREATED, Json(CaseIdResponse { case_id })))
}

#[derive(Debug, Serialize)]
pub struct CaseSummary {
    pub id: String,
    pub title: String,
    pub option_count: usize,
}

#[derive(Debug, Serialize)]
pub struct CaseListResponse {
    pub items: Vec<CaseSummary>,
    pub total: usize,
}

pub async fn list_cases(State(state): State<AppState>) -> Json<CaseListResponse> {
    let items: Vec<CaseSummary> = state
        .list_cases()
        .await
        .into_iter()
        .map(|c| CaseSummary {
            option_count: c.options().len(),
            id: c.id,
            title: c.title,
        })
        .collect();
    Json(CaseListResponse { total: items.len(), items })
}

pub async fn get_case(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<CaseRecord>, AppError> {
    let req_id = request_id_from_headers(&headers);
    state
        .get_case(&id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::not_found("case", req_id))
}

pub async fn update_case(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(mut case): Json<CaseRecord>,
) -> Result<Json<CaseIdResponse>, AppError> {
    let req_id = request_id_from_headers(&headers);
    if case.id.trim().is_empty() {
        case.id = id.clone();
    }
    if case.id != id {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "case id in body does not match path",
            req_id,
        ));
    }
    if let Err(issues) = validate_case(&case) {
        return Err(validation_error(issues, req_id));
    }
    if !state.replace_existing(case).await {
        return Err(AppError::not_found("case", req_id));
    }
    Ok(Json(CaseIdResponse { case_id: id }))
}

pub async fn delete_case(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let req_id = request_id_from_headers(&headers);
    if !state.delete_case(&id).await {
        return Err(AppError::not_found("case", req_id));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewPayload {
    #[serde(default)]
    pub view_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewResponse {
    pub view_id: String,
    pub case_id: String,
    pub fresh: bool,
    pub fingerprint: String,
    pub shuffle: Arc<ShuffleResult>,
}

pub async fn view_case(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Option<Json<ViewPayload>>,
) -> Result<Json<ViewResponse>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let case = state
        .get_case(&id)
        .await
        .ok_or_else(|| AppError::not_found("case", req_id.clone()))?;
    let view_id = payload
        .and_then(|Json(p)| p.view_id)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let outcome = state.open_view(&view_id, &case).ok_or_else(|| {
        AppError::new(StatusCode::CONFLICT, "NOT_READY", "case has no answer options yet", req_id.clone())
    })?;
    if outcome.fresh {
        info!("view {} drew a new order for case {}", view_id, id);
    }

    Ok(Json(ViewResponse {
        view_id,
        case_id: id,
        fresh: outcome.fresh,
        fingerprint: outcome.fingerprint.to_string(),
        shuffle: outcome.shuffle,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    pub view_id: String,
    pub selected_index: usize,
    /// Optional echo of the option the learner saw; only checked, never graded.
    #[serde(default)]
    pub selected_text: Option<String>,
}

pub async fn answer_case(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<AnswerPayload>,
) -> Result<Json<serde_json::Value>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let case = state
        .get_case(&id)
        .await
        .ok_or_else(|| AppError::not_found("case", req_id.clone()))?;
    let view = state
        .views
        .get(&payload.view_id)
        .ok_or_else(|| AppError::not_found("view", req_id.clone()))?;
    if view.case_id != case.id || view.fingerprint != CaseFingerprint::of(&case) {
        return Err(AppError::new(
            StatusCode::CONFLICT,
            "STALE_VIEW",
            "case changed since it was viewed",
            req_id,
        ));
    }
    if payload.selected_index >= view.shuffle.len() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            format!("selectedIndex must be below {}", view.shuffle.len()),
            req_id,
        ));
    }
    if let Some(text) = payload.selected_text.as_deref() {
        if !matches_shown_option(&view.shuffle, payload.selected_index, text) {
            return Err(AppError::new(
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                "selectedText does not match the option shown at selectedIndex",
                req_id,
            ));
        }
    }

    let grade = grade_selection(&case, &view.shuffle, payload.selected_index);
    let attempt = AttemptRecord {
        case_id: case.id.clone(),
        selected_index: payload.selected_index,
        original_index: grade.original_index,
        correct: grade.correct,
        answered_at: Utc::now(),
    };
    let stats = state
        .views
        .record_attempt(&payload.view_id, attempt)
        .unwrap_or_else(|| {
            warn!("view {} closed while grading", payload.view_id);
            view.stats.clone()
        });
    let choice = view.shuffle.choice_at(payload.selected_index);

    Ok(Json(json!({
        "correct": grade.correct,
        "graded": view.shuffle.is_graded(),
        "correctIndex": grade.correct_index,
        "feedback": choice.as_ref().map(|c| c.feedback.clone()),
        "shortTip": choice.as_ref().map(|c| c.short_tip.clone()),
        "stats": {"correct": stats.correct, "wrong": stats.wrong, "correctPct": stats.correct_pct()}
    })))
}

pub async fn grade(Json(input): Json<ValidationInput>) -> Json<serde_json::Value> {
    Json(json!({ "correct": input.is_correct() }))
}

pub async fn view_results(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(view_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let view = state
        .views
        .get(&view_id)
        .ok_or_else(|| AppError::not_found("view", req_id))?;
    Ok(Json(json!({
        "view": {
            "id": view_id,
            "caseId": view.case_id,
            "fingerprint": view.fingerprint,
            "openedAt": view.opened_at.to_rfc3339()
        },
        "stats": {"correct": view.stats.correct, "wrong": view.stats.wrong, "correctPct": view.stats.correct_pct()},
        "missedCases": view.missed,
        "attempts": view.attempts
    })))
}

pub async fn end_view(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(view_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let req_id = request_id_from_headers(&headers);
    state
        .views
        .end(&view_id)
        .ok_or_else(|| AppError::not_found("view", req_id))?;
    Ok(StatusCode::NO_CONTENT)
}
