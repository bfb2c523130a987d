use axum::extract::State;
use axum::routing::{get, post, put};
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::constants::MAX_TIME_SPENT_SECONDS;
use crate::extractors::{IdPath, JsonBody};
use crate::progression::{CompletionOutcome, MissOutcome, RefillOutcome};
use crate::response::{ok, AppError};
use crate::state::AppState;
use crate::store::operations::progress::UserProgress;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_progress))
        .route("/active-course", put(select_active_course))
        .route("/challenges/:id/complete", post(complete_challenge))
        .route("/challenges/:id/miss", post(miss_challenge))
        .route("/pending-lessons", get(pending_lessons))
        .route("/weak-topics", get(weak_topics))
        .route("/hearts/refill", post(refill_hearts))
        .route("/quests", get(quests))
}

async fn get_progress(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let view = state
        .engine()
        .progress_view(&auth.user_id, Utc::now().date_naive())?;
    Ok(ok(view))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectCourseRequest {
    course_id: u64,
}

async fn select_active_course(
    auth: AuthUser,
    State(state): State<AppState>,
    JsonBody(req): JsonBody<SelectCourseRequest>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let progress = state
        .engine()
        .select_active_course(&auth.user_id, req.course_id, Utc::now())?;
    Ok(ok(progress))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnswerRequest {
    #[serde(default)]
    time_spent_seconds: Option<u32>,
}

impl AnswerRequest {
    fn time_spent(&self) -> Option<u32> {
        self.time_spent_seconds
            .map(|secs| secs.min(MAX_TIME_SPENT_SECONDS))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
enum AnswerResponse {
    Completed { progress: UserProgress },
    HeartLost { progress: UserProgress },
    Practice { progress: UserProgress },
    Unlimited { progress: UserProgress },
    OutOfHearts,
}

impl From<CompletionOutcome> for AnswerResponse {
    fn from(outcome: CompletionOutcome) -> Self {
        match outcome {
            CompletionOutcome::Completed(progress) => Self::Completed { progress },
            CompletionOutcome::OutOfHearts => Self::OutOfHearts,
        }
    }
}

impl From<MissOutcome> for AnswerResponse {
    fn from(outcome: MissOutcome) -> Self {
        match outcome {
            MissOutcome::HeartLost(progress) => Self::HeartLost { progress },
            MissOutcome::Practice(progress) => Self::Practice { progress },
            MissOutcome::Unlimited(progress) => Self::Unlimited { progress },
            MissOutcome::OutOfHearts => Self::OutOfHearts,
        }
    }
}

// The body is optional: an empty POST leaves the duration unknown.
fn answer_body(body: Option<JsonBody<AnswerRequest>>) -> AnswerRequest {
    body.map(|JsonBody(req)| req).unwrap_or_default()
}

async fn complete_challenge(
    auth: AuthUser,
    IdPath(challenge_id): IdPath,
    State(state): State<AppState>,
    body: Option<JsonBody<AnswerRequest>>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let req = answer_body(body);
    let outcome = state.engine().complete_challenge(
        &auth.user_id,
        challenge_id,
        req.time_spent(),
        Utc::now(),
    )?;
    Ok(ok(AnswerResponse::from(outcome)))
}

async fn miss_challenge(
    auth: AuthUser,
    IdPath(challenge_id): IdPath,
    State(state): State<AppState>,
    body: Option<JsonBody<AnswerRequest>>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let req = answer_body(body);
    let outcome = state.engine().record_incorrect_answer(
        &auth.user_id,
        challenge_id,
        req.time_spent(),
        Utc::now(),
    )?;
    Ok(ok(AnswerResponse::from(outcome)))
}

async fn pending_lessons(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    Ok(ok(state.engine().pending_lessons(&auth.user_id)?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WeakTopicsResponse {
    tags: Vec<String>,
}

async fn weak_topics(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let tags = state.engine().weak_topics(&auth.user_id)?;
    Ok(ok(WeakTopicsResponse { tags }))
}

async fn refill_hearts(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    match state.engine().refill_hearts(&auth.user_id, Utc::now())? {
        RefillOutcome::Refilled(progress) => Ok(ok(progress)),
        RefillOutcome::HeartsFull => Err(AppError::conflict("HEARTS_FULL", "Hearts are already full")),
        RefillOutcome::NotEnoughPoints => Err(AppError::conflict(
            "INSUFFICIENT_POINTS",
            "Not enough points to refill hearts",
        )),
    }
}

async fn quests(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    Ok(ok(state.engine().quests(&auth.user_id)?))
}
