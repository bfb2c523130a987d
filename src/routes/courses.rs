use axum::extract::State;
use axum::routing::get;
use axum::Router;

use crate::auth::AuthUser;
use crate::extractors::IdPath;
use crate::response::{ok, AppError};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_courses))
        .route("/:id", get(get_course_tree))
}

pub fn lessons_router() -> Router<AppState> {
    Router::new().route("/:id", get(get_lesson_detail))
}

async fn list_courses(
    _auth: AuthUser,
    State(state): State<AppState>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    Ok(ok(state.store().list_courses()?))
}

async fn get_course_tree(
    _auth: AuthUser,
    IdPath(course_id): IdPath,
    State(state): State<AppState>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let tree = state
        .store()
        .get_course_tree(course_id)?
        .ok_or_else(|| AppError::not_found("Course not found"))?;
    Ok(ok(tree))
}

async fn get_lesson_detail(
    _auth: AuthUser,
    IdPath(lesson_id): IdPath,
    State(state): State<AppState>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let detail = state
        .store()
        .get_lesson_detail(lesson_id)?
        .ok_or_else(|| AppError::not_found("Lesson not found"))?;
    Ok(ok(detail))
}
