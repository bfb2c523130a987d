use axum::extract::{Path, State};
use axum::routing::{delete, post, put};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::AdminAuthUser;
use crate::extractors::{IdPath, JsonBody};
use crate::response::{created, ok, AppError};
use crate::state::AppState;
use crate::store::operations::content::CourseDraft;
use crate::store::operations::subscriptions::Subscription;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/import", post(import_course))
        .route("/courses/:id", delete(delete_course))
        .route(
            "/subscriptions/:user_id",
            put(set_subscription).delete(clear_subscription),
        )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportRequest {
    #[serde(default)]
    course_id: Option<u64>,
    course: CourseDraft,
}

async fn import_course(
    admin: AdminAuthUser,
    State(state): State<AppState>,
    JsonBody(req): JsonBody<ImportRequest>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let summary = state.store().import_course_tree(req.course_id, &req.course)?;
    tracing::info!(
        admin_id = %admin.admin_id,
        course_id = summary.course_id,
        units = summary.units.len(),
        "Admin imported course content"
    );
    Ok(created(summary))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeletedResponse {
    deleted: bool,
}

async fn delete_course(
    admin: AdminAuthUser,
    IdPath(course_id): IdPath,
    State(state): State<AppState>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    state.store().delete_course(course_id)?;
    tracing::info!(admin_id = %admin.admin_id, course_id, "Admin deleted course");
    Ok(ok(DeletedResponse { deleted: true }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionRequest {
    active_until: DateTime<Utc>,
}

async fn set_subscription(
    admin: AdminAuthUser,
    Path(user_id): Path<String>,
    State(state): State<AppState>,
    JsonBody(req): JsonBody<SubscriptionRequest>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    if user_id.trim().is_empty() {
        return Err(AppError::bad_request("INVALID_USER_ID", "userId is required"));
    }
    let subscription = Subscription {
        user_id,
        active_until: req.active_until,
    };
    state.store().set_subscription(&subscription)?;
    tracing::info!(
        admin_id = %admin.admin_id,
        user_id = %subscription.user_id,
        active_until = %subscription.active_until,
        "Subscription updated"
    );
    Ok(ok(subscription))
}

async fn clear_subscription(
    admin: AdminAuthUser,
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let deleted = state.store().clear_subscription(&user_id)?;
    tracing::info!(admin_id = %admin.admin_id, user_id = %user_id, deleted, "Subscription cleared");
    Ok(ok(DeletedResponse { deleted }))
}
