use crate::auth::AuthUser;
use crate::database;
use crate::handlers::common::{ApiError, not_found};
use crate::types::{AppState, NotificationListResponse};
use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;

pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<NotificationListResponse>, ApiError> {
    let items = database::list_notifications(&state.db_pool, &user.user_id)
        .await
        .map_err(state.internal_err())?;
    let unread_count = items.iter().filter(|n| !n.is_read).count();
    Ok(Json(NotificationListResponse {
        items,
        unread_count,
    }))
}

#[derive(Serialize)]
pub struct MarkReadResponse {
    pub updated: u64,
}

pub async fn mark_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    if !database::mark_notification_read(&state.db_pool, &user.user_id, &id)
        .await
        .map_err(state.internal_err())?
    {
        return Err(not_found("Notification"));
    }
    Ok(Json(MarkReadResponse { updated: 1 }))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let updated = database::mark_all_notifications_read(&state.db_pool, &user.user_id)
        .await
        .map_err(state.internal_err())?;
    Ok(Json(MarkReadResponse { updated }))
}
