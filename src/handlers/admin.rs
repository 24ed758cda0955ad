use crate::auth::{AdminUser, AuthUser, ClientContext};
use crate::database::{self, SecurityEvent};
use crate::handlers::common::{
    ApiError, api_error, is_uuid, json_body, not_found, optional_json_body,
};
use crate::types::{
    AppState, BlockDeviceRequest, BlockIpRequest, BlockUserRequest, BlockUserResponse,
    BlockedDevice, BlockedIp, DeleteUserRequest, Role, SuccessResponse, UserWithDevices,
};
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde_json::json;
use tracing::{info, warn};

fn trimmed(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

pub async fn list_users(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
) -> Result<Json<Vec<UserWithDevices>>, ApiError> {
    let users = database::list_users_with_devices(&state.db_pool)
        .await
        .map_err(state.internal_err())?;
    Ok(Json(users))
}

pub async fn block_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<String>,
    body: Result<Json<BlockUserRequest>, JsonRejection>,
) -> Result<Json<BlockUserResponse>, ApiError> {
    let reason = trimmed(optional_json_body(body)?.reason);

    if database::get_profile(&state.db_pool, &user_id)
        .await
        .map_err(state.internal_err())?
        .is_none()
    {
        return Err(not_found("User"));
    }

    let (devices_blocked, ips_blocked) =
        database::block_user_devices(&state.db_pool, &user_id, reason.as_deref(), &admin.user_id)
            .await
            .map_err(state.internal_err())?;

    info!(
        user_id = %user_id,
        devices_blocked,
        ips_blocked,
        admin = %admin.user_id,
        "user devices blocked"
    );
    Ok(Json(BlockUserResponse {
        devices_blocked,
        ips_blocked,
    }))
}

/// Checks run in a fixed order: authentication, body shape, self-deletion,
/// caller role, target role. Role failures are written to the audit log.
pub async fn delete_user(
    State(state): State<AppState>,
    caller: AuthUser,
    client: ClientContext,
    body: Result<Json<DeleteUserRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let body = json_body(body)?;
    let target = body
        .user_id
        .map(|id| id.trim().to_string())
        .filter(|id| is_uuid(id))
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "userId must be a valid UUID"))?;

    if target.eq_ignore_ascii_case(&caller.user_id) {
        return Err(api_error(StatusCode::BAD_REQUEST, "Cannot delete your own account"));
    }

    let audit = |action: &'static str, metadata: serde_json::Value| SecurityEvent {
        user_id: Some(caller.user_id.as_str()),
        action,
        resource_type: "user",
        resource_id: Some(target.as_str()),
        metadata,
        ip_address: client.ip.as_deref(),
        user_agent: client.user_agent.as_deref(),
    };

    if !caller.is_admin() {
        warn!(caller = %caller.user_id, target = %target, "non-admin attempted user deletion");
        database::log_security_event(
            &state.db_pool,
            &audit("UNAUTHORIZED_DELETE_ATTEMPT", json!({ "reason": "caller is not an admin" })),
        )
        .await
        .map_err(state.internal_err())?;
        return Err(api_error(StatusCode::FORBIDDEN, "Admin access required"));
    }

    let target_is_admin = database::has_role(&state.db_pool, &target, Role::Admin)
        .await
        .map_err(state.internal_err())?;
    if target_is_admin {
        warn!(caller = %caller.user_id, target = %target, "attempt to delete an admin blocked");
        database::log_security_event(
            &state.db_pool,
            &audit("ADMIN_DELETE_BLOCKED", json!({ "reason": "target is an admin" })),
        )
        .await
        .map_err(state.internal_err())?;
        return Err(api_error(StatusCode::FORBIDDEN, "Cannot delete an admin account"));
    }

    let profile = database::get_profile(&state.db_pool, &target)
        .await
        .map_err(state.internal_err())?
        .ok_or_else(|| not_found("User"))?;

    database::log_security_event(
        &state.db_pool,
        &audit("USER_DELETED", json!({ "email": profile.email })),
    )
    .await
    .map_err(state.internal_err())?;

    database::delete_user(&state.db_pool, &target)
        .await
        .map_err(state.internal_err())?;

    info!(target = %target, admin = %caller.user_id, "user deleted");
    Ok(Json(SuccessResponse { success: true }))
}

// ---------------------------------------------------------------------------
// Blocklist
// ---------------------------------------------------------------------------

pub async fn list_blocked_devices(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
) -> Result<Json<Vec<BlockedDevice>>, ApiError> {
    let rows = database::list_blocked_devices(&state.db_pool)
        .await
        .map_err(state.internal_err())?;
    Ok(Json(rows))
}

pub async fn block_device(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    body: Result<Json<BlockDeviceRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BlockedDevice>), ApiError> {
    let body = json_body(body)?;
    let fingerprint = body.fingerprint.trim();
    if fingerprint.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "fingerprint is required"));
    }
    let ip = trimmed(body.ip_address);
    let reason = trimmed(body.reason);

    let row = database::block_device(
        &state.db_pool,
        fingerprint,
        ip.as_deref(),
        reason.as_deref(),
        &admin.user_id,
    )
    .await
    .map_err(state.conflict_or_internal("Device is already blocked"))?;
    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn unblock_device(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    if !database::unblock_device(&state.db_pool, &id)
        .await
        .map_err(state.internal_err())?
    {
        return Err(not_found("Blocked device"));
    }
    Ok(Json(SuccessResponse { success: true }))
}

pub async fn list_blocked_ips(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
) -> Result<Json<Vec<BlockedIp>>, ApiError> {
    let rows = database::list_blocked_ips(&state.db_pool)
        .await
        .map_err(state.internal_err())?;
    Ok(Json(rows))
}

pub async fn block_ip(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    body: Result<Json<BlockIpRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BlockedIp>), ApiError> {
    let body = json_body(body)?;
    let ip = body.ip_address.trim();
    if ip.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "ip_address is required"));
    }
    let reason = trimmed(body.reason);

    let row = database::block_ip(&state.db_pool, ip, reason.as_deref(), &admin.user_id)
        .await
        .map_err(state.conflict_or_internal("IP address is already blocked"))?;
    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn unblock_ip(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    if !database::unblock_ip(&state.db_pool, &id)
        .await
        .map_err(state.internal_err())?
    {
        return Err(not_found("Blocked IP"));
    }
    Ok(Json(SuccessResponse { success: true }))
}
