use crate::auth::{self, AuthUser, ClientContext};
use crate::database;
use crate::handlers::common::{ApiError, api_error, json_body};
use crate::types::{
    AppState, AuthResponse, BlockCheckResponse, LoginRequest, MeResponse, SignupRequest,
};
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use tracing::{info, warn};

const MIN_PASSWORD_LEN: usize = 8;

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}

/// Returns the first strength rule the password breaks.
fn password_problem(password: &str) -> Option<String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Some(format!("Password must be at least {} characters", MIN_PASSWORD_LEN));
    }
    let rules: [(fn(&char) -> bool, &str); 4] = [
        (char::is_ascii_uppercase, "an uppercase letter"),
        (char::is_ascii_lowercase, "a lowercase letter"),
        (char::is_ascii_digit, "a digit"),
        (|c| !c.is_alphanumeric(), "a special character"),
    ];
    rules
        .iter()
        .find(|(check, _)| !password.chars().any(|c| check(&c)))
        .map(|(_, what)| format!("Password must contain {}", what))
}

async fn reject_if_blocked(state: &AppState, client: &ClientContext) -> Result<(), ApiError> {
    let hit = database::is_device_blocked(
        &state.db_pool,
        client.fingerprint.as_deref(),
        client.ip.as_deref(),
    )
    .await
    .map_err(state.internal_err())?;

    if let Some(hit) = hit {
        warn!(ip = ?client.ip, fingerprint = ?client.fingerprint, "blocked client refused");
        let reason = hit
            .reason
            .map(|r| format!("Access blocked: {}", r))
            .unwrap_or_else(|| "Access blocked".to_string());
        return Err(api_error(StatusCode::FORBIDDEN, reason));
    }
    Ok(())
}

async fn remember_device(state: &AppState, user_id: &str, client: &ClientContext) {
    let Some(fingerprint) = client.fingerprint.as_deref() else {
        return;
    };
    if let Err(e) = database::record_device(
        &state.db_pool,
        user_id,
        fingerprint,
        client.ip.as_deref(),
        client.user_agent.as_deref(),
    )
    .await
    {
        warn!(error = ?e, user_id, "failed to record device info");
    }
}

pub async fn signup(
    State(state): State<AppState>,
    client: ClientContext,
    body: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let body = json_body(body)?;
    let email = normalize_email(&body.email);
    if !valid_email(&email) {
        return Err(api_error(StatusCode::BAD_REQUEST, "Invalid email address"));
    }
    if let Some(problem) = password_problem(&body.password) {
        return Err(api_error(StatusCode::BAD_REQUEST, problem));
    }

    reject_if_blocked(&state, &client).await?;

    let password_hash = auth::hash_password(&body.password).map_err(state.internal_err())?;
    let full_name = body
        .full_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    let (user, roles) = database::create_user(&state.db_pool, &email, &password_hash, full_name)
        .await
        .map_err(state.conflict_or_internal("Email already registered"))?;

    remember_device(&state, &user.id, &client).await;

    let (token, expires_at) = auth::generate_token(
        &user.id,
        &state.config.server.secret_key,
        state.config.server.token_ttl_secs,
    );

    info!(user_id = %user.id, "account created");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            expires_at,
            user,
            roles,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    client: ClientContext,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ApiError> {
    let body = json_body(body)?;
    let limiter_key = client.rate_limit_key().to_string();

    reject_if_blocked(&state, &client).await?;

    if let Some(retry_after) = state.auth_rate_limiter.locked_for(&limiter_key).await {
        return Err(api_error(
            StatusCode::TOO_MANY_REQUESTS,
            format!("Too many attempts, retry in {}s", retry_after.as_secs().max(1)),
        ));
    }

    let email = normalize_email(&body.email);
    let credentials = database::find_credentials(&state.db_pool, &email)
        .await
        .map_err(state.internal_err())?;

    let user_id = match credentials {
        Some(c) if auth::verify_password(&body.password, &c.password_hash) => c.id,
        _ => {
            if let Err(lockout) = state.auth_rate_limiter.record_failure(&limiter_key).await {
                warn!(client = %limiter_key, "sign-in locked out");
                return Err(api_error(
                    StatusCode::TOO_MANY_REQUESTS,
                    format!("Too many attempts, retry in {}s", lockout.as_secs()),
                ));
            }
            return Err(api_error(StatusCode::UNAUTHORIZED, "Invalid email or password"));
        }
    };

    state.auth_rate_limiter.reset(&limiter_key).await;

    let user = database::get_profile(&state.db_pool, &user_id)
        .await
        .map_err(state.internal_err())?
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "Invalid email or password"))?;
    let roles = database::get_roles(&state.db_pool, &user_id)
        .await
        .map_err(state.internal_err())?;

    remember_device(&state, &user_id, &client).await;

    let (token, expires_at) = auth::generate_token(
        &user_id,
        &state.config.server.secret_key,
        state.config.server.token_ttl_secs,
    );

    Ok(Json(AuthResponse {
        token,
        expires_at,
        user,
        roles,
    }))
}

pub async fn me(State(state): State<AppState>, user: AuthUser) -> Result<Json<MeResponse>, ApiError> {
    let profile = database::get_profile(&state.db_pool, &user.user_id)
        .await
        .map_err(state.internal_err())?
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "Invalid token"))?;
    Ok(Json(MeResponse {
        user: profile,
        roles: user.roles,
    }))
}

/// Lets a client learn whether it is blocked before showing the sign-in form.
pub async fn check_device(
    State(state): State<AppState>,
    client: ClientContext,
) -> Result<Json<BlockCheckResponse>, ApiError> {
    let hit = database::is_device_blocked(
        &state.db_pool,
        client.fingerprint.as_deref(),
        client.ip.as_deref(),
    )
    .await
    .map_err(state.internal_err())?;

    Ok(Json(BlockCheckResponse {
        blocked: hit.is_some(),
        reason: hit.and_then(|h| h.reason),
    }))
}
