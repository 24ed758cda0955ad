use crate::access::{self, AccessDecision};
use crate::auth::AuthUser;
use crate::database;
use crate::handlers::common::{ApiError, api_error, json_body, not_found};
use crate::playback::player_config;
use crate::types::{
    AccessResponse, AppState, Movie, PaymentStatus, PlayerConfig, PlayerQuery,
    SaveProgressRequest, SuccessResponse, WatchProgress,
};
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use tracing::debug;

async fn load_movie(state: &AppState, id: &str) -> Result<Movie, ApiError> {
    database::get_movie(&state.db_pool, id)
        .await
        .map_err(state.internal_err())?
        .ok_or_else(|| not_found("Movie"))
}

/// Approved anywhere wins; otherwise the latest request decides.
async fn payment_status(
    state: &AppState,
    user_id: &str,
    movie_id: &str,
) -> Result<Option<PaymentStatus>, ApiError> {
    if database::has_paid_for_movie(&state.db_pool, user_id, movie_id)
        .await
        .map_err(state.internal_err())?
    {
        return Ok(Some(PaymentStatus::Approved));
    }
    database::latest_payment_status(&state.db_pool, user_id, movie_id)
        .await
        .map_err(state.internal_err())
}

async fn evaluate(
    state: &AppState,
    user: Option<&AuthUser>,
    movie: &Movie,
) -> Result<(AccessDecision, Option<PaymentStatus>), ApiError> {
    let status = match user {
        Some(user) if movie.requires_payment => payment_status(state, &user.user_id, &movie.id).await?,
        _ => None,
    };
    Ok((
        access::decide(user.is_some(), movie.requires_payment, status),
        status,
    ))
}

pub async fn get_access(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<AccessResponse>, ApiError> {
    let movie = load_movie(&state, &id).await?;
    let (decision, payment_status) = evaluate(&state, user.as_ref(), &movie).await?;
    Ok(Json(AccessResponse {
        movie_id: movie.id,
        decision,
        payment_status,
        payment_amount: movie.payment_amount.filter(|_| movie.requires_payment),
    }))
}

pub async fn get_player(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Query(query): Query<PlayerQuery>,
) -> Result<Json<PlayerConfig>, ApiError> {
    let movie = load_movie(&state, &id).await?;

    match evaluate(&state, Some(&user), &movie).await?.0 {
        AccessDecision::Player => {}
        AccessDecision::Login => {
            return Err(api_error(StatusCode::UNAUTHORIZED, "Sign in to watch"));
        }
        AccessDecision::Payment => {
            return Err(api_error(StatusCode::PAYMENT_REQUIRED, "Payment required"));
        }
        AccessDecision::PaymentPending => {
            return Err(api_error(
                StatusCode::FORBIDDEN,
                "Payment is awaiting review",
            ));
        }
    }

    let episodes = if movie.has_episodes {
        database::list_episodes(&state.db_pool, &movie.id)
            .await
            .map_err(state.internal_err())?
    } else {
        Vec::new()
    };

    let saved = database::get_watch_progress(&state.db_pool, &user.user_id, &movie.id)
        .await
        .map_err(state.internal_err())?
        .map(|p| p.progress_seconds)
        .unwrap_or(0.0);

    let config = player_config(&movie, &episodes, query.episode, saved)
        .ok_or_else(|| not_found("Playable source"))?;

    debug!(
        movie_id = %movie.id,
        episode = ?config.episode,
        ad = config.ad.is_some(),
        "player config issued"
    );

    Ok(Json(config))
}

pub async fn get_progress(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Option<WatchProgress>>, ApiError> {
    let progress = database::get_watch_progress(&state.db_pool, &user.user_id, &id)
        .await
        .map_err(state.internal_err())?;
    Ok(Json(progress))
}

fn valid_seconds(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

pub async fn save_progress(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    body: Result<Json<SaveProgressRequest>, JsonRejection>,
) -> Result<Json<WatchProgress>, ApiError> {
    let body = json_body(body)?;
    if !valid_seconds(body.progress_seconds) || !body.duration_seconds.is_none_or(valid_seconds) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "progress_seconds and duration_seconds must be non-negative numbers",
        ));
    }
    load_movie(&state, &id).await?;

    let progress = database::save_watch_progress(
        &state.db_pool,
        &user.user_id,
        &id,
        body.progress_seconds,
        body.duration_seconds,
    )
    .await
    .map_err(state.internal_err())?;
    Ok(Json(progress))
}

pub async fn clear_progress(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    database::clear_watch_progress(&state.db_pool, &user.user_id, &id)
        .await
        .map_err(state.internal_err())?;
    Ok(Json(SuccessResponse { success: true }))
}
