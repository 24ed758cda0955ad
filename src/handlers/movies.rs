use crate::auth::AdminUser;
use crate::database;
use crate::handlers::common::{ApiError, api_error, json_body, not_found};
use crate::types::{
    AppState, Episode, EpisodeInput, EpisodeListResponse, Movie, MovieInput, MovieListResponse,
    MovieQuery, SuccessResponse,
};
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Serialize;
use tracing::info;

const DEFAULT_PAGE_SIZE: u32 = 20;

fn validate_movie(input: &MovieInput) -> Result<(), ApiError> {
    if input.title.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "title is required"));
    }
    if input.requires_payment && input.payment_amount.is_none_or(|a| a <= 0) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "payment_amount must be positive when requires_payment is set",
        ));
    }
    if let (Some(start), Some(end)) = (input.intro_start_seconds, input.intro_end_seconds) {
        if !start.is_finite() || !end.is_finite() || start < 0.0 || end <= start {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "intro_end_seconds must be greater than intro_start_seconds",
            ));
        }
    }
    Ok(())
}

fn validate_episode(input: &EpisodeInput) -> Result<(), ApiError> {
    if input.episode_number < 1 {
        return Err(api_error(StatusCode::BAD_REQUEST, "episode_number must be at least 1"));
    }
    if input.video_url.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "video_url is required"));
    }
    Ok(())
}

pub async fn list_movies(
    State(state): State<AppState>,
    Query(query): Query<MovieQuery>,
) -> Result<Json<MovieListResponse>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, 100);

    let total = database::count_movies(&state.db_pool, &query)
        .await
        .map_err(state.internal_err())? as u64;
    let items = database::list_movies(&state.db_pool, &query, page, page_size)
        .await
        .map_err(state.internal_err())?;

    Ok(Json(MovieListResponse {
        items,
        page,
        page_size,
        total,
        has_next: (page as u64) * (page_size as u64) < total,
        has_prev: page > 1,
    }))
}

pub async fn get_movie(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Movie>, ApiError> {
    database::get_movie(&state.db_pool, &id)
        .await
        .map_err(state.internal_err())?
        .map(Json)
        .ok_or_else(|| not_found("Movie"))
}

pub async fn list_episodes(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EpisodeListResponse>, ApiError> {
    if database::get_movie(&state.db_pool, &id)
        .await
        .map_err(state.internal_err())?
        .is_none()
    {
        return Err(not_found("Movie"));
    }
    let items = database::list_episodes(&state.db_pool, &id)
        .await
        .map_err(state.internal_err())?;
    Ok(Json(EpisodeListResponse { items }))
}

#[derive(Serialize)]
pub struct ViewCountResponse {
    pub view_count: i64,
}

pub async fn record_view(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ViewCountResponse>, ApiError> {
    let view_count = database::increment_view_count(&state.db_pool, &id)
        .await
        .map_err(state.internal_err())?
        .ok_or_else(|| not_found("Movie"))?;
    Ok(Json(ViewCountResponse { view_count }))
}

pub async fn create_movie(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    body: Result<Json<MovieInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Movie>), ApiError> {
    let input = json_body(body)?;
    validate_movie(&input)?;
    let movie = database::create_movie(&state.db_pool, &input, &admin.user_id)
        .await
        .map_err(state.internal_err())?;
    Ok((StatusCode::CREATED, Json(movie)))
}

pub async fn update_movie(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path(id): Path<String>,
    body: Result<Json<MovieInput>, JsonRejection>,
) -> Result<Json<Movie>, ApiError> {
    let input = json_body(body)?;
    validate_movie(&input)?;
    database::update_movie(&state.db_pool, &id, &input)
        .await
        .map_err(state.internal_err())?
        .map(Json)
        .ok_or_else(|| not_found("Movie"))
}

pub async fn delete_movie(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    if !database::delete_movie(&state.db_pool, &id)
        .await
        .map_err(state.internal_err())?
    {
        return Err(not_found("Movie"));
    }
    info!(movie_id = %id, admin = %admin.user_id, "movie deleted");
    Ok(Json(SuccessResponse { success: true }))
}

pub async fn create_episode(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path(id): Path<String>,
    body: Result<Json<EpisodeInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Episode>), ApiError> {
    let input = json_body(body)?;
    validate_episode(&input)?;
    if database::get_movie(&state.db_pool, &id)
        .await
        .map_err(state.internal_err())?
        .is_none()
    {
        return Err(not_found("Movie"));
    }
    let episode = database::create_episode(&state.db_pool, &id, &input)
        .await
        .map_err(state.conflict_or_internal("Episode number already exists for this movie"))?;
    Ok((StatusCode::CREATED, Json(episode)))
}

pub async fn update_episode(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path((id, episode_id)): Path<(String, String)>,
    body: Result<Json<EpisodeInput>, JsonRejection>,
) -> Result<Json<Episode>, ApiError> {
    let input = json_body(body)?;
    validate_episode(&input)?;
    database::update_episode(&state.db_pool, &id, &episode_id, &input)
        .await
        .map_err(state.conflict_or_internal("Episode number already exists for this movie"))?
        .map(Json)
        .ok_or_else(|| not_found("Episode"))
}

pub async fn delete_episode(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path((id, episode_id)): Path<(String, String)>,
) -> Result<Json<SuccessResponse>, ApiError> {
    if !database::delete_episode(&state.db_pool, &id, &episode_id)
        .await
        .map_err(state.internal_err())?
    {
        return Err(not_found("Episode"));
    }
    Ok(Json(SuccessResponse { success: true }))
}
