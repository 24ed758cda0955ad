use crate::config::test_config;
use crate::rate_limit::AuthRateLimiter;
use crate::storage;
use crate::types::{AppState, Movie};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub fn sample_movie(id: &str) -> Movie {
    Movie {
        id: id.to_string(),
        title: "Sample".into(),
        description: None,
        poster_url: Some("https://cdn.example.com/posters/1.jpg".into()),
        video_url: Some("https://cdn.example.com/videos/1.mp4".into()),
        genre: vec![],
        release_year: Some(2024),
        duration: Some(5400),
        actors: vec![],
        director: None,
        imdb_rating: None,
        view_count: 0,
        is_featured: false,
        display_order: 0,
        requires_payment: false,
        payment_amount: None,
        payment_image_url: None,
        ad_enabled: false,
        ad_video_url: None,
        ad_position: None,
        ad_show_on_load: false,
        intro_start_seconds: None,
        intro_end_seconds: None,
        has_episodes: false,
        episode_count: 0,
        created_at: String::new(),
        updated_at: String::new(),
    }
}

/// Single connection, so the in-memory database is shared by every query.
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations apply");
    pool
}

pub async fn test_state() -> AppState {
    let config = test_config();
    AppState {
        s3: storage::s3_client(&config.storage),
        db_pool: test_pool().await,
        chunked_uploads: Arc::new(RwLock::new(HashMap::new())),
        auth_rate_limiter: AuthRateLimiter::new(),
        config,
    }
}
