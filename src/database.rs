use crate::types::{
    BlockedDevice, BlockedIp, ComplaintDetail, ComplaintStatus, DeviceInfo, Episode, EpisodeInput,
    Movie, MovieInput, MovieQuery, Notification, PaymentComplaint, PaymentRequest,
    PaymentRequestDetail, PaymentStatus, Profile, Role, UserWithDevices, WatchProgress,
};
use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool, migrate::MigrateDatabase};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

pub async fn initialize_database(database_url: &str) -> Result<SqlitePool> {
    if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
        info!("Creating database: {}", database_url);
        Sqlite::create_database(database_url)
            .await
            .context("Failed to create database")?;
    }

    let db_pool = SqlitePool::connect(database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .context("Failed to run migrations")?;

    info!("Database initialized successfully");

    Ok(db_pool)
}

/// RFC 3339 UTC with microseconds. Fixed width, so text ordering is time ordering.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// True when the error chain bottoms out in a UNIQUE constraint failure.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .is_some_and(|e| e.is_unique_violation())
}

// ---------------------------------------------------------------------------
// Profiles, roles and devices
// ---------------------------------------------------------------------------

/// Creates a profile with the `user` role. The very first account also gets `admin`.
pub async fn create_user(
    db_pool: &SqlitePool,
    email: &str,
    password_hash: &str,
    full_name: Option<&str>,
) -> Result<(Profile, Vec<Role>)> {
    let mut tx = db_pool.begin().await?;

    let first = is_first_user(&mut *tx).await?;

    let id = new_id();
    let now = timestamp();
    sqlx::query(
        "INSERT INTO profiles (id, email, password_hash, full_name, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(email)
    .bind(password_hash)
    .bind(full_name)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    let mut roles = vec![Role::User];
    if first {
        roles.push(Role::Admin);
    }
    for role in &roles {
        sqlx::query("INSERT INTO user_roles (id, user_id, role, created_at) VALUES (?, ?, ?, ?)")
            .bind(new_id())
            .bind(&id)
            .bind(role)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    if first {
        info!("First account {} granted admin role", email);
    }

    let profile = Profile {
        id,
        email: email.to_string(),
        full_name: full_name.map(String::from),
        avatar_url: None,
        created_at: now,
    };
    Ok((profile, roles))
}

/// Runs on the pool or inside a transaction, so signup can decide the
/// admin grant atomically.
pub async fn is_first_user<'e, E>(executor: E) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM profiles")
        .fetch_one(executor)
        .await?;
    Ok(count == 0)
}

#[derive(sqlx::FromRow)]
pub struct Credentials {
    pub id: String,
    pub password_hash: String,
}

pub async fn find_credentials(db_pool: &SqlitePool, email: &str) -> Result<Option<Credentials>> {
    let row = sqlx::query_as::<_, Credentials>(
        "SELECT id, password_hash FROM profiles WHERE email = ?",
    )
    .bind(email)
    .fetch_optional(db_pool)
    .await?;
    Ok(row)
}

pub async fn get_profile(db_pool: &SqlitePool, user_id: &str) -> Result<Option<Profile>> {
    let profile = sqlx::query_as::<_, Profile>(
        "SELECT id, email, full_name, avatar_url, created_at FROM profiles WHERE id = ?",
    )
    .bind(user_id)
    .fetch_optional(db_pool)
    .await?;
    Ok(profile)
}

pub async fn get_roles(db_pool: &SqlitePool, user_id: &str) -> Result<Vec<Role>> {
    let roles = sqlx::query_scalar::<_, Role>(
        "SELECT role FROM user_roles WHERE user_id = ? ORDER BY role",
    )
    .bind(user_id)
    .fetch_all(db_pool)
    .await?;
    Ok(roles)
}

pub async fn has_role(db_pool: &SqlitePool, user_id: &str, role: Role) -> Result<bool> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM user_roles WHERE user_id = ? AND role = ?")
            .bind(user_id)
            .bind(role)
            .fetch_optional(db_pool)
            .await?;
    Ok(found.is_some())
}

/// Inserts or refreshes the device row for a successful sign-in.
pub async fn record_device(
    db_pool: &SqlitePool,
    user_id: &str,
    fingerprint: &str,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> Result<()> {
    let now = timestamp();
    sqlx::query(
        "INSERT INTO user_device_info (id, user_id, fingerprint, ip_address, user_agent, created_at, last_seen_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (user_id, fingerprint) DO UPDATE SET \
           ip_address = excluded.ip_address, \
           user_agent = excluded.user_agent, \
           last_seen_at = excluded.last_seen_at",
    )
    .bind(new_id())
    .bind(user_id)
    .bind(fingerprint)
    .bind(ip_address)
    .bind(user_agent)
    .bind(&now)
    .bind(&now)
    .execute(db_pool)
    .await?;
    Ok(())
}

pub async fn get_user_devices(db_pool: &SqlitePool, user_id: &str) -> Result<Vec<DeviceInfo>> {
    let devices = sqlx::query_as::<_, DeviceInfo>(
        "SELECT user_id, fingerprint, ip_address, user_agent, last_seen_at \
         FROM user_device_info WHERE user_id = ? ORDER BY last_seen_at DESC",
    )
    .bind(user_id)
    .fetch_all(db_pool)
    .await?;
    Ok(devices)
}

pub async fn list_users_with_devices(db_pool: &SqlitePool) -> Result<Vec<UserWithDevices>> {
    let profiles = sqlx::query_as::<_, Profile>(
        "SELECT id, email, full_name, avatar_url, created_at FROM profiles ORDER BY created_at DESC",
    )
    .fetch_all(db_pool)
    .await?;

    let devices = sqlx::query_as::<_, DeviceInfo>(
        "SELECT user_id, fingerprint, ip_address, user_agent, last_seen_at \
         FROM user_device_info ORDER BY last_seen_at DESC",
    )
    .fetch_all(db_pool)
    .await?;

    let mut by_user: HashMap<String, Vec<DeviceInfo>> = HashMap::new();
    for device in devices {
        by_user.entry(device.user_id.clone()).or_default().push(device);
    }

    Ok(profiles
        .into_iter()
        .map(|p| UserWithDevices {
            devices: by_user.remove(&p.id).unwrap_or_default(),
            id: p.id,
            email: p.email,
            full_name: p.full_name,
            created_at: p.created_at,
        })
        .collect())
}

/// Removes every row owned by the user, then the profile, in one transaction.
/// Returns false when no such profile existed.
pub async fn delete_user(db_pool: &SqlitePool, user_id: &str) -> Result<bool> {
    let mut tx = db_pool.begin().await?;

    sqlx::query("DELETE FROM user_device_info WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM watch_history WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "DELETE FROM payment_complaints WHERE user_id = ? \
         OR payment_request_id IN (SELECT id FROM payment_requests WHERE user_id = ?)",
    )
    .bind(user_id)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM payment_requests WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM notifications WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM user_roles WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    let result = sqlx::query("DELETE FROM profiles WHERE id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(result.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

pub struct SecurityEvent<'a> {
    pub user_id: Option<&'a str>,
    pub action: &'a str,
    pub resource_type: &'a str,
    pub resource_id: Option<&'a str>,
    pub metadata: serde_json::Value,
    pub ip_address: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

pub async fn log_security_event(db_pool: &SqlitePool, event: &SecurityEvent<'_>) -> Result<()> {
    sqlx::query(
        "INSERT INTO security_audit_log \
         (id, user_id, action, resource_type, resource_id, metadata, ip_address, user_agent, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(new_id())
    .bind(event.user_id)
    .bind(event.action)
    .bind(event.resource_type)
    .bind(event.resource_id)
    .bind(event.metadata.to_string())
    .bind(event.ip_address)
    .bind(event.user_agent)
    .bind(timestamp())
    .execute(db_pool)
    .await?;

    info!(
        action = event.action,
        resource_type = event.resource_type,
        resource_id = ?event.resource_id,
        "security event recorded"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Movies and episodes
// ---------------------------------------------------------------------------

fn push_movie_filters<'a>(qb: &mut QueryBuilder<'a, Sqlite>, filters: &'a MovieQuery) {
    qb.push(" WHERE 1 = 1");
    if let Some(genre) = filters.genre.as_deref().filter(|g| !g.is_empty()) {
        qb.push(" AND EXISTS (SELECT 1 FROM json_each(movies.genre) WHERE json_each.value = ")
            .push_bind(genre)
            .push(")");
    }
    if let Some(q) = filters.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        qb.push(" AND instr(lower(title), ")
            .push_bind(q.to_lowercase())
            .push(") > 0");
    }
    if let Some(featured) = filters.featured {
        qb.push(" AND is_featured = ").push_bind(featured);
    }
}

pub async fn count_movies(db_pool: &SqlitePool, filters: &MovieQuery) -> Result<i64> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM movies");
    push_movie_filters(&mut qb, filters);
    let count = qb.build_query_scalar::<i64>().fetch_one(db_pool).await?;
    Ok(count)
}

pub async fn list_movies(
    db_pool: &SqlitePool,
    filters: &MovieQuery,
    page: u32,
    page_size: u32,
) -> Result<Vec<Movie>> {
    let page = if page == 0 { 1 } else { page };
    let page_size = page_size.clamp(1, 100);

    let limit = page_size as i64;
    let offset = ((page - 1) as i64) * limit;

    let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM movies");
    push_movie_filters(&mut qb, filters);
    qb.push(" ORDER BY display_order ASC, created_at DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    let movies = qb.build_query_as::<Movie>().fetch_all(db_pool).await?;
    Ok(movies)
}

pub async fn get_movie(db_pool: &SqlitePool, movie_id: &str) -> Result<Option<Movie>> {
    let movie = sqlx::query_as::<_, Movie>("SELECT * FROM movies WHERE id = ?")
        .bind(movie_id)
        .fetch_optional(db_pool)
        .await?;
    Ok(movie)
}

pub async fn create_movie(
    db_pool: &SqlitePool,
    input: &MovieInput,
    created_by: &str,
) -> Result<Movie> {
    let id = new_id();
    let now = timestamp();
    sqlx::query(
        "INSERT INTO movies (id, title, description, poster_url, video_url, genre, release_year, duration, \
         actors, director, imdb_rating, is_featured, display_order, requires_payment, payment_amount, \
         payment_image_url, ad_enabled, ad_video_url, ad_position, ad_show_on_load, intro_start_seconds, \
         intro_end_seconds, has_episodes, created_by, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&input.title)
    .bind(&input.description)
    .bind(&input.poster_url)
    .bind(&input.video_url)
    .bind(serde_json::to_string(&input.genre)?)
    .bind(input.release_year)
    .bind(input.duration)
    .bind(serde_json::to_string(&input.actors)?)
    .bind(&input.director)
    .bind(input.imdb_rating)
    .bind(input.is_featured)
    .bind(input.display_order)
    .bind(input.requires_payment)
    .bind(input.payment_amount)
    .bind(&input.payment_image_url)
    .bind(input.ad_enabled)
    .bind(&input.ad_video_url)
    .bind(&input.ad_position)
    .bind(input.ad_show_on_load)
    .bind(input.intro_start_seconds)
    .bind(input.intro_end_seconds)
    .bind(input.has_episodes)
    .bind(created_by)
    .bind(&now)
    .bind(&now)
    .execute(db_pool)
    .await?;

    info!("Movie saved to database: id={}, title={}", id, input.title);

    get_movie(db_pool, &id)
        .await?
        .context("movie vanished after insert")
}

pub async fn update_movie(
    db_pool: &SqlitePool,
    movie_id: &str,
    input: &MovieInput,
) -> Result<Option<Movie>> {
    let result = sqlx::query(
        "UPDATE movies SET title = ?, description = ?, poster_url = ?, video_url = ?, genre = ?, \
         release_year = ?, duration = ?, actors = ?, director = ?, imdb_rating = ?, is_featured = ?, \
         display_order = ?, requires_payment = ?, payment_amount = ?, payment_image_url = ?, \
         ad_enabled = ?, ad_video_url = ?, ad_position = ?, ad_show_on_load = ?, \
         intro_start_seconds = ?, intro_end_seconds = ?, has_episodes = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(&input.title)
    .bind(&input.description)
    .bind(&input.poster_url)
    .bind(&input.video_url)
    .bind(serde_json::to_string(&input.genre)?)
    .bind(input.release_year)
    .bind(input.duration)
    .bind(serde_json::to_string(&input.actors)?)
    .bind(&input.director)
    .bind(input.imdb_rating)
    .bind(input.is_featured)
    .bind(input.display_order)
    .bind(input.requires_payment)
    .bind(input.payment_amount)
    .bind(&input.payment_image_url)
    .bind(input.ad_enabled)
    .bind(&input.ad_video_url)
    .bind(&input.ad_position)
    .bind(input.ad_show_on_load)
    .bind(input.intro_start_seconds)
    .bind(input.intro_end_seconds)
    .bind(input.has_episodes)
    .bind(timestamp())
    .bind(movie_id)
    .execute(db_pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    get_movie(db_pool, movie_id).await
}

pub async fn delete_movie(db_pool: &SqlitePool, movie_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM movies WHERE id = ?")
        .bind(movie_id)
        .execute(db_pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn increment_view_count(db_pool: &SqlitePool, movie_id: &str) -> Result<Option<i64>> {
    let count: Option<i64> = sqlx::query_scalar(
        "UPDATE movies SET view_count = view_count + 1 WHERE id = ? RETURNING view_count",
    )
    .bind(movie_id)
    .fetch_optional(db_pool)
    .await?;
    Ok(count)
}

pub async fn list_episodes(db_pool: &SqlitePool, movie_id: &str) -> Result<Vec<Episode>> {
    let episodes = sqlx::query_as::<_, Episode>(
        "SELECT id, movie_id, episode_number, title, video_url, duration, created_at, updated_at \
         FROM episodes WHERE movie_id = ? ORDER BY episode_number ASC",
    )
    .bind(movie_id)
    .fetch_all(db_pool)
    .await?;
    Ok(episodes)
}

async fn sync_episode_count(
    conn: &mut sqlx::SqliteConnection,
    movie_id: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE movies SET episode_count = (SELECT COUNT(*) FROM episodes WHERE movie_id = ?), \
         updated_at = ? WHERE id = ?",
    )
    .bind(movie_id)
    .bind(timestamp())
    .bind(movie_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Fails with a unique violation when the episode number is taken.
pub async fn create_episode(
    db_pool: &SqlitePool,
    movie_id: &str,
    input: &EpisodeInput,
) -> Result<Episode> {
    let mut tx = db_pool.begin().await?;
    let now = timestamp();
    let episode = Episode {
        id: new_id(),
        movie_id: movie_id.to_string(),
        episode_number: input.episode_number,
        title: input.title.clone(),
        video_url: input.video_url.clone(),
        duration: input.duration,
        created_at: now.clone(),
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO episodes (id, movie_id, episode_number, title, video_url, duration, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&episode.id)
    .bind(&episode.movie_id)
    .bind(episode.episode_number)
    .bind(&episode.title)
    .bind(&episode.video_url)
    .bind(episode.duration)
    .bind(&episode.created_at)
    .bind(&episode.updated_at)
    .execute(&mut *tx)
    .await?;

    sync_episode_count(&mut tx, movie_id).await?;
    tx.commit().await?;

    Ok(episode)
}

pub async fn update_episode(
    db_pool: &SqlitePool,
    movie_id: &str,
    episode_id: &str,
    input: &EpisodeInput,
) -> Result<Option<Episode>> {
    let episode = sqlx::query_as::<_, Episode>(
        "UPDATE episodes SET episode_number = ?, title = ?, video_url = ?, duration = ?, updated_at = ? \
         WHERE id = ? AND movie_id = ? \
         RETURNING id, movie_id, episode_number, title, video_url, duration, created_at, updated_at",
    )
    .bind(input.episode_number)
    .bind(&input.title)
    .bind(&input.video_url)
    .bind(input.duration)
    .bind(timestamp())
    .bind(episode_id)
    .bind(movie_id)
    .fetch_optional(db_pool)
    .await?;
    Ok(episode)
}

pub async fn delete_episode(db_pool: &SqlitePool, movie_id: &str, episode_id: &str) -> Result<bool> {
    let mut tx = db_pool.begin().await?;
    let result = sqlx::query("DELETE FROM episodes WHERE id = ? AND movie_id = ?")
        .bind(episode_id)
        .bind(movie_id)
        .execute(&mut *tx)
        .await?;
    sync_episode_count(&mut tx, movie_id).await?;
    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// Watch history
// ---------------------------------------------------------------------------

pub async fn get_watch_progress(
    db_pool: &SqlitePool,
    user_id: &str,
    movie_id: &str,
) -> Result<Option<WatchProgress>> {
    let progress = sqlx::query_as::<_, WatchProgress>(
        "SELECT movie_id, progress_seconds, duration_seconds, last_watched_at \
         FROM watch_history WHERE user_id = ? AND movie_id = ?",
    )
    .bind(user_id)
    .bind(movie_id)
    .fetch_optional(db_pool)
    .await?;
    Ok(progress)
}

pub async fn save_watch_progress(
    db_pool: &SqlitePool,
    user_id: &str,
    movie_id: &str,
    progress_seconds: f64,
    duration_seconds: Option<f64>,
) -> Result<WatchProgress> {
    let progress = sqlx::query_as::<_, WatchProgress>(
        "INSERT INTO watch_history (id, user_id, movie_id, progress_seconds, duration_seconds, last_watched_at) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT (user_id, movie_id) DO UPDATE SET \
           progress_seconds = excluded.progress_seconds, \
           duration_seconds = COALESCE(excluded.duration_seconds, watch_history.duration_seconds), \
           last_watched_at = excluded.last_watched_at \
         RETURNING movie_id, progress_seconds, duration_seconds, last_watched_at",
    )
    .bind(new_id())
    .bind(user_id)
    .bind(movie_id)
    .bind(progress_seconds)
    .bind(duration_seconds)
    .bind(timestamp())
    .fetch_one(db_pool)
    .await?;
    Ok(progress)
}

pub async fn clear_watch_progress(db_pool: &SqlitePool, user_id: &str, movie_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM watch_history WHERE user_id = ? AND movie_id = ?")
        .bind(user_id)
        .bind(movie_id)
        .execute(db_pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// Payment requests
// ---------------------------------------------------------------------------

const PAYMENT_COLUMNS: &str = "id, user_id, movie_id, amount, proof_image_url, status, admin_id, \
                               admin_note, created_at, updated_at";

pub async fn has_paid_for_movie(db_pool: &SqlitePool, user_id: &str, movie_id: &str) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM payment_requests WHERE user_id = ? AND movie_id = ? AND status = 'approved' LIMIT 1",
    )
    .bind(user_id)
    .bind(movie_id)
    .fetch_optional(db_pool)
    .await?;
    Ok(found.is_some())
}

/// Status of the most recent request, if the user ever submitted one.
pub async fn latest_payment_status(
    db_pool: &SqlitePool,
    user_id: &str,
    movie_id: &str,
) -> Result<Option<PaymentStatus>> {
    let status = sqlx::query_scalar::<_, PaymentStatus>(
        "SELECT status FROM payment_requests WHERE user_id = ? AND movie_id = ? \
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(user_id)
    .bind(movie_id)
    .fetch_optional(db_pool)
    .await?;
    Ok(status)
}

/// Fails with a unique violation while another pending or approved request exists.
pub async fn create_payment_request(
    db_pool: &SqlitePool,
    user_id: &str,
    movie_id: &str,
    amount: i64,
    proof_image_url: &str,
) -> Result<PaymentRequest> {
    let now = timestamp();
    let payment = sqlx::query_as::<_, PaymentRequest>(&format!(
        "INSERT INTO payment_requests (id, user_id, movie_id, amount, proof_image_url, status, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, 'pending', ?, ?) RETURNING {}",
        PAYMENT_COLUMNS
    ))
    .bind(new_id())
    .bind(user_id)
    .bind(movie_id)
    .bind(amount)
    .bind(proof_image_url)
    .bind(&now)
    .bind(&now)
    .fetch_one(db_pool)
    .await?;
    Ok(payment)
}

pub async fn get_payment_request(db_pool: &SqlitePool, id: &str) -> Result<Option<PaymentRequest>> {
    let payment = sqlx::query_as::<_, PaymentRequest>(&format!(
        "SELECT {} FROM payment_requests WHERE id = ?",
        PAYMENT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(db_pool)
    .await?;
    Ok(payment)
}

pub async fn list_user_payment_requests(
    db_pool: &SqlitePool,
    user_id: &str,
) -> Result<Vec<PaymentRequest>> {
    let payments = sqlx::query_as::<_, PaymentRequest>(&format!(
        "SELECT {} FROM payment_requests WHERE user_id = ? ORDER BY created_at DESC",
        PAYMENT_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(db_pool)
    .await?;
    Ok(payments)
}

pub async fn list_payment_requests(
    db_pool: &SqlitePool,
    status: Option<PaymentStatus>,
) -> Result<Vec<PaymentRequestDetail>> {
    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT pr.id, pr.user_id, pr.movie_id, pr.amount, pr.proof_image_url, pr.status, pr.admin_id, \
         pr.admin_note, pr.created_at, pr.updated_at, \
         p.email AS user_email, p.full_name AS user_full_name, \
         m.title AS movie_title, m.poster_url AS movie_poster_url \
         FROM payment_requests pr \
         LEFT JOIN profiles p ON p.id = pr.user_id \
         LEFT JOIN movies m ON m.id = pr.movie_id",
    );
    if let Some(status) = status {
        qb.push(" WHERE pr.status = ").push_bind(status);
    }
    qb.push(" ORDER BY pr.created_at DESC");

    let rows = qb
        .build_query_as::<PaymentRequestDetail>()
        .fetch_all(db_pool)
        .await?;
    Ok(rows)
}

/// Moves a pending request to its final status. `None` when the request was
/// not pending any more.
pub async fn review_payment_request(
    db_pool: &SqlitePool,
    id: &str,
    status: PaymentStatus,
    admin_id: &str,
    note: Option<&str>,
) -> Result<Option<PaymentRequest>> {
    let payment = sqlx::query_as::<_, PaymentRequest>(&format!(
        "UPDATE payment_requests SET status = ?, admin_id = ?, admin_note = ?, updated_at = ? \
         WHERE id = ? AND status = 'pending' RETURNING {}",
        PAYMENT_COLUMNS
    ))
    .bind(status)
    .bind(admin_id)
    .bind(note)
    .bind(timestamp())
    .bind(id)
    .fetch_optional(db_pool)
    .await?;
    Ok(payment)
}

// ---------------------------------------------------------------------------
// Complaints
// ---------------------------------------------------------------------------

const COMPLAINT_COLUMNS: &str = "id, payment_request_id, user_id, reason, image_url, status, \
                                 admin_response, created_at, updated_at";

pub async fn create_complaint(
    db_pool: &SqlitePool,
    payment_request_id: &str,
    user_id: &str,
    reason: &str,
    image_url: Option<&str>,
) -> Result<PaymentComplaint> {
    let now = timestamp();
    let complaint = sqlx::query_as::<_, PaymentComplaint>(&format!(
        "INSERT INTO payment_complaints (id, payment_request_id, user_id, reason, image_url, status, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, 'pending', ?, ?) RETURNING {}",
        COMPLAINT_COLUMNS
    ))
    .bind(new_id())
    .bind(payment_request_id)
    .bind(user_id)
    .bind(reason)
    .bind(image_url)
    .bind(&now)
    .bind(&now)
    .fetch_one(db_pool)
    .await?;
    Ok(complaint)
}

pub async fn get_complaint(db_pool: &SqlitePool, id: &str) -> Result<Option<PaymentComplaint>> {
    let complaint = sqlx::query_as::<_, PaymentComplaint>(&format!(
        "SELECT {} FROM payment_complaints WHERE id = ?",
        COMPLAINT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(db_pool)
    .await?;
    Ok(complaint)
}

pub async fn list_user_complaints(db_pool: &SqlitePool, user_id: &str) -> Result<Vec<PaymentComplaint>> {
    let complaints = sqlx::query_as::<_, PaymentComplaint>(&format!(
        "SELECT {} FROM payment_complaints WHERE user_id = ? ORDER BY created_at DESC",
        COMPLAINT_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(db_pool)
    .await?;
    Ok(complaints)
}

pub async fn list_complaints(
    db_pool: &SqlitePool,
    status: Option<ComplaintStatus>,
) -> Result<Vec<ComplaintDetail>> {
    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT c.id, c.payment_request_id, c.user_id, c.reason, c.image_url, c.status, \
         c.admin_response, c.created_at, c.updated_at, \
         p.email AS user_email, p.full_name AS user_full_name, \
         pr.amount AS payment_amount, pr.status AS payment_status, \
         m.title AS movie_title, m.poster_url AS movie_poster_url \
         FROM payment_complaints c \
         LEFT JOIN profiles p ON p.id = c.user_id \
         LEFT JOIN payment_requests pr ON pr.id = c.payment_request_id \
         LEFT JOIN movies m ON m.id = pr.movie_id",
    );
    if let Some(status) = status {
        qb.push(" WHERE c.status = ").push_bind(status);
    }
    qb.push(" ORDER BY c.created_at DESC");

    let rows = qb
        .build_query_as::<ComplaintDetail>()
        .fetch_all(db_pool)
        .await?;
    Ok(rows)
}

pub async fn review_complaint(
    db_pool: &SqlitePool,
    id: &str,
    status: ComplaintStatus,
    response: Option<&str>,
) -> Result<Option<PaymentComplaint>> {
    let complaint = sqlx::query_as::<_, PaymentComplaint>(&format!(
        "UPDATE payment_complaints SET status = ?, admin_response = ?, updated_at = ? \
         WHERE id = ? AND status = 'pending' RETURNING {}",
        COMPLAINT_COLUMNS
    ))
    .bind(status)
    .bind(response)
    .bind(timestamp())
    .bind(id)
    .fetch_optional(db_pool)
    .await?;
    Ok(complaint)
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

pub async fn create_notification(
    db_pool: &SqlitePool,
    user_id: &str,
    kind: &str,
    title: &str,
    message: &str,
    related_id: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO notifications (id, user_id, type, title, message, related_id, is_read, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, 0, ?)",
    )
    .bind(new_id())
    .bind(user_id)
    .bind(kind)
    .bind(title)
    .bind(message)
    .bind(related_id)
    .bind(timestamp())
    .execute(db_pool)
    .await?;
    Ok(())
}

/// Best-effort variant used after a review has already been committed.
pub async fn notify(
    db_pool: &SqlitePool,
    user_id: &str,
    kind: &str,
    title: &str,
    message: &str,
    related_id: Option<&str>,
) {
    if let Err(e) = create_notification(db_pool, user_id, kind, title, message, related_id).await {
        warn!(error = ?e, user_id, kind, "failed to insert notification");
    }
}

pub async fn list_notifications(db_pool: &SqlitePool, user_id: &str) -> Result<Vec<Notification>> {
    let items = sqlx::query_as::<_, Notification>(
        "SELECT id, user_id, type, title, message, related_id, is_read, created_at \
         FROM notifications WHERE user_id = ? ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(db_pool)
    .await?;
    Ok(items)
}

pub async fn mark_notification_read(db_pool: &SqlitePool, user_id: &str, id: &str) -> Result<bool> {
    let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .execute(db_pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn mark_all_notifications_read(db_pool: &SqlitePool, user_id: &str) -> Result<u64> {
    let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE user_id = ? AND is_read = 0")
        .bind(user_id)
        .execute(db_pool)
        .await?;
    Ok(result.rows_affected())
}

// ---------------------------------------------------------------------------
// Blocklist
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
pub struct BlockMatch {
    pub reason: Option<String>,
}

/// Checks the fingerprint against blocked devices, then the IP against blocked IPs.
pub async fn is_device_blocked(
    db_pool: &SqlitePool,
    fingerprint: Option<&str>,
    ip_address: Option<&str>,
) -> Result<Option<BlockMatch>> {
    if let Some(fp) = fingerprint.filter(|f| !f.is_empty()) {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT reason FROM blocked_devices WHERE fingerprint = ?")
                .bind(fp)
                .fetch_optional(db_pool)
                .await?;
        if let Some((reason,)) = row {
            return Ok(Some(BlockMatch { reason }));
        }
    }
    if let Some(ip) = ip_address.filter(|i| !i.is_empty()) {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT reason FROM blocked_ips WHERE ip_address = ?")
                .bind(ip)
                .fetch_optional(db_pool)
                .await?;
        if let Some((reason,)) = row {
            return Ok(Some(BlockMatch { reason }));
        }
    }
    Ok(None)
}

pub async fn list_blocked_devices(db_pool: &SqlitePool) -> Result<Vec<BlockedDevice>> {
    let rows = sqlx::query_as::<_, BlockedDevice>(
        "SELECT id, fingerprint, ip_address, reason, created_at FROM blocked_devices ORDER BY created_at DESC",
    )
    .fetch_all(db_pool)
    .await?;
    Ok(rows)
}

pub async fn block_device(
    db_pool: &SqlitePool,
    fingerprint: &str,
    ip_address: Option<&str>,
    reason: Option<&str>,
    blocked_by: &str,
) -> Result<BlockedDevice> {
    let row = sqlx::query_as::<_, BlockedDevice>(
        "INSERT INTO blocked_devices (id, fingerprint, ip_address, reason, blocked_by, created_at) \
         VALUES (?, ?, ?, ?, ?, ?) RETURNING id, fingerprint, ip_address, reason, created_at",
    )
    .bind(new_id())
    .bind(fingerprint)
    .bind(ip_address)
    .bind(reason)
    .bind(blocked_by)
    .bind(timestamp())
    .fetch_one(db_pool)
    .await?;
    Ok(row)
}

pub async fn unblock_device(db_pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM blocked_devices WHERE id = ?")
        .bind(id)
        .execute(db_pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_blocked_ips(db_pool: &SqlitePool) -> Result<Vec<BlockedIp>> {
    let rows = sqlx::query_as::<_, BlockedIp>(
        "SELECT id, ip_address, reason, created_at FROM blocked_ips ORDER BY created_at DESC",
    )
    .fetch_all(db_pool)
    .await?;
    Ok(rows)
}

pub async fn block_ip(
    db_pool: &SqlitePool,
    ip_address: &str,
    reason: Option<&str>,
    blocked_by: &str,
) -> Result<BlockedIp> {
    let row = sqlx::query_as::<_, BlockedIp>(
        "INSERT INTO blocked_ips (id, ip_address, reason, blocked_by, created_at) \
         VALUES (?, ?, ?, ?, ?) RETURNING id, ip_address, reason, created_at",
    )
    .bind(new_id())
    .bind(ip_address)
    .bind(reason)
    .bind(blocked_by)
    .bind(timestamp())
    .fetch_one(db_pool)
    .await?;
    Ok(row)
}

pub async fn unblock_ip(db_pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM blocked_ips WHERE id = ?")
        .bind(id)
        .execute(db_pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Blocks every fingerprint and IP recorded for the user. Entries that are
/// already blocked are left as they are. Returns `(devices, ips)` newly blocked.
pub async fn block_user_devices(
    db_pool: &SqlitePool,
    user_id: &str,
    reason: Option<&str>,
    blocked_by: &str,
) -> Result<(u64, u64)> {
    let devices = get_user_devices(db_pool, user_id).await?;
    let now = timestamp();
    let mut tx = db_pool.begin().await?;
    let (mut device_count, mut ip_count) = (0u64, 0u64);

    for device in &devices {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO blocked_devices (id, fingerprint, ip_address, reason, blocked_by, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(new_id())
        .bind(&device.fingerprint)
        .bind(&device.ip_address)
        .bind(reason)
        .bind(blocked_by)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        device_count += result.rows_affected();

        if let Some(ip) = device.ip_address.as_deref().filter(|ip| !ip.is_empty()) {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO blocked_ips (id, ip_address, reason, blocked_by, created_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(new_id())
            .bind(ip)
            .bind(reason)
            .bind(blocked_by)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            ip_count += result.rows_affected();
        }
    }

    tx.commit().await?;
    Ok((device_count, ip_count))
}
