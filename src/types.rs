use crate::config::Config;
use crate::rate_limit::AuthRateLimiter;
use aws_sdk_s3::Client as S3Client;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub s3: S3Client,
    pub db_pool: SqlitePool,
    pub chunked_uploads: ChunkedUploadsMap,
    pub auth_rate_limiter: AuthRateLimiter,
}

// ---------------------------------------------------------------------------
// Enumerations stored as TEXT columns
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => anyhow::bail!("unknown role: {}", other),
        }
    }
}

/// Lifecycle of a payment request: `pending -> {approved, rejected}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Rejected,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Approved => "approved",
            PaymentStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "approved" => Ok(PaymentStatus::Approved),
            "rejected" => Ok(PaymentStatus::Rejected),
            other => anyhow::bail!("unknown payment status: {}", other),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a complaint: `pending -> {resolved, rejected}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ComplaintStatus {
    Pending,
    Resolved,
    Rejected,
}

impl ComplaintStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplaintStatus::Pending => "pending",
            ComplaintStatus::Resolved => "resolved",
            ComplaintStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for ComplaintStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ComplaintStatus::Pending),
            "resolved" => Ok(ComplaintStatus::Resolved),
            "rejected" => Ok(ComplaintStatus::Rejected),
            other => anyhow::bail!("unknown complaint status: {}", other),
        }
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

#[derive(Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub expires_at: u64,
    pub user: Profile,
    pub roles: Vec<Role>,
}

#[derive(Serialize)]
pub struct MeResponse {
    pub user: Profile,
    pub roles: Vec<Role>,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct DeviceInfo {
    pub user_id: String,
    pub fingerprint: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub last_seen_at: String,
}

#[derive(Serialize)]
pub struct UserWithDevices {
    pub id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub created_at: String,
    pub devices: Vec<DeviceInfo>,
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Movie {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub poster_url: Option<String>,
    pub video_url: Option<String>,
    #[sqlx(json)]
    pub genre: Vec<String>,
    pub release_year: Option<i64>,
    pub duration: Option<i64>,
    #[sqlx(json)]
    pub actors: Vec<String>,
    pub director: Option<String>,
    pub imdb_rating: Option<f64>,
    pub view_count: i64,
    pub is_featured: bool,
    pub display_order: i64,
    pub requires_payment: bool,
    pub payment_amount: Option<i64>,
    pub payment_image_url: Option<String>,
    pub ad_enabled: bool,
    pub ad_video_url: Option<String>,
    pub ad_position: Option<String>,
    pub ad_show_on_load: bool,
    pub intro_start_seconds: Option<f64>,
    pub intro_end_seconds: Option<f64>,
    pub has_episodes: bool,
    pub episode_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl Movie {
    /// Picks the media URL to play. Episodic titles ignore the flat `video_url`;
    /// `episode` defaults to the lowest-numbered episode.
    pub fn resolve_source<'a>(
        &'a self,
        episodes: &'a [Episode],
        episode: Option<i64>,
    ) -> Option<&'a Episode> {
        if !self.has_episodes {
            return None;
        }
        match episode {
            Some(n) => episodes.iter().find(|e| e.episode_number == n),
            None => episodes.iter().min_by_key(|e| e.episode_number),
        }
    }

    pub fn source_url<'a>(&'a self, episodes: &'a [Episode], episode: Option<i64>) -> Option<&'a str> {
        if self.has_episodes {
            self.resolve_source(episodes, episode)
                .map(|e| e.video_url.as_str())
        } else {
            self.video_url.as_deref().filter(|u| !u.is_empty())
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct MovieInput {
    pub title: String,
    pub description: Option<String>,
    pub poster_url: Option<String>,
    pub video_url: Option<String>,
    #[serde(default)]
    pub genre: Vec<String>,
    pub release_year: Option<i64>,
    pub duration: Option<i64>,
    #[serde(default)]
    pub actors: Vec<String>,
    pub director: Option<String>,
    pub imdb_rating: Option<f64>,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default)]
    pub display_order: i64,
    #[serde(default)]
    pub requires_payment: bool,
    pub payment_amount: Option<i64>,
    pub payment_image_url: Option<String>,
    #[serde(default)]
    pub ad_enabled: bool,
    pub ad_video_url: Option<String>,
    pub ad_position: Option<String>,
    #[serde(default)]
    pub ad_show_on_load: bool,
    pub intro_start_seconds: Option<f64>,
    pub intro_end_seconds: Option<f64>,
    #[serde(default)]
    pub has_episodes: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct MovieQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub genre: Option<String>,
    pub q: Option<String>,
    pub featured: Option<bool>,
}

#[derive(Serialize)]
pub struct MovieListResponse {
    pub items: Vec<Movie>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Episode {
    pub id: String,
    pub movie_id: String,
    pub episode_number: i64,
    pub title: Option<String>,
    pub video_url: String,
    pub duration: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EpisodeInput {
    pub episode_number: i64,
    pub title: Option<String>,
    pub video_url: String,
    pub duration: Option<i64>,
}

#[derive(Serialize)]
pub struct EpisodeListResponse {
    pub items: Vec<Episode>,
}

// ---------------------------------------------------------------------------
// Playback
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct WatchProgress {
    pub movie_id: String,
    pub progress_seconds: f64,
    pub duration_seconds: Option<f64>,
    pub last_watched_at: String,
}

#[derive(Deserialize)]
pub struct SaveProgressRequest {
    pub progress_seconds: f64,
    pub duration_seconds: Option<f64>,
}

#[derive(Deserialize)]
pub struct PlayerQuery {
    pub episode: Option<i64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct AdSettings {
    pub video_url: String,
    /// `onload`, `start`, `middle`, `end` or a second offset.
    pub trigger: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct IntroSettings {
    pub start_seconds: f64,
    pub end_seconds: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct PlayerConfig {
    pub movie_id: String,
    pub title: String,
    pub src: String,
    pub poster: Option<String>,
    pub episode: Option<i64>,
    pub saved_progress: f64,
    pub ad: Option<AdSettings>,
    pub intro: Option<IntroSettings>,
}

#[derive(Serialize)]
pub struct AccessResponse {
    pub movie_id: String,
    pub decision: crate::access::AccessDecision,
    pub payment_status: Option<PaymentStatus>,
    pub payment_amount: Option<i64>,
}

// ---------------------------------------------------------------------------
// Payments and complaints
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct PaymentRequest {
    pub id: String,
    pub user_id: String,
    pub movie_id: String,
    pub amount: i64,
    pub proof_image_url: String,
    pub status: PaymentStatus,
    pub admin_id: Option<String>,
    pub admin_note: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Payment request merged with the requesting profile and the movie.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct PaymentRequestDetail {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub payment: PaymentRequest,
    pub user_email: Option<String>,
    pub user_full_name: Option<String>,
    pub movie_title: Option<String>,
    pub movie_poster_url: Option<String>,
}

#[derive(Deserialize)]
pub struct SubmitPaymentRequest {
    pub movie_id: String,
    pub proof_image_url: String,
}

#[derive(Deserialize, Default)]
pub struct ReviewPaymentRequest {
    pub note: Option<String>,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct PaymentComplaint {
    pub id: String,
    pub payment_request_id: String,
    pub user_id: String,
    pub reason: String,
    pub image_url: Option<String>,
    pub status: ComplaintStatus,
    pub admin_response: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct ComplaintDetail {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub complaint: PaymentComplaint,
    pub user_email: Option<String>,
    pub user_full_name: Option<String>,
    pub payment_amount: Option<i64>,
    pub payment_status: Option<PaymentStatus>,
    pub movie_title: Option<String>,
    pub movie_poster_url: Option<String>,
}

#[derive(Deserialize)]
pub struct SubmitComplaintRequest {
    pub payment_request_id: String,
    pub reason: String,
    pub image_url: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct ReviewComplaintRequest {
    pub response: Option<String>,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    pub related_id: Option<String>,
    pub is_read: bool,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct NotificationListResponse {
    pub items: Vec<Notification>,
    pub unread_count: usize,
}

// ---------------------------------------------------------------------------
// Blocklist
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct BlockedDevice {
    pub id: String,
    pub fingerprint: String,
    pub ip_address: Option<String>,
    pub reason: Option<String>,
    pub created_at: String,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct BlockedIp {
    pub id: String,
    pub ip_address: String,
    pub reason: Option<String>,
    pub created_at: String,
}

#[derive(Deserialize)]
pub struct BlockDeviceRequest {
    pub fingerprint: String,
    pub ip_address: Option<String>,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct BlockIpRequest {
    pub ip_address: String,
    pub reason: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct BlockUserRequest {
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct BlockUserResponse {
    pub devices_blocked: u64,
    pub ips_blocked: u64,
}

#[derive(Serialize)]
pub struct BlockCheckResponse {
    pub blocked: bool,
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Uploads
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize)]
pub struct UploadResponse {
    pub bucket: String,
    pub key: String,
    pub url: String,
}

#[derive(Clone, Debug)]
pub struct ChunkedUpload {
    pub bucket: String,
    pub file_name: String,
    pub total_chunks: u32,
    pub received_chunks: Vec<bool>,
    pub temp_dir: std::path::PathBuf,
    pub last_activity: u64,
}

impl ChunkedUpload {
    pub fn received_count(&self) -> u32 {
        self.received_chunks.iter().filter(|&&r| r).count() as u32
    }

    pub fn missing_chunks(&self) -> Vec<u32> {
        self.received_chunks
            .iter()
            .enumerate()
            .filter(|(_, r)| !**r)
            .map(|(i, _)| i as u32)
            .collect()
    }
}

pub type ChunkedUploadsMap = Arc<RwLock<HashMap<String, ChunkedUpload>>>;

#[derive(Serialize)]
pub struct ChunkUploadResponse {
    pub upload_id: String,
    pub chunk_index: u32,
    pub received: bool,
}

#[derive(Serialize)]
pub struct UploadStatusResponse {
    pub upload_id: String,
    pub bucket: String,
    pub file_name: String,
    pub total_chunks: u32,
    pub received_count: u32,
    pub missing_chunks: Vec<u32>,
    pub percentage: u32,
}

#[derive(Serialize)]
pub struct CancelUploadResponse {
    pub cancelled: bool,
    pub message: String,
}

#[derive(Deserialize)]
pub struct DeleteUserRequest {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie(has_episodes: bool, video_url: Option<&str>) -> Movie {
        Movie {
            id: "m1".into(),
            title: "Title".into(),
            description: None,
            poster_url: None,
            video_url: video_url.map(String::from),
            genre: vec![],
            release_year: None,
            duration: None,
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
            has_episodes,
            episode_count: 0,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn episode(n: i64) -> Episode {
        Episode {
            id: format!("e{}", n),
            movie_id: "m1".into(),
            episode_number: n,
            title: None,
            video_url: format!("https://cdn/ep{}.mp4", n),
            duration: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn flat_movie_uses_video_url() {
        let m = movie(false, Some("https://cdn/movie.mp4"));
        assert_eq!(m.source_url(&[], None), Some("https://cdn/movie.mp4"));
    }

    #[test]
    fn episodic_movie_ignores_flat_url() {
        let m = movie(true, Some("https://cdn/movie.mp4"));
        assert_eq!(m.source_url(&[], None), None);

        let eps = vec![episode(2), episode(1)];
        assert_eq!(m.source_url(&eps, None), Some("https://cdn/ep1.mp4"));
        assert_eq!(m.source_url(&eps, Some(2)), Some("https://cdn/ep2.mp4"));
        assert_eq!(m.source_url(&eps, Some(3)), None);
    }

    #[test]
    fn status_strings_round_trip() {
        for s in ["pending", "approved", "rejected"] {
            assert_eq!(s.parse::<PaymentStatus>().unwrap().as_str(), s);
        }
        assert!("paid".parse::<PaymentStatus>().is_err());
        assert_eq!("resolved".parse::<ComplaintStatus>().unwrap(), ComplaintStatus::Resolved);
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
    }
}
