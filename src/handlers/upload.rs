use crate::auth::{AdminUser, AuthUser};
use crate::handlers::common::{ApiError, api_error, now_millis};
use crate::storage::{self, Bucket};
use crate::types::{
    AppState, CancelUploadResponse, ChunkUploadResponse, ChunkedUpload, UploadResponse,
    UploadStatusResponse,
};

use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode},
};
use std::path::PathBuf;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{info, warn};
use uuid::Uuid;

pub const UPLOAD_ID_HEADER: &str = "x-upload-id";
/// Upper bound on chunks per session; the received bitmap is sized from it.
pub const MAX_TOTAL_CHUNKS: u32 = 10_000;

fn check_chunk_bounds(chunk_index: u32, total_chunks: u32) -> Result<(), ApiError> {
    if total_chunks == 0 || total_chunks > MAX_TOTAL_CHUNKS {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("total_chunks must be between 1 and {}", MAX_TOTAL_CHUNKS),
        ));
    }
    if chunk_index >= total_chunks {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "chunk_index must be below total_chunks",
        ));
    }
    Ok(())
}

fn upload_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(UPLOAD_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        .map(|s| s.to_string())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Missing X-Upload-ID header"))
}

fn parse_bucket(s: &str) -> Result<Bucket, ApiError> {
    s.parse()
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, format!("Unknown bucket: {}", s)))
}

fn bad_multipart(e: axum::extract::multipart::MultipartError) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, e.body_text())
}

fn chunk_path(temp_dir: &std::path::Path, index: u32) -> PathBuf {
    temp_dir.join(format!("chunk_{:06}", index))
}

/// Removes chunked uploads with no activity for `stale_upload_secs`.
pub async fn sweep_stale_uploads(state: &AppState) -> usize {
    let timeout_ms = state.config.uploads.stale_upload_secs.saturating_mul(1000);
    let now = now_millis();

    let stale: Vec<(String, PathBuf)> = {
        let mut uploads = state.chunked_uploads.write().await;
        let ids: Vec<String> = uploads
            .iter()
            .filter(|(_, u)| now.saturating_sub(u.last_activity) > timeout_ms)
            .map(|(id, _)| id.clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| uploads.remove(&id).map(|u| (id, u.temp_dir)))
            .collect()
    };

    for (id, temp_dir) in &stale {
        let _ = fs::remove_dir_all(temp_dir).await;
        warn!(upload_id = %id, "cleaned up stale chunked upload");
    }
    stale.len()
}

// ---------------------------------------------------------------------------
// Single-request uploads
// ---------------------------------------------------------------------------

pub async fn upload_file(
    State(state): State<AppState>,
    user: AuthUser,
    Path(bucket): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let bucket = parse_bucket(&bucket)?;
    let is_admin = user.is_admin();
    if !is_admin && !bucket.user_writable() {
        return Err(api_error(
            StatusCode::FORBIDDEN,
            format!("Uploads to {} require admin access", bucket),
        ));
    }

    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let data = field.bytes().await.map_err(bad_multipart)?;
        upload = Some((file_name, data.to_vec()));
    }
    let (file_name, data) =
        upload.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "missing file field 'file'"))?;
    if data.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "File is empty"));
    }

    let ext = storage::file_extension(&file_name);
    if !is_admin {
        if !storage::is_image_extension(&ext) {
            return Err(api_error(StatusCode::BAD_REQUEST, "Only image files are accepted"));
        }
        if data.len() > state.config.uploads.max_image_bytes {
            return Err(api_error(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!(
                    "Images must be at most {} bytes",
                    state.config.uploads.max_image_bytes
                ),
            ));
        }
    }

    let key = storage::object_key(Some(&user.user_id), &file_name, now_millis());
    storage::put_object(&state, bucket, &key, data, storage::content_type_for(&ext))
        .await
        .map_err(state.internal_err())?;

    let url = storage::public_url(&state.config.storage.public_base_url, bucket, &key);
    info!(bucket = %bucket, key = %key, user_id = %user.user_id, "file uploaded");
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            bucket: bucket.to_string(),
            key,
            url,
        }),
    ))
}

// ---------------------------------------------------------------------------
// Resumable admin uploads
// ---------------------------------------------------------------------------

pub async fn upload_chunk(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<ChunkUploadResponse>, ApiError> {
    let upload_id = upload_id(&headers)?;

    let mut chunk_data: Option<Vec<u8>> = None;
    let mut chunk_index: Option<u32> = None;
    let mut total_chunks: Option<u32> = None;
    let mut file_name: Option<String> = None;
    let mut bucket: Option<Bucket> = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let field_name = field.name().map(|s| s.to_string());

        match field_name.as_deref() {
            Some("chunk") => {
                chunk_data = Some(field.bytes().await.map_err(bad_multipart)?.to_vec());
            }
            Some("chunk_index") => {
                let text = field.text().await.map_err(bad_multipart)?;
                chunk_index = Some(
                    text.trim()
                        .parse()
                        .map_err(|_| api_error(StatusCode::BAD_REQUEST, "Invalid chunk_index"))?,
                );
            }
            Some("total_chunks") => {
                let text = field.text().await.map_err(bad_multipart)?;
                total_chunks = Some(
                    text.trim()
                        .parse()
                        .map_err(|_| api_error(StatusCode::BAD_REQUEST, "Invalid total_chunks"))?,
                );
            }
            Some("file_name") => {
                file_name = Some(field.text().await.map_err(bad_multipart)?);
            }
            Some("bucket") => {
                let text = field.text().await.map_err(bad_multipart)?;
                bucket = Some(parse_bucket(text.trim())?);
            }
            _ => continue,
        }
    }

    let chunk_data =
        chunk_data.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Missing chunk data"))?;
    let chunk_index =
        chunk_index.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Missing chunk_index"))?;
    let total_chunks =
        total_chunks.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Missing total_chunks"))?;
    let file_name =
        file_name.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Missing file_name"))?;
    let bucket = bucket.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Missing bucket"))?;

    check_chunk_bounds(chunk_index, total_chunks)?;

    let temp_dir = {
        let mut uploads = state.chunked_uploads.write().await;
        match uploads.get(&upload_id) {
            Some(existing) => {
                if existing.total_chunks != total_chunks || existing.bucket != bucket.as_str() {
                    return Err(api_error(
                        StatusCode::CONFLICT,
                        "Chunk does not match the upload session",
                    ));
                }
                existing.temp_dir.clone()
            }
            None => {
                let temp_dir = std::env::temp_dir().join(format!("chunked-{}", upload_id));
                fs::create_dir_all(&temp_dir)
                    .await
                    .map_err(|e| state.internal_err()(e.into()))?;
                uploads.insert(
                    upload_id.clone(),
                    ChunkedUpload {
                        bucket: bucket.as_str().to_string(),
                        file_name: file_name.clone(),
                        total_chunks,
                        received_chunks: vec![false; total_chunks as usize],
                        temp_dir: temp_dir.clone(),
                        last_activity: now_millis(),
                    },
                );
                temp_dir
            }
        }
    };

    fs::write(chunk_path(&temp_dir, chunk_index), &chunk_data)
        .await
        .map_err(|e| state.internal_err()(e.into()))?;

    let received_count = {
        let mut uploads = state.chunked_uploads.write().await;
        let upload = uploads
            .get_mut(&upload_id)
            .ok_or_else(|| api_error(StatusCode::GONE, "Upload was cancelled"))?;
        upload.received_chunks[chunk_index as usize] = true;
        upload.last_activity = now_millis();
        upload.received_count()
    };

    info!(
        upload_id = %upload_id,
        file_name = %file_name,
        "received chunk {}/{} ({} stored)",
        chunk_index + 1,
        total_chunks,
        received_count
    );

    Ok(Json(ChunkUploadResponse {
        upload_id,
        chunk_index,
        received: true,
    }))
}

pub async fn upload_status(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path(upload_id): Path<String>,
) -> Result<Json<UploadStatusResponse>, ApiError> {
    let uploads = state.chunked_uploads.read().await;
    let upload = uploads
        .get(&upload_id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Upload ID not found"))?;

    let received_count = upload.received_count();
    Ok(Json(UploadStatusResponse {
        upload_id: upload_id.clone(),
        bucket: upload.bucket.clone(),
        file_name: upload.file_name.clone(),
        total_chunks: upload.total_chunks,
        received_count,
        missing_chunks: upload.missing_chunks(),
        percentage: received_count * 100 / upload.total_chunks.max(1),
    }))
}

pub async fn finalize_upload(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    headers: HeaderMap,
) -> Result<Json<UploadResponse>, ApiError> {
    let upload_id = upload_id(&headers)?;

    let upload = {
        let mut uploads = state.chunked_uploads.write().await;
        let upload = uploads.get(&upload_id).ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                "Upload ID not found or already finalized",
            )
        })?;
        let missing = upload.missing_chunks();
        if !missing.is_empty() {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                format!("Not all chunks have been received: missing {:?}", missing),
            ));
        }
        uploads
            .remove(&upload_id)
            .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Upload ID not found"))?
    };

    let bucket = parse_bucket(&upload.bucket)?;
    info!(upload_id = %upload_id, file_name = %upload.file_name, "finalizing chunked upload");

    let assembled = std::env::temp_dir().join(format!("{}-assembled", Uuid::new_v4()));
    let result = async {
        let mut out = fs::File::create(&assembled).await?;
        for i in 0..upload.total_chunks {
            let data = fs::read(chunk_path(&upload.temp_dir, i)).await?;
            out.write_all(&data).await?;
        }
        out.flush().await?;
        drop(out);

        let key = storage::object_key(None, &upload.file_name, now_millis());
        storage::upload_file(&state, bucket, &key, &assembled).await?;
        Ok::<_, anyhow::Error>(key)
    }
    .await;

    let _ = fs::remove_dir_all(&upload.temp_dir).await;
    let _ = fs::remove_file(&assembled).await;

    let key = result.map_err(state.internal_err())?;
    let url = storage::public_url(&state.config.storage.public_base_url, bucket, &key);
    info!(upload_id = %upload_id, bucket = %bucket, key = %key, "chunked upload stored");

    Ok(Json(UploadResponse {
        bucket: bucket.to_string(),
        key,
        url,
    }))
}

pub async fn cancel_upload(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path(upload_id): Path<String>,
) -> Result<Json<CancelUploadResponse>, ApiError> {
    let removed = state.chunked_uploads.write().await.remove(&upload_id);
    match removed {
        Some(upload) => {
            let _ = fs::remove_dir_all(&upload.temp_dir).await;
            info!(upload_id = %upload_id, "chunked upload cancelled");
            Ok(Json(CancelUploadResponse {
                cancelled: true,
                message: "Upload cancelled".to_string(),
            }))
        }
        None => Ok(Json(CancelUploadResponse {
            cancelled: false,
            message: "Upload ID not found".to_string(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;

    fn session(temp_dir: PathBuf, received: Vec<bool>, last_activity: u64) -> ChunkedUpload {
        ChunkedUpload {
            bucket: "videos".to_string(),
            file_name: "feature.mp4".to_string(),
            total_chunks: received.len() as u32,
            received_chunks: received,
            temp_dir,
            last_activity,
        }
    }

    #[test]
    fn upload_id_header_is_required_and_sanitised() {
        let mut headers = HeaderMap::new();
        assert!(upload_id(&headers).is_err());

        headers.insert(UPLOAD_ID_HEADER, "../../etc".parse().unwrap());
        assert!(upload_id(&headers).is_err());

        headers.insert(UPLOAD_ID_HEADER, "abc-123_x".parse().unwrap());
        assert_eq!(upload_id(&headers).unwrap(), "abc-123_x");
    }

    #[test]
    fn chunk_counts_are_bounded() {
        assert!(check_chunk_bounds(0, 1).is_ok());
        assert!(check_chunk_bounds(MAX_TOTAL_CHUNKS - 1, MAX_TOTAL_CHUNKS).is_ok());
        assert!(check_chunk_bounds(0, 0).is_err());
        assert!(check_chunk_bounds(3, 3).is_err());

        let err = check_chunk_bounds(0, MAX_TOTAL_CHUNKS + 1).unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert!(check_chunk_bounds(0, u32::MAX).is_err());
    }

    #[tokio::test]
    async fn sweeper_only_removes_inactive_sessions() {
        let state = test_state().await;
        let dir = std::env::temp_dir().join(format!("chunked-test-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).await.unwrap();

        {
            let mut uploads = state.chunked_uploads.write().await;
            uploads.insert("old".into(), session(dir.clone(), vec![true, false], 0));
            uploads.insert(
                "fresh".into(),
                session(std::env::temp_dir(), vec![false], now_millis()),
            );
        }

        assert_eq!(sweep_stale_uploads(&state).await, 1);
        let uploads = state.chunked_uploads.read().await;
        assert!(uploads.contains_key("fresh"));
        assert!(!uploads.contains_key("old"));
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn status_reports_missing_chunks_for_resume() {
        let state = test_state().await;
        state.chunked_uploads.write().await.insert(
            "resume-me".into(),
            session(std::env::temp_dir(), vec![true, false, true, false], now_millis()),
        );

        let Json(status) = upload_status(
            State(state.clone()),
            AdminUser(AuthUser {
                user_id: "admin".into(),
                roles: vec![crate::types::Role::Admin],
            }),
            Path("resume-me".into()),
        )
        .await
        .unwrap();

        assert_eq!(status.received_count, 2);
        assert_eq!(status.missing_chunks, vec![1, 3]);
        assert_eq!(status.percentage, 50);
    }

    #[tokio::test]
    async fn cancel_discards_session() {
        let state = test_state().await;
        let dir = std::env::temp_dir().join(format!("chunked-test-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).await.unwrap();
        state
            .chunked_uploads
            .write()
            .await
            .insert("gone".into(), session(dir.clone(), vec![true], now_millis()));

        let admin = || {
            AdminUser(AuthUser {
                user_id: "admin".into(),
                roles: vec![crate::types::Role::Admin],
            })
        };
        let Json(first) = cancel_upload(State(state.clone()), admin(), Path("gone".into()))
            .await
            .unwrap();
        assert!(first.cancelled);
        assert!(!dir.exists());

        let Json(second) = cancel_upload(State(state), admin(), Path("gone".into()))
            .await
            .unwrap();
        assert!(!second.cancelled);
    }
}
