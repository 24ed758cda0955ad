use crate::config::StorageConfig;
use crate::types::AppState;
use anyhow::{Context, Result};
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use futures::stream::{self, StreamExt};
use std::fmt;
use std::io::SeekFrom;
use std::path::Path;
use std::str::FromStr;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{error, info};

// S3 rejects non-final parts below 5 MiB
const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Logical buckets. All of them live as key prefixes inside the one
/// configured S3 bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bucket {
    Posters,
    Videos,
    PaymentProofs,
    ComplaintImages,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Posters => "posters",
            Bucket::Videos => "videos",
            Bucket::PaymentProofs => "payment-proofs",
            Bucket::ComplaintImages => "complaint-images",
        }
    }

    /// Buckets a regular signed-in user may write to. Admins may write anywhere.
    pub fn user_writable(&self) -> bool {
        matches!(self, Bucket::PaymentProofs | Bucket::ComplaintImages)
    }
}

impl FromStr for Bucket {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "posters" => Ok(Bucket::Posters),
            "videos" => Ok(Bucket::Videos),
            "payment-proofs" => Ok(Bucket::PaymentProofs),
            "complaint-images" => Ok(Bucket::ComplaintImages),
            other => anyhow::bail!("unknown bucket: {}", other),
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn s3_client(config: &StorageConfig) -> S3Client {
    let s3_config = aws_sdk_s3::config::Builder::new()
        .endpoint_url(&config.endpoint)
        .region(Region::new("auto"))
        .credentials_provider(aws_sdk_s3::config::Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "static",
        ))
        .force_path_style(true)
        .build();
    S3Client::from_conf(s3_config)
}

/// Lowercased extension of the original file name, `bin` when there is none.
pub fn file_extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "bin".to_string())
}

/// `{owner/}{unix_millis}.{ext}`
pub fn object_key(owner: Option<&str>, file_name: &str, now_millis: u64) -> String {
    let ext = file_extension(file_name);
    match owner {
        Some(owner) => format!("{}/{}.{}", owner, now_millis, ext),
        None => format!("{}.{}", now_millis, ext),
    }
}

/// Full key inside the physical S3 bucket.
pub fn storage_key(bucket: Bucket, key: &str) -> String {
    format!("{}/{}", bucket, key)
}

pub fn public_url(public_base_url: &str, bucket: Bucket, key: &str) -> String {
    format!("{}/{}/{}", public_base_url.trim_end_matches('/'), bucket, key)
}

pub fn content_type_for(ext: &str) -> &'static str {
    match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "avif" => "image/avif",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "m3u8" => "application/vnd.apple.mpegurl",
        _ => "application/octet-stream",
    }
}

pub fn is_image_extension(ext: &str) -> bool {
    content_type_for(ext).starts_with("image/")
}

pub async fn put_object(
    state: &AppState,
    bucket: Bucket,
    key: &str,
    body: Vec<u8>,
    content_type: &str,
) -> Result<()> {
    let full_key = storage_key(bucket, key);
    state
        .s3
        .put_object()
        .bucket(&state.config.storage.bucket)
        .key(&full_key)
        .content_type(content_type)
        .body(ByteStream::from(body))
        .send()
        .await
        .with_context(|| format!("Failed to upload {}", full_key))?;
    info!("Uploaded: {}", full_key);
    Ok(())
}

/// Pushes an assembled file to storage. Files under the multipart threshold go
/// up in a single put; larger ones as an S3 multipart upload with parts sent
/// concurrently.
pub async fn upload_file(state: &AppState, bucket: Bucket, key: &str, path: &Path) -> Result<()> {
    let file_size = fs::metadata(path)
        .await
        .with_context(|| format!("Failed to get metadata for {:?}", path))?
        .len();
    let content_type = content_type_for(&file_extension(key));

    if file_size < state.config.uploads.multipart_threshold_bytes {
        let body = fs::read(path)
            .await
            .with_context(|| format!("read {:?}", path))?;
        return put_object(state, bucket, key, body, content_type).await;
    }

    let full_key = storage_key(bucket, key);
    let part_size = (state.config.uploads.part_size_bytes as u64).max(MIN_PART_SIZE);
    let part_count = file_size.div_ceil(part_size);

    info!(
        "Using multipart upload for large file: {} ({} bytes, {} parts)",
        full_key, file_size, part_count
    );

    let create_response = state
        .s3
        .create_multipart_upload()
        .bucket(&state.config.storage.bucket)
        .key(&full_key)
        .content_type(content_type)
        .send()
        .await
        .context("Failed to initiate multipart upload")?;

    let upload_id = create_response
        .upload_id()
        .ok_or_else(|| anyhow::anyhow!("No upload_id returned from create_multipart_upload"))?
        .to_string();

    let results: Vec<Result<CompletedPart>> = stream::iter(0..part_count)
        .map(|index| {
            let full_key = full_key.clone();
            let upload_id = upload_id.clone();
            async move {
                let offset = index * part_size;
                let len = part_size.min(file_size - offset) as usize;
                let mut buffer = vec![0u8; len];
                let mut file = File::open(path)
                    .await
                    .with_context(|| format!("Failed to open {:?}", path))?;
                file.seek(SeekFrom::Start(offset)).await?;
                file.read_exact(&mut buffer).await?;

                let part_number = (index + 1) as i32;
                let response = state
                    .s3
                    .upload_part()
                    .bucket(&state.config.storage.bucket)
                    .key(&full_key)
                    .upload_id(&upload_id)
                    .part_number(part_number)
                    .body(ByteStream::from(buffer))
                    .send()
                    .await
                    .with_context(|| format!("Failed to upload part {}", part_number))?;

                Ok::<_, anyhow::Error>(
                    CompletedPart::builder()
                        .part_number(part_number)
                        .set_e_tag(response.e_tag().map(|s| s.to_string()))
                        .build(),
                )
            }
        })
        .buffer_unordered(state.config.server.max_concurrent_uploads.max(1))
        .collect()
        .await;

    let mut parts = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(part) => parts.push(part),
            Err(e) => {
                error!(error = ?e, "multipart upload failed, aborting {}", full_key);
                let _ = state
                    .s3
                    .abort_multipart_upload()
                    .bucket(&state.config.storage.bucket)
                    .key(&full_key)
                    .upload_id(&upload_id)
                    .send()
                    .await;
                return Err(e);
            }
        }
    }
    parts.sort_by_key(|p| p.part_number());

    state
        .s3
        .complete_multipart_upload()
        .bucket(&state.config.storage.bucket)
        .key(&full_key)
        .upload_id(&upload_id)
        .multipart_upload(
            CompletedMultipartUpload::builder()
                .set_parts(Some(parts))
                .build(),
        )
        .send()
        .await
        .context("Failed to complete multipart upload")?;

    info!(
        "Multipart upload completed: {} ({} bytes in {} parts)",
        full_key, file_size, part_count
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_use_millis_and_lowercased_extension() {
        assert_eq!(
            object_key(Some("user-1"), "Receipt.JPG", 1_700_000_000_123),
            "user-1/1700000000123.jpg"
        );
        assert_eq!(object_key(None, "trailer.mp4", 42), "42.mp4");
        assert_eq!(object_key(None, "noext", 42), "42.bin");
        assert_eq!(object_key(None, "weird.p?g", 42), "42.bin");
    }

    #[test]
    fn public_url_follows_template() {
        let key = object_key(Some("u"), "proof.png", 7);
        assert_eq!(
            public_url("https://cdn.example.com/", Bucket::PaymentProofs, &key),
            "https://cdn.example.com/payment-proofs/u/7.png"
        );
        assert_eq!(
            public_url("https://cdn.example.com", Bucket::Posters, "1.webp"),
            "https://cdn.example.com/posters/1.webp"
        );
        assert_eq!(storage_key(Bucket::Videos, "9.mp4"), "videos/9.mp4");
    }

    #[test]
    fn only_proof_buckets_are_user_writable() {
        for name in ["posters", "videos", "payment-proofs", "complaint-images"] {
            let bucket: Bucket = name.parse().unwrap();
            assert_eq!(bucket.as_str(), name);
            assert_eq!(
                bucket.user_writable(),
                name == "payment-proofs" || name == "complaint-images"
            );
        }
        assert!("thumbnails".parse::<Bucket>().is_err());
    }

    #[test]
    fn image_detection() {
        assert!(is_image_extension("png"));
        assert!(is_image_extension("jpeg"));
        assert!(!is_image_extension("mp4"));
        assert!(!is_image_extension("bin"));
    }
}
