use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tokio::fs;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub uploads: UploadConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub secret_key: String,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,
    #[serde(default)]
    pub root_redirect_url: Option<String>,
    /// Take the client address from `X-Forwarded-For`. Only safe behind a
    /// proxy that overwrites the header.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub public_base_url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: u64,
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
    #[serde(default = "default_stale_upload_secs")]
    pub stale_upload_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            multipart_threshold_bytes: default_multipart_threshold(),
            part_size_bytes: default_part_size(),
            max_image_bytes: default_max_image_bytes(),
            stale_upload_secs: default_stale_upload_secs(),
        }
    }
}

fn default_token_ttl() -> u64 {
    7 * 24 * 3600
}

fn default_max_concurrent_uploads() -> usize {
    4
}

fn default_database_url() -> String {
    "sqlite://vod_portal.db".to_string()
}

fn default_multipart_threshold() -> u64 {
    50 * 1024 * 1024
}

fn default_part_size() -> usize {
    8 * 1024 * 1024
}

fn default_max_image_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_stale_upload_secs() -> u64 {
    30 * 60
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(content).context("Failed to parse config file")?;
        Ok(config)
    }

    pub fn is_development(&self) -> bool {
        self.server.environment == Environment::Development
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config::parse(
        r#"
server:
  host: 127.0.0.1
  port: 0
  secret_key: test-secret
storage:
  endpoint: http://127.0.0.1:9000
  bucket: vod
  access_key_id: test
  secret_access_key: test
  public_base_url: https://cdn.example.com/
"#,
    )
    .expect("test config parses")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = test_config();
        assert_eq!(config.server.token_ttl_secs, 7 * 24 * 3600);
        assert_eq!(config.server.environment, Environment::Production);
        assert_eq!(config.database.url, "sqlite://vod_portal.db");
        assert_eq!(config.uploads.max_image_bytes, 10 * 1024 * 1024);
        assert!(!config.is_development());
        assert!(!config.server.trust_forwarded_for);
    }

    #[test]
    fn environment_is_lowercase() {
        let config = Config::parse(
            r#"
server:
  host: 0.0.0.0
  port: 8080
  secret_key: s
  environment: development
storage:
  endpoint: e
  bucket: b
  access_key_id: a
  secret_access_key: k
  public_base_url: p
uploads:
  part_size_bytes: 6291456
"#,
        )
        .unwrap();
        assert!(config.is_development());
        assert_eq!(config.uploads.part_size_bytes, 6 * 1024 * 1024);
        assert_eq!(config.uploads.stale_upload_secs, 1800);
    }
}
