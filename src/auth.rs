use crate::database;
use crate::handlers::common::{ApiError, api_error};
use crate::types::{AppState, Role};
use anyhow::Result;
use argon2::password_hash::{PasswordHasher, SaltString};
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::extract::{ConnectInfo, FromRequestParts, OptionalFromRequestParts};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode, header};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

pub const FINGERPRINT_HEADER: &str = "x-device-fingerprint";

const MISSING_AUTH: &str = "Missing or invalid authorization header";
const INVALID_TOKEN: &str = "Invalid token";

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn signer(secret: &str, user_id: &str, expires_at: u64) -> Hmac<Sha256> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    // \x1F keeps the two fields unambiguous
    mac.update(format!("{}\x1F{}", user_id, expires_at).as_bytes());
    mac
}

/// `{user_id}.{expires_at}.{hex signature}`
pub fn generate_token(user_id: &str, secret: &str, ttl_secs: u64) -> (String, u64) {
    let expires_at = unix_now() + ttl_secs;
    let signature = hex::encode(signer(secret, user_id, expires_at).finalize().into_bytes());
    (format!("{}.{}.{}", user_id, expires_at, signature), expires_at)
}

/// Returns the user id for a well-formed, unexpired, correctly signed token.
pub fn verify_token(token: &str, secret: &str) -> Option<String> {
    let mut parts = token.rsplitn(3, '.');
    let signature = parts.next()?;
    let expires_at: u64 = parts.next()?.parse().ok()?;
    let user_id = parts.next()?;

    if user_id.is_empty() || unix_now() > expires_at {
        return None;
    }

    let sig_bytes = hex::decode(signature).ok()?;
    signer(secret, user_id, expires_at)
        .verify_slice(&sig_bytes)
        .ok()?;
    Some(user_id.to_string())
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(rand::thread_rng());
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();
    Ok(hash)
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// A signed-in caller with the roles held at request time.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: String,
    pub roles: Vec<Role>,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }
}

async fn authenticate(parts: &Parts, state: &AppState) -> Result<Option<AuthUser>, ApiError> {
    let Some(token) = bearer_token(&parts.headers) else {
        return Ok(None);
    };
    let user_id = verify_token(token, &state.config.server.secret_key)
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, INVALID_TOKEN))?;
    let roles = database::get_roles(&state.db_pool, &user_id)
        .await
        .map_err(state.internal_err())?;
    // every profile holds `user`; no roles means the account is gone
    if roles.is_empty() {
        return Err(api_error(StatusCode::UNAUTHORIZED, INVALID_TOKEN));
    }
    Ok(Some(AuthUser { user_id, roles }))
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        authenticate(parts, state)
            .await?
            .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, MISSING_AUTH))
    }
}

/// `Option<AuthUser>`: anonymous callers pass through, bad tokens are still rejected.
impl OptionalFromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Option<Self>, Self::Rejection> {
        authenticate(parts, state).await
    }
}

/// Caller holding the `admin` role.
#[derive(Clone, Debug)]
pub struct AdminUser(pub AuthUser);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = <AuthUser as FromRequestParts<AppState>>::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(api_error(StatusCode::FORBIDDEN, "Admin access required"));
        }
        Ok(AdminUser(user))
    }
}

/// Where a request came from. Extracted once per request and passed down.
#[derive(Clone, Debug, Default)]
pub struct ClientContext {
    pub ip: Option<String>,
    pub fingerprint: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientContext {
    /// The socket address is the client address unless `trust_forwarded_for`
    /// is set, in which case the entry appended by our proxy (the last one in
    /// `X-Forwarded-For`) is used.
    pub fn from_parts(parts: &Parts, trust_forwarded_for: bool) -> Self {
        let header_str = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
        };

        let forwarded = trust_forwarded_for
            .then(|| header_str("x-forwarded-for"))
            .flatten()
            .and_then(|v| v.rsplit(',').next().map(|ip| ip.trim().to_string()))
            .filter(|ip| !ip.is_empty());
        let ip = forwarded.or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });

        Self {
            ip,
            fingerprint: header_str(FINGERPRINT_HEADER),
            user_agent: header_str(header::USER_AGENT.as_str()),
        }
    }

    /// Key for per-client rate limiting.
    pub fn rate_limit_key(&self) -> &str {
        self.ip.as_deref().unwrap_or("unknown")
    }
}

impl FromRequestParts<AppState> for ClientContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(ClientContext::from_parts(
            parts,
            state.config.server.trust_forwarded_for,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[test]
    fn token_round_trip() {
        let (token, expires_at) = generate_token("user-1", "secret", 3600);
        assert!(expires_at > unix_now());
        assert_eq!(verify_token(&token, "secret").as_deref(), Some("user-1"));
    }

    #[test]
    fn tampered_or_foreign_tokens_fail() {
        let (token, _) = generate_token("user-1", "secret", 3600);
        assert!(verify_token(&token, "other-secret").is_none());

        let forged = token.replacen("user-1", "user-2", 1);
        assert!(verify_token(&forged, "secret").is_none());

        assert!(verify_token("garbage", "secret").is_none());
        assert!(verify_token("a.b.c", "secret").is_none());
        assert!(verify_token("", "secret").is_none());
    }

    #[test]
    fn expired_tokens_fail() {
        let expires_at = unix_now() - 10;
        let sig = hex::encode(signer("secret", "user-1", expires_at).finalize().into_bytes());
        let token = format!("user-1.{}.{}", expires_at, sig);
        assert!(verify_token(&token, "secret").is_none());
    }

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("correct horse", "not-a-hash"));
    }

    #[test]
    fn bearer_prefix_required() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Token abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc"));
        headers.insert(header::AUTHORIZATION, "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    fn parts_from(forwarded: Option<&str>) -> Parts {
        let mut req = Request::builder()
            .header(FINGERPRINT_HEADER, "fp-123")
            .header(header::USER_AGENT, "test-agent");
        if let Some(forwarded) = forwarded {
            req = req.header("x-forwarded-for", forwarded);
        }
        let (mut parts, _) = req.body(()).unwrap().into_parts();
        parts
            .extensions
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 9000))));
        parts
    }

    #[test]
    fn client_context_uses_socket_address_by_default() {
        let parts = parts_from(Some("203.0.113.7"));
        let ctx = ClientContext::from_parts(&parts, false);
        assert_eq!(ctx.ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(ctx.rate_limit_key(), "127.0.0.1");
        assert_eq!(ctx.fingerprint.as_deref(), Some("fp-123"));
        assert_eq!(ctx.user_agent.as_deref(), Some("test-agent"));
    }

    #[test]
    fn trusted_proxy_address_is_the_last_forwarded_entry() {
        let parts = parts_from(Some("7.7.7.7, 203.0.113.7"));
        let ctx = ClientContext::from_parts(&parts, true);
        assert_eq!(ctx.ip.as_deref(), Some("203.0.113.7"));

        let parts = parts_from(None);
        let ctx = ClientContext::from_parts(&parts, true);
        assert_eq!(ctx.ip.as_deref(), Some("127.0.0.1"));
    }
}
