//! Token issuance and verification.
//!
//! Access tokens are JWTs whose lifetime matches KV session presence; refresh
//! tokens are opaque and live only in the KV layer. Guests never touch any of
//! this — their credential is the listen-hub guest token.
use super::{ApiError, AppState};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::{info, warn};
use uuid::Uuid;

/// Cookie carrying the access token for browser streaming.
pub const TOKEN_COOKIE: &str = "orb_token";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: u64,
    exp: u64,
}

/// JWT signing/verification plus password hashing.
#[derive(Clone)]
pub struct AuthService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl_secs: u64,
}

impl AuthService {
    pub fn new(secret: &str, access_ttl_secs: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl_secs,
        }
    }

    pub fn access_ttl_secs(&self) -> u64 {
        self.access_ttl_secs
    }

    pub fn issue_access_token(&self, user_id: Uuid) -> Result<String, ApiError> {
        let now = crate::util::now_ms() as u64 / 1000;
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now,
            exp: now + self.access_ttl_secs,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| ApiError::Internal(format!("failed to sign token: {}", e)))
    }

    /// User id from a valid, unexpired token.
    pub fn verify(&self, token: &str) -> Option<Uuid> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default()).ok()?;
        Uuid::parse_str(&data.claims.sub).ok()
    }

    pub fn hash_password(password: &str) -> Result<String, ApiError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| ApiError::Internal(format!("failed to hash password: {}", e)))
    }

    pub fn verify_password(hash: &str, password: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}

/// Pull a token from the request: `Authorization: Bearer`, then `?token=`,
/// then the `orb_token` cookie.
pub fn extract_token(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }

    if let Some(token) = query.get("token") {
        if !token.is_empty() {
            return Some(token.clone());
        }
    }

    if let Some(cookies) = headers.get(axum::http::header::COOKIE) {
        if let Ok(cookies) = cookies.to_str() {
            for pair in cookies.split(';') {
                let pair = pair.trim();
                if let Some(value) = pair.strip_prefix(&format!("{}=", TOKEN_COOKIE)) {
                    if !value.is_empty() {
                        return Some(value.to_string());
                    }
                }
            }
        }
    }

    None
}

/// Authenticate a request: valid JWT plus live session presence in the KV
/// layer, so logout takes effect before token expiry.
pub async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Result<Uuid, ApiError> {
    let token = extract_token(headers, query)
        .ok_or_else(|| ApiError::Unauthorized("missing token".to_string()))?;
    let user_id = state
        .auth
        .verify(&token)
        .ok_or_else(|| ApiError::Unauthorized("invalid token".to_string()))?;
    if !state.kv.session_present(user_id).await? {
        return Err(ApiError::Unauthorized("session expired".to_string()));
    }
    Ok(user_id)
}

// ----------------------------------------------------------------------
// Handlers
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let username = req.username.trim();
    let email = req.email.trim().to_lowercase();
    if username.is_empty() || email.is_empty() || req.password.len() < 8 {
        return Err(ApiError::BadRequest(
            "username, email and a password of at least 8 characters are required".to_string(),
        ));
    }

    let hash = AuthService::hash_password(&req.password)?;
    let user = state.db.create_user(username, &email, &hash).await.map_err(|e| {
        if e.is_unique_violation() {
            ApiError::Conflict("username or email already taken".to_string())
        } else {
            e.into()
        }
    })?;

    info!("registered user {}", user.username);
    Ok(Json(serde_json::json!({ "id": user.id, "username": user.username })))
}

pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let ip = client_ip(&headers, addr);
    let attempts = state.kv.count_login_attempt(&ip).await?;
    if attempts > crate::kv::LOGIN_MAX_ATTEMPTS {
        warn!("login rate limit hit for {}", ip);
        return Err(ApiError::RateLimited);
    }

    let email = req.email.trim().to_lowercase();
    let user = state
        .db
        .get_user_by_email(&email)
        .await?
        .filter(|u| AuthService::verify_password(&u.password_hash, &req.password))
        .ok_or_else(|| ApiError::Unauthorized("wrong email or password".to_string()))?;

    let access_token = state.auth.issue_access_token(user.id)?;
    let refresh_token = Uuid::new_v4().to_string();
    state
        .kv
        .put_login(user.id, &refresh_token, state.auth.access_ttl_secs())
        .await?;
    state.db.update_last_login(user.id).await?;

    info!("user {} logged in", user.username);
    Ok(Json(TokenResponse {
        access_token,
        refresh_token,
        token_type: "Bearer",
        expires_in: state.auth.access_ttl_secs(),
    }))
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let user_id = state
        .kv
        .refresh_token_user(&req.refresh_token)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("invalid refresh token".to_string()))?;

    let access_token = state.auth.issue_access_token(user_id)?;
    let new_refresh = Uuid::new_v4().to_string();
    state
        .kv
        .rotate_refresh(
            user_id,
            &req.refresh_token,
            &new_refresh,
            state.auth.access_ttl_secs(),
        )
        .await?;

    Ok(Json(TokenResponse {
        access_token,
        refresh_token: new_refresh,
        token_type: "Bearer",
        expires_in: state.auth.access_ttl_secs(),
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = authenticate(&state, &headers, &query).await?;
    state.kv.drop_session(user_id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// Client IP for rate limiting: X-Forwarded-For's first hop when present
/// (reverse-proxy deployments), otherwise the socket peer.
fn client_ip(headers: &HeaderMap, addr: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| addr.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_roundtrip() {
        let hash = AuthService::hash_password("hunter2hunter2").unwrap();
        assert!(AuthService::verify_password(&hash, "hunter2hunter2"));
        assert!(!AuthService::verify_password(&hash, "wrong"));
        assert!(!AuthService::verify_password("not-a-hash", "hunter2hunter2"));
    }

    #[test]
    fn token_roundtrip() {
        let auth = AuthService::new("test-secret", 3600);
        let user = Uuid::new_v4();
        let token = auth.issue_access_token(user).unwrap();
        assert_eq!(auth.verify(&token), Some(user));

        // Wrong secret fails verification.
        let other = AuthService::new("other-secret", 3600);
        assert_eq!(other.verify(&token), None);
        assert_eq!(auth.verify("garbage"), None);
    }

    #[test]
    fn token_extraction_order() {
        let mut headers = HeaderMap::new();
        let mut query = HashMap::new();

        assert_eq!(extract_token(&headers, &query), None);

        headers.insert(
            axum::http::header::COOKIE,
            "other=1; orb_token=from-cookie".parse().unwrap(),
        );
        assert_eq!(
            extract_token(&headers, &query),
            Some("from-cookie".to_string())
        );

        query.insert("token".to_string(), "from-query".to_string());
        assert_eq!(
            extract_token(&headers, &query),
            Some("from-query".to_string())
        );

        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer from-header".parse().unwrap(),
        );
        assert_eq!(
            extract_token(&headers, &query),
            Some("from-header".to_string())
        );
    }

    #[test]
    fn client_ip_prefers_forwarded_header() {
        let addr: SocketAddr = "10.1.2.3:9999".parse().unwrap();

        let headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, addr), "10.1.2.3");

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers, addr), "203.0.113.7");
    }
}
