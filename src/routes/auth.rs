/**
 * Auth Routes
 * Signup with an emailed confirmation code, then exchange of the code for
 * JWT session credentials (refresh + derived access token).
 */
use axum::{http::HeaderMap, http::StatusCode, response::IntoResponse, Json};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{self, models::Role, models::User};
use crate::error::{translate_constraint, ApiError};
use crate::notify;
use crate::permissions::Actor;
use crate::validation::{validate_confirmation_code, validate_email, validate_username};

// ============================================================================
// Configuration
// ============================================================================

lazy_static::lazy_static! {
    /// JWT secret key from environment
    pub static ref JWT_SECRET: String = std::env::var("JWT_SECRET")
        .unwrap_or_else(|_| "default-jwt-secret-change-in-production".to_string());

    /// Refresh token secret (can be same as JWT_SECRET or different)
    pub static ref REFRESH_SECRET: String = std::env::var("REFRESH_TOKEN_SECRET")
        .unwrap_or_else(|_| JWT_SECRET.clone());
}

/// Access token expiry in minutes
const ACCESS_TOKEN_EXPIRY_MINUTES: i64 = 15;

/// Refresh token expiry in days
const REFRESH_TOKEN_EXPIRY_DAYS: i64 = 7;

// ============================================================================
// Types
// ============================================================================

/// JWT Claims structure, shared by access and refresh tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub role: Role,
    pub is_staff: bool,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TokenRequest {
    pub username: String,
    pub confirmation_code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub refresh: String,
    pub access: String,
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Generate a confirmation code: five groups of 4-digit numbers joined by
/// hyphens, e.g. `4821-9340-1177-5006-2903`.
fn generate_confirmation_code() -> String {
    let mut rng = rand::rng();
    (0..5)
        .map(|_| rng.random_range(1000..=9999).to_string())
        .collect::<Vec<_>>()
        .join("-")
}

fn claims_for(user: &User, ttl: Duration) -> Claims {
    let now = Utc::now();
    Claims {
        sub: user.id,
        username: user.username.clone(),
        role: user.role,
        is_staff: user.is_staff,
        exp: (now + ttl).timestamp(),
        iat: now.timestamp(),
    }
}

fn create_refresh_token(user: &User) -> Result<String, jsonwebtoken::errors::Error> {
    encode(
        &Header::default(),
        &claims_for(user, Duration::days(REFRESH_TOKEN_EXPIRY_DAYS)),
        &EncodingKey::from_secret(REFRESH_SECRET.as_bytes()),
    )
}

fn decode_refresh_token(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(REFRESH_SECRET.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

/// Mint a short-lived access token carrying the identity of a (decoded)
/// refresh token.
fn access_token_from_claims(claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let access_claims = Claims {
        exp: (now + Duration::minutes(ACCESS_TOKEN_EXPIRY_MINUTES)).timestamp(),
        iat: now.timestamp(),
        ..claims.clone()
    };
    encode(
        &Header::default(),
        &access_claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
}

/// Verify and decode access token
pub fn verify_access_token(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(JWT_SECRET.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Resolve the request's actor. No Authorization header means an anonymous
/// request; a header that fails verification is an authentication error
/// even on read paths.
pub fn current_actor(headers: &HeaderMap) -> Result<Option<Actor>, ApiError> {
    let Some(token) = extract_bearer_token(headers) else {
        return Ok(None);
    };
    match verify_access_token(&token) {
        Ok(claims) => Ok(Some(Actor {
            id: claims.sub,
            username: claims.username,
            role: claims.role,
            is_staff: claims.is_staff,
        })),
        Err(e) => {
            tracing::debug!("token verification failed: {}", e);
            Err(ApiError::AuthRequired)
        }
    }
}

/// Issue the session credential pair: a refresh token, and an access token
/// derived from that refresh token's decoded claims.
fn issue_token_pair(user: &User) -> Result<TokenResponse, ApiError> {
    let refresh = create_refresh_token(user)
        .map_err(|e| ApiError::Internal(format!("failed to create refresh token: {}", e)))?;
    let refresh_claims = decode_refresh_token(&refresh)
        .map_err(|e| ApiError::Internal(format!("failed to decode refresh token: {}", e)))?;
    let access = access_token_from_claims(&refresh_claims)
        .map_err(|e| ApiError::Internal(format!("failed to create access token: {}", e)))?;
    Ok(TokenResponse { refresh, access })
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/auth/signup
///
/// Register (or re-request a code for) a username/email pair. Repeating a
/// signup with the exact same pair is idempotent: the stored code is
/// re-sent, not regenerated. A pair colliding with another record on
/// username or email alone is rejected with the matching collision error.
pub async fn signup(Json(payload): Json<SignupRequest>) -> Result<impl IntoResponse, ApiError> {
    validate_username(&payload.username)?;
    validate_email(&payload.email)?;

    let pool = db::pool()?;

    let existing: Option<(String,)> =
        sqlx::query_as("SELECT confirmation_code FROM users WHERE username = $1 AND email = $2")
            .bind(&payload.username)
            .bind(&payload.email)
            .fetch_optional(pool.as_ref())
            .await?;

    let code = match existing {
        Some((code,)) => {
            tracing::info!("repeated signup for {}, resending code", payload.username);
            code
        }
        None => {
            let code = generate_confirmation_code();
            sqlx::query(
                "INSERT INTO users (username, email, confirmation_code) VALUES ($1, $2, $3)",
            )
            .bind(&payload.username)
            .bind(&payload.email)
            .bind(&code)
            .execute(pool.as_ref())
            .await
            .map_err(translate_constraint)?;
            tracing::info!("registered new user {}", payload.username);
            code
        }
    };

    // Fire-and-forget: a delivery failure must not undo the registration.
    notify::send_confirmation_code(&payload.email, &code);

    Ok((StatusCode::OK, Json(payload)))
}

/// POST /api/v1/auth/token
///
/// Exchange username + confirmation code for session credentials. The code
/// comparison is byte-for-byte; the code survives the exchange.
pub async fn token(Json(payload): Json<TokenRequest>) -> Result<impl IntoResponse, ApiError> {
    validate_username(&payload.username)?;
    validate_confirmation_code(&payload.confirmation_code)?;

    let pool = db::pool()?;

    let user: User = sqlx::query_as(
        "SELECT id, username, email, first_name, last_name, bio, role, is_staff, \
                confirmation_code, created_at \
         FROM users WHERE username = $1",
    )
    .bind(&payload.username)
    .fetch_optional(pool.as_ref())
    .await?
    .ok_or(ApiError::NotFound("user"))?;

    if user.confirmation_code != payload.confirmation_code {
        tracing::warn!("invalid confirmation_code for {}", payload.username);
        return Err(ApiError::Validation {
            field: "confirmation_code",
            message: "invalid confirmation_code".to_string(),
        });
    }

    let tokens = issue_token_pair(&user)?;
    tracing::info!("issued tokens for {}", user.username);

    Ok((StatusCode::OK, Json(tokens)))
}

// ============================================================================
// Test helpers
// ============================================================================

/// Mint a valid access token for route tests.
#[cfg(test)]
pub(crate) fn test_access_token(role: Role, is_staff: bool) -> String {
    test_access_token_for(Uuid::new_v4(), "tester", role, is_staff)
}

#[cfg(test)]
pub(crate) fn test_access_token_for(
    id: Uuid,
    username: &str,
    role: Role,
    is_staff: bool,
) -> String {
    let now = Utc::now();
    let claims = Claims {
        sub: id,
        username: username.to_string(),
        role,
        is_staff,
        exp: (now + Duration::minutes(ACCESS_TOKEN_EXPIRY_MINUTES)).timestamp(),
        iat: now.timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}
