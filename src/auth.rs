// Authentication: password hashing, signed session cookies, and extractors.
//
// A session is a JWT carried in an HttpOnly `session` cookie, valid for
// seven days, verified on every request. There is no server-side session
// store or revocation. When no signing secret is configured, no token can
// be issued or verified, so every authenticated request fails.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::AppState;
use crate::config::Config;

pub const SESSION_COOKIE: &str = "session";
const SESSION_TTL_DAYS: i64 = 7;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_CHARACTER: &str = "character";

// ── Session tokens ───────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub role: String,
    /// Character id. Admin sessions carry no id.
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    pub exp: usize,
}

pub fn create_token(
    secret: &[u8],
    role: &str,
    id: Option<i64>,
    name: &str,
) -> Result<String, String> {
    let expiration = chrono::Utc::now()
        .checked_add_signed(chrono::Duration::days(SESSION_TTL_DAYS))
        .expect("valid timestamp")
        .timestamp() as usize;

    let claims = Claims {
        role: role.to_string(),
        id,
        name: name.to_string(),
        exp: expiration,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
        .map_err(|e| format!("Failed to create token: {e}"))
}

pub fn verify_token(secret: &[u8], token: &str) -> Result<Claims, String> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret), &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| format!("Invalid token: {e}"))
}

/// Build the session cookie. Expiry is enforced by the token's `exp`
/// claim rather than a cookie max-age.
pub fn session_cookie(token: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, token);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie
}

fn removal_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, "");
    cookie.set_path("/");
    cookie
}

// ── Password hashing ─────────────────────────────────────────────────

pub fn hash_password(password: &str) -> Result<String, String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| format!("Failed to hash password: {e}"))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, String> {
    let parsed_hash = PasswordHash::new(hash).map_err(|e| format!("Invalid password hash: {e}"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

// ── Extractors ───────────────────────────────────────────────────────

/// Claims from the request's session cookie, if any. Missing config,
/// missing secret, missing cookie, and bad signatures all read as no
/// session.
fn claims_from_parts(parts: &Parts) -> Option<Claims> {
    let config = parts.extensions.get::<Arc<Config>>()?;
    let secret = config.jwt_secret.as_deref()?;
    let jar = CookieJar::from_headers(&parts.headers);
    let token = jar.get(SESSION_COOKIE)?.value().to_string();
    verify_token(secret.as_bytes(), &token).ok()
}

fn auth_error(status: StatusCode, msg: &str) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(serde_json::json!({ "error": msg })))
}

/// Extracts any valid session, or `None` without rejecting.
#[derive(Debug, Clone)]
pub struct OptionalSession(pub Option<Claims>);

impl<S> FromRequestParts<S> for OptionalSession
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalSession(claims_from_parts(parts)))
    }
}

/// Requires a character session: 401 without a session, 403 when the
/// session belongs to an admin.
#[derive(Debug, Clone)]
pub struct CharacterSession {
    pub id: i64,
    pub name: String,
}

impl<S> FromRequestParts<S> for CharacterSession
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let claims = claims_from_parts(parts)
            .ok_or_else(|| auth_error(StatusCode::UNAUTHORIZED, "login required"))?;
        match (claims.role.as_str(), claims.id) {
            (ROLE_CHARACTER, Some(id)) => Ok(CharacterSession {
                id,
                name: claims.name,
            }),
            _ => Err(auth_error(
                StatusCode::FORBIDDEN,
                "character session required",
            )),
        }
    }
}

/// Requires an admin session: 401 without a session, 403 otherwise.
#[derive(Debug, Clone)]
pub struct AdminSession(pub Claims);

impl<S> FromRequestParts<S> for AdminSession
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let claims = claims_from_parts(parts)
            .ok_or_else(|| auth_error(StatusCode::UNAUTHORIZED, "login required"))?;
        if claims.role == ROLE_ADMIN {
            Ok(AdminSession(claims))
        } else {
            Err(auth_error(StatusCode::FORBIDDEN, "admin only"))
        }
    }
}

// ── Auth API handlers ────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct LoginRequest {
    pub name: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    let Some(secret) = state.config.jwt_secret.clone() else {
        tracing::error!("login attempted but JWT_SECRET is not configured");
        return auth_error(StatusCode::INTERNAL_SERVER_ERROR, "sessions are disabled")
            .into_response();
    };

    // Admin accounts take precedence over characters with the same name.
    match state.db.get_admin_by_name(&req.name).await {
        Ok(Some(admin)) => {
            if !verify_password(&req.password, &admin.password_hash).unwrap_or(false) {
                return auth_error(StatusCode::UNAUTHORIZED, "invalid credentials")
                    .into_response();
            }
            let token = match create_token(secret.as_bytes(), ROLE_ADMIN, None, &admin.name) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!("Token creation error: {e}");
                    return auth_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
                        .into_response();
                }
            };
            return (
                jar.add(session_cookie(token)),
                Json(serde_json::json!({
                    "ok": true,
                    "role": ROLE_ADMIN,
                    "user": { "name": admin.name },
                })),
            )
                .into_response();
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!("DB error in login: {e}");
            return auth_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
                .into_response();
        }
    }

    let character = match state.db.get_character_by_name(&req.name).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            return auth_error(StatusCode::UNAUTHORIZED, "invalid credentials").into_response()
        }
        Err(e) => {
            tracing::error!("DB error in login: {e}");
            return auth_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
                .into_response();
        }
    };

    let Some(ref password_hash) = character.password_hash else {
        return auth_error(StatusCode::UNAUTHORIZED, "invalid credentials").into_response();
    };
    if !verify_password(&req.password, password_hash).unwrap_or(false) {
        return auth_error(StatusCode::UNAUTHORIZED, "invalid credentials").into_response();
    }

    let token = match create_token(
        secret.as_bytes(),
        ROLE_CHARACTER,
        Some(character.id),
        &character.name,
    ) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("Token creation error: {e}");
            return auth_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
                .into_response();
        }
    };

    (
        jar.add(session_cookie(token)),
        Json(serde_json::json!({
            "ok": true,
            "role": ROLE_CHARACTER,
            "user": { "id": character.id, "name": character.name },
        })),
    )
        .into_response()
}

pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    (
        jar.remove(removal_cookie()),
        Json(serde_json::json!({ "ok": true })),
    )
}

/// Current session's character row, or `{"user": null}` when there is no
/// session or it does not map to a character.
pub async fn me(
    State(state): State<AppState>,
    OptionalSession(claims): OptionalSession,
) -> impl IntoResponse {
    let Some(id) = claims.and_then(|c| c.id) else {
        return Json(serde_json::json!({ "user": null })).into_response();
    };
    match state.db.get_character(id).await {
        Ok(Some(character)) => {
            Json(serde_json::json!({ "user": character })).into_response()
        }
        Ok(None) => Json(serde_json::json!({ "user": null })).into_response(),
        Err(e) => {
            tracing::error!("DB error in me: {e}");
            auth_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_and_verify() {
        let password = "testpassword123";
        let hash = hash_password(password).unwrap();
        assert!(verify_password(password, &hash).unwrap());
        assert!(!verify_password("wrongpassword", &hash).unwrap());
    }

    #[test]
    fn test_token_create_and_verify() {
        let secret = b"test-secret";
        let token = create_token(secret, ROLE_CHARACTER, Some(7), "Ares").unwrap();
        let claims = verify_token(secret, &token).unwrap();
        assert_eq!(claims.role, ROLE_CHARACTER);
        assert_eq!(claims.id, Some(7));
        assert_eq!(claims.name, "Ares");
    }

    #[test]
    fn test_admin_token_has_no_id() {
        let secret = b"test-secret";
        let token = create_token(secret, ROLE_ADMIN, None, "admin").unwrap();
        let claims = verify_token(secret, &token).unwrap();
        assert_eq!(claims.role, ROLE_ADMIN);
        assert!(claims.id.is_none());
    }

    #[test]
    fn test_token_rejects_wrong_secret() {
        let token = create_token(b"secret-a", ROLE_CHARACTER, Some(1), "Ares").unwrap();
        assert!(verify_token(b"secret-b", &token).is_err());
        assert!(verify_token(b"secret-a", "garbage.token.here").is_err());
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session_cookie("tok".to_string());
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
    }
}
