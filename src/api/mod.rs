// HTTP API routes: characters, battles, leaderboard, records, admin.

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::auth::{self, AdminSession, CharacterSession, ROLE_CHARACTER};
use crate::battle::{self, BattleError};
use crate::config::Config;
use crate::db::{is_unique_violation, Database};
use crate::judge::JudgeClient;
use crate::locks::BattleLocks;
use crate::metrics;

/// Password assigned to characters registered without one, mirroring the
/// original deployment's fixed credential.
const DEFAULT_CHARACTER_PASSWORD: &str = "Neuron";

// ── Request types ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateCharacterRequest {
    pub name: String,
    pub description: String,
    pub password: Option<String>,
}

#[derive(Deserialize)]
pub struct MaintenanceRequest {
    pub action: String,
    pub confirm: Option<String>,
    pub id: Option<i64>,
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct WipeCharactersRequest {
    pub confirm: Option<String>,
}

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub config: Arc<Config>,
    pub judge: Option<Arc<JudgeClient>>,
    pub locks: BattleLocks,
}

// ── Error helpers ─────────────────────────────────────────────────────

fn json_error(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(json!({ "error": msg })))
}

fn internal_error(e: sqlx::Error) -> impl IntoResponse {
    tracing::error!("Database error: {e}");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Auth
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        // Characters
        .route(
            "/api/characters",
            get(list_characters).post(create_character),
        )
        .route("/api/leaderboard", get(leaderboard))
        .route("/api/records/{id}", get(get_records))
        // Battles
        .route("/api/battle", post(post_battle))
        // Admin
        .route("/api/admin/maintenance", post(admin_maintenance))
        .route("/api/admin/wipe-characters", post(admin_wipe_characters))
        // Monitoring
        .route("/metrics", get(get_metrics))
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "arena-backend" }))
}

async fn get_metrics() -> String {
    metrics::gather_metrics()
}

// ── Character handlers ────────────────────────────────────────────────

async fn list_characters(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.list_characters().await {
        Ok(characters) => (StatusCode::OK, Json(json!(characters))).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn create_character(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<CreateCharacterRequest>,
) -> impl IntoResponse {
    let name = req.name.trim().to_string();
    let description = req.description.trim().to_string();

    if name.is_empty() || name.chars().count() > 24 {
        return json_error(StatusCode::BAD_REQUEST, "name must be 1-24 characters")
            .into_response();
    }
    if description.is_empty() || description.chars().count() > 100 {
        return json_error(
            StatusCode::BAD_REQUEST,
            "description must be 1-100 characters",
        )
        .into_response();
    }

    let password = req
        .password
        .as_deref()
        .unwrap_or(DEFAULT_CHARACTER_PASSWORD);
    let password_hash = match auth::hash_password(password) {
        Ok(h) => h,
        Err(e) => {
            tracing::error!("Password hash error: {e}");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
                .into_response();
        }
    };

    let character = match state
        .db
        .create_character(&name, &description, &password_hash)
        .await
    {
        Ok(c) => c,
        Err(e) if is_unique_violation(&e) => {
            return json_error(StatusCode::CONFLICT, "name already taken").into_response();
        }
        Err(e) => return internal_error(e).into_response(),
    };

    metrics::CHARACTERS_CREATED_TOTAL.inc();

    // Switch the session to the new character right away, as the original
    // registration flow did. Without a signing secret the character is
    // still created, just not logged in.
    let jar = match state.config.jwt_secret.as_deref() {
        Some(secret) => match auth::create_token(
            secret.as_bytes(),
            ROLE_CHARACTER,
            Some(character.id),
            &character.name,
        ) {
            Ok(token) => jar.add(auth::session_cookie(token)),
            Err(e) => {
                tracing::warn!("could not issue session for new character: {e}");
                jar
            }
        },
        None => jar,
    };

    (jar, (StatusCode::OK, Json(json!(character)))).into_response()
}

async fn leaderboard(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.leaderboard().await {
        Ok(characters) => (StatusCode::OK, Json(json!(characters))).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn get_records(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    let character = match state.db.get_character(id).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            return json_error(StatusCode::NOT_FOUND, "character not found").into_response()
        }
        Err(e) => return internal_error(e).into_response(),
    };
    match state.db.battles_for_character(id).await {
        Ok(battles) => (
            StatusCode::OK,
            Json(json!({ "user": character, "battles": battles })),
        )
            .into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

// ── Battle handler ────────────────────────────────────────────────────

async fn post_battle(
    State(state): State<AppState>,
    session: CharacterSession,
) -> impl IntoResponse {
    match battle::run_battle(
        &state.db,
        state.judge.as_deref(),
        &state.locks,
        session.id,
    )
    .await
    {
        Ok(outcome) => (StatusCode::OK, Json(json!(outcome))).into_response(),
        Err(BattleError::Cooldown { remain }) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "cooldown", "remain": remain })),
        )
            .into_response(),
        Err(BattleError::NoOpponent) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "no available opponent" })),
        )
            .into_response(),
        Err(BattleError::UnknownCharacter) => {
            json_error(StatusCode::NOT_FOUND, "character not found").into_response()
        }
        Err(BattleError::Db(e)) => internal_error(e).into_response(),
    }
}

// ── Admin handlers ────────────────────────────────────────────────────

fn ok_json(value: serde_json::Value) -> axum::response::Response {
    (StatusCode::OK, Json(value)).into_response()
}

async fn admin_maintenance(
    State(state): State<AppState>,
    _admin: AdminSession,
    Json(req): Json<MaintenanceRequest>,
) -> impl IntoResponse {
    let action = req.action.as_str();

    // The more destructive the action, the more confirmation it needs.
    let needs_confirm = matches!(action, "wipeAll" | "dropAll" | "resetRatings");
    if needs_confirm && req.confirm.as_deref() != Some("YES") {
        return json_error(
            StatusCode::BAD_REQUEST,
            r#"dangerous operation, provide {"confirm": "YES"}"#,
        )
        .into_response();
    }

    let result = match action {
        "status" => state
            .db
            .table_counts()
            .await
            .map(|(characters, battles)| {
                json!({ "ok": true, "characters": characters, "battles": battles })
            }),
        "backup" => state
            .db
            .backup_tables()
            .await
            .map(|backups| json!({ "ok": true, "backups": backups })),
        "clearBattles" => state
            .db
            .clear_battles()
            .await
            .map(|deleted| json!({ "ok": true, "deleted_battles": deleted })),
        "resetRatings" => state
            .db
            .reset_ratings()
            .await
            .map(|_| json!({ "ok": true, "done": true })),
        "wipeAll" => state
            .db
            .wipe_all()
            .await
            .map(|_| json!({ "ok": true, "done": true })),
        "dropAll" => state
            .db
            .drop_all()
            .await
            .map(|_| json!({ "ok": true, "dropped": ["battles", "characters"] })),
        "deleteCharacter" => {
            let result = if let Some(id) = req.id {
                state.db.delete_character_by_id(id).await
            } else if let Some(name) = req.name.as_deref() {
                state.db.delete_character_by_name(name).await
            } else {
                return json_error(StatusCode::BAD_REQUEST, "require id or name")
                    .into_response();
            };
            result.map(|deleted| json!({ "ok": true, "deleted": deleted }))
        }
        _ => {
            return json_error(StatusCode::BAD_REQUEST, "unknown action").into_response();
        }
    };

    match result {
        Ok(body) => {
            tracing::info!(action, "admin maintenance action completed");
            ok_json(body)
        }
        Err(e) => internal_error(e).into_response(),
    }
}

async fn admin_wipe_characters(
    State(state): State<AppState>,
    _admin: AdminSession,
    Json(req): Json<WipeCharactersRequest>,
) -> impl IntoResponse {
    if req.confirm.as_deref() != Some("YES") {
        return json_error(
            StatusCode::BAD_REQUEST,
            r#"provide {"confirm": "YES"} to proceed"#,
        )
        .into_response();
    }
    match state.db.delete_all_characters().await {
        Ok(deleted) => {
            tracing::info!(deleted, "all characters wiped");
            ok_json(json!({
                "ok": true,
                "message": "all characters deleted (and cascaded battles cleared)",
            }))
        }
        Err(e) => internal_error(e).into_response(),
    }
}
