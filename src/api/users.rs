use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditEntry, write_audit};
use crate::auth::middleware::Actor;
use crate::auth::role::Role;
use crate::error::ApiError;
use crate::identity::IdentityError;
use crate::store::AppState;
use crate::validation;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub uid: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub message: &'static str,
    pub uid: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub id_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct UserRow {
    pub uid: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for UserResponse {
    type Error = ApiError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            role: row.role.parse().map_err(ApiError::Internal)?,
            uid: row.uid,
            name: row.name,
            email: row.email,
            created_at: row.created_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(me))
}

// ---------------------------------------------------------------------------
// Shared user-store helpers (also used by admin)
// ---------------------------------------------------------------------------

pub(crate) async fn fetch_user(
    pool: &sqlx::PgPool,
    uid: &str,
) -> Result<Option<UserRow>, ApiError> {
    let row = sqlx::query_as::<_, UserRow>(
        "SELECT uid, name, email, role, created_at FROM users WHERE uid = $1",
    )
    .bind(uid)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub(crate) async fn fetch_user_by_email(
    pool: &sqlx::PgPool,
    email: &str,
) -> Result<Option<UserRow>, ApiError> {
    let row = sqlx::query_as::<_, UserRow>(
        "SELECT uid, name, email, role, created_at FROM users WHERE lower(email) = lower($1)",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Create the identity account and its `users` row.
///
/// The two stores share no transaction. If the row insert fails the freshly
/// created identity account is deleted again so no orphan is left behind.
pub(crate) async fn create_account(
    state: &AppState,
    name: &str,
    email: &str,
    password: &str,
    role: Role,
) -> Result<UserRow, ApiError> {
    if fetch_user_by_email(&state.pool, email).await?.is_some() {
        return Err(ApiError::Conflict(
            "Ya existe un usuario con ese correo".into(),
        ));
    }

    let uid = state.identity.create_account(email, password, name).await?;

    let inserted = sqlx::query_as::<_, UserRow>(
        r"
        INSERT INTO users (uid, name, email, role)
        VALUES ($1, $2, $3, $4)
        RETURNING uid, name, email, role, created_at
        ",
    )
    .bind(&uid)
    .bind(name)
    .bind(email)
    .bind(role.as_str())
    .fetch_one(&state.pool)
    .await;

    match inserted {
        Ok(row) => Ok(row),
        Err(err) => {
            if let Err(cleanup) = state.identity.delete_account(&uid).await {
                tracing::warn!(
                    %uid,
                    error = %cleanup,
                    "failed to remove identity account after user insert failure"
                );
            }
            Err(err.into())
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, body), fields(email = ?body.email), err)]
async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validation::require(&[
        ("name", body.name.as_deref()),
        ("email", body.email.as_deref()),
        ("password", body.password.as_deref()),
    ])?;
    let name = body.name.unwrap_or_default().trim().to_owned();
    let email = body.email.unwrap_or_default().trim().to_owned();
    let password = body.password.unwrap_or_default();

    validation::check_length("name", &name, 1, 255)?;
    validation::check_email(&email)?;

    let user = create_account(&state, &name, &email, &password, Role::Alumno).await?;

    write_audit(
        &state.pool,
        &AuditEntry {
            actor_uid: &user.uid,
            actor_name: &user.name,
            action: "auth.register",
            resource: "user",
            resource_id: Some(user.uid.clone()),
            detail: None,
            ip_addr: None,
        },
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "Usuario registrado correctamente",
            "uid": user.uid,
        })),
    ))
}

#[tracing::instrument(skip(state, body), fields(email = ?body.email), err)]
async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    validation::require(&[
        ("email", body.email.as_deref()),
        ("password", body.password.as_deref()),
    ])?;
    let email = body.email.unwrap_or_default().trim().to_owned();
    let password = body.password.unwrap_or_default();

    // Throttling and other credential codes all read as a failed login.
    let signed = state
        .identity
        .sign_in(&email, &password)
        .await
        .map_err(|e| match e {
            IdentityError::Rejected(code) => {
                tracing::info!(%code, "sign-in rejected");
                ApiError::Unauthorized("Credenciales inválidas".into())
            }
            other => other.into(),
        })?;

    // The provider just minted this token; a mismatch means something is off
    // upstream and the session must not be handed out.
    let verified_uid = state.identity.verify_id_token(&signed.id_token).await?;
    if verified_uid != signed.uid {
        tracing::warn!(uid = %signed.uid, %verified_uid, "id token does not match sign-in");
        return Err(ApiError::Unauthorized("Token inválido tras login".into()));
    }

    let user = fetch_user(&state.pool, &signed.uid)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Usuario no encontrado".into()))?;
    let user = UserResponse::try_from(user)?;

    tracing::info!(uid = %user.uid, role = %user.role, "login");

    Ok(Json(LoginResponse {
        message: "Login exitoso",
        uid: user.uid,
        name: user.name,
        email: user.email,
        role: user.role,
        id_token: signed.id_token,
        refresh_token: signed.refresh_token,
        expires_in: signed.expires_in,
    }))
}

async fn me(State(state): State<AppState>, actor: Actor) -> Result<Json<UserResponse>, ApiError> {
    let user = fetch_user(&state.pool, &actor.uid)
        .await?
        .ok_or_else(|| ApiError::NotFound("Usuario no encontrado".into()))?;
    Ok(Json(user.try_into()?))
}
