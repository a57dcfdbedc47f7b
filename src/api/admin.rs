use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::api::helpers;
use crate::api::users::{UserResponse, UserRow, create_account};
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
pub struct CreateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EditUserRequest {
    pub uid: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/admin/create-user", post(create_user))
        .route("/api/admin/editar-usuario", put(edit_user))
        .route("/api/admin/eliminar-usuario/{uid}", delete(delete_user))
        .route("/api/admin/listar-usuarios", get(list_users))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, body), fields(actor = %actor.uid), err)]
async fn create_user(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    actor.require(&[Role::Admin], "crear usuarios")?;
    validation::require(&[
        ("name", body.name.as_deref()),
        ("email", body.email.as_deref()),
        ("password", body.password.as_deref()),
        ("role", body.role.as_deref()),
    ])?;

    let role = body
        .role
        .as_deref()
        .and_then(|r| r.trim().parse::<Role>().ok())
        .filter(|r| r.is_staff())
        .ok_or_else(|| {
            ApiError::BadRequest("Rol inválido: solo se permite 'Admin' o 'Maestro'".into())
        })?;
    let name = body.name.unwrap_or_default().trim().to_owned();
    let email = body.email.unwrap_or_default().trim().to_owned();
    let password = body.password.unwrap_or_default();

    validation::check_length("name", &name, 1, 255)?;
    validation::check_email(&email)?;

    let user = create_account(&state, &name, &email, &password, role).await?;

    write_audit(
        &state.pool,
        &AuditEntry::by(&actor, "user.create", "user")
            .resource_id(&user.uid)
            .detail(json!({"email": &user.email, "role": &user.role})),
    )
    .await;

    let user = UserResponse::try_from(user)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": format!("{role} creado correctamente"),
            "user": user,
        })),
    ))
}

#[tracing::instrument(skip(state, body), fields(actor = %actor.uid), err)]
async fn edit_user(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<EditUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    actor.require(&[Role::Admin], "editar usuarios")?;
    validation::require(&[
        ("uid", body.uid.as_deref()),
        ("name", body.name.as_deref()),
        ("role", body.role.as_deref()),
    ])?;
    let uid = body.uid.unwrap_or_default().trim().to_owned();
    let name = body.name.unwrap_or_default().trim().to_owned();
    let role: Role = body
        .role
        .unwrap_or_default()
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest("Rol inválido".into()))?;

    validation::check_length("name", &name, 1, 255)?;

    let updated = sqlx::query("UPDATE users SET name = $2, role = $3 WHERE uid = $1")
        .bind(&uid)
        .bind(&name)
        .bind(role.as_str())
        .execute(&state.pool)
        .await?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::NotFound("Usuario no encontrado".into()));
    }

    state.identity.update_display_name(&uid, &name).await?;

    write_audit(
        &state.pool,
        &AuditEntry::by(&actor, "user.update", "user")
            .resource_id(&uid)
            .detail(json!({"name": &name, "role": role})),
    )
    .await;

    Ok(helpers::message("Usuario actualizado correctamente"))
}

#[tracing::instrument(skip(state), fields(actor = %actor.uid), err)]
async fn delete_user(
    State(state): State<AppState>,
    actor: Actor,
    Path(uid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    actor.require(&[Role::Admin], "eliminar usuarios")?;
    if uid == actor.uid {
        return Err(ApiError::BadRequest(
            "No puedes eliminar tu propia cuenta".into(),
        ));
    }

    // The row goes first inside a transaction; the identity account is only
    // removed once the row delete is known to succeed, and the transaction is
    // rolled back if the provider refuses.
    let mut tx = state.pool.begin().await?;

    let deleted = sqlx::query("DELETE FROM users WHERE uid = $1")
        .bind(&uid)
        .execute(&mut *tx)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(ApiError::NotFound("Usuario no encontrado".into()));
    }

    match state.identity.delete_account(&uid).await {
        Ok(()) | Err(IdentityError::UserNotFound) => {}
        Err(e) => return Err(e.into()),
    }

    tx.commit().await?;

    write_audit(
        &state.pool,
        &AuditEntry::by(&actor, "user.delete", "user").resource_id(&uid),
    )
    .await;

    Ok(helpers::message("Usuario eliminado correctamente"))
}

async fn list_users(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    actor.require(&[Role::Admin, Role::Maestro], "listar usuarios")?;

    let rows = sqlx::query_as::<_, UserRow>(
        "SELECT uid, name, email, role, created_at FROM users ORDER BY created_at, uid",
    )
    .fetch_all(&state.pool)
    .await?;

    let users = rows
        .into_iter()
        .map(UserResponse::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(users))
}
