use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::api::comments::{Comment, CommentRequest, RECENT_LIMIT, RecentComment};
use crate::api::helpers::{self, WithMessage};
use crate::audit::{AuditEntry, write_audit};
use crate::auth::middleware::Actor;
use crate::auth::role::Role;
use crate::error::ApiError;
use crate::store::AppState;
use crate::validation;

const SITE_NOT_FOUND: &str = "Sitio no encontrado";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteRequest {
    pub nombre: Option<String>,
    pub ecosistema: Option<String>,
    pub descripcion: Option<String>,
    pub ubicacion: Option<Value>,
    pub imagenes: Option<Value>,
    /// Ignored on edit.
    pub datos_agua: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteResponse {
    pub id: Uuid,
    pub nombre: String,
    pub ecosistema: String,
    pub descripcion: String,
    pub ubicacion: Option<Value>,
    pub imagenes: Value,
    pub datos_agua: Option<Value>,
    pub comentarios: Vec<Comment>,
    pub fecha_creacion: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct SiteRow {
    id: Uuid,
    nombre: String,
    ecosistema: String,
    descripcion: String,
    ubicacion: Option<Value>,
    imagenes: Value,
    datos_agua: Option<Value>,
    fecha_creacion: DateTime<Utc>,
}

impl SiteRow {
    fn into_response(self, comentarios: Vec<Comment>) -> SiteResponse {
        SiteResponse {
            id: self.id,
            nombre: self.nombre,
            ecosistema: self.ecosistema,
            descripcion: self.descripcion,
            ubicacion: self.ubicacion,
            imagenes: self.imagenes,
            datos_agua: self.datos_agua,
            comentarios,
            fecha_creacion: self.fecha_creacion,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SiteCommentRow {
    site_id: Uuid,
    #[sqlx(flatten)]
    comment: Comment,
}

/// Fields common to create and edit, after validation.
struct SiteFields {
    nombre: String,
    ecosistema: String,
    descripcion: String,
    ubicacion: Option<Value>,
    imagenes: Value,
}

impl SiteRequest {
    fn fields(&self) -> Result<SiteFields, ApiError> {
        validation::require(&[
            ("nombre", self.nombre.as_deref()),
            ("ecosistema", self.ecosistema.as_deref()),
        ])?;
        let nombre = self.nombre.as_deref().unwrap_or_default().trim().to_owned();
        validation::check_length("nombre", &nombre, 1, 255)?;

        Ok(SiteFields {
            nombre,
            ecosistema: self.ecosistema.as_deref().unwrap_or_default().trim().to_owned(),
            descripcion: self.descripcion.clone().unwrap_or_default(),
            ubicacion: self.ubicacion.clone().filter(|v| !v.is_null()),
            imagenes: match &self.imagenes {
                Some(v @ Value::Array(_)) => v.clone(),
                _ => Value::Array(Vec::new()),
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/site/crear-sitio", post(create_site))
        .route("/api/site/listar-sitios", get(list_sites))
        .route("/api/site/obtener-sitio/{id}", get(get_site))
        .route("/api/site/agregar-comentario/{id}", post(add_comment))
        .route("/api/site/listar-comentarios/{id}", get(list_comments))
        .route("/api/site/comentarios-recientes", get(recent_comments))
        .route("/api/site/editar-sitio/{id}", put(edit_site))
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

const SITE_COLUMNS: &str =
    "id, nombre, ecosistema, descripcion, ubicacion, imagenes, datos_agua, fecha_creacion";

async fn load_comments(
    pool: &sqlx::PgPool,
    site_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<Comment>>, ApiError> {
    let rows = sqlx::query_as::<_, SiteCommentRow>(
        r"
        SELECT site_id, uid, name, texto, fecha
        FROM site_comments
        WHERE site_id = ANY($1)
        ORDER BY id
        ",
    )
    .bind(site_ids)
    .fetch_all(pool)
    .await?;

    let mut by_site: HashMap<Uuid, Vec<Comment>> = HashMap::new();
    for row in rows {
        by_site.entry(row.site_id).or_default().push(row.comment);
    }
    Ok(by_site)
}

async fn fetch_site(pool: &sqlx::PgPool, id: Uuid) -> Result<Option<SiteResponse>, ApiError> {
    let Some(row) =
        sqlx::query_as::<_, SiteRow>(&format!("SELECT {SITE_COLUMNS} FROM sites WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await?
    else {
        return Ok(None);
    };
    let comentarios = load_comments(pool, &[id]).await?.remove(&id).unwrap_or_default();
    Ok(Some(row.into_response(comentarios)))
}

async fn site_exists(pool: &sqlx::PgPool, id: Uuid) -> Result<bool, ApiError> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM sites WHERE id = $1)")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, body), fields(actor = %actor.uid), err)]
async fn create_site(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<SiteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    actor.require(&[Role::Admin, Role::Maestro], "crear sitios")?;
    let fields = body.fields()?;
    let datos_agua = body.datos_agua.filter(|v| !v.is_null());

    let row = sqlx::query_as::<_, SiteRow>(&format!(
        r"
        INSERT INTO sites (nombre, ecosistema, descripcion, ubicacion, imagenes, datos_agua)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {SITE_COLUMNS}
        "
    ))
    .bind(&fields.nombre)
    .bind(&fields.ecosistema)
    .bind(&fields.descripcion)
    .bind(&fields.ubicacion)
    .bind(&fields.imagenes)
    .bind(&datos_agua)
    .fetch_one(&state.pool)
    .await?;

    write_audit(
        &state.pool,
        &AuditEntry::by(&actor, "site.create", "site")
            .resource_id(row.id)
            .detail(json!({"nombre": &fields.nombre})),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(WithMessage {
            inner: row.into_response(Vec::new()),
            message: "Sitio creado correctamente",
        }),
    ))
}

async fn list_sites(State(state): State<AppState>) -> Result<Json<Vec<SiteResponse>>, ApiError> {
    let rows = sqlx::query_as::<_, SiteRow>(&format!(
        "SELECT {SITE_COLUMNS} FROM sites ORDER BY fecha_creacion, id"
    ))
    .fetch_all(&state.pool)
    .await?;

    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut comments = load_comments(&state.pool, &ids).await?;

    Ok(Json(
        rows.into_iter()
            .map(|row| {
                let comentarios = comments.remove(&row.id).unwrap_or_default();
                row.into_response(comentarios)
            })
            .collect(),
    ))
}

async fn get_site(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SiteResponse>, ApiError> {
    let id = helpers::parse_id(&id, SITE_NOT_FOUND)?;
    let site = fetch_site(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(SITE_NOT_FOUND.into()))?;
    Ok(Json(site))
}

#[tracing::instrument(skip(state, body), fields(actor = %actor.uid), err)]
async fn add_comment(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    Json(body): Json<CommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new = body.validate(&actor)?;
    let site_id = helpers::parse_id(&id, SITE_NOT_FOUND)?;
    if !site_exists(&state.pool, site_id).await? {
        return Err(ApiError::NotFound(SITE_NOT_FOUND.into()));
    }

    let comentario = sqlx::query_as::<_, Comment>(
        r"
        INSERT INTO site_comments (site_id, uid, name, texto)
        VALUES ($1, $2, $3, $4)
        RETURNING uid, name, texto, fecha
        ",
    )
    .bind(site_id)
    .bind(&new.uid)
    .bind(&new.name)
    .bind(&new.texto)
    .fetch_one(&state.pool)
    .await?;

    write_audit(
        &state.pool,
        &AuditEntry::by(&actor, "site.comment", "site").resource_id(site_id),
    )
    .await;

    Ok(Json(json!({
        "message": "Comentario agregado correctamente",
        "comentario": comentario,
    })))
}

async fn list_comments(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Comment>>, ApiError> {
    let site_id = helpers::parse_id(&id, SITE_NOT_FOUND)?;
    if !site_exists(&state.pool, site_id).await? {
        return Err(ApiError::NotFound(SITE_NOT_FOUND.into()));
    }
    let comentarios = load_comments(&state.pool, &[site_id])
        .await?
        .remove(&site_id)
        .unwrap_or_default();
    Ok(Json(comentarios))
}

async fn recent_comments(
    State(state): State<AppState>,
) -> Result<Json<Vec<RecentComment>>, ApiError> {
    let rows = sqlx::query_as::<_, RecentComment>(
        r"
        SELECT c.uid, c.name, c.texto, c.fecha,
               c.site_id::text AS sitio_id, s.nombre AS sitio_nombre
        FROM site_comments c
        JOIN sites s ON s.id = c.site_id
        ORDER BY c.fecha DESC, c.id DESC
        LIMIT $1
        ",
    )
    .bind(RECENT_LIMIT)
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(rows))
}

#[tracing::instrument(skip(state, body), fields(actor = %actor.uid), err)]
async fn edit_site(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    Json(body): Json<SiteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    actor.require(&[Role::Admin, Role::Maestro], "editar sitios")?;
    let fields = body.fields()?;
    let site_id = helpers::parse_id(&id, SITE_NOT_FOUND)?;

    let updated = sqlx::query(
        r"
        UPDATE sites
        SET nombre = $2, ecosistema = $3, descripcion = $4, ubicacion = $5, imagenes = $6
        WHERE id = $1
        ",
    )
    .bind(site_id)
    .bind(&fields.nombre)
    .bind(&fields.ecosistema)
    .bind(&fields.descripcion)
    .bind(&fields.ubicacion)
    .bind(&fields.imagenes)
    .execute(&state.pool)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::NotFound(SITE_NOT_FOUND.into()));
    }

    write_audit(
        &state.pool,
        &AuditEntry::by(&actor, "site.update", "site")
            .resource_id(site_id)
            .detail(json!({"nombre": &fields.nombre})),
    )
    .await;

    Ok(helpers::message("Sitio actualizado correctamente"))
}
