//! The monitoring site: a single well-known site whose id comes from
//! configuration, with the latest sensor readings and its own comment thread.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::comments::{Comment, CommentRequest, RECENT_LIMIT, RecentComment};
use crate::audit::{AuditEntry, write_audit};
use crate::auth::middleware::Actor;
use crate::auth::role::Role;
use crate::error::ApiError;
use crate::store::AppState;
use crate::validation::{self, Reading};

const MONITORING_NOT_FOUND: &str = "Sitio especial no encontrado";

#[derive(Debug, Deserialize)]
pub struct ReadingRequest {
    pub temperatura: Option<Reading>,
    pub turbidez: Option<Reading>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct Readings {
    pub temperatura: Option<f64>,
    pub turbidez: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSiteResponse {
    pub id: String,
    pub nombre: Option<String>,
    pub descripcion: String,
    pub temperatura: Option<f64>,
    pub turbidez: Option<f64>,
    pub medido_en: Option<DateTime<Utc>>,
    pub comentarios: Vec<Comment>,
}

#[derive(sqlx::FromRow)]
struct MonitoringSiteRow {
    id: String,
    nombre: Option<String>,
    descripcion: String,
    temperatura: Option<f64>,
    turbidez: Option<f64>,
    medido_en: Option<DateTime<Utc>>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/sitio", get(get_monitoring_site))
        .route(
            "/api/sitio/monitoreo",
            get(get_readings).put(record_readings),
        )
        .route(
            "/api/sitio/comentarios",
            get(list_comments).post(add_comment),
        )
        .route("/api/sitio/comentarios/recent", get(recent_comments))
}

async fn site_exists(state: &AppState) -> Result<bool, ApiError> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM monitoring_sites WHERE id = $1)")
            .bind(&state.config.monitoring_site_id)
            .fetch_one(&state.pool)
            .await?;
    Ok(exists)
}

async fn load_comments(state: &AppState) -> Result<Vec<Comment>, ApiError> {
    let rows = sqlx::query_as::<_, Comment>(
        "SELECT uid, name, texto, fecha FROM monitoring_comments WHERE site_id = $1 ORDER BY id",
    )
    .bind(&state.config.monitoring_site_id)
    .fetch_all(&state.pool)
    .await?;
    Ok(rows)
}

async fn get_monitoring_site(
    State(state): State<AppState>,
) -> Result<Json<MonitoringSiteResponse>, ApiError> {
    let row = sqlx::query_as::<_, MonitoringSiteRow>(
        r"
        SELECT id, nombre, descripcion, temperatura, turbidez, medido_en
        FROM monitoring_sites WHERE id = $1
        ",
    )
    .bind(&state.config.monitoring_site_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::NotFound(MONITORING_NOT_FOUND.into()))?;

    let comentarios = load_comments(&state).await?;

    Ok(Json(MonitoringSiteResponse {
        id: row.id,
        nombre: row.nombre,
        descripcion: row.descripcion,
        temperatura: row.temperatura,
        turbidez: row.turbidez,
        medido_en: row.medido_en,
        comentarios,
    }))
}

async fn get_readings(State(state): State<AppState>) -> Result<Json<Readings>, ApiError> {
    let readings = sqlx::query_as::<_, Readings>(
        "SELECT temperatura, turbidez FROM monitoring_sites WHERE id = $1",
    )
    .bind(&state.config.monitoring_site_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::NotFound(MONITORING_NOT_FOUND.into()))?;
    Ok(Json(readings))
}

#[tracing::instrument(skip(state, body), fields(actor = %actor.uid), err)]
async fn record_readings(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<ReadingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    actor.require(&[Role::Admin, Role::Maestro], "registrar lecturas")?;
    let values = validation::readings(&[
        ("temperatura", body.temperatura.as_ref()),
        ("turbidez", body.turbidez.as_ref()),
    ])?;
    let (temperatura, turbidez) = (values[0], values[1]);

    let readings = sqlx::query_as::<_, Readings>(
        r"
        UPDATE monitoring_sites
        SET temperatura = $2, turbidez = $3, medido_en = now()
        WHERE id = $1
        RETURNING temperatura, turbidez
        ",
    )
    .bind(&state.config.monitoring_site_id)
    .bind(temperatura)
    .bind(turbidez)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::NotFound(MONITORING_NOT_FOUND.into()))?;

    write_audit(
        &state.pool,
        &AuditEntry::by(&actor, "sitio.readings", "monitoring_site")
            .resource_id(&state.config.monitoring_site_id)
            .detail(json!({"temperatura": temperatura, "turbidez": turbidez})),
    )
    .await;

    Ok(Json(json!({
        "message": "Lecturas registradas correctamente",
        "temperatura": readings.temperatura,
        "turbidez": readings.turbidez,
    })))
}

async fn list_comments(State(state): State<AppState>) -> Result<Json<Vec<Comment>>, ApiError> {
    if !site_exists(&state).await? {
        return Err(ApiError::NotFound("Sitio no encontrado".into()));
    }
    Ok(Json(load_comments(&state).await?))
}

#[tracing::instrument(skip(state, body), fields(actor = %actor.uid), err)]
async fn add_comment(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<CommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new = body.validate(&actor)?;
    if !site_exists(&state).await? {
        return Err(ApiError::NotFound("Sitio no encontrado".into()));
    }

    let comentario = sqlx::query_as::<_, Comment>(
        r"
        INSERT INTO monitoring_comments (site_id, uid, name, texto)
        VALUES ($1, $2, $3, $4)
        RETURNING uid, name, texto, fecha
        ",
    )
    .bind(&state.config.monitoring_site_id)
    .bind(&new.uid)
    .bind(&new.name)
    .bind(&new.texto)
    .fetch_one(&state.pool)
    .await?;

    write_audit(
        &state.pool,
        &AuditEntry::by(&actor, "sitio.comment", "monitoring_site")
            .resource_id(&state.config.monitoring_site_id),
    )
    .await;

    Ok(Json(json!({
        "message": "Comentario agregado correctamente",
        "comentario": comentario,
    })))
}

async fn recent_comments(
    State(state): State<AppState>,
) -> Result<Json<Vec<RecentComment>>, ApiError> {
    let rows = sqlx::query_as::<_, RecentComment>(
        r"
        SELECT c.uid, c.name, c.texto, c.fecha,
               c.site_id AS sitio_id, COALESCE(m.nombre, 'Desconocido') AS sitio_nombre
        FROM monitoring_comments c
        JOIN monitoring_sites m ON m.id = c.site_id
        ORDER BY c.fecha DESC, c.id DESC
        LIMIT $1
        ",
    )
    .bind(RECENT_LIMIT)
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(rows))
}
