use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::api::groups::{GroupResponse, fetch_group_of_user};
use crate::api::helpers;
use crate::audit::{AuditEntry, write_audit};
use crate::auth::middleware::Actor;
use crate::auth::role::Role;
use crate::error::ApiError;
use crate::status::{self, Status};
use crate::store::AppState;
use crate::validation::{self, Reading};

const CHALLENGE_NOT_FOUND: &str = "Reto no encontrado";
const COMPLETED: &str = "completado";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChallengeRequest {
    pub nombre: Option<String>,
    pub descripcion: Option<String>,
    pub id_sitio: Option<String>,
    pub nombre_sitio: Option<String>,
    pub id_grupo: Option<String>,
    pub fecha_limite: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateChallengeRequest {
    pub nombre: Option<String>,
    pub descripcion: Option<String>,
    pub fecha_limite: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReadingsRequest {
    pub uid_alumno: Option<String>,
    pub temperatura: Option<Reading>,
    pub turbidez: Option<Reading>,
}

/// Teacher of the group at the moment the challenge was created.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherSnapshot {
    pub uid_maestro: String,
    pub nombre_maestro: Option<String>,
    pub correo_maestro: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryResponse {
    pub uid_alumno: String,
    pub nombre: String,
    pub correo: String,
    pub estado: Status,
    pub temperatura: Option<f64>,
    pub turbidez: Option<f64>,
    pub fecha_entrega: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    pub id_reto: Uuid,
    pub nombre: String,
    pub descripcion: Option<String>,
    pub id_sitio: String,
    pub nombre_sitio: String,
    pub id_grupo: Option<Uuid>,
    pub fecha_limite: Option<DateTime<Utc>>,
    pub fecha_creacion: DateTime<Utc>,
    pub estado_general: Status,
    pub alumnos_datos: Vec<EntryResponse>,
    pub maestro: Option<TeacherSnapshot>,
}

/// One challenge as seen by one of its students.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentChallenge {
    pub id_reto: Uuid,
    pub nombre: String,
    pub descripcion: Option<String>,
    pub nombre_sitio: String,
    pub fecha_limite: Option<DateTime<Utc>>,
    pub id_grupo: Option<Uuid>,
    pub id_sitio: String,
    pub estado: Status,
    pub maestro: Option<TeacherSnapshot>,
}

#[derive(sqlx::FromRow)]
struct ChallengeRow {
    id: Uuid,
    nombre: String,
    descripcion: Option<String>,
    id_sitio: String,
    nombre_sitio: String,
    id_grupo: Option<Uuid>,
    fecha_limite: Option<DateTime<Utc>>,
    fecha_creacion: DateTime<Utc>,
    uid_maestro: Option<String>,
    nombre_maestro: Option<String>,
    correo_maestro: Option<String>,
}

impl ChallengeRow {
    fn maestro(&self) -> Option<TeacherSnapshot> {
        self.uid_maestro.as_ref().map(|uid| TeacherSnapshot {
            uid_maestro: uid.clone(),
            nombre_maestro: self.nombre_maestro.clone(),
            correo_maestro: self.correo_maestro.clone(),
        })
    }

    fn into_response(self, entries: Vec<EntryRow>, now: DateTime<Utc>) -> ChallengeResponse {
        let estado_general = status::general_status(
            entries.iter().map(EntryRow::completed),
            self.fecha_limite,
            now,
        );
        let alumnos_datos = entries
            .into_iter()
            .map(|e| e.into_response(self.fecha_limite, now))
            .collect();
        ChallengeResponse {
            maestro: self.maestro(),
            id_reto: self.id,
            nombre: self.nombre,
            descripcion: self.descripcion,
            id_sitio: self.id_sitio,
            nombre_sitio: self.nombre_sitio,
            id_grupo: self.id_grupo,
            fecha_limite: self.fecha_limite,
            fecha_creacion: self.fecha_creacion,
            estado_general,
            alumnos_datos,
        }
    }
}

#[derive(sqlx::FromRow)]
struct EntryRow {
    challenge_id: Uuid,
    uid_alumno: String,
    nombre: String,
    correo: String,
    estado: String,
    temperatura: Option<f64>,
    turbidez: Option<f64>,
    fecha_entrega: Option<DateTime<Utc>>,
}

impl EntryRow {
    fn completed(&self) -> bool {
        self.estado == COMPLETED
    }

    fn into_response(self, deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> EntryResponse {
        EntryResponse {
            estado: status::entry_status(self.completed(), deadline, now),
            uid_alumno: self.uid_alumno,
            nombre: self.nombre,
            correo: self.correo,
            temperatura: self.temperatura,
            turbidez: self.turbidez,
            fecha_entrega: self.fecha_entrega,
        }
    }
}

#[derive(sqlx::FromRow)]
struct StudentChallengeRow {
    #[sqlx(flatten)]
    challenge: ChallengeRow,
    estado_alumno: String,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/challenge/crear", post(create_challenge))
        .route(
            "/api/challenge/listar-usuario/{uid}/{role}",
            get(list_for_user),
        )
        .route("/api/challenge/alumno/{uid_alumno}", get(list_for_student))
        .route("/api/challenge/grupo/{id_grupo}", get(list_for_group))
        .route("/api/challenge/grupo-usuario/{uid}", get(group_of_user))
        .route("/api/challenge/actualizar/{id_reto}", put(update_challenge))
        .route("/api/challenge/eliminar/{id_reto}", delete(delete_challenge))
        .route(
            "/api/challenge/{id_reto}/agregar-datos",
            post(submit_readings),
        )
        .route("/api/challenge/{id_reto}", get(get_challenge))
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

const CHALLENGE_COLUMNS: &str = r"
    c.id, c.nombre, c.descripcion, c.id_sitio, c.nombre_sitio, c.id_grupo,
    c.fecha_limite, c.fecha_creacion, c.uid_maestro, c.nombre_maestro, c.correo_maestro
";

enum Scope<'a> {
    One(Uuid),
    Group(Uuid),
    Teacher(&'a str),
    All,
}

async fn load_challenges(
    pool: &PgPool,
    scope: Scope<'_>,
) -> Result<Vec<ChallengeResponse>, ApiError> {
    let base = format!("SELECT {CHALLENGE_COLUMNS} FROM challenges c");
    let order = "ORDER BY c.fecha_creacion, c.id";
    let rows = match scope {
        Scope::One(id) => {
            sqlx::query_as::<_, ChallengeRow>(&format!("{base} WHERE c.id = $1 {order}"))
                .bind(id)
                .fetch_all(pool)
                .await?
        }
        Scope::Group(id) => {
            sqlx::query_as::<_, ChallengeRow>(&format!("{base} WHERE c.id_grupo = $1 {order}"))
                .bind(id)
                .fetch_all(pool)
                .await?
        }
        Scope::Teacher(uid) => {
            sqlx::query_as::<_, ChallengeRow>(&format!("{base} WHERE c.uid_maestro = $1 {order}"))
                .bind(uid)
                .fetch_all(pool)
                .await?
        }
        Scope::All => {
            sqlx::query_as::<_, ChallengeRow>(&format!("{base} {order}"))
                .fetch_all(pool)
                .await?
        }
    };

    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let entries = sqlx::query_as::<_, EntryRow>(
        r"
        SELECT challenge_id, uid_alumno, nombre, correo, estado,
               temperatura, turbidez, fecha_entrega
        FROM challenge_entries
        WHERE challenge_id = ANY($1)
        ORDER BY challenge_id, position
        ",
    )
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    let mut by_challenge: HashMap<Uuid, Vec<EntryRow>> = HashMap::new();
    for entry in entries {
        by_challenge.entry(entry.challenge_id).or_default().push(entry);
    }

    let now = Utc::now();
    Ok(rows
        .into_iter()
        .map(|row| {
            let entries = by_challenge.remove(&row.id).unwrap_or_default();
            row.into_response(entries, now)
        })
        .collect())
}

async fn load_student_challenges(
    pool: &PgPool,
    uid_alumno: &str,
) -> Result<Vec<StudentChallenge>, ApiError> {
    let rows = sqlx::query_as::<_, StudentChallengeRow>(&format!(
        r"
        SELECT {CHALLENGE_COLUMNS}, e.estado AS estado_alumno
        FROM challenges c
        JOIN challenge_entries e ON e.challenge_id = c.id
        WHERE e.uid_alumno = $1
        ORDER BY c.fecha_creacion, c.id
        "
    ))
    .bind(uid_alumno)
    .fetch_all(pool)
    .await?;

    let now = Utc::now();
    Ok(rows
        .into_iter()
        .map(|row| {
            let c = row.challenge;
            StudentChallenge {
                estado: status::entry_status(row.estado_alumno == COMPLETED, c.fecha_limite, now),
                maestro: c.maestro(),
                id_reto: c.id,
                nombre: c.nombre,
                descripcion: c.descripcion,
                nombre_sitio: c.nombre_sitio,
                fecha_limite: c.fecha_limite,
                id_grupo: c.id_grupo,
                id_sitio: c.id_sitio,
            }
        })
        .collect())
}

fn optional_deadline(value: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| validation::parse_deadline("fechaLimite", v))
        .transpose()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, body), fields(actor = %actor.uid), err)]
async fn create_challenge(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<CreateChallengeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    actor.require(&[Role::Admin, Role::Maestro], "crear retos")?;
    validation::require(&[
        ("nombre", body.nombre.as_deref()),
        ("idSitio", body.id_sitio.as_deref()),
        ("nombreSitio", body.nombre_sitio.as_deref()),
        ("idGrupo", body.id_grupo.as_deref()),
    ])?;
    let nombre = body.nombre.unwrap_or_default().trim().to_owned();
    validation::check_length("nombre", &nombre, 1, 255)?;
    let descripcion = body.descripcion.filter(|d| !d.trim().is_empty());
    let id_sitio = body.id_sitio.unwrap_or_default().trim().to_owned();
    let nombre_sitio = body.nombre_sitio.unwrap_or_default().trim().to_owned();
    let fecha_limite = optional_deadline(body.fecha_limite.as_deref())?;
    let group_id = helpers::parse_id(
        body.id_grupo.as_deref().unwrap_or_default(),
        "Grupo no encontrado",
    )?;

    let mut tx = state.pool.begin().await?;

    // Teacher snapshot and roster are both read inside the transaction, so
    // they describe the group at a single point in time.
    let id_reto: Uuid = sqlx::query_scalar(
        r"
        INSERT INTO challenges (nombre, descripcion, id_sitio, nombre_sitio, id_grupo,
                                fecha_limite, uid_maestro, nombre_maestro, correo_maestro)
        SELECT $1, $2, $3, $4, g.id, $6, m.uid, m.name, m.email
        FROM groups g
        LEFT JOIN users m ON m.uid = g.id_maestro
        WHERE g.id = $5
        RETURNING id
        ",
    )
    .bind(&nombre)
    .bind(&descripcion)
    .bind(&id_sitio)
    .bind(&nombre_sitio)
    .bind(group_id)
    .bind(fecha_limite)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::NotFound("Grupo no encontrado".into()))?;

    let roster = sqlx::query(
        r"
        INSERT INTO challenge_entries (challenge_id, uid_alumno, position, nombre, correo)
        SELECT $1, u.uid,
               (row_number() OVER (ORDER BY gm.added_at, u.uid))::int - 1,
               u.name, u.email
        FROM group_members gm
        JOIN users u ON u.uid = gm.uid_alumno
        WHERE gm.group_id = $2
        ",
    )
    .bind(id_reto)
    .bind(group_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(%id_reto, %group_id, alumnos = roster.rows_affected(), "challenge created");

    write_audit(
        &state.pool,
        &AuditEntry::by(&actor, "challenge.create", "challenge")
            .resource_id(id_reto)
            .detail(json!({"nombre": &nombre, "idGrupo": group_id})),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Reto creado correctamente",
            "idReto": id_reto,
        })),
    ))
}

async fn list_for_user(
    State(state): State<AppState>,
    Path((uid, role)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let role: Role = role
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Rol inválido: {role}")))?;

    let body = match role {
        Role::Alumno => serde_json::to_value(load_student_challenges(&state.pool, &uid).await?),
        Role::Maestro => {
            serde_json::to_value(load_challenges(&state.pool, Scope::Teacher(&uid)).await?)
        }
        Role::Admin => serde_json::to_value(load_challenges(&state.pool, Scope::All).await?),
    }
    .map_err(anyhow::Error::from)?;

    Ok(Json(body))
}

async fn list_for_student(
    State(state): State<AppState>,
    Path(uid_alumno): Path<String>,
) -> Result<Json<Vec<StudentChallenge>>, ApiError> {
    Ok(Json(load_student_challenges(&state.pool, &uid_alumno).await?))
}

async fn list_for_group(
    State(state): State<AppState>,
    Path(id_grupo): Path<String>,
) -> Result<Json<Vec<ChallengeResponse>>, ApiError> {
    // An id that cannot name a group simply has no challenges.
    let Ok(group_id) = Uuid::parse_str(id_grupo.trim()) else {
        return Ok(Json(Vec::new()));
    };
    Ok(Json(load_challenges(&state.pool, Scope::Group(group_id)).await?))
}

async fn group_of_user(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<GroupResponse>, ApiError> {
    let group = fetch_group_of_user(&state.pool, &uid)
        .await?
        .ok_or_else(|| ApiError::NotFound("No se encontró grupo para este usuario".into()))?;
    Ok(Json(group))
}

#[tracing::instrument(skip(state, body), fields(actor = %actor.uid), err)]
async fn update_challenge(
    State(state): State<AppState>,
    actor: Actor,
    Path(id_reto): Path<String>,
    Json(body): Json<UpdateChallengeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    actor.require(&[Role::Admin, Role::Maestro], "actualizar retos")?;
    let id = helpers::parse_id(&id_reto, CHALLENGE_NOT_FOUND)?;

    let nombre = body
        .nombre
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_owned);
    let descripcion = body.descripcion.filter(|d| !d.trim().is_empty());
    if let Some(n) = &nombre {
        validation::check_length("nombre", n, 1, 255)?;
    }
    let fecha_limite = optional_deadline(body.fecha_limite.as_deref())?;

    let updated = sqlx::query(
        r"
        UPDATE challenges
        SET nombre = COALESCE($2, nombre),
            descripcion = COALESCE($3, descripcion),
            fecha_limite = COALESCE($4, fecha_limite)
        WHERE id = $1
        ",
    )
    .bind(id)
    .bind(&nombre)
    .bind(&descripcion)
    .bind(fecha_limite)
    .execute(&state.pool)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::NotFound(CHALLENGE_NOT_FOUND.into()));
    }

    write_audit(
        &state.pool,
        &AuditEntry::by(&actor, "challenge.update", "challenge")
            .resource_id(id)
            .detail(json!({
                "nombre": nombre,
                "descripcion": descripcion,
                "fechaLimite": fecha_limite,
            })),
    )
    .await;

    Ok(helpers::message("Reto actualizado correctamente"))
}

#[tracing::instrument(skip(state), fields(actor = %actor.uid), err)]
async fn delete_challenge(
    State(state): State<AppState>,
    actor: Actor,
    Path(id_reto): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    actor.require(&[Role::Admin, Role::Maestro], "eliminar retos")?;
    let id = helpers::parse_id(&id_reto, CHALLENGE_NOT_FOUND)?;

    let deleted = sqlx::query("DELETE FROM challenges WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(ApiError::NotFound(CHALLENGE_NOT_FOUND.into()));
    }

    write_audit(
        &state.pool,
        &AuditEntry::by(&actor, "challenge.delete", "challenge").resource_id(id),
    )
    .await;

    Ok(helpers::message("Reto eliminado correctamente"))
}

#[tracing::instrument(skip(state, body), fields(actor = %actor.uid), err)]
async fn submit_readings(
    State(state): State<AppState>,
    actor: Actor,
    Path(id_reto): Path<String>,
    Json(body): Json<SubmitReadingsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validation::require(&[("uidAlumno", body.uid_alumno.as_deref())])?;
    let values = validation::readings(&[
        ("temperatura", body.temperatura.as_ref()),
        ("turbidez", body.turbidez.as_ref()),
    ])?;
    let (temperatura, turbidez) = (values[0], values[1]);
    let uid_alumno = body.uid_alumno.unwrap_or_default().trim().to_owned();

    if actor.role == Role::Alumno && actor.uid != uid_alumno {
        return Err(ApiError::Forbidden(
            "No puedes registrar datos de otro alumno".into(),
        ));
    }

    let id = helpers::parse_id(&id_reto, CHALLENGE_NOT_FOUND)?;

    let mut tx = state.pool.begin().await?;

    let deadline: Option<Option<DateTime<Utc>>> =
        sqlx::query_scalar("SELECT fecha_limite FROM challenges WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
    let Some(deadline) = deadline else {
        return Err(ApiError::NotFound(CHALLENGE_NOT_FOUND.into()));
    };

    let entry = sqlx::query_as::<_, EntryRow>(
        r"
        UPDATE challenge_entries
        SET estado = 'completado', temperatura = $3, turbidez = $4, fecha_entrega = now()
        WHERE challenge_id = $1 AND uid_alumno = $2
        RETURNING challenge_id, uid_alumno, nombre, correo, estado,
                  temperatura, turbidez, fecha_entrega
        ",
    )
    .bind(id)
    .bind(&uid_alumno)
    .bind(temperatura)
    .bind(turbidez)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::NotFound("Alumno no asignado".into()))?;

    tx.commit().await?;

    write_audit(
        &state.pool,
        &AuditEntry::by(&actor, "challenge.submit", "challenge")
            .resource_id(id)
            .detail(json!({
                "uidAlumno": &uid_alumno,
                "temperatura": temperatura,
                "turbidez": turbidez,
            })),
    )
    .await;

    Ok(Json(json!({
        "message": "Datos del alumno guardados",
        "alumno": entry.into_response(deadline, Utc::now()),
    })))
}

async fn get_challenge(
    State(state): State<AppState>,
    Path(id_reto): Path<String>,
) -> Result<Json<ChallengeResponse>, ApiError> {
    let id = helpers::parse_id(&id_reto, CHALLENGE_NOT_FOUND)?;
    let challenge = load_challenges(&state.pool, Scope::One(id))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::NotFound(CHALLENGE_NOT_FOUND.into()))?;
    Ok(Json(challenge))
}
