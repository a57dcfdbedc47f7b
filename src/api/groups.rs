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

use crate::api::helpers;
use crate::api::users::fetch_user_by_email;
use crate::audit::{AuditEntry, write_audit};
use crate::auth::middleware::Actor;
use crate::auth::role::Role;
use crate::error::ApiError;
use crate::store::AppState;
use crate::validation;

const GROUP_NOT_FOUND: &str = "Grupo no encontrado";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub nombre: Option<String>,
    pub descripcion: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignTeacherRequest {
    pub id_grupo: Option<String>,
    pub correo_maestro: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddStudentRequest {
    pub id_grupo: Option<String>,
    pub correo_alumno: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditGroupRequest {
    pub id_grupo: Option<String>,
    pub nombre: Option<String>,
    pub descripcion: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveStudentRequest {
    pub id_grupo: Option<String>,
    pub uid_alumno: Option<String>,
    pub correo_alumno: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveTeacherRequest {
    pub id_grupo: Option<String>,
    pub id_maestro: Option<String>,
    pub correo_maestro: Option<String>,
}

/// Roster entry as exposed on the wire.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Member {
    pub uid: String,
    pub nombre: String,
    pub correo: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupResponse {
    pub id: Uuid,
    pub nombre: String,
    pub descripcion: String,
    pub id_maestro: Option<String>,
    pub correo_maestro: Option<String>,
    pub nombre_maestro: Option<String>,
    pub alumnos: Vec<Member>,
    pub creado_en: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct GroupRow {
    id: Uuid,
    nombre: String,
    descripcion: String,
    id_maestro: Option<String>,
    correo_maestro: Option<String>,
    nombre_maestro: Option<String>,
    creado_en: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct MemberRow {
    group_id: Uuid,
    uid: String,
    nombre: String,
    correo: String,
}

impl GroupRow {
    fn into_response(self, alumnos: Vec<Member>) -> GroupResponse {
        GroupResponse {
            id: self.id,
            nombre: self.nombre,
            descripcion: self.descripcion,
            id_maestro: self.id_maestro,
            correo_maestro: self.correo_maestro,
            nombre_maestro: self.nombre_maestro,
            alumnos,
            creado_en: self.creado_en,
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/group/crear-grupo", post(create_group))
        .route("/api/group/asignar-maestro", post(assign_teacher))
        .route("/api/group/agregar-alumno", post(add_student))
        .route("/api/group/obtener-grupo/{id_grupo}", get(get_group))
        .route("/api/group/editar-grupo", put(edit_group))
        .route("/api/group/eliminar-grupo/{id_grupo}", delete(delete_group))
        .route("/api/group/listar-grupos", get(list_groups))
        .route("/api/group/quitar-alumno", post(remove_student))
        .route("/api/group/quitar-maestro", post(remove_teacher))
}

// ---------------------------------------------------------------------------
// Queries (shared with challenges)
// ---------------------------------------------------------------------------

const GROUP_SELECT: &str = r"
    SELECT g.id, g.nombre, g.descripcion, g.id_maestro,
           m.email AS correo_maestro, m.name AS nombre_maestro, g.creado_en
    FROM groups g
    LEFT JOIN users m ON m.uid = g.id_maestro
";

async fn load_rosters(
    pool: &PgPool,
    group_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<Member>>, ApiError> {
    let rows = sqlx::query_as::<_, MemberRow>(
        r"
        SELECT gm.group_id, u.uid, u.name AS nombre, u.email AS correo
        FROM group_members gm
        JOIN users u ON u.uid = gm.uid_alumno
        WHERE gm.group_id = ANY($1)
        ORDER BY gm.added_at, u.uid
        ",
    )
    .bind(group_ids)
    .fetch_all(pool)
    .await?;

    let mut rosters: HashMap<Uuid, Vec<Member>> = HashMap::new();
    for row in rows {
        rosters.entry(row.group_id).or_default().push(Member {
            uid: row.uid,
            nombre: row.nombre,
            correo: row.correo,
        });
    }
    Ok(rosters)
}

pub(crate) async fn fetch_group(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<GroupResponse>, ApiError> {
    let Some(row) = sqlx::query_as::<_, GroupRow>(&format!("{GROUP_SELECT} WHERE g.id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?
    else {
        return Ok(None);
    };

    let mut rosters = load_rosters(pool, &[id]).await?;
    let alumnos = rosters.remove(&id).unwrap_or_default();
    Ok(Some(row.into_response(alumnos)))
}

/// The group `uid` teaches, or else the group they are enrolled in.
pub(crate) async fn fetch_group_of_user(
    pool: &PgPool,
    uid: &str,
) -> Result<Option<GroupResponse>, ApiError> {
    let id: Option<Uuid> = sqlx::query_scalar(
        r"
        SELECT id FROM groups WHERE id_maestro = $1
        UNION ALL
        SELECT group_id FROM group_members WHERE uid_alumno = $1
        LIMIT 1
        ",
    )
    .bind(uid)
    .fetch_optional(pool)
    .await?;

    match id {
        Some(id) => fetch_group(pool, id).await,
        None => Ok(None),
    }
}

/// Unassign `uid` from the group. False when the group has since changed
/// teacher (or disappeared) and nothing was cleared.
async fn clear_teacher(pool: &PgPool, group_id: Uuid, uid: &str) -> Result<bool, ApiError> {
    let cleared =
        sqlx::query("UPDATE groups SET id_maestro = NULL WHERE id = $1 AND id_maestro = $2")
            .bind(group_id)
            .bind(uid)
            .execute(pool)
            .await?;
    Ok(cleared.rows_affected() > 0)
}

async fn group_exists(pool: &PgPool, id: Uuid) -> Result<bool, ApiError> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM groups WHERE id = $1)")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, body), fields(actor = %actor.uid), err)]
async fn create_group(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    actor.require(&[Role::Admin], "crear grupos")?;
    validation::require(&[
        ("nombre", body.nombre.as_deref()),
        ("descripcion", body.descripcion.as_deref()),
    ])?;
    let nombre = body.nombre.unwrap_or_default().trim().to_owned();
    let descripcion = body.descripcion.unwrap_or_default().trim().to_owned();
    validation::check_length("nombre", &nombre, 1, 255)?;

    let row = sqlx::query_as::<_, GroupRow>(
        r"
        INSERT INTO groups (nombre, descripcion)
        VALUES ($1, $2)
        RETURNING id, nombre, descripcion, id_maestro,
                  NULL::text AS correo_maestro, NULL::text AS nombre_maestro, creado_en
        ",
    )
    .bind(&nombre)
    .bind(&descripcion)
    .fetch_one(&state.pool)
    .await?;

    let id = row.id;
    write_audit(
        &state.pool,
        &AuditEntry::by(&actor, "group.create", "group")
            .resource_id(id)
            .detail(json!({"nombre": &nombre})),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Grupo creado correctamente",
            "idGrupo": id,
            "grupo": row.into_response(Vec::new()),
        })),
    ))
}

#[tracing::instrument(skip(state, body), fields(actor = %actor.uid), err)]
async fn assign_teacher(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<AssignTeacherRequest>,
) -> Result<impl IntoResponse, ApiError> {
    actor.require(&[Role::Admin], "asignar maestros")?;
    validation::require(&[
        ("idGrupo", body.id_grupo.as_deref()),
        ("correoMaestro", body.correo_maestro.as_deref()),
    ])?;
    let correo = body.correo_maestro.unwrap_or_default();

    let teacher = fetch_user_by_email(&state.pool, correo.trim())
        .await?
        .ok_or_else(|| ApiError::NotFound("No se encontró un usuario con ese correo".into()))?;
    if teacher.role != Role::Maestro.as_str() {
        return Err(ApiError::BadRequest(
            "El usuario encontrado no tiene rol de Maestro".into(),
        ));
    }

    let group_id = helpers::parse_id(body.id_grupo.as_deref().unwrap_or_default(), GROUP_NOT_FOUND)?;

    // Replaces any current teacher; the partial unique index rejects a
    // teacher who already leads another group.
    let result = sqlx::query("UPDATE groups SET id_maestro = $2 WHERE id = $1")
        .bind(group_id)
        .bind(&teacher.uid)
        .execute(&state.pool)
        .await;

    match result {
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            return Err(ApiError::Conflict(
                "Este maestro ya está asignado a otro grupo".into(),
            ));
        }
        Err(e) => return Err(e.into()),
        Ok(done) if done.rows_affected() == 0 => {
            return Err(ApiError::NotFound(GROUP_NOT_FOUND.into()));
        }
        Ok(_) => {}
    }

    write_audit(
        &state.pool,
        &AuditEntry::by(&actor, "group.assign_teacher", "group")
            .resource_id(group_id)
            .detail(json!({"uidMaestro": &teacher.uid})),
    )
    .await;

    Ok(Json(json!({
        "message": "Maestro asignado correctamente",
        "maestro": Member {
            uid: teacher.uid,
            nombre: teacher.name,
            correo: teacher.email,
        },
    })))
}

#[tracing::instrument(skip(state, body), fields(actor = %actor.uid), err)]
async fn add_student(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<AddStudentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    actor.require(&[Role::Admin, Role::Maestro], "agregar alumnos")?;
    validation::require(&[
        ("idGrupo", body.id_grupo.as_deref()),
        ("correoAlumno", body.correo_alumno.as_deref()),
    ])?;
    let correo = body.correo_alumno.unwrap_or_default();

    let student = fetch_user_by_email(&state.pool, correo.trim())
        .await?
        .ok_or_else(|| ApiError::NotFound("No se encontró un usuario con ese correo".into()))?;
    if student.role != Role::Alumno.as_str() {
        return Err(ApiError::BadRequest(
            "El usuario encontrado no tiene rol de Alumno".into(),
        ));
    }

    let group_id = helpers::parse_id(body.id_grupo.as_deref().unwrap_or_default(), GROUP_NOT_FOUND)?;
    if !group_exists(&state.pool, group_id).await? {
        return Err(ApiError::NotFound(GROUP_NOT_FOUND.into()));
    }

    // group_members is keyed by student, so at most one membership can exist.
    let inserted = sqlx::query(
        r"
        INSERT INTO group_members (uid_alumno, group_id)
        VALUES ($1, $2)
        ON CONFLICT (uid_alumno) DO NOTHING
        ",
    )
    .bind(&student.uid)
    .bind(group_id)
    .execute(&state.pool)
    .await?;

    if inserted.rows_affected() == 0 {
        let current: Option<Uuid> =
            sqlx::query_scalar("SELECT group_id FROM group_members WHERE uid_alumno = $1")
                .bind(&student.uid)
                .fetch_optional(&state.pool)
                .await?;
        if current != Some(group_id) {
            return Err(ApiError::Conflict(
                "El alumno ya pertenece a otro grupo".into(),
            ));
        }
        tracing::debug!(uid = %student.uid, %group_id, "student already in group");
    } else {
        write_audit(
            &state.pool,
            &AuditEntry::by(&actor, "group.add_student", "group")
                .resource_id(group_id)
                .detail(json!({"uidAlumno": &student.uid})),
        )
        .await;
    }

    Ok(Json(json!({
        "message": "Alumno agregado correctamente",
        "alumno": Member {
            uid: student.uid,
            nombre: student.name,
            correo: student.email,
        },
    })))
}

async fn get_group(
    State(state): State<AppState>,
    Path(id_grupo): Path<String>,
) -> Result<Json<GroupResponse>, ApiError> {
    let id = helpers::parse_id(&id_grupo, GROUP_NOT_FOUND)?;
    let group = fetch_group(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(GROUP_NOT_FOUND.into()))?;
    Ok(Json(group))
}

#[tracing::instrument(skip(state, body), fields(actor = %actor.uid), err)]
async fn edit_group(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<EditGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    actor.require(&[Role::Admin], "editar grupos")?;
    validation::require(&[
        ("idGrupo", body.id_grupo.as_deref()),
        ("nombre", body.nombre.as_deref()),
        ("descripcion", body.descripcion.as_deref()),
    ])?;
    let group_id = helpers::parse_id(body.id_grupo.as_deref().unwrap_or_default(), GROUP_NOT_FOUND)?;
    let nombre = body.nombre.unwrap_or_default().trim().to_owned();
    let descripcion = body.descripcion.unwrap_or_default().trim().to_owned();
    validation::check_length("nombre", &nombre, 1, 255)?;

    let updated = sqlx::query("UPDATE groups SET nombre = $2, descripcion = $3 WHERE id = $1")
        .bind(group_id)
        .bind(&nombre)
        .bind(&descripcion)
        .execute(&state.pool)
        .await?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::NotFound(GROUP_NOT_FOUND.into()));
    }

    write_audit(
        &state.pool,
        &AuditEntry::by(&actor, "group.update", "group")
            .resource_id(group_id)
            .detail(json!({"nombre": &nombre})),
    )
    .await;

    Ok(helpers::message("Grupo actualizado correctamente"))
}

#[tracing::instrument(skip(state), fields(actor = %actor.uid), err)]
async fn delete_group(
    State(state): State<AppState>,
    actor: Actor,
    Path(id_grupo): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    actor.require(&[Role::Admin], "eliminar grupos")?;
    let group_id = helpers::parse_id(&id_grupo, GROUP_NOT_FOUND)?;

    // Members go with it; challenges stay, detached from the group.
    let deleted = sqlx::query("DELETE FROM groups WHERE id = $1")
        .bind(group_id)
        .execute(&state.pool)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(ApiError::NotFound(GROUP_NOT_FOUND.into()));
    }

    write_audit(
        &state.pool,
        &AuditEntry::by(&actor, "group.delete", "group").resource_id(group_id),
    )
    .await;

    Ok(helpers::message("Grupo eliminado correctamente"))
}

async fn list_groups(State(state): State<AppState>) -> Result<Json<Vec<GroupResponse>>, ApiError> {
    let rows = sqlx::query_as::<_, GroupRow>(&format!("{GROUP_SELECT} ORDER BY g.creado_en, g.id"))
        .fetch_all(&state.pool)
        .await?;

    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut rosters = load_rosters(&state.pool, &ids).await?;

    let groups = rows
        .into_iter()
        .map(|row| {
            let alumnos = rosters.remove(&row.id).unwrap_or_default();
            row.into_response(alumnos)
        })
        .collect();
    Ok(Json(groups))
}

#[tracing::instrument(skip(state, body), fields(actor = %actor.uid), err)]
async fn remove_student(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<RemoveStudentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    actor.require(&[Role::Admin, Role::Maestro], "quitar alumnos")?;
    validation::require(&[("idGrupo", body.id_grupo.as_deref())])?;
    let uid = body.uid_alumno.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let correo = body.correo_alumno.as_deref().map(str::trim).filter(|s| !s.is_empty());
    if uid.is_none() && correo.is_none() {
        return Err(ApiError::Validation(vec!["uidAlumno o correoAlumno".into()]));
    }

    let group_id = helpers::parse_id(body.id_grupo.as_deref().unwrap_or_default(), GROUP_NOT_FOUND)?;
    if !group_exists(&state.pool, group_id).await? {
        return Err(ApiError::NotFound(GROUP_NOT_FOUND.into()));
    }

    let members: i64 =
        sqlx::query_scalar("SELECT count(*) FROM group_members WHERE group_id = $1")
            .bind(group_id)
            .fetch_one(&state.pool)
            .await?;
    if members == 0 {
        return Err(ApiError::BadRequest("No hay alumnos en este grupo".into()));
    }

    let removed = sqlx::query_as::<_, Member>(
        r"
        DELETE FROM group_members gm
        USING users u
        WHERE gm.group_id = $1
          AND gm.uid_alumno = u.uid
          AND (u.uid = $2 OR lower(u.email) = lower($3))
        RETURNING u.uid, u.name AS nombre, u.email AS correo
        ",
    )
    .bind(group_id)
    .bind(uid)
    .bind(correo)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::NotFound("Alumno no encontrado en este grupo".into()))?;

    write_audit(
        &state.pool,
        &AuditEntry::by(&actor, "group.remove_student", "group")
            .resource_id(group_id)
            .detail(json!({"uidAlumno": &removed.uid})),
    )
    .await;

    Ok(Json(json!({
        "message": "Alumno eliminado correctamente",
        "alumno": removed,
    })))
}

#[tracing::instrument(skip(state, body), fields(actor = %actor.uid), err)]
async fn remove_teacher(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<RemoveTeacherRequest>,
) -> Result<impl IntoResponse, ApiError> {
    actor.require(&[Role::Admin], "quitar al maestro")?;
    validation::require(&[("idGrupo", body.id_grupo.as_deref())])?;
    let uid = body.id_maestro.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let correo = body.correo_maestro.as_deref().map(str::trim).filter(|s| !s.is_empty());
    if uid.is_none() && correo.is_none() {
        return Err(ApiError::Validation(vec!["idMaestro o correoMaestro".into()]));
    }

    let group_id = helpers::parse_id(body.id_grupo.as_deref().unwrap_or_default(), GROUP_NOT_FOUND)?;
    let group = fetch_group(&state.pool, group_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(GROUP_NOT_FOUND.into()))?;

    let Some(current) = group.id_maestro.as_deref() else {
        return Err(ApiError::BadRequest(
            "Este grupo no tiene maestro asignado".into(),
        ));
    };

    let matches = uid == Some(current)
        || correo.is_some_and(|c| {
            group
                .correo_maestro
                .as_deref()
                .is_some_and(|m| m.eq_ignore_ascii_case(c))
        });
    if !matches {
        return Err(ApiError::NotFound(
            "El maestro especificado no coincide con el asignado al grupo".into(),
        ));
    }

    if !clear_teacher(&state.pool, group_id, current).await? {
        return Err(ApiError::NotFound(
            "El maestro especificado no coincide con el asignado al grupo".into(),
        ));
    }

    write_audit(
        &state.pool,
        &AuditEntry::by(&actor, "group.remove_teacher", "group")
            .resource_id(group_id)
            .detail(json!({"uidMaestro": current})),
    )
    .await;

    Ok(helpers::message("Maestro eliminado correctamente del grupo"))
}
