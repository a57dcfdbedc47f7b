mod helpers;

use axum::http::StatusCode;
use serde_json::json;
use sqlx::PgPool;

#[sqlx::test(migrations = "./migrations")]
async fn admin_create_teacher(pool: PgPool) {
    let (app, _idp) = helpers::test_app(pool).await;
    let admin = helpers::admin_login(&app).await;

    let (status, body) = helpers::post_json(
        &app,
        &admin,
        "/api/admin/create-user",
        json!({
            "name": "Marta",
            "email": "marta@escuela.mx",
            "password": "secreto123",
            "role": "Maestro",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["message"], "Maestro creado correctamente");
    assert_eq!(body["user"]["uid"], "uid-marta@escuela.mx");
    assert_eq!(body["user"]["role"], "Maestro");
    assert!(body["user"]["createdAt"].is_string());
}

#[sqlx::test(migrations = "./migrations")]
async fn admin_create_student_role_rejected(pool: PgPool) {
    let (app, _idp) = helpers::test_app(pool).await;
    let admin = helpers::admin_login(&app).await;

    let (status, _) = helpers::post_json(
        &app,
        &admin,
        "/api/admin/create-user",
        json!({
            "name": "Beto",
            "email": "beto@escuela.mx",
            "password": "secreto123",
            "role": "Alumno",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[sqlx::test(migrations = "./migrations")]
async fn admin_create_unknown_role_rejected(pool: PgPool) {
    let (app, _idp) = helpers::test_app(pool).await;
    let admin = helpers::admin_login(&app).await;

    let (status, body) = helpers::post_json(
        &app,
        &admin,
        "/api/admin/create-user",
        json!({
            "name": "Dora",
            "email": "dora@escuela.mx",
            "password": "secreto123",
            "role": "Director",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Rol inválido: solo se permite 'Admin' o 'Maestro'");
}

#[sqlx::test(migrations = "./migrations")]
async fn admin_create_duplicate_email(pool: PgPool) {
    let (app, _idp) = helpers::test_app(pool.clone()).await;
    let admin = helpers::admin_login(&app).await;
    helpers::seed_user(&pool, "Marta", "marta@escuela.mx", "Maestro").await;

    let (status, _) = helpers::post_json(
        &app,
        &admin,
        "/api/admin/create-user",
        json!({
            "name": "Marta 2",
            "email": "marta@escuela.mx",
            "password": "secreto123",
            "role": "Maestro",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
}

#[sqlx::test(migrations = "./migrations")]
async fn admin_create_missing_fields(pool: PgPool) {
    let (app, _idp) = helpers::test_app(pool).await;
    let admin = helpers::admin_login(&app).await;

    let (status, body) = helpers::post_json(
        &app,
        &admin,
        "/api/admin/create-user",
        json!({ "name": "Marta" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["fields"], json!(["email", "password", "role"]));
}

#[sqlx::test(migrations = "./migrations")]
async fn teacher_cannot_create_users(pool: PgPool) {
    let (app, _idp) = helpers::test_app(pool.clone()).await;
    let (_, teacher) = helpers::seed_user(&pool, "Marta", "marta@escuela.mx", "Maestro").await;

    let (status, body) = helpers::post_json(
        &app,
        &teacher,
        "/api/admin/create-user",
        json!({
            "name": "Otro",
            "email": "otro@escuela.mx",
            "password": "secreto123",
            "role": "Admin",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "No tienes permisos para crear usuarios");
}

#[sqlx::test(migrations = "./migrations")]
async fn create_user_requires_token(pool: PgPool) {
    let (app, _idp) = helpers::test_app(pool).await;

    let (status, _) = helpers::post_json(
        &app,
        "",
        "/api/admin/create-user",
        json!({
            "name": "Otro",
            "email": "otro@escuela.mx",
            "password": "secreto123",
            "role": "Admin",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[sqlx::test(migrations = "./migrations")]
async fn admin_edit_user(pool: PgPool) {
    let (app, _idp) = helpers::test_app(pool.clone()).await;
    let admin = helpers::admin_login(&app).await;
    let (uid, _) = helpers::seed_user(&pool, "Marta", "marta@escuela.mx", "Maestro").await;

    let (status, body) = helpers::put_json(
        &app,
        &admin,
        "/api/admin/editar-usuario",
        json!({ "uid": &uid, "name": "Marta López", "role": "Admin" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (name, role): (String, String) =
        sqlx::query_as("SELECT name, role FROM users WHERE uid = $1")
            .bind(&uid)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(name, "Marta López");
    assert_eq!(role, "Admin");
}

#[sqlx::test(migrations = "./migrations")]
async fn admin_edit_unknown_user(pool: PgPool) {
    let (app, _idp) = helpers::test_app(pool).await;
    let admin = helpers::admin_login(&app).await;

    let (status, _) = helpers::put_json(
        &app,
        &admin,
        "/api/admin/editar-usuario",
        json!({ "uid": "nadie", "name": "Nadie", "role": "Maestro" }),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[sqlx::test(migrations = "./migrations")]
async fn admin_edit_invalid_role(pool: PgPool) {
    let (app, _idp) = helpers::test_app(pool.clone()).await;
    let admin = helpers::admin_login(&app).await;
    let (uid, _) = helpers::seed_user(&pool, "Marta", "marta@escuela.mx", "Maestro").await;

    let (status, _) = helpers::put_json(
        &app,
        &admin,
        "/api/admin/editar-usuario",
        json!({ "uid": uid, "name": "Marta", "role": "Director" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[sqlx::test(migrations = "./migrations")]
async fn admin_delete_user_releases_membership(pool: PgPool) {
    let (app, _idp) = helpers::test_app(pool.clone()).await;
    let admin = helpers::admin_login(&app).await;
    let (uid, _) = helpers::seed_user(&pool, "Beto", "beto@escuela.mx", "Alumno").await;
    let group = helpers::create_group(&app, &admin, "3A").await;
    helpers::add_student(&app, &admin, &group, "beto@escuela.mx").await;

    let (status, body) =
        helpers::delete_json(&app, &admin, &format!("/api/admin/eliminar-usuario/{uid}")).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let members: i64 = sqlx::query_scalar("SELECT count(*) FROM group_members")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(members, 0);

    let (status, _) =
        helpers::delete_json(&app, &admin, &format!("/api/admin/eliminar-usuario/{uid}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[sqlx::test(migrations = "./migrations")]
async fn list_users_allows_teachers_not_students(pool: PgPool) {
    let (app, _idp) = helpers::test_app(pool.clone()).await;
    let (_, teacher) = helpers::seed_user(&pool, "Marta", "marta@escuela.mx", "Maestro").await;
    let (_, student) = helpers::seed_user(&pool, "Beto", "beto@escuela.mx", "Alumno").await;

    let (status, body) = helpers::get_json(&app, &teacher, "/api/admin/listar-usuarios").await;
    assert_eq!(status, StatusCode::OK);
    // bootstrap admin + the two seeded users
    assert_eq!(body.as_array().unwrap().len(), 3);

    let (status, _) = helpers::get_json(&app, &student, "/api/admin/listar-usuarios").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[sqlx::test(migrations = "./migrations")]
async fn mutations_are_audited(pool: PgPool) {
    let (app, _idp) = helpers::test_app(pool.clone()).await;
    let admin = helpers::admin_login(&app).await;
    helpers::create_group(&app, &admin, "3A").await;

    let action: String =
        sqlx::query_scalar("SELECT action FROM audit_log ORDER BY id DESC LIMIT 1")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(action, "group.create");
}
