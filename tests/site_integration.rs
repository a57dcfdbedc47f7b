mod helpers;

use axum::Router;
use axum::http::StatusCode;
use serde_json::json;
use sqlx::PgPool;

async fn create_site(app: &Router, token: &str, nombre: &str) -> String {
    let (status, body) = helpers::post_json(
        app,
        token,
        "/api/site/crear-sitio",
        json!({
            "nombre": nombre,
            "ecosistema": "Lacustre",
            "ubicacion": { "lat": 20.65, "lng": -103.35 },
            "imagenes": ["data:image/png;base64,AAAA"],
            "datosAgua": { "ph": 7.1 },
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create site failed: {body}");
    body["id"].as_str().unwrap().to_owned()
}

#[sqlx::test(migrations = "./migrations")]
async fn create_site_returns_document(pool: PgPool) {
    let (app, _idp) = helpers::test_app(pool.clone()).await;
    let (_, teacher) = helpers::seed_user(&pool, "Marta", "marta@escuela.mx", "Maestro").await;

    let (status, body) = helpers::post_json(
        &app,
        &teacher,
        "/api/site/crear-sitio",
        json!({ "nombre": "Presa", "ecosistema": "Lacustre", "imagenes": "no-es-lista" }),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["message"], "Sitio creado correctamente");
    assert_eq!(body["nombre"], "Presa");
    assert_eq!(body["descripcion"], "");
    assert_eq!(body["imagenes"], json!([]));
    assert!(body["ubicacion"].is_null());
    assert!(body["datosAgua"].is_null());
    assert_eq!(body["comentarios"], json!([]));
    assert!(body["fechaCreacion"].is_string());
}

#[sqlx::test(migrations = "./migrations")]
async fn create_site_validation_and_roles(pool: PgPool) {
    let (app, _idp) = helpers::test_app(pool.clone()).await;
    let (_, teacher) = helpers::seed_user(&pool, "Marta", "marta@escuela.mx", "Maestro").await;
    let (_, student) = helpers::seed_user(&pool, "Beto", "beto@escuela.mx", "Alumno").await;

    let (status, body) = helpers::post_json(
        &app,
        &teacher,
        "/api/site/crear-sitio",
        json!({ "nombre": "Presa" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["fields"], json!(["ecosistema"]));

    let (status, _) = helpers::post_json(
        &app,
        &student,
        "/api/site/crear-sitio",
        json!({ "nombre": "Presa", "ecosistema": "Lacustre" }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[sqlx::test(migrations = "./migrations")]
async fn list_and_get_sites(pool: PgPool) {
    let (app, _idp) = helpers::test_app(pool.clone()).await;
    let (_, teacher) = helpers::seed_user(&pool, "Marta", "marta@escuela.mx", "Maestro").await;
    let id = create_site(&app, &teacher, "Presa").await;
    create_site(&app, &teacher, "Río").await;

    let (status, body) = helpers::get_json(&app, "", "/api/site/listar-sitios").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = helpers::get_json(&app, "", &format!("/api/site/obtener-sitio/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ubicacion"]["lat"], 20.65);
    assert_eq!(body["datosAgua"]["ph"], 7.1);

    let (status, body) = helpers::get_json(
        &app,
        "",
        "/api/site/obtener-sitio/00000000-0000-0000-0000-000000000000",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Sitio no encontrado");
}

#[sqlx::test(migrations = "./migrations")]
async fn edit_site_keeps_water_data(pool: PgPool) {
    let (app, _idp) = helpers::test_app(pool.clone()).await;
    let (_, teacher) = helpers::seed_user(&pool, "Marta", "marta@escuela.mx", "Maestro").await;
    let id = create_site(&app, &teacher, "Presa").await;

    let (status, _) = helpers::put_json(
        &app,
        &teacher,
        &format!("/api/site/editar-sitio/{id}"),
        json!({ "nombre": "Presa Norte", "ecosistema": "Lacustre", "descripcion": "Cortina" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = helpers::get_json(&app, "", &format!("/api/site/obtener-sitio/{id}")).await;
    assert_eq!(body["nombre"], "Presa Norte");
    assert_eq!(body["descripcion"], "Cortina");
    assert_eq!(body["imagenes"], json!([]));
    assert_eq!(body["datosAgua"]["ph"], 7.1);

    let (status, _) = helpers::put_json(
        &app,
        &teacher,
        &format!("/api/site/editar-sitio/{id}"),
        json!({ "nombre": "Presa Norte" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = helpers::put_json(
        &app,
        &teacher,
        "/api/site/editar-sitio/00000000-0000-0000-0000-000000000000",
        json!({ "nombre": "x", "ecosistema": "y" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Comments
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn comments_in_insertion_order(pool: PgPool) {
    let (app, _idp) = helpers::test_app(pool.clone()).await;
    let (_, teacher) = helpers::seed_user(&pool, "Marta", "marta@escuela.mx", "Maestro").await;
    let (uid, student) = helpers::seed_user(&pool, "Beto", "beto@escuela.mx", "Alumno").await;
    let id = create_site(&app, &teacher, "Presa").await;

    for texto in ["primero", "segundo"] {
        let (status, body) = helpers::post_json(
            &app,
            &student,
            &format!("/api/site/agregar-comentario/{id}"),
            json!({ "uid": &uid, "name": "Beto", "texto": texto }),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["comentario"]["texto"], texto);
    }

    let (status, body) =
        helpers::get_json(&app, "", &format!("/api/site/listar-comentarios/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    let textos: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["texto"].as_str().unwrap())
        .collect();
    assert_eq!(textos, vec!["primero", "segundo"]);
}

#[sqlx::test(migrations = "./migrations")]
async fn comment_validation(pool: PgPool) {
    let (app, _idp) = helpers::test_app(pool.clone()).await;
    let (_, teacher) = helpers::seed_user(&pool, "Marta", "marta@escuela.mx", "Maestro").await;
    let (uid, student) = helpers::seed_user(&pool, "Beto", "beto@escuela.mx", "Alumno").await;
    let id = create_site(&app, &teacher, "Presa").await;
    let path = format!("/api/site/agregar-comentario/{id}");

    let (status, _) =
        helpers::post_json(&app, &student, &path, json!({ "uid": &uid, "name": "Beto" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = helpers::post_json(
        &app,
        &student,
        &path,
        json!({ "uid": "uid-otro", "name": "Beto", "texto": "hola" }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = helpers::post_json(
        &app,
        "",
        &path,
        json!({ "uid": &uid, "name": "Beto", "texto": "hola" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = helpers::post_json(
        &app,
        &student,
        "/api/site/agregar-comentario/00000000-0000-0000-0000-000000000000",
        json!({ "uid": &uid, "name": "Beto", "texto": "hola" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[sqlx::test(migrations = "./migrations")]
async fn recent_comments_newest_first_capped(pool: PgPool) {
    let (app, _idp) = helpers::test_app(pool.clone()).await;
    let (_, teacher) = helpers::seed_user(&pool, "Marta", "marta@escuela.mx", "Maestro").await;
    let (uid, student) = helpers::seed_user(&pool, "Beto", "beto@escuela.mx", "Alumno").await;
    let presa = create_site(&app, &teacher, "Presa").await;
    let rio = create_site(&app, &teacher, "Río").await;

    for i in 0..12 {
        let site = if i % 2 == 0 { &presa } else { &rio };
        let (status, _) = helpers::post_json(
            &app,
            &student,
            &format!("/api/site/agregar-comentario/{site}"),
            json!({ "uid": &uid, "name": "Beto", "texto": format!("c{i}") }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = helpers::get_json(&app, "", "/api/site/comentarios-recientes").await;
    assert_eq!(status, StatusCode::OK);
    let recent = body.as_array().unwrap();
    assert_eq!(recent.len(), 10);
    assert_eq!(recent[0]["texto"], "c11");
    assert_eq!(recent[0]["sitioId"], rio.as_str());
    assert_eq!(recent[0]["sitioNombre"], "Río");
    assert_eq!(recent[9]["texto"], "c2");
}
