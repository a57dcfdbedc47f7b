#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use sqlx::PgPool;
use tower::ServiceExt;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

use ecomonitor::config::Config;
use ecomonitor::identity::FirebaseIdentity;
use ecomonitor::store::AppState;

pub const ADMIN_EMAIL: &str = "admin@ecomonitor.test";
pub const ADMIN_PASSWORD: &str = "testpassword";

/// Password the fake provider always rejects with `INVALID_PASSWORD`.
pub const WRONG_PASSWORD: &str = "wrong";

// ---------------------------------------------------------------------------
// Fake identity provider
//
// Stateless and deterministic: the uid of an account is `uid-<email>` and the
// id token of a uid is `token-<uid>`, so tests can mint tokens for users they
// insert straight into the database.
// ---------------------------------------------------------------------------

pub fn uid_for(email: &str) -> String {
    format!("uid-{email}")
}

pub fn token_for(uid: &str) -> String {
    format!("token-{uid}")
}

fn provider_error(code: &str) -> ResponseTemplate {
    ResponseTemplate::new(400).set_body_json(json!({
        "error": { "code": 400, "message": code }
    }))
}

fn body_str(request: &wiremock::Request, field: &str) -> String {
    request
        .body_json::<Value>()
        .ok()
        .and_then(|v| v[field].as_str().map(str::to_owned))
        .unwrap_or_default()
}

struct SignUp;

impl Respond for SignUp {
    fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
        let email = body_str(request, "email");
        if email.starts_with("taken") {
            return provider_error("EMAIL_EXISTS");
        }
        ResponseTemplate::new(200).set_body_json(json!({ "localId": uid_for(&email) }))
    }
}

struct SignIn;

impl Respond for SignIn {
    fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
        let email = body_str(request, "email");
        if email.starts_with("ghost") {
            return provider_error("EMAIL_NOT_FOUND");
        }
        if email.starts_with("throttled") {
            return provider_error("TOO_MANY_ATTEMPTS_TRY_LATER : Access disabled");
        }
        if email.starts_with("outage") {
            return ResponseTemplate::new(502)
                .set_body_string("<html><body>502 Bad Gateway</body></html>");
        }
        if body_str(request, "password") == WRONG_PASSWORD {
            return provider_error("INVALID_PASSWORD");
        }
        let uid = uid_for(&email);
        ResponseTemplate::new(200).set_body_json(json!({
            "localId": &uid,
            "idToken": token_for(&uid),
            "refreshToken": "refresh",
            "expiresIn": "3600",
        }))
    }
}

struct Lookup;

impl Respond for Lookup {
    fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
        match body_str(request, "idToken").strip_prefix("token-") {
            Some(uid) if !uid.is_empty() => {
                ResponseTemplate::new(200).set_body_json(json!({ "users": [{ "localId": uid }] }))
            }
            _ => provider_error("INVALID_ID_TOKEN"),
        }
    }
}

async fn fake_identity_provider() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/accounts:signUp"))
        .respond_with(SignUp)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/accounts:signInWithPassword"))
        .respond_with(SignIn)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/accounts:lookup"))
        .respond_with(Lookup)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/v1/projects/[^/]+/accounts:(update|delete)$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    server
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

pub fn test_config(identity_base_url: String) -> Config {
    Config {
        listen: "127.0.0.1:0".into(),
        database_url: "postgres://localhost/test".into(),
        firebase_api_key: Some("test-key".into()),
        firebase_project_id: Some("demo-ecomonitor".into()),
        firebase_admin_token: Some("admin-token".into()),
        identity_base_url,
        cors_origins: vec![],
        trust_proxy_headers: false,
        body_limit_bytes: 1024 * 1024,
        monitoring_site_id: "lagoUT".into(),
        monitoring_site_name: "Lago UT".into(),
        admin_email: Some(ADMIN_EMAIL.into()),
        admin_password: Some(ADMIN_PASSWORD.into()),
    }
}

/// Build the full application over `pool` with a fake identity provider.
///
/// - Bootstraps the monitoring site and the admin account
/// - The returned `MockServer` must be kept alive for the whole test
pub async fn test_app(pool: PgPool) -> (Router, MockServer) {
    let server = fake_identity_provider().await;
    let config = test_config(server.uri());
    let identity = FirebaseIdentity::new(&config).expect("identity client");

    let state = AppState {
        pool: pool.clone(),
        identity: Arc::new(identity),
        config: Arc::new(config.clone()),
    };

    ecomonitor::store::bootstrap::run(&pool, state.identity.as_ref(), &config)
        .await
        .expect("bootstrap failed");

    (ecomonitor::api::app(state), server)
}

/// Login as the bootstrap admin. Returns the bearer token.
pub async fn admin_login(app: &Router) -> String {
    let (status, body) = post_json(
        app,
        "",
        "/api/auth/login",
        json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "admin login failed: {body}");
    body["idToken"]
        .as_str()
        .expect("login response missing idToken")
        .to_owned()
}

/// Insert a user row directly. Returns `(uid, token)`.
pub async fn seed_user(pool: &PgPool, name: &str, email: &str, role: &str) -> (String, String) {
    let uid = uid_for(email);
    sqlx::query("INSERT INTO users (uid, name, email, role) VALUES ($1, $2, $3, $4)")
        .bind(&uid)
        .bind(name)
        .bind(email)
        .bind(role)
        .execute(pool)
        .await
        .expect("seed user");
    let token = token_for(&uid);
    (uid, token)
}

/// Create a group through the API. Returns its id.
pub async fn create_group(app: &Router, admin_token: &str, nombre: &str) -> String {
    let (status, body) = post_json(
        app,
        admin_token,
        "/api/group/crear-grupo",
        json!({ "nombre": nombre, "descripcion": "Grupo de prueba" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create group failed: {body}");
    body["idGrupo"].as_str().expect("idGrupo").to_owned()
}

/// Enrol an existing student in a group through the API.
pub async fn add_student(app: &Router, token: &str, group_id: &str, email: &str) {
    let (status, body) = post_json(
        app,
        token,
        "/api/group/agregar-alumno",
        json!({ "idGrupo": group_id, "correoAlumno": email }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "add student failed: {body}");
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

async fn send(
    app: &Router,
    method: &str,
    token: &str,
    path: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    if !token.is_empty() {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let req = match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = body_json(resp).await;
    (status, body)
}

/// Send a GET request with Bearer auth.
pub async fn get_json(app: &Router, token: &str, path: &str) -> (StatusCode, Value) {
    send(app, "GET", token, path, None).await
}

/// Send a POST request with Bearer auth and JSON body.
pub async fn post_json(app: &Router, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
    send(app, "POST", token, path, Some(body)).await
}

/// Send a PUT request with Bearer auth and JSON body.
pub async fn put_json(app: &Router, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
    send(app, "PUT", token, path, Some(body)).await
}

/// Send a DELETE request with Bearer auth.
pub async fn delete_json(app: &Router, token: &str, path: &str) -> (StatusCode, Value) {
    send(app, "DELETE", token, path, None).await
}

/// Extract JSON body from a response.
async fn body_json(resp: axum::http::Response<Body>) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}
