use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use sqlx::PgPool;

use crate::auth::role::Role;
use crate::error::ApiError;
use crate::store::AppState;

/// Authenticated caller.
///
/// The bearer token is an id token issued by the identity provider; it is
/// verified against the provider on every request and the role is read from
/// the `users` table, never from the request.
#[derive(Debug, Clone)]
pub struct Actor {
    pub uid: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub ip_addr: Option<String>,
}

#[derive(sqlx::FromRow)]
struct ActorLookup {
    uid: String,
    name: String,
    email: String,
    role: String,
}

impl Actor {
    /// Fail with 403 unless the caller holds one of `allowed`.
    /// `action` completes the sentence "No tienes permisos para ...".
    pub fn require(&self, allowed: &[Role], action: &str) -> Result<(), ApiError> {
        if allowed.contains(&self.role) {
            return Ok(());
        }
        tracing::debug!(uid = %self.uid, role = %self.role, action, "role check failed");
        Err(ApiError::Forbidden(format!("No tienes permisos para {action}")))
    }
}

impl FromRequestParts<AppState> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let ip_addr = extract_ip(parts, state.config.trust_proxy_headers);

        let token = extract_bearer_token(parts)
            .ok_or_else(|| ApiError::Unauthorized("Token de autenticación requerido".into()))?;

        let uid = state.identity.verify_id_token(&token).await?;

        let user = lookup_user(&state.pool, &uid)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("Usuario no encontrado".into()))?;

        let role: Role = user.role.parse().map_err(ApiError::Internal)?;

        Ok(Self {
            uid: user.uid,
            name: user.name,
            email: user.email,
            role,
            ip_addr,
        })
    }
}

fn extract_bearer_token(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?;
    if token.is_empty() {
        return None;
    }
    Some(token.to_owned())
}

fn extract_ip(parts: &Parts, trust_proxy: bool) -> Option<String> {
    // Only trust X-Forwarded-For when behind a configured reverse proxy
    if trust_proxy
        && let Some(forwarded) = parts.headers.get("x-forwarded-for")
        && let Ok(val) = forwarded.to_str()
        && let Some(first_ip) = val.split(',').next()
    {
        return Some(first_ip.trim().to_owned());
    }
    parts
        .extensions
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
}

async fn lookup_user(pool: &PgPool, uid: &str) -> Result<Option<ActorLookup>, ApiError> {
    let row = sqlx::query_as::<_, ActorLookup>(
        "SELECT uid, name, email, role FROM users WHERE uid = $1",
    )
    .bind(uid)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
