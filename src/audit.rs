use sqlx::PgPool;

use crate::auth::middleware::Actor;

pub struct AuditEntry<'a> {
    pub actor_uid: &'a str,
    pub actor_name: &'a str,
    pub action: &'a str,
    pub resource: &'a str,
    pub resource_id: Option<String>,
    pub detail: Option<serde_json::Value>,
    pub ip_addr: Option<&'a str>,
}

impl<'a> AuditEntry<'a> {
    pub fn by(actor: &'a Actor, action: &'a str, resource: &'a str) -> Self {
        Self {
            actor_uid: &actor.uid,
            actor_name: &actor.name,
            action,
            resource,
            resource_id: None,
            detail: None,
            ip_addr: actor.ip_addr.as_deref(),
        }
    }

    #[must_use]
    pub fn resource_id(mut self, id: impl ToString) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    #[must_use]
    pub fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Best effort: a failed audit insert is logged and never fails the request.
pub async fn write_audit(pool: &PgPool, entry: &AuditEntry<'_>) {
    if let Err(e) = write_audit_inner(pool, entry).await {
        tracing::warn!(
            error = %e,
            action = entry.action,
            resource = entry.resource,
            "failed to write audit log entry"
        );
    }
}

async fn write_audit_inner(pool: &PgPool, entry: &AuditEntry<'_>) -> Result<(), sqlx::Error> {
    let ip: Option<ipnetwork::IpNetwork> = entry.ip_addr.and_then(|s| s.parse().ok());

    sqlx::query(
        r"
        INSERT INTO audit_log (actor_uid, actor_name, action, resource, resource_id, detail, ip_addr)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ",
    )
    .bind(entry.actor_uid)
    .bind(entry.actor_name)
    .bind(entry.action)
    .bind(entry.resource)
    .bind(entry.resource_id.as_deref())
    .bind(entry.detail.clone())
    .bind(ip)
    .execute(pool)
    .await?;

    Ok(())
}
