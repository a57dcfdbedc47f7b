//! Comment types shared by the site and monitoring-site endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Actor;
use crate::error::ApiError;
use crate::validation;

/// How many comments the "recent" feeds return.
pub const RECENT_LIMIT: i64 = 10;

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub uid: Option<String>,
    pub name: Option<String>,
    pub texto: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Comment {
    pub uid: String,
    pub name: String,
    pub texto: String,
    pub fecha: DateTime<Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RecentComment {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub comment: Comment,
    pub sitio_id: String,
    pub sitio_nombre: String,
}

/// Validated comment fields, in insert order.
#[derive(Debug)]
pub struct NewComment {
    pub uid: String,
    pub name: String,
    pub texto: String,
}

impl CommentRequest {
    /// Check the body and that it is posted under the caller's own uid.
    pub fn validate(self, actor: &Actor) -> Result<NewComment, ApiError> {
        validation::require(&[
            ("uid", self.uid.as_deref()),
            ("name", self.name.as_deref()),
            ("texto", self.texto.as_deref()),
        ])?;
        let uid = self.uid.unwrap_or_default().trim().to_owned();
        if uid != actor.uid {
            return Err(ApiError::Forbidden(
                "No puedes comentar en nombre de otro usuario".into(),
            ));
        }
        let name = self.name.unwrap_or_default().trim().to_owned();
        let texto = self.texto.unwrap_or_default().trim().to_owned();
        validation::check_length("texto", &texto, 1, 2000)?;
        Ok(NewComment { uid, name, texto })
    }
}
