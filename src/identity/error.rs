use crate::error::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("email already registered")]
    EmailExists,

    #[error("email not registered")]
    EmailNotFound,

    #[error("wrong password")]
    InvalidPassword,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account disabled")]
    UserDisabled,

    #[error("invalid id token")]
    InvalidToken,

    #[error("account not found")]
    UserNotFound,

    #[error("identity provider not configured: {0}")]
    NotConfigured(&'static str),

    /// Any other error code returned by the provider.
    #[error("identity provider rejected request: {0}")]
    Rejected(String),

    /// The provider answered with something other than its JSON error
    /// envelope: a gateway page, a 5xx or an unparsable body.
    #[error("identity provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

impl IdentityError {
    /// Map a provider error message (e.g. `"INVALID_PASSWORD"` or
    /// `"WEAK_PASSWORD : Password should be at least 6 characters"`) to a variant.
    pub fn from_code(message: &str) -> Self {
        let code = message.split([' ', ':']).next().unwrap_or_default();
        match code {
            "EMAIL_EXISTS" => Self::EmailExists,
            "EMAIL_NOT_FOUND" => Self::EmailNotFound,
            "INVALID_PASSWORD" => Self::InvalidPassword,
            "INVALID_LOGIN_CREDENTIALS" | "INVALID_EMAIL" => Self::InvalidCredentials,
            "USER_DISABLED" => Self::UserDisabled,
            "INVALID_ID_TOKEN" | "TOKEN_EXPIRED" | "USER_NOT_FOUND_FOR_TOKEN" => Self::InvalidToken,
            "USER_NOT_FOUND" => Self::UserNotFound,
            _ => Self::Rejected(message.to_owned()),
        }
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::EmailExists => Self::Conflict("El correo ya está registrado".into()),
            IdentityError::EmailNotFound => Self::Unauthorized("Usuario no registrado".into()),
            IdentityError::InvalidPassword => Self::Unauthorized("Contraseña incorrecta".into()),
            IdentityError::InvalidCredentials => {
                Self::Unauthorized("Credenciales inválidas".into())
            }
            IdentityError::UserDisabled => Self::Forbidden("Usuario deshabilitado".into()),
            IdentityError::InvalidToken => Self::Unauthorized("Token inválido".into()),
            IdentityError::UserNotFound => {
                Self::NotFound("Usuario no encontrado en el proveedor de identidad".into())
            }
            IdentityError::NotConfigured(what) => {
                tracing::error!(missing = what, "identity provider not configured");
                Self::ServiceUnavailable("proveedor de identidad no configurado".into())
            }
            IdentityError::Rejected(msg) => Self::BadRequest(msg),
            IdentityError::ProviderUnavailable(detail) => {
                tracing::error!(%detail, "identity provider failure");
                Self::ServiceUnavailable("proveedor de identidad no disponible".into())
            }
            IdentityError::Transport(e) => {
                tracing::error!(error = %e, "identity provider unreachable");
                Self::ServiceUnavailable("proveedor de identidad no disponible".into())
            }
        }
    }
}
