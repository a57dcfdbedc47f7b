//! Remote identity provider.
//!
//! Passwords never touch this service's database: account creation, password
//! verification and token verification are delegated to the provider, and the
//! `users` table only mirrors `uid`, name, email and role.

pub mod error;
pub mod firebase;

use async_trait::async_trait;

pub use error::IdentityError;
pub use firebase::FirebaseIdentity;

/// Result of a successful password sign-in.
#[derive(Debug, Clone)]
pub struct SignIn {
    pub uid: String,
    pub id_token: String,
    pub refresh_token: Option<String>,
    /// Token lifetime in seconds as reported by the provider.
    pub expires_in: Option<u64>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create an account and return its uid.
    async fn create_account(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<String, IdentityError>;

    /// Verify an email/password pair.
    async fn sign_in(&self, email: &str, password: &str) -> Result<SignIn, IdentityError>;

    /// Verify an id token and return the uid it belongs to.
    async fn verify_id_token(&self, id_token: &str) -> Result<String, IdentityError>;

    async fn update_display_name(&self, uid: &str, display_name: &str)
    -> Result<(), IdentityError>;

    async fn delete_account(&self, uid: &str) -> Result<(), IdentityError>;
}
