use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::{IdentityError, IdentityProvider, SignIn};
use crate::config::Config;

/// Identity Toolkit REST client (the API behind Firebase Authentication).
///
/// Key-authenticated endpoints (`signUp`, `signInWithPassword`, `lookup`) use
/// the web API key. Project-scoped admin endpoints (`update`, `delete`) need
/// an OAuth bearer token and the project id.
#[derive(Clone)]
pub struct FirebaseIdentity {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
    project_id: Option<String>,
    admin_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignUpResponse {
    local_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    local_id: String,
    id_token: String,
    refresh_token: Option<String>,
    expires_in: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    local_id: String,
    #[serde(default)]
    disabled: bool,
}

#[derive(Debug, Deserialize)]
struct Empty {}

impl FirebaseIdentity {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        // A trailing slash keeps any base path (emulator prefix) when joining.
        let mut base = config.identity_base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key: config.firebase_api_key.clone(),
            project_id: config.firebase_project_id.clone(),
            admin_token: config.firebase_admin_token.clone(),
        })
    }

    fn keyed_url(&self, method: &str) -> Result<Url, IdentityError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or(IdentityError::NotConfigured("FIREBASE_API_KEY"))?;
        let mut url = self.join(&format!("v1/accounts:{method}"))?;
        url.query_pairs_mut().append_pair("key", key);
        Ok(url)
    }

    fn admin_request(&self, method: &str) -> Result<reqwest::RequestBuilder, IdentityError> {
        let project = self
            .project_id
            .as_deref()
            .ok_or(IdentityError::NotConfigured("FIREBASE_PROJECT_ID"))?;
        let token = self
            .admin_token
            .as_deref()
            .ok_or(IdentityError::NotConfigured("FIREBASE_ADMIN_TOKEN"))?;
        let url = self.join(&format!("v1/projects/{project}/accounts:{method}"))?;
        Ok(self.client.post(url).bearer_auth(token))
    }

    fn join(&self, path: &str) -> Result<Url, IdentityError> {
        self.base_url
            .join(path)
            .map_err(|e| IdentityError::ProviderUnavailable(format!("invalid identity url: {e}")))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, IdentityError> {
        let resp = request.send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;

        if status.is_success() {
            return serde_json::from_slice(&bytes).map_err(|e| {
                IdentityError::ProviderUnavailable(format!("malformed response: {e}"))
            });
        }
        if status.is_server_error() {
            return Err(IdentityError::ProviderUnavailable(format!("HTTP {status}")));
        }

        match serde_json::from_slice::<ErrorEnvelope>(&bytes) {
            Ok(envelope) => {
                tracing::debug!(%status, code = %envelope.error.message, "identity provider error");
                Err(IdentityError::from_code(&envelope.error.message))
            }
            Err(_) => Err(IdentityError::ProviderUnavailable(format!(
                "HTTP {status} without error envelope"
            ))),
        }
    }
}

#[async_trait]
impl IdentityProvider for FirebaseIdentity {
    #[tracing::instrument(skip(self, password), err)]
    async fn create_account(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<String, IdentityError> {
        let url = self.keyed_url("signUp")?;
        let resp: SignUpResponse = self
            .send(self.client.post(url).json(&serde_json::json!({
                "email": email,
                "password": password,
                "displayName": display_name,
                "returnSecureToken": false,
            })))
            .await?;
        Ok(resp.local_id)
    }

    #[tracing::instrument(skip(self, password), err)]
    async fn sign_in(&self, email: &str, password: &str) -> Result<SignIn, IdentityError> {
        let url = self.keyed_url("signInWithPassword")?;
        let resp: SignInResponse = self
            .send(self.client.post(url).json(&serde_json::json!({
                "email": email,
                "password": password,
                "returnSecureToken": true,
            })))
            .await?;
        Ok(SignIn {
            uid: resp.local_id,
            id_token: resp.id_token,
            refresh_token: resp.refresh_token,
            expires_in: resp.expires_in.and_then(|s| s.parse().ok()),
        })
    }

    async fn verify_id_token(&self, id_token: &str) -> Result<String, IdentityError> {
        let url = self.keyed_url("lookup")?;
        let resp: LookupResponse = self
            .send(
                self.client
                    .post(url)
                    .json(&serde_json::json!({ "idToken": id_token })),
            )
            .await?;

        let user = resp
            .users
            .into_iter()
            .next()
            .ok_or(IdentityError::InvalidToken)?;
        if user.disabled {
            return Err(IdentityError::UserDisabled);
        }
        Ok(user.local_id)
    }

    #[tracing::instrument(skip(self), err)]
    async fn update_display_name(
        &self,
        uid: &str,
        display_name: &str,
    ) -> Result<(), IdentityError> {
        let request = self.admin_request("update")?.json(&serde_json::json!({
            "localId": uid,
            "displayName": display_name,
        }));
        let _: Empty = self.send(request).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), err)]
    async fn delete_account(&self, uid: &str) -> Result<(), IdentityError> {
        let request = self
            .admin_request("delete")?
            .json(&serde_json::json!({ "localId": uid }));
        let _: Empty = self.send(request).await?;
        Ok(())
    }
}
