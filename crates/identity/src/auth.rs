//! Keycloak resource-owner password grant.

use std::fmt;

use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info, warn};

use gnbwatch_protocol::constants::{AUTH_CLIENT_ID, AUTH_REALM};

/// Errors from the identity provider.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("credentials rejected {0} times, giving up")]
    TooManyAttempts(u32),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not read credentials: {0}")]
    Prompt(#[from] std::io::Error),
}

/// Operator credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Both fields are non-empty.
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Token endpoint response.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish_non_exhaustive()
    }
}

/// Source of credentials, asked again after each rejection.
pub trait CredentialPrompt {
    /// Returns complete credentials for attempt number `attempt` (1-based).
    fn credentials(&mut self, attempt: u32) -> std::io::Result<Credentials>;

    /// Called after the provider rejected attempt number `attempt`.
    fn rejected(&mut self, _attempt: u32) {}
}

/// Token endpoint for the `OAIBOX` realm under `server_url`.
pub fn token_endpoint(server_url: &str) -> String {
    format!(
        "{}/realms/{AUTH_REALM}/protocol/openid-connect/token",
        server_url.trim_end_matches('/')
    )
}

/// Client for the identity provider's token endpoint.
pub struct AuthSession {
    http: reqwest::Client,
    token_url: String,
}

impl AuthSession {
    /// `server_url` is the Keycloak base URL (the `access_token_url` setting).
    pub fn new(server_url: &str) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            token_url: token_endpoint(server_url),
        })
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Exchanges `credentials` for an access token.
    ///
    /// A 400 or 401 answer means the credentials were rejected and maps to
    /// [`AuthError::InvalidCredentials`].
    pub async fn token(&self, credentials: &Credentials) -> Result<TokenResponse, AuthError> {
        let form = [
            ("grant_type", "password"),
            ("client_id", AUTH_CLIENT_ID),
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
        ];
        let resp = self.http.post(&self.token_url).form(&form).send().await?;
        let status = resp.status();

        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            debug!(status = status.as_u16(), "token request rejected");
            return Err(AuthError::InvalidCredentials);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Asks for credentials until the provider accepts them, at most
/// `max_attempts` times (at least once).
pub async fn authenticate<P>(
    session: &AuthSession,
    prompt: &mut P,
    max_attempts: u32,
) -> Result<TokenResponse, AuthError>
where
    P: CredentialPrompt + ?Sized,
{
    let max = max_attempts.max(1);
    for attempt in 1..=max {
        let credentials = prompt.credentials(attempt)?;
        match session.token(&credentials).await {
            Ok(token) => {
                info!(user = %credentials.username, attempt, "authenticated");
                return Ok(token);
            }
            Err(AuthError::InvalidCredentials) => {
                warn!(user = %credentials.username, attempt, "credentials rejected");
                prompt.rejected(attempt);
            }
            Err(e) => return Err(e),
        }
    }
    Err(AuthError::TooManyAttempts(max))
}
