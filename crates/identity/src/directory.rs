//! Tenant directory client.

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use tracing::debug;

use gnbwatch_protocol::{Device, TenantDirectory};

/// Errors from the tenant directory.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("access token is not a valid header value")]
    InvalidToken,
}

/// Lists the machines an access token may observe.
pub struct MachineDirectory {
    http: reqwest::Client,
    url: String,
}

impl MachineDirectory {
    /// `url` is the full tenant endpoint (the `tenant_api_url` setting).
    pub fn new(url: &str, access_token: &str) -> Result<Self, DirectoryError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {access_token}"))
                .map_err(|_| DirectoryError::InvalidToken)?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            url: url.to_string(),
        })
    }

    /// Fetches the raw tenant listing.
    pub async fn tenants(&self) -> Result<TenantDirectory, DirectoryError> {
        let resp = self.http.get(&self.url).send().await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DirectoryError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// All machines across every available tenant, in listing order.
    pub async fn devices(&self) -> Result<Vec<Device>, DirectoryError> {
        let directory = self.tenants().await?;
        let devices = directory.into_devices();
        debug!(count = devices.len(), "machines listed");
        Ok(devices)
    }
}
