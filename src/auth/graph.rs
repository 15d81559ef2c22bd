//! Azure AD Graph client for the tenant's user directory.

use crate::config::Config;
use crate::error::DirectoryError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Directory API client. The access token is only ever sent to `base_url`.
pub struct GraphClient {
    http_client: reqwest::Client,
    base_url: Url,
    tenant: String,
    api_version: String,
}

impl GraphClient {
    /// Create a new Graph client for the configured resource and tenant.
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = Url::parse(&config.oauth.resource).context("Invalid resource URI")?;
        Self::with_base_url(base_url, &config.oauth.tenant, &config.directory.api_version)
    }

    pub fn with_base_url(base_url: Url, tenant: &str, api_version: &str) -> Result<Self> {
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Resource URI cannot be a base: {}", base_url);
        }

        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            base_url,
            tenant: tenant.to_string(),
            api_version: api_version.to_string(),
        })
    }

    /// `{resource}/{tenant}/users?api-version=..[&$filter=..]`
    pub fn users_url(&self, filter: Option<&str>) -> Url {
        let mut url = self.base_url.clone();

        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&self.tenant).push("users");
        }

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("api-version", &self.api_version);
            if let Some(filter) = filter {
                query.append_pair("$filter", filter);
            }
        }

        url
    }

    /// List the users of the tenant, optionally narrowed by an OData filter.
    #[tracing::instrument(skip(self, access_token))]
    pub async fn list_users(
        &self,
        access_token: &str,
        filter: Option<&str>,
    ) -> Result<Vec<DirectoryUser>, DirectoryError> {
        let url = self.users_url(filter);

        let response = self
            .http_client
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| DirectoryError::RequestFailed(e.to_string()))?;

        match response.status().as_u16() {
            200 => {
                let users: UserList = response
                    .json()
                    .await
                    .map_err(|e| DirectoryError::ParseFailed(e.to_string()))?;
                tracing::debug!(count = users.value.len(), "Fetched directory users");
                Ok(users.value)
            }
            401 => Err(DirectoryError::Unauthorized),
            403 => Err(DirectoryError::Forbidden),
            429 => Err(DirectoryError::RateLimited),
            // Don't expose raw API error details - just log status code
            status => Err(DirectoryError::RequestFailed(format!("HTTP {}", status))),
        }
    }
}

/// OData filter matching an enabled account by sign-in name or mail.
pub fn email_filter(email: &str) -> String {
    // OData string literals escape a quote by doubling it
    let email = email.replace('\'', "''");
    format!(
        "accountEnabled eq true and (userPrincipalName eq '{0}' or mail eq '{0}')",
        email
    )
}

/// Response envelope of the users endpoint.
#[derive(Debug, Deserialize)]
struct UserList {
    #[serde(default)]
    value: Vec<DirectoryUser>,
}

/// A user record. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectoryUser {
    pub display_name: Option<String>,
    pub given_name: Option<String>,
    pub surname: Option<String>,
    pub street_address: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub mail: Option<String>,
    pub telephone_number: Option<String>,
    pub mobile: Option<String>,
    pub job_title: Option<String>,
    pub department: Option<String>,
}
