use std::time::Duration;

use log::debug;
use reqwest::{redirect, Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use super::types::{DefinitionDto, ListResponse};
use crate::auth::{Credentials, Token};
use crate::error::{PulseError, Result};

const API_VERSION: &str = "7.0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ERROR_BODY: usize = 200;

pub struct AzureDevOpsClient {
    client: Client,
    organization_url: Url,
    project: String,
    token: Token,
}

impl AzureDevOpsClient {
    pub fn new(credentials: &Credentials) -> Result<Self> {
        // Rejected tokens are answered with a redirect to the sign-in page.
        let client = Client::builder()
            .user_agent(concat!("PipePulse/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| PulseError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            organization_url: credentials.organization_url().clone(),
            project: credentials.project().to_string(),
            token: credentials.token().clone(),
        })
    }

    /// Basic auth with an empty user name and the token as password.
    fn auth_request(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth("", Some(self.token.as_str()))
    }

    fn organization_api_url(&self, endpoint: &str) -> Result<Url> {
        self.organization_url
            .join(&format!("_apis/{endpoint}"))
            .map_err(|e| PulseError::Config(format!("Invalid organization API URL: {e}")))
    }

    fn project_api_url(&self, endpoint: &str) -> Result<Url> {
        self.organization_url
            .join(&format!(
                "{}/_apis/{endpoint}",
                urlencoding::encode(&self.project)
            ))
            .map_err(|e| PulseError::Config(format!("Invalid project API URL: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let request = self.auth_request(request.query(&[("api-version", API_VERSION)]));
        let response = request.send().await?;
        let status = response.status();
        debug!("GET {what}: {status}");

        if is_auth_rejection(status) {
            return Err(PulseError::AuthenticationFailed(format!(
                "Failed to fetch {what}: {status}"
            )));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PulseError::ProviderApi {
                status: status.as_u16(),
                message: format!("Failed to fetch {what}: {}", truncate(body.trim())),
            });
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Lists projects in the organization. Returns how many are visible.
    pub async fn fetch_projects(&self) -> Result<usize> {
        let url = self.organization_api_url("projects")?;
        let projects: ListResponse<serde_json::Value> =
            self.get_json(self.client.get(url), "projects").await?;
        Ok(projects.count.max(projects.value.len()))
    }

    /// The `top` most recent builds as raw JSON objects, newest first.
    pub async fn fetch_builds(&self, top: usize) -> Result<Vec<serde_json::Value>> {
        let url = self.project_api_url("build/builds")?;
        let request = self.client.get(url).query(&[("$top", top)]);
        let builds: ListResponse<serde_json::Value> = self.get_json(request, "builds").await?;
        Ok(builds.value)
    }

    pub async fn fetch_definitions(&self) -> Result<Vec<DefinitionDto>> {
        let url = self.project_api_url("build/definitions")?;
        let definitions: ListResponse<DefinitionDto> = self
            .get_json(self.client.get(url), "build definitions")
            .await?;
        Ok(definitions.value)
    }
}

fn is_auth_rejection(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || status == StatusCode::NON_AUTHORITATIVE_INFORMATION
        || status.is_redirection()
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((index, _)) => &body[..index],
        None => body,
    }
}
