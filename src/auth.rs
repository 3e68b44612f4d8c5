mod token;

pub use token::Token;

use url::Url;

use crate::error::{PulseError, Result};

/// Everything needed to reach one Azure DevOps project.
#[derive(Debug, Clone)]
pub struct Credentials {
    organization_url: Url,
    project: String,
    token: Token,
}

impl Credentials {
    pub fn new(organization_url: &str, project: &str, token: Token) -> Result<Self> {
        let trimmed = organization_url.trim().trim_end_matches('/');
        let organization_url = Url::parse(&format!("{trimmed}/"))
            .map_err(|e| PulseError::Config(format!("Invalid organization URL: {e}")))?;

        if !matches!(organization_url.scheme(), "http" | "https") {
            return Err(PulseError::Config(format!(
                "Organization URL must use http or https, got '{}'",
                organization_url.scheme()
            )));
        }

        let project = project.trim();
        if project.is_empty() {
            return Err(PulseError::Config("Project name is required".to_string()));
        }

        if token.is_empty() {
            return Err(PulseError::Config(
                "Personal access token is required".to_string(),
            ));
        }

        Ok(Self {
            organization_url,
            project: project.to_string(),
            token,
        })
    }

    /// Organization URL, always ending in `/`.
    pub fn organization_url(&self) -> &Url {
        &self.organization_url
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn token(&self) -> &Token {
        &self.token
    }
}

/// Source of credentials for a connection attempt.
pub trait CredentialProvider: Send + Sync {
    fn load(&self) -> Result<Credentials>;
}

/// Raw values handed over by the caller, validated on `load`.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    pub organization_url: String,
    pub project: String,
    pub token: Token,
}

impl CredentialProvider for StaticCredentials {
    fn load(&self) -> Result<Credentials> {
        Credentials::new(&self.organization_url, &self.project, self.token.clone())
    }
}
