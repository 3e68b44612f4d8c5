use thiserror::Error;

#[derive(Error, Debug)]
pub enum PulseError {
    #[error("Malformed build record: {0}")]
    MalformedRecord(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Provider API error ({status}): {message}")]
    ProviderApi { status: u16, message: String },

    #[error("Connection attempt cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PulseError {
    /// Whether the failure may clear up by itself before the next poll tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkUnavailable(_))
    }
}

impl From<reqwest::Error> for PulseError {
    fn from(err: reqwest::Error) -> Self {
        // Strip the URL so query strings never end up in logs.
        Self::NetworkUnavailable(err.without_url().to_string())
    }
}

pub type Result<T> = std::result::Result<T, PulseError>;
