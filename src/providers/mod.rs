pub mod azure;

use std::sync::Arc;

use async_trait::async_trait;

use crate::auth::Credentials;
use crate::error::Result;
use crate::models::{PipelineDefinition, RunRecord};

/// A place runs can be fetched from.
#[async_trait]
pub trait BuildSource: Send + Sync {
    /// One cheap authenticated call, used to validate credentials.
    async fn probe(&self) -> Result<()>;

    /// The `top` most recent runs. Records that fail to normalize are
    /// skipped, never fatal to the batch.
    async fn fetch_runs(&self, top: usize) -> Result<Vec<RunRecord>>;

    async fn fetch_definitions(&self) -> Result<Vec<PipelineDefinition>>;
}

/// Opens a [`BuildSource`] for a set of credentials.
pub trait Connector: Send + Sync {
    fn open(&self, credentials: &Credentials) -> Result<Arc<dyn BuildSource>>;
}
