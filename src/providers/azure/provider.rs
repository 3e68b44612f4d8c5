use std::sync::Arc;

use async_trait::async_trait;
use log::info;

use super::client::AzureDevOpsClient;
use super::normalize::normalize_batch;
use crate::auth::Credentials;
use crate::error::Result;
use crate::models::{PipelineDefinition, RunRecord};
use crate::providers::{BuildSource, Connector};

pub struct AzureDevOpsSource {
    client: AzureDevOpsClient,
    project: String,
}

impl AzureDevOpsSource {
    pub fn new(credentials: &Credentials) -> Result<Self> {
        let client = AzureDevOpsClient::new(credentials)?;

        Ok(Self {
            client,
            project: credentials.project().to_string(),
        })
    }
}

#[async_trait]
impl BuildSource for AzureDevOpsSource {
    async fn probe(&self) -> Result<()> {
        let projects = self.client.fetch_projects().await?;
        info!("Connected to Azure DevOps ({projects} projects visible)");
        Ok(())
    }

    async fn fetch_runs(&self, top: usize) -> Result<Vec<RunRecord>> {
        info!("Fetching up to {top} builds for project: {}", self.project);

        let raw = self.client.fetch_builds(top).await?;
        let records = normalize_batch(raw);

        info!("Processed {} builds", records.len());
        Ok(records)
    }

    async fn fetch_definitions(&self) -> Result<Vec<PipelineDefinition>> {
        let definitions = self
            .client
            .fetch_definitions()
            .await?
            .into_iter()
            .map(|d| PipelineDefinition {
                id: d.id,
                name: d.name,
                path: d.path,
                queue_status: d.queue_status,
            })
            .collect();

        Ok(definitions)
    }
}

/// Opens [`AzureDevOpsSource`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct AzureConnector;

impl Connector for AzureConnector {
    fn open(&self, credentials: &Credentials) -> Result<Arc<dyn BuildSource>> {
        Ok(Arc::new(AzureDevOpsSource::new(credentials)?))
    }
}
