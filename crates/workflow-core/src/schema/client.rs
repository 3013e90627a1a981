//! Type-inference endpoint clients

use std::time::Duration;

use async_trait::async_trait;

use crate::config::EditorConfig;
use crate::error::Result;

use super::{SchemaPropagationRequest, SchemaPropagationResponse};

/// Something that can infer input schemas for a logical plan
#[async_trait]
pub trait SchemaInferenceClient: Send + Sync {
    /// Infer the attributes reaching each operator's input ports
    async fn infer(&self, request: &SchemaPropagationRequest) -> Result<SchemaPropagationResponse>;
}

/// Client for an HTTP type-inference endpoint
pub struct HttpSchemaInferenceClient {
    http_client: reqwest::Client,
    endpoint: String,
}

impl HttpSchemaInferenceClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
        })
    }

    /// Build a client from the configured endpoint, if there is one
    pub fn from_config(config: &EditorConfig) -> Result<Option<Self>> {
        config
            .propagation_endpoint
            .as_deref()
            .map(|endpoint| Self::new(endpoint, config.request_timeout()))
            .transpose()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SchemaInferenceClient for HttpSchemaInferenceClient {
    async fn infer(&self, request: &SchemaPropagationRequest) -> Result<SchemaPropagationResponse> {
        log::debug!(
            "Requesting schema inference for {} operator(s) from {}",
            request.operators.len(),
            self.endpoint
        );

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }
}
