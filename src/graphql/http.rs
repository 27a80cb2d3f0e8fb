use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::error::AuditError;
use crate::graphql::{GraphqlRequest, GraphqlTransport};

const USER_AGENT: &str = concat!("alert-audit/", env!("CARGO_PKG_VERSION"));
const API_KEY_HEADER: &str = "API-Key";
const ERROR_PREVIEW_CHARS: usize = 180;

pub struct HttpTransport {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, AuditError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| AuditError::fetch(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl GraphqlTransport for HttpTransport {
    async fn execute(
        &self,
        request: &GraphqlRequest,
        timeout: Duration,
    ) -> Result<Value, AuditError> {
        debug!(endpoint = %self.endpoint, "POST graphql");
        let response = self
            .client
            .post(&self.endpoint)
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| AuditError::fetch(format!("request to {} failed: {e}", self.endpoint)))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuditError::fetch(format!("failed reading response body: {e}")))?;
        if !status.is_success() {
            let preview: String = body.chars().take(ERROR_PREVIEW_CHARS).collect();
            return Err(AuditError::fetch(format!(
                "POST {} returned {status}: {preview}",
                self.endpoint
            )));
        }
        serde_json::from_str(&body)
            .map_err(|e| AuditError::fetch(format!("invalid JSON response: {e}")))
    }
}

/// Builds a transport for one set of credentials. The server creates one per
/// job, so tests can hand it a scripted transport instead.
pub trait TransportFactory: Send + Sync {
    fn connect(&self, api_key: &str) -> Result<Arc<dyn GraphqlTransport>, AuditError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransportFactory {
    pub endpoint: String,
    pub connect_timeout: Duration,
}

impl TransportFactory for HttpTransportFactory {
    fn connect(&self, api_key: &str) -> Result<Arc<dyn GraphqlTransport>, AuditError> {
        Ok(Arc::new(HttpTransport::new(
            self.endpoint.clone(),
            api_key,
            self.connect_timeout,
        )?))
    }
}
