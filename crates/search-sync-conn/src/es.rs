//! HTTP document store client for Elasticsearch-compatible clusters.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::ConnError;
use crate::store::{
    AliasAction, BulkOp, BulkResponse, ClusterHealth, DocumentStore, HealthStatus, IndexInfo,
    SearchRequest,
};

/// Configuration for [`EsClient`].
#[derive(Debug, Clone)]
pub struct EsClientConfig {
    /// Cluster base URL (e.g., "http://localhost:9200")
    pub base_url: String,

    /// Per-request timeout. Must exceed the cluster health wait.
    pub timeout: Duration,
}

impl EsClientConfig {
    /// Config with the default request timeout.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Elasticsearch REST client.
pub struct EsClient {
    client: Client,
    config: EsClientConfig,
}

impl EsClient {
    /// Build a client. No request is made until first use.
    pub fn new(config: EsClientConfig) -> Result<Self, ConnError> {
        if config.base_url.is_empty() {
            return Err(ConnError::Config("elasticsearch url is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConnError::Config(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url, path.trim_start_matches('/'))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Response, ConnError> {
        debug!(method = %method, path = path, "document store request");
        let mut request = self.client.request(method, self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    async fn send_ndjson(&self, path: &str, lines: Vec<Value>) -> Result<Response, ConnError> {
        let mut body = String::new();
        for line in &lines {
            body.push_str(&serde_json::to_string(line)?);
            body.push('\n');
        }

        debug!(path = path, lines = lines.len(), "document store ndjson request");
        Ok(self
            .client
            .post(self.url(path))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await?)
    }
}

/// Turn a non-success response into [`ConnError::Store`].
async fn check(response: Response) -> Result<Response, ConnError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ConnError::Store { status, body })
}

async fn parse<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, ConnError> {
    response
        .json()
        .await
        .map_err(|e| ConnError::Parse(e.to_string()))
}

#[async_trait]
impl DocumentStore for EsClient {
    async fn create_index(&self, name: &str, body: &Value) -> Result<bool, ConnError> {
        let response = self.send(Method::PUT, name, Some(body)).await?;
        if response.status() == StatusCode::BAD_REQUEST {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            if body.contains("resource_already_exists_exception") {
                return Ok(false);
            }
            return Err(ConnError::Store { status, body });
        }
        check(response).await?;
        Ok(true)
    }

    async fn delete_index(&self, name: &str) -> Result<bool, ConnError> {
        let response = self.send(Method::DELETE, name, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check(response).await?;
        Ok(true)
    }

    async fn refresh_index(&self, name: &str) -> Result<(), ConnError> {
        let response = self
            .send(Method::POST, &format!("{name}/_refresh"), None)
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn get_alias(&self, alias: &str) -> Result<Vec<String>, ConnError> {
        let response = self
            .send(Method::GET, &format!("_alias/{alias}"), None)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let body: serde_json::Map<String, Value> = parse(check(response).await?).await?;
        Ok(body.keys().cloned().collect())
    }

    async fn put_alias(&self, index: &str, alias: &str) -> Result<(), ConnError> {
        let response = self
            .send(Method::PUT, &format!("{index}/_alias/{alias}"), None)
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), ConnError> {
        let body = json!({ "actions": actions });
        let response = self.send(Method::POST, "_aliases", Some(&body)).await?;
        check(response).await?;
        Ok(())
    }

    async fn cat_indices(&self) -> Result<Vec<IndexInfo>, ConnError> {
        let response = self
            .send(Method::GET, "_cat/indices?format=json", None)
            .await?;
        parse(check(response).await?).await
    }

    async fn bulk(&self, ops: &[BulkOp]) -> Result<BulkResponse, ConnError> {
        let mut lines = Vec::with_capacity(ops.len() * 2);
        for op in ops {
            lines.push(json!({ "index": { "_index": op.index, "_id": op.id } }));
            lines.push(Value::Object(op.doc.clone()));
        }
        let response = self.send_ndjson("_bulk", lines).await?;
        parse(check(response).await?).await
    }

    async fn msearch(&self, searches: &[SearchRequest]) -> Result<Vec<Value>, ConnError> {
        #[derive(Deserialize)]
        struct MultiSearchResponse {
            responses: Vec<Value>,
        }

        let mut lines = Vec::with_capacity(searches.len() * 2);
        for search in searches {
            lines.push(json!({ "index": search.index }));
            lines.push(search.body.clone());
        }
        let response = self.send_ndjson("_msearch", lines).await?;
        let body: MultiSearchResponse = parse(check(response).await?).await?;
        Ok(body.responses)
    }

    async fn cluster_health(
        &self,
        wait_for: HealthStatus,
        timeout: Duration,
    ) -> Result<ClusterHealth, ConnError> {
        let path = format!(
            "_cluster/health?wait_for_status={}&timeout={}s",
            wait_for,
            timeout.as_secs().max(1)
        );
        let response = self.send(Method::GET, &path, None).await?;
        // A health wait that times out answers 408 with the usual body.
        if response.status() == StatusCode::REQUEST_TIMEOUT {
            return parse(response).await;
        }
        parse(check(response).await?).await
    }

    async fn put_cluster_settings(&self, body: &Value) -> Result<(), ConnError> {
        let response = self
            .send(Method::PUT, "_cluster/settings", Some(body))
            .await?;
        check(response).await?;
        Ok(())
    }
}
