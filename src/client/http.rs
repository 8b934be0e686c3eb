//! [`ContainerApi`] over the container REST API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use super::wire::{
    cluster_update_request, create_cluster_body, node_pool_body, node_pool_update_request,
    WireCluster, WireErrorBody, WireOperation,
};
use super::{ApiVersion, ClusterUpdate, ContainerApi, CreateClusterRequest, NodePoolUpdate};
use crate::config::ReconcilerConfig;
use crate::model::{NodePoolSpec, ObservedCluster, ResourceIdentity};
use crate::operation::Operation;
use crate::{Error, Result};

/// Environment variable holding an OAuth access token
pub const TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Messages the control plane uses when a cluster is busy with another operation
const NOT_READY_MARKERS: &[&str] = &[
    "incompatible operation",
    "currently running",
    "operation is in progress",
    "please wait and try again",
];

/// Real control-plane client
pub struct HttpContainerApi {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpContainerApi {
    /// Create a client for `endpoint`, authenticating with `token` when given
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self::with_client(client, endpoint, token))
    }

    /// Create a client around an existing `reqwest::Client`
    pub fn with_client(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Client for the configured endpoint; the token falls back to
    /// [`TOKEN_ENV`]
    pub fn from_config(config: &ReconcilerConfig, token: Option<String>) -> Result<Self> {
        let token = token.or_else(|| std::env::var(TOKEN_ENV).ok());
        Self::new(config.api_endpoint.clone(), token)
    }

    fn url(&self, version: ApiVersion, path: &str) -> String {
        format!("{}/{}/{}", self.endpoint, version, path)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        operation: &str,
        method: Method,
        url: String,
        body: Option<Value>,
    ) -> Result<T> {
        debug!(operation = %operation, method = %method, url = %url, "Calling control plane");

        let mut request = self.client.request(method, &url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = &body {
            trace!(operation = %operation, body = %body, "Request body");
            request = request.json(body);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let text = response.text().await.map_err(map_reqwest_error)?;

        if !status.is_success() {
            return Err(classify_failure(operation, &url, status, &text));
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn operation_call(
        &self,
        operation: &str,
        method: Method,
        url: String,
        body: Option<Value>,
        target: &ResourceIdentity,
    ) -> Result<Operation> {
        let wire: WireOperation = self.call(operation, method, url, body).await?;
        Ok(wire.into_operation(target))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> Error {
    if e.is_decode() {
        Error::serialization(e.to_string())
    } else {
        Error::transport(e.to_string())
    }
}

/// Map a non-2xx response onto the error taxonomy
fn classify_failure(operation: &str, url: &str, status: StatusCode, body: &str) -> Error {
    let detail = serde_json::from_str::<WireErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_default();
    let message = if detail.message.is_empty() {
        body.to_string()
    } else {
        detail.message
    };

    if status == StatusCode::NOT_FOUND {
        return Error::not_found(url);
    }

    let lowered = message.to_lowercase();
    let not_ready = matches!(status, StatusCode::BAD_REQUEST | StatusCode::CONFLICT)
        && (detail.status.as_deref() == Some("FAILED_PRECONDITION")
            || NOT_READY_MARKERS.iter().any(|m| lowered.contains(m)));

    Error::RemoteRequest {
        operation: operation.to_string(),
        code: status.as_u16(),
        status: detail.status,
        message,
        not_ready,
    }
}

#[async_trait]
impl ContainerApi for HttpContainerApi {
    async fn create_cluster(
        &self,
        version: ApiVersion,
        request: &CreateClusterRequest,
    ) -> Result<Operation> {
        let url = self.url(version, &format!("{}/clusters", request.identity.parent_path()));
        self.operation_call(
            "create_cluster",
            Method::POST,
            url,
            Some(create_cluster_body(request)),
            &request.identity,
        )
        .await
    }

    async fn update_cluster(
        &self,
        version: ApiVersion,
        identity: &ResourceIdentity,
        update: &ClusterUpdate,
    ) -> Result<Operation> {
        let (verb, body) = cluster_update_request(update);
        let (method, path) = match verb {
            Some(verb) => (Method::POST, format!("{}:{}", identity.full_name(), verb)),
            None => (Method::PUT, identity.full_name()),
        };
        let name = format!("update_cluster.{}", update.name());
        self.operation_call(&name, method, self.url(version, &path), Some(body), identity)
            .await
    }

    async fn delete_cluster(
        &self,
        version: ApiVersion,
        identity: &ResourceIdentity,
    ) -> Result<Operation> {
        let url = self.url(version, &identity.full_name());
        self.operation_call("delete_cluster", Method::DELETE, url, None, identity)
            .await
    }

    async fn get_cluster(
        &self,
        version: ApiVersion,
        identity: &ResourceIdentity,
    ) -> Result<ObservedCluster> {
        let url = self.url(version, &identity.full_name());
        let wire: WireCluster = self.call("get_cluster", Method::GET, url, None).await?;
        Ok(wire.into())
    }

    async fn get_operation(
        &self,
        version: ApiVersion,
        identity: &ResourceIdentity,
        operation_id: &str,
    ) -> Result<Operation> {
        let path = format!("{}/operations/{}", identity.parent_path(), operation_id);
        self.operation_call(
            "get_operation",
            Method::GET,
            self.url(version, &path),
            None,
            identity,
        )
        .await
    }

    async fn create_node_pool(
        &self,
        version: ApiVersion,
        identity: &ResourceIdentity,
        pool_name: &str,
        pool: &NodePoolSpec,
    ) -> Result<Operation> {
        let url = self.url(version, &format!("{}/nodePools", identity.full_name()));
        let body = serde_json::json!({ "nodePool": node_pool_body(pool_name, pool) });
        self.operation_call("create_node_pool", Method::POST, url, Some(body), identity)
            .await
    }

    async fn delete_node_pool(
        &self,
        version: ApiVersion,
        identity: &ResourceIdentity,
        pool_name: &str,
    ) -> Result<Operation> {
        let url = self.url(version, &identity.node_pool_path(pool_name));
        self.operation_call("delete_node_pool", Method::DELETE, url, None, identity)
            .await
    }

    async fn update_node_pool(
        &self,
        version: ApiVersion,
        identity: &ResourceIdentity,
        pool_name: &str,
        update: &NodePoolUpdate,
    ) -> Result<Operation> {
        let (verb, body) = node_pool_update_request(update);
        let pool_path = identity.node_pool_path(pool_name);
        let (method, path) = match verb {
            Some(verb) => (Method::POST, format!("{pool_path}:{verb}")),
            None => (Method::PUT, pool_path),
        };
        let name = format!("update_node_pool.{}", update.name());
        self.operation_call(&name, method, self.url(version, &path), Some(body), identity)
            .await
    }
}
