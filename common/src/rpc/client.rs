use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use alloy_rpc_types_engine::{Claims, JwtSecret};
use log::{debug, trace};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::{RpcError, JSON_RPC_VERSION};

/// Timeouts and authentication for one client endpoint.
///
/// Requests are never retried: a timeout once a scenario runs is a failure
/// of that scenario. Waiting for a client to come up is handled separately
/// by the readiness waiters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineClientConfig {
    pub request_timeout: Duration,
    pub connection_timeout: Duration,
    /// Hex-encoded 32-byte secret; requests carry an HS256 bearer token when set
    pub jwt_secret: Option<String>,
}

impl Default for EngineClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            connection_timeout: Duration::from_secs(5),
            jwt_secret: None,
        }
    }
}

impl EngineClientConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.jwt_secret = Some(secret.into());
        self
    }
}

/// JSON-RPC request structure
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

/// JSON-RPC response structure
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// JSON-RPC error structure
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// JSON-RPC over HTTP, optionally JWT-authenticated (Engine API port)
pub struct RpcClient {
    client: Client,
    url: Url,
    jwt: Option<JwtSecret>,
    config: EngineClientConfig,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(endpoint: &str, config: EngineClientConfig) -> Result<Self, RpcError> {
        let url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            Url::parse(endpoint)
        } else {
            Url::parse(&format!("http://{}", endpoint))
        }
        .map_err(|e| RpcError::InvalidEndpoint(format!("{endpoint}: {e}")))?;

        let jwt = config
            .jwt_secret
            .as_deref()
            .map(JwtSecret::from_hex)
            .transpose()
            .map_err(|e| RpcError::Auth(e.to_string()))?;

        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connection_timeout)
            .build()
            .map_err(|e| RpcError::Network(e.to_string()))?;

        Ok(Self {
            client,
            url,
            jwt,
            config,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn config(&self) -> &EngineClientConfig {
        &self.config
    }

    /// Issues one request and decodes its `result`
    pub async fn request<P, R>(&self, method: &str, params: P) -> Result<R, RpcError>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let request = JsonRpcRequest {
            jsonrpc: JSON_RPC_VERSION,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        debug!("JSON-RPC {} -> {} (id {})", method, self.url, request.id);

        let mut builder = self.client.post(self.url.clone()).json(&request);
        if let Some(token) = self.bearer_token()? {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                RpcError::Timeout(self.config.request_timeout)
            } else if e.is_connect() {
                RpcError::Connection(e.to_string())
            } else {
                RpcError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Http {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown error").to_string(),
            });
        }

        let rpc_response: JsonRpcResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                RpcError::Timeout(self.config.request_timeout)
            } else {
                RpcError::InvalidResponse(format!("Failed to parse JSON response: {e}"))
            }
        })?;

        if let Some(error) = rpc_response.error {
            debug!("JSON-RPC {} answered error {}: {}", method, error.code, error.message);
            return Err(RpcError::Rpc {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }

        let result = rpc_response.result.unwrap_or(Value::Null);
        trace!("JSON-RPC {} result: {}", method, result);
        serde_json::from_value(result)
            .map_err(|e| RpcError::InvalidResponse(format!("{method}: {e}")))
    }

    fn bearer_token(&self) -> Result<Option<String>, RpcError> {
        let Some(secret) = &self.jwt else {
            return Ok(None);
        };
        let claims = Claims {
            iat: chrono::Utc::now().timestamp().max(0) as u64,
            exp: None,
        };
        secret
            .encode(&claims)
            .map(Some)
            .map_err(|e| RpcError::Auth(e.to_string()))
    }
}
