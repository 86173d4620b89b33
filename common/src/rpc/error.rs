use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::config::{INVALID_PARAMS_ERROR, UNSUPPORTED_FORK_ERROR};

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Request timeout after {0:?}")]
    Timeout(Duration),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP error {status}: {reason}")]
    Http { status: u16, reason: String },
    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Failed to sign JWT: {0}")]
    Auth(String),
}

impl RpcError {
    /// JSON-RPC error code, when the client answered with one
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_invalid_params(&self) -> bool {
        self.code() == Some(INVALID_PARAMS_ERROR)
    }

    pub fn is_unsupported_fork(&self) -> bool {
        self.code() == Some(UNSUPPORTED_FORK_ERROR)
    }

    /// The request never got a JSON-RPC answer
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connection(_) | Self::Network(_) | Self::Http { .. }
        )
    }

    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
            data: None,
        }
    }
}
