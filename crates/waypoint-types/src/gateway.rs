//! AI model gateway contract types.
//!
//! The gateway itself is an external collaborator; these types describe the
//! request/response shapes and the failure classification that node handlers
//! pass through unchanged into node results.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub text: String,
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

/// Incremental events from a streaming completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayChunk {
    TextDelta { text: String },
    Finished {
        model: String,
        tokens_in: u64,
        tokens_out: u64,
    },
}

/// Gateway failures, classified by the gateway as retryable or fatal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("gateway overloaded: {0}")]
    Overloaded(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("gateway timed out")]
    Timeout,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("content policy violation: {0}")]
    ContentPolicy(String),

    #[error("authentication failed")]
    Authentication,
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Overloaded(_) | Self::Network(_) | Self::Timeout
        )
    }
}
