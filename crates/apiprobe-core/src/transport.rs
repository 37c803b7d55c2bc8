//! Transport seam.
//!
//! The harness depends only on `send(input) -> status + body bytes | error`.
//! Concrete clients live in [`crate::http`] and, for tests, [`crate::fakes`].

use async_trait::async_trait;

/// Raw response from the service under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status_code: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status_code: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status_code,
            body: body.into(),
        }
    }

    /// 200 response with a JSON body.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::new(200, value.to_string())
    }
}

/// Failure to obtain a response at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("transport failure: {0}")]
    Other(String),
}

pub type TransportResult = std::result::Result<TransportResponse, TransportError>;

/// Injected request capability, shared across executor lanes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue one request for `input` and return the raw response.
    async fn send(&self, input: &str) -> TransportResult;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(&self, input: &str) -> TransportResult {
        (**self).send(input).await
    }
}
