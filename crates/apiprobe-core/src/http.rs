//! reqwest-backed transport for the live service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tracing::debug;

use crate::transport::{Transport, TransportError, TransportResponse, TransportResult};

/// Default public endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.nationalize.io/";

/// Issues `GET {base_url}?name=<input>` with the input form-encoded.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: Url,
    client: reqwest::Client,
    timeout_ms: u64,
}

impl HttpTransport {
    /// Build a transport for `base_url`.
    ///
    /// `timeout_ms` is a client-side backstop; the executor enforces the
    /// per-attempt limit independently.
    pub fn new(base_url: &str, timeout_ms: u64) -> Result<Self, TransportError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| TransportError::Other(format!("invalid base url '{base_url}': {e}")))?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("apiprobe/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| TransportError::Other(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            client,
            timeout_ms,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Full request URL for `input`.
    pub fn request_url(&self, input: &str) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut().append_pair("name", input);
        url
    }

    fn classify(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout_ms)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_body() || err.is_decode() {
            TransportError::Malformed(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, input: &str) -> TransportResult {
        let url = self.request_url(input);
        debug!(url = %url, "sending request");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        let status_code = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        Ok(TransportResponse {
            status_code,
            body: body.to_vec(),
        })
    }
}
