use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use shared::agent_api::ProxyRequest;
use shared::AppError;
use std::sync::LazyLock;
use std::time::Duration;

/// Endpoint used when neither settings nor the environment name one.
pub const DEFAULT_PROXY_URL: &str = "https://ai-proxy.ai-n.workers.dev/api/generate";

/// How much of an error body is kept in the error message.
const ERROR_DETAIL_CHARS: usize = 800;

// No overall request timeout: responses stream for as long as the model
// writes. Idle detection lives in the orchestrator.
static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(2)
        .build()
        .expect("failed to build HTTP client")
});

/// Raw response body as it arrives.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, AppError>>;

/// Opens one streaming generation.
///
/// Contract: failures before the body starts (connection, non-success
/// status) are returned as `Err`; failures while reading surface as `Err`
/// items inside the stream.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, request: &ProxyRequest) -> Result<ByteStream, AppError>;
}

// ── Client ───────────────────────────────────────────────────────────

pub struct ProxyClient {
    http: Client,
    endpoint: String,
}

impl ProxyClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            http: SHARED_HTTP.clone(),
            endpoint: endpoint.trim().to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Default for ProxyClient {
    fn default() -> Self {
        Self::new(DEFAULT_PROXY_URL)
    }
}

#[async_trait]
impl Transport for ProxyClient {
    async fn open(&self, request: &ProxyRequest) -> Result<ByteStream, AppError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let detail: String = body.chars().take(ERROR_DETAIL_CHARS).collect();
            if detail.trim().is_empty() {
                return Err(AppError::transport(format!("Proxy Error: {}", status)));
            }
            return Err(AppError::transport(format!(
                "Proxy Error: {}\n{}",
                status, detail
            )));
        }

        tracing::debug!("stream opened against {}", self.endpoint);

        Ok(resp
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| AppError::transport(format!("stream read error: {}", e)))
            })
            .boxed())
    }
}
