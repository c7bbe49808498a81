use crate::compress::{Compressor, DEFAULT_LEVEL, DEFAULT_MIN_SIZE};
use crate::crypto::HybridEncryptor;
use crate::error::{Result, TransportError};
use crate::request::RequestProcessor;
use crate::response;
use crate::retry::{self, RetryConfig};
use crate::signer::{Signer, SIGNATURE_HEADER};
use async_trait::async_trait;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Transport seam used by the senders.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends `body` as JSON to `endpoint` and returns the decoded response
    /// body.
    async fn post(&self, cancel: &CancellationToken, endpoint: &str, body: &Value) -> Result<Vec<u8>>;

    async fn get(&self, cancel: &CancellationToken, endpoint: &str) -> Result<Vec<u8>>;
}

/// Construction parameters for [`MetricsClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Concurrent request cap; `0` disables admission control.
    pub rate_limit: usize,
    pub max_retries: usize,
    /// `None` uses [`retry::DEFAULT_DELAYS`].
    pub retry_delays: Option<Vec<Duration>>,
    pub timeout: Duration,
    pub compression: bool,
    pub compression_level: u32,
    pub min_compress_size: usize,
    pub signer: Option<Signer>,
    pub encryptor: Option<HybridEncryptor>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rate_limit: 0,
            max_retries: 3,
            retry_delays: None,
            timeout: Duration::from_secs(20),
            compression: true,
            compression_level: DEFAULT_LEVEL,
            min_compress_size: DEFAULT_MIN_SIZE,
            signer: None,
            encryptor: None,
        }
    }
}

/// HTTP client for the collector with retry, optional admission control,
/// and the sign/compress/encrypt request pipeline.
pub struct MetricsClient {
    base_url: String,
    http: reqwest::Client,
    headers: HashMap<String, String>,
    processor: RequestProcessor,
    semaphore: Option<Semaphore>,
    retry: RetryConfig<TransportError>,
}

impl MetricsClient {
    pub fn new(base_url: &str, config: ClientConfig) -> Result<Self> {
        if config.rate_limit > Semaphore::MAX_PERMITS {
            return Err(TransportError::Config(format!(
                "rate limit {} exceeds the maximum of {}",
                config.rate_limit,
                Semaphore::MAX_PERMITS
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        let compressor = if config.compression {
            Some(Compressor::new(config.compression_level, config.min_compress_size)?)
        } else {
            None
        };

        let semaphore = if config.rate_limit > 0 {
            tracing::info!(rate_limit = config.rate_limit, "Client semaphore initialized");
            Some(Semaphore::new(config.rate_limit))
        } else {
            tracing::info!("Client rate limiting disabled");
            None
        };

        let processor = RequestProcessor::new(config.signer, compressor, config.encryptor);
        tracing::debug!(
            signing = processor.is_signing(),
            encryption = processor.is_encrypting(),
            compression = config.compression,
            "Request pipeline configured"
        );

        Ok(Self {
            base_url: normalize_url(base_url),
            http,
            headers: HashMap::new(),
            processor,
            semaphore,
            retry: RetryConfig::new(config.max_retries, config.retry_delays, TransportError::is_transient),
        })
    }

    /// Adds a header sent with every request.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Vec<u8>> {
        let _permit = match &self.semaphore {
            Some(semaphore) => Some(tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                permit = semaphore.acquire() => permit
                    .map_err(|_| TransportError::Config("client semaphore closed".to_string()))?,
            }),
            None => None,
        };

        retry::run(cancel, &self.retry, || self.do_request(method.clone(), endpoint, body)).await
    }

    async fn do_request(&self, method: Method, endpoint: &str, body: Option<&Value>) -> Result<Vec<u8>> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut request = self.http.request(method, &url);

        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        request = request
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT_ENCODING, "gzip");

        if let Some(body) = body {
            let prepared = self.processor.process(body)?;
            if prepared.compressed {
                request = request.header(CONTENT_ENCODING, "gzip");
            }
            if let Some(signature) = prepared.signature {
                request = request.header(SIGNATURE_HEADER, signature);
            }
            request = request.body(prepared.payload);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response::read_body(response).await?;

        if status.as_u16() >= 400 {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        tracing::debug!(url = %url, status = status.as_u16(), bytes = body.len(), "Request completed");
        Ok(body)
    }
}

#[async_trait]
impl HttpClient for MetricsClient {
    async fn post(&self, cancel: &CancellationToken, endpoint: &str, body: &Value) -> Result<Vec<u8>> {
        self.execute(cancel, Method::POST, endpoint, Some(body)).await
    }

    async fn get(&self, cancel: &CancellationToken, endpoint: &str) -> Result<Vec<u8>> {
        self.execute(cancel, Method::GET, endpoint, None).await
    }
}

/// Turns `:8080` or `host:port` into a full base URL without a trailing
/// slash.
///
/// # Examples
///
/// ```
/// use metron_transport::client::normalize_url;
///
/// assert_eq!(normalize_url(":8080"), "http://localhost:8080");
/// assert_eq!(normalize_url("example.com/"), "http://example.com");
/// assert_eq!(normalize_url("https://a.b"), "https://a.b");
/// ```
pub fn normalize_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.starts_with(':') {
        url = format!("localhost{url}");
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        url = format!("http://{url}");
    }
    url.trim_end_matches('/').to_string()
}
