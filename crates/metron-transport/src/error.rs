/// Errors that can occur while delivering a payload to the collector.
///
/// # Examples
///
/// ```rust
/// use metron_transport::error::TransportError;
///
/// let err = TransportError::Status { status: 400, body: "bad batch".to_string() };
/// assert!(err.to_string().contains("400"));
/// assert!(!err.is_transient());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The collector answered with a status code of 400 or above.
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    /// An underlying HTTP transport error from `reqwest`.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization failure.
    #[error("marshaling payload failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// Gzip compression or decompression failure.
    #[error("gzip error: {0}")]
    Compress(#[source] std::io::Error),

    /// Signing, key loading, or hybrid encryption failure.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Invalid client construction parameters.
    #[error("configuration error: {0}")]
    Config(String),

    /// The caller's cancellation token fired before the call could finish.
    #[error("operation cancelled")]
    Cancelled,
}

impl TransportError {
    /// Whether a retry has a chance of succeeding.
    ///
    /// Only network-level failures qualify: refused connections, timeouts, or
    /// anything whose message mentions the network. Status, encoding and
    /// crypto failures are deterministic.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Network(e) => {
                e.is_connect() || e.is_timeout() || is_network_message(&error_chain(e))
            }
            _ => false,
        }
    }
}

impl From<crate::retry::Cancelled> for TransportError {
    fn from(_: crate::retry::Cancelled) -> Self {
        TransportError::Cancelled
    }
}

/// Substring classification of a transient failure message.
pub fn is_network_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("connection refused")
        || message.contains("timeout")
        || message.contains("timed out")
        || message.contains("network")
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text
}

/// Convenience type alias so callers can write `error::Result<T>`.
pub type Result<T> = std::result::Result<T, TransportError>;
