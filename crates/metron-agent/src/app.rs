use crate::collector::MetricsCollector;
use crate::config::AgentConfig;
use crate::reporter::MetricsReporter;
use crate::sender::{self, MetricsService};
use anyhow::{Context, Result};
use metron_collector::{HostProvider, MetricsProvider, RuntimeProvider};
use metron_transport::crypto::HybridEncryptor;
use metron_transport::signer::Signer;
use metron_transport::{ClientConfig, HttpClient, MetricsClient};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Owns the root cancellation token and the two periodic loops.
pub struct App {
    cancel: CancellationToken,
    collector: Arc<MetricsCollector>,
    reporter: Arc<MetricsReporter>,
}

impl App {
    /// Wires the default providers and an HTTP client built from `config`.
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let client = MetricsClient::new(&config.server_address, client_config(config))
            .context("failed to build HTTP client")?;
        tracing::info!(server = client.base_url(), "HTTP client ready");

        Ok(Self::with_parts(config, default_providers(), Arc::new(client)))
    }

    pub fn with_parts(
        config: &AgentConfig,
        providers: Vec<Arc<dyn MetricsProvider>>,
        client: Arc<dyn HttpClient>,
    ) -> Self {
        let cancel = CancellationToken::new();

        let collector = Arc::new(MetricsCollector::new(
            providers,
            config.poll_interval(),
            cancel.child_token(),
        ));

        let service = Arc::new(
            MetricsService::new(client).with_excluded(config.exclude_metrics.iter().cloned()),
        );
        let sender = sender::from_rate_limit(service, config.rate_limit, cancel.child_token());

        let reporter = Arc::new(MetricsReporter::new(
            collector.clone(),
            sender,
            config.report_interval(),
            cancel.child_token(),
        ));

        Self {
            cancel,
            collector,
            reporter,
        }
    }

    pub fn start(&self) {
        self.collector.start();
        self.reporter.start();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancels everything, then stops the poll loop, the report loop and
    /// finally the sender, in that order.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down");
        self.cancel.cancel();
        self.collector.stop().await;
        self.reporter.stop().await;
        tracing::info!("Shutdown complete");
    }
}

fn default_providers() -> Vec<Arc<dyn MetricsProvider>> {
    let mut providers: Vec<Arc<dyn MetricsProvider>> = Vec::new();
    match RuntimeProvider::new() {
        Ok(runtime) => providers.push(Arc::new(runtime)),
        Err(e) => tracing::warn!(error = %e, "Runtime metrics disabled"),
    }
    providers.push(Arc::new(HostProvider::new()));
    providers
}

/// Translates the agent config into client settings. A bad signing key or
/// public key disables that feature with a warning instead of failing.
pub fn client_config(config: &AgentConfig) -> ClientConfig {
    let signer = config.signing_key().and_then(|key| match Signer::new(key) {
        Ok(signer) => {
            tracing::info!("Request signing enabled");
            Some(signer)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Request signing disabled");
            None
        }
    });

    let encryptor = config
        .crypto_key
        .as_deref()
        .and_then(|path| match HybridEncryptor::from_pem_file(path) {
            Ok(encryptor) => {
                tracing::info!(key = %path.display(), "Payload encryption enabled");
                Some(encryptor)
            }
            Err(e) => {
                tracing::warn!(key = %path.display(), error = %e, "Payload encryption disabled");
                None
            }
        });

    ClientConfig {
        rate_limit: config.rate_limit,
        max_retries: config.max_retries,
        retry_delays: config.retry_delays(),
        timeout: config.request_timeout(),
        compression: config.compression,
        signer,
        encryptor,
        ..Default::default()
    }
}
