use anyhow::Result;
use metron_agent::config::DEFAULT_CONFIG_PATH;
use metron_agent::{AgentConfig, App};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = AgentConfig::load(&config_path)?;

    let level = config.log_level.as_deref().unwrap_or("info");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(format!("metron={level}").parse()?))
        .init();

    tracing::info!(
        config = %config_path,
        server = %config.server_address,
        poll_interval_secs = config.poll_interval_secs,
        report_interval_secs = config.report_interval_secs,
        rate_limit = config.rate_limit,
        "metron-agent starting"
    );

    let app = App::new(&config)?;
    app.start();

    shutdown_signal().await?;
    app.shutdown().await;
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("Received Ctrl+C signal");
            }
            _ = terminate.recv() => {
                tracing::info!("Received terminate signal");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C signal");
    }

    Ok(())
}
