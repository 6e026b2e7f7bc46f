use anyhow::Result;
use mpesa_client::{settings, webhook_server, MpesaClient};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // Load configuration from config.toml + environment
    let cfg = settings::Config::from_env();
    tracing::info!(
        environment = %cfg.mpesa.environment,
        callback_port = cfg.callback_port,
        "Starting M-Pesa callback listener"
    );

    // Warm the token cache so credential problems surface at start-up
    if cfg.mpesa.has_credentials() {
        let client = MpesaClient::from_settings(&cfg.mpesa)?;
        match client.get_access_token().await {
            Ok(_) => tracing::info!("M-Pesa credentials verified"),
            Err(e) => tracing::error!(kind = ?e.kind(), "M-Pesa token request failed: {}", e),
        }
        if let Err(e) = client.verify_certificate() {
            tracing::warn!("security credentials unavailable, payout and query operations will fail: {}", e);
        }
    } else {
        tracing::warn!("MPESA_CONSUMER_KEY / MPESA_CONSUMER_SECRET not set; skipping token check");
    }

    webhook_server::run_callback_server(cfg.callback_port).await
}
