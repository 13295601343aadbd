use std::sync::Arc;
use std::time::Duration;

use geniebridge_core::config::{AppConfig, ConfigError, LoadOptions};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: Arc<AppConfig>,
    pub http_client: reqwest::Client,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("outbound http client construction failed: {0}")]
    HttpClient(#[source] reqwest::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    // One shared outbound client; per-request transports borrow its pool.
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.genie.request_timeout_secs))
        .build()
        .map_err(BootstrapError::HttpClient)?;

    info!(
        event_name = "system.bootstrap.ready",
        workspace_url = %config.genie.workspace_url,
        space_id = %config.genie.space_id,
        "application bootstrap complete"
    );

    Ok(Application { config: Arc::new(config), http_client })
}
