use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use roswatch::device::{ApiConnector, DeviceConnector};
use roswatch::{AppState, Config, SessionManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("loading configuration")?;
    let addr = config.bind_addr();

    let connector: Arc<dyn DeviceConnector> = Arc::new(ApiConnector::from_config(&config));
    let manager = Arc::new(SessionManager::new(Arc::clone(&connector)));

    let state = AppState {
        manager,
        connector,
        config: Arc::new(config),
    };

    roswatch::server::serve(state, addr)
        .await
        .context("running server")
}
