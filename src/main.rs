use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use reweave::api::server::start_server;
use reweave::config;
use reweave::core_state::CoreState;
use reweave::sweep::start_sweeper;

fn main() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    std::fs::create_dir_all(config::app_data_dir())
        .map_err(|e| format!("Cannot create data directory: {e}"))?;

    // Built outside the runtime: the LLM client is a blocking reqwest
    // client and workers run on their own threads.
    let state = Arc::new(CoreState::new());

    // Open once at startup so migrations run before any worker does.
    state
        .open_db()
        .map_err(|e| format!("Database initialisation failed: {e}"))?;

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Runtime startup failed: {e}"))?;

    runtime.block_on(async move {
        start_sweeper(state.clone());

        let mut server = start_server(state, config::bind_addr()).await?;
        tracing::info!(addr = %server.addr, "Ready");

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| format!("Signal handler failed: {e}"))?;
        tracing::info!("Shutting down");
        server.shutdown();
        Ok(())
    })
}
