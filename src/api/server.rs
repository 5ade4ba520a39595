//! API server lifecycle — bind, spawn, graceful shutdown.
//!
//! Plain HTTP behind the operator's reverse proxy; the server binds,
//! spawns onto the runtime, and exposes a oneshot-based shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::core_state::CoreState;

use super::router::api_router;

/// Handle to a running API server.
pub struct ApiServer {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ApiServer {
    /// Shut down gracefully. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
            tracing::info!("API server shutdown signal sent");
        }
    }
}

/// Bind and start the API server. Returns once the listener is bound,
/// with the actual address (useful with port 0).
pub async fn start_server(state: Arc<CoreState>, addr: SocketAddr) -> Result<ApiServer, String> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind API server: {e}"))?;
    let actual_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to read bound address: {e}"))?;

    let app = api_router(state);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let shutdown_signal = async move {
            let _ = shutdown_rx.await;
        };

        tracing::info!(%actual_addr, "API server starting");
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
        {
            tracing::error!("API server error: {e}");
        }
        tracing::info!("API server stopped");
    });

    Ok(ApiServer {
        addr: actual_addr,
        shutdown: Some(shutdown_tx),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PacingConfig;
    use crate::llm::ScriptedClient;

    fn test_state() -> Arc<CoreState> {
        Arc::new(CoreState::with_parts(
            std::env::temp_dir().join(format!("reweave-server-test-{}.db", uuid::Uuid::new_v4())),
            Arc::new(ScriptedClient::always("x")),
            PacingConfig::disabled(),
        ))
    }

    #[tokio::test]
    async fn start_and_stop_server() {
        let state = test_state();
        let mut server = start_server(state.clone(), "127.0.0.1:0".parse().unwrap())
            .await
            .expect("server should start");

        assert!(server.addr.port() > 0);

        let url = format!("http://{}/api/health", server.addr);
        let resp = reqwest::get(&url).await.unwrap();
        assert!(resp.status().is_success());

        server.shutdown();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let _ = std::fs::remove_file(&state.db_path);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let state = test_state();
        let mut server = start_server(state.clone(), "127.0.0.1:0".parse().unwrap())
            .await
            .expect("server should start");

        server.shutdown();
        server.shutdown();
        let _ = std::fs::remove_file(&state.db_path);
    }

    #[tokio::test]
    async fn unknown_route_is_404_over_http() {
        let state = test_state();
        let mut server = start_server(state.clone(), "127.0.0.1:0".parse().unwrap())
            .await
            .expect("server should start");

        let url = format!("http://{}/nonexistent", server.addr);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

        server.shutdown();
        let _ = std::fs::remove_file(&state.db_path);
    }
}
