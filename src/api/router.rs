//! API router — REST status surface plus the two WebSocket paths.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::config;
use crate::core_state::CoreState;

use super::audit_ws;
use super::error::ApiError;
use super::types::job_status_json;
use super::websocket;

pub fn api_router(state: Arc<CoreState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/jobs/{id}", get(job_status))
        .route("/ws/cc-stream", get(websocket::cc_stream_upgrade))
        .route("/ws/audit", get(audit_ws::audit_upgrade))
        .with_state(state)
}

async fn health(State(state): State<Arc<CoreState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": config::APP_VERSION,
        "activeJobs": state.registry.running_count(),
    }))
}

async fn job_status(
    State(state): State<Arc<CoreState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conn = state.open_db().map_err(|e| ApiError::Internal(e.to_string()))?;
    let snapshot = job_status_json(&conn, &id)?;
    Ok(Json(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::config::PacingConfig;
    use crate::llm::ScriptedClient;
    use crate::pipeline::controller::{create_job, NewJobParams};

    fn test_state() -> Arc<CoreState> {
        Arc::new(CoreState::with_parts(
            std::env::temp_dir().join(format!("reweave-router-test-{}.db", uuid::Uuid::new_v4())),
            Arc::new(ScriptedClient::always("x")),
            PacingConfig::disabled(),
        ))
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let state = test_state();
        let app = api_router(state.clone());

        let response = app
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["activeJobs"], 0);
        let _ = std::fs::remove_file(&state.db_path);
    }

    #[tokio::test]
    async fn unknown_job_returns_404() {
        let state = test_state();
        let app = api_router(state.clone());

        let response = app
            .oneshot(Request::get("/api/jobs/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let _ = std::fs::remove_file(&state.db_path);
    }

    #[tokio::test]
    async fn seeded_job_status_is_served() {
        let state = test_state();
        let conn = state.open_db().unwrap();
        let text = (0..600).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let job = create_job(
            &conn,
            &NewJobParams {
                text,
                ..Default::default()
            },
        )
        .unwrap();
        drop(conn);

        let app = api_router(state.clone());
        let response = app
            .oneshot(
                Request::get(format!("/api/jobs/{}", job.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), 16_384).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["totalChunks"], 1);
        let _ = std::fs::remove_file(&state.db_path);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let state = test_state();
        let app = api_router(state.clone());
        let response = app
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let _ = std::fs::remove_file(&state.db_path);
    }
}
