use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use geniebridge_core::config::AppConfig;
use serde::Serialize;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    config: Arc<AppConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub downstream: HealthCheck,
    pub checked_at: String,
}

pub fn router(config: Arc<AppConfig>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { config })
}

pub async fn spawn(bind_address: &str, port: u16, config: Arc<AppConfig>) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(config)).await {
            error!(
                event_name = "system.health.error",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let downstream = downstream_check(&state.config);
    let ready = downstream.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "geniebridge-server runtime initialized".to_string(),
        },
        downstream,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn downstream_check(config: &AppConfig) -> HealthCheck {
    match config.validate() {
        Ok(()) => HealthCheck {
            status: "ready",
            detail: format!(
                "workspace `{}` space `{}` configured",
                config.genie.workspace_url, config.genie.space_id
            ),
        },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("configuration invalid: {error}") }
        }
    }
}
