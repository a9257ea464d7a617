mod config;
mod error;
mod routes_models;
mod routes_tts;
mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Json, Router,
};
use supervisor::ModelRegistry;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::state::{AppState, SharedState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = AppConfig::from_env()?;
    info!(
        venv = %cfg.venv_path.display(),
        base_port = cfg.base_port,
        models = cfg.catalog.len(),
        "tts controller starting"
    );

    let registry = ModelRegistry::new(cfg.catalog.clone(), cfg.backend_env())
        .with_base_port(cfg.base_port);
    let app_state = Arc::new(AppState::new(registry));

    let app = build_router(app_state.clone());

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.bind_addr))?;
    info!("tts controller listening on http://{}", cfg.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if !app_state.registry.shutdown().await {
        warn!("active model did not stop cleanly");
    }
    Ok(())
}

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/models", get(routes_models::get_models))
        .route("/api/models/active", get(routes_models::get_active))
        .route("/api/models/:id/load", post(routes_models::post_load_model))
        .route("/api/models/:id/unload", post(routes_models::post_unload_model))
        .route("/api/synthesize", post(routes_tts::post_synthesize))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use supervisor::{BackendEnv, ModelDescriptor};

    fn registry(program: &str, args: &[&str]) -> ModelRegistry {
        let env = BackendEnv {
            reclaim_port: false,
            ..BackendEnv::default()
        }
        .with_program(program, args.iter().map(|a| a.to_string()).collect());
        let mut timings = supervisor::Timings::default();
        timings.health_poll_attempts = 1;
        ModelRegistry::new(
            vec![ModelDescriptor::new("m1", "Model One", "tts_models/en/m1")],
            env,
        )
        .with_timings(timings)
    }

    async fn serve_registry(registry: ModelRegistry) -> String {
        let app = build_router(Arc::new(AppState::new(registry)));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn serve(program: &str) -> String {
        serve_registry(registry(program, &[])).await
    }

    /// Backend index that answers 503 until `ready_after` has passed.
    async fn slow_backend(ready_after: Duration) -> u16 {
        let started = Instant::now();
        let app = Router::new().route(
            "/",
            get(move || async move {
                if started.elapsed() < ready_after {
                    axum::http::StatusCode::SERVICE_UNAVAILABLE
                } else {
                    axum::http::StatusCode::OK
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    async fn active(base: &str) -> serde_json::Value {
        let body: serde_json::Value = reqwest::get(format!("{base}/api/models/active"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        body["active"].clone()
    }

    #[tokio::test]
    async fn test_load_completes_after_client_disconnects() {
        let port = slow_backend(Duration::from_millis(800)).await;
        let mut timings = supervisor::Timings::default();
        timings.health_poll_interval = Duration::from_millis(50);
        timings.health_poll_attempts = 100;
        timings.stop_grace = Duration::from_millis(500);
        let base = serve_registry(
            registry("sleep", &["30"])
                .with_base_port(port)
                .with_timings(timings),
        )
        .await;

        let client = reqwest::Client::new();
        let res = client
            .post(format!("{base}/api/models/m1/load"))
            .timeout(Duration::from_millis(200))
            .send()
            .await;
        assert!(res.is_err());

        let mut loaded = false;
        for _ in 0..100 {
            if active(&base).await == "m1" {
                loaded = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(loaded, "load did not finish after the client went away");

        let models: serde_json::Value = reqwest::get(format!("{base}/api/models"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(models["models"]["m1"]["loaded"], true);
        assert_eq!(models["models"]["m1"]["port"], port);

        let resp = client
            .post(format!("{base}/api/models/m1/unload"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert!(active(&base).await.is_null());
    }

    #[tokio::test]
    async fn test_list_models() {
        let base = serve("/nonexistent/tts-server").await;
        let body: serde_json::Value = reqwest::get(format!("{base}/api/models"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["models"]["m1"]["name"], "Model One");
        assert_eq!(body["models"]["m1"]["loaded"], false);
        assert!(body["models"]["m1"].get("port").is_none());
        assert!(body["active"].is_null());
    }

    #[tokio::test]
    async fn test_unknown_model_is_404() {
        let base = serve("/nonexistent/tts-server").await;
        let client = reqwest::Client::new();
        for action in ["load", "unload"] {
            let resp = client
                .post(format!("{base}/api/models/nope/{action}"))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 404);
            let body: serde_json::Value = resp.json().await.unwrap();
            assert_eq!(body["error"], "Unknown model: nope");
        }
    }

    #[tokio::test]
    async fn test_load_failure_is_500() {
        let base = serve("/nonexistent/tts-server").await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/api/models/m1/load"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 500);
        assert!(active(&base).await.is_null());
    }

    #[tokio::test]
    async fn test_unload_not_loaded_succeeds() {
        let base = serve("/nonexistent/tts-server").await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/api/models/m1/unload"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "success");
        assert_eq!(body["message"], "Model m1 unloaded");
    }

    #[tokio::test]
    async fn test_synthesize_without_model_is_404() {
        let base = serve("/nonexistent/tts-server").await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/api/synthesize?text=hello"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);

        let resp = client
            .post(format!("{base}/api/synthesize?text=hello&model_id=m1"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "Model m1 is not loaded");
    }
}
