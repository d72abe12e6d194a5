use crate::api::{create_api_router, AppState};
use crate::config::Config;
use crate::llm::{CompletionProvider, OpenAiProvider};
use crate::monitoring::{HealthChecker, RateLimitMetrics};
use crate::security::{AuthManager, RateLimitManager};
use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

/// Wire the shared services together from configuration
pub async fn build_app_state(config: &Config) -> Result<AppState> {
    let metrics = if config.operational.enable_metrics {
        Some(Arc::new(RateLimitMetrics::new()?))
    } else {
        None
    };

    let mut rate_limiter = RateLimitManager::connect(config.security.rate_limiting.clone())
        .await
        .context("Failed to initialize rate limiter")?;
    if let Some(metrics) = &metrics {
        rate_limiter = rate_limiter.with_metrics(metrics.clone());
    }
    let rate_limiter = Arc::new(rate_limiter);

    let auth = Arc::new(AuthManager::new(config.security.auth.clone())?);
    let health = Arc::new(HealthChecker::new(
        rate_limiter.clone(),
        config.environment.clone(),
    ));

    let llm = OpenAiProvider::from_config(&config.llm)?
        .map(|provider| Arc::new(provider) as Arc<dyn CompletionProvider>);
    if llm.is_none() {
        warn!("LLM_API_KEY not set, AI generation endpoint will return 503");
    }

    if config.security.rate_limiting.development_mode {
        warn!("Development mode: only upload rate limits are enforced");
    }
    if !config.security.rate_limiting.enabled {
        warn!("Rate limiting is disabled");
    }

    Ok(AppState {
        rate_limiter,
        auth,
        health,
        metrics,
        llm,
        request_timeout: Duration::from_secs(config.operational.request_timeout_seconds),
    })
}

/// Serve the API until a shutdown signal arrives
pub async fn run(config: Config) -> Result<()> {
    config.validate()?;

    let state = build_app_state(&config).await?;

    let addr = format!("{}:{}", config.host, config.http_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("MedBuilder API listening on {}", addr);

    let drain = Duration::from_secs(config.operational.shutdown_drain_seconds);
    serve_until(listener, state, drain, wait_for_shutdown()).await?;

    info!("Graceful shutdown completed");
    Ok(())
}

/// Serve on `listener` until `signal` resolves. Readiness reports 503 for
/// `drain` before the listener stops accepting connections.
pub async fn serve_until<F>(
    listener: TcpListener,
    state: AppState,
    drain: Duration,
    signal: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let health = state.health.clone();
    let app = create_api_router(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        signal.await;
        health.set_shutting_down(true);
        if !drain.is_zero() {
            info!("Draining for {}s before closing the listener", drain.as_secs_f32());
            tokio::time::sleep(drain).await;
        }
    })
    .await
    .context("HTTP server error")
}

/// Wait for shutdown signals
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install terminate signal handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_readiness_fails_while_draining() {
        let state = build_app_state(&Config::default()).await.unwrap();
        let health = state.health.clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/ready", listener.local_addr().unwrap());

        let (stop, stopped) = oneshot::channel::<()>();
        let server = tokio::spawn(serve_until(
            listener,
            state,
            Duration::from_millis(500),
            async move {
                stopped.await.ok();
            },
        ));

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .unwrap();
        let response = client.get(&url).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        stop.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(health.is_shutting_down());

        // still accepting, but no longer ready
        let response = client.get(&url).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        server.await.unwrap().unwrap();
    }
}
