use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tokio::signal;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use storefront_api::{
    config::{init_tracing, load_config},
    db,
    payments::stripe::StripeGateway,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;
    init_tracing(config.log_level(), config.log_json);

    info!(
        environment = %config.environment,
        "Starting storefront API"
    );

    let db = Arc::new(
        db::establish_connection_from_app_config(&config)
            .await
            .context("database connection failed")?,
    );

    if config.auto_migrate {
        db::run_migrations(&db).await?;
    }

    let gateway = Arc::new(StripeGateway::new(
        config.stripe_secret_key.clone(),
        config.gateway_timeout(),
    )?);

    if config.payment_webhook_secret.is_none() {
        warn!("payment webhook secret not configured; the webhook endpoint will reject all events");
    }

    let cors = cors_layer(&config)?;
    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(db, config, gateway);

    let app = storefront_api::app_router(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server shut down");
    Ok(())
}

fn cors_layer(config: &storefront_api::config::AppConfig) -> anyhow::Result<CorsLayer> {
    let layer = match config.cors_allowed_origins.as_deref() {
        Some(origins) => {
            let parsed = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(|o| {
                    HeaderValue::from_str(o)
                        .with_context(|| format!("invalid CORS origin '{}'", o))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(parsed))
                .allow_methods([Method::GET, Method::POST, Method::DELETE])
                .allow_headers(Any)
        }
        None if config.is_development() => CorsLayer::permissive(),
        None => {
            warn!("no CORS origins configured; cross-origin requests will be refused");
            CorsLayer::new()
        }
    };
    Ok(layer)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => warn!("failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
