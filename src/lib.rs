//! Storefront API: catalog-backed baskets, payment-gateway integration and
//! transactional order creation behind an axum HTTP surface.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use sea_orm::DatabaseConnection;
use serde_json::json;
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod migrator;
pub mod payments;
pub mod services;

use payments::PaymentGateway;
use services::{BasketService, OrderService};

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub gateway: Arc<dyn PaymentGateway>,
    pub baskets: Arc<BasketService>,
    pub orders: Arc<OrderService>,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let baskets = Arc::new(BasketService::new(db.clone()));
        let orders = Arc::new(OrderService::new(db.clone(), gateway.clone()));
        Self {
            db,
            config,
            gateway,
            baskets,
            orders,
        }
    }
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "database": "connected" })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "database": e.to_string() })),
        ),
    }
}

pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .nest("/basket", handlers::baskets::basket_routes())
        .nest("/orders", handlers::orders::orders_routes())
        .nest("/payments", handlers::payments::payment_routes())
}

/// The full application router, shared by `main` and the integration tests.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
