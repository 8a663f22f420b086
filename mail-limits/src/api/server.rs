//! API Server - HTTP front for the limits core

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::handlers::{self, AppState};

/// API Server configuration
pub struct ApiServer {
    state: Arc<AppState>,
    addr: String,
}

impl ApiServer {
    pub fn new(state: AppState, addr: String) -> Self {
        Self {
            state: Arc::new(state),
            addr,
        }
    }

    /// Build the router with all routes
    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Start the API server
    pub async fn run(&self) -> std::io::Result<()> {
        let router = self.router();

        info!("Starting limits API on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let account_routes = Router::new()
        .route("/accounts", post(handlers::create_account))
        .route("/accounts/:id", axum::routing::delete(handlers::delete_account))
        .route("/accounts/:id/role", put(handlers::change_role))
        .route("/accounts/:id/limits", get(handlers::get_limits))
        .route("/accounts/:id/limits/:kind", get(handlers::get_limit))
        .route("/accounts/:id/evaluate/:kind", get(handlers::evaluate_create))
        .route("/accounts/:id/roles", get(handlers::assignable_roles))
        .route("/accounts/:id/allocations", put(handlers::allocate))
        .route("/accounts/:id/reclaim", post(handlers::reclaim));

    let domain_routes = Router::new()
        .route("/domains", post(handlers::create_domain))
        .route("/domains/:id", axum::routing::delete(handlers::delete_domain))
        .route("/domains/:id/resources", post(handlers::create_resource))
        .route("/resources/:id", axum::routing::delete(handlers::delete_resource));

    let routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/batches", post(handlers::apply_batch))
        .route("/audit", get(handlers::audit))
        .merge(account_routes)
        .merge(domain_routes);

    Router::new()
        .nest("/api", routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
