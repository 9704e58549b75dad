//! # permaupload: upload endpoint for permanent decentralized storage
//!
//! `permaupload` accepts a payload from a browser (an inline JSON document or a multipart file)
//! and forwards it to a bundling service that stores it on Arweave, returning the content
//! identifier, where it has been cached and the price that was quoted for it.
//!
//! ## Request flow
//!
//! Every `POST /api/upload` runs the same strictly sequential steps:
//!
//! 1. extract the payload bytes ([`payload::UploadRequest::prepare`]) and fix their length
//! 2. ask the provider for a price quote for exactly that length
//! 3. hand the provider a re-readable stream ([`payload::StreamFactory`]) of that length, with
//!    `Content-Type` and `File-Name` tags for files
//! 4. combine the provider's receipt with the quote from step 2
//!
//! Nothing is retried and nothing is persisted between requests. Errors at any step become
//! `{success: false, error}` (see [`errors::Error`]).
//!
//! ## Storage providers
//!
//! The endpoint talks to storage through the [`storage_providers::StorageProvider`] trait:
//!
//! - **Turbo** ([`storage_providers::turbo`]): quotes from the Turbo payment service and posts
//!   ANS-104 data items ([`data_item`]) signed with the process-wide [`wallet::Wallet`]
//! - **Dummy** ([`storage_providers::dummy`]): in-memory store for local development
//!
//! The wallet is resolved once at startup; a missing or malformed credential stops the process
//! before it binds its port.
//!
//! ## Clients
//!
//! The server embeds a single-page browser client at `/` ([`static_assets`]). The same upload
//! lifecycle is available to Rust programs through [`client::UploadClient`].
//!
//! ## Configuration
//!
//! See [`config`] for the YAML/environment configuration and [`telemetry`] for logging and
//! tracing setup.

pub mod api;
pub mod client;
pub mod config;
pub mod data_item;
pub mod errors;
mod openapi;
pub mod payload;
mod static_assets;
pub mod storage_providers;
pub mod telemetry;
pub mod wallet;

#[cfg(test)]
pub mod test_utils;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, info, instrument};
use utoipa::OpenApi as _;
use utoipa_scalar::{Scalar, Servable as _};

pub use config::Config;

use crate::openapi::ApiDoc;
use crate::storage_providers::{StorageProvider, create_provider};

/// Shared state for request handlers.
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .provider(provider)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    /// Storage backend, holding the signing wallet for the process lifetime
    pub provider: Arc<dyn StorageProvider>,
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let allow_origin = if config.cors.allowed_origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &config.cors.allowed_origins {
            origins.push(origin.parse::<HeaderValue>()?);
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router.
///
/// - `POST /api/upload`, limited to `max_upload_size` bytes
/// - `GET /healthz`
/// - `/api/docs`: Scalar UI over the OpenAPI document
/// - `/internal/metrics` when metrics are enabled
/// - everything else: the embedded browser client
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let upload_limit = usize::try_from(state.config.max_upload_size)?;

    let api_routes = Router::new()
        .route(
            "/upload",
            post(api::handlers::uploads::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .nest("/api", api_routes)
        .merge(Scalar::with_url("/api/docs", ApiDoc::openapi()))
        .fallback(api::handlers::static_assets::serve_embedded_asset);

    let mut router = router.layer(create_cors_layer(&state.config)?);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// The configured HTTP server
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Create the storage provider from config (resolving its wallet) and build the router.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let provider = create_provider(config.provider.clone())?;
        Self::with_provider(config, provider)
    }

    /// Build the router around an already constructed provider.
    pub fn with_provider(config: Config, provider: Arc<dyn StorageProvider>) -> anyhow::Result<Self> {
        let state = AppState::builder().config(config.clone()).provider(provider).build();
        let router = build_router(&state)?;
        Ok(Self { router, config })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "permaupload listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
