//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the single entry handler
//! - Wire up middleware (admission, timeout, request ID, tracing)
//! - Classify each request and serve it statically or through the shards
//! - Own shutdown timing for the listener and the shard pool

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::admission::{admission_middleware, AdmissionController};
use crate::http::static_files;
use crate::lifecycle::ShutdownSignal;
use crate::routing::{LocationRouter, Route};
use crate::shard::{Dispatcher, Drain, ProxyRequest, ShardManager};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<LocationRouter>,
    pub dispatcher: Dispatcher,
}

/// HTTP front end plus the shard pool behind it.
pub struct HttpServer {
    router: Router,
    config: Arc<ProxyConfig>,
    manager: ShardManager,
}

impl HttpServer {
    /// Build the router, the admission gate and the shard pool.
    pub fn new(config: Arc<ProxyConfig>) -> Result<Self, ProxyError> {
        let locations = Arc::new(LocationRouter::from_config(&config)?);
        let manager = ShardManager::start(config.clone())?;
        let admission = AdmissionController::new(config.admission_capacity());

        let state = AppState {
            router: locations,
            dispatcher: manager.dispatcher(),
        };

        let router = Self::build_router(&config, state, admission);
        Ok(Self { router, config, manager })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState, admission: AdmissionController) -> Router {
        tracing::debug!(capacity = admission.capacity(), "Admission gate configured");
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(middleware::from_fn_with_state(admission, admission_middleware))
            .layer(TimeoutLayer::new(Duration::from_secs(config.server.request_timeout_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Serve until `shutdown` fires, then drain the shard pool and stop
    /// accepting connections. Returns once both have finished or their
    /// deadlines have passed.
    pub async fn run(self, listener: TcpListener, shutdown: ShutdownSignal) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            shards = self.manager.shard_count(),
            "HTTP server starting"
        );

        let HttpServer { router, config, manager } = self;
        let pool = tokio::spawn(manager.run(shutdown.clone()));

        let app = router.into_make_service_with_connect_info::<SocketAddr>();
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .into_future();

        // Connections may wait on the shard drain before they can finish.
        let grace = config.dispatch.shutdown_timeout() + config.server.shutdown_timeout();
        let stop_deadline = async {
            shutdown.cancelled().await;
            tokio::time::sleep(grace).await;
        };

        tokio::select! {
            served = serve => served?,
            _ = stop_deadline => {
                tracing::warn!(grace_secs = grace.as_secs(), "Connections still open after grace period");
            }
        }

        if !shutdown.is_cancelled() {
            tracing::warn!("Listener stopped before shutdown was requested");
        }

        match pool.await {
            Ok(Drain::Complete) => tracing::info!("Shard pool stopped"),
            Ok(Drain::TimedOut) => tracing::warn!("Shard pool stopped before draining"),
            Err(e) => tracing::error!(error = %e, "Shard pool task failed"),
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Entry handler: classify, then serve statically or hand to the shards.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let path = request.uri().path().to_string();

    match state.router.classify(&path) {
        Route::NotFound => {
            tracing::debug!(path = %path, "No location matched");
            ProxyError::RouteNotFound(path).into_response()
        }
        Route::Static(location) => static_files::serve(&location, request).await,
        Route::Proxy(_) if state.dispatcher.is_closed() => ProxyError::ShuttingDown.into_response(),
        Route::Proxy(location) => {
            tracing::debug!(path = %path, location = %location.path, upstream = %location.upstream, "Proxying request");
            let (proxy_request, handle) = ProxyRequest::new(request, client_addr, location);
            if let Err(e) = state.dispatcher.submit(proxy_request).await {
                tracing::warn!(path = %path, error = %e, "Request not accepted for dispatch");
                return e.into_response();
            }
            handle.wait().await
        }
    }
}
