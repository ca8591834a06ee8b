use std::future::Future;

use axum::handler::Handler;
use axum::http::HeaderName;
use axum::routing::get;
use axum::Router;
use fin_jobs::QueueService;
use tokio::net::{TcpListener, ToSocketAddrs};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::dashboard::dashboard_router;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// HTTP surface of the job engine
#[derive(Clone)]
pub struct DashboardApp {
    pub service: QueueService,
    pub router: Router<()>,
}

impl DashboardApp {
    pub fn new(service: QueueService) -> Self {
        Self {
            service,
            router: Router::new(),
        }
    }

    pub fn use_router(mut self, path: &str, router: Router<()>) -> Self {
        let path = path.trim_matches('/');
        self.router = if path.is_empty() {
            self.router.merge(router)
        } else {
            self.router.nest(&format!("/{}", path), router)
        };
        self
    }

    pub fn use_get<H, T>(mut self, path: &str, handler: H) -> Self
    where
        H: Handler<T, ()> + Clone + Send + Sync + 'static,
        T: 'static,
    {
        self.router = self.router.route(path, get(handler));
        self
    }

    /// Mount the operator dashboard under `path`
    pub fn with_dashboard(self, path: &str) -> Self {
        let router = dashboard_router(self.service.clone());
        self.use_router(path, router)
    }

    /// Final router with request IDs and request tracing
    pub fn into_router(self) -> Router<()> {
        let header = HeaderName::from_static(REQUEST_ID_HEADER);
        self.router
            .layer(PropagateRequestIdLayer::new(header.clone()))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(header, MakeRequestUuid))
    }

    /// Serve until `shutdown` resolves, then let in-flight requests finish
    pub async fn listen<A, F>(self, addr: A, shutdown: F) -> anyhow::Result<()>
    where
        A: ToSocketAddrs,
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Dashboard listening");
        axum::serve(listener, self.into_router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}
