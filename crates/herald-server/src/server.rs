use std::net::SocketAddr;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tokio::sync::watch;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use herald_notifications::NotificationScheduler;

use crate::{
    bootstrap,
    config::AppConfig,
    handlers::{self, AppState},
    middleware as app_middleware,
};

pub struct HeraldServer {
    addr: SocketAddr,
    app: Router,
    scheduler: Option<NotificationScheduler>,
}

pub fn build_app(cfg: &AppConfig, state: AppState) -> Router {
    let body_limit = cfg.server.body_limit_bytes;
    Router::new()
        .route("/healthz", get(handlers::healthz))
        // Broadcast and test sends
        .route("/sendToAllUsers", post(handlers::send_to_all_users))
        .route(
            "/sendTestNotification",
            post(handlers::send_test_notification),
        )
        // Registration
        .route("/subscriptions/push", post(handlers::register_push))
        .route(
            "/subscriptions/push/{token}",
            delete(handlers::unregister_push),
        )
        .route("/subscriptions/email", post(handlers::subscribe_email))
        // Manual triggers for the scheduled jobs
        .route("/admin/sweep", post(handlers::run_sweep))
        .route("/admin/digest", post(handlers::run_digest))
        .with_state(state)
        // Middleware stack (order: request id -> cors/compression/trace -> body limit)
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = tracing::field::Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Wire storage, channel senders and the scheduler from the configuration.
    pub async fn build(self) -> anyhow::Result<HeraldServer> {
        let service = bootstrap::build_service(&self.config).await?;

        let scheduler = if self.config.schedule.enabled {
            Some(NotificationScheduler::new(
                service.clone(),
                &self.config.scheduler_config()?,
            )?)
        } else {
            tracing::info!("Scheduled jobs disabled");
            None
        };

        let state = AppState {
            service,
            retention: self.config.retention(),
        };

        Ok(HeraldServer {
            addr: self.addr,
            app: build_app(&self.config, state),
            scheduler,
        })
    }
}

impl HeraldServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let scheduler_shutdown: Option<watch::Sender<bool>> =
            self.scheduler.map(NotificationScheduler::start);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        if let Some(tx) = scheduler_shutdown {
            let _ = tx.send(true);
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
