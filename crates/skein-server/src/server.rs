//! `SkeinServer`: mounts, axum router, lifecycle and listener.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::response::Response;
use axum::routing::any;
use skein_hooks::{HandshakeInterceptor, InterceptorRegistry};
use skein_settings::{SettingsError, SkeinSettings};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::handler::MessageHandler;
use crate::service::{ServiceError, SkeinService};
use crate::shutdown::ShutdownCoordinator;

/// Collects mounts and interceptors for a [`SkeinServer`].
pub struct SkeinServerBuilder {
    settings: SkeinSettings,
    mounts: Vec<(String, Arc<dyn MessageHandler>)>,
    interceptors: InterceptorRegistry,
}

impl SkeinServerBuilder {
    /// Serve `handler` under `prefix` (e.g. `/echo`).
    #[must_use]
    pub fn mount(mut self, prefix: &str, handler: Arc<dyn MessageHandler>) -> Self {
        self.mounts.push((prefix.to_owned(), handler));
        self
    }

    /// Add a handshake interceptor shared by every mount.
    #[must_use]
    pub fn interceptor(mut self, interceptor: Arc<dyn HandshakeInterceptor>) -> Self {
        self.interceptors.register(interceptor);
        self
    }

    /// Validate settings and build the server.
    pub fn build(self) -> Result<SkeinServer, SettingsError> {
        self.settings.validate()?;
        let transport = Arc::new(self.settings.transport.clone());
        let interceptors = Arc::new(self.interceptors);

        let mut seen = HashSet::new();
        let mut services = Vec::with_capacity(self.mounts.len());
        for (prefix, handler) in self.mounts {
            let service = SkeinService::new(&prefix, Arc::clone(&transport), handler, Arc::clone(&interceptors));
            if !seen.insert(service.prefix().to_owned()) {
                return Err(SettingsError::InvalidValue(format!(
                    "duplicate mount prefix '{prefix}'"
                )));
            }
            services.push(Arc::new(service));
        }

        Ok(SkeinServer {
            settings: self.settings,
            services,
            shutdown: Arc::new(ShutdownCoordinator::new()),
        })
    }
}

/// The skein server: one [`SkeinService`] per mount.
pub struct SkeinServer {
    settings: SkeinSettings,
    services: Vec<Arc<SkeinService>>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl SkeinServer {
    /// Start building a server.
    pub fn builder(settings: SkeinSettings) -> SkeinServerBuilder {
        SkeinServerBuilder {
            settings,
            mounts: Vec::new(),
            interceptors: InterceptorRegistry::new(),
        }
    }

    /// Build the axum router covering every mount.
    pub fn router(&self) -> Router {
        self.services
            .iter()
            .fold(Router::new(), |router, service| {
                router.merge(mount_router(Arc::clone(service)))
            })
    }

    /// Mounted services.
    pub fn services(&self) -> &[Arc<SkeinService>] {
        &self.services
    }

    /// Service mounted at `prefix`.
    pub fn service(&self, prefix: &str) -> Option<&Arc<SkeinService>> {
        let prefix = prefix.trim_end_matches('/');
        self.services.iter().find(|s| s.prefix() == prefix)
    }

    /// Get the settings.
    pub fn settings(&self) -> &SkeinSettings {
        &self.settings
    }

    /// Get the shutdown coordinator.
    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Start every mount's transports and scheduler.
    pub fn start(&self) {
        let token = self.shutdown.token();
        for service in &self.services {
            service.start(&token);
        }
    }

    /// Stop every mount, closing live sessions with "going away".
    pub async fn stop(&self) {
        for service in &self.services {
            service.stop().await;
        }
    }

    /// Serve on `listener` until shutdown. Mounts are stopped before
    /// in-flight connections are drained, so long-lived responses end.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        self.start();
        let token = self.shutdown.token();
        let services = self.services.clone();
        let stopping = async move {
            token.cancelled().await;
            for service in services {
                service.stop().await;
            }
        };
        axum::serve(listener, self.router())
            .with_graceful_shutdown(stopping)
            .await
    }

    /// Bind `host:port` from settings and serve until shutdown.
    pub async fn listen(&self) -> std::io::Result<()> {
        let addr = format!("{}:{}", self.settings.server.host, self.settings.server.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(addr = %listener.local_addr()?, "listening");
        self.serve(listener).await
    }

    /// Serve on `listener` in a task tracked by the coordinator.
    pub fn spawn(self: &Arc<Self>, listener: TcpListener) -> std::io::Result<SocketAddr> {
        let addr = listener.local_addr()?;
        let server = Arc::clone(self);
        self.shutdown.track(tokio::spawn(async move {
            if let Err(e) = server.serve(listener).await {
                error!(error = %e, "server failed");
            }
        }));
        info!(%addr, "listening");
        Ok(addr)
    }

    /// Trigger shutdown and wait for tracked tasks, bounded by the
    /// configured shutdown timeout.
    pub async fn shutdown(&self) {
        let timeout = Duration::from_secs(self.settings.server.shutdown_timeout_secs);
        self.shutdown.graceful_shutdown(Some(timeout)).await;
    }
}

fn mount_router(service: Arc<SkeinService>) -> Router {
    let prefix = service.prefix().to_owned();
    let router = if prefix.is_empty() {
        Router::new()
            .route("/", any(dispatch))
            .route("/{*rest}", any(dispatch))
    } else {
        Router::new()
            .route(&prefix, any(dispatch))
            .route(&format!("{prefix}/"), any(dispatch))
            .route(&format!("{prefix}/{{*rest}}"), any(dispatch))
    };
    router.with_state(service)
}

async fn dispatch(
    State(service): State<Arc<SkeinService>>,
    request: Request<Body>,
) -> Result<Response, ServiceError> {
    service.handle(request).await
}
