//! Service facade: the single entry point for one mount's traffic.
//!
//! A request is classified by its mount-relative path into a static
//! endpoint, a raw websocket upgrade or a session transport request.
//! Ordinary client mistakes become [`Rejection`] responses; faults come
//! back as [`ServiceError`] after the interceptors have seen them.

pub mod cors;
pub mod headers;
pub mod info;
pub mod path;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::ALLOW;
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use skein_core::{CloseStatus, HandshakeError, SessionId, TransportError};
use skein_hooks::{
    Attributes, Failure, HandshakeDecision, HandshakeRequest, InterceptorChain, InterceptorRegistry, Veto,
};
use skein_settings::TransportSettings;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use self::cors::{OriginCheck, OriginPolicy, Preflight, apply_cors_headers};
use self::headers::{add_cache_headers, add_no_cache_headers, add_session_cookie};
use self::info::IframePage;
use self::path::{Route, SessionPath};
use crate::handler::{MessageHandler, Principal};
use crate::metrics::record_rejection;
use crate::session::Session;
use crate::session::registry::SessionRegistry;
use crate::session::scheduler::{SweepSchedule, run_scheduler};
use crate::transport::{TransportDescriptor, TransportHandler, TransportKind, default_transports};

// ── Outcomes ──

/// An expected refusal, answered with a bare status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// Unknown path, transport, or session.
    NotFound,
    /// Malformed request.
    BadRequest,
    /// Cross-origin request from a disallowed origin.
    Forbidden,
    /// Wrong method; carries the `Allow` list.
    MethodNotAllowed(Vec<Method>),
    /// The transport is stopped.
    ServiceUnavailable,
}

impl Rejection {
    /// Status code answered.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status = self.status();
        record_rejection(status);
        let mut response = status.into_response();
        if let Self::MethodNotAllowed(methods) = self {
            let allow = methods
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            if let Ok(allow) = HeaderValue::from_str(&allow) {
                let _ = response.headers_mut().insert(ALLOW, allow);
            }
        }
        response
    }
}

/// The request a fault happened in.
#[derive(Clone, Debug)]
pub struct RequestContext {
    /// Request method.
    pub method: Method,
    /// Request URI.
    pub uri: Uri,
    /// Session addressed, if any.
    pub session_id: Option<SessionId>,
}

impl RequestContext {
    fn of(request: &Request<Body>, session_id: Option<SessionId>) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            session_id,
        }
    }
}

impl fmt::Display for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.uri)?;
        if let Some(id) = &self.session_id {
            write!(f, " (session {id})")?;
        }
        Ok(())
    }
}

/// A fault while serving a request.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Session creation or upgrade handshake failed.
    #[error("{context}: {source}")]
    Handshake {
        /// Originating request.
        context: RequestContext,
        /// Cause.
        #[source]
        source: HandshakeError,
    },
    /// A session transport failed; the session is closed.
    #[error("{context}: {source}")]
    Transport {
        /// Originating request.
        context: RequestContext,
        /// Cause.
        #[source]
        source: TransportError,
    },
}

impl ServiceError {
    /// Originating request.
    pub fn context(&self) -> &RequestContext {
        match self {
            Self::Handshake { context, .. } | Self::Transport { context, .. } => context,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        error!(error = %self, "request failed");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}

fn veto_response(veto: Veto) -> Response {
    let mut response = (veto.status, veto.body).into_response();
    response.headers_mut().extend(veto.headers);
    response
}

/// Run the before-pass. `Err` carries the response to send instead.
async fn run_before(
    chain: &mut InterceptorChain,
    request: &HandshakeRequest,
    attributes: &mut Attributes,
    context: &RequestContext,
) -> Result<(), Result<Response, ServiceError>> {
    match chain.apply_before(request, attributes).await {
        Ok(HandshakeDecision::Proceed) => Ok(()),
        Ok(HandshakeDecision::Reject(veto)) => Err(Ok(veto_response(veto))),
        Err(e) => {
            let err = HandshakeError::new(context.method.as_str(), context.uri.to_string(), "interceptor failed")
                .with_source(e);
            let failure: Failure<'_> = &err;
            chain.apply_after(request, Some(failure)).await;
            Err(Err(ServiceError::Handshake {
                context: context.clone(),
                source: err,
            }))
        }
    }
}

// ── Service ──

/// Serves one mount: its sessions, transports and scheduler.
pub struct SkeinService {
    prefix: String,
    settings: Arc<TransportSettings>,
    handler: Arc<dyn MessageHandler>,
    transports: HashMap<TransportKind, Arc<dyn TransportHandler>>,
    registry: Arc<SessionRegistry>,
    interceptors: Arc<InterceptorRegistry>,
    origins: OriginPolicy,
    iframe: IframePage,
    scheduler: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl SkeinService {
    /// Create a service with the standard transports.
    pub fn new(
        prefix: &str,
        settings: Arc<TransportSettings>,
        handler: Arc<dyn MessageHandler>,
        interceptors: Arc<InterceptorRegistry>,
    ) -> Self {
        let transports = default_transports(&settings);
        Self::with_transports(prefix, settings, handler, interceptors, transports)
    }

    /// Create a service with custom transport handlers.
    ///
    /// The websocket handler is dropped when websockets are disabled.
    pub fn with_transports(
        prefix: &str,
        settings: Arc<TransportSettings>,
        handler: Arc<dyn MessageHandler>,
        interceptors: Arc<InterceptorRegistry>,
        mut transports: HashMap<TransportKind, Arc<dyn TransportHandler>>,
    ) -> Self {
        if !settings.websocket_enabled {
            let _ = transports.remove(&TransportKind::WebSocket);
        }
        Self {
            prefix: normalize_prefix(prefix),
            origins: OriginPolicy::from_settings(&settings),
            iframe: IframePage::new(&settings.client_library_url),
            settings,
            handler,
            transports,
            registry: Arc::new(SessionRegistry::new()),
            interceptors,
            scheduler: Mutex::new(None),
        }
    }

    /// Mount prefix, without a trailing slash.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Live sessions.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Transport settings.
    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Path relative to the mount, or `None` when outside it.
    fn sub_path<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.prefix.as_str())?;
        (rest.is_empty() || rest.starts_with('/')).then_some(rest)
    }

    /// Handle one request.
    pub async fn handle(&self, request: Request<Body>) -> Result<Response, ServiceError> {
        let route = self
            .sub_path(request.uri().path())
            .and_then(Route::classify);
        let Some(route) = route else {
            debug!(path = request.uri().path(), "no route");
            return Ok(Rejection::NotFound.into_response());
        };
        match route {
            Route::Greeting => Ok(info::greeting(request.headers())),
            Route::Info => Ok(info::info(
                request.method(),
                request.uri(),
                request.headers(),
                &self.origins,
                &self.settings,
            )),
            Route::Iframe => Ok(self.iframe.respond(
                request.method(),
                request.headers(),
                self.settings.has_origin_restrictions(),
            )),
            Route::RawWebSocket => self.raw_websocket(request).await,
            Route::Session(path) => self.session_request(request, path).await,
        }
    }

    fn handshake_request(
        &self,
        request: &Request<Body>,
        path: Option<&SessionPath>,
        principal: Option<&Principal>,
    ) -> HandshakeRequest {
        HandshakeRequest {
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
            session_id: path.map(|p| p.session_id.to_string()),
            transport: path.map(|p| p.transport.clone()),
            principal: principal.map(|p| p.name().to_owned()),
        }
    }

    async fn raw_websocket(&self, request: Request<Body>) -> Result<Response, ServiceError> {
        let Some(transport) = self.transports.get(&TransportKind::WebSocket) else {
            debug!("raw websocket requested while disabled");
            return Ok(Rejection::NotFound.into_response());
        };
        let Some(upgrader) = transport.upgrader() else {
            return Ok(Rejection::NotFound.into_response());
        };

        if let OriginCheck::Rejected(_) = self.origins.check(request.uri(), request.headers()) {
            return Ok(Rejection::Forbidden.into_response());
        }
        let context = RequestContext::of(&request, None);
        let principal = request.extensions().get::<Principal>().cloned();
        let handshake = self.handshake_request(&request, None, principal.as_ref());
        let mut chain = self.interceptors.chain();
        let mut attributes = Attributes::new();
        if let Err(outcome) = run_before(&mut chain, &handshake, &mut attributes, &context).await {
            return outcome;
        }

        match upgrader
            .upgrade(request, Arc::clone(&self.handler), attributes, principal)
            .await
        {
            Ok(response) => {
                chain.apply_after(&handshake, None).await;
                Ok(response)
            }
            Err(e) => {
                let failure: Failure<'_> = &e;
                chain.apply_after(&handshake, Some(failure)).await;
                Err(ServiceError::Transport { context, source: e })
            }
        }
    }

    fn method_mismatch(&self, request: &Request<Body>, descriptor: &TransportDescriptor) -> Response {
        let required = descriptor.method.clone();
        if request.method() == Method::OPTIONS && descriptor.cors {
            let origin = match self.origins.check(request.uri(), request.headers()) {
                OriginCheck::Rejected(_) => return Rejection::Forbidden.into_response(),
                OriginCheck::Allowed(origin) => Some(origin),
                OriginCheck::NotApplicable => None,
            };
            let mut response = StatusCode::NO_CONTENT.into_response();
            add_cache_headers(response.headers_mut());
            if let Some(origin) = origin {
                let preflight = Preflight::new(vec![required], request.headers());
                apply_cors_headers(response.headers_mut(), &origin, Some(&preflight));
            }
            return response;
        }
        debug!(method = %request.method(), transport = descriptor.name, "method not allowed");
        let allow = if descriptor.cors {
            vec![required, Method::OPTIONS]
        } else {
            vec![required]
        };
        Rejection::MethodNotAllowed(allow).into_response()
    }

    async fn session_request(&self, request: Request<Body>, path: SessionPath) -> Result<Response, ServiceError> {
        let Some(kind) = TransportKind::from_name(&path.transport) else {
            debug!(transport = %path.transport, "unknown transport");
            return Ok(Rejection::NotFound.into_response());
        };
        let Some(transport) = self.transports.get(&kind).cloned() else {
            debug!(transport = %kind, "transport not served");
            return Ok(Rejection::NotFound.into_response());
        };
        // iframe-hosted transports cannot be origin checked
        if kind == TransportKind::HtmlFile && self.settings.has_origin_restrictions() {
            debug!(transport = %kind, "iframe transport disabled by origin restrictions");
            return Ok(Rejection::NotFound.into_response());
        }
        let descriptor = kind.descriptor();
        if request.method() != descriptor.method {
            return Ok(self.method_mismatch(&request, descriptor));
        }

        let context = RequestContext::of(&request, Some(path.session_id.clone()));
        let principal = request.extensions().get::<Principal>().cloned();
        let handshake = self.handshake_request(&request, Some(&path), principal.as_ref());
        let mut chain = self.interceptors.chain();

        let (session, created) = match self.registry.get(path.session_id.as_str()) {
            Some(session) => (session, false),
            None => {
                let Some(factory) = transport.session_factory() else {
                    debug!(session_id = %path.session_id, "unknown session");
                    return Ok(Rejection::NotFound.into_response());
                };
                let mut attributes = Attributes::new();
                if let Err(outcome) = run_before(&mut chain, &handshake, &mut attributes, &context).await {
                    return outcome;
                }
                self.registry.get_or_create(path.session_id.as_str(), || {
                    factory.create_session(
                        path.session_id.clone(),
                        Arc::clone(&self.handler),
                        attributes,
                        principal.clone(),
                    )
                })
            }
        };
        // also covers a session another request created first
        if !created {
            if let Some(owner) = session.principal() {
                if principal.as_ref() != Some(owner) {
                    debug!(session_id = %path.session_id, "principal mismatch");
                    chain.apply_after(&handshake, None).await;
                    return Ok(Rejection::NotFound.into_response());
                }
            }
        }
        if !transport.accepts(&session) {
            debug!(session_id = %path.session_id, transport = %kind, "session style not served");
            chain.apply_after(&handshake, None).await;
            return Ok(Rejection::NotFound.into_response());
        }

        let mut extra = HeaderMap::new();
        if descriptor.no_cache {
            add_no_cache_headers(&mut extra);
        }
        match self.origins.check(request.uri(), request.headers()) {
            OriginCheck::Rejected(_) => {
                self.discard_new(&session, created);
                chain.apply_after(&handshake, None).await;
                return Ok(Rejection::Forbidden.into_response());
            }
            OriginCheck::Allowed(origin) if descriptor.cors => {
                apply_cors_headers(&mut extra, &origin, None);
            }
            OriginCheck::Allowed(_) | OriginCheck::NotApplicable => {}
        }
        if self.settings.session_cookie_needed && !descriptor.upgrade {
            add_session_cookie(request.headers(), &mut extra);
        }

        match transport.handle(request, Arc::clone(&session)).await {
            Ok(mut response) => {
                if response.status().is_client_error() {
                    self.discard_new(&session, created);
                }
                response.headers_mut().extend(extra);
                chain.apply_after(&handshake, None).await;
                Ok(response)
            }
            Err(e) => {
                let failure: Failure<'_> = &e;
                chain.apply_after(&handshake, Some(failure)).await;
                Err(ServiceError::Transport { context, source: e })
            }
        }
    }

    /// Forget a session this request created; it never became usable.
    fn discard_new(&self, session: &Arc<Session>, created: bool) {
        if created && self.registry.remove_exact(session) {
            debug!(session_id = %session.id(), "discarded new session");
        }
    }

    // ── Lifecycle ──

    /// Start transports and the sweep task. Repeated calls are no-ops.
    pub fn start(&self, parent: &CancellationToken) {
        let mut scheduler = self.scheduler.lock();
        if scheduler.is_some() {
            return;
        }
        for transport in self.transports.values() {
            transport.start();
        }
        let token = parent.child_token();
        let handle = tokio::spawn(run_scheduler(
            self.registry.clone(),
            SweepSchedule::from(self.settings.as_ref()),
            token.clone(),
        ));
        *scheduler = Some((token, handle));
        info!(prefix = %self.prefix, "service started");
    }

    /// Stop the sweep task and transports, then close every session.
    pub async fn stop(&self) {
        let scheduler = self.scheduler.lock().take();
        if let Some((token, handle)) = scheduler {
            token.cancel();
            let _ = handle.await;
        }
        for transport in self.transports.values() {
            transport.stop();
        }
        self.registry.close_all(CloseStatus::GOING_AWAY).await;
        info!(prefix = %self.prefix, "service stopped");
    }

    /// Whether the sweep task runs.
    pub fn is_running(&self) -> bool {
        self.scheduler.lock().is_some()
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() || trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{trimmed}")
    }
}

impl fmt::Debug for SkeinService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkeinService")
            .field("prefix", &self.prefix)
            .field("transports", &self.transports.keys().collect::<Vec<_>>())
            .field("sessions", &self.registry.len())
            .finish_non_exhaustive()
    }
}
