//! Static endpoints: the greeting, `/info` and the iframe bootstrap page.

use axum::http::header::{CONTENT_TYPE, ETAG, IF_NONE_MATCH, UPGRADE, X_FRAME_OPTIONS};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use sha2::{Digest, Sha256};
use skein_settings::TransportSettings;
use tracing::debug;

use super::Rejection;
use super::cors::{OriginCheck, OriginPolicy, Preflight, apply_cors_headers};
use super::headers::{add_cache_headers, add_no_cache_headers};

const GREETING: &str = "Welcome to SockJS!\n";

/// `/` and the empty path.
pub(crate) fn greeting(headers: &HeaderMap) -> Response {
    if headers.contains_key(UPGRADE) {
        debug!("upgrade requested at the greeting path");
        return Rejection::BadRequest.into_response();
    }
    (
        [(CONTENT_TYPE, "text/plain; charset=UTF-8")],
        GREETING,
    )
        .into_response()
}

#[derive(Debug, Serialize)]
struct InfoDocument {
    entropy: u32,
    origins: [&'static str; 1],
    cookie_needed: bool,
    websocket: bool,
}

/// `/info`.
pub(crate) fn info(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    origins: &OriginPolicy,
    settings: &TransportSettings,
) -> Response {
    let preflight = match *method {
        Method::GET => None,
        Method::OPTIONS => Some(Preflight::new(vec![Method::GET], headers)),
        _ => return Rejection::MethodNotAllowed(vec![Method::GET, Method::OPTIONS]).into_response(),
    };
    let origin = match origins.check(uri, headers) {
        OriginCheck::Rejected(_) => return Rejection::Forbidden.into_response(),
        OriginCheck::Allowed(origin) => Some(origin),
        OriginCheck::NotApplicable => None,
    };

    let mut response = match preflight {
        Some(_) => {
            let mut response = StatusCode::NO_CONTENT.into_response();
            add_cache_headers(response.headers_mut());
            response
        }
        None => {
            let document = InfoDocument {
                entropy: rand::random::<u32>() & 0x7fff_ffff,
                origins: ["*:*"],
                cookie_needed: settings.session_cookie_needed,
                websocket: settings.websocket_enabled,
            };
            let body = serde_json::to_string(&document).unwrap_or_default();
            let mut response =
                ([(CONTENT_TYPE, "application/json; charset=UTF-8")], body).into_response();
            add_no_cache_headers(response.headers_mut());
            response
        }
    };
    if let Some(origin) = origin {
        apply_cors_headers(response.headers_mut(), &origin, preflight.as_ref());
    }
    response
}

/// The iframe bootstrap document and its entity tag.
#[derive(Clone, Debug)]
pub struct IframePage {
    body: String,
    etag: String,
}

impl IframePage {
    /// Render the page for a client library URL.
    pub fn new(client_library_url: &str) -> Self {
        let body = format!(
            "<!DOCTYPE html>\n\
             <html>\n\
             <head>\n\
             \x20 <meta http-equiv=\"X-UA-Compatible\" content=\"IE=edge\" />\n\
             \x20 <meta http-equiv=\"Content-Type\" content=\"text/html; charset=UTF-8\" />\n\
             \x20 <script>\n\
             \x20   document.domain = document.domain;\n\
             \x20   _sockjs_onload = function(){{SockJS.bootstrap_iframe();}};\n\
             \x20 </script>\n\
             \x20 <script src=\"{client_library_url}\"></script>\n\
             </head>\n\
             <body>\n\
             \x20 <h2>Don't panic!</h2>\n\
             \x20 <p>This is a SockJS hidden iframe. It's used for cross domain magic.</p>\n\
             </body>\n\
             </html>"
        );
        let digest = Sha256::digest(body.as_bytes());
        Self {
            etag: format!("\"0{digest:x}\""),
            body,
        }
    }

    /// Quoted entity tag.
    pub fn etag(&self) -> &str {
        &self.etag
    }

    /// Page body.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Serve the page. `restricted` disables it: the iframe cannot check
    /// the origin that embeds it.
    pub(crate) fn respond(&self, method: &Method, headers: &HeaderMap, restricted: bool) -> Response {
        if restricted {
            debug!("iframe disabled by origin restrictions");
            return Rejection::NotFound.into_response();
        }
        if method != Method::GET {
            return Rejection::MethodNotAllowed(vec![Method::GET]).into_response();
        }
        let matches = headers
            .get(IF_NONE_MATCH)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.split(',').any(|tag| tag.trim() == self.etag));
        let mut response = if matches {
            StatusCode::NOT_MODIFIED.into_response()
        } else {
            (
                [(CONTENT_TYPE, "text/html; charset=UTF-8")],
                self.body.clone(),
            )
                .into_response()
        };
        let headers = response.headers_mut();
        add_cache_headers(headers);
        if let Ok(etag) = HeaderValue::from_str(&self.etag) {
            let _ = headers.insert(ETAG, etag);
        }
        let _ = headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN"));
        response
    }
}
