//! Origin validation and cross-origin response headers.

use axum::http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_HEADERS, HOST,
    ORIGIN, VARY,
};
use axum::http::{HeaderMap, HeaderValue, Method, Uri};
use regex::Regex;
use skein_settings::TransportSettings;
use tracing::warn;

use super::headers::ONE_YEAR_SECS;

const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Outcome of an origin check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OriginCheck {
    /// Same origin, or checks are suppressed. No CORS headers needed.
    NotApplicable,
    /// Cross-origin and allowed.
    Allowed(String),
    /// Cross-origin and refused.
    Rejected(String),
}

/// Allowed origins compiled from settings.
#[derive(Debug)]
pub struct OriginPolicy {
    suppressed: bool,
    allow_any: bool,
    exact: Vec<String>,
    patterns: Vec<Regex>,
}

impl OriginPolicy {
    /// Compile the policy. Patterns that fail to compile are skipped.
    pub fn from_settings(settings: &TransportSettings) -> Self {
        let patterns = settings
            .allowed_origin_patterns
            .iter()
            .filter_map(|pattern| {
                let source = format!(
                    "^{}$",
                    pattern
                        .split('*')
                        .map(regex::escape)
                        .collect::<Vec<_>>()
                        .join(".*")
                );
                match Regex::new(&source) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!(pattern, error = %e, "ignoring invalid origin pattern");
                        None
                    }
                }
            })
            .collect();
        Self {
            suppressed: settings.suppress_cors,
            allow_any: settings.allowed_origins.iter().any(|o| o == "*"),
            exact: settings
                .allowed_origins
                .iter()
                .filter(|o| *o != "*")
                .map(|o| o.to_ascii_lowercase())
                .collect(),
            patterns,
        }
    }

    /// Whether CORS handling is switched off.
    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    /// Check the request's `Origin` against its `Host` and the policy.
    ///
    /// The scheme takes part in the same-origin comparison when the
    /// request URI or `X-Forwarded-Proto` names it.
    pub fn check(&self, uri: &Uri, headers: &HeaderMap) -> OriginCheck {
        if self.suppressed {
            return OriginCheck::NotApplicable;
        }
        let Some(origin) = headers.get(ORIGIN).and_then(|v| v.to_str().ok()) else {
            return OriginCheck::NotApplicable;
        };
        if is_same_origin(origin, request_scheme(uri, headers), headers) {
            return OriginCheck::NotApplicable;
        }
        if self.allows(origin) {
            OriginCheck::Allowed(origin.to_owned())
        } else {
            warn!(origin, "cross-origin request rejected");
            OriginCheck::Rejected(origin.to_owned())
        }
    }

    fn allows(&self, origin: &str) -> bool {
        if self.allow_any {
            return true;
        }
        let origin = origin.to_ascii_lowercase();
        self.exact.iter().any(|o| *o == origin) || self.patterns.iter().any(|re| re.is_match(&origin))
    }
}

/// `host[:port]` of an origin with default ports stripped.
fn authority(origin: &str) -> Option<String> {
    let uri: Uri = origin.parse().ok()?;
    let host = uri.host()?.to_ascii_lowercase();
    let default_port = match uri.scheme_str() {
        Some("https" | "wss") => Some(443),
        Some("http" | "ws") => Some(80),
        _ => None,
    };
    Some(match uri.port_u16() {
        Some(port) if Some(port) != default_port => format!("{host}:{port}"),
        _ => host,
    })
}

/// `http` or `https` for the web schemes, websocket ones folded in.
fn web_scheme(scheme: &str) -> Option<&'static str> {
    match scheme.to_ascii_lowercase().as_str() {
        "http" | "ws" => Some("http"),
        "https" | "wss" => Some("https"),
        _ => None,
    }
}

fn request_scheme(uri: &Uri, headers: &HeaderMap) -> Option<&'static str> {
    match uri.scheme_str() {
        Some(scheme) => web_scheme(scheme),
        None => headers
            .get(X_FORWARDED_PROTO)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| web_scheme(v.trim())),
    }
}

fn is_same_origin(origin: &str, scheme: Option<&str>, headers: &HeaderMap) -> bool {
    let Some(host) = headers.get(HOST).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    if let Some(scheme) = scheme {
        let origin_scheme = origin.split_once("://").and_then(|(s, _)| web_scheme(s));
        if origin_scheme != Some(scheme) {
            return false;
        }
    }
    let Some(origin) = authority(origin) else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    let host = host
        .strip_suffix(":80")
        .or_else(|| host.strip_suffix(":443"))
        .unwrap_or(&host);
    origin == host
}

/// Preflight details echoed back on OPTIONS.
#[derive(Clone, Debug)]
pub struct Preflight {
    /// Methods the target accepts, without OPTIONS.
    pub methods: Vec<Method>,
    /// `Access-Control-Request-Headers` of the request.
    pub request_headers: Option<HeaderValue>,
}

impl Preflight {
    /// Preflight for a target accepting `methods`.
    pub fn new(methods: Vec<Method>, request: &HeaderMap) -> Self {
        Self {
            methods,
            request_headers: request.get(ACCESS_CONTROL_REQUEST_HEADERS).cloned(),
        }
    }
}

/// Write the headers for an allowed cross-origin request.
pub fn apply_cors_headers(headers: &mut HeaderMap, origin: &str, preflight: Option<&Preflight>) {
    let Ok(origin) = HeaderValue::from_str(origin) else {
        return;
    };
    let _ = headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    let _ = headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
    let _ = headers.append(VARY, HeaderValue::from_static("Origin"));

    let Some(preflight) = preflight else {
        return;
    };
    let methods = preflight
        .methods
        .iter()
        .map(Method::as_str)
        .chain(std::iter::once("OPTIONS"))
        .collect::<Vec<_>>()
        .join(", ");
    if let Ok(methods) = HeaderValue::from_str(&methods) {
        let _ = headers.insert(ACCESS_CONTROL_ALLOW_METHODS, methods);
    }
    if let Some(requested) = &preflight.request_headers {
        let _ = headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
    }
    let _ = headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(ONE_YEAR_SECS));
}
