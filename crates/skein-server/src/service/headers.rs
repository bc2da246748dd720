//! Cache and session-cookie response headers.

use axum::http::header::{CACHE_CONTROL, COOKIE, EXPIRES, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use chrono::{Duration, Utc};

/// One year, in seconds.
pub const ONE_YEAR_SECS: i64 = 31_536_000;

const NO_CACHE: &str = "no-store, no-cache, must-revalidate, max-age=0";

/// Cookie name used for sticky load balancing.
pub const SESSION_COOKIE: &str = "JSESSIONID";

/// Long-lived caching for immutable responses.
pub fn add_cache_headers(headers: &mut HeaderMap) {
    let _ = headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000"),
    );
    let expires = (Utc::now() + Duration::seconds(ONE_YEAR_SECS))
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = HeaderValue::from_str(&expires) {
        let _ = headers.insert(EXPIRES, value);
    }
}

/// Forbid caching of per-session responses.
pub fn add_no_cache_headers(headers: &mut HeaderMap) {
    let _ = headers.insert(CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
}

/// Echo the session cookie, or set a placeholder when the client has none.
pub fn add_session_cookie(request: &HeaderMap, response: &mut HeaderMap) {
    let value = session_cookie(request).unwrap_or("dummy");
    let cookie = format!("{SESSION_COOKIE}={value};path=/");
    if let Ok(cookie) = HeaderValue::from_str(&cookie) {
        let _ = response.insert(SET_COOKIE, cookie);
    }
}

fn session_cookie(request: &HeaderMap) -> Option<&str> {
    request
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}
