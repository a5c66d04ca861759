//! Outbound request description.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identifier attached to every queued request for log correlation.
pub type RequestId = Uuid;

/// Generate a new UUIDv7 request id (timestamp-sortable).
pub fn new_request_id() -> RequestId {
    Uuid::now_v7()
}

/// HTTP method of an outbound request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Parse a method name, case-insensitively.
    pub fn parse(s: &str) -> Result<Self, MethodParseError> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            _ => Err(MethodParseError(s.to_string())),
        }
    }

    /// Only side-effect-free requests may be served from or stored in the cache.
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Self::Get)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing Method from string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodParseError(pub String);

impl std::fmt::Display for MethodParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid http method: {}", self.0)
    }
}

impl std::error::Error for MethodParseError {}

/// A request as submitted to the throttler.
#[derive(Debug, Clone, Default)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    pub bearer_token: Option<String>,
    /// Overrides the configured per-attempt deadline.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl RequestSpec {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, url).with_body(body)
    }

    pub fn put(url: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, url).with_body(body)
    }

    pub fn patch(url: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Patch, url).with_body(body)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::Delete, url)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Cache key: method and URL, plus the compact JSON body when present.
    ///
    /// Headers and tokens are not part of the key.
    pub fn cache_key(&self) -> String {
        match &self.body {
            Some(body) => format!("{} {} {}", self.method, self.url, body),
            None => format!("{} {}", self.method, self.url),
        }
    }

    pub fn is_cacheable(&self) -> bool {
        self.method.is_cacheable()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_defaults_to_get() {
        let spec = RequestSpec::default();
        assert_eq!(spec.method, Method::Get);
        assert!(spec.is_cacheable());
    }

    #[test]
    fn test_only_get_is_cacheable() {
        assert!(Method::Get.is_cacheable());
        for method in [Method::Post, Method::Put, Method::Patch, Method::Delete] {
            assert!(!method.is_cacheable(), "{} should bypass the cache", method);
        }
    }

    #[test]
    fn test_method_parse_roundtrip() {
        assert_eq!(Method::parse("patch").unwrap(), Method::Patch);
        assert_eq!(Method::parse("GET").unwrap(), Method::Get);
        assert!(Method::parse("TRACE").is_err());
    }

    #[test]
    fn test_cache_key_includes_body() {
        let a = RequestSpec::post("/api/bookings", json!({"service_id": 1}));
        let b = RequestSpec::post("/api/bookings", json!({"service_id": 2}));
        let c = RequestSpec::post("/api/bookings", json!({"service_id": 1}));
        assert_ne!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), c.cache_key());
    }

    #[test]
    fn test_cache_key_ignores_auth() {
        let plain = RequestSpec::get("/api/services");
        let authed = RequestSpec::get("/api/services").with_bearer_token("abc");
        assert_eq!(plain.cache_key(), authed.cache_key());
        assert_eq!(plain.cache_key(), "GET /api/services");
    }

    #[test]
    fn test_cancel_token_observed() {
        let token = CancellationToken::new();
        let spec = RequestSpec::get("/api/providers").with_cancel(token.clone());
        assert!(!spec.is_cancelled());
        token.cancel();
        assert!(spec.is_cancelled());
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Distinct URLs never share a cache key.
        #[test]
        fn prop_cache_key_distinguishes_urls(
            a in "/api/[a-z]{1,12}",
            b in "/api/[a-z]{1,12}"
        ) {
            let ka = RequestSpec::get(a.clone()).cache_key();
            let kb = RequestSpec::get(b.clone()).cache_key();
            prop_assert_eq!(a == b, ka == kb);
        }

        /// The method is always part of the key.
        #[test]
        fn prop_cache_key_distinguishes_methods(url in "/api/[a-z]{1,12}") {
            let get = RequestSpec::get(url.clone()).cache_key();
            let delete = RequestSpec::delete(url).cache_key();
            prop_assert_ne!(get, delete);
        }
    }
}
