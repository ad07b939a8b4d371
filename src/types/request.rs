//! Inbound request description handed to the pipeline

use http::Method;

/// The parts of an inbound request the pipeline needs.
///
/// The routing layer builds this from its own request type; identity
/// (client IP, verified user id) is resolved before the pipeline runs.
///
/// ```rust
/// # use sluice::InboundRequest;
/// let request = InboundRequest::get("/api/products?page=2")
///     .client_ip("203.0.113.7")
///     .user("user-42");
/// assert_eq!(request.path, "/api/products");
/// assert_eq!(request.query.as_deref(), Some("page=2"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub client_ip: String,
    pub user_id: Option<String>,
    /// Raw `If-None-Match` header value.
    pub if_none_match: Option<String>,
}

impl InboundRequest {
    /// Build a request; a `?query` suffix on `target` is split off.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (target, None),
        };
        Self {
            method,
            path: path.to_string(),
            query,
            client_ip: "unknown".to_string(),
            user_id: None,
            if_none_match: None,
        }
    }

    pub fn get(target: &str) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = ip.into();
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn if_none_match(mut self, etag: impl Into<String>) -> Self {
        self.if_none_match = Some(etag.into());
        self
    }

    /// GET and HEAD are the only methods cached or coalesced.
    pub fn is_read(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }

    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{query}", self.path),
            None => self.path.clone(),
        }
    }
}
