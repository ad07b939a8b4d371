//! Per-route HTTP caching policy.
//!
//! A [`PolicyTable`] maps request paths to [`CachePolicy`] values. Lookup
//! tries an exact path first, then the patterns in insertion order; the first
//! pattern whose shape matches wins. Paths with no matching entry are not
//! cached at all.
//!
//! Pattern segments:
//!
//! - `:id` or `{id}` — matches exactly one non-empty segment
//! - `*` — trailing only; matches one or more remaining segments
//!
//! ```rust
//! # use sluice::{CachePolicy, PolicyTable};
//! # use std::time::Duration;
//! let mut table = PolicyTable::new();
//! table.insert("/api/products", CachePolicy::public(Duration::from_secs(600)));
//! table.insert("/api/products/:id", CachePolicy::public(Duration::from_secs(60)));
//!
//! assert!(table.lookup("/api/products/42").is_some());
//! assert!(table.lookup("/api/orders").is_none());
//! ```

use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Who may store the response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Shared caches (CDNs, proxies) may store it.
    #[default]
    Public,
    /// Only the requesting client may store it. Entries are keyed per user.
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

/// Caching rules for one route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    /// Freshness lifetime, also used as the in-memory TTL.
    pub max_age: Duration,
    pub stale_while_revalidate: Option<Duration>,
    pub stale_if_error: Option<Duration>,
    pub visibility: Visibility,
}

impl CachePolicy {
    /// Shared-cacheable policy with the given `max-age`.
    pub fn public(max_age: Duration) -> Self {
        Self {
            max_age,
            stale_while_revalidate: None,
            stale_if_error: None,
            visibility: Visibility::Public,
        }
    }

    /// Client-only policy with the given `max-age`.
    pub fn private(max_age: Duration) -> Self {
        Self {
            visibility: Visibility::Private,
            ..Self::public(max_age)
        }
    }

    pub fn stale_while_revalidate(mut self, window: Duration) -> Self {
        self.stale_while_revalidate = Some(window);
        self
    }

    pub fn stale_if_error(mut self, window: Duration) -> Self {
        self.stale_if_error = Some(window);
        self
    }

    /// Render the `Cache-Control` header value.
    ///
    /// `public, max-age=600, stale-while-revalidate=86400`
    pub fn cache_control(&self) -> String {
        let mut value = format!(
            "{}, max-age={}",
            self.visibility.as_str(),
            self.max_age.as_secs()
        );
        if let Some(swr) = self.stale_while_revalidate {
            let _ = write!(value, ", stale-while-revalidate={}", swr.as_secs());
        }
        if let Some(sie) = self.stale_if_error {
            let _ = write!(value, ", stale-if-error={}", sie.as_secs());
        }
        value
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param,
    Rest,
}

/// A parameterised route shape such as `/api/products/:id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    /// Parse a route. Returns `None` if the route has no parameter or
    /// wildcard segment (it is an exact path).
    pub fn parse(route: &str) -> Option<Self> {
        let parts: Vec<&str> = split_path(route).collect();
        let last = parts.len().saturating_sub(1);
        let segments: Vec<Segment> = parts
            .iter()
            .enumerate()
            .map(|(i, part)| {
                if *part == "*" && i == last {
                    Segment::Rest
                } else if part.starts_with(':') || (part.starts_with('{') && part.ends_with('}')) {
                    Segment::Param
                } else {
                    Segment::Literal((*part).to_string())
                }
            })
            .collect();

        if segments.iter().all(|s| matches!(s, Segment::Literal(_))) {
            return None;
        }
        Some(Self {
            raw: route.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, path: &str) -> bool {
        let mut parts = split_path(path);
        for segment in &self.segments {
            match segment {
                Segment::Rest => return parts.next().is_some(),
                Segment::Param => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                Segment::Literal(lit) => {
                    if parts.next() != Some(lit.as_str()) {
                        return false;
                    }
                }
            }
        }
        parts.next().is_none()
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Strip the query string and any trailing slash (except for the root).
fn normalize(path: &str) -> &str {
    let path = path.split_once('?').map_or(path, |(p, _)| p);
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

/// Route → policy table. Immutable once the pipeline is built.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    exact: HashMap<String, CachePolicy>,
    patterns: Vec<(RoutePattern, CachePolicy)>,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a policy. Routes containing `:param`, `{param}` or a trailing
    /// `*` become patterns, checked in insertion order after exact paths.
    pub fn insert(&mut self, route: &str, policy: CachePolicy) {
        match RoutePattern::parse(route) {
            Some(pattern) => self.patterns.push((pattern, policy)),
            None => {
                self.exact.insert(normalize(route).to_string(), policy);
            }
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, route: &str, policy: CachePolicy) -> Self {
        self.insert(route, policy);
        self
    }

    /// Best-match lookup: exact path, then first matching pattern.
    pub fn lookup(&self, path: &str) -> Option<&CachePolicy> {
        let path = normalize(path);
        self.exact.get(path).or_else(|| {
            self.patterns
                .iter()
                .find(|(pattern, _)| pattern.matches(path))
                .map(|(_, policy)| policy)
        })
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_route_is_not_a_pattern() {
        assert!(RoutePattern::parse("/api/products").is_none());
    }

    #[test]
    fn param_segment_matches_exactly_one_segment() {
        let pattern = RoutePattern::parse("/api/products/:id").unwrap();
        assert!(pattern.matches("/api/products/42"));
        assert!(!pattern.matches("/api/products"));
        assert!(!pattern.matches("/api/products/42/reviews"));
    }

    #[test]
    fn brace_params_are_accepted() {
        let pattern = RoutePattern::parse("/api/{collection}/{id}").unwrap();
        assert!(pattern.matches("/api/products/7"));
        assert!(!pattern.matches("/api/products"));
    }

    #[test]
    fn trailing_wildcard_needs_at_least_one_segment() {
        let pattern = RoutePattern::parse("/static/*").unwrap();
        assert!(pattern.matches("/static/css/site.css"));
        assert!(!pattern.matches("/static"));
    }

    #[test]
    fn normalize_strips_query_and_trailing_slash() {
        assert_eq!(normalize("/api/products/?page=2"), "/api/products");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("/?q=1"), "/");
    }
}
