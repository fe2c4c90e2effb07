//! Request target rewriting.
//!
//! The director maps an inbound request URI onto the backend destination.
//! The default director copies scheme, host and path from a fixed [`Target`]
//! and merges the query strings of both sides.

use std::fmt;

use hyper::Uri;
use url::Url;

/// Scheme that selects the TLS dial path.
pub const SECURE_SCHEME: &str = "wss";

/// Fixed backend target the default director rewrites requests onto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: String,
    /// Host with optional `:port`.
    pub host: String,
    pub path: String,
    pub query: String,
}

impl Target {
    /// Build a target from a parsed URL.
    pub fn from_url(url: &Url) -> Self {
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        };

        Self {
            scheme: url.scheme().to_string(),
            host,
            path: url.path().to_string(),
            query: url.query().unwrap_or_default().to_string(),
        }
    }

    /// Parse a target from its URL text.
    pub fn parse(input: &str) -> Result<Self, url::ParseError> {
        Url::parse(input).map(|url| Self::from_url(&url))
    }
}

/// Outbound addressing computed for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub scheme: String,
    pub host: String,
    pub path: String,
    pub query: String,
}

impl Destination {
    /// True when the backend must be reached over TLS.
    pub fn is_secure(&self) -> bool {
        self.scheme == SECURE_SCHEME
    }

    /// Host with the scheme's default port appended when none is given.
    pub fn dial_address(&self) -> String {
        normalize_host(&self.scheme, &self.host)
    }

    /// Origin-form request target for the replayed request line.
    pub fn request_target(&self) -> String {
        let mut target = String::with_capacity(self.path.len() + self.query.len() + 2);
        if !self.path.starts_with('/') {
            target.push('/');
        }
        target.push_str(&self.path);
        if !self.query.is_empty() {
            target.push('?');
            target.push_str(&self.query);
        }
        target
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.host, self.request_target())
    }
}

/// Capability that maps an inbound request URI to its backend destination.
pub trait Rewrite: Send + Sync {
    fn rewrite(&self, inbound: &Uri) -> Destination;
}

impl Rewrite for Target {
    fn rewrite(&self, inbound: &Uri) -> Destination {
        rewrite(self, inbound)
    }
}

impl<F> Rewrite for F
where
    F: Fn(&Uri) -> Destination + Send + Sync,
{
    fn rewrite(&self, inbound: &Uri) -> Destination {
        self(inbound)
    }
}

/// Default director: target scheme, host and path verbatim, queries merged.
pub fn rewrite(target: &Target, inbound: &Uri) -> Destination {
    Destination {
        scheme: target.scheme.clone(),
        host: target.host.clone(),
        path: target.path.clone(),
        query: merge_query(&target.query, inbound.query().unwrap_or_default()),
    }
}

/// Join two raw query strings with `&` only when both are non-empty.
pub fn merge_query(configured: &str, inbound: &str) -> String {
    if configured.is_empty() || inbound.is_empty() {
        format!("{}{}", configured, inbound)
    } else {
        format!("{}&{}", configured, inbound)
    }
}

/// Append `:443` for `wss` and `:80` otherwise, unless a colon is present.
pub fn normalize_host(scheme: &str, host: &str) -> String {
    if host.contains(':') {
        host.to_string()
    } else if scheme == SECURE_SCHEME {
        format!("{}:443", host)
    } else {
        format!("{}:80", host)
    }
}
