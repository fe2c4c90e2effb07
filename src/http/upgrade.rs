//! WebSocket upgrade detection.
//!
//! A request is forwarded only when `Connection` carries the `upgrade` token
//! and `Upgrade` carries the `websocket` token. Both headers are
//! comma-separated lists; tokens are trimmed and compared case-insensitively.

use hyper::header::{HeaderMap, HeaderName, CONNECTION, UPGRADE};

/// Returns true if the headers describe a WebSocket upgrade request.
pub fn is_websocket_request(headers: &HeaderMap) -> bool {
    has_token(headers, &CONNECTION, "upgrade") && has_token(headers, &UPGRADE, "websocket")
}

/// Check whether any value of `name` contains `token` as a list element.
fn has_token(headers: &HeaderMap, name: &HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|item| item.trim().eq_ignore_ascii_case(token))
}
