//! Per-caller identifier derivation.
//!
//! The client address is taken from proxy headers in this order:
//! the first entry of `X-Forwarded-For`, then `X-Real-IP`, then a fixed
//! fallback. Both headers are client-controlled unless a trusted reverse
//! proxy overwrites or strips them, so this is only sound behind such a proxy.
//! Exposed directly, a caller can pick any identifier it likes.

use axum::http::HeaderMap;

/// Header carrying the proxy chain, client first.
pub const FORWARDED_FOR: &str = "x-forwarded-for";
/// Header carrying a single client address.
pub const REAL_IP: &str = "x-real-ip";
/// Address used when no proxy header is present.
pub const FALLBACK_ADDRESS: &str = "127.0.0.1";

/// Resolve the client address for a request.
pub fn resolve_client_address(headers: &HeaderMap) -> String {
    if let Some(first) = header_str(headers, FORWARDED_FOR)
        .and_then(|list| list.split(',').next())
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
    {
        return first.to_string();
    }

    if let Some(real_ip) = header_str(headers, REAL_IP)
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
    {
        return real_ip.to_string();
    }

    FALLBACK_ADDRESS.to_string()
}

/// Build the counter key `<client-address>:<policy-name>`.
pub fn compose_identifier(client_address: &str, policy_name: &str) -> String {
    format!("{}:{}", client_address, policy_name)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
