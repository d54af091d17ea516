//! Authentication/authorization precedence (spec §4.8).
//!
//! Four rules, first match wins: unset server key + loopback peer; a
//! matching `Authorization: Bearer`/`x-api-key` header; peer IP on the
//! whitelist and not on the blacklist; otherwise deny.

use std::net::IpAddr;

use axum::http::HeaderMap;

use crate::config::AppConfig;

/// Extract the caller-presented API key from either header the Anthropic
/// and OpenAI-style clients use.
#[must_use]
pub fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(key.to_string());
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Plain membership check against an IP-gating list. Entries are either a
/// literal address or `"*"` to match any peer.
#[must_use]
pub fn ip_in_list(addr: IpAddr, list: &[String]) -> bool {
    list.iter().any(|entry| entry == "*" || entry.parse::<IpAddr>() == Ok(addr))
}

/// Decide whether a request from `peer` carrying `headers` is admitted,
/// per spec §4.8's four-rule cascade.
#[must_use]
pub fn is_authorized(config: &AppConfig, headers: &HeaderMap, peer: IpAddr) -> bool {
    let unset_and_loopback = config.server.apikey.is_none() && peer.is_loopback();
    let key_matches = config
        .server
        .apikey
        .as_deref()
        .is_some_and(|configured| extract_api_key(headers).as_deref() == Some(configured));
    let ip_gated_allow =
        ip_in_list(peer, &config.ip_gating.whitelist) && !ip_in_list(peer, &config.ip_gating.blacklist);

    unset_and_loopback || key_matches || ip_gated_allow
}

/// Whether a denied peer should see `403` instead of `401` (spec §4.8 rule
/// 4's "or `403` if blacklisted" carve-out).
#[must_use]
pub fn is_blacklisted(config: &AppConfig, peer: IpAddr) -> bool {
    ip_in_list(peer, &config.ip_gating.blacklist)
}
