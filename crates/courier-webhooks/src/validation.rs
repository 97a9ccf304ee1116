//! Input validation for endpoints and ingested events.
//!
//! Endpoint URLs are checked for scheme and, unless private targets are
//! allowed, for hosts that resolve to internal networks (SSRF protection).

use std::net::IpAddr;

use crate::error::WebhookError;

/// Longest accepted event type.
pub const MAX_EVENT_TYPE_LEN: usize = 255;

/// Validate an endpoint target URL.
///
/// With `allow_private` set (development, tests), plain HTTP and internal
/// hosts are accepted.
pub fn validate_target_url(url: &str, allow_private: bool) -> Result<(), WebhookError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| WebhookError::InvalidUrl(format!("Invalid URL format: {e}")))?;

    match parsed.scheme() {
        "https" => {}
        "http" if allow_private => {}
        "http" => {
            return Err(WebhookError::InvalidUrl(
                "Endpoint URLs must use HTTPS".to_string(),
            ));
        }
        scheme => {
            return Err(WebhookError::InvalidUrl(format!(
                "Unsupported URL scheme: {scheme}"
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| WebhookError::InvalidUrl("URL must have a host".to_string()))?;

    if !allow_private {
        validate_host_not_internal(host)?;
    }
    Ok(())
}

/// Reject loopback, private, link-local and CGNAT addresses and internal hostnames.
pub fn validate_host_not_internal(host: &str) -> Result<(), WebhookError> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        if is_internal_ip(&ip) {
            return Err(WebhookError::SsrfDetected(format!(
                "Destination host {host} is a private/internal address"
            )));
        }
    }

    let lower = host.to_ascii_lowercase();
    if lower == "localhost" || lower.ends_with(".internal") || lower.ends_with(".local") {
        return Err(WebhookError::SsrfDetected(format!(
            "Destination host {host} is a restricted internal hostname"
        )));
    }
    Ok(())
}

fn is_internal_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64) // 100.64.0.0/10
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

/// Event types are free-form but must be non-blank, bounded and whitespace-free.
pub fn validate_event_type(event_type: &str) -> Result<(), WebhookError> {
    if event_type.trim().is_empty() {
        return Err(WebhookError::Validation(
            "Event type is required".to_string(),
        ));
    }
    if event_type.len() > MAX_EVENT_TYPE_LEN {
        return Err(WebhookError::Validation(format!(
            "Event type exceeds {MAX_EVENT_TYPE_LEN} characters"
        )));
    }
    if event_type.chars().any(char::is_whitespace) {
        return Err(WebhookError::Validation(format!(
            "Event type must not contain whitespace: {event_type:?}"
        )));
    }
    Ok(())
}
