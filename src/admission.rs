//! Admission predicates: SSRF guard, x402-upstream probe, agent blocklist, API-key check
//! (spec `§4.9`).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};
use std::time::Duration;
use url::Url;

use crate::error::RouteError;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Classifies whether an IP address is publicly routable. Used by the SSRF guard at
/// route-compile time (spec `§4.9`).
pub fn is_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => is_public_v6(v6),
    }
}

fn is_public_v4(ip: Ipv4Addr) -> bool {
    !(ip.is_loopback()
        || ip.is_link_local()
        || ip.is_private()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        || ip.is_unspecified()
        || is_cgnat_v4(ip))
}

fn is_cgnat_v4(ip: Ipv4Addr) -> bool {
    // 100.64.0.0/10, RFC 6598 carrier-grade NAT.
    let octets = ip.octets();
    octets[0] == 100 && (64..=127).contains(&octets[1])
}

fn is_public_v6(ip: Ipv6Addr) -> bool {
    !(ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        || is_unique_local_v6(ip)
        || is_link_local_v6(ip))
}

fn is_unique_local_v6(ip: Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xfe00) == 0xfc00
}

fn is_link_local_v6(ip: Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

/// Resolves `backend_url`'s host and rejects it unless every resolved address is public,
/// or `skip` is set (the `_skipSsrf` admin escape hatch, spec `§9`).
pub fn check_ssrf(backend_url: &str, skip: bool) -> Result<(), RouteError> {
    if skip {
        return Ok(());
    }
    let url = Url::parse(backend_url).map_err(|e| RouteError::InvalidUrl(e.to_string()))?;
    let host = url.host_str().ok_or_else(|| RouteError::InvalidUrl(backend_url.to_string()))?;
    if let Ok(ip) = host.parse::<IpAddr>() {
        if !is_public_ip(ip) {
            return Err(RouteError::SsrfBlocked(backend_url.to_string()));
        }
        return Ok(());
    }
    let port = url.port_or_known_default().unwrap_or(443);
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|_| RouteError::UnresolvableHost(host.to_string()))?;
    let mut any = false;
    for addr in addrs {
        any = true;
        if !is_public_ip(addr.ip()) {
            return Err(RouteError::SsrfBlocked(backend_url.to_string()));
        }
    }
    if !any {
        return Err(RouteError::UnresolvableHost(host.to_string()));
    }
    Ok(())
}

/// Probes the upstream's registered path to see if it already speaks x402 itself. If it
/// does, registering it behind this gateway would double-charge callers, so the route is
/// refused. Transport errors are treated as "unknown -> allow" (spec `§4.9`).
pub async fn probe_x402_upstream(backend_url: &str, path: &str) -> Result<(), RouteError> {
    let probe_path: String = path
        .split('/')
        .map(|seg| if seg.starts_with(':') { "probe" } else { seg })
        .collect::<Vec<_>>()
        .join("/");
    let url = format!("{}{}", backend_url.trim_end_matches('/'), probe_path);
    let client = reqwest::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()
        .map_err(|e| RouteError::InvalidUrl(e.to_string()))?;
    let response = match client.get(&url).send().await {
        Ok(resp) => resp,
        Err(_) => return Ok(()),
    };
    if response.status().as_u16() == 402 && response.headers().contains_key("payment-required") {
        return Err(RouteError::X402UpstreamBlocked);
    }
    Ok(())
}

/// Compares the lowercased agent address against a persisted blocklist.
pub fn is_agent_blocked(agent_address: &str, blocklist: &std::collections::HashSet<String>) -> bool {
    blocklist.contains(&agent_address.to_ascii_lowercase())
}

/// Constant-time check of `Authorization: Bearer <key>` or `X-Api-Key` against the
/// configured API key. Returns `true` (admit) if no key is configured.
pub fn check_api_key(bearer: Option<&str>, api_key_header: Option<&str>, configured: Option<&str>) -> bool {
    let Some(configured) = configured else {
        return true;
    };
    let candidate = bearer.or(api_key_header);
    match candidate {
        Some(candidate) => constant_time_eq(configured.as_bytes(), candidate.as_bytes()),
        None => false,
    }
}

/// Compares two byte strings in time independent of where they first differ, so that
/// invalid API keys cannot be brute-forced via response-time side channels.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_is_not_public() {
        assert!(!is_public_ip("127.0.0.1".parse().unwrap()));
        assert!(!is_public_ip("::1".parse().unwrap()));
    }

    #[test]
    fn rfc1918_is_not_public() {
        assert!(!is_public_ip("10.0.0.5".parse().unwrap()));
        assert!(!is_public_ip("192.168.1.1".parse().unwrap()));
        assert!(!is_public_ip("172.16.0.1".parse().unwrap()));
    }

    #[test]
    fn cgnat_range_is_not_public() {
        assert!(!is_public_ip("100.64.0.1".parse().unwrap()));
        assert!(is_public_ip("100.63.255.255".parse().unwrap()));
    }

    #[test]
    fn a_real_public_address_passes() {
        assert!(is_public_ip("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn ssrf_guard_rejects_loopback_literal() {
        let err = check_ssrf("http://127.0.0.1:9000", false).unwrap_err();
        assert!(matches!(err, RouteError::SsrfBlocked(_)));
    }

    #[test]
    fn ssrf_guard_skip_flag_bypasses_check() {
        check_ssrf("http://127.0.0.1:9000", true).unwrap();
    }

    #[test]
    fn blocklist_comparison_is_case_insensitive() {
        let blocklist = std::collections::HashSet::from(["0xdead".to_string()]);
        assert!(is_agent_blocked("0xDEAD", &blocklist));
    }

    #[test]
    fn api_key_passes_when_unconfigured() {
        assert!(check_api_key(None, None, None));
    }

    #[test]
    fn api_key_rejects_wrong_value() {
        assert!(!check_api_key(Some("wrong"), None, Some("right")));
    }

    #[test]
    fn api_key_accepts_matching_bearer() {
        assert!(check_api_key(Some("right"), None, Some("right")));
    }
}
