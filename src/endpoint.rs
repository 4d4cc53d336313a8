//! Sidecar endpoint parsing
//!
//! Thanos sidecar endpoints arrive as gRPC target strings such as
//! `dns:///thanos-sidecar-0.monitoring.svc:10901`. The TLS server name the
//! querier presents during the handshake is the target with its scheme
//! stripped, so the address must be split into scheme and host explicitly
//! rather than sliced at a fixed offset.

use crate::error::{OperatorError, Result};

/// Derive the TLS server name from a sidecar endpoint string.
///
/// The endpoint must carry an explicit scheme (`dns://`, `http://`, ...).
/// Leading slashes after the separator are dropped so that authority-less
/// gRPC targets (`dns:///host:port`) resolve to `host:port`.
///
/// Returns [`OperatorError::InvalidEndpoint`] when the scheme separator is
/// missing or either side of it is empty.
pub fn tls_server_name(endpoint: &str) -> Result<&str> {
    let (scheme, rest) = endpoint
        .split_once("://")
        .ok_or_else(|| invalid(endpoint, "missing '://' scheme separator"))?;
    if scheme.is_empty() {
        return Err(invalid(endpoint, "empty scheme"));
    }
    let host = rest.trim_start_matches('/');
    if host.is_empty() {
        return Err(invalid(endpoint, "empty host"));
    }
    Ok(host)
}

fn invalid(endpoint: &str, reason: &str) -> OperatorError {
    OperatorError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns_target() {
        assert_eq!(
            tls_server_name("dns:///sidecar-0.ns.svc:10901").unwrap(),
            "sidecar-0.ns.svc:10901"
        );
    }

    #[test]
    fn test_plain_scheme() {
        assert_eq!(
            tls_server_name("http://sidecar-0.ns.svc:10901").unwrap(),
            "sidecar-0.ns.svc:10901"
        );
    }

    #[test]
    fn test_missing_separator() {
        let err = tls_server_name("sidecar-0.ns.svc:10901").unwrap_err();
        assert!(matches!(err, OperatorError::InvalidEndpoint { .. }));
        assert!(err.to_string().contains("scheme separator"));
    }

    #[test]
    fn test_empty_scheme() {
        let err = tls_server_name("://sidecar-0.ns.svc:10901").unwrap_err();
        assert!(err.to_string().contains("empty scheme"));
    }

    #[test]
    fn test_empty_host() {
        for endpoint in ["dns:///", "dns://", "https://"] {
            let err = tls_server_name(endpoint).unwrap_err();
            assert!(err.to_string().contains("empty host"), "{}", endpoint);
        }
    }

    #[test]
    fn test_short_input_is_rejected_not_sliced() {
        // Inputs shorter than any assumed prefix must fail cleanly.
        for endpoint in ["", "d", "dns:"] {
            assert!(tls_server_name(endpoint).is_err(), "{:?}", endpoint);
        }
    }
}
