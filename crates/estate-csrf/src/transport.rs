//! Secure-transport detection.
//!
//! Cookies must not claim `Secure` on plaintext connections, but behind a
//! TLS-terminating proxy the origin connection is legitimately plaintext.

use http::{HeaderMap, Request, Uri};

/// Header set by reverse proxies and load balancers.
pub const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Whether the request arrived over TLS, directly or via a trusted proxy.
pub fn is_secure<B>(req: &Request<B>) -> bool {
    is_secure_parts(req.uri(), req.headers())
}

/// [`is_secure`] for callers holding the URI and headers separately.
pub fn is_secure_parts(uri: &Uri, headers: &HeaderMap) -> bool {
    if uri.scheme_str() == Some("https") {
        return true;
    }

    headers
        .get_all(FORWARDED_PROTO)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|proto| proto.trim().eq_ignore_ascii_case("https"))
}
