//! The per-request decision engine.
//!
//! [`evaluate`] is a pure function of the request method, path, cookie state
//! and header. The layer supplies those facts and applies the verdict; the
//! cookie issuance side effect stays in the layer.

use crate::config::CsrfConfig;
use crate::error::CsrfError;
use http::Method;
use std::borrow::Cow;
use subtle::ConstantTimeEq;

/// Outcome of evaluating one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Pass the request to the inner service.
    Allow,
    /// Answer with a 403 carrying this error.
    Reject(CsrfError),
}

/// The secret cookie as seen by the decision engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieState<'a> {
    /// The request carried a non-empty secret cookie.
    Present(&'a str),
    /// The request carried none; this value was minted for the response.
    Minted(&'a str),
}

impl<'a> CookieState<'a> {
    fn value(self) -> &'a str {
        match self {
            Self::Present(value) | Self::Minted(value) => value,
        }
    }
}

/// `GET`, `HEAD` and `OPTIONS` never mutate state.
pub fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Whether `path` falls under the guarded mutation-API prefix.
pub fn is_guarded(config: &CsrfConfig, path: &str) -> bool {
    path.starts_with(&config.guarded_prefix)
}

/// Whether `path` names only exempt bootstrap operations.
///
/// The operation segment is the path with the guarded prefix removed. A
/// batched call lists several operations separated by `,`; every one of them
/// must be exempt. Matching is exact, never by substring.
pub fn is_exempt(config: &CsrfConfig, path: &str) -> bool {
    let Some(segment) = path.strip_prefix(&config.guarded_prefix) else {
        return false;
    };

    let segment = urlencoding::decode(segment).unwrap_or(Cow::Borrowed(segment));
    segment
        .split(',')
        .map(str::trim)
        .all(|op| !op.is_empty() && config.exempt_operations.contains(op))
}

/// Compare two tokens without leaking where they first differ.
///
/// Lengths are compared first; token length is public by construction.
pub fn tokens_match(expected: impl AsRef<[u8]>, provided: impl AsRef<[u8]>) -> bool {
    let (expected, provided) = (expected.as_ref(), provided.as_ref());
    if expected.len() != provided.len() {
        return false;
    }
    expected.ct_eq(provided).into()
}

/// Check the echoed header against the secret cookie.
///
/// The header is taken as raw bytes: a value that is not visible ASCII is
/// still a present, wrong token.
pub fn verify(cookie: Option<&str>, header: Option<&[u8]>) -> Result<(), CsrfError> {
    let cookie = cookie.filter(|v| !v.is_empty());
    let header = header.filter(|v| !v.is_empty());

    match (cookie, header) {
        (Some(cookie), Some(header)) if tokens_match(cookie, header) => Ok(()),
        (Some(_), Some(_)) => Err(CsrfError::Invalid),
        _ => Err(CsrfError::Missing),
    }
}

/// Decide whether a request may proceed.
pub fn evaluate(
    config: &CsrfConfig,
    method: &Method,
    path: &str,
    cookie: CookieState<'_>,
    header: Option<&[u8]>,
) -> Verdict {
    let safe = is_safe_method(method);

    if let CookieState::Minted(_) = cookie {
        if safe || is_exempt(config, path) {
            return Verdict::Allow;
        }
    }

    if safe || !is_guarded(config, path) {
        return Verdict::Allow;
    }

    match verify(Some(cookie.value()), header) {
        Ok(()) => Verdict::Allow,
        Err(err) => Verdict::Reject(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn config() -> CsrfConfig {
        CsrfConfig::default()
    }

    #[test]
    fn test_safe_methods_always_allowed() {
        for method in [Method::GET, Method::HEAD, Method::OPTIONS] {
            for cookie in [CookieState::Present(A), CookieState::Minted(A)] {
                assert_eq!(
                    evaluate(&config(), &method, "/api/trpc/listing.create", cookie, None),
                    Verdict::Allow
                );
            }
        }
    }

    #[test]
    fn test_unguarded_paths_pass() {
        let verdict = evaluate(
            &config(),
            &Method::POST,
            "/webhooks/payments",
            CookieState::Present(A),
            Some(B.as_bytes()),
        );
        assert_eq!(verdict, Verdict::Allow);
    }

    #[test]
    fn test_guarded_post_outcomes() {
        let path = "/api/trpc/listing.create";
        let cfg = config();
        let run = |cookie, header| evaluate(&cfg, &Method::POST, path, cookie, header);

        assert_eq!(
            run(CookieState::Present(A), None),
            Verdict::Reject(CsrfError::Missing)
        );
        assert_eq!(
            run(CookieState::Present(A), Some(&b""[..])),
            Verdict::Reject(CsrfError::Missing)
        );
        assert_eq!(
            run(CookieState::Present(A), Some(B.as_bytes())),
            Verdict::Reject(CsrfError::Invalid)
        );
        assert_eq!(
            run(CookieState::Present(A), Some(&b"abc"[..])),
            Verdict::Reject(CsrfError::Invalid)
        );
        assert_eq!(run(CookieState::Present(A), Some(A.as_bytes())), Verdict::Allow);
    }

    #[test]
    fn test_first_contact_mutation_is_blocked() {
        let cfg = config();
        assert_eq!(
            evaluate(&cfg, &Method::POST, "/api/trpc/listing.create", CookieState::Minted(A), None),
            Verdict::Reject(CsrfError::Missing)
        );
        assert_eq!(
            evaluate(&cfg, &Method::POST, "/api/trpc/listing.create", CookieState::Minted(A), Some(B.as_bytes())),
            Verdict::Reject(CsrfError::Invalid)
        );
    }

    #[test]
    fn test_exempt_only_without_cookie() {
        let cfg = config();
        let path = "/api/trpc/auth.login";

        assert_eq!(
            evaluate(&cfg, &Method::POST, path, CookieState::Minted(A), None),
            Verdict::Allow
        );
        assert_eq!(
            evaluate(&cfg, &Method::POST, path, CookieState::Present(A), None),
            Verdict::Reject(CsrfError::Missing)
        );
        assert_eq!(
            evaluate(&cfg, &Method::POST, path, CookieState::Present(A), Some(B.as_bytes())),
            Verdict::Reject(CsrfError::Invalid)
        );
        assert_eq!(
            evaluate(&cfg, &Method::POST, path, CookieState::Present(A), Some(A.as_bytes())),
            Verdict::Allow
        );
    }

    #[test]
    fn test_exemption_is_exact() {
        let cfg = config();
        assert!(is_exempt(&cfg, "/api/trpc/auth.login"));
        assert!(is_exempt(&cfg, "/api/trpc/auth.login,auth.register"));
        assert!(is_exempt(&cfg, "/api/trpc/auth.login%2Cauth.logout"));
        assert!(!is_exempt(&cfg, "/api/trpc/auth.loginAsAdmin"));
        assert!(!is_exempt(&cfg, "/api/trpc/admin.auth.login"));
        assert!(!is_exempt(&cfg, "/api/trpc/auth.login,listing.delete"));
        assert!(!is_exempt(&cfg, "/api/trpc/"));
        assert!(!is_exempt(&cfg, "/auth.login"));
    }

    #[test]
    fn test_tokens_match() {
        assert!(tokens_match(A, A));
        assert!(!tokens_match(A, B));
        assert!(!tokens_match(A, "a"));
        assert!(!tokens_match("", A));
        assert!(!tokens_match(A, b"\xffaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"));
    }

    #[test]
    fn test_non_ascii_header_is_invalid_not_missing() {
        let cfg = config();
        let header: &[u8] = b"caf\xc3\xa9";
        assert_eq!(verify(Some(A), Some(header)), Err(CsrfError::Invalid));
        assert_eq!(
            evaluate(&cfg, &Method::POST, "/api/trpc/listing.create", CookieState::Present(A), Some(header)),
            Verdict::Reject(CsrfError::Invalid)
        );
    }

    proptest! {
        #[test]
        fn prop_differing_lengths_are_invalid(
            cookie in "[a-f0-9]{64}",
            header in "[a-f0-9]{1,63}|[a-f0-9]{65,128}",
        ) {
            prop_assert_eq!(verify(Some(&cookie), Some(header.as_bytes())), Err(CsrfError::Invalid));
        }

        #[test]
        fn prop_identical_tokens_verify(token in "[a-f0-9]{64}") {
            prop_assert_eq!(verify(Some(&token), Some(token.as_bytes())), Ok(()));
        }
    }
}
