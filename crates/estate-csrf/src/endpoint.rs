//! `GET /csrf-token`: idempotent token bootstrap.
//!
//! Clients call this once on startup. When the request already carries a
//! secret cookie its value is returned unchanged; otherwise a token is minted,
//! the cookie pair is issued, and the same value is returned in the body.

use crate::config::CsrfConfig;
use crate::cookies::{issue, read_cookie};
use crate::response;
use crate::token::CsrfToken;
use bytes::Bytes;
use http::{header, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::Full;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::future::{ready, Ready};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// Body of a successful token response: `{"csrfToken": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    /// The token the client should echo in the CSRF header.
    pub csrf_token: String,
}

/// Build the token endpoint response for `req`.
///
/// When the request has no secret cookie, the token minted by
/// [`CsrfLayer`](crate::CsrfLayer) for this request (found in the request
/// extensions) is reused so the body and the issued cookies agree.
pub fn token_response<ReqBody, ResBody>(req: &Request<ReqBody>, config: &CsrfConfig) -> Response<ResBody>
where
    ResBody: From<Bytes>,
{
    if !matches!(*req.method(), Method::GET | Method::HEAD) {
        let mut res = Response::new(ResBody::from(Bytes::new()));
        *res.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        res.headers_mut()
            .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
        return res;
    }

    let existing = read_cookie(req.headers(), &config.secret_cookie_name)
        .filter(|value| !value.is_empty());

    let (token, needs_cookies) = match existing {
        Some(value) => (CsrfToken::new(value), false),
        None => {
            let token = req
                .extensions()
                .get::<CsrfToken>()
                .cloned()
                .unwrap_or_else(CsrfToken::generate);
            (token, true)
        }
    };

    let body = TokenResponse {
        csrf_token: token.to_string(),
    };
    let mut res = response::json(StatusCode::OK, &body, br#"{"csrfToken":""}"#);
    res.headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    if needs_cookies {
        issue(req, &mut res, &token, config);
    }

    res
}

/// Tower service answering the token endpoint.
///
/// Routing to this service (matching [`CsrfConfig::token_path`]) is the
/// caller's job; it answers every request it receives.
#[derive(Clone, Debug)]
pub struct CsrfTokenService {
    config: Arc<CsrfConfig>,
}

impl CsrfTokenService {
    /// Create the endpoint service.
    pub fn new(config: CsrfConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl<ReqBody> Service<Request<ReqBody>> for CsrfTokenService {
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        ready(Ok(token_response(&req, &self.config)))
    }
}
