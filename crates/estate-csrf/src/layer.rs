//! Tower layer enforcing the double-submit check.

use crate::config::CsrfConfig;
use crate::cookies::{issue_cookies, read_cookie};
use crate::policy::{evaluate, CookieState, Verdict};
use crate::token::CsrfToken;
use crate::transport;
use bytes::Bytes;
use http::{Request, Response};
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tower::{Layer, Service};

/// Middleware for CSRF protection using the Double-Submit Cookie pattern.
///
/// Every request without a secret cookie gets a freshly minted cookie pair on
/// its response, whether or not it is allowed through. Guarded non-safe
/// requests must echo the cookie value in the configured header.
#[derive(Clone, Debug)]
pub struct CsrfLayer {
    config: Arc<CsrfConfig>,
}

impl CsrfLayer {
    /// Create a new CSRF middleware layer.
    pub fn new(config: CsrfConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// The configuration shared by every service this layer builds.
    pub fn config(&self) -> &CsrfConfig {
        &self.config
    }
}

impl Default for CsrfLayer {
    fn default() -> Self {
        Self::new(CsrfConfig::default())
    }
}

impl<S> Layer<S> for CsrfLayer {
    type Service = CsrfService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CsrfService {
            inner,
            config: self.config.clone(),
        }
    }
}

/// Service produced by [`CsrfLayer`].
#[derive(Clone, Debug)]
pub struct CsrfService<S> {
    inner: S,
    config: Arc<CsrfConfig>,
}

impl<S> CsrfService<S> {
    /// Wrap `inner` with CSRF validation.
    pub fn new(inner: S, config: CsrfConfig) -> Self {
        Self {
            inner,
            config: Arc::new(config),
        }
    }
}

struct PendingIssue {
    token: CsrfToken,
    secure: bool,
    config: Arc<CsrfConfig>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CsrfService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    ResBody: From<Bytes>,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let config = &self.config;

        // 1. Existing secret cookie, if any
        let existing = read_cookie(req.headers(), &config.secret_cookie_name)
            .filter(|value| !value.is_empty());

        // 2. Mint when absent; the pair goes out on whatever response we produce
        let (token, minted) = match existing {
            Some(value) => (CsrfToken::new(value), false),
            None => (CsrfToken::generate(), true),
        };

        let issue = minted.then(|| PendingIssue {
            token: token.clone(),
            secure: transport::is_secure(&req),
            config: config.clone(),
        });

        if minted {
            tracing::debug!(path = %req.uri().path(), "Minted CSRF token");
        }

        // 3-5. Decide
        let cookie = if minted {
            CookieState::Minted(token.as_str())
        } else {
            CookieState::Present(token.as_str())
        };
        let header = req
            .headers()
            .get(&config.header_name)
            .map(|value| value.as_bytes());
        let verdict = evaluate(config, req.method(), req.uri().path(), cookie, header);

        match verdict {
            Verdict::Allow => {
                // Handlers (notably the token endpoint) see the value we will issue
                req.extensions_mut().insert(token);

                ResponseFuture {
                    kind: Kind::Inner {
                        future: self.inner.call(req),
                    },
                    issue,
                }
            }
            Verdict::Reject(err) => {
                tracing::warn!(
                    method = %req.method(),
                    path = %req.uri().path(),
                    code = %err.code(),
                    "CSRF validation failed"
                );

                ResponseFuture {
                    kind: Kind::Rejected {
                        response: Some(err.into_response()),
                    },
                    issue,
                }
            }
        }
    }
}

pin_project! {
    /// Response future for [`CsrfService`].
    pub struct ResponseFuture<F, B> {
        #[pin]
        kind: Kind<F, B>,
        issue: Option<PendingIssue>,
    }
}

pin_project! {
    #[project = KindProj]
    enum Kind<F, B> {
        Inner {
            #[pin]
            future: F,
        },
        Rejected {
            response: Option<Response<B>>,
        },
    }
}

impl<F, B, E> Future for ResponseFuture<F, B>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = Result<Response<B>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let mut response = match this.kind.project() {
            KindProj::Inner { future } => ready!(future.poll(cx))?,
            KindProj::Rejected { response } => response
                .take()
                .expect("ResponseFuture polled after completion"),
        };

        if let Some(issue) = this.issue.take() {
            issue_cookies(
                response.headers_mut(),
                &issue.token,
                issue.secure,
                &issue.config,
            );
        }

        Poll::Ready(Ok(response))
    }
}
