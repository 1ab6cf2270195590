//! The client-side token provider.

use crate::error::FetchError;
use crate::fetcher::TokenFetcher;
use crate::source::CookieSource;
use estate_csrf::config::{DEFAULT_HEADER, DEFAULT_READABLE_COOKIE};
use estate_csrf::{CsrfConfig, CsrfErrorCode, ErrorResponse};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, warn};

type Bootstrap = Shared<BoxFuture<'static, ()>>;

/// Supplies the CSRF token to attach to outgoing mutating requests.
///
/// A bootstrap fetch against the token endpoint starts as soon as the
/// provider is constructed. [`token`](Self::token) prefers the live readable
/// cookie and only falls back to the bootstrap when the cookie is absent;
/// concurrent callers share one in-flight fetch.
///
/// Cloning is cheap and clones share state.
///
/// ```rust,ignore
/// let fetcher = HttpTokenFetcher::new(origin, "/csrf-token")?;
/// let provider = TokenProvider::new(fetcher.clone(), fetcher.clone());
///
/// let mut headers = HeaderMap::new();
/// provider.attach(&mut headers).await;
/// ```
#[derive(Clone)]
pub struct TokenProvider {
    inner: Arc<Inner>,
}

struct Inner {
    cookies: Box<dyn CookieSource>,
    fetcher: Arc<dyn TokenFetcher>,
    cookie_name: String,
    header_name: HeaderName,
    state: Mutex<State>,
}

/// `inflight`, when set, always belongs to the current `generation`.
#[derive(Default)]
struct State {
    generation: u64,
    inflight: Option<Bootstrap>,
    cached: Option<String>,
}

impl TokenProvider {
    /// Create a provider using the default cookie and header names, and start
    /// the bootstrap fetch.
    ///
    /// When called inside a Tokio runtime the fetch is spawned immediately;
    /// otherwise it starts on the first call to [`token`](Self::token).
    pub fn new(cookies: impl CookieSource, fetcher: impl TokenFetcher) -> Self {
        Self::build(
            cookies,
            fetcher,
            DEFAULT_READABLE_COOKIE.to_string(),
            HeaderName::from_static(DEFAULT_HEADER),
        )
    }

    /// Create a provider using the names from a server configuration.
    pub fn with_config(
        cookies: impl CookieSource,
        fetcher: impl TokenFetcher,
        config: &CsrfConfig,
    ) -> Self {
        let header_name = HeaderName::try_from(config.header_name.as_str()).unwrap_or_else(|_| {
            warn!(header = %config.header_name, "Invalid CSRF header name, using default");
            HeaderName::from_static(DEFAULT_HEADER)
        });
        Self::build(
            cookies,
            fetcher,
            config.readable_cookie_name.clone(),
            header_name,
        )
    }

    fn build(
        cookies: impl CookieSource,
        fetcher: impl TokenFetcher,
        cookie_name: String,
        header_name: HeaderName,
    ) -> Self {
        let provider = Self {
            inner: Arc::new(Inner {
                cookies: Box::new(cookies),
                fetcher: Arc::new(fetcher),
                cookie_name,
                header_name,
                state: Mutex::new(State::default()),
            }),
        };
        {
            let mut state = provider.inner.lock();
            provider.start_bootstrap(&mut state);
        }
        provider
    }

    /// The token to send with the next mutating request.
    ///
    /// Returns the live readable cookie if set. Otherwise waits for the
    /// bootstrap (joining one already in flight), re-reads the cookie, and
    /// falls back to the value that bootstrap fetched. If [`reset`](Self::reset)
    /// supersedes the bootstrap while waiting, the newer one is awaited
    /// instead. Returns an empty string when everything failed; the server
    /// will then reject the request with `CSRF_TOKEN_MISSING`. Never errors.
    pub async fn token(&self) -> String {
        loop {
            if let Some(token) = self.live_cookie() {
                return token;
            }

            let (bootstrap, generation) = {
                let mut state = self.inner.lock();
                let bootstrap = match &state.inflight {
                    Some(inflight) => inflight.clone(),
                    None => self.start_bootstrap(&mut state),
                };
                (bootstrap, state.generation)
            };
            bootstrap.await;

            if let Some(token) = self.live_cookie() {
                return token;
            }

            let state = self.inner.lock();
            if state.generation == generation {
                return state.cached.clone().unwrap_or_default();
            }
        }
    }

    /// Forget the cached token and start a fresh bootstrap.
    ///
    /// A fetch already in flight is not cancelled, but its result is
    /// discarded.
    pub fn reset(&self) {
        let mut state = self.inner.lock();
        state.cached = None;
        state.inflight = None;
        self.start_bootstrap(&mut state);
    }

    /// Set the CSRF header on an outgoing request. Leaves `headers` untouched
    /// when no token is available.
    pub async fn attach(&self, headers: &mut HeaderMap) {
        let token = self.token().await;
        if token.is_empty() {
            return;
        }
        match HeaderValue::from_str(&token) {
            Ok(value) => {
                headers.insert(self.inner.header_name.clone(), value);
            }
            Err(_) => warn!("CSRF token is not a valid header value"),
        }
    }

    /// Inspect a failed response. If it is a CSRF rejection, reset the
    /// provider and return the rejection code so the caller can decide
    /// whether to retry.
    ///
    /// The provider never resubmits requests itself.
    pub fn handle_rejection(&self, status: StatusCode, body: &[u8]) -> Option<CsrfErrorCode> {
        let code = rejection_code(status, body)?;
        debug!(code = %code, "CSRF rejection observed, refreshing token");
        self.reset();
        Some(code)
    }

    /// Name of the header [`attach`](Self::attach) sets.
    pub fn header_name(&self) -> &HeaderName {
        &self.inner.header_name
    }

    fn live_cookie(&self) -> Option<String> {
        self.inner
            .cookies
            .cookie(&self.inner.cookie_name)
            .filter(|value| !value.is_empty())
    }

    /// Stored futures hold only a `Weak` back-reference, so a dropped
    /// provider is freed even if its bootstrap never ran.
    fn start_bootstrap(&self, state: &mut State) -> Bootstrap {
        state.generation = state.generation.wrapping_add(1);
        let generation = state.generation;
        let inner = Arc::downgrade(&self.inner);
        let fetcher = self.inner.fetcher.clone();

        let bootstrap = match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let task = handle.spawn(async move { fetcher.fetch_token().await });
                async move {
                    let outcome = task
                        .await
                        .unwrap_or_else(|err| Err(FetchError::Aborted(err.to_string())));
                    settle(&inner, generation, outcome);
                }
                .boxed()
            }
            Err(_) => async move {
                let outcome = AssertUnwindSafe(fetcher.fetch_token())
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(FetchError::Aborted("fetcher panicked".into())));
                settle(&inner, generation, outcome);
            }
            .boxed(),
        };

        let bootstrap = bootstrap.shared();
        state.inflight = Some(bootstrap.clone());
        bootstrap
    }
}

/// Record a bootstrap outcome unless a newer generation superseded it. A
/// failure clears `inflight` so the next caller retries.
fn settle(inner: &Weak<Inner>, generation: u64, outcome: Result<String, FetchError>) {
    if let Err(err) = &outcome {
        warn!(error = %err, "CSRF token bootstrap failed");
    }

    let Some(inner) = inner.upgrade() else {
        return;
    };
    let mut state = inner.lock();
    if state.generation != generation {
        debug!("Discarding superseded CSRF bootstrap");
        return;
    }

    match outcome {
        Ok(token) => state.cached = Some(token),
        Err(_) => state.inflight = None,
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenProvider")
            .field("cookie_name", &self.inner.cookie_name)
            .field("header_name", &self.inner.header_name)
            .finish_non_exhaustive()
    }
}

/// Classify a failed response as a CSRF rejection.
///
/// Only a 403 whose JSON body carries `CSRF_TOKEN_MISSING` or
/// `CSRF_TOKEN_INVALID` counts.
pub fn rejection_code(status: StatusCode, body: &[u8]) -> Option<CsrfErrorCode> {
    if status != StatusCode::FORBIDDEN {
        return None;
    }
    serde_json::from_slice::<ErrorResponse>(body)
        .ok()
        .map(|response| response.error.code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::source::MemoryCookies;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Answers with numbered tokens after `delay`. The first `failures` calls
    /// fail and the first `panics` calls panic; a `stall` delay applies to the
    /// first call only. Each token is written into the shared cookie store.
    struct StubFetcher {
        calls: Arc<AtomicUsize>,
        failures: usize,
        panics: usize,
        delay: Duration,
        stall: Option<Duration>,
        cookies: Option<Arc<MemoryCookies>>,
    }

    impl StubFetcher {
        fn new(calls: Arc<AtomicUsize>) -> Self {
            Self {
                calls,
                failures: 0,
                panics: 0,
                delay: Duration::from_millis(20),
                stall: None,
                cookies: None,
            }
        }
    }

    #[async_trait]
    impl TokenFetcher for StubFetcher {
        async fn fetch_token(&self) -> Result<String, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let delay = match self.stall {
                Some(stall) if n == 1 => stall,
                _ => self.delay,
            };
            tokio::time::sleep(delay).await;
            if n <= self.panics {
                panic!("fetcher blew up on call {n}");
            }
            if n <= self.failures {
                return Err(FetchError::Other("offline".into()));
            }
            let token = format!("token-{n}");
            if let Some(cookies) = &self.cookies {
                cookies.set(DEFAULT_READABLE_COOKIE, token.clone());
            }
            Ok(token)
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = TokenProvider::new(MemoryCookies::new(), StubFetcher::new(calls.clone()));

        let (a, b, c) = tokio::join!(provider.token(), provider.token(), provider.token());

        assert_eq!(a, "token-1");
        assert_eq!(b, "token-1");
        assert_eq!(c, "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Settled bootstrap is reused without another request.
        assert_eq!(provider.token().await, "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_live_cookie_wins_over_cached_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cookies = Arc::new(MemoryCookies::new());
        let provider = TokenProvider::new(cookies.clone(), StubFetcher::new(calls.clone()));

        assert_eq!(provider.token().await, "token-1");

        cookies.set(DEFAULT_READABLE_COOKIE, "rotated");
        assert_eq!(provider.token().await, "rotated");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cookie_present_skips_waiting() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cookies = Arc::new(MemoryCookies::new());
        cookies.set(DEFAULT_READABLE_COOKIE, "from-cookie");

        let mut fetcher = StubFetcher::new(calls.clone());
        fetcher.delay = Duration::from_secs(3600);
        let provider = TokenProvider::new(cookies, fetcher);

        let token = tokio::time::timeout(Duration::from_secs(1), provider.token())
            .await
            .expect("token() must not wait on the bootstrap");
        assert_eq!(token, "from-cookie");
    }

    #[tokio::test]
    async fn test_failed_bootstrap_yields_empty_then_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut fetcher = StubFetcher::new(calls.clone());
        fetcher.failures = 1;
        let provider = TokenProvider::new(MemoryCookies::new(), fetcher);

        assert_eq!(provider.token().await, "");
        assert_eq!(provider.token().await, "token-2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reset_forces_new_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = TokenProvider::new(MemoryCookies::new(), StubFetcher::new(calls.clone()));

        assert_eq!(provider.token().await, "token-1");
        provider.reset();
        assert_eq!(provider.token().await, "token-2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reset_discards_stale_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = TokenProvider::new(MemoryCookies::new(), StubFetcher::new(calls.clone()));

        // First fetch is still in flight when reset supersedes it.
        provider.reset();
        assert_eq!(provider.token().await, "token-2");

        // Give the stale task time to finish; it must not overwrite the cache.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(provider.token().await, "token-2");
    }

    #[tokio::test]
    async fn test_fetch_populates_cookie_store() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cookies = Arc::new(MemoryCookies::new());
        let mut fetcher = StubFetcher::new(calls.clone());
        fetcher.cookies = Some(cookies.clone());
        let provider = TokenProvider::new(cookies.clone(), fetcher);

        assert_eq!(provider.token().await, "token-1");
        assert_eq!(cookies.cookie(DEFAULT_READABLE_COOKIE).as_deref(), Some("token-1"));
    }

    #[tokio::test]
    async fn test_attach_sets_header() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = TokenProvider::new(MemoryCookies::new(), StubFetcher::new(calls));

        let mut headers = HeaderMap::new();
        provider.attach(&mut headers).await;
        assert_eq!(headers.get(DEFAULT_HEADER).unwrap(), "token-1");
    }

    #[tokio::test]
    async fn test_attach_skips_empty_token() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut fetcher = StubFetcher::new(calls);
        fetcher.failures = usize::MAX;
        let provider = TokenProvider::new(MemoryCookies::new(), fetcher);

        let mut headers = HeaderMap::new();
        provider.attach(&mut headers).await;
        assert!(headers.is_empty());
    }

    #[tokio::test]
    async fn test_custom_names_from_config() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cookies = MemoryCookies::new();
        cookies.set("xsrf", "abc");
        let config = CsrfConfig::new()
            .readable_cookie_name("xsrf")
            .header_name("X-XSRF");
        let provider = TokenProvider::with_config(cookies, StubFetcher::new(calls), &config);

        let mut headers = HeaderMap::new();
        provider.attach(&mut headers).await;
        assert_eq!(headers.get("x-xsrf").unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_handle_rejection_resets_on_csrf_codes_only() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = TokenProvider::new(MemoryCookies::new(), StubFetcher::new(calls.clone()));
        assert_eq!(provider.token().await, "token-1");

        let missing = br#"{"error":{"message":"CSRF token missing","code":"CSRF_TOKEN_MISSING"}}"#;
        assert_eq!(
            provider.handle_rejection(StatusCode::FORBIDDEN, missing),
            Some(CsrfErrorCode::CsrfTokenMissing)
        );
        assert_eq!(provider.token().await, "token-2");

        let other = br#"{"error":{"message":"nope","code":"FORBIDDEN"}}"#;
        assert_eq!(provider.handle_rejection(StatusCode::FORBIDDEN, other), None);
        assert_eq!(provider.handle_rejection(StatusCode::BAD_REQUEST, missing), None);
        assert_eq!(provider.token().await, "token-2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_rejection_code_classification() {
        let invalid = br#"{"error":{"message":"CSRF token invalid","code":"CSRF_TOKEN_INVALID"}}"#;
        assert_eq!(
            rejection_code(StatusCode::FORBIDDEN, invalid),
            Some(CsrfErrorCode::CsrfTokenInvalid)
        );
        assert_eq!(rejection_code(StatusCode::FORBIDDEN, b"not json"), None);
        assert_eq!(rejection_code(StatusCode::UNAUTHORIZED, invalid), None);
    }

    #[test]
    fn test_bootstrap_deferred_without_runtime() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut fetcher = StubFetcher::new(calls.clone());
        fetcher.delay = Duration::ZERO;
        let provider = TokenProvider::new(MemoryCookies::new(), fetcher);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        assert_eq!(rt.block_on(provider.token()), "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_fetch_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut fetcher = StubFetcher::new(calls.clone());
        fetcher.panics = 1;
        let provider = TokenProvider::new(MemoryCookies::new(), fetcher);

        assert_eq!(provider.token().await, "");
        assert_eq!(provider.token().await, "token-2");
        assert_eq!(provider.token().await, "token-2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_deferred_fetch_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut fetcher = StubFetcher::new(calls.clone());
        fetcher.panics = 1;
        fetcher.delay = Duration::ZERO;
        let provider = TokenProvider::new(MemoryCookies::new(), fetcher);

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        assert_eq!(rt.block_on(provider.token()), "");
        assert_eq!(rt.block_on(provider.token()), "token-2");
    }

    #[test]
    fn test_bootstrap_lost_with_its_runtime_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut fetcher = StubFetcher::new(calls.clone());
        fetcher.delay = Duration::ZERO;
        fetcher.stall = Some(Duration::from_secs(3600));

        let first = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let provider = first.block_on(async { TokenProvider::new(MemoryCookies::new(), fetcher) });
        while calls.load(Ordering::SeqCst) == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        drop(first);

        let second = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        assert_eq!(second.block_on(provider.token()), "");
        assert_eq!(second.block_on(provider.token()), "token-2");
    }

    #[test]
    fn test_dropped_provider_is_freed_before_first_use() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = TokenProvider::new(MemoryCookies::new(), StubFetcher::new(calls.clone()));
        let inner = Arc::downgrade(&provider.inner);

        drop(provider);
        assert!(inner.upgrade().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dropped_provider_is_freed_while_fetching() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = TokenProvider::new(MemoryCookies::new(), StubFetcher::new(calls));
        let inner = Arc::downgrade(&provider.inner);

        drop(provider);
        assert!(inner.upgrade().is_none());
    }

    #[tokio::test]
    async fn test_wait_superseded_by_reset_returns_newer_token() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut fetcher = StubFetcher::new(calls.clone());
        fetcher.stall = Some(Duration::from_millis(200));
        let provider = TokenProvider::new(MemoryCookies::new(), fetcher);

        let waiting = tokio::spawn({
            let provider = provider.clone();
            async move { provider.token().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        provider.reset();

        // The stale bootstrap finishes last but must not be handed out.
        assert_eq!(waiting.await.unwrap(), "token-2");
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(provider.token().await, "token-2");
    }
}
