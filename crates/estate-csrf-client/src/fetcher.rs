//! Fetching a token from the server's token endpoint.

use crate::error::FetchError;
use async_trait::async_trait;

/// Something that can ask the server for a CSRF token.
///
/// Implementations are expected to carry cookies: a successful fetch should
/// leave the issued cookie pair in whatever store the paired
/// [`CookieSource`](crate::CookieSource) reads from.
#[async_trait]
pub trait TokenFetcher: Send + Sync + 'static {
    /// Perform one request against the token endpoint.
    async fn fetch_token(&self) -> Result<String, FetchError>;
}

#[cfg(feature = "http-client")]
pub use http_client::HttpTokenFetcher;

#[cfg(feature = "http-client")]
mod http_client {
    use super::TokenFetcher;
    use crate::error::FetchError;
    use crate::source::CookieSource;
    use async_trait::async_trait;
    use estate_csrf::{parse_cookie_header, TokenResponse};
    use reqwest::cookie::{CookieStore, Jar};
    use reqwest::{Client, Url};
    use std::sync::Arc;
    use std::time::Duration;

    /// Token fetcher backed by a cookie-carrying `reqwest` client.
    ///
    /// The same jar serves as the [`CookieSource`], so cookies issued by the
    /// token endpoint (or rotated by any other response through
    /// [`client`](Self::client)) are visible to the provider on its next read.
    #[derive(Debug, Clone)]
    pub struct HttpTokenFetcher {
        client: Client,
        jar: Arc<Jar>,
        origin: Url,
        token_url: Url,
    }

    impl HttpTokenFetcher {
        /// Build a fetcher for the server at `origin`, requesting `token_path`.
        pub fn new(origin: Url, token_path: &str) -> Result<Self, FetchError> {
            let jar = Arc::new(Jar::default());
            let client = Client::builder()
                .cookie_provider(jar.clone())
                .timeout(Duration::from_secs(10))
                .build()?;
            Self::with_client(client, jar, origin, token_path)
        }

        /// Use a pre-built client. `jar` must be the cookie provider `client`
        /// was built with.
        pub fn with_client(
            client: Client,
            jar: Arc<Jar>,
            origin: Url,
            token_path: &str,
        ) -> Result<Self, FetchError> {
            let token_url = origin
                .join(token_path)
                .map_err(|e| FetchError::Other(format!("invalid token URL: {e}")))?;
            Ok(Self {
                client,
                jar,
                origin,
                token_url,
            })
        }

        /// The underlying client, for issuing application requests that share
        /// the cookie jar.
        pub fn client(&self) -> &Client {
            &self.client
        }

        /// The origin requests are resolved against.
        pub fn origin(&self) -> &Url {
            &self.origin
        }
    }

    #[async_trait]
    impl TokenFetcher for HttpTokenFetcher {
        async fn fetch_token(&self) -> Result<String, FetchError> {
            let response = self.client.get(self.token_url.clone()).send().await?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status(status));
            }

            let body: TokenResponse = response.json().await?;
            if body.csrf_token.is_empty() {
                return Err(FetchError::EmptyToken);
            }
            Ok(body.csrf_token)
        }
    }

    impl CookieSource for HttpTokenFetcher {
        fn cookie(&self, name: &str) -> Option<String> {
            let header = self.jar.cookies(&self.origin)?;
            let raw = header.to_str().ok()?;
            parse_cookie_header(raw, name)
        }
    }
}
