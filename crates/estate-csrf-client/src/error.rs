use http::StatusCode;
use thiserror::Error;

/// Why a token bootstrap fetch failed.
///
/// Never surfaced from [`TokenProvider::token`](crate::TokenProvider::token);
/// the provider logs it and degrades to an empty token.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport or decoding failure from the HTTP client.
    #[cfg(feature = "http-client")]
    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("token endpoint answered {0}")]
    Status(StatusCode),

    /// The endpoint answered successfully but without a token.
    #[error("token endpoint returned an empty token")]
    EmptyToken,

    /// The fetch never produced an outcome: the fetcher panicked, or the
    /// runtime running it shut down.
    #[error("token fetch aborted: {0}")]
    Aborted(String),

    /// Any other fetcher-specific failure.
    #[error("{0}")]
    Other(String),
}
