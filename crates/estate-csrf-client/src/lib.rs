//! # estate-csrf-client
//!
//! Client-side companion to [`estate_csrf`]. A [`TokenProvider`] bootstraps
//! the double-submit cookie pair from the token endpoint, reads the live
//! readable cookie on every request, and refreshes itself after a CSRF
//! rejection.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use estate_csrf_client::{HttpTokenFetcher, TokenProvider};
//!
//! let fetcher = HttpTokenFetcher::new("https://estate.example".parse()?, "/csrf-token")?;
//! let provider = TokenProvider::new(fetcher.clone(), fetcher.clone());
//!
//! let mut headers = http::HeaderMap::new();
//! provider.attach(&mut headers).await;
//! let response = fetcher
//!     .client()
//!     .post("https://estate.example/api/trpc/listing.create")
//!     .headers(headers)
//!     .send()
//!     .await?;
//!
//! let status = response.status();
//! let body = response.bytes().await?;
//! if provider.handle_rejection(status, &body).is_some() {
//!     // the next `attach` uses a fresh token
//! }
//! ```
//!
//! ## Features
//!
//! - `http-client` (default): [`HttpTokenFetcher`], backed by `reqwest`
//!   with a shared cookie jar.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod error;
mod fetcher;
mod provider;
mod source;

pub use error::FetchError;
#[cfg(feature = "http-client")]
pub use fetcher::HttpTokenFetcher;
pub use fetcher::TokenFetcher;
pub use provider::{rejection_code, TokenProvider};
pub use source::{CookieSource, MemoryCookies};
pub use estate_csrf::CsrfErrorCode;
