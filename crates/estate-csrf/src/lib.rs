//! # estate-csrf
//!
//! Stateless CSRF protection for the estate platform using the
//! Double-Submit Cookie pattern.
//!
//! The server issues the same random token in two cookies: an `HttpOnly`
//! secret cookie it trusts, and a readable cookie browser script echoes back
//! in the `x-csrf-token` header. Guarded mutations are allowed only when the
//! header matches the secret cookie. Nothing is stored server-side.
//!
//! ## Features
//!
//! - `config` (default) - `CsrfConfig::from_env()` reading `CSRF_*` variables
//!
//! ## Example
//!
//! ```rust,no_run
//! use estate_csrf::{CsrfConfig, CsrfLayer, CsrfTokenService};
//! use tower::Layer;
//!
//! let config = CsrfConfig::new()
//!     .guarded_prefix("/api/trpc/")
//!     .exempt("auth.login");
//!
//! // Serve GET /csrf-token behind the same layer the RPC surface uses
//! let token_endpoint = CsrfLayer::new(config.clone()).layer(CsrfTokenService::new(config));
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod cookies;
pub mod endpoint;
pub mod error;
pub mod layer;
pub mod policy;
pub mod token;
pub mod transport;

mod response;

pub use config::{ConfigError, CsrfConfig};
pub use cookies::{issue, issue_cookies, parse_cookie_header, read_cookie};
pub use endpoint::{token_response, CsrfTokenService, TokenResponse};
pub use error::{CsrfError, CsrfErrorCode, ErrorBody, ErrorResponse};
pub use layer::{CsrfLayer, CsrfService, ResponseFuture};
pub use policy::{evaluate, CookieState, Verdict};
pub use token::CsrfToken;
pub use transport::is_secure;
