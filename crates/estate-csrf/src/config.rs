//! CSRF configuration.

use cookie::SameSite;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

/// Default name of the `HttpOnly` cookie the server trusts.
pub const DEFAULT_SECRET_COOKIE: &str = "csrf_secret";

/// Default name of the script-readable cookie echoed back as a header.
pub const DEFAULT_READABLE_COOKIE: &str = "csrf_token";

/// Default request header carrying the echoed token.
pub const DEFAULT_HEADER: &str = "x-csrf-token";

/// Default mutation-API namespace guarded by the layer.
pub const DEFAULT_GUARDED_PREFIX: &str = "/api/trpc/";

/// Default path of the token bootstrap endpoint.
pub const DEFAULT_TOKEN_PATH: &str = "/csrf-token";

/// Operations reachable before any page load could have planted a cookie.
pub const DEFAULT_EXEMPT_OPERATIONS: &[&str] = &[
    "auth.login",
    "auth.register",
    "auth.logout",
    "inquiry.submit",
    "contact.submit",
    "newsletter.subscribe",
];

/// Error type for configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable deserialization failed.
    #[cfg(feature = "config")]
    #[error("Configuration error: {0}")]
    Env(#[from] envy::Error),
    /// The guarded prefix must name a namespace.
    #[error("guarded prefix must not be empty")]
    EmptyPrefix,
    /// Both cookies must be distinguishable.
    #[error("secret and readable cookie names must differ (both are {0:?})")]
    SameCookieNames(String),
    /// A cookie name must be a non-empty RFC 6265 token.
    #[error("invalid cookie name {0:?}")]
    InvalidCookieName(String),
    /// The echo header must be a valid HTTP header name.
    #[error("invalid header name {0:?}")]
    InvalidHeaderName(String),
}

/// Configuration for CSRF protection.
#[derive(Clone, Debug)]
pub struct CsrfConfig {
    /// Name of the `HttpOnly` cookie.
    /// Default: "csrf_secret"
    pub secret_cookie_name: String,

    /// Name of the cookie browser script reads.
    /// Default: "csrf_token"
    pub readable_cookie_name: String,

    /// Header the client echoes the token in.
    /// Default: "x-csrf-token"
    pub header_name: String,

    /// Path attribute for both cookies.
    /// Default: "/"
    pub cookie_path: String,

    /// SameSite attribute for both cookies.
    /// Default: Lax
    pub cookie_same_site: SameSite,

    /// Lifetime of both cookies; matches the session lifetime.
    /// Default: 24 hours
    pub cookie_max_age: Duration,

    /// Requests whose path does not start with this prefix bypass validation.
    /// Default: "/api/trpc/"
    pub guarded_prefix: String,

    /// Operation identifiers that may mutate before a cookie exists.
    pub exempt_operations: HashSet<String>,

    /// Path served by the token endpoint.
    /// Default: "/csrf-token"
    pub token_path: String,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            secret_cookie_name: DEFAULT_SECRET_COOKIE.to_string(),
            readable_cookie_name: DEFAULT_READABLE_COOKIE.to_string(),
            header_name: DEFAULT_HEADER.to_string(),
            cookie_path: "/".to_string(),
            cookie_same_site: SameSite::Lax,
            cookie_max_age: Duration::from_secs(60 * 60 * 24),
            guarded_prefix: DEFAULT_GUARDED_PREFIX.to_string(),
            exempt_operations: DEFAULT_EXEMPT_OPERATIONS
                .iter()
                .map(|op| op.to_string())
                .collect(),
            token_path: DEFAULT_TOKEN_PATH.to_string(),
        }
    }
}

impl CsrfConfig {
    /// Create a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the secret (`HttpOnly`) cookie name.
    pub fn secret_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.secret_cookie_name = name.into();
        self
    }

    /// Set the readable cookie name.
    pub fn readable_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.readable_cookie_name = name.into();
        self
    }

    /// Set the header name. Stored lower-cased.
    pub fn header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into().to_ascii_lowercase();
        self
    }

    /// Set the cookie lifetime.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.cookie_max_age = max_age;
        self
    }

    /// Set the guarded mutation-API prefix.
    pub fn guarded_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.guarded_prefix = prefix.into();
        self
    }

    /// Replace the exempt operation set.
    pub fn exempt_operations<I, S>(mut self, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exempt_operations = operations.into_iter().map(Into::into).collect();
        self
    }

    /// Add a single exempt operation.
    pub fn exempt(mut self, operation: impl Into<String>) -> Self {
        self.exempt_operations.insert(operation.into());
        self
    }

    /// Set the token endpoint path.
    pub fn token_path(mut self, path: impl Into<String>) -> Self {
        self.token_path = path.into();
        self
    }

    /// Check the invariants the layer relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.guarded_prefix.is_empty() {
            return Err(ConfigError::EmptyPrefix);
        }
        if self.secret_cookie_name == self.readable_cookie_name {
            return Err(ConfigError::SameCookieNames(self.secret_cookie_name.clone()));
        }
        for name in [&self.secret_cookie_name, &self.readable_cookie_name] {
            if !is_cookie_name(name) {
                return Err(ConfigError::InvalidCookieName(name.clone()));
            }
        }
        if http::HeaderName::from_bytes(self.header_name.as_bytes()).is_err() {
            return Err(ConfigError::InvalidHeaderName(self.header_name.clone()));
        }
        Ok(())
    }
}

fn is_cookie_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&b))
}

#[cfg(feature = "config")]
mod env {
    use super::{ConfigError, CsrfConfig};
    use serde::Deserialize;
    use std::time::Duration;

    /// Overrides read from `CSRF_*` environment variables.
    #[derive(Debug, Default, Deserialize)]
    pub(super) struct EnvOverrides {
        secret_cookie: Option<String>,
        readable_cookie: Option<String>,
        header: Option<String>,
        guarded_prefix: Option<String>,
        exempt_operations: Option<String>,
        max_age_secs: Option<u64>,
        token_path: Option<String>,
    }

    impl EnvOverrides {
        pub(super) fn apply(self, mut config: CsrfConfig) -> CsrfConfig {
            if let Some(name) = self.secret_cookie {
                config = config.secret_cookie_name(name);
            }
            if let Some(name) = self.readable_cookie {
                config = config.readable_cookie_name(name);
            }
            if let Some(name) = self.header {
                config = config.header_name(name);
            }
            if let Some(prefix) = self.guarded_prefix {
                config = config.guarded_prefix(prefix);
            }
            if let Some(list) = self.exempt_operations {
                config = config.exempt_operations(
                    list.split(',')
                        .map(str::trim)
                        .filter(|op| !op.is_empty())
                        .map(str::to_string),
                );
            }
            if let Some(secs) = self.max_age_secs {
                config = config.max_age(Duration::from_secs(secs));
            }
            if let Some(path) = self.token_path {
                config = config.token_path(path);
            }
            config
        }
    }

    impl CsrfConfig {
        /// Load configuration from `CSRF_*` environment variables.
        ///
        /// Unset variables keep their defaults. Recognised variables:
        /// `CSRF_SECRET_COOKIE`, `CSRF_READABLE_COOKIE`, `CSRF_HEADER`,
        /// `CSRF_GUARDED_PREFIX`, `CSRF_EXEMPT_OPERATIONS` (comma-separated),
        /// `CSRF_MAX_AGE_SECS`, `CSRF_TOKEN_PATH`.
        pub fn from_env() -> Result<Self, ConfigError> {
            let overrides = envy::prefixed("CSRF_").from_env::<EnvOverrides>()?;
            let config = overrides.apply(Self::default());
            config.validate()?;
            Ok(config)
        }

        /// Same as [`CsrfConfig::from_env`] but reading from an explicit
        /// iterator of `(key, value)` pairs.
        pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
        where
            I: IntoIterator<Item = (String, String)>,
        {
            let overrides = envy::prefixed("CSRF_").from_iter::<_, EnvOverrides>(vars)?;
            let config = overrides.apply(Self::default());
            config.validate()?;
            Ok(config)
        }
    }
}
