//! Where the provider reads the live readable cookie from.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Read access to the cookies the host environment currently holds.
///
/// The provider calls this on every [`token`](crate::TokenProvider::token)
/// request so server-side rotations are seen immediately.
pub trait CookieSource: Send + Sync + 'static {
    /// Current value of the cookie called `name`, if set.
    fn cookie(&self, name: &str) -> Option<String>;
}

/// An in-memory cookie store.
#[derive(Debug, Default)]
pub struct MemoryCookies {
    jar: Mutex<HashMap<String, String>>,
}

impl MemoryCookies {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or overwrite a cookie.
    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.jar
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), value.into());
    }

    /// Remove a cookie.
    pub fn remove(&self, name: &str) {
        self.jar
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }
}

impl CookieSource for MemoryCookies {
    fn cookie(&self, name: &str) -> Option<String> {
        self.jar
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

impl<T: CookieSource> CookieSource for std::sync::Arc<T> {
    fn cookie(&self, name: &str) -> Option<String> {
        (**self).cookie(name)
    }
}
