//! Rejection taxonomy for the validation layer.

use crate::response;
use bytes::Bytes;
use http::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a guarded mutation was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CsrfError {
    /// The header token, the secret cookie, or both were absent.
    #[error("CSRF token missing")]
    Missing,
    /// Both tokens were present but did not match.
    #[error("CSRF token invalid")]
    Invalid,
}

/// Wire-level error code carried in the rejection body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CsrfErrorCode {
    /// `CSRF_TOKEN_MISSING`
    CsrfTokenMissing,
    /// `CSRF_TOKEN_INVALID`
    CsrfTokenInvalid,
}

impl CsrfErrorCode {
    /// The code as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CsrfTokenMissing => "CSRF_TOKEN_MISSING",
            Self::CsrfTokenInvalid => "CSRF_TOKEN_INVALID",
        }
    }

    /// Parse a wire code, returning `None` for anything that is not a CSRF code.
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "CSRF_TOKEN_MISSING" => Some(Self::CsrfTokenMissing),
            "CSRF_TOKEN_INVALID" => Some(Self::CsrfTokenInvalid),
            _ => None,
        }
    }
}

impl fmt::Display for CsrfErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CsrfError {
    /// The wire code for this rejection.
    pub fn code(&self) -> CsrfErrorCode {
        match self {
            Self::Missing => CsrfErrorCode::CsrfTokenMissing,
            Self::Invalid => CsrfErrorCode::CsrfTokenInvalid,
        }
    }

    /// Rejections are always `403 Forbidden`.
    pub fn status(&self) -> StatusCode {
        StatusCode::FORBIDDEN
    }

    /// Render the rejection as a JSON response.
    ///
    /// Body shape: `{"error": {"message": "...", "code": "CSRF_TOKEN_..."}}`.
    pub fn into_response<B>(self) -> Response<B>
    where
        B: From<Bytes>,
    {
        let body = ErrorResponse {
            error: ErrorBody {
                message: self.to_string(),
                code: self.code(),
            },
        };

        response::json(
            self.status(),
            &body,
            br#"{"error":{"message":"CSRF validation failed","code":"CSRF_TOKEN_INVALID"}}"#,
        )
    }
}

/// JSON representation of a rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// The error payload.
    pub error: ErrorBody,
}

/// Inner error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub message: String,
    /// Machine-readable code.
    pub code: CsrfErrorCode,
}
