//! JSON response helpers shared by the layer and the token endpoint.

use bytes::Bytes;
use http::{header, HeaderValue, Response, StatusCode};
use serde::Serialize;

/// Serialize `value` into a JSON response with the given status.
///
/// `fallback` is sent verbatim if serialization fails.
pub(crate) fn json<B, T>(status: StatusCode, value: &T, fallback: &'static [u8]) -> Response<B>
where
    B: From<Bytes>,
    T: Serialize,
{
    let body = serde_json::to_vec(value).unwrap_or_else(|_| fallback.to_vec());

    let mut response = Response::new(B::from(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}
