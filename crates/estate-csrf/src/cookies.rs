//! Cookie pair issuance and raw `Cookie` header parsing.

use crate::config::CsrfConfig;
use crate::token::CsrfToken;
use crate::transport;
use cookie::Cookie;
use http::{header, HeaderMap, HeaderValue, Request, Response};
use std::borrow::Cow;

/// Write the secret and readable cookies for `token` onto `res`.
///
/// `Secure` follows [`transport::is_secure`] for `req`.
pub fn issue<ReqBody, ResBody>(
    req: &Request<ReqBody>,
    res: &mut Response<ResBody>,
    token: &CsrfToken,
    config: &CsrfConfig,
) {
    let secure = transport::is_secure(req);
    issue_cookies(res.headers_mut(), token, secure, config);
}

/// Write both cookies into `headers`.
///
/// Existing `Set-Cookie` entries for either cookie name are replaced, so
/// repeated calls with the same token leave identical header state. Entries
/// for unrelated cookies are kept in order. The pair is written together or
/// not at all: if either cookie cannot be rendered, `headers` is untouched.
pub fn issue_cookies(headers: &mut HeaderMap, token: &CsrfToken, secure: bool, config: &CsrfConfig) {
    let secret = render(&config.secret_cookie_name, token, secure, true, config);
    let readable = render(&config.readable_cookie_name, token, secure, false, config);
    let (Some(secret), Some(readable)) = (secret, readable) else {
        return;
    };

    let kept: Vec<HeaderValue> = headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter(|value| {
            let name = set_cookie_name(value);
            name != Some(config.secret_cookie_name.as_str())
                && name != Some(config.readable_cookie_name.as_str())
        })
        .cloned()
        .collect();

    headers.remove(header::SET_COOKIE);
    for value in kept {
        headers.append(header::SET_COOKIE, value);
    }
    headers.append(header::SET_COOKIE, secret);
    headers.append(header::SET_COOKIE, readable);
}

fn render(
    name: &str,
    token: &CsrfToken,
    secure: bool,
    http_only: bool,
    config: &CsrfConfig,
) -> Option<HeaderValue> {
    let rendered = build_cookie(name, token, secure, http_only, config).to_string();
    HeaderValue::from_str(&rendered)
        .map_err(|err| {
            tracing::error!(cookie = %name, error = %err, "Unrenderable CSRF cookie");
        })
        .ok()
}

fn build_cookie(
    name: &str,
    token: &CsrfToken,
    secure: bool,
    http_only: bool,
    config: &CsrfConfig,
) -> Cookie<'static> {
    let max_age = i64::try_from(config.cookie_max_age.as_secs()).unwrap_or(i64::MAX);

    Cookie::build((name.to_owned(), token.as_str().to_owned()))
        .path(config.cookie_path.clone())
        .same_site(config.cookie_same_site)
        .secure(secure)
        .http_only(http_only)
        .max_age(cookie::time::Duration::seconds(max_age))
        .build()
}

fn set_cookie_name(value: &HeaderValue) -> Option<&str> {
    let raw = value.to_str().ok()?;
    let (name, _) = raw.split_once('=')?;
    Some(name.trim())
}

/// Read a cookie from every `Cookie` header in `headers`, first match wins.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|raw| parse_cookie_header(raw, name))
}

/// Find `name` in a raw `Cookie` header value.
///
/// The header is a `;`-separated list of `name=value` pairs. Whitespace
/// around pairs and around `=` is ignored, malformed segments are skipped, and
/// values are percent-decoded (kept raw when the encoding is malformed).
pub fn parse_cookie_header(raw: &str, name: &str) -> Option<String> {
    Cookie::split_parse(raw)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name)
        .map(|cookie| {
            let value = cookie.value();
            urlencoding::decode(value)
                .unwrap_or(Cow::Borrowed(value))
                .into_owned()
        })
}
