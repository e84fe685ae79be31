//! `Authorization` parsing and `WWW-Authenticate` challenges shared by the
//! handlers.

use http::header::{AUTHORIZATION, HeaderValue, WWW_AUTHENTICATE};
use svchost_core::{HostError, RequestContext};

/// `<scheme> realm="<realm>"`.
#[must_use]
pub fn challenge_value(scheme: &str, realm: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("{scheme} realm=\"{realm}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("Basic"))
}

/// Announce the accepted scheme on the response.
pub fn challenge(ctx: &RequestContext, scheme: &str, realm: &str) {
    ctx.set_response_header(WWW_AUTHENTICATE, challenge_value(scheme, realm));
}

/// Announce the scheme and fail with 401.
#[must_use]
pub fn reject(ctx: &RequestContext, scheme: &str, realm: &str) -> HostError {
    challenge(ctx, scheme, realm);
    HostError::http(401)
}

/// What the `Authorization` header carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization<'a> {
    /// No header
    Missing,
    /// Header for the expected scheme, with its parameter
    Matched(&'a str),
    /// Header for some other scheme
    Unsupported(&'a str),
}

/// Classify the request's `Authorization` header against `scheme`.
///
/// The scheme name is matched case-insensitively.
#[must_use]
pub fn authorization<'a>(ctx: &'a RequestContext, scheme: &str) -> Authorization<'a> {
    let Some(header) = ctx.header(AUTHORIZATION) else {
        return Authorization::Missing;
    };
    let header = header.trim();
    let (name, rest) = header.split_once(' ').unwrap_or((header, ""));
    if name.eq_ignore_ascii_case(scheme) {
        Authorization::Matched(rest.trim())
    } else {
        Authorization::Unsupported(name)
    }
}
