//! URL path segmentation and member visibility.

use svchost_core::{HostError, Result};

/// Built-in property names that are never reachable.
pub const RESERVED_MEMBERS: &[&str] = &[
    "constructor",
    "hasOwnProperty",
    "isPrototypeOf",
    "propertyIsEnumerable",
    "prototype",
    "toLocaleString",
    "toString",
    "valueOf",
];

/// Split a request path into decoded member names.
///
/// Leading `/` is dropped, as is a single trailing empty segment, so `/a/b/`
/// and `/a/b` address the same member. The root path yields no segments.
///
/// # Errors
///
/// [`HostError::Http`] 400 if a segment does not decode to UTF-8.
///
/// # Examples
///
/// ```
/// use svchost_web::protocol::split_path;
///
/// assert_eq!(split_path("/foo/bar/").unwrap(), vec!["foo", "bar"]);
/// assert!(split_path("/").unwrap().is_empty());
/// ```
pub fn split_path(path: &str) -> Result<Vec<String>> {
    let path = path.trim();
    let path = path.strip_prefix('/').unwrap_or(path);

    let mut segments: Vec<&str> = path.split('/').collect();
    if segments.last().is_some_and(|s| s.is_empty()) {
        segments.pop();
    }

    segments
        .into_iter()
        .map(|segment| {
            urlencoding::decode(segment)
                .map(std::borrow::Cow::into_owned)
                .map_err(|e| HostError::http_with_message(400, format!("Invalid path segment: {e}")))
        })
        .collect()
}

/// Whether a member name is hidden from the protocol.
///
/// Names starting with `$` or `_` and [`RESERVED_MEMBERS`] are private.
#[must_use]
pub fn is_private(name: &str) -> bool {
    name.starts_with('$') || name.starts_with('_') || RESERVED_MEMBERS.contains(&name)
}
