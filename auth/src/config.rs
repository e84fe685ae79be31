//! Auth sections of the host configuration.
//!
//! ```json
//! {
//!   "auth": {
//!     "basic":  { "credentials": [{ "username": "alice", "password": "$2b$..." }] },
//!     "bearer": { "tokens": [{ "token": "s3cr3t", "user": "robot" }] }
//!   }
//! }
//! ```
//!
//! The flat keys `authBasic` and `authBearer` are accepted as aliases.

use crate::error::{AuthConfigError, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Realm announced in `WWW-Authenticate` challenges by default.
pub const DEFAULT_REALM: &str = "Secure Area";

/// One Basic auth user. `password` is a bcrypt hash.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Credential {
    /// Login name
    pub username: String,
    /// bcrypt hash of the password
    pub password: String,
}

/// `auth.basic` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BasicAuthConfig {
    /// Challenge realm
    #[serde(default = "default_realm")]
    pub realm: String,
    /// Accepted users
    pub credentials: Vec<Credential>,
}

/// One accepted bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenEntry {
    /// Opaque token value
    pub token: String,
    /// User the token authenticates
    pub user: String,
}

/// `auth.bearer` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BearerAuthConfig {
    /// Challenge realm
    #[serde(default = "default_realm")]
    pub realm: String,
    /// Accepted tokens
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

fn default_realm() -> String {
    DEFAULT_REALM.to_string()
}

impl BasicAuthConfig {
    /// Read `auth.basic` (or `authBasic`) from the host configuration.
    ///
    /// # Errors
    ///
    /// [`AuthConfigError::Missing`] or [`AuthConfigError::Invalid`].
    pub fn from_host_config(config: &Value) -> Result<Self> {
        section(config, "basic", "authBasic", "auth.basic")
    }
}

impl BearerAuthConfig {
    /// Read `auth.bearer` (or `authBearer`) from the host configuration.
    ///
    /// # Errors
    ///
    /// [`AuthConfigError::Missing`] or [`AuthConfigError::Invalid`].
    pub fn from_host_config(config: &Value) -> Result<Self> {
        section(config, "bearer", "authBearer", "auth.bearer")
    }
}

/// Whether the host configuration has a `auth.<name>` section or its alias.
#[must_use]
pub fn has_section(config: &Value, name: &str, alias: &str) -> bool {
    raw_section(config, name, alias).is_some()
}

fn raw_section<'a>(config: &'a Value, name: &str, alias: &str) -> Option<&'a Value> {
    config
        .get("auth")
        .and_then(|auth| auth.get(name))
        .or_else(|| config.get(alias))
        .filter(|value| !value.is_null())
}

fn section<T: DeserializeOwned>(
    config: &Value,
    name: &str,
    alias: &str,
    path: &'static str,
) -> Result<T> {
    let raw = raw_section(config, name, alias).ok_or(AuthConfigError::Missing { section: path })?;
    T::deserialize(raw).map_err(|e| AuthConfigError::Invalid {
        section: path,
        reason: e.to_string(),
    })
}
