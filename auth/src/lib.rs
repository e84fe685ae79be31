//! # svchost Authentication
//!
//! Request handlers that gate a dispatcher chain behind HTTP authentication.
//!
//! - [`BasicAuthHandler`]: `Authorization: Basic`, users with bcrypt hashes
//! - [`BearerAuthHandler`]: `Authorization: Bearer`, a fixed token list
//!
//! Both are [`RequestHandler`](svchost_core::RequestHandler)s and
//! [`Service`](svchost_core::Service)s. A successful check records the user
//! on the request context and runs the rest of the chain; anything else ends
//! it with a 401 and a `WWW-Authenticate` challenge. `OPTIONS` requests get
//! the challenge without a check.
//!
//! Credential storage is a seam: implement [`CredentialVerifier`] or
//! [`TokenVerifier`] to plug in another store.
//!
//! ## Example
//!
//! ```rust
//! use serde_json::json;
//! use svchost_auth::{BasicAuthConfig, BasicAuthHandler};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let hash = bcrypt::hash("wonderland", 4)?;
//! let config = json!({"auth": {"basic": {"credentials": [{"username": "alice", "password": hash}]}}});
//!
//! let handler = BasicAuthHandler::from_config(&BasicAuthConfig::from_host_config(&config)?)?;
//! assert!(handler.is_configured());
//! # Ok(())
//! # }
//! ```

pub mod basic;
pub mod bearer;
pub mod challenge;
pub mod config;
pub mod error;

pub use basic::{BasicAuthHandler, BcryptCredentials, CredentialVerifier, VerifyFuture};
pub use bearer::{BearerAuthHandler, StaticTokens, TokenVerifier};
pub use config::{BasicAuthConfig, BearerAuthConfig, Credential, DEFAULT_REALM, TokenEntry};
pub use error::{AuthConfigError, Result};
