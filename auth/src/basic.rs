//! HTTP Basic authentication.

use crate::challenge::{Authorization, authorization, challenge, reject};
use crate::config::{BasicAuthConfig, Credential, DEFAULT_REALM};
use crate::error::AuthConfigError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::{Method, StatusCode};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use svchost_core::{
    HandlerFuture, HookFuture, HostError, Next, Reply, RequestContext, RequestHandler, Result,
    Service, ServiceConfig,
};

const SCHEME: &str = "Basic";

/// Future returned by verifier seams.
pub type VerifyFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Checks a username and password.
pub trait CredentialVerifier: Send + Sync {
    /// `Ok(true)` if `password` is correct for `username`.
    ///
    /// Unknown users are `Ok(false)`; `Err` is reserved for verifier failures.
    fn verify<'a>(&'a self, username: &'a str, password: &'a str) -> VerifyFuture<'a, bool>;
}

/// Users with bcrypt password hashes, held in memory.
#[derive(Debug, Clone, Default)]
pub struct BcryptCredentials {
    hashes: HashMap<String, String>,
}

impl BcryptCredentials {
    /// Load credentials.
    ///
    /// # Errors
    ///
    /// [`AuthConfigError::Credential`] if a password is not a bcrypt hash.
    pub fn new(credentials: impl IntoIterator<Item = Credential>) -> crate::Result<Self> {
        let mut hashes = HashMap::new();
        for credential in credentials {
            if !credential.password.starts_with("$2") {
                return Err(AuthConfigError::Credential {
                    username: credential.username,
                    reason: "password must be a bcrypt hash".to_string(),
                });
            }
            hashes.insert(credential.username, credential.password);
        }
        Ok(Self { hashes })
    }

    /// Number of known users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Whether no user is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

impl CredentialVerifier for BcryptCredentials {
    fn verify<'a>(&'a self, username: &'a str, password: &'a str) -> VerifyFuture<'a, bool> {
        Box::pin(async move {
            let Some(hash) = self.hashes.get(username).cloned() else {
                return Ok(false);
            };
            let password = password.to_string();
            let verified = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
                .await
                .map_err(HostError::unexpected)?;
            Ok(verified.unwrap_or_else(|err| {
                tracing::warn!(username, error = %err, "Stored bcrypt hash is unusable");
                false
            }))
        })
    }
}

#[derive(Clone)]
struct Settings {
    realm: String,
    verifier: Arc<dyn CredentialVerifier>,
}

/// Request handler enforcing HTTP Basic authentication.
///
/// Also a [`Service`]: registered in a registry, its configure hook reads
/// `auth.basic` from the host configuration.
pub struct BasicAuthHandler {
    settings: RwLock<Option<Settings>>,
}

impl BasicAuthHandler {
    /// Unconfigured handler. Requests fail until it is configured.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            settings: RwLock::new(None),
        }
    }

    /// Handler using a custom verifier.
    #[must_use]
    pub fn with_verifier(verifier: Arc<dyn CredentialVerifier>, realm: impl Into<String>) -> Self {
        Self {
            settings: RwLock::new(Some(Settings {
                realm: realm.into(),
                verifier,
            })),
        }
    }

    /// Handler for the given section.
    ///
    /// # Errors
    ///
    /// As [`BcryptCredentials::new`].
    pub fn from_config(config: &BasicAuthConfig) -> crate::Result<Self> {
        let handler = Self::new();
        handler.configure(config)?;
        Ok(handler)
    }

    /// Replace users and realm.
    ///
    /// # Errors
    ///
    /// As [`BcryptCredentials::new`].
    pub fn configure(&self, config: &BasicAuthConfig) -> crate::Result<()> {
        let credentials = BcryptCredentials::new(config.credentials.iter().cloned())?;
        tracing::info!(users = credentials.len(), realm = %config.realm, "Basic authentication configured");
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = Some(Settings {
            realm: config.realm.clone(),
            verifier: Arc::new(credentials),
        });
        Ok(())
    }

    /// Whether users have been loaded.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.settings().is_some()
    }

    fn settings(&self) -> Option<Settings> {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn authenticate(&self, ctx: &Arc<RequestContext>, next: Next<'_>) -> Result<Reply> {
        let Some(settings) = self.settings() else {
            return Err(HostError::unexpected("Basic authentication is not configured"));
        };

        if ctx.method() == Method::OPTIONS {
            challenge(ctx, SCHEME, &settings.realm);
            return Ok(Reply::Empty(StatusCode::OK));
        }

        let encoded = match authorization(ctx, SCHEME) {
            Authorization::Matched(encoded) => encoded,
            Authorization::Missing => return Err(reject(ctx, SCHEME, &settings.realm)),
            Authorization::Unsupported(scheme) => {
                tracing::debug!(request_id = %ctx.id(), scheme, "Unsupported authorization scheme");
                return Err(reject(ctx, SCHEME, &settings.realm));
            }
        };
        let Some(decoded) = STANDARD
            .decode(encoded)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
        else {
            return Err(reject(ctx, SCHEME, &settings.realm));
        };
        let (username, password) = decoded.split_once(':').unwrap_or((decoded.as_str(), ""));

        ctx.set_unverified_user(username);
        if !settings.verifier.verify(username, password).await? {
            tracing::debug!(request_id = %ctx.id(), username, "Basic authentication failed");
            return Err(reject(ctx, SCHEME, &settings.realm));
        }
        ctx.set_user(username);
        next.run().await
    }
}

impl Default for BasicAuthHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BasicAuthHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthHandler")
            .field(
                "realm",
                &self.settings().map_or_else(|| DEFAULT_REALM.to_string(), |s| s.realm),
            )
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl RequestHandler for BasicAuthHandler {
    fn name(&self) -> &str {
        "basic-auth"
    }

    fn on_request<'a>(&'a self, ctx: &'a Arc<RequestContext>, next: Next<'a>) -> HandlerFuture<'a> {
        Box::pin(self.authenticate(ctx, next))
    }
}

impl Service for BasicAuthHandler {
    fn on_config<'a>(&'a self, config: &'a ServiceConfig) -> Option<HookFuture<'a>> {
        Some(Box::pin(async move {
            match BasicAuthConfig::from_host_config(config) {
                Ok(section) => Ok(self.configure(&section)?),
                Err(AuthConfigError::Missing { section }) => {
                    tracing::warn!(section, "No basic auth configuration; every request will fail");
                    Ok(())
                }
                Err(err) => Err(err.into()),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn credentials() -> BcryptCredentials {
        BcryptCredentials::new([Credential {
            username: "alice".to_string(),
            password: bcrypt::hash("wonderland", 4).unwrap(),
        }])
        .unwrap()
    }

    #[tokio::test]
    async fn test_bcrypt_verification() {
        let credentials = credentials();

        assert!(credentials.verify("alice", "wonderland").await.unwrap());
        assert!(!credentials.verify("alice", "looking-glass").await.unwrap());
        assert!(!credentials.verify("bob", "wonderland").await.unwrap());
    }

    #[test]
    fn test_plaintext_password_is_rejected() {
        let err = BcryptCredentials::new([Credential {
            username: "alice".to_string(),
            password: "plain".to_string(),
        }])
        .unwrap_err();
        assert!(matches!(err, AuthConfigError::Credential { username, .. } if username == "alice"));
    }

    #[test]
    fn test_configuration_state() {
        let handler = BasicAuthHandler::new();
        assert!(!handler.is_configured());

        let handler = BasicAuthHandler::with_verifier(Arc::new(credentials()), "Staff");
        assert!(handler.is_configured());
        assert!(format!("{handler:?}").contains("Staff"));
    }
}
