//! HTTP Bearer token authentication.

use crate::basic::VerifyFuture;
use crate::challenge::{Authorization, authorization, challenge, reject};
use crate::config::{BearerAuthConfig, TokenEntry};
use crate::error::AuthConfigError;
use constant_time_eq::constant_time_eq;
use http::{Method, StatusCode};
use std::sync::{Arc, PoisonError, RwLock};
use svchost_core::{
    HandlerFuture, HookFuture, HostError, Next, Reply, RequestContext, RequestHandler, Result,
    Service, ServiceConfig,
};

const SCHEME: &str = "Bearer";

/// Maps a bearer token to the user it authenticates.
pub trait TokenVerifier: Send + Sync {
    /// `Ok(Some(user))` for an accepted token, `Ok(None)` otherwise.
    fn verify<'a>(&'a self, token: &'a str) -> VerifyFuture<'a, Option<String>>;
}

/// Fixed token list, compared in constant time.
#[derive(Clone, Default)]
pub struct StaticTokens {
    entries: Vec<TokenEntry>,
}

impl StaticTokens {
    /// Accept exactly `entries`.
    #[must_use]
    pub fn new(entries: impl IntoIterator<Item = TokenEntry>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Number of accepted tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no token is accepted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// User for `token`. Every entry is compared.
    #[must_use]
    pub fn lookup(&self, token: &str) -> Option<String> {
        self.entries.iter().fold(None, |found, entry| {
            let matched = constant_time_eq(entry.token.as_bytes(), token.as_bytes());
            found.or_else(|| matched.then(|| entry.user.clone()))
        })
    }
}

impl std::fmt::Debug for StaticTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokens")
            .field("tokens", &self.entries.len())
            .finish()
    }
}

impl TokenVerifier for StaticTokens {
    fn verify<'a>(&'a self, token: &'a str) -> VerifyFuture<'a, Option<String>> {
        Box::pin(async move { Ok(self.lookup(token)) })
    }
}

#[derive(Clone)]
struct Settings {
    realm: String,
    verifier: Arc<dyn TokenVerifier>,
}

/// Request handler enforcing `Authorization: Bearer <token>`.
///
/// Also a [`Service`] whose configure hook reads `auth.bearer`.
pub struct BearerAuthHandler {
    settings: RwLock<Option<Settings>>,
}

impl BearerAuthHandler {
    /// Unconfigured handler. Requests fail until it is configured.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            settings: RwLock::new(None),
        }
    }

    /// Handler using a custom verifier.
    #[must_use]
    pub fn with_verifier(verifier: Arc<dyn TokenVerifier>, realm: impl Into<String>) -> Self {
        Self {
            settings: RwLock::new(Some(Settings {
                realm: realm.into(),
                verifier,
            })),
        }
    }

    /// Handler for the given section.
    #[must_use]
    pub fn from_config(config: &BearerAuthConfig) -> Self {
        let handler = Self::new();
        handler.configure(config);
        handler
    }

    /// Replace tokens and realm.
    pub fn configure(&self, config: &BearerAuthConfig) {
        let tokens = StaticTokens::new(config.tokens.iter().cloned());
        tracing::info!(tokens = tokens.len(), realm = %config.realm, "Bearer authentication configured");
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = Some(Settings {
            realm: config.realm.clone(),
            verifier: Arc::new(tokens),
        });
    }

    /// Whether tokens have been loaded.
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
            return Err(HostError::unexpected("Bearer authentication is not configured"));
        };

        if ctx.method() == Method::OPTIONS {
            challenge(ctx, SCHEME, &settings.realm);
            return Ok(Reply::Empty(StatusCode::OK));
        }

        let token = match authorization(ctx, SCHEME) {
            Authorization::Matched(token) if !token.is_empty() => token,
            Authorization::Matched(_) | Authorization::Missing => {
                return Err(reject(ctx, SCHEME, &settings.realm));
            }
            Authorization::Unsupported(scheme) => {
                tracing::debug!(request_id = %ctx.id(), scheme, "Unsupported authorization scheme");
                return Err(reject(ctx, SCHEME, &settings.realm));
            }
        };

        let Some(user) = settings.verifier.verify(token).await? else {
            tracing::debug!(request_id = %ctx.id(), "Bearer token rejected");
            return Err(reject(ctx, SCHEME, &settings.realm));
        };
        ctx.set_user(user);
        next.run().await
    }
}

impl Default for BearerAuthHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BearerAuthHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerAuthHandler")
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl RequestHandler for BearerAuthHandler {
    fn name(&self) -> &str {
        "bearer-auth"
    }

    fn on_request<'a>(&'a self, ctx: &'a Arc<RequestContext>, next: Next<'a>) -> HandlerFuture<'a> {
        Box::pin(self.authenticate(ctx, next))
    }
}

impl Service for BearerAuthHandler {
    fn on_config<'a>(&'a self, config: &'a ServiceConfig) -> Option<HookFuture<'a>> {
        Some(Box::pin(async move {
            match BearerAuthConfig::from_host_config(config) {
                Ok(section) => {
                    self.configure(&section);
                    Ok(())
                }
                Err(AuthConfigError::Missing { section }) => {
                    tracing::warn!(section, "No bearer auth configuration; every request will fail");
                    Ok(())
                }
                Err(err) => Err(err.into()),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> StaticTokens {
        StaticTokens::new([
            TokenEntry {
                token: "t-1".to_string(),
                user: "robot".to_string(),
            },
            TokenEntry {
                token: "t-2".to_string(),
                user: "cron".to_string(),
            },
        ])
    }

    #[test]
    fn test_lookup() {
        let tokens = tokens();
        assert_eq!(tokens.lookup("t-1"), Some("robot".to_string()));
        assert_eq!(tokens.lookup("t-2"), Some("cron".to_string()));
        assert_eq!(tokens.lookup("t-3"), None);
        assert_eq!(tokens.lookup(""), None);
        assert!(!format!("{tokens:?}").contains("t-1"));
    }

    #[tokio::test]
    async fn test_verify() {
        assert_eq!(
            tokens().verify("t-2").await,
            Ok(Some("cron".to_string()))
        );
    }
}
