//! Integration tests for the Basic and Bearer request handlers.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use http::header::WWW_AUTHENTICATE;
use http::{Method, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use svchost_auth::{
    BasicAuthConfig, BasicAuthHandler, BearerAuthConfig, BearerAuthHandler, CredentialVerifier,
    VerifyFuture,
};
use svchost_core::{
    HandlerFuture, HostError, Next, Reply, RequestContext, RequestHandler, Result, Service,
};
use svchost_testing::helpers::{basic_auth, bearer, request};

/// Terminal handler echoing the authenticated user.
struct Whoami;

impl RequestHandler for Whoami {
    fn name(&self) -> &str {
        "whoami"
    }

    fn on_request<'a>(&'a self, ctx: &'a Arc<RequestContext>, _next: Next<'a>) -> HandlerFuture<'a> {
        Box::pin(async move { Ok(Reply::Body(json!({"user": ctx.user()}))) })
    }
}

async fn run(handler: Arc<dyn RequestHandler>, ctx: &Arc<RequestContext>) -> Result<Reply> {
    let chain: Vec<Arc<dyn RequestHandler>> = vec![handler, Arc::new(Whoami)];
    Next::new(&chain, ctx).run().await
}

fn basic_config() -> Value {
    let hash = bcrypt::hash("wonderland", 4).unwrap();
    json!({"auth": {"basic": {"credentials": [{"username": "alice", "password": hash}]}}})
}

fn basic_handler() -> Arc<BasicAuthHandler> {
    let config = BasicAuthConfig::from_host_config(&basic_config()).unwrap();
    Arc::new(BasicAuthHandler::from_config(&config).unwrap())
}

fn challenge_of(ctx: &RequestContext) -> String {
    ctx.response_header(&WWW_AUTHENTICATE)
        .map(|v| v.to_str().unwrap().to_string())
        .unwrap_or_default()
}

// ===========================================================================
// Basic
// ===========================================================================

#[tokio::test]
async fn test_basic_missing_credentials_is_challenged() {
    let ctx = request(Method::GET, "/").build();
    let err = run(basic_handler(), &ctx).await.unwrap_err();

    assert_eq!(err.status_code(), 401);
    assert_eq!(challenge_of(&ctx), "Basic realm=\"Secure Area\"");
}

#[tokio::test]
async fn test_basic_correct_credentials_proceed() {
    let ctx = request(Method::GET, "/")
        .header("authorization", &basic_auth("alice", "wonderland"))
        .build();
    let reply = run(basic_handler(), &ctx).await.unwrap();

    assert_eq!(reply.json(), Some(&json!({"user": "alice"})));
    assert_eq!(ctx.user().as_deref(), Some("alice"));
    assert_eq!(ctx.identity(), "alice");
}

#[tokio::test]
async fn test_basic_wrong_password_keeps_claim() {
    let ctx = request(Method::GET, "/")
        .header("authorization", &basic_auth("alice", "nope"))
        .build();
    let err = run(basic_handler(), &ctx).await.unwrap_err();

    assert_eq!(err.status_code(), 401);
    assert_eq!(ctx.user(), None);
    assert_eq!(ctx.unverified_user().as_deref(), Some("alice"));
    assert_eq!(ctx.identity(), "~alice");
}

#[tokio::test]
async fn test_basic_password_may_contain_colons() {
    let hash = bcrypt::hash("a:b:c", 4).unwrap();
    let config = json!({"authBasic": {"credentials": [{"username": "bob", "password": hash}]}});
    let handler = Arc::new(
        BasicAuthHandler::from_config(&BasicAuthConfig::from_host_config(&config).unwrap())
            .unwrap(),
    );
    let ctx = request(Method::GET, "/")
        .header("authorization", &basic_auth("bob", "a:b:c"))
        .build();

    assert!(run(handler, &ctx).await.is_ok());
}

#[tokio::test]
async fn test_basic_unsupported_scheme_is_challenged() {
    let ctx = request(Method::GET, "/")
        .header("authorization", "Digest username=\"alice\"")
        .build();
    let err = run(basic_handler(), &ctx).await.unwrap_err();

    assert_eq!(err.status_code(), 401);
    assert!(challenge_of(&ctx).starts_with("Basic"));
}

#[tokio::test]
async fn test_basic_garbage_token_is_rejected() {
    let ctx = request(Method::GET, "/")
        .header("authorization", "Basic !!!not-base64")
        .build();
    assert_eq!(run(basic_handler(), &ctx).await.unwrap_err().status_code(), 401);
}

#[tokio::test]
async fn test_basic_options_ends_chain_with_challenge() {
    let ctx = request(Method::OPTIONS, "/").build();
    let reply = run(basic_handler(), &ctx).await.unwrap();

    assert_eq!(reply.status(), StatusCode::OK);
    assert!(reply.json().is_none());
    assert_eq!(challenge_of(&ctx), "Basic realm=\"Secure Area\"");
}

#[tokio::test]
async fn test_basic_configured_through_service_hook() {
    let handler = Arc::new(BasicAuthHandler::new());
    assert!(!handler.is_configured());

    handler
        .on_config(&basic_config())
        .expect("basic auth has a configure hook")
        .await
        .unwrap();
    assert!(handler.is_configured());

    let ctx = request(Method::GET, "/")
        .header("authorization", &basic_auth("alice", "wonderland"))
        .build();
    assert!(run(handler, &ctx).await.is_ok());
}

#[tokio::test]
async fn test_basic_unconfigured_fails_closed() {
    let ctx = request(Method::GET, "/")
        .header("authorization", &basic_auth("alice", "wonderland"))
        .build();
    let err = run(Arc::new(BasicAuthHandler::new()), &ctx).await.unwrap_err();
    assert_eq!(err.status_code(), 500);
}

struct Fails;

impl CredentialVerifier for Fails {
    fn verify<'a>(&'a self, _username: &'a str, _password: &'a str) -> VerifyFuture<'a, bool> {
        Box::pin(async { Err(HostError::unexpected("directory offline")) })
    }
}

#[tokio::test]
async fn test_basic_verifier_failure_propagates() {
    let handler = Arc::new(BasicAuthHandler::with_verifier(Arc::new(Fails), "Staff"));
    let ctx = request(Method::GET, "/")
        .header("authorization", &basic_auth("alice", "wonderland"))
        .build();

    let err = run(handler, &ctx).await.unwrap_err();
    assert!(matches!(err, HostError::Unexpected(_)));
}

// ===========================================================================
// Bearer
// ===========================================================================

fn bearer_handler() -> Arc<BearerAuthHandler> {
    let config = json!({"auth": {"bearer": {"tokens": [{"token": "t-1", "user": "robot"}]}}});
    Arc::new(BearerAuthHandler::from_config(
        &BearerAuthConfig::from_host_config(&config).unwrap(),
    ))
}

#[tokio::test]
async fn test_bearer_valid_token_sets_user() {
    let ctx = request(Method::GET, "/")
        .header("authorization", &bearer("t-1"))
        .build();
    let reply = run(bearer_handler(), &ctx).await.unwrap();

    assert_eq!(reply.json(), Some(&json!({"user": "robot"})));
}

#[tokio::test]
async fn test_bearer_invalid_or_missing_token() {
    for header in [Some("Bearer t-2"), Some("Bearer "), Some("Basic YTpi"), None] {
        let builder = request(Method::GET, "/");
        let ctx = match header {
            Some(value) => builder.header("authorization", value).build(),
            None => builder.build(),
        };
        let err = run(bearer_handler(), &ctx).await.unwrap_err();

        assert_eq!(err.status_code(), 401, "header {header:?}");
        assert_eq!(challenge_of(&ctx), "Bearer realm=\"Secure Area\"");
    }
}
