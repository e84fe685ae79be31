//! Request handler seam.
//!
//! A dispatcher chain is an ordered slice of [`RequestHandler`]s. Each handler
//! receives the shared [`RequestContext`] and a [`Next`] cursor over the rest of
//! the chain. Calling [`Next::run`] advances; returning a [`Reply`] (or an
//! error) ends the chain. `Next` is `Copy`, so a handler may run the remainder
//! of the chain more than once.

use crate::context::RequestContext;
use crate::error::{HostError, Result};
use bytes::Bytes;
use http::StatusCode;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Future returned by [`RequestHandler::on_request`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<Reply>> + Send + 'a>>;

/// What a handler chain produced.
#[derive(Debug)]
pub enum Reply {
    /// JSON body answered with 200
    Body(Value),
    /// JSON body with an explicit status
    Json(StatusCode, Value),
    /// No body
    Empty(StatusCode),
    /// Fully formed response
    Response(http::Response<Bytes>),
}

impl Reply {
    /// Status the reply will be written with.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Body(_) => StatusCode::OK,
            Self::Json(status, _) | Self::Empty(status) => *status,
            Self::Response(response) => response.status(),
        }
    }

    /// JSON body, if the reply carries one.
    #[must_use]
    pub const fn json(&self) -> Option<&Value> {
        match self {
            Self::Body(body) | Self::Json(_, body) => Some(body),
            Self::Empty(_) | Self::Response(_) => None,
        }
    }
}

/// One stage of a dispatcher chain.
pub trait RequestHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Handle `ctx`, optionally delegating to the rest of the chain.
    fn on_request<'a>(&'a self, ctx: &'a Arc<RequestContext>, next: Next<'a>) -> HandlerFuture<'a>;
}

/// Cursor over the handlers after the current one.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [Arc<dyn RequestHandler>],
    ctx: &'a Arc<RequestContext>,
}

impl<'a> Next<'a> {
    /// Cursor at the start of `chain`.
    #[must_use]
    pub const fn new(chain: &'a [Arc<dyn RequestHandler>], ctx: &'a Arc<RequestContext>) -> Self {
        Self { chain, ctx }
    }

    /// Number of handlers left.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.chain.len()
    }

    /// Run the rest of the chain.
    ///
    /// Running past the last handler yields a 404.
    #[must_use]
    pub fn run(self) -> HandlerFuture<'a> {
        match self.chain.split_first() {
            Some((handler, rest)) => handler.on_request(self.ctx, Next::new(rest, self.ctx)),
            None => Box::pin(async { Err(HostError::http(404)) }),
        }
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field(
                "chain",
                &self.chain.iter().map(|h| h.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use http::Method;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    impl RequestHandler for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn on_request<'a>(
            &'a self,
            _ctx: &'a Arc<RequestContext>,
            next: Next<'a>,
        ) -> HandlerFuture<'a> {
            Box::pin(async move {
                self.0.fetch_add(1, Ordering::SeqCst);
                next.run().await
            })
        }
    }

    struct Answer;

    impl RequestHandler for Answer {
        fn name(&self) -> &str {
            "answer"
        }

        fn on_request<'a>(
            &'a self,
            _ctx: &'a Arc<RequestContext>,
            _next: Next<'a>,
        ) -> HandlerFuture<'a> {
            Box::pin(async { Ok(Reply::Body(json!(42))) })
        }
    }

    #[tokio::test]
    async fn test_chain_runs_in_order() {
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        let chain: Vec<Arc<dyn RequestHandler>> = vec![counting.clone(), Arc::new(Answer)];
        let ctx = RequestContext::builder(Method::GET, "/".parse().unwrap()).build();

        let reply = Next::new(&chain, &ctx).run().await.unwrap();

        assert_eq!(reply.json(), Some(&json!(42)));
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_end_of_chain_is_not_found() {
        let chain: Vec<Arc<dyn RequestHandler>> = vec![Arc::new(Counting(AtomicUsize::new(0)))];
        let ctx = RequestContext::builder(Method::GET, "/".parse().unwrap()).build();

        let err = Next::new(&chain, &ctx).run().await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_reply_status() {
        assert_eq!(Reply::Body(json!(1)).status(), StatusCode::OK);
        assert_eq!(
            Reply::Empty(StatusCode::NOT_MODIFIED).status(),
            StatusCode::NOT_MODIFIED
        );
        assert!(Reply::Empty(StatusCode::OK).json().is_none());
    }
}
