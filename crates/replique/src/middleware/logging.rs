use crate::action::{DispatchResult, Dispatchable};
use crate::dispatcher::Dispatcher;
use crate::middleware::{Middleware, MiddlewareApi};
use futures::future::BoxFuture;

/// LoggingMiddleware - logs all actions passing through
#[derive(Debug)]
pub struct LoggingMiddleware;

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoggingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for LoggingMiddleware {
    fn handle<'a>(
        &'a self,
        _api: &'a MiddlewareApi,
        action: Dispatchable,
        next: Dispatcher,
    ) -> BoxFuture<'a, DispatchResult> {
        Box::pin(async move {
            log::debug!("Action: {:?}", action);
            let result = next.dispatch(action).await;
            if let Err(err) = &result {
                log::warn!("Dispatch failed: {}", err);
            }
            result
        })
    }
}
