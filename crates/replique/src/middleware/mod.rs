//! Middleware system
//!
//! Middleware wraps the store's dispatch. Each one receives the action and
//! the `next` dispatcher, and decides what reaches the reducer.
//!
//! ## Design
//!
//! ```text
//! dispatch → m1 → m2 → ... → base dispatch → Reducer → State
//! ```
//!
//! Each middleware can:
//! - Inspect actions and the current state
//! - Dispatch new actions through the full chain
//! - Perform async side effects
//! - Swallow an action or resolve it to something else
//!
//! Top-level dispatches are admitted through a FIFO gate, so one chain
//! invocation (including the follow-up dispatches it awaits) settles before
//! the next begins. Dispatches issued through [`MiddlewareApi`] join the
//! running invocation instead of queueing behind it.
//!
//! ## Example
//!
//! ```ignore
//! struct Stamp;
//!
//! impl Middleware for Stamp {
//!     fn handle<'a>(
//!         &'a self,
//!         _api: &'a MiddlewareApi,
//!         action: Dispatchable,
//!         next: Dispatcher,
//!     ) -> BoxFuture<'a, DispatchResult> {
//!         Box::pin(async move {
//!             match action {
//!                 Dispatchable::Action(action) => next.dispatch(action.with_meta("stamped")).await,
//!                 other => next.dispatch(other).await,
//!             }
//!         })
//!     }
//! }
//! ```

use crate::action::{DispatchResult, Dispatchable};
use crate::config::StoreConfig;
use crate::dispatcher::Dispatcher;
use crate::error::StoreError;
use crate::semaphore::Semaphore;
use crate::state::{read_shared, SharedState, State};
use crate::store::{Store, StoreEnhancer, StoreInner};
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use std::fmt;
use std::sync::{Arc, Weak};

// Module declarations
pub mod logging;
pub mod thunk;

// Re-exports
pub use logging::LoggingMiddleware;
pub use thunk::{Dependencies, Thunk, ThunkApi, ThunkMiddleware};

/// Middleware trait - wraps dispatch
///
/// `attach` runs once while the chain is composed; dispatching from there
/// fails with [`StoreError::DispatchDuringConstruction`]. `handle` runs for
/// every action that reaches this middleware.
pub trait Middleware: Send + Sync {
    /// Called once with the API before the chain is usable
    fn attach(&self, _api: &MiddlewareApi) -> Result<(), StoreError> {
        Ok(())
    }

    /// Handle an action
    ///
    /// # Parameters
    /// - `api`: State access and dispatch through the whole chain
    /// - `action`: The value being dispatched
    /// - `next`: The rest of the chain; not calling it stops the action here
    fn handle<'a>(
        &'a self,
        api: &'a MiddlewareApi,
        action: Dispatchable,
        next: Dispatcher,
    ) -> BoxFuture<'a, DispatchResult>;
}

/// What a middleware sees of the store
#[derive(Clone)]
pub struct MiddlewareApi {
    state: SharedState,
    store: Weak<StoreInner>,
}

impl MiddlewareApi {
    pub(crate) fn new(store: &Store) -> Self {
        Self {
            state: store.shared_state(),
            store: store.downgrade(),
        }
    }

    pub fn get_state(&self) -> State {
        read_shared(&self.state)
    }

    /// Dispatch from the start of the chain, as part of the running invocation
    pub fn dispatch(&self, action: impl Into<Dispatchable>) -> BoxFuture<'static, DispatchResult> {
        let Some(store) = self.store.upgrade() else {
            return future::ready(Err(StoreError::Closed)).boxed();
        };
        match store.chain_dispatcher() {
            Some(chain) => chain.dispatch(action),
            None => future::ready(Err(StoreError::DispatchDuringConstruction)).boxed(),
        }
    }

    /// [`MiddlewareApi::dispatch`] as a cloneable handle
    pub fn dispatcher(&self) -> Dispatcher {
        let api = self.clone();
        Dispatcher::new(move |action| api.dispatch(action))
    }
}

impl fmt::Debug for MiddlewareApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareApi")
            .field("state", &self.get_state())
            .finish_non_exhaustive()
    }
}

/// Wrap `base` in `middleware`, the first entry outermost
pub fn compose(middleware: &[Arc<dyn Middleware>], api: &MiddlewareApi, base: Dispatcher) -> Dispatcher {
    middleware.iter().rev().fold(base, |next, middleware| {
        let middleware = middleware.clone();
        let api = api.clone();
        Dispatcher::new(move |action| {
            let middleware = middleware.clone();
            let api = api.clone();
            let next = next.clone();
            async move { middleware.handle(&api, action, next).await }.boxed()
        })
    })
}

/// Store enhancer installing a middleware chain
pub struct ApplyMiddleware {
    middleware: Vec<Arc<dyn Middleware>>,
    concurrency: usize,
}

/// Build an enhancer running `middleware` in order around every dispatch
pub fn apply_middleware(middleware: Vec<Box<dyn Middleware>>) -> ApplyMiddleware {
    ApplyMiddleware {
        middleware: middleware.into_iter().map(Arc::from).collect(),
        concurrency: 1,
    }
}

/// Like [`apply_middleware`], with the dispatch concurrency from `config`
pub fn apply_middleware_with_config(middleware: Vec<Box<dyn Middleware>>, config: &StoreConfig) -> ApplyMiddleware {
    apply_middleware(middleware).with_concurrency(config.dispatch_concurrency)
}

impl ApplyMiddleware {
    /// Allow `concurrency` top-level dispatches in the chain at once
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

impl StoreEnhancer for ApplyMiddleware {
    fn enhance(self: Box<Self>, store: Store) -> Result<Store, StoreError> {
        let gate = Semaphore::new(self.concurrency)?;
        let api = MiddlewareApi::new(&store);
        for middleware in &self.middleware {
            middleware.attach(&api)?;
        }

        let concurrency = gate.max_concurrent();
        let chain = compose(&self.middleware, &api, store.base_dispatcher());
        store.install_chain(chain, gate)?;
        log::debug!(
            "Applied {} middleware (dispatch concurrency {})",
            self.middleware.len(),
            concurrency
        );
        Ok(store)
    }
}

impl fmt::Debug for ApplyMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplyMiddleware")
            .field("middleware", &self.middleware.len())
            .field("concurrency", &self.concurrency)
            .finish()
    }
}
