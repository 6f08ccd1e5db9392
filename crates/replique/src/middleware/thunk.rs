//! Thunks - deferred async work dispatched like an action
//!
//! A [`Thunk`] receives a [`ThunkApi`] (dispatch, state, dependencies) and
//! resolves to a JSON value. Only [`ThunkMiddleware`] runs thunks; the base
//! dispatch rejects them.

use crate::action::{DispatchResult, Dispatchable, Dispatched};
use crate::dispatcher::Dispatcher;
use crate::error::StoreError;
use crate::middleware::{Middleware, MiddlewareApi};
use crate::state::State;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type ThunkFn = Box<dyn FnOnce(ThunkApi) -> BoxFuture<'static, Result<Value, StoreError>> + Send>;

/// Deferred work that may dispatch and read state
pub struct Thunk {
    run: ThunkFn,
}

impl Thunk {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(ThunkApi) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, StoreError>> + Send + 'static,
    {
        Self {
            run: Box::new(move |api| f(api).boxed()),
        }
    }

    pub(crate) fn run(self, api: ThunkApi) -> BoxFuture<'static, Result<Value, StoreError>> {
        (self.run)(api)
    }
}

impl fmt::Debug for Thunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Thunk")
    }
}

/// Injected services made available to every thunk
#[derive(Clone, Default)]
pub struct Dependencies(Option<Arc<dyn Any + Send + Sync>>);

impl Dependencies {
    pub fn new<T: Any + Send + Sync>(dependencies: T) -> Self {
        Self(Some(Arc::new(dependencies)))
    }

    /// The injected value, if one of type `T` was provided
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|deps| deps.downcast_ref::<T>())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Dependencies").field(&!self.is_empty()).finish()
    }
}

/// What a running thunk sees of the store
#[derive(Clone, Debug)]
pub struct ThunkApi {
    api: MiddlewareApi,
    dependencies: Dependencies,
}

impl ThunkApi {
    /// Dispatch through the whole chain, as part of this thunk's invocation
    pub fn dispatch(&self, action: impl Into<Dispatchable>) -> BoxFuture<'static, DispatchResult> {
        self.api.dispatch(action)
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.api.dispatcher()
    }

    pub fn get_state(&self) -> State {
        self.api.get_state()
    }

    pub fn dependencies(&self) -> &Dependencies {
        &self.dependencies
    }
}

/// ThunkMiddleware - runs thunks, passes everything else on
#[derive(Debug, Default)]
pub struct ThunkMiddleware {
    dependencies: Dependencies,
}

impl ThunkMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand `dependencies` to every thunk this middleware runs
    pub fn with_dependencies<T: Any + Send + Sync>(dependencies: T) -> Self {
        Self {
            dependencies: Dependencies::new(dependencies),
        }
    }
}

impl Middleware for ThunkMiddleware {
    fn handle<'a>(
        &'a self,
        api: &'a MiddlewareApi,
        action: Dispatchable,
        next: Dispatcher,
    ) -> BoxFuture<'a, DispatchResult> {
        Box::pin(async move {
            match action {
                Dispatchable::Thunk(thunk) => {
                    let thunk_api = ThunkApi {
                        api: api.clone(),
                        dependencies: self.dependencies.clone(),
                    };
                    thunk.run(thunk_api).await.map(Dispatched::Value)
                }
                other => next.dispatch(other).await,
            }
        })
    }
}
