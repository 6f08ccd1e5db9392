//! Dispatcher - a cloneable handle to some dispatch function
//!
//! The store hands out dispatchers bound to its gated top-level dispatch,
//! middleware receives one for the next handler in the chain, and thunks get
//! one that re-enters the chain from the beginning.

use crate::action::{DispatchResult, Dispatchable};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

type DispatchFn = dyn Fn(Dispatchable) -> BoxFuture<'static, DispatchResult> + Send + Sync;

/// Cloneable dispatch function
#[derive(Clone)]
pub struct Dispatcher {
    dispatch: Arc<DispatchFn>,
}

impl Dispatcher {
    pub fn new<F>(dispatch: F) -> Self
    where
        F: Fn(Dispatchable) -> BoxFuture<'static, DispatchResult> + Send + Sync + 'static,
    {
        Self {
            dispatch: Arc::new(dispatch),
        }
    }

    /// Dispatch an action, raw value or thunk
    ///
    /// The work is requested when this is called; the returned future
    /// resolves once the action has been fully processed.
    pub fn dispatch(&self, action: impl Into<Dispatchable>) -> BoxFuture<'static, DispatchResult> {
        (self.dispatch)(action.into())
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, Dispatched};
    use futures::FutureExt;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_dispatcher() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let dispatcher = Dispatcher::new(move |action| {
            sink.lock().unwrap().push(format!("{:?}", action.action_type()));
            let action = action.as_action().cloned();
            async move { Ok(Dispatched::Action(action.unwrap_or_else(|| Action::new("NONE")))) }
                .boxed()
        });

        let result = dispatcher.clone().dispatch(Action::new("PING")).await.unwrap();
        assert_eq!(result.action().unwrap().action_type, "PING");
        assert_eq!(*received.lock().unwrap(), vec!["Some(\"PING\")".to_string()]);
    }
}
