use crate::action::{action_types, Action, DispatchResult, Dispatchable, Dispatched};
use crate::channel::{Observer, StateChannel, Subscription};
use crate::dispatcher::Dispatcher;
use crate::error::StoreError;
use crate::reducer::{Reducer, RootReducer};
use crate::semaphore::Semaphore;
use crate::state::{read_shared, SharedState, State};
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, Weak};
use std::thread::{self, ThreadId};

/// Turns a freshly built store into an enhanced one
///
/// `apply_middleware` is the enhancer this crate provides. An enhancer that
/// installs no dispatch chain leaves the store with its plain dispatch.
pub trait StoreEnhancer: Send {
    fn enhance(self: Box<Self>, store: Store) -> Result<Store, StoreError>;
}

/// Store - holds application state and manages the Redux loop
///
/// Cloning a `Store` clones a handle; all clones share one state, one
/// reducer and one subscriber list. When the last handle is dropped,
/// observers receive `complete`.
///
/// ```ignore
/// let store = Store::builder(combine_reducers([("todos", todos())])?)
///     .enhancer(apply_middleware(vec![
///         Box::new(LoggingMiddleware::new()),
///         Box::new(ThunkMiddleware::new()),
///     ]))
///     .build()?;
///
/// store.dispatch(Action::new("ADD_TODO").with_payload("milk")).await?;
/// ```
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

pub(crate) struct StoreInner {
    reducer: RwLock<Arc<RootReducer>>,
    state: SharedState,
    /// Held while a transition is computed and published
    commit: Mutex<()>,
    /// Thread currently running the reducer or notifying subscribers
    dispatching_on: Mutex<Option<ThreadId>>,
    channel: StateChannel,
    chain: OnceLock<Chain>,
}

/// The composed dispatch and the gate serializing top-level calls into it
struct Chain {
    dispatch: Dispatcher,
    gate: Semaphore,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks the current thread as inside the base dispatch until dropped
struct DispatchingGuard<'a> {
    dispatching_on: &'a Mutex<Option<ThreadId>>,
}

impl<'a> DispatchingGuard<'a> {
    fn enter(dispatching_on: &'a Mutex<Option<ThreadId>>) -> Self {
        *lock(dispatching_on) = Some(thread::current().id());
        Self { dispatching_on }
    }
}

impl Drop for DispatchingGuard<'_> {
    fn drop(&mut self) {
        *lock(self.dispatching_on) = None;
    }
}

impl StoreInner {
    fn is_dispatching(&self) -> bool {
        *lock(&self.dispatching_on) == Some(thread::current().id())
    }

    /// The un-enhanced dispatch: validate, reduce, commit, notify
    pub(crate) fn dispatch_base(&self, action: Dispatchable) -> Result<Action, StoreError> {
        let action = action.into_action()?;
        if self.is_dispatching() {
            return Err(StoreError::Reentrancy);
        }

        let _commit = lock(&self.commit);
        // Subscribers run under the same guard, so a dispatch from a
        // notification fails instead of re-locking `commit`
        let _dispatching = DispatchingGuard::enter(&self.dispatching_on);
        let reducer = self
            .reducer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let current = read_shared(&self.state);
        let next = reducer.reduce(Some(&current), &action);

        match next {
            Ok(next) => {
                *self.state.write().unwrap_or_else(PoisonError::into_inner) = next.clone();
                self.channel.publish(&next);
                Ok(action)
            }
            Err(err) => {
                log::error!("Reducer failed for {}: {}", action.action_type, err);
                self.channel.error(&err);
                Err(err)
            }
        }
    }

    /// The composed chain without the gate, for dispatches nested in a running chain
    pub(crate) fn chain_dispatcher(&self) -> Option<Dispatcher> {
        self.chain.get().map(|chain| chain.dispatch.clone())
    }

    fn swap_reducer(&self, reducer: RootReducer) {
        *self.reducer.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(reducer);
    }

    fn add_slice(&self, key: String, reducer: Reducer) -> Result<(), StoreError> {
        let mut root = self.reducer.write().unwrap_or_else(PoisonError::into_inner);
        let RootReducer::Combined(combined) = &**root else {
            return Err(StoreError::NotCombined);
        };
        let mut combined = combined.clone();
        combined.insert(key.clone(), reducer)?;
        *root = Arc::new(RootReducer::Combined(combined));
        log::debug!("Added slice reducer for key {:?}", key);
        Ok(())
    }

    fn dispatch_replace(&self) -> Result<(), StoreError> {
        self.dispatch_base(Action::new(action_types().replace.as_str()).into())
            .map(|_| ())
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        log::debug!("Store dropped, completing {} subscribers", self.channel.subscriber_count());
        self.channel.complete();
    }
}

fn rejected<T: Send + 'static>(err: StoreError) -> BoxFuture<'static, Result<T, StoreError>> {
    future::ready(Err(err)).boxed()
}

impl Store {
    /// Start building a store around `reducer`
    pub fn builder(reducer: impl Into<RootReducer>) -> StoreBuilder {
        StoreBuilder {
            reducer: reducer.into(),
            preloaded_state: None,
            enhancers: Vec::new(),
        }
    }

    /// Build the un-enhanced store and run the initialization action
    fn base(reducer: RootReducer, preloaded_state: Option<State>) -> Result<Self, StoreError> {
        let init = Action::new(action_types().init.as_str());
        let initial = reducer.reduce(preloaded_state.as_ref(), &init)?;
        log::debug!("Store initialized with {:?}", reducer);

        Ok(Self {
            inner: Arc::new(StoreInner {
                reducer: RwLock::new(Arc::new(reducer)),
                state: Arc::new(RwLock::new(initial.clone())),
                commit: Mutex::new(()),
                dispatching_on: Mutex::new(None),
                channel: StateChannel::new(initial),
                chain: OnceLock::new(),
            }),
        })
    }

    pub(crate) fn downgrade(&self) -> Weak<StoreInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn shared_state(&self) -> SharedState {
        self.inner.state.clone()
    }

    /// Dispatcher running the base dispatch, the innermost link of a chain
    pub(crate) fn base_dispatcher(&self) -> Dispatcher {
        let inner = self.downgrade();
        Dispatcher::new(move |action| {
            let result = match inner.upgrade() {
                Some(inner) => inner.dispatch_base(action).map(Dispatched::Action),
                None => Err(StoreError::Closed),
            };
            future::ready(result).boxed()
        })
    }

    /// Install the composed dispatch and its gate; only once per store
    pub(crate) fn install_chain(&self, dispatch: Dispatcher, gate: Semaphore) -> Result<(), StoreError> {
        self.inner
            .chain
            .set(Chain { dispatch, gate })
            .map_err(|_| StoreError::MultipleEnhancers)
    }

    pub(crate) fn has_chain(&self) -> bool {
        self.inner.chain.get().is_some()
    }

    /// Dispatch through the middleware chain
    ///
    /// The call takes its place in the dispatch queue immediately; the chain
    /// for this action starts once every earlier dispatch has settled.
    /// Resolves to the committed action, or to whatever a middleware
    /// returned instead (e.g. a thunk's value).
    ///
    /// Must not be awaited from inside a running chain: middleware and
    /// thunks dispatch through the API they are handed.
    pub fn dispatch(&self, action: impl Into<Dispatchable>) -> BoxFuture<'static, DispatchResult> {
        if self.inner.is_dispatching() {
            return rejected(StoreError::Reentrancy);
        }
        let Some(chain) = self.inner.chain.get() else {
            return rejected(StoreError::DispatchDuringConstruction);
        };
        let dispatch = chain.dispatch.clone();
        let action = action.into();
        chain
            .gate
            .acquire_and_run(move || dispatch.dispatch(action))
            .boxed()
    }

    /// A cloneable handle to [`Store::dispatch`] that does not keep the store alive
    pub fn dispatcher(&self) -> Dispatcher {
        let inner = self.downgrade();
        Dispatcher::new(move |action| match inner.upgrade() {
            Some(inner) => Store { inner }.dispatch(action),
            None => rejected(StoreError::Closed),
        })
    }

    /// Current state; never waits for in-flight dispatches
    pub fn get_state(&self) -> State {
        read_shared(&self.inner.state)
    }

    /// Register an observer; it immediately receives the current state
    pub fn subscribe(&self, observer: impl Into<Observer>) -> Subscription {
        self.inner.channel.subscribe(observer.into())
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.channel.subscriber_count()
    }

    /// Swap the root reducer, then run the reserved REPLACE action
    pub fn replace_reducer(&self, reducer: impl Into<RootReducer>) -> BoxFuture<'static, Result<(), StoreError>> {
        let reducer = reducer.into();
        self.serialized(move |inner| {
            inner.swap_reducer(reducer);
            inner.dispatch_replace()
        })
    }

    /// Add (or replace) the slice reducer at `key` of a combined root
    ///
    /// Runs in dispatch order, after every dispatch issued before it, then
    /// initializes the new slice with the reserved REPLACE action.
    pub fn add_reducer(&self, key: impl Into<String>, reducer: Reducer) -> BoxFuture<'static, Result<(), StoreError>> {
        let key = key.into();
        self.serialized(move |inner| {
            inner.add_slice(key, reducer)?;
            inner.dispatch_replace()
        })
    }

    /// Run a reducer mutation behind the same gate as dispatch
    fn serialized<F>(&self, mutation: F) -> BoxFuture<'static, Result<(), StoreError>>
    where
        F: FnOnce(&StoreInner) -> Result<(), StoreError> + Send + 'static,
    {
        if self.inner.is_dispatching() {
            return rejected(StoreError::Reentrancy);
        }
        let Some(chain) = self.inner.chain.get() else {
            return rejected(StoreError::DispatchDuringConstruction);
        };
        let inner = self.inner.clone();
        chain
            .gate
            .acquire_and_run(move || async move { mutation(&inner) })
            .boxed()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("state", &self.get_state())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Builder for [`Store`]
pub struct StoreBuilder {
    reducer: RootReducer,
    preloaded_state: Option<State>,
    enhancers: Vec<Box<dyn StoreEnhancer>>,
}

impl StoreBuilder {
    /// State handed to the initialization action instead of "no state"
    pub fn preloaded_state(mut self, state: State) -> Self {
        self.preloaded_state = Some(state);
        self
    }

    /// Set the enhancer; a store accepts exactly one
    pub fn enhancer(mut self, enhancer: impl StoreEnhancer + 'static) -> Self {
        self.enhancers.push(Box::new(enhancer));
        self
    }

    pub fn build(mut self) -> Result<Store, StoreError> {
        if self.enhancers.len() > 1 {
            return Err(StoreError::MultipleEnhancers);
        }

        let store = Store::base(self.reducer, self.preloaded_state)?;
        let store = match self.enhancers.pop() {
            Some(enhancer) => enhancer.enhance(store)?,
            None => store,
        };
        if !store.has_chain() {
            store.install_chain(store.base_dispatcher(), Semaphore::new(1)?)?;
        }
        Ok(store)
    }
}

/// Create a store: `create_store(reducer, preloaded_state, enhancer)`
pub fn create_store(
    reducer: impl Into<RootReducer>,
    preloaded_state: Option<State>,
    enhancer: Option<Box<dyn StoreEnhancer>>,
) -> Result<Store, StoreError> {
    let mut builder = Store::builder(reducer);
    builder.preloaded_state = preloaded_state;
    builder.enhancers.extend(enhancer);
    builder.build()
}
