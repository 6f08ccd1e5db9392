//! Single-writer reactive state container
//!
//! This crate provides:
//! - A store holding immutable state, updated only by reducers
//! - Reducer combination over named slices, with shape validation
//! - Async middleware with serialized (FIFO) dispatch
//! - Action creators with REQUEST/SUCCESS/FAILURE phases
//! - Memoized selectors that may depend on async inputs
//! - Store configuration (StoreConfig)

pub mod action;
pub mod action_creator;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod middleware;
pub mod reducer;
pub mod selector;
pub mod semaphore;
pub mod state;
pub mod store;

pub use action::{is_action, is_plain_object, is_reserved, Action, DispatchResult, Dispatchable, Dispatched};
pub use action_creator::{
    bind_action_creator, bind_action_creators, create_action, create_async_action, create_payload_action,
    ActionCreator, BoundActionCreator,
};
pub use channel::{Observer, Subscription};
pub use config::{load_config_file, StoreConfig};
pub use dispatcher::Dispatcher;
pub use error::StoreError;
pub use middleware::{
    apply_middleware, apply_middleware_with_config, compose, ApplyMiddleware, Dependencies, LoggingMiddleware,
    Middleware, MiddlewareApi, Thunk, ThunkApi, ThunkMiddleware,
};
pub use reducer::{combine_reducers, reducer, CombineOptions, CombinedReducer, Reducer, RootReducer};
pub use selector::{
    create_selector, shallow_equal, InputSelector, Memoized, Projector, Selected, Selector, SelectorOptions,
};
pub use semaphore::Semaphore;
pub use state::State;
pub use store::{create_store, Store, StoreBuilder, StoreEnhancer};
