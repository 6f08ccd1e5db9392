//! Store errors
//!
//! Every failure the store can report. Configuration errors are raised
//! synchronously at the call site and never retried; operation failures
//! carry the error returned by a user operation.

use thiserror::Error;

/// Errors raised by the store, its middleware chain, action creators and selectors
#[derive(Debug, Error)]
pub enum StoreError {
    /// The dispatched value is not a plain action record
    #[error("{0}")]
    InvalidAction(String),

    /// A reducer tried to dispatch while it was running
    #[error("Reducers may not dispatch actions.")]
    Reentrancy,

    /// The root reducer returned no value
    #[error(
        "Given action \"{action_type}\", the root reducer returned no value. \
         To ignore an action, you must explicitly return the previous state."
    )]
    MissingReducerOutput { action_type: String },

    /// A slice reducer returned no value, either while probed or while reducing
    #[error(
        "The slice reducer for key \"{key}\" returned no value for an action of type \"{action_type}\". \
         To ignore an action, you must explicitly return the previous state. \
         Reserved \"@@replique/*\" actions must never be handled."
    )]
    SliceShape { key: String, action_type: String },

    /// More than one enhancer was supplied to a single store
    #[error(
        "It looks like you are passing several store enhancers. \
         This is not supported. Instead, compose them together into a single enhancer."
    )]
    MultipleEnhancers,

    /// Middleware dispatched before the chain was composed
    #[error(
        "Dispatching while constructing your middleware is not allowed. \
         Other middleware would not be applied to this dispatch."
    )]
    DispatchDuringConstruction,

    /// A payload creator did not return `{ payload, meta?, error? }`
    #[error(
        "The payload creator for \"{action_type}\" must return an object with a \"payload\" field. \
         Instead, received: '{kind}'"
    )]
    MissingPayload {
        action_type: String,
        kind: &'static str,
    },

    /// Several (or zero) input selectors without a projector
    #[error("Invalid parameters: {inputs} input selectors were given without a projector.")]
    AmbiguousSelector { inputs: usize },

    /// Semaphore constructed with fewer than one slot
    #[error("max_concurrent must be greater than or equal to 1, got {0}")]
    InvalidConcurrency(usize),

    /// `add_reducer` on a store whose root reducer is not slice-combined
    #[error("add_reducer requires a root reducer built with combine_reducers()")]
    NotCombined,

    /// The store behind a middleware API or dispatcher is gone
    #[error("The store has been dropped")]
    Closed,

    /// An action creator's operation failed
    #[error("Operation for \"{action_type}\" failed: {source}")]
    Operation {
        action_type: String,
        source: anyhow::Error,
    },
}

impl StoreError {
    /// Usage mistakes that will fail the same way on every retry
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidAction(_)
                | StoreError::MissingReducerOutput { .. }
                | StoreError::MultipleEnhancers
                | StoreError::DispatchDuringConstruction
                | StoreError::MissingPayload { .. }
                | StoreError::AmbiguousSelector { .. }
                | StoreError::InvalidConcurrency(_)
                | StoreError::NotCombined
        )
    }
}
