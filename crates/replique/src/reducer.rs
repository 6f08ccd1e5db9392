//! Reducers and slice combination
//!
//! A reducer is a pure function `(Option<&State>, &Action) -> Option<State>`.
//! `None` coming in means "no state yet"; `None` going out means "no value",
//! which is always a configuration error. The root reducer of a store is
//! either a plain reducer or a [`CombinedReducer`] built from named slices;
//! only the latter can be extended later with `Store::add_reducer`.

use crate::action::{action_types, probe_unknown_action, Action};
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::state::State;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Pure state transition
pub type Reducer = Arc<dyn Fn(Option<&State>, &Action) -> Option<State> + Send + Sync>;

/// Wrap a closure as a [`Reducer`]
pub fn reducer<F>(f: F) -> Reducer
where
    F: Fn(Option<&State>, &Action) -> Option<State> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CombineOptions {
    /// Probe every slice reducer on every call instead of once when added
    pub revalidate_every_call: bool,
}

impl From<&StoreConfig> for CombineOptions {
    fn from(config: &StoreConfig) -> Self {
        Self {
            revalidate_every_call: config.revalidate_slices,
        }
    }
}

/// One reducer over a composite state, delegating each slice to its own reducer
#[derive(Clone)]
pub struct CombinedReducer {
    slices: IndexMap<String, Reducer>,
    options: CombineOptions,
}

/// Combine named slice reducers, validating each of them once
pub fn combine_reducers<I, K>(reducers: I) -> Result<CombinedReducer, StoreError>
where
    I: IntoIterator<Item = (K, Reducer)>,
    K: Into<String>,
{
    CombinedReducer::with_options(reducers, CombineOptions::default())
}

impl CombinedReducer {
    pub fn with_options<I, K>(reducers: I, options: CombineOptions) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = (K, Reducer)>,
        K: Into<String>,
    {
        let mut combined = Self {
            slices: IndexMap::new(),
            options,
        };
        for (key, reducer) in reducers {
            combined.insert(key, reducer)?;
        }
        Ok(combined)
    }

    /// Add or replace the reducer of one slice
    pub fn insert(&mut self, key: impl Into<String>, reducer: Reducer) -> Result<(), StoreError> {
        let key = key.into();
        assert_slice_shape(&key, &reducer)?;
        if self.slices.insert(key.clone(), reducer).is_some() {
            log::debug!("Replaced slice reducer for key {:?}", key);
        }
        Ok(())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slices.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// Compute the next composite state
    ///
    /// Returns `state` itself when no slice changed and its keys are exactly
    /// the reducer keys, so unrelated subscribers can skip work by identity.
    pub fn reduce(&self, state: Option<&State>, action: &Action) -> Result<State, StoreError> {
        if self.options.revalidate_every_call {
            for (key, reducer) in &self.slices {
                assert_slice_shape(key, reducer)?;
            }
        }

        let mut next = IndexMap::with_capacity(self.slices.len());
        let mut has_changed = false;
        for (key, reducer) in &self.slices {
            let previous = state.and_then(|s| s.get(key));
            let Some(slice) = reducer(previous, action) else {
                return Err(StoreError::SliceShape {
                    key: key.clone(),
                    action_type: action.action_type.clone(),
                });
            };
            has_changed |= !previous.is_some_and(|p| p.ptr_eq(&slice));
            next.insert(key.clone(), slice);
        }

        if let Some(state) = state {
            if !has_changed && self.same_keys(state) {
                return Ok(state.clone());
            }
        }
        Ok(State::Tree(Arc::new(next)))
    }

    fn same_keys(&self, state: &State) -> bool {
        match state.slices() {
            Some(slices) => {
                slices.len() == self.slices.len()
                    && slices.keys().all(|key| self.slices.contains_key(key))
            }
            None => false,
        }
    }

    /// Use this combination as a slice of another one
    ///
    /// Errors become "no value", which the outer combination reports for
    /// its own key.
    pub fn into_reducer(self) -> Reducer {
        reducer(move |state, action| match self.reduce(state, action) {
            Ok(next) => Some(next),
            Err(err) => {
                log::error!("Nested combined reducer failed: {}", err);
                None
            }
        })
    }
}

impl fmt::Debug for CombinedReducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CombinedReducer")
            .field("slices", &self.slices.keys().collect::<Vec<_>>())
            .field("options", &self.options)
            .finish()
    }
}

/// Probe a slice reducer with INIT and with an unknown type, both without state
fn assert_slice_shape(key: &str, reducer: &Reducer) -> Result<(), StoreError> {
    let init = Action::new(action_types().init.as_str());
    if reducer(None, &init).is_none() {
        return Err(StoreError::SliceShape {
            key: key.to_string(),
            action_type: init.action_type,
        });
    }

    let probe = Action::new(probe_unknown_action());
    if reducer(None, &probe).is_none() {
        return Err(StoreError::SliceShape {
            key: key.to_string(),
            action_type: probe.action_type,
        });
    }
    Ok(())
}

/// The reducer a store runs for every action
#[derive(Clone)]
pub enum RootReducer {
    Plain(Reducer),
    Combined(CombinedReducer),
}

impl RootReducer {
    pub fn reduce(&self, state: Option<&State>, action: &Action) -> Result<State, StoreError> {
        match self {
            RootReducer::Plain(reducer) => {
                reducer(state, action).ok_or_else(|| StoreError::MissingReducerOutput {
                    action_type: action.action_type.clone(),
                })
            }
            RootReducer::Combined(combined) => combined.reduce(state, action),
        }
    }
}

impl fmt::Debug for RootReducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RootReducer::Plain(_) => f.write_str("Plain"),
            RootReducer::Combined(combined) => combined.fmt(f),
        }
    }
}

impl From<Reducer> for RootReducer {
    fn from(reducer: Reducer) -> Self {
        RootReducer::Plain(reducer)
    }
}

impl From<CombinedReducer> for RootReducer {
    fn from(combined: CombinedReducer) -> Self {
        RootReducer::Combined(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> Reducer {
        reducer(|state, action| {
            let current = state.and_then(|s| s.value()).and_then(|v| v.as_i64()).unwrap_or(0);
            match action.action_type.as_str() {
                "INCREMENT" => Some(State::leaf(current + 1)),
                _ => Some(state.cloned().unwrap_or_else(|| State::leaf(0))),
            }
        })
    }

    fn identity() -> Reducer {
        reducer(|state, _| Some(state.cloned().unwrap_or_else(State::null)))
    }

    #[test]
    fn test_unrelated_action_keeps_reference() {
        let combined = combine_reducers([("a", identity()), ("b", identity())]).unwrap();
        let state = State::tree([("a", State::leaf(1)), ("b", State::leaf(2))]);

        let next = combined.reduce(Some(&state), &Action::new("UNKNOWN")).unwrap();
        assert!(next.ptr_eq(&state));
    }

    #[test]
    fn test_changed_slice_builds_new_state_sharing_the_rest() {
        let combined = combine_reducers([("count", counter()), ("other", identity())]).unwrap();
        let other = State::leaf("x");
        let state = State::tree([("count", State::leaf(1)), ("other", other.clone())]);

        let next = combined.reduce(Some(&state), &Action::new("INCREMENT")).unwrap();
        assert!(!next.ptr_eq(&state));
        assert_eq!(next.get("count").unwrap().value(), Some(&json!(2)));
        assert!(next.get("other").unwrap().ptr_eq(&other));
    }

    #[test]
    fn test_extra_keys_force_new_state() {
        let combined = combine_reducers([("a", identity())]).unwrap();
        let state = State::tree([("a", State::leaf(1)), ("stale", State::leaf(2))]);

        let next = combined.reduce(Some(&state), &Action::new("UNKNOWN")).unwrap();
        assert!(!next.ptr_eq(&state));
        assert_eq!(next.keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn test_initial_state_from_slices() {
        let combined = combine_reducers([("count", counter()), ("other", identity())]).unwrap();
        let state = combined
            .reduce(None, &Action::new(action_types().init.as_str()))
            .unwrap();
        assert_eq!(state.to_json(), json!({"count": 0, "other": null}));
    }

    #[test]
    fn test_probe_failures_name_the_key() {
        let no_init = reducer(|state, _| state.cloned());
        let err = combine_reducers([("ok", identity()), ("broken", no_init)]).unwrap_err();
        match err {
            StoreError::SliceShape { key, action_type } => {
                assert_eq!(key, "broken");
                assert_eq!(action_type, action_types().init);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let only_init = reducer(|_, action| action.action_type.contains("INIT").then(State::null));
        let err = combine_reducers([("picky", only_init)]).unwrap_err();
        assert!(err.to_string().contains("PROBE_UNKNOWN_ACTION"));
    }

    #[test]
    fn test_runtime_missing_slice_names_key_and_type() {
        let flaky = reducer(|state, action| {
            if action.is("DROP") {
                None
            } else {
                Some(state.cloned().unwrap_or_else(State::null))
            }
        });
        let combined = combine_reducers([("flaky", flaky)]).unwrap();
        let err = combined.reduce(None, &Action::new("DROP")).unwrap_err();
        assert!(err.to_string().contains("\"flaky\""));
        assert!(err.to_string().contains("\"DROP\""));
    }

    #[test]
    fn test_revalidation_modes() {
        let probes = Arc::new(AtomicUsize::new(0));
        let counted = {
            let probes = probes.clone();
            reducer(move |state, action| {
                if crate::action::is_reserved(&action.action_type) {
                    probes.fetch_add(1, Ordering::SeqCst);
                }
                Some(state.cloned().unwrap_or_else(State::null))
            })
        };

        let once = combine_reducers([("s", counted.clone())]).unwrap();
        assert_eq!(probes.load(Ordering::SeqCst), 2);
        once.reduce(None, &Action::new("A")).unwrap();
        once.reduce(None, &Action::new("B")).unwrap();
        assert_eq!(probes.load(Ordering::SeqCst), 2);

        let every = CombinedReducer::with_options(
            [("s", counted)],
            CombineOptions {
                revalidate_every_call: true,
            },
        )
        .unwrap();
        every.reduce(None, &Action::new("A")).unwrap();
        assert_eq!(probes.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_nested_combination() {
        let inner = combine_reducers([("count", counter())]).unwrap();
        let outer = combine_reducers([("inner", inner.into_reducer())]).unwrap();
        let state = outer.reduce(None, &Action::new("INCREMENT")).unwrap();
        assert_eq!(state.to_json(), json!({"inner": {"count": 1}}));
    }

    #[test]
    fn test_plain_root_without_output() {
        let root = RootReducer::from(reducer(|_, _| None));
        let err = root.reduce(None, &Action::new("X")).unwrap_err();
        assert!(matches!(err, StoreError::MissingReducerOutput { .. }));
        assert!(err.is_configuration());
    }
}
