//! Immutable state tree
//!
//! State is a tree of shared nodes: leaves hold JSON values, inner nodes hold
//! an ordered map of named slices. Cloning a `State` clones a pointer, so two
//! states can be compared by identity (`ptr_eq`) in O(1). Reducers signal
//! "no change" by handing back the node they were given.

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};

/// State shared between the store and the middleware API
///
/// Only the serialized dispatch path writes it.
pub(crate) type SharedState = Arc<RwLock<State>>;

pub(crate) fn read_shared(state: &SharedState) -> State {
    state.read().unwrap_or_else(PoisonError::into_inner).clone()
}

/// A node of the state tree
#[derive(Debug, Clone, PartialEq)]
pub enum State {
    /// A plain value
    Leaf(Arc<Value>),
    /// Named slices, in insertion order
    Tree(Arc<IndexMap<String, State>>),
}

impl State {
    /// Create a leaf from anything convertible to JSON
    pub fn leaf(value: impl Into<Value>) -> Self {
        State::Leaf(Arc::new(value.into()))
    }

    /// Create an inner node from named slices
    pub fn tree<I, K>(slices: I) -> Self
    where
        I: IntoIterator<Item = (K, State)>,
        K: Into<String>,
    {
        State::Tree(Arc::new(
            slices.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// An inner node without slices
    pub fn empty_tree() -> Self {
        State::Tree(Arc::new(IndexMap::new()))
    }

    /// The `null` leaf
    pub fn null() -> Self {
        State::leaf(Value::Null)
    }

    /// Reference equality: both handles point at the same node
    pub fn ptr_eq(&self, other: &State) -> bool {
        match (self, other) {
            (State::Leaf(a), State::Leaf(b)) => Arc::ptr_eq(a, b),
            (State::Tree(a), State::Tree(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Look up a slice by name (always `None` on leaves)
    pub fn get(&self, key: &str) -> Option<&State> {
        self.slices().and_then(|slices| slices.get(key))
    }

    /// The JSON value of a leaf
    pub fn value(&self) -> Option<&Value> {
        match self {
            State::Leaf(value) => Some(value),
            State::Tree(_) => None,
        }
    }

    /// The slices of an inner node
    pub fn slices(&self) -> Option<&IndexMap<String, State>> {
        match self {
            State::Leaf(_) => None,
            State::Tree(slices) => Some(slices),
        }
    }

    /// Slice names in order (empty for leaves)
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slices()
            .into_iter()
            .flat_map(|slices| slices.keys().map(String::as_str))
    }

    /// Copy-on-write update of one slice, sharing all other slices
    pub fn with_slice(&self, key: impl Into<String>, slice: State) -> State {
        let mut slices = self.slices().cloned().unwrap_or_default();
        slices.insert(key.into(), slice);
        State::Tree(Arc::new(slices))
    }

    /// Flatten the tree into one JSON value
    pub fn to_json(&self) -> Value {
        match self {
            State::Leaf(value) => value.as_ref().clone(),
            State::Tree(slices) => Value::Object(
                slices
                    .iter()
                    .map(|(key, slice)| (key.clone(), slice.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for State {
    fn from(value: Value) -> Self {
        State::leaf(value)
    }
}

impl Serialize for State {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            State::Leaf(value) => value.serialize(serializer),
            State::Tree(slices) => serializer.collect_map(slices.iter()),
        }
    }
}
