//! Actions and the values that can be dispatched
//!
//! An action is a plain data record with a non-empty string `type`. Callers
//! may also dispatch raw JSON, which is validated by [`Action::try_from`]
//! before it reaches a reducer, or a [`Thunk`] that only a thunk middleware
//! knows how to run.

use crate::error::StoreError;
use crate::middleware::thunk::Thunk;
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

const RESERVED_PREFIX: &str = "@@replique/";

/// A typed state-transition request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl Action {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            payload: None,
            error: false,
            meta: None,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Value>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_meta(mut self, meta: impl Into<Value>) -> Self {
        self.meta = Some(meta.into());
        self
    }

    /// Mark the action as carrying an error payload
    pub fn failed(mut self) -> Self {
        self.error = true;
        self
    }

    pub fn is(&self, action_type: &str) -> bool {
        self.action_type == action_type
    }

    /// Reject actions a reducer must never see
    pub(crate) fn validate(&self) -> Result<(), StoreError> {
        if self.action_type.is_empty() {
            return Err(StoreError::InvalidAction(
                "Action \"type\" property may not be empty.".to_string(),
            ));
        }
        Ok(())
    }
}

impl TryFrom<Value> for Action {
    type Error = StoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(mut record) = value else {
            return Err(StoreError::InvalidAction(format!(
                "Actions must be plain objects. Instead, the actual type was: '{}'. \
                 You may need to add middleware to your store setup to handle dispatching other values.",
                kind_of(&value)
            )));
        };

        let action_type = match record.remove("type") {
            None | Some(Value::Null) => {
                return Err(StoreError::InvalidAction(
                    "Actions may not have an undefined \"type\" property. \
                     You may have misspelled an action type string constant."
                        .to_string(),
                ))
            }
            Some(Value::String(action_type)) => action_type,
            Some(other) => {
                return Err(StoreError::InvalidAction(format!(
                    "Action \"type\" property must be a string. Instead, the actual type was: '{}'. \
                     Value was: '{}' (stringified)",
                    kind_of(&other),
                    other
                )))
            }
        };

        let error = match record.remove("error") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(flag)) => flag,
            Some(other) => {
                return Err(StoreError::InvalidAction(format!(
                    "Action \"error\" property must be a boolean. Instead, the actual type was: '{}'",
                    kind_of(&other)
                )))
            }
        };

        let action = Action {
            action_type,
            payload: record.remove("payload"),
            error,
            meta: record.remove("meta"),
        };
        action.validate()?;

        if !record.is_empty() {
            log::trace!(
                "Dropping unknown action fields {:?} of {}",
                record.keys().collect::<Vec<_>>(),
                action.action_type
            );
        }
        Ok(action)
    }
}

/// Plain data record check over the JSON representation
pub fn is_plain_object(value: &Value) -> bool {
    value.is_object()
}

/// Whether a raw value would be accepted as an action
pub fn is_action(value: &Value) -> bool {
    matches!(value, Value::Object(record) if matches!(record.get("type"), Some(Value::String(t)) if !t.is_empty()))
}

/// Human readable kind of a JSON value, used in error messages
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Reserved action types, generated once per process
pub(crate) struct ActionTypes {
    pub init: String,
    pub replace: String,
}

static ACTION_TYPES: LazyLock<ActionTypes> = LazyLock::new(|| ActionTypes {
    init: format!("{RESERVED_PREFIX}INIT{}", random_suffix()),
    replace: format!("{RESERVED_PREFIX}REPLACE{}", random_suffix()),
});

pub(crate) fn action_types() -> &'static ActionTypes {
    &ACTION_TYPES
}

/// A fresh type no reducer can know about
pub(crate) fn probe_unknown_action() -> String {
    format!("{RESERVED_PREFIX}PROBE_UNKNOWN_ACTION{}", random_suffix())
}

/// Whether a type belongs to the store's private namespace
pub fn is_reserved(action_type: &str) -> bool {
    action_type.starts_with(RESERVED_PREFIX)
}

fn random_suffix() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| char::from(b).to_ascii_lowercase().to_string())
        .collect::<Vec<_>>()
        .join(".")
}

/// Anything that can be handed to `dispatch`
pub enum Dispatchable {
    Action(Action),
    /// Raw JSON, validated before it reaches a reducer
    Value(Value),
    /// Deferred work, run by a thunk middleware
    Thunk(Thunk),
}

impl Dispatchable {
    pub fn as_action(&self) -> Option<&Action> {
        match self {
            Dispatchable::Action(action) => Some(action),
            _ => None,
        }
    }

    /// Type of the action if it already is one, used for logging
    pub fn action_type(&self) -> Option<&str> {
        match self {
            Dispatchable::Action(action) => Some(&action.action_type),
            Dispatchable::Value(Value::Object(record)) => record.get("type").and_then(Value::as_str),
            _ => None,
        }
    }

    /// Resolve into a validated action, as the base dispatch does
    pub(crate) fn into_action(self) -> Result<Action, StoreError> {
        match self {
            Dispatchable::Action(action) => {
                action.validate()?;
                Ok(action)
            }
            Dispatchable::Value(value) => Action::try_from(value),
            Dispatchable::Thunk(_) => Err(StoreError::InvalidAction(
                "Actions must be plain objects. Instead, the actual type was: 'thunk'. \
                 You may need to add ThunkMiddleware to your store setup to handle dispatching thunks."
                    .to_string(),
            )),
        }
    }
}

impl fmt::Debug for Dispatchable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dispatchable::Action(action) => f.debug_tuple("Action").field(action).finish(),
            Dispatchable::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Dispatchable::Thunk(_) => f.write_str("Thunk"),
        }
    }
}

impl From<Action> for Dispatchable {
    fn from(action: Action) -> Self {
        Dispatchable::Action(action)
    }
}

impl From<Value> for Dispatchable {
    fn from(value: Value) -> Self {
        Dispatchable::Value(value)
    }
}

impl From<Thunk> for Dispatchable {
    fn from(thunk: Thunk) -> Self {
        Dispatchable::Thunk(thunk)
    }
}

/// What a dispatch resolved to
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    /// The action committed by the base dispatch
    Action(Action),
    /// The value a middleware (e.g. a thunk) produced instead
    Value(Value),
}

impl Dispatched {
    pub fn action(&self) -> Option<&Action> {
        match self {
            Dispatched::Action(action) => Some(action),
            Dispatched::Value(_) => None,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Dispatched::Action(_) => None,
            Dispatched::Value(value) => Some(value),
        }
    }
}

pub type DispatchResult = Result<Dispatched, StoreError>;
