//! Action creators
//!
//! Three flavours, all producing something `dispatch` accepts:
//!
//! - [`create_action`]: a fixed action
//! - [`create_payload_action`]: an action assembled by a payload creator
//! - [`create_async_action`]: a thunk running an async operation bracketed
//!   by `TYPE_REQUEST`, then `TYPE_SUCCESS` or `TYPE_FAILURE`
//!
//! The async flavour needs [`ThunkMiddleware`](crate::middleware::ThunkMiddleware)
//! in the store.

use crate::action::{kind_of, Action, DispatchResult, Dispatchable};
use crate::dispatcher::Dispatcher;
use crate::error::StoreError;
use crate::middleware::thunk::{Thunk, ThunkApi};
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

const REQUEST: &str = "_REQUEST";
const SUCCESS: &str = "_SUCCESS";
const FAILURE: &str = "_FAILURE";

type PayloadFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;
type OperationFn = Arc<dyn Fn(Value, ThunkApi) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

#[derive(Clone)]
enum Kind {
    Plain,
    Payload(PayloadFn),
    Operation(OperationFn),
}

/// Factory for dispatchable values of one action type
#[derive(Clone)]
pub struct ActionCreator {
    template: Action,
    kind: Kind,
}

/// Creator of a fixed `{type}` action
pub fn create_action(action_type: impl Into<String>) -> ActionCreator {
    ActionCreator::from_template(Action::new(action_type))
}

/// Creator whose `payload_creator` maps arguments to `{payload, meta?, error?}`
pub fn create_payload_action<F>(action_type: impl Into<String>, payload_creator: F) -> ActionCreator
where
    F: Fn(Value) -> Value + Send + Sync + 'static,
{
    ActionCreator {
        template: Action::new(action_type),
        kind: Kind::Payload(Arc::new(payload_creator)),
    }
}

/// Creator of thunks running `operation(args, api)` between lifecycle actions
///
/// ```ignore
/// let load = create_async_action("LOAD", |id, api| async move {
///     let client = api.dependencies().get::<Client>().context("no client")?;
///     Ok(client.fetch(id).await?)
/// });
/// store.dispatch(load.create(json!(7))?).await?;
/// ```
pub fn create_async_action<F, Fut>(action_type: impl Into<String>, operation: F) -> ActionCreator
where
    F: Fn(Value, ThunkApi) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    ActionCreator {
        template: Action::new(action_type),
        kind: Kind::Operation(Arc::new(move |args, api| operation(args, api).boxed())),
    }
}

impl ActionCreator {
    /// Creator of a fixed action; its payload and meta are copied into every
    /// action it produces
    pub fn from_template(template: Action) -> Self {
        Self {
            template,
            kind: Kind::Plain,
        }
    }

    pub fn action_type(&self) -> &str {
        &self.template.action_type
    }

    pub fn request_type(&self) -> String {
        format!("{}{REQUEST}", self.template.action_type)
    }

    pub fn success_type(&self) -> String {
        format!("{}{SUCCESS}", self.template.action_type)
    }

    pub fn failure_type(&self) -> String {
        format!("{}{FAILURE}", self.template.action_type)
    }

    pub fn is_async(&self) -> bool {
        matches!(self.kind, Kind::Operation(_))
    }

    /// Whether `action` carries this creator's type
    pub fn matches(&self, action: &Action) -> bool {
        action.is(self.action_type())
    }

    /// Whether `action` is one of the REQUEST, SUCCESS or FAILURE phases of this type
    pub fn matches_phase(&self, action: &Action) -> bool {
        action
            .action_type
            .strip_prefix(self.action_type())
            .is_some_and(|suffix| [REQUEST, SUCCESS, FAILURE].contains(&suffix))
    }

    /// Produce the value to dispatch for `args`
    pub fn create(&self, args: Value) -> Result<Dispatchable, StoreError> {
        match &self.kind {
            Kind::Plain => Ok(self.template.clone().into()),
            Kind::Payload(payload_creator) => self.assemble(payload_creator(args)).map(Into::into),
            Kind::Operation(operation) => {
                let template = self.template.clone();
                let operation = operation.clone();
                Ok(Thunk::new(move |api| run_operation(template, operation, args, api)).into())
            }
        }
    }

    fn assemble(&self, created: Value) -> Result<Action, StoreError> {
        let mut record = match created {
            Value::Object(record) if record.contains_key("payload") => record,
            other => {
                return Err(StoreError::MissingPayload {
                    action_type: self.template.action_type.clone(),
                    kind: kind_of(&other),
                })
            }
        };
        record.insert("type".to_string(), Value::String(self.template.action_type.clone()));
        if let Some(meta) = &self.template.meta {
            record.entry("meta").or_insert_with(|| meta.clone());
        }
        Action::try_from(Value::Object(record))
    }
}

/// Failure payload: the top-level message and every message down to the root cause
fn error_record(source: &anyhow::Error) -> Value {
    let chain: Vec<String> = source.chain().map(ToString::to_string).collect();
    json!({"message": source.to_string(), "chain": chain})
}

fn phase(template: &Action, suffix: &str) -> Action {
    Action {
        action_type: format!("{}{suffix}", template.action_type),
        ..template.clone()
    }
}

async fn run_operation(
    template: Action,
    operation: OperationFn,
    args: Value,
    api: ThunkApi,
) -> Result<Value, StoreError> {
    api.dispatch(phase(&template, REQUEST)).await?;

    match operation(args, api.clone()).await {
        Ok(payload) => {
            api.dispatch(phase(&template, SUCCESS).with_payload(payload.clone()))
                .await?;
            Ok(payload)
        }
        Err(source) => {
            log::debug!("Operation {} failed: {:#}", template.action_type, source);
            api.dispatch(
                phase(&template, FAILURE)
                    .with_payload(error_record(&source))
                    .failed(),
            )
            .await?;
            Err(StoreError::Operation {
                action_type: template.action_type,
                source,
            })
        }
    }
}

impl fmt::Debug for ActionCreator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            Kind::Plain => "plain",
            Kind::Payload(_) => "payload",
            Kind::Operation(_) => "async",
        };
        f.debug_struct("ActionCreator")
            .field("type", &self.template.action_type)
            .field("kind", &kind)
            .finish()
    }
}

/// An action creator that dispatches what it creates
#[derive(Clone, Debug)]
pub struct BoundActionCreator {
    creator: ActionCreator,
    dispatcher: Dispatcher,
}

impl BoundActionCreator {
    pub fn call(&self, args: Value) -> BoxFuture<'static, DispatchResult> {
        match self.creator.create(args) {
            Ok(dispatchable) => self.dispatcher.dispatch(dispatchable),
            Err(err) => future::ready(Err(err)).boxed(),
        }
    }

    pub fn creator(&self) -> &ActionCreator {
        &self.creator
    }
}

pub fn bind_action_creator(creator: ActionCreator, dispatcher: &Dispatcher) -> BoundActionCreator {
    BoundActionCreator {
        creator,
        dispatcher: dispatcher.clone(),
    }
}

/// Bind each named creator to `dispatcher`, keeping the names
pub fn bind_action_creators<I, K>(creators: I, dispatcher: &Dispatcher) -> IndexMap<String, BoundActionCreator>
where
    I: IntoIterator<Item = (K, ActionCreator)>,
    K: Into<String>,
{
    creators
        .into_iter()
        .map(|(name, creator)| (name.into(), bind_action_creator(creator, dispatcher)))
        .collect()
}
