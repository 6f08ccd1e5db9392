//! Todo list feature: reducers, action creators and selectors

use replique::{
    apply_middleware_with_config, create_action, create_async_action, create_payload_action,
    create_selector, reducer, ActionCreator, CombineOptions, CombinedReducer, InputSelector, LoggingMiddleware,
    Middleware, Projector, Reducer, Selected, Selector, SelectorOptions, State, Store, StoreConfig, StoreError,
    ThunkMiddleware,
};
use serde_json::{json, Value};
use std::time::Duration;

/// Pretend remote backend handed to thunks as a dependency
pub struct Backend {
    pub latency: Duration,
    pub seed: Vec<&'static str>,
}

impl Backend {
    async fn fetch_todos(&self) -> anyhow::Result<Value> {
        tokio::time::sleep(self.latency).await;
        if self.seed.is_empty() {
            anyhow::bail!("backend has no todos");
        }
        let todos: Vec<Value> = self
            .seed
            .iter()
            .enumerate()
            .map(|(i, text)| json!({"id": i + 1, "text": text, "done": false}))
            .collect();
        Ok(Value::Array(todos))
    }
}

fn todos() -> Reducer {
    reducer(|state, action| {
        let Some(state) = state else {
            return Some(State::leaf(json!([])));
        };
        let todos = state.value().and_then(Value::as_array).cloned().unwrap_or_default();

        match action.action_type.as_str() {
            "ADD_TODO" => {
                let Some(text) = action.payload.as_ref().and_then(|p| p.get("text")).cloned() else {
                    return Some(state.clone());
                };
                let mut todos = todos;
                let id = todos.len() + 1;
                todos.push(json!({"id": id, "text": text, "done": false}));
                Some(State::leaf(todos))
            }
            "TOGGLE_TODO" => {
                let id = action.payload.as_ref().and_then(Value::as_u64);
                let toggled = todos
                    .into_iter()
                    .map(|mut todo| {
                        if todo["id"].as_u64() == id {
                            let done = todo["done"].as_bool().unwrap_or(false);
                            todo["done"] = json!(!done);
                        }
                        todo
                    })
                    .collect::<Vec<_>>();
                Some(State::leaf(toggled))
            }
            "LOAD_TODOS_SUCCESS" => Some(State::leaf(action.payload.clone().unwrap_or(json!([])))),
            _ => Some(state.clone()),
        }
    })
}

fn filter() -> Reducer {
    reducer(|state, action| match action.action_type.as_str() {
        "SET_FILTER" => Some(State::leaf(action.payload.clone().unwrap_or(json!("all")))),
        _ => Some(state.cloned().unwrap_or_else(|| State::leaf("all"))),
    })
}

fn status() -> Reducer {
    reducer(|state, action| match action.action_type.as_str() {
        "LOAD_TODOS_REQUEST" => Some(State::leaf("loading")),
        "LOAD_TODOS_SUCCESS" => Some(State::leaf("idle")),
        "LOAD_TODOS_FAILURE" => {
                let message = action.payload.as_ref().and_then(|p| p.get("message")).cloned();
                Some(State::leaf(json!({"error": message})))
            }
        _ => Some(state.cloned().unwrap_or_else(|| State::leaf("idle"))),
    })
}

/// Feature module added after the store is running
pub fn stats() -> Reducer {
    reducer(|state, action| {
        let toggles = state.and_then(State::value).and_then(Value::as_u64).unwrap_or(0);
        match action.action_type.as_str() {
            "TOGGLE_TODO" => Some(State::leaf(toggles + 1)),
            _ => Some(state.cloned().unwrap_or_else(|| State::leaf(0))),
        }
    })
}

pub fn root_reducer(config: &StoreConfig) -> Result<CombinedReducer, StoreError> {
    CombinedReducer::with_options(
        [("todos", todos()), ("filter", filter()), ("status", status())],
        CombineOptions::from(config),
    )
}

pub fn create_todo_store(config: &StoreConfig, backend: Backend) -> Result<Store, StoreError> {
    let mut middleware: Vec<Box<dyn Middleware>> = Vec::new();
    if config.log_actions {
        middleware.push(Box::new(LoggingMiddleware::new()));
    }
    middleware.push(Box::new(ThunkMiddleware::with_dependencies(backend)));

    Store::builder(root_reducer(config)?)
        .enhancer(apply_middleware_with_config(middleware, config))
        .build()
}

pub fn action_creators() -> Vec<(&'static str, ActionCreator)> {
    vec![
        (
            "add_todo",
            create_payload_action("ADD_TODO", |text| json!({"payload": {"text": text}})),
        ),
        (
            "toggle_todo",
            create_payload_action("TOGGLE_TODO", |id| json!({"payload": id})),
        ),
        (
            "set_filter",
            create_payload_action("SET_FILTER", |filter| json!({"payload": filter})),
        ),
        ("clear_filter", create_action("SET_FILTER")),
        (
            "load_todos",
            create_async_action("LOAD_TODOS", |_, api| async move {
                let backend = api
                    .dependencies()
                    .get::<Backend>()
                    .ok_or_else(|| anyhow::anyhow!("no backend configured"))?;
                backend.fetch_todos().await
            }),
        ),
    ]
}

/// Todos matching the current filter ("all", "open" or "done")
pub fn visible_todos() -> Result<Selector, StoreError> {
    create_selector(
        vec![InputSelector::slice("todos"), InputSelector::slice("filter")],
        Some(Projector::new(|values| {
            let filter = values[1].value().and_then(Value::as_str).unwrap_or("all");
            let visible: Vec<Value> = values[0]
                .value()
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter(|todo| match filter {
                    "open" => todo["done"] == json!(false),
                    "done" => todo["done"] == json!(true),
                    _ => true,
                })
                .cloned()
                .collect();
            Selected::ready(State::leaf(visible))
        })),
        SelectorOptions::default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use replique::bind_action_creators;

    fn backend() -> Backend {
        Backend {
            latency: Duration::from_millis(1),
            seed: vec!["milk", "eggs"],
        }
    }

    #[tokio::test]
    async fn test_todo_flow() {
        let store = create_todo_store(&StoreConfig::default(), backend()).unwrap();
        let actions = bind_action_creators(action_creators(), &store.dispatcher());

        actions["load_todos"].call(Value::Null).await.unwrap();
        actions["add_todo"].call(json!("bread")).await.unwrap();
        actions["toggle_todo"].call(json!(1)).await.unwrap();
        actions["set_filter"].call(json!("open")).await.unwrap();

        let state = store.get_state();
        assert_eq!(state.get("status").unwrap().to_json(), json!("idle"));
        let visible = visible_todos().unwrap().select(&state).resolve().await.to_json();
        assert_eq!(
            visible,
            json!([
                {"id": 2, "text": "eggs", "done": false},
                {"id": 3, "text": "bread", "done": false}
            ])
        );
    }

    #[tokio::test]
    async fn test_failed_load_is_recorded() {
        let empty = Backend {
            latency: Duration::ZERO,
            seed: Vec::new(),
        };
        let store = create_todo_store(&StoreConfig::default(), empty).unwrap();
        let actions = bind_action_creators(action_creators(), &store.dispatcher());

        assert!(actions["load_todos"].call(Value::Null).await.is_err());
        assert_eq!(
            store.get_state().get("status").unwrap().to_json(),
            json!({"error": "backend has no todos"})
        );
    }

    #[tokio::test]
    async fn test_stats_added_later() {
        let store = create_todo_store(&StoreConfig::default(), backend()).unwrap();
        store.add_reducer("stats", stats()).await.unwrap();
        store
            .dispatch(replique::Action::new("TOGGLE_TODO").with_payload(1))
            .await
            .unwrap();
        assert_eq!(store.get_state().get("stats").unwrap().to_json(), json!(1));
    }
}
