use replique::{bind_action_creators, Observer, StoreConfig};
use serde_json::{json, Value};
use std::time::Duration;

mod logger;
mod todos;

use todos::Backend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_file = logger::init()?;
    log::info!("Starting replique-demo");

    let config = StoreConfig::load();
    let backend = Backend {
        latency: Duration::from_millis(50),
        seed: vec!["Buy milk", "Read the changelog"],
    };
    let store = todos::create_todo_store(&config, backend)?;

    let _subscription = store.subscribe(
        Observer::new(|state| log::info!("State: {}", state.to_json()))
            .on_error(|err| log::error!("Store error: {}", err))
            .on_complete(|| log::info!("Store closed")),
    );

    let actions = bind_action_creators(todos::action_creators(), &store.dispatcher());
    actions["load_todos"].call(Value::Null).await?;
    actions["add_todo"].call(json!("Write the demo")).await?;
    actions["toggle_todo"].call(json!(1)).await?;

    // Lazily loaded feature module
    store.add_reducer("stats", todos::stats()).await?;
    actions["toggle_todo"].call(json!(3)).await?;
    actions["set_filter"].call(json!("open")).await?;

    let visible = todos::visible_todos()?;
    let open = visible.select(&store.get_state()).resolve().await;
    println!("Open todos: {}", serde_json::to_string_pretty(&open)?);

    actions["clear_filter"].call(Value::Null).await?;
    println!("Final state: {}", serde_json::to_string_pretty(&store.get_state())?);
    println!("Log written to {}", log_file.display());

    log::info!("Exiting replique-demo");
    Ok(())
}
