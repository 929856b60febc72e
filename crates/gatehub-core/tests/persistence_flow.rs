//! Functions using the hub's persistence the way deployment code does:
//! documents through the facade, hot values through the TTL cache.

use std::sync::Arc;
use std::time::Duration;

use gatehub_core::{FnHandler, FunctionSpec, Hub, HubConfig, Identity, StaticProvider};
use gatehub_protocol::{Invocation, Reply};
use serde_json::{json, Value};
use tempfile::TempDir;

fn open_hub() -> (TempDir, Hub) {
    let dir = tempfile::tempdir().unwrap();
    let config = HubConfig {
        state_dir: dir.path().to_str().unwrap().to_string(),
        ..HubConfig::default()
    };
    let hub = Hub::open(config, Arc::new(StaticProvider::new())).unwrap();
    (dir, hub)
}

#[tokio::test]
async fn a_function_can_persist_and_list_documents() {
    let (_dir, hub) = open_hub();
    let docs = hub.docs().clone();
    hub.register(FunctionSpec::new(
        "notes.add",
        FnHandler(move |inv: Invocation, _id: Option<Identity>| {
            let docs = docs.clone();
            async move {
                let id = docs
                    .save("notes", None, &inv.body)
                    .map_err(|e| gatehub_protocol::ApiError::Io(e.to_string()))?;
                Ok(Reply::data(json!({ "id": id })))
            }
        }),
    ))
    .unwrap();

    let first = hub
        .invoke(Invocation::new("notes.add", json!({ "text": "one" })))
        .await;
    let second = hub
        .invoke(Invocation::new("notes.add", json!({ "text": "two" })))
        .await;
    assert_eq!(first.status, 200);
    assert_eq!(second.status, 200);
    let id1 = first.as_json().unwrap()["data"]["id"].as_str().unwrap().to_string();
    let id2 = second.as_json().unwrap()["data"]["id"].as_str().unwrap().to_string();
    assert_ne!(id1, id2);

    let rows = hub.docs().find_all::<Value>("notes").unwrap();
    assert_eq!(rows.len(), 2);

    hub.shutdown().await;
}

#[tokio::test]
async fn cache_state_survives_a_hub_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = HubConfig {
        state_dir: dir.path().to_str().unwrap().to_string(),
        ..HubConfig::default()
    };

    {
        let hub = Hub::open(config.clone(), Arc::new(StaticProvider::new())).unwrap();
        hub.cache()
            .set("session", json!({ "user": "ada" }), Duration::from_secs(3600));
        hub.shutdown().await; // flushes the snapshot
    }

    let hub = Hub::open(config, Arc::new(StaticProvider::new())).unwrap();
    assert_eq!(hub.cache().get("session"), Some(json!({ "user": "ada" })));
    hub.shutdown().await;
}

#[tokio::test]
async fn denied_invocations_land_in_the_invocation_log() {
    let (_dir, hub) = open_hub();
    hub.invoke(Invocation::new("missing.function", Value::Null)).await;
    let lines = hub.logs().read("invocations");
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("missing.function"));
    assert!(lines[0].contains("not_found"));
}
