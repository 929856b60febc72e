use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use gatehub_core::{
    Claims, FnHandler, FunctionSpec, Hub, HubConfig, Identity, IdentityProvider, StaticProvider,
};
use gatehub_protocol::{Invocation, Reply};
use serde_json::{json, Value};
use tempfile::TempDir;

fn test_hub(provider: Arc<dyn IdentityProvider>) -> (TempDir, Hub) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let dir = tempfile::tempdir().unwrap();
    let config = HubConfig {
        state_dir: dir.path().to_str().unwrap().to_string(),
        ..HubConfig::default()
    };
    let hub = Hub::open(config, provider).unwrap();
    (dir, hub)
}

fn echo_spec() -> FunctionSpec {
    FunctionSpec::new(
        "echo",
        FnHandler(|inv: Invocation, _id: Option<Identity>| async move {
            Ok(Reply::data(inv.body))
        }),
    )
    .require("write")
}

fn error_kind(reply: &Reply) -> String {
    reply.as_json().unwrap()["error"]["kind"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn gating_matrix_for_a_capability_guarded_function() {
    let provider = Arc::new(StaticProvider::new());
    provider.add("writer-token", Identity::new("writer", Claims::granting(["write"])));
    provider.add("reader-token", Identity::new("reader", Claims::new()));
    provider.add("admin-token", Identity::new("boss", Claims::granting(["admin"])));
    let (_dir, hub) = test_hub(provider);
    hub.register(echo_spec()).unwrap();

    // No credential at all.
    let reply = hub.invoke(Invocation::new("echo", json!({"x": 1}))).await;
    assert_eq!(reply.status, 401);
    assert_eq!(error_kind(&reply), "unauthorized");

    // Valid identity without the capability: denial names it.
    let reply = hub
        .invoke(Invocation::new("echo", json!({"x": 1})).with_credential("reader-token"))
        .await;
    assert_eq!(reply.status, 403);
    assert_eq!(error_kind(&reply), "forbidden");
    assert!(reply.as_json().unwrap()["error"]["message"]
        .as_str()
        .unwrap()
        .contains("\"write\""));

    // The capability itself.
    let reply = hub
        .invoke(Invocation::new("echo", json!({"x": 1})).with_credential("writer-token"))
        .await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.as_json().unwrap()["data"], json!({"x": 1}));

    // The admin super-capability satisfies anything.
    let reply = hub
        .invoke(Invocation::new("echo", json!({"x": 2})).with_credential("admin-token"))
        .await;
    assert_eq!(reply.status, 200);

    hub.shutdown().await;
}

#[tokio::test]
async fn unknown_function_is_not_found() {
    let (_dir, hub) = test_hub(Arc::new(StaticProvider::new()));
    let reply = hub.invoke(Invocation::new("nope", Value::Null)).await;
    assert_eq!(reply.status, 404);
    assert_eq!(error_kind(&reply), "not_found");
}

#[tokio::test]
async fn bad_credential_reads_the_same_as_no_credential() {
    let provider = Arc::new(StaticProvider::new());
    let (_dir, hub) = test_hub(provider);
    hub.register(echo_spec()).unwrap();
    let reply = hub
        .invoke(Invocation::new("echo", Value::Null).with_credential("expired-garbage"))
        .await;
    assert_eq!(reply.status, 401);
    assert_eq!(error_kind(&reply), "unauthorized");
}

#[tokio::test]
async fn first_missing_capability_is_the_one_named() {
    let provider = Arc::new(StaticProvider::new());
    provider.add("tok", Identity::new("u1", Claims::granting(["second"])));
    let (_dir, hub) = test_hub(provider);
    hub.register(
        FunctionSpec::new(
            "guarded",
            FnHandler(|_inv: Invocation, _id: Option<Identity>| async {
                Ok(Reply::json(200, json!({})))
            }),
        )
        .require("first")
        .require("second"),
    )
    .unwrap();

    let reply = hub
        .invoke(Invocation::new("guarded", Value::Null).with_credential("tok"))
        .await;
    assert_eq!(reply.status, 403);
    assert!(reply.as_json().unwrap()["error"]["message"]
        .as_str()
        .unwrap()
        .contains("\"first\""));
}

/// Provider whose capability-check hook always errors out.
struct BrokenChecks(StaticProvider);

#[async_trait]
impl IdentityProvider for BrokenChecks {
    async fn verify_credential(&self, token: &str) -> Result<Identity> {
        self.0.verify_credential(token).await
    }
    async fn fetch_identity(&self, id: &str) -> Result<Identity> {
        self.0.fetch_identity(id).await
    }
    async fn set_claims(&self, id: &str, claims: Claims) -> Result<()> {
        self.0.set_claims(id, claims).await
    }
    async fn has_capability(&self, _identity: &Identity, _capability: &str) -> Result<bool> {
        anyhow::bail!("grant store unreachable")
    }
}

#[tokio::test]
async fn failing_capability_check_fails_closed() {
    let inner = StaticProvider::new();
    inner.add("tok", Identity::new("u1", Claims::granting(["write", "admin"])));
    let (_dir, hub) = test_hub(Arc::new(BrokenChecks(inner)));
    hub.register(echo_spec()).unwrap();

    let reply = hub
        .invoke(Invocation::new("echo", Value::Null).with_credential("tok"))
        .await;
    assert_eq!(reply.status, 403);
}

#[tokio::test]
async fn schema_mismatch_is_rejected_before_the_handler() {
    let (_dir, hub) = test_hub(Arc::new(StaticProvider::new()));
    hub.register(
        FunctionSpec::new(
            "strict",
            FnHandler(|_inv: Invocation, _id: Option<Identity>| async {
                panic!("handler must not run on invalid input")
            }),
        )
        .input_schema(json!({
            "type": "object",
            "properties": { "count": { "type": "integer" } },
            "required": ["count"],
            "additionalProperties": false
        })),
    )
    .unwrap();

    let reply = hub
        .invoke(Invocation::new("strict", json!({ "count": "three" })))
        .await;
    assert_eq!(reply.status, 400);
    assert_eq!(error_kind(&reply), "invalid_argument");

    let reply = hub.invoke(Invocation::new("strict", json!({ "count": 3 }))).await;
    assert_eq!(reply.status, 500); // handler ran and panicked, contained
}

#[tokio::test]
async fn panicking_handler_becomes_internal_error() {
    let (_dir, hub) = test_hub(Arc::new(StaticProvider::new()));
    hub.register(FunctionSpec::new(
        "boom",
        FnHandler(|_inv: Invocation, _id: Option<Identity>| async {
            panic!("kaboom");
        }),
    ))
    .unwrap();

    let reply = hub.invoke(Invocation::new("boom", Value::Null)).await;
    assert_eq!(reply.status, 500);
    assert_eq!(error_kind(&reply), "internal");
    let msg = reply.as_json().unwrap()["error"]["message"].as_str().unwrap();
    assert!(!msg.contains("kaboom"), "panic cause must not leak to callers");

    // The hub keeps serving afterwards.
    let reply = hub.invoke(Invocation::new("boom", Value::Null)).await;
    assert_eq!(reply.status, 500);
}

#[tokio::test]
async fn denied_invocations_are_published_on_the_bus() {
    let (_dir, hub) = test_hub(Arc::new(StaticProvider::new()));
    hub.register(echo_spec()).unwrap();
    let mut rx = hub.bus().subscribe();

    let mut inv = Invocation::new("echo", Value::Null);
    inv.corr_id = Some("req-9".into());
    hub.invoke(inv).await;

    let env = rx.recv().await.unwrap();
    assert_eq!(env.kind, gatehub_events::TOPIC_INVOKE_DENIED);
    assert_eq!(env.corr_id.as_deref(), Some("req-9"));
    assert_eq!(env.payload["kind"], "unauthorized");
}
