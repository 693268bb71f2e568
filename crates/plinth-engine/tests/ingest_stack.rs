//! End-to-end rehearsal: compose the ingest stack, apply it against the
//! in-memory provider, then exercise the two runtime contracts it promises.

use plinth_engine::{Engine, InMemoryProvider, StackState};
use plinth_stack::{
    ids, Artifact, CallerIdentity, IngestStack, Parameters, PolicyDocument, StackDocuments,
};
use serde_json::json;

fn demo_parameters() -> Parameters {
    Parameters {
        region: Some("eu-west-1".into()),
        access_key: Some("AKIAEXAMPLE".into()),
        secret_key: Some("hunter2".into()),
        bucket_name: Some("demo-bucket".into()),
        table_name: Some("demo-table".into()),
        table_key: Some("id".into()),
        api_name: Some("demo-api".into()),
        api_stage: Some("prod".into()),
        ..Parameters::default()
    }
}

async fn applied_stack() -> (Engine, InMemoryProvider, StackState) {
    let ctx = demo_parameters().resolve().unwrap();
    let identity = CallerIdentity::resolve(&ctx.credentials);
    let doc = |name: &str| PolicyDocument::from_bytes(name, b"{\"ok\":true}".to_vec()).unwrap();
    let documents = StackDocuments {
        compute_policy: doc("compute"),
        gateway_policy: doc("gateway"),
        request_template: doc("template"),
    };
    let artifact = Artifact {
        source_dir: "lambda".into(),
        content_hash: "hash-v1".into(),
    };

    let blueprint = IngestStack::compose(&ctx, &documents, &artifact).unwrap();
    let engine = Engine::new(blueprint).unwrap();
    let provider = InMemoryProvider::new(&ctx.region, &identity.account_id);
    let mut state = StackState::new();
    engine.apply(&provider, &mut state).await.unwrap();
    (engine, provider, state)
}

#[tokio::test]
async fn invoke_url_points_at_the_deployed_stage() {
    let (engine, _provider, state) = applied_stack().await;
    let url = engine.outputs(&state).invoke_url.unwrap();
    assert!(url.starts_with("https://"), "{url}");
    assert!(url.contains(".execute-api.eu-west-1.amazonaws.com/"), "{url}");
    assert!(url.ends_with("/prod/get-data"), "{url}");
}

#[tokio::test]
async fn json_uploads_invoke_the_function_with_the_table_binding() {
    let (_engine, provider, state) = applied_stack().await;

    let invocations = provider.put_object("demo-bucket", "records/data.json");
    assert_eq!(invocations.len(), 1);
    let invocation = &invocations[0];
    assert_eq!(invocation.key, "records/data.json");
    assert_eq!(
        invocation.environment.get("DB_NAME").map(String::as_str),
        Some("demo-table")
    );
    let function = state.get(&ids::FUNCTION.into()).unwrap();
    assert_eq!(Some(invocation.function.as_str()), function.name.as_deref());
}

#[tokio::test]
async fn non_matching_uploads_invoke_nothing() {
    let (_engine, provider, _state) = applied_stack().await;

    assert!(provider.put_object("demo-bucket", "data.csv").is_empty());
    assert!(provider.put_object("other-bucket", "data.json").is_empty());
    assert!(provider.invocations().is_empty());
}

#[tokio::test]
async fn gateway_get_scans_every_item() {
    let (_engine, provider, _state) = applied_stack().await;
    provider.seed_item("demo-table", json!({"id": "1", "payload": "alpha"}));
    provider.seed_item("demo-table", json!({"id": "2", "payload": "beta"}));

    let body = provider.http_get("/prod/get-data").unwrap();
    let items = body.as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.contains(&json!({"id": "1", "payload": "alpha"})));
    assert!(items.contains(&json!({"id": "2", "payload": "beta"})));
}

#[tokio::test]
async fn unknown_routes_are_rejected() {
    let (_engine, provider, _state) = applied_stack().await;
    assert!(provider.http_get("/prod/other").is_err());
    assert!(provider.http_get("/dev/get-data").is_err());
    assert!(provider.http_get("/prod").is_err());
}
