use serde_json::{json, Value};
use tasknet::actions::builtin::{AssignHandler, LogHandler};
use tasknet::actions::http::HttpHandler;
use tasknet::actions::{DecompositionHandler, WorkItem};
use tasknet::runtime::identifier::Identifier;
use tasknet::runtime::redis_storage::RedisJournal;
use tasknet::runtime::storage::{Journal, WriteIntent};
use uuid::Uuid;

fn work_item(input: Value, enablement: Value, params: Value) -> WorkItem {
    WorkItem {
        task: "T".to_string(),
        instance: Identifier::new("case.1"),
        input,
        enablement,
        params,
    }
}

#[tokio::test]
async fn test_assign_computes_outputs() {
    let handler = AssignHandler::new();
    let params = json!({ "outputs": { "total": "amount * rate", "label": "\"fixed\"" } });
    handler.validate(&params).unwrap();

    let item = work_item(json!({ "amount": 4 }), json!({ "rate": 3 }), params);
    let output = handler.execute(&item).await.unwrap();
    assert_eq!(output, json!({ "total": 12, "label": "fixed" }));
}

#[test]
fn test_assign_rejects_bad_parameters() {
    let handler = AssignHandler::new();
    assert!(handler.validate(&json!({})).is_err());
    assert!(handler.validate(&json!({ "outputs": { "x": 1 } })).is_err());
    assert!(handler.validate(&json!({ "outputs": { "x": "((x" } })).is_err());
}

#[tokio::test]
async fn test_log_echoes_input() {
    let item = work_item(json!({ "a": 1 }), Value::Null, json!({ "msg": "hello" }));
    assert_eq!(LogHandler.execute(&item).await.unwrap(), json!({ "a": 1 }));
}

#[test]
fn test_http_requires_url() {
    let handler = HttpHandler::new();
    assert!(handler.validate(&json!({ "method": "GET" })).is_err());
    assert!(handler.validate(&json!({ "url": "http://localhost:1" })).is_ok());
}

#[tokio::test]
#[ignore = "requires network access"]
async fn test_http_posts_input() {
    let handler = HttpHandler::new();
    let item = work_item(
        json!({ "order": 7 }),
        Value::Null,
        json!({ "url": "https://httpbin.org/post" }),
    );
    let output = handler.execute(&item).await.unwrap();
    assert_eq!(output["status"], json!(200));
    assert_eq!(output["data"]["json"], json!({ "order": 7 }));
}

#[tokio::test]
#[ignore = "requires a Redis server on localhost"]
async fn test_redis_journal_replays_appended_intents() {
    let client = redis::Client::open("redis://127.0.0.1/").unwrap();
    let journal = RedisJournal::new(client).with_prefix("tasknet-test");
    let case_id = Uuid::new_v4();
    let intents = vec![
        WriteIntent::TokenAdded {
            condition: "i".to_string(),
            identifier: Identifier::new("case"),
        },
        WriteIntent::TaskReleased { task: "T".to_string() },
    ];

    journal.append(case_id, Uuid::new_v4(), intents.clone()).await.unwrap();
    assert_eq!(journal.replay(case_id).await.unwrap(), intents);
}
