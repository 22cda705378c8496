use std::collections::HashMap;
use std::time::Duration;

use gortms::domain_registry::DomainRegistry;
use gortms::model::{Message, QueueConfig, Schema};
use gortms::queue_handler::ConsumeOptions;
use serde_json::json;
use uuid::Uuid;

fn opts(group: &str, timeout_ms: u64) -> ConsumeOptions {
    ConsumeOptions {
        group_id: Some(group.to_string()),
        start_from_id: None,
        consumer_id: None,
        timeout: Duration::from_millis(timeout_ms),
        cancel: None,
    }
}

#[tokio::test]
async fn two_consumer_groups_track_independent_cursors() {
    let registry = DomainRegistry::new();
    let domain = format!("orders_{}", Uuid::new_v4());
    registry.create_domain(&domain, Schema::default()).unwrap();
    registry.create_queue(&domain, "events", QueueConfig::default()).unwrap();

    for n in 0..3 {
        let message = Message::new(json!({"n": n}), HashMap::new(), HashMap::new());
        registry.publish(&domain, "events", message).await.unwrap();
    }

    let (_, first) = registry.consume(&domain, "events", opts("billing", 50)).await.unwrap().unwrap();
    assert_eq!(first.payload["n"], json!(0));

    // a second, independent group should still see the message from the start
    let (_, first_again) = registry.consume(&domain, "events", opts("shipping", 50)).await.unwrap().unwrap();
    assert_eq!(first_again.payload["n"], json!(0));

    // billing's cursor advanced past the first message, shipping's did not
    let (_, second_for_billing) = registry.consume(&domain, "events", opts("billing", 50)).await.unwrap().unwrap();
    assert_eq!(second_for_billing.payload["n"], json!(1));

    let (_, second_for_shipping) = registry.consume(&domain, "events", opts("shipping", 50)).await.unwrap().unwrap();
    assert_eq!(second_for_shipping.payload["n"], json!(1));
}

#[tokio::test]
async fn publish_then_consume_then_consume_again_returns_nil_immediately() {
    let registry = DomainRegistry::new();
    let domain = format!("basic_{}", Uuid::new_v4());
    registry.create_domain(&domain, Schema::default()).unwrap();
    registry.create_queue(&domain, "q1", QueueConfig { max_size: 1000, ..QueueConfig::default() }).unwrap();

    let published_id = registry
        .publish(&domain, "q1", Message::new(json!({"type": "t", "n": 1}), HashMap::new(), HashMap::new()))
        .await
        .unwrap();
    assert!(published_id.starts_with("msg-"));

    let (_, message) = registry.consume(&domain, "q1", opts("g1", 0)).await.unwrap().unwrap();
    assert_eq!(message.id, published_id);

    let second = registry.consume(&domain, "q1", opts("g1", 0)).await.unwrap();
    assert!(second.is_none());
}

#[tokio::test]
async fn routing_rule_forwards_a_copy_to_the_destination_queue() {
    let registry = DomainRegistry::new();
    let domain = format!("alerts_{}", Uuid::new_v4());
    registry.create_domain(&domain, Schema::default()).unwrap();
    registry.create_queue(&domain, "raw", QueueConfig::default()).unwrap();
    registry.create_queue(&domain, "critical", QueueConfig::default()).unwrap();

    registry
        .add_routing_rule(
            &domain,
            gortms::router::RoutingRule {
                source_queue: "raw".into(),
                destination_queue: "critical".into(),
                predicate: gortms::router::Predicate::Structured(gortms::router::StructuredPredicate {
                    op: gortms::router::CompareOp::Eq,
                    field: "severity".into(),
                    value: json!("high"),
                }),
            },
        )
        .unwrap();

    registry
        .publish(&domain, "raw", Message::new(json!({"severity": "low"}), HashMap::new(), HashMap::new()))
        .await
        .unwrap();
    registry
        .publish(&domain, "raw", Message::new(json!({"severity": "high"}), HashMap::new(), HashMap::new()))
        .await
        .unwrap();

    let got = registry.consume(&domain, "critical", opts("g1", 200)).await.unwrap();
    let (_, message) = got.expect("the high-severity message should have been routed");
    assert_eq!(message.payload["severity"], json!("high"));

    // the low-severity message never matched, so critical has nothing else
    let second = registry.consume(&domain, "critical", opts("g1", 20)).await.unwrap();
    assert!(second.is_none());
}

#[tokio::test]
async fn consuming_the_only_registered_group_frees_the_message() {
    let registry = DomainRegistry::new();
    let domain = format!("single_{}", Uuid::new_v4());
    registry.create_domain(&domain, Schema::default()).unwrap();
    registry.create_queue(&domain, "jobs", QueueConfig::default()).unwrap();

    // registering the group before publishing makes it live when the
    // message is appended, so it owes this message an acknowledgment
    registry.add_consumer_group(&domain, "jobs", "workers", None).await.unwrap();
    registry
        .publish(&domain, "jobs", Message::new(json!({"n": 1}), HashMap::new(), HashMap::new()))
        .await
        .unwrap();

    let (_, message) = registry.consume(&domain, "jobs", opts("workers", 50)).await.unwrap().unwrap();
    assert_eq!(message.payload["n"], json!(1));

    // a second, late-joining group never owed this message, so it finds nothing
    let second = registry.consume(&domain, "jobs", opts("auditors", 20)).await.unwrap();
    assert!(second.is_none());
}

#[tokio::test]
async fn delete_queue_then_publish_returns_not_found() {
    let registry = DomainRegistry::new();
    let domain = format!("scratch_{}", Uuid::new_v4());
    registry.create_domain(&domain, Schema::default()).unwrap();
    registry.create_queue(&domain, "q1", QueueConfig::default()).unwrap();
    registry.delete_queue(&domain, "q1").await.unwrap();

    let err = registry
        .publish(&domain, "q1", Message::new(json!({}), HashMap::new(), HashMap::new()))
        .await
        .unwrap_err();
    assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn schema_violation_rejects_publish() {
    let registry = DomainRegistry::new();
    let domain = format!("typed_{}", Uuid::new_v4());

    let mut fields = HashMap::new();
    fields.insert(
        "amount".to_string(),
        gortms::model::SchemaField { field_type: gortms::model::FieldType::Number, required: true },
    );
    registry.create_domain(&domain, Schema { fields }).unwrap();
    registry.create_queue(&domain, "payments", QueueConfig::default()).unwrap();

    let err = registry
        .publish(&domain, "payments", Message::new(json!({"amount": "not-a-number"}), HashMap::new(), HashMap::new()))
        .await
        .unwrap_err();
    assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
}
