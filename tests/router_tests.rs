use gortms::router::{CompareOp, Predicate, Router, RoutingRule, StructuredPredicate};
use gortms::model::Message;
use serde_json::json;

fn msg(payload: serde_json::Value) -> Message {
    Message::new(payload, Default::default(), Default::default())
}

#[test]
fn contains_predicate_matches_substrings() {
    let router = Router::new();
    router.add_rule(
        "d1",
        RoutingRule {
            source_queue: "src".into(),
            destination_queue: "dst".into(),
            predicate: Predicate::Structured(StructuredPredicate {
                op: CompareOp::Contains,
                field: "message".into(),
                value: json!("error"),
            }),
        },
    );

    assert_eq!(router.evaluate("d1", "src", &msg(json!({"message": "fatal error occurred"}))), vec!["dst"]);
    assert!(router.evaluate("d1", "src", &msg(json!({"message": "all good"}))).is_empty());
}

#[test]
fn nested_field_path_is_resolved_with_dotted_notation() {
    let router = Router::new();
    router.add_rule(
        "d1",
        RoutingRule {
            source_queue: "src".into(),
            destination_queue: "dst".into(),
            predicate: Predicate::Structured(StructuredPredicate {
                op: CompareOp::Gte,
                field: "metrics.latency_ms".into(),
                value: json!(100),
            }),
        },
    );

    assert_eq!(
        router.evaluate("d1", "src", &msg(json!({"metrics": {"latency_ms": 150}}))),
        vec!["dst"]
    );
    assert!(router.evaluate("d1", "src", &msg(json!({"metrics": {"latency_ms": 10}}))).is_empty());
}

#[test]
fn re_adding_a_rule_for_the_same_source_and_destination_replaces_it() {
    let router = Router::new();
    router.add_rule(
        "d1",
        RoutingRule {
            source_queue: "src".into(),
            destination_queue: "dst".into(),
            predicate: Predicate::Structured(StructuredPredicate { op: CompareOp::Eq, field: "a".into(), value: json!(1) }),
        },
    );
    router.add_rule(
        "d1",
        RoutingRule {
            source_queue: "src".into(),
            destination_queue: "dst".into(),
            predicate: Predicate::Structured(StructuredPredicate { op: CompareOp::Eq, field: "b".into(), value: json!(2) }),
        },
    );

    assert_eq!(router.list_rules("d1"), vec![("src".to_string(), "dst".to_string())]);
    assert!(router.evaluate("d1", "src", &msg(json!({"a": 1}))).is_empty());
    assert_eq!(router.evaluate("d1", "src", &msg(json!({"b": 2}))), vec!["dst"]);
}

#[test]
fn removing_a_rule_stops_further_matches() {
    let router = Router::new();
    router.add_rule(
        "d1",
        RoutingRule {
            source_queue: "src".into(),
            destination_queue: "dst".into(),
            predicate: Predicate::Structured(StructuredPredicate { op: CompareOp::Eq, field: "a".into(), value: json!(1) }),
        },
    );
    router.remove_rule("d1", "src", "dst");
    assert!(router.evaluate("d1", "src", &msg(json!({"a": 1}))).is_empty());
    assert!(router.list_rules("d1").is_empty());
}
