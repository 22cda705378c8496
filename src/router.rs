//! Predicate-driven forwarding between queues of the same domain (§4.5).
//! Evaluated after a source-queue append completes; a matching rule
//! enqueues a fresh copy onto the destination queue. Routing is single-hop
//! by construction — the destination publish never re-triggers the router
//! (spec.md §9 resolves the cross-cascade Open Question this way).

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredPredicate {
    #[serde(rename = "type")]
    pub op: CompareOp,
    pub field: String,
    pub value: Value,
}

pub type FunctionPredicate = std::sync::Arc<dyn Fn(&Message) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum Predicate {
    Structured(StructuredPredicate),
    Function(FunctionPredicate),
}

impl Predicate {
    pub fn matches(&self, message: &Message) -> bool {
        match self {
            Predicate::Structured(p) => evaluate_structured(p, message),
            Predicate::Function(f) => f(message),
        }
    }
}

#[derive(Clone)]
pub struct RoutingRule {
    pub source_queue: String,
    pub destination_queue: String,
    pub predicate: Predicate,
}

/// Resolves a dotted path (e.g. `"a.b.c"`) into a JSON object. A missing
/// path segment means "no match", never an error.
fn resolve_field<'a>(payload: &'a Value, field: &str) -> Option<&'a Value> {
    let mut current = payload;
    for segment in field.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn evaluate_structured(predicate: &StructuredPredicate, message: &Message) -> bool {
    let Some(found) = resolve_field(&message.payload, &predicate.field) else {
        return false;
    };

    match predicate.op {
        CompareOp::Eq => value_as_string(found) == value_as_string(&predicate.value),
        CompareOp::Neq => value_as_string(found) != value_as_string(&predicate.value),
        CompareOp::Contains => value_as_string(found).contains(&value_as_string(&predicate.value)),
        CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte => {
            match (found.as_f64(), predicate.value.as_f64()) {
                (Some(a), Some(b)) => numeric_compare(predicate.op, a, b),
                _ => lexicographic_compare(predicate.op, &value_as_string(found), &value_as_string(&predicate.value)),
            }
        }
    }
}

fn numeric_compare(op: CompareOp, a: f64, b: f64) -> bool {
    match op {
        CompareOp::Gt => a > b,
        CompareOp::Gte => a >= b,
        CompareOp::Lt => a < b,
        CompareOp::Lte => a <= b,
        _ => unreachable!(),
    }
}

fn lexicographic_compare(op: CompareOp, a: &str, b: &str) -> bool {
    match op {
        CompareOp::Gt => a > b,
        CompareOp::Gte => a >= b,
        CompareOp::Lt => a < b,
        CompareOp::Lte => a <= b,
        _ => unreachable!(),
    }
}

#[derive(Default)]
pub struct Router {
    /// domain -> rules keyed by (sourceQueue, destinationQueue), matching
    /// the uniqueness stated in §3's Domain data model.
    rules: DashMap<String, Vec<RoutingRule>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&self, domain: &str, rule: RoutingRule) {
        let mut rules = self.rules.entry(domain.to_string()).or_default();
        rules.retain(|r| !(r.source_queue == rule.source_queue && r.destination_queue == rule.destination_queue));
        rules.push(rule);
    }

    /// Drops every rule for a domain — used on domain deletion.
    pub fn clear_domain(&self, domain: &str) {
        self.rules.remove(domain);
    }

    pub fn remove_rule(&self, domain: &str, source_queue: &str, destination_queue: &str) {
        if let Some(mut rules) = self.rules.get_mut(domain) {
            rules.retain(|r| !(r.source_queue == source_queue && r.destination_queue == destination_queue));
        }
    }

    pub fn list_rules(&self, domain: &str) -> Vec<(String, String)> {
        self.rules
            .get(domain)
            .map(|rules| rules.iter().map(|r| (r.source_queue.clone(), r.destination_queue.clone())).collect())
            .unwrap_or_default()
    }

    /// Destination queues whose rule matched `message` published on
    /// `source_queue`. Evaluation failures (malformed predicate, etc.) are
    /// swallowed here — callers log and skip per §7's propagation policy.
    pub fn evaluate(&self, domain: &str, source_queue: &str, message: &Message) -> Vec<String> {
        match self.rules.get(domain) {
            Some(rules) => rules
                .iter()
                .filter(|r| r.source_queue == source_queue)
                .filter(|r| r.predicate.matches(message))
                .map(|r| r.destination_queue.clone())
                .collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(payload: Value) -> Message {
        Message::new(payload, Default::default(), Default::default())
    }

    #[test]
    fn eq_predicate_routes_matching_messages_only() {
        let router = Router::new();
        router.add_rule(
            "d1",
            RoutingRule {
                source_queue: "src".into(),
                destination_queue: "dst_high".into(),
                predicate: Predicate::Structured(StructuredPredicate {
                    op: CompareOp::Eq,
                    field: "priority".into(),
                    value: json!("high"),
                }),
            },
        );

        let matches = router.evaluate("d1", "src", &msg(json!({"priority": "high"})));
        assert_eq!(matches, vec!["dst_high".to_string()]);

        let matches = router.evaluate("d1", "src", &msg(json!({"priority": "low"})));
        assert!(matches.is_empty());
    }

    #[test]
    fn missing_field_never_matches() {
        let router = Router::new();
        router.add_rule(
            "d1",
            RoutingRule {
                source_queue: "src".into(),
                destination_queue: "dst".into(),
                predicate: Predicate::Structured(StructuredPredicate {
                    op: CompareOp::Gt,
                    field: "nested.count".into(),
                    value: json!(5),
                }),
            },
        );
        assert!(router.evaluate("d1", "src", &msg(json!({"other": 1}))).is_empty());
    }

    #[test]
    fn numeric_gt_coerces_before_falling_back_to_lexicographic() {
        let router = Router::new();
        router.add_rule(
            "d1",
            RoutingRule {
                source_queue: "src".into(),
                destination_queue: "dst".into(),
                predicate: Predicate::Structured(StructuredPredicate {
                    op: CompareOp::Gt,
                    field: "count".into(),
                    value: json!(5),
                }),
            },
        );
        assert_eq!(router.evaluate("d1", "src", &msg(json!({"count": 10}))), vec!["dst"]);
        assert!(router.evaluate("d1", "src", &msg(json!({"count": 2}))).is_empty());
    }
}
