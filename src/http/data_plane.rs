//! Data-plane routes (§6, bit-exact paths): publish, consume, consumer
//! group membership. Every route here sits behind the Auth Gate middleware
//! (wired in `http::build_router`).

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::http::AppState;
use crate::queue_handler::ConsumeOptions;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/domains/{domain}/queues/{queue}/messages", post(publish).get(consume))
        .route(
            "/domains/{domain}/queues/{queue}/consumer-groups/{group}/consumers",
            post(add_consumer),
        )
        .route(
            "/domains/{domain}/queues/{queue}/consumer-groups/{group}/consumers/self",
            delete(remove_self),
        )
}

async fn publish(
    State(state): State<AppState>,
    Path((domain, queue)): Path<(String, String)>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let message = crate::model::Message::new(payload, Default::default(), Default::default());
    let message_id = state.registry.publish(&domain, &queue, message).await?;
    Ok(Json(json!({ "status": "ok", "messageId": message_id })))
}

#[derive(Deserialize)]
struct ConsumeQuery {
    timeout: Option<u64>,
    max: Option<usize>,
    group: Option<String>,
    consumer: Option<String>,
    start_from: Option<String>,
}

async fn consume(
    State(state): State<AppState>,
    Path((domain, queue)): Path<(String, String)>,
    Query(query): Query<ConsumeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let max = query.max.unwrap_or(1).max(1);
    let timeout = Duration::from_secs(query.timeout.unwrap_or(0));

    let mut messages = Vec::new();
    for i in 0..max {
        let options = ConsumeOptions {
            group_id: query.group.clone(),
            start_from_id: if i == 0 { query.start_from.clone() } else { None },
            consumer_id: query.consumer.clone(),
            // Only the first consume may long-poll; once the batch has
            // started, later slots return immediately instead of blocking.
            timeout: if i == 0 { timeout } else { Duration::ZERO },
            cancel: None,
        };

        match state.registry.consume(&domain, &queue, options).await? {
            Some((_, message)) => messages.push(render_message(&message)),
            None => break,
        }
    }

    let count = messages.len();
    Ok(Json(json!({ "messages": messages, "count": count })))
}

/// Merges the payload at top level alongside `id`/`timestamp`/`headers`
/// (§6 "Message wire format").
fn render_message(message: &crate::model::Message) -> Value {
    let mut rendered = message.payload.clone();
    if let Value::Object(ref mut obj) = rendered {
        obj.insert("id".into(), json!(message.id));
        obj.insert("timestamp".into(), json!(message.timestamp.to_rfc3339()));
        obj.insert("headers".into(), json!(message.headers));
    } else {
        rendered = json!({
            "id": message.id,
            "timestamp": message.timestamp.to_rfc3339(),
            "headers": message.headers,
            "payload": message.payload,
        });
    }
    rendered
}

#[derive(Deserialize)]
struct AddConsumerBody {
    #[serde(rename = "consumerID")]
    consumer_id: String,
}

async fn add_consumer(
    State(state): State<AppState>,
    Path((domain, queue, group)): Path<(String, String, String)>,
    Json(body): Json<AddConsumerBody>,
) -> Result<impl IntoResponse, ApiError> {
    state.registry.add_consumer_group(&domain, &queue, &group, Some(&body.consumer_id)).await?;
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Deserialize)]
struct RemoveSelfQuery {
    consumer: Option<String>,
}

async fn remove_self(
    State(state): State<AppState>,
    Path((domain, queue, group)): Path<(String, String, String)>,
    Query(query): Query<RemoveSelfQuery>,
) -> Result<impl IntoResponse, ApiError> {
    match query.consumer {
        Some(consumer_id) => {
            state.registry.remove_consumer(&domain, &queue, &group, &consumer_id)?;
            Ok(Json(json!({ "status": "ok", "consumerID": consumer_id, "removedBy": "self" })))
        }
        None => {
            state.registry.remove_consumer_group(&domain, &queue, &group).await?;
            Ok(Json(json!({ "status": "ok", "consumerID": "self", "removedBy": "self" })))
        }
    }
}
