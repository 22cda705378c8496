//! Control-plane routes (§6): domain/queue/routing/consumer-group CRUD
//! (token-gated), plus the public `/api/auth/login`, `/api/auth/bootstrap`,
//! and `/health` endpoints (SPEC_FULL.md Section C.3/C.4).

use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::http::AppState;
use crate::model::{QueueConfig, Schema};
use crate::router::{CompareOp, Predicate, RoutingRule, StructuredPredicate};

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/bootstrap", post(bootstrap))
}

pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/domains", get(list_domains).post(create_domain))
        .route("/domains/{domain}", delete(delete_domain))
        .route("/domains/{domain}/queues", get(list_queues).post(create_queue))
        .route("/domains/{domain}/queues/{queue}", delete(delete_queue))
        .route("/domains/{domain}/routing-rules", get(list_rules).post(create_rule))
        .route("/domains/{domain}/routing-rules/{source}/{destination}", delete(delete_rule))
        .route(
            "/domains/{domain}/queues/{queue}/consumer-groups",
            get(list_consumer_groups),
        )
        .route(
            "/domains/{domain}/queues/{queue}/consumer-groups/{group}",
            get(consumer_group_details),
        )
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "uptimeSecs": state.start_time.elapsed().as_secs(),
        "domains": state.registry.list_domains().len(),
    }))
}

#[derive(Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

async fn login(State(state): State<AppState>, Json(body): Json<Credentials>) -> Result<impl IntoResponse, ApiError> {
    let token = state
        .auth
        .tokens()
        .login(&body.username, &body.password)
        .map_err(|_| ApiError::Unauthorized("invalid credentials".into()))?;
    Ok(Json(json!({ "token": token })))
}

async fn bootstrap(State(state): State<AppState>, Json(body): Json<Credentials>) -> Result<impl IntoResponse, ApiError> {
    let token = state
        .auth
        .tokens()
        .bootstrap(&body.username, &body.password)
        .map_err(|_| ApiError::Conflict("a user already exists".into()))?;
    Ok(Json(json!({ "token": token })))
}

#[derive(Deserialize)]
struct CreateDomainBody {
    name: String,
    #[serde(default)]
    schema: Schema,
}

async fn create_domain(State(state): State<AppState>, Json(body): Json<CreateDomainBody>) -> Result<impl IntoResponse, ApiError> {
    state.registry.create_domain(&body.name, body.schema)?;
    Ok(Json(json!({ "status": "ok", "name": body.name })))
}

async fn list_domains(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "domains": state.registry.list_domains() }))
}

async fn delete_domain(State(state): State<AppState>, Path(domain): Path<String>) -> Result<impl IntoResponse, ApiError> {
    state.registry.delete_domain(&domain).await?;
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Deserialize, Default)]
struct CreateQueueBody {
    name: String,
    #[serde(default)]
    max_size: Option<usize>,
    #[serde(default)]
    ttl_ms: Option<u64>,
}

async fn create_queue(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Json(body): Json<CreateQueueBody>,
) -> Result<impl IntoResponse, ApiError> {
    let mut config = QueueConfig::default();
    if let Some(max_size) = body.max_size {
        config.max_size = max_size;
    }
    if let Some(ttl_ms) = body.ttl_ms {
        config.ttl = Some(Duration::from_millis(ttl_ms));
    }
    state.registry.create_queue(&domain, &body.name, config)?;
    Ok(Json(json!({ "status": "ok", "name": body.name })))
}

async fn list_queues(State(state): State<AppState>, Path(domain): Path<String>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(json!({ "queues": state.registry.list_queues(&domain)? })))
}

async fn delete_queue(
    State(state): State<AppState>,
    Path((domain, queue)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state.registry.delete_queue(&domain, &queue).await?;
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Deserialize)]
struct CreateRuleBody {
    source_queue: String,
    destination_queue: String,
    predicate: StructuredPredicateBody,
}

#[derive(Deserialize)]
struct StructuredPredicateBody {
    #[serde(rename = "type")]
    op: CompareOp,
    field: String,
    value: serde_json::Value,
}

async fn create_rule(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Json(body): Json<CreateRuleBody>,
) -> Result<impl IntoResponse, ApiError> {
    let rule = RoutingRule {
        source_queue: body.source_queue,
        destination_queue: body.destination_queue,
        predicate: Predicate::Structured(StructuredPredicate {
            op: body.predicate.op,
            field: body.predicate.field,
            value: body.predicate.value,
        }),
    };
    state.registry.add_routing_rule(&domain, rule)?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn list_rules(State(state): State<AppState>, Path(domain): Path<String>) -> impl IntoResponse {
    let rules = state.registry.list_routing_rules(&domain);
    Json(json!({ "rules": rules }))
}

async fn delete_rule(
    State(state): State<AppState>,
    Path((domain, source, destination)): Path<(String, String, String)>,
) -> impl IntoResponse {
    state.registry.remove_routing_rule(&domain, &source, &destination);
    Json(json!({ "status": "ok" }))
}

async fn list_consumer_groups(
    State(state): State<AppState>,
    Path((domain, queue)): Path<(String, String)>,
) -> impl IntoResponse {
    Json(json!({ "groups": state.registry.list_consumer_groups(&domain, &queue) }))
}

async fn consumer_group_details(
    State(state): State<AppState>,
    Path((domain, queue, group)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .registry
        .consumer_group_details(&domain, &queue, &group)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("consumer group '{}' not found", group)))
}

