use gortms::auth::hmac;
use gortms::auth::service_repository::ServiceRepository;
use gortms::auth::token::TokenService;
use gortms::auth::{AuthGate, HmacRequest, Identity};
use chrono::Duration as ChronoDuration;

fn gate() -> AuthGate {
    let services = std::sync::Arc::new(ServiceRepository::open(":memory:", [1u8; 32]).unwrap());
    let tokens = std::sync::Arc::new(TokenService::new(ChronoDuration::hours(1)));
    AuthGate::new(services, tokens)
}

#[test]
fn hmac_happy_path_authenticates_as_the_service() {
    let gate = gate();
    gate.services().create("svc1", "s3cr3t", vec!["publish:d1".into()], vec![]).unwrap();

    let timestamp = chrono::Utc::now().to_rfc3339();
    let canonical = hmac::canonical_string("POST", "/api/domains/d1/queues/q1/messages", "{}", &timestamp);
    let signature = hmac::sign("s3cr3t", &canonical);

    let req = HmacRequest {
        service_id: "svc1",
        timestamp: &timestamp,
        signature: &signature,
        method: "POST",
        path: "/api/domains/d1/queues/q1/messages",
        body: "{}",
        client_ip: "127.0.0.1",
        is_tls: true,
    };

    match gate.authenticate_hmac(&req).unwrap() {
        Identity::Service { service_id } => assert_eq!(service_id, "svc1"),
        Identity::User { .. } => panic!("expected a service identity"),
    }
}

#[test]
fn hmac_rejects_a_timestamp_outside_the_window() {
    let gate = gate();
    gate.services().create("svc1", "s3cr3t", vec!["publish:d1".into()], vec![]).unwrap();

    let stale = (chrono::Utc::now() - chrono::Duration::minutes(20)).to_rfc3339();
    let canonical = hmac::canonical_string("POST", "/api/domains/d1/queues/q1/messages", "{}", &stale);
    let signature = hmac::sign("s3cr3t", &canonical);

    let req = HmacRequest {
        service_id: "svc1",
        timestamp: &stale,
        signature: &signature,
        method: "POST",
        path: "/api/domains/d1/queues/q1/messages",
        body: "{}",
        client_ip: "127.0.0.1",
        is_tls: true,
    };

    assert!(gate.authenticate_hmac(&req).is_err());
}

#[test]
fn hmac_rejects_a_disabled_service() {
    let gate = gate();
    gate.services().create("svc1", "s3cr3t", vec!["publish:d1".into()], vec![]).unwrap();
    gate.services().set_enabled("svc1", false).unwrap();

    let timestamp = chrono::Utc::now().to_rfc3339();
    let canonical = hmac::canonical_string("POST", "/api/domains/d1/queues/q1/messages", "{}", &timestamp);
    let signature = hmac::sign("s3cr3t", &canonical);

    let req = HmacRequest {
        service_id: "svc1",
        timestamp: &timestamp,
        signature: &signature,
        method: "POST",
        path: "/api/domains/d1/queues/q1/messages",
        body: "{}",
        client_ip: "127.0.0.1",
        is_tls: true,
    };

    assert!(gate.authenticate_hmac(&req).is_err());
}

#[test]
fn hmac_enforces_the_permission_scope_on_the_service_account() {
    let gate = gate();
    // svc1 can only publish to d1, not consume from it.
    gate.services().create("svc1", "s3cr3t", vec!["publish:d1".into()], vec![]).unwrap();

    let timestamp = chrono::Utc::now().to_rfc3339();
    let canonical = hmac::canonical_string("GET", "/api/domains/d1/queues/q1/messages", "", &timestamp);
    let signature = hmac::sign("s3cr3t", &canonical);

    let req = HmacRequest {
        service_id: "svc1",
        timestamp: &timestamp,
        signature: &signature,
        method: "GET",
        path: "/api/domains/d1/queues/q1/messages",
        body: "",
        client_ip: "127.0.0.1",
        is_tls: true,
    };

    assert!(gate.authenticate_hmac(&req).is_err());
}

#[test]
fn hmac_enforces_the_ip_whitelist() {
    let gate = gate();
    gate.services().create("svc1", "s3cr3t", vec!["publish:d1".into()], vec!["10.0.0.*".into()]).unwrap();

    let timestamp = chrono::Utc::now().to_rfc3339();
    let canonical = hmac::canonical_string("POST", "/api/domains/d1/queues/q1/messages", "{}", &timestamp);
    let signature = hmac::sign("s3cr3t", &canonical);

    let req = HmacRequest {
        service_id: "svc1",
        timestamp: &timestamp,
        signature: &signature,
        method: "POST",
        path: "/api/domains/d1/queues/q1/messages",
        body: "{}",
        client_ip: "203.0.113.9",
        is_tls: true,
    };

    assert!(gate.authenticate_hmac(&req).is_err());
}

#[test]
fn bootstrap_then_login_round_trips_through_the_gate() {
    let gate = gate();
    let bootstrap_token = gate.tokens().bootstrap("root", "hunter2").unwrap();
    assert!(matches!(gate.authenticate_token(&bootstrap_token).unwrap(), Identity::User { .. }));

    let login_token = gate.tokens().login("root", "hunter2").unwrap();
    assert!(gate.authenticate_token(&login_token).is_ok());
    assert!(gate.authenticate_token("not-a-real-token").is_err());
}
