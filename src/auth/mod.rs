//! Auth Gate (§4.6): selects HMAC or token verification per request and
//! enforces the outcome. The axum wiring (`from_fn` middleware, header
//! extraction) lives in `http::extract`; this module is the pure decision
//! logic so it can be unit tested without spinning up a server.

pub mod hmac;
pub mod permissions;
pub mod service_repository;
pub mod token;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};

use crate::config::Config;
use crate::error::ApiError;
use permissions::{Action, RequiredPermission};
use service_repository::ServiceRepository;
use token::{Role, TokenService};

#[derive(Debug, Clone)]
pub enum Identity {
    Service { service_id: String },
    User { user_id: String, role: Role },
}

pub struct AuthGate {
    services: Arc<ServiceRepository>,
    tokens: Arc<TokenService>,
}

pub struct HmacRequest<'a> {
    pub service_id: &'a str,
    pub timestamp: &'a str,
    pub signature: &'a str,
    pub method: &'a str,
    pub path: &'a str,
    pub body: &'a str,
    pub client_ip: &'a str,
    pub is_tls: bool,
}

impl AuthGate {
    pub fn new(services: Arc<ServiceRepository>, tokens: Arc<TokenService>) -> Self {
        Self { services, tokens }
    }

    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    pub fn services(&self) -> &Arc<ServiceRepository> {
        &self.services
    }

    pub fn enabled(&self) -> bool {
        Config::global().auth.enabled
    }

    /// §4.6 HMAC path, steps 1-9 (step 9, publishing identity into the
    /// request context, is left to the caller — this returns the identity).
    pub fn authenticate_hmac(&self, req: &HmacRequest) -> Result<Identity, ApiError> {
        let auth_cfg = &Config::global().auth;

        if auth_cfg.require_tls && !req.is_tls {
            return Err(ApiError::NotFound("not found".into()));
        }

        let window = Duration::seconds(auth_cfg.hmac_window_secs);
        hmac::check_window(req.timestamp, window, Utc::now()).map_err(|_| ApiError::Unauthorized("timestamp rejected".into()))?;

        let account = self
            .services
            .get(req.service_id)
            .map_err(|_| ApiError::Unauthorized("unknown service".into()))?;
        if !account.enabled {
            return Err(ApiError::Unauthorized("service disabled".into()));
        }

        let canonical = hmac::canonical_string(req.method, req.path, req.body, req.timestamp);
        hmac::verify(&account.secret, &canonical, req.signature).map_err(|_| ApiError::Unauthorized("signature mismatch".into()))?;

        if !hmac::ip_allowed(&account.ip_whitelist, req.client_ip) {
            return Err(ApiError::Forbidden("client ip not allow-listed".into()));
        }

        if let Some(required) = derive_required_permission(req.method, req.path) {
            if !permissions::grants(&account.permissions, &required) {
                return Err(ApiError::Forbidden(format!("missing permission {}:{}", action_str(required.action), required.domain)));
            }
        }

        self.services.touch_last_used(req.service_id);
        Ok(Identity::Service { service_id: req.service_id.to_string() })
    }

    pub fn authenticate_token(&self, token: &str) -> Result<Identity, ApiError> {
        let info = self.tokens.verify(token).ok_or_else(|| ApiError::Unauthorized("invalid or expired token".into()))?;
        Ok(Identity::User { user_id: info.user_id, role: info.role })
    }

    pub fn require_role(&self, identity: &Identity, required: Role) -> Result<(), ApiError> {
        match identity {
            Identity::User { role, .. } if role.satisfies(required) => Ok(()),
            Identity::User { .. } => Err(ApiError::Forbidden("role does not satisfy requirement".into())),
            Identity::Service { .. } => Ok(()),
        }
    }
}

fn action_str(action: Action) -> &'static str {
    match action {
        Action::Publish => "publish",
        Action::Consume => "consume",
        Action::Manage => "manage",
    }
}

/// Derives the permission a request needs from its method and path (§4.6
/// step 7): `POST .../queues/{q}/messages -> publish:{domain}`, `GET
/// .../queues/{q}/messages -> consume:{domain}`, anything under
/// `/consumers -> manage:{domain}`. Anything else requires no specific
/// permission beyond successful authentication.
pub fn derive_required_permission(method: &str, path: &str) -> Option<RequiredPermission> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let domain_pos = segments.iter().position(|s| *s == "domains")? + 1;
    let domain = segments.get(domain_pos)?.to_string();

    if segments.contains(&"consumers") || segments.contains(&"consumer-groups") {
        return Some(RequiredPermission::new(Action::Manage, domain));
    }
    if segments.last() == Some(&"messages") {
        return match method {
            "POST" => Some(RequiredPermission::new(Action::Publish, domain)),
            "GET" => Some(RequiredPermission::new(Action::Consume, domain)),
            _ => None,
        };
    }
    None
}

pub fn default_token_ttl() -> StdDuration {
    StdDuration::from_secs(Config::global().auth.token_ttl_secs.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_publish_permission_for_post_messages() {
        let required = derive_required_permission("POST", "/api/domains/d1/queues/q1/messages").unwrap();
        assert_eq!(required.domain, "d1");
        assert_eq!(action_str(required.action), "publish");
    }

    #[test]
    fn derives_manage_permission_for_consumer_routes() {
        let required = derive_required_permission("POST", "/api/domains/d1/queues/q1/consumer-groups/g1/consumers").unwrap();
        assert_eq!(action_str(required.action), "manage");
    }

    #[test]
    fn non_data_plane_routes_have_no_required_permission() {
        assert!(derive_required_permission("GET", "/health").is_none());
    }
}
