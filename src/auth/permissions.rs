//! Permission grammar (§3, §6): `permission := "*" | action ":" target`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Publish,
    Consume,
    Manage,
}

impl Action {
    fn as_str(&self) -> &'static str {
        match self {
            Action::Publish => "publish",
            Action::Consume => "consume",
            Action::Manage => "manage",
        }
    }
}

/// A single `action:domain` requirement derived from an incoming request.
#[derive(Debug, Clone)]
pub struct RequiredPermission {
    pub action: Action,
    pub domain: String,
}

impl RequiredPermission {
    pub fn new(action: Action, domain: impl Into<String>) -> Self {
        Self { action, domain: domain.into() }
    }
}

/// Parses a grammar string into its constituent parts. `None` means the
/// string is malformed (neither `*` nor `action:target`).
fn parse(permission: &str) -> Option<(&str, &str)> {
    if permission == "*" {
        return Some(("*", "*"));
    }
    let (action, target) = permission.split_once(':')?;
    if action.is_empty() || target.is_empty() {
        return None;
    }
    Some((action, target))
}

/// A service grants `required` iff it holds `*`, or `required` literally,
/// or `action:*` with the same action (§4.6 step 7, §8's permission law).
pub fn grants(held: &[String], required: &RequiredPermission) -> bool {
    held.iter().any(|permission| {
        match parse(permission) {
            Some(("*", "*")) => true,
            Some((action, target)) => {
                action == required.action.as_str() && (target == "*" || target == required.domain)
            }
            None => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_grants_everything() {
        let held = vec!["*".to_string()];
        assert!(grants(&held, &RequiredPermission::new(Action::Manage, "any")));
    }

    #[test]
    fn scoped_permission_does_not_leak_to_other_domains() {
        let held = vec!["publish:orders".to_string()];
        assert!(!grants(&held, &RequiredPermission::new(Action::Publish, "inventory")));
        assert!(grants(&held, &RequiredPermission::new(Action::Publish, "orders")));
    }

    #[test]
    fn action_wildcard_grants_across_domains() {
        let held = vec!["publish:*".to_string()];
        assert!(grants(&held, &RequiredPermission::new(Action::Publish, "orders")));
        assert!(!grants(&held, &RequiredPermission::new(Action::Consume, "orders")));
    }

    #[test]
    fn malformed_permission_string_grants_nothing() {
        let held = vec!["not-a-permission".to_string()];
        assert!(!grants(&held, &RequiredPermission::new(Action::Publish, "orders")));
    }
}
