//! Opaque bearer tokens (§4.6 "Token verification") plus the bootstrap/login
//! mechanics SPEC_FULL.md Section C.3 adds: the spec treats token
//! validation as an external collaborator, so this is a minimal in-process
//! implementation rather than a port of anything in the teacher.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    /// `admin` satisfies any role requirement (§4.6).
    pub fn satisfies(&self, required: Role) -> bool {
        matches!(self, Role::Admin) || *self == required
    }
}

#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub user_id: String,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
}

struct UserRecord {
    user_id: String,
    username: String,
    password_hash: String,
    role: Role,
}

fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Debug, thiserror::Error)]
pub enum TokenServiceError {
    #[error("users already exist")]
    AlreadyBootstrapped,
    #[error("invalid credentials")]
    InvalidCredentials,
}

pub struct TokenService {
    tokens: DashMap<String, TokenInfo>,
    users: Mutex<HashMap<String, UserRecord>>,
    ttl: Duration,
}

impl TokenService {
    pub fn new(ttl: Duration) -> Self {
        Self { tokens: DashMap::new(), users: Mutex::new(HashMap::new()), ttl }
    }

    /// Creates the first admin user. Conflict if any user already exists
    /// (§7's Conflict kind).
    pub fn bootstrap(&self, username: &str, password: &str) -> Result<String, TokenServiceError> {
        let mut users = self.users.lock();
        if !users.is_empty() {
            return Err(TokenServiceError::AlreadyBootstrapped);
        }
        let user_id = uuid::Uuid::new_v4().to_string();
        users.insert(
            username.to_string(),
            UserRecord { user_id: user_id.clone(), username: username.to_string(), password_hash: hash_password(password), role: Role::Admin },
        );
        drop(users);
        Ok(self.issue(&user_id, Role::Admin))
    }

    pub fn login(&self, username: &str, password: &str) -> Result<String, TokenServiceError> {
        let users = self.users.lock();
        let record = users.get(username).ok_or(TokenServiceError::InvalidCredentials)?;
        if record.password_hash != hash_password(password) {
            return Err(TokenServiceError::InvalidCredentials);
        }
        let (user_id, role) = (record.user_id.clone(), record.role);
        drop(users);
        Ok(self.issue(&user_id, role))
    }

    fn issue(&self, user_id: &str, role: Role) -> String {
        let token = random_token();
        self.tokens.insert(
            token.clone(),
            TokenInfo { user_id: user_id.to_string(), role, expires_at: Utc::now() + self.ttl },
        );
        token
    }

    /// Returns the token's identity iff it exists and has not expired.
    pub fn verify(&self, token: &str) -> Option<TokenInfo> {
        let info = self.tokens.get(token)?.clone();
        if info.expires_at < Utc::now() {
            self.tokens.remove(token);
            return None;
        }
        Some(info)
    }

    pub fn has_any_user(&self) -> bool {
        !self.users.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_then_verify_yields_admin() {
        let service = TokenService::new(Duration::hours(1));
        let token = service.bootstrap("root", "hunter2").unwrap();
        let info = service.verify(&token).unwrap();
        assert_eq!(info.role, Role::Admin);
    }

    #[test]
    fn bootstrap_twice_conflicts() {
        let service = TokenService::new(Duration::hours(1));
        service.bootstrap("root", "hunter2").unwrap();
        assert!(matches!(service.bootstrap("root2", "x"), Err(TokenServiceError::AlreadyBootstrapped)));
    }

    #[test]
    fn login_with_wrong_password_is_rejected() {
        let service = TokenService::new(Duration::hours(1));
        service.bootstrap("root", "hunter2").unwrap();
        assert!(matches!(service.login("root", "wrong"), Err(TokenServiceError::InvalidCredentials)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let service = TokenService::new(Duration::milliseconds(-1));
        let token = service.bootstrap("root", "hunter2").unwrap();
        assert!(service.verify(&token).is_none());
    }
}
