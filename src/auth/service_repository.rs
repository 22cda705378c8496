//! Persistent service-account catalogue (§3, §6). Grounded on the teacher's
//! `brokers/queues/persistence/sqlite.rs` for the storage shape (WAL mode,
//! `execute_batch` pragmas, `prepare_cached` writes); encryption-at-rest is
//! delegated per spec.md §1, implemented with `aes-gcm` the way the
//! `stupid-server` example in the wider pack uses it, since the teacher
//! itself has no encryption code.

use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use rusqlite::{params, Connection};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ServiceRepositoryError {
    #[error("service account '{0}' already exists")]
    AlreadyExists(String),
    #[error("service account '{0}' not found")]
    NotFound(String),
    #[error("persistence error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("encryption error: {0}")]
    Crypto(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceAccount {
    pub id: String,
    #[serde(skip)]
    pub secret: String,
    pub permissions: Vec<String>,
    pub ip_whitelist: Vec<String>,
    pub enabled: bool,
    pub last_used: Option<DateTime<Utc>>,
}

pub struct ServiceRepository {
    conn: Mutex<Connection>,
    cipher: Aes256Gcm,
}

const NONCE_LEN: usize = 12;

impl ServiceRepository {
    pub fn open(path: &str, encryption_key: [u8; 32]) -> Result<Self, ServiceRepositoryError> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS service_accounts (
                id TEXT PRIMARY KEY,
                secret_ciphertext BLOB NOT NULL,
                nonce BLOB NOT NULL,
                permissions TEXT NOT NULL,
                ip_whitelist TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                last_used INTEGER
            )",
            [],
        )?;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&encryption_key));
        Ok(Self { conn: Mutex::new(conn), cipher })
    }

    fn encrypt_secret(&self, secret: &str) -> Result<(Vec<u8>, Vec<u8>), ServiceRepositoryError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, secret.as_bytes())
            .map_err(|e| ServiceRepositoryError::Crypto(e.to_string()))?;
        Ok((ciphertext, nonce_bytes.to_vec()))
    }

    fn decrypt_secret(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<String, ServiceRepositoryError> {
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| ServiceRepositoryError::Crypto(e.to_string()))?;
        String::from_utf8(plaintext).map_err(|e| ServiceRepositoryError::Crypto(e.to_string()))
    }

    pub fn create(
        &self,
        id: &str,
        secret: &str,
        permissions: Vec<String>,
        ip_whitelist: Vec<String>,
    ) -> Result<ServiceAccount, ServiceRepositoryError> {
        let conn = self.conn.lock();
        let exists: bool = conn
            .query_row("SELECT 1 FROM service_accounts WHERE id = ?1", params![id], |_| Ok(true))
            .unwrap_or(false);
        if exists {
            return Err(ServiceRepositoryError::AlreadyExists(id.to_string()));
        }

        let (ciphertext, nonce) = self.encrypt_secret(secret)?;
        let permissions_json = serde_json::to_string(&permissions).unwrap_or_default();
        let whitelist_json = serde_json::to_string(&ip_whitelist).unwrap_or_default();

        conn.prepare_cached(
            "INSERT INTO service_accounts (id, secret_ciphertext, nonce, permissions, ip_whitelist, enabled, last_used)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, NULL)",
        )?
        .execute(params![id, ciphertext, nonce, permissions_json, whitelist_json])?;

        Ok(ServiceAccount {
            id: id.to_string(),
            secret: secret.to_string(),
            permissions,
            ip_whitelist,
            enabled: true,
            last_used: None,
        })
    }

    pub fn get(&self, id: &str) -> Result<ServiceAccount, ServiceRepositoryError> {
        let conn = self.conn.lock();
        let row = conn.query_row(
            "SELECT secret_ciphertext, nonce, permissions, ip_whitelist, enabled, last_used
             FROM service_accounts WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                ))
            },
        );

        let (ciphertext, nonce, permissions_json, whitelist_json, enabled, last_used) =
            row.map_err(|_| ServiceRepositoryError::NotFound(id.to_string()))?;
        drop(conn);

        Ok(ServiceAccount {
            id: id.to_string(),
            secret: self.decrypt_secret(&ciphertext, &nonce)?,
            permissions: serde_json::from_str(&permissions_json).unwrap_or_default(),
            ip_whitelist: serde_json::from_str(&whitelist_json).unwrap_or_default(),
            enabled,
            last_used: last_used.and_then(|millis| DateTime::from_timestamp_millis(millis)),
        })
    }

    pub fn list(&self) -> Result<Vec<ServiceAccount>, ServiceRepositoryError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id FROM service_accounts")?;
        let ids: Vec<String> = stmt.query_map([], |row| row.get(0))?.filter_map(Result::ok).collect();
        drop(stmt);
        drop(conn);
        ids.into_iter().map(|id| self.get(&id)).collect()
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), ServiceRepositoryError> {
        let conn = self.conn.lock();
        let changed = conn.execute("UPDATE service_accounts SET enabled = ?1 WHERE id = ?2", params![enabled, id])?;
        if changed == 0 {
            return Err(ServiceRepositoryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<(), ServiceRepositoryError> {
        let conn = self.conn.lock();
        let changed = conn.execute("DELETE FROM service_accounts WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(ServiceRepositoryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Best-effort, bounded-deadline update (§4.6 step 8) — callers spawn
    /// this rather than awaiting it inline on the hot path.
    pub fn touch_last_used(self: &Arc<Self>, id: &str) {
        let repo = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            let deadline = tokio::time::Duration::from_secs(5);
            let _ = tokio::time::timeout(deadline, async {
                let conn = repo.conn.lock();
                let _ = conn.execute(
                    "UPDATE service_accounts SET last_used = ?1 WHERE id = ?2",
                    params![Utc::now().timestamp_millis(), id],
                );
            })
            .await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> ServiceRepository {
        ServiceRepository::open(":memory:", [7u8; 32]).unwrap()
    }

    #[test]
    fn create_then_get_round_trips_secret() {
        let repo = repo();
        repo.create("s1", "topsecret", vec!["publish:d1".into()], vec![]).unwrap();
        let account = repo.get("s1").unwrap();
        assert_eq!(account.secret, "topsecret");
        assert!(account.enabled);
    }

    #[test]
    fn duplicate_create_conflicts() {
        let repo = repo();
        repo.create("s1", "a", vec![], vec![]).unwrap();
        assert!(matches!(repo.create("s1", "b", vec![], vec![]), Err(ServiceRepositoryError::AlreadyExists(_))));
    }

    #[test]
    fn disabling_account_persists() {
        let repo = repo();
        repo.create("s1", "a", vec![], vec![]).unwrap();
        repo.set_enabled("s1", false).unwrap();
        assert!(!repo.get("s1").unwrap().enabled);
    }
}
