//! Named cross-process locks over PostgreSQL advisory locks
//!
//! A named-lock service: callers lock by string name, the deterministic
//! name -> i64 key derivation (SHA-256, first 8 bytes) stays an
//! implementation detail. Advisory locks are session-scoped, so the
//! guard owns the pool connection the lock was taken on and the lock
//! must be released on that same connection.
//!
//! If a guard is dropped without an explicit release, the connection is
//! detached from the pool so the session closes and PostgreSQL drops the
//! lock with it. Returning the connection to the pool instead would leak
//! the lock into an unrelated checkout.

use candid_common::Result;
use sha2::{Digest, Sha256};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tracing::warn;

/// Named lock service backed by `pg_try_advisory_lock`
#[derive(Clone)]
pub struct NamedLockService {
    pool: PgPool,
}

impl NamedLockService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Deterministic lock key for a name.
    fn key_for(name: &str) -> i64 {
        let digest = Sha256::digest(name.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        i64::from_be_bytes(bytes)
    }

    /// Try to acquire the named lock without blocking.
    ///
    /// `Ok(None)` means another session holds it; expected under
    /// concurrent workers, not an error.
    pub async fn try_acquire(&self, name: &str) -> Result<Option<NamedLockGuard>> {
        let key = Self::key_for(name);
        let mut conn = self.pool.acquire().await?;

        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await?;

        if acquired {
            Ok(Some(NamedLockGuard {
                conn: Some(conn),
                key,
                name: name.to_string(),
            }))
        } else {
            Ok(None)
        }
    }
}

/// Holder of an acquired named lock
pub struct NamedLockGuard {
    conn: Option<PoolConnection<Postgres>>,
    key: i64,
    name: String,
}

impl NamedLockGuard {
    /// Release the lock on the session that holds it.
    pub async fn release(mut self) -> Result<()> {
        if let Some(mut conn) = self.conn.take() {
            sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
                .bind(self.key)
                .fetch_one(&mut *conn)
                .await?;
        }
        Ok(())
    }
}

impl Drop for NamedLockGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // Not released explicitly: close the session rather than
            // returning it to the pool with the lock still held.
            warn!(lock = %self.name, "Advisory lock guard dropped without release, closing session");
            drop(conn.detach());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_derivation_is_deterministic() {
        let a = NamedLockService::key_for("mf-training:3f2b");
        let b = NamedLockService::key_for("mf-training:3f2b");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_names_get_distinct_keys() {
        let a = NamedLockService::key_for("mf-training:conversation-a");
        let b = NamedLockService::key_for("mf-training:conversation-b");
        assert_ne!(a, b);
    }
}
