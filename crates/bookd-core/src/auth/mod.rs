//! Credential verification (§6.5, §7): read-only lookup against a
//! `users(username, password_hash)` table plus an in-memory, mutex-guarded
//! login-attempt lockout table (§3.6).
//!
//! Grounded on the teacher's `resume_db::db::ResumeDb` (a `Clone`-able
//! handle wrapping a `sqlx::Pool<Sqlite>`, opened against an XDG path); the
//! pool here is opened read-only since this is a lookup-only collaborator,
//! not a writer.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use argon2::password_hash::PasswordHash;
use argon2::{Argon2, PasswordVerifier};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use thiserror::Error;
use tracing::warn;

pub const MAX_LOGIN_ATTEMPTS: u32 = 10;
pub const LOCKOUT_DURATION_MINUTES: u64 = 30;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("account locked, retry in {retry_after_secs}s")]
    Locked { retry_after_secs: u64 },
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

struct AttemptState {
    fail_count: u32,
    first_fail_at: u64,
    locked_until: Option<u64>,
}

/// Read-only credential store plus the in-memory lockout table (§3.6).
pub struct AuthService {
    pool: Pool<Sqlite>,
    attempts: Mutex<HashMap<String, AttemptState>>,
    max_attempts: u32,
    lockout: Duration,
}

impl AuthService {
    /// Opens the auth database read-only. The schema (`users(username,
    /// password_hash)`) is expected to already exist; this collaborator
    /// never writes to it.
    pub async fn open(db_path: &Path, max_attempts: u32, lockout_minutes: u64) -> Result<Self, AuthError> {
        let options = SqliteConnectOptions::new().filename(db_path).read_only(true);
        let pool = SqlitePoolOptions::new().max_connections(4).connect_with(options).await?;
        Ok(Self {
            pool,
            attempts: Mutex::new(HashMap::new()),
            max_attempts,
            lockout: Duration::from_secs(lockout_minutes * 60),
        })
    }

    #[cfg(test)]
    async fn open_in_memory(max_attempts: u32, lockout_minutes: u64) -> Result<Self, AuthError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::query("CREATE TABLE users (username TEXT PRIMARY KEY, password_hash TEXT NOT NULL)")
            .execute(&pool)
            .await?;
        Ok(Self {
            pool,
            attempts: Mutex::new(HashMap::new()),
            max_attempts,
            lockout: Duration::from_secs(lockout_minutes * 60),
        })
    }

    /// Sweeps this username's lockout if expired, then checks whether it is
    /// currently locked. Returns `Some(retry_after_secs)` if still locked.
    fn check_and_sweep_lockout(&self, username: &str) -> Option<u64> {
        let mut attempts = self.attempts.lock().unwrap();
        let Some(state) = attempts.get_mut(username) else { return None };
        if let Some(locked_until) = state.locked_until {
            let now = now();
            if now >= locked_until {
                state.fail_count = 0;
                state.locked_until = None;
                return None;
            }
            return Some(locked_until - now);
        }
        None
    }

    fn record_failure(&self, username: &str) {
        let mut attempts = self.attempts.lock().unwrap();
        let now = now();
        let state = attempts.entry(username.to_string()).or_insert(AttemptState {
            fail_count: 0,
            first_fail_at: now,
            locked_until: None,
        });
        state.fail_count += 1;
        if state.fail_count >= self.max_attempts {
            state.locked_until = Some(now + self.lockout.as_secs());
            warn!(username, "auth: account locked after repeated failures");
        }
    }

    fn record_success(&self, username: &str) {
        self.attempts.lock().unwrap().remove(username);
    }

    /// Verifies `(username, password)`. Returns success/failure only; the
    /// caller manages session state.
    pub async fn verify(&self, username: &str, password: &str) -> Result<(), AuthError> {
        if let Some(retry_after_secs) = self.check_and_sweep_lockout(username) {
            return Err(AuthError::Locked { retry_after_secs });
        }

        let row = sqlx::query("SELECT password_hash FROM users WHERE username = ?1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            self.record_failure(username);
            return Err(AuthError::InvalidCredentials);
        };
        let stored: String = row.try_get("password_hash")?;

        let parsed = PasswordHash::new(&stored).map_err(|_| AuthError::InvalidCredentials)?;
        let ok = Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok();

        if ok {
            self.record_success(username);
            Ok(())
        } else {
            self.record_failure(username);
            Err(AuthError::InvalidCredentials)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::password_hash::{PasswordHasher, SaltString};
    use argon2::password_hash::rand_core::OsRng;

    async fn seed_user(svc: &AuthService, username: &str, password: &str) {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default().hash_password(password.as_bytes(), &salt).unwrap().to_string();
        sqlx::query("INSERT INTO users (username, password_hash) VALUES (?1, ?2)")
            .bind(username)
            .bind(hash)
            .execute(&svc.pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn correct_password_succeeds() {
        let svc = AuthService::open_in_memory(MAX_LOGIN_ATTEMPTS, LOCKOUT_DURATION_MINUTES).await.unwrap();
        seed_user(&svc, "alice", "hunter2").await;
        svc.verify("alice", "hunter2").await.unwrap();
    }

    #[tokio::test]
    async fn wrong_password_fails() {
        let svc = AuthService::open_in_memory(MAX_LOGIN_ATTEMPTS, LOCKOUT_DURATION_MINUTES).await.unwrap();
        seed_user(&svc, "alice", "hunter2").await;
        let err = svc.verify("alice", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn unknown_user_fails_without_panicking() {
        let svc = AuthService::open_in_memory(MAX_LOGIN_ATTEMPTS, LOCKOUT_DURATION_MINUTES).await.unwrap();
        let err = svc.verify("ghost", "whatever").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn lockout_after_max_attempts_then_locked_on_next_try() {
        let svc = AuthService::open_in_memory(3, LOCKOUT_DURATION_MINUTES).await.unwrap();
        seed_user(&svc, "bob", "correct").await;
        for _ in 0..3 {
            let err = svc.verify("bob", "wrong").await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials));
        }
        let err = svc.verify("bob", "correct").await.unwrap_err();
        assert!(matches!(err, AuthError::Locked { .. }));
    }

    #[tokio::test]
    async fn successful_login_clears_failure_counter() {
        let svc = AuthService::open_in_memory(3, LOCKOUT_DURATION_MINUTES).await.unwrap();
        seed_user(&svc, "carol", "correct").await;
        svc.verify("carol", "wrong").await.unwrap_err();
        svc.verify("carol", "correct").await.unwrap();
        assert!(svc.attempts.lock().unwrap().get("carol").is_none());
    }
}
