// crates/ashfox-server/src/store/lock.rs
// Cooperative distributed lock over the lock document. The document's
// revision field carries the owner, so conditional writes double as
// compare-and-swap on ownership.

use super::repo::{ProjectRepository, RepoError};
use super::state::{LOCK_DOC_ID, PIPELINE_TENANT, StoredDocument};
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Lock tuning. TTL bounds how long a crashed holder can block peers.
#[derive(Debug, Clone)]
pub struct LockConfig {
    pub ttl: Duration,
    pub acquire_timeout: Duration,
    pub retry_min: Duration,
    pub retry_max: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(2),
            acquire_timeout: Duration::from_secs(10),
            retry_min: Duration::from_millis(25),
            retry_max: Duration::from_millis(75),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockBody {
    owner: String,
    expires_at: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("could not acquire pipeline lock within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Proof of holding the pipeline lock. Release explicitly; a dropped guard
/// is reclaimed by peers after the TTL.
#[derive(Debug)]
pub struct LockGuard {
    pub owner: String,
}

fn lock_document(owner: &str, ttl: Duration) -> StoredDocument {
    let now = Utc::now();
    let body = LockBody {
        owner: owner.to_string(),
        expires_at: now.timestamp_millis() + ttl.as_millis() as i64,
    };
    StoredDocument {
        tenant_id: PIPELINE_TENANT.to_string(),
        project_id: LOCK_DOC_ID.to_string(),
        revision: owner.to_string(),
        state_json: serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string()),
        created_at: now.to_rfc3339(),
        updated_at: now.to_rfc3339(),
    }
}

fn is_expired(doc: &StoredDocument) -> bool {
    match serde_json::from_str::<LockBody>(&doc.state_json) {
        Ok(body) => body.expires_at <= Utc::now().timestamp_millis(),
        // Unreadable lock body: treat as expired rather than deadlock.
        Err(_) => true,
    }
}

/// Acquire the pipeline lock, retrying with jitter until the timeout.
/// Returns how many busy rounds were observed alongside the guard so the
/// caller can count contention.
pub async fn acquire(
    repo: &dyn ProjectRepository,
    owner: &str,
    cfg: &LockConfig,
) -> Result<(LockGuard, u64), LockError> {
    let deadline = Instant::now() + cfg.acquire_timeout;
    let mut contention: u64 = 0;
    loop {
        let existing = repo.find(PIPELINE_TENANT, LOCK_DOC_ID).await?;
        let attempt = match existing {
            None => {
                repo.save_if_revision(lock_document(owner, cfg.ttl), None)
                    .await
            }
            Some(doc) if doc.revision == owner || is_expired(&doc) => {
                repo.save_if_revision(lock_document(owner, cfg.ttl), Some(&doc.revision))
                    .await
            }
            Some(_) => Err(RepoError::Conflict),
        };
        match attempt {
            Ok(()) => {
                return Ok((
                    LockGuard {
                        owner: owner.to_string(),
                    },
                    contention,
                ));
            }
            Err(RepoError::Conflict) => {
                contention += 1;
                if Instant::now() >= deadline {
                    return Err(LockError::Timeout(cfg.acquire_timeout));
                }
                let jitter = rand::rng().random_range(cfg.retry_min..=cfg.retry_max);
                sleep(jitter).await;
            }
            Err(other) => return Err(LockError::Repo(other)),
        }
    }
}

/// Release the lock if we still own it. Losing ownership (TTL elapsed and
/// a peer reclaimed) is not an error.
pub async fn release(repo: &dyn ProjectRepository, guard: LockGuard) -> Result<(), LockError> {
    match repo.find(PIPELINE_TENANT, LOCK_DOC_ID).await? {
        Some(doc) if doc.revision == guard.owner => {
            repo.remove(PIPELINE_TENANT, LOCK_DOC_ID).await?;
        }
        _ => {
            tracing::debug!(owner = %guard.owner, "pipeline lock already reclaimed");
        }
    }
    Ok(())
}
