use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GovernorError {
    #[error("system at capacity ({in_use}/{limit} slots in use)")]
    SystemExhausted { in_use: usize, limit: usize },
    #[error("user `{user_id}` at capacity ({in_use}/{limit} concurrent tasks)")]
    UserExhausted {
        user_id: Uuid,
        in_use: usize,
        limit: usize,
    },
    #[error("user `{user_id}` at DB session capacity ({in_use}/{limit} sessions)")]
    DbSaturated {
        user_id: Uuid,
        in_use: usize,
        limit: usize,
    },
}

// ---------------------------------------------------------------------------
// GovernorToken — RAII admission slot
// ---------------------------------------------------------------------------

/// Holds one system-wide and one per-user permit. Dropping the token releases
/// both automatically and decrements the logical DB-session counter for the
/// user.
pub struct GovernorToken {
    _system_permit: OwnedSemaphorePermit,
    _user_permit: OwnedSemaphorePermit,
    user_id: Uuid,
    session_counts: Arc<DashMap<Uuid, Arc<AtomicUsize>>>,
}

impl Drop for GovernorToken {
    fn drop(&mut self) {
        if let Some(counter) = self.session_counts.get(&self.user_id) {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

// ---------------------------------------------------------------------------
// ResourceGovernor
// ---------------------------------------------------------------------------

/// Admission control for task processing: a system-wide cap enforced by a
/// single `Semaphore`, plus a per-user cap enforced by lazily-created
/// per-user `Semaphore`s. A separate logical "DB session" counter per user
/// tracks concurrent Store access independent of permit lifetime, so a
/// networked storage backend could later swap in without touching callers.
pub struct ResourceGovernor {
    system: Arc<Semaphore>,
    system_limit: usize,
    per_user: DashMap<Uuid, Arc<Semaphore>>,
    user_limits: DashMap<Uuid, usize>,
    default_user_limit: usize,
    session_counts: Arc<DashMap<Uuid, Arc<AtomicUsize>>>,
    db_session_limit: usize,
}

impl ResourceGovernor {
    pub fn new(system_max_concurrent: usize, default_user_max_concurrent: usize, user_db_connection_limit: usize) -> Self {
        Self {
            system: Arc::new(Semaphore::new(system_max_concurrent)),
            system_limit: system_max_concurrent,
            per_user: DashMap::new(),
            user_limits: DashMap::new(),
            default_user_limit: default_user_max_concurrent,
            session_counts: Arc::new(DashMap::new()),
            db_session_limit: user_db_connection_limit,
        }
    }

    /// Override the concurrency cap for a specific user (e.g. from their
    /// `User.max_concurrent_tasks` field). Takes effect for future lazily
    /// created semaphores; existing ones are replaced.
    pub fn set_user_limit(&self, user_id: Uuid, limit: usize) {
        self.user_limits.insert(user_id, limit);
        self.per_user.remove(&user_id);
    }

    fn user_limit(&self, user_id: Uuid) -> usize {
        self.user_limits.get(&user_id).map(|l| *l).unwrap_or(self.default_user_limit)
    }

    fn user_semaphore(&self, user_id: Uuid) -> Arc<Semaphore> {
        let limit = self.user_limit(user_id);
        self.per_user
            .entry(user_id)
            .or_insert_with(|| Arc::new(Semaphore::new(limit)))
            .clone()
    }

    fn bump_session_count(&self, user_id: Uuid) {
        self.session_counts
            .entry(user_id)
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
            .fetch_add(1, Ordering::SeqCst);
    }

    fn db_session_count(&self, user_id: Uuid) -> usize {
        self.session_counts.get(&user_id).map(|c| c.load(Ordering::SeqCst)).unwrap_or(0)
    }

    /// Rejects admission if the user's logical DB session count is already at
    /// `db_session_limit`. Checked before any semaphore permit is taken, so a
    /// saturated DB-session budget never consumes a system/user task slot.
    fn check_db_capacity(&self, user_id: Uuid) -> Result<(), GovernorError> {
        let in_use = self.db_session_count(user_id);
        if in_use >= self.db_session_limit {
            return Err(GovernorError::DbSaturated { user_id, in_use, limit: self.db_session_limit });
        }
        Ok(())
    }

    /// Non-blocking admission check, used at the HTTP submission boundary.
    /// Returns immediately with an error if any cap is currently full.
    pub fn try_acquire(&self, user_id: Uuid) -> Result<GovernorToken, GovernorError> {
        self.check_db_capacity(user_id)?;

        let system_permit =
            self.system.clone().try_acquire_owned().map_err(|_| GovernorError::SystemExhausted {
                in_use: self.system_in_use(),
                limit: self.system_limit,
            })?;

        let user_sem = self.user_semaphore(user_id);
        let user_permit = user_sem.try_acquire_owned().map_err(|_| {
            warn!(%user_id, "per-user concurrency limit reached");
            GovernorError::UserExhausted {
                user_id,
                in_use: self.user_limit(user_id),
                limit: self.user_limit(user_id),
            }
        })?;

        self.bump_session_count(user_id);
        Ok(GovernorToken {
            _system_permit: system_permit,
            _user_permit: user_permit,
            user_id,
            session_counts: self.session_counts.clone(),
        })
    }

    /// Blocking admission, used by the WorkerPool: waits for DB-session
    /// headroom, then for the system and per-user semaphores, rather than
    /// failing fast.
    pub async fn acquire(&self, user_id: Uuid) -> GovernorToken {
        while self.check_db_capacity(user_id).is_err() {
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        let system_permit = self.system.clone().acquire_owned().await.expect("semaphore not closed");
        let user_sem = self.user_semaphore(user_id);
        let user_permit = user_sem.acquire_owned().await.expect("semaphore not closed");
        self.bump_session_count(user_id);
        GovernorToken {
            _system_permit: system_permit,
            _user_permit: user_permit,
            user_id,
            session_counts: self.session_counts.clone(),
        }
    }

    pub fn system_in_use(&self) -> usize {
        self.system_limit - self.system.available_permits()
    }

    pub fn system_limit(&self) -> usize {
        self.system_limit
    }

    pub fn user_in_use(&self, user_id: Uuid) -> usize {
        self.session_counts.get(&user_id).map(|c| c.load(Ordering::SeqCst)).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_acquire_respects_system_cap() {
        let gov = ResourceGovernor::new(1, 10, 10);
        let user = Uuid::new_v4();
        let _first = gov.try_acquire(user).expect("first acquire succeeds");
        let second = gov.try_acquire(Uuid::new_v4());
        assert!(matches!(second, Err(GovernorError::SystemExhausted { .. })));
    }

    #[test]
    fn try_acquire_respects_per_user_cap() {
        let gov = ResourceGovernor::new(10, 1, 10);
        let user = Uuid::new_v4();
        let _first = gov.try_acquire(user).expect("first acquire succeeds");
        let second = gov.try_acquire(user);
        assert!(matches!(second, Err(GovernorError::UserExhausted { .. })));
    }

    #[test]
    fn try_acquire_respects_db_session_cap() {
        let gov = ResourceGovernor::new(10, 10, 1);
        let user = Uuid::new_v4();
        let _first = gov.try_acquire(user).expect("first acquire succeeds");
        let second = gov.try_acquire(user);
        assert!(matches!(second, Err(GovernorError::DbSaturated { .. })));
    }

    #[test]
    fn db_session_cap_is_checked_before_any_permit_is_taken() {
        let gov = ResourceGovernor::new(10, 10, 1);
        let user = Uuid::new_v4();
        let _first = gov.try_acquire(user).expect("first acquire succeeds");
        let _ = gov.try_acquire(user);
        // The rejected attempt never touched the system semaphore.
        assert_eq!(gov.system_in_use(), 1);
    }

    #[test]
    fn dropping_token_frees_system_slot() {
        let gov = ResourceGovernor::new(1, 10, 10);
        let user = Uuid::new_v4();
        {
            let _tok = gov.try_acquire(user).unwrap();
            assert_eq!(gov.system_in_use(), 1);
        }
        assert_eq!(gov.system_in_use(), 0);
    }

    #[tokio::test]
    async fn acquire_blocks_until_capacity_frees() {
        let gov = Arc::new(ResourceGovernor::new(1, 10, 10));
        let user = Uuid::new_v4();
        let tok = gov.try_acquire(user).unwrap();

        let gov2 = gov.clone();
        let waiter = tokio::spawn(async move {
            let _tok = gov2.acquire(Uuid::new_v4()).await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(tok);
        waiter.await.unwrap();
    }
}
