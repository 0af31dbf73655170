//! Terraform `http` backend state and lock storage.
//!
//! A state lives in the key-value store at `tfstate/<id>`, its lock at
//! `tfstate/<id>.lock`. The lock entry holds the client's LOCK body verbatim
//! and is never modified in place: it is created by [`Service::try_lock`]
//! and removed by [`Service::release_lock`] or [`Service::unlock`].
//!
//! Lock ownership checks on writes are protocol policy and belong to the
//! HTTP layer; [`StoredLock`] gives it what it needs to decide.

use chrono::Utc;
use nahcloud_domain::{DomainError, Metadata, TfStateLock};
use nahcloud_store::StoreError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::service::Service;

const PATH_PREFIX: &str = "tfstate/";
const LOCK_SUFFIX: &str = ".lock";

// Lock/unlock races that keep emptying the slot under us are bounded.
const MAX_LOCK_ATTEMPTS: usize = 3;

pub fn state_path(state_id: &str) -> String {
    format!("{PATH_PREFIX}{state_id}")
}

pub fn lock_path(state_id: &str) -> String {
    format!("{PATH_PREFIX}{state_id}{LOCK_SUFFIX}")
}

/// A stored lock record, parsed when possible.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredLock {
    Parsed { raw: String, lock: TfStateLock },
    /// The payload is not a valid lock document. The state still counts as locked.
    Unparsed { raw: String },
}

impl StoredLock {
    pub fn from_raw(raw: String) -> Self {
        match TfStateLock::parse(&raw) {
            Ok(lock) => StoredLock::Parsed { raw, lock },
            Err(_) => StoredLock::Unparsed { raw },
        }
    }

    pub fn raw(&self) -> &str {
        match self {
            StoredLock::Parsed { raw, .. } | StoredLock::Unparsed { raw } => raw,
        }
    }

    pub fn into_raw(self) -> String {
        match self {
            StoredLock::Parsed { raw, .. } | StoredLock::Unparsed { raw } => raw,
        }
    }

    /// The lock's `ID`, if the payload parsed.
    pub fn id(&self) -> Option<&str> {
        match self {
            StoredLock::Parsed { lock, .. } => Some(&lock.id),
            StoredLock::Unparsed { .. } => None,
        }
    }

    /// Whether a writer presenting `lock_id` owns this lock. An unidentifiable
    /// lock is owned by nobody.
    pub fn is_held_by(&self, lock_id: &str) -> bool {
        !lock_id.is_empty() && self.id() == Some(lock_id)
    }

    /// Whether UNLOCK with `lock_id` must be refused. Unparseable payloads
    /// never block an unlock, so a corrupt lock can always be cleared.
    pub fn blocks_unlock_by(&self, lock_id: &str) -> bool {
        matches!(self.id(), Some(id) if id != lock_id)
    }
}

/// Outcome of [`Service::try_lock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    Acquired,
    /// Someone else holds the lock; carries their payload verbatim.
    AlreadyLocked { existing: String },
}

/// Outcome of [`Service::release_lock`].
#[derive(Debug, Clone, PartialEq)]
pub enum UnlockOutcome {
    /// No lock was present, or it vanished before we could remove it.
    NotLocked,
    Released(StoredLock),
    /// The lock belongs to another ID and was left in place.
    HeldByOther(StoredLock),
}

impl Service {
    /// Raw state document, or `NotFound`.
    pub async fn get_state(&self, state_id: &str) -> Result<String, DomainError> {
        self.store
            .get_metadata_by_path(&state_path(state_id))
            .await?
            .map(|m| m.value)
            .ok_or_else(|| DomainError::not_found("tfstate", state_id))
    }

    /// Create or overwrite the state. Does not look at the lock.
    pub async fn set_state(&self, state_id: &str, value: String) -> Result<(), DomainError> {
        let path = state_path(state_id);
        if let Some(existing) = self.store.get_metadata_by_path(&path).await? {
            return self.overwrite(existing, value).await;
        }

        let now = Utc::now();
        let entry = Metadata {
            id: Uuid::new_v4().to_string(),
            path: path.clone(),
            value,
            created_at: now,
            updated_at: now,
        };
        match self.store.create_metadata(&entry).await {
            Ok(()) => {
                debug!(%state_id, "state created");
                Ok(())
            }
            // Lost a create race with another writer: theirs exists now, overwrite it.
            Err(StoreError::AlreadyExists { .. }) => {
                let existing = self
                    .store
                    .get_metadata_by_path(&path)
                    .await?
                    .ok_or_else(|| DomainError::internal("state vanished during write"))?;
                self.overwrite(existing, entry.value).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn overwrite(&self, mut existing: Metadata, value: String) -> Result<(), DomainError> {
        existing.value = value;
        existing.updated_at = Utc::now();
        self.store.update_metadata(&existing).await?;
        debug!(path = %existing.path, "state updated");
        Ok(())
    }

    /// Remove the state if present. Deleting a missing state succeeds.
    pub async fn delete_state(&self, state_id: &str) -> Result<(), DomainError> {
        let Some(entry) = self.store.get_metadata_by_path(&state_path(state_id)).await? else {
            return Ok(());
        };
        match self.store.delete_metadata(&entry.id).await {
            Ok(()) | Err(StoreError::NotFound { .. }) => {
                info!(%state_id, "state deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Current lock, or `NotFound` when the state is unlocked.
    pub async fn get_lock(&self, state_id: &str) -> Result<StoredLock, DomainError> {
        self.store
            .get_metadata_by_path(&lock_path(state_id))
            .await?
            .map(|m| StoredLock::from_raw(m.value))
            .ok_or_else(|| DomainError::not_found("tfstate lock", state_id))
    }

    /// Acquire the lock by creating its entry. Never overwrites an existing
    /// lock. Relies on the store rejecting a duplicate path atomically, so of
    /// two concurrent callers exactly one gets [`LockAttempt::Acquired`].
    pub async fn try_lock(
        &self,
        state_id: &str,
        payload: String,
    ) -> Result<LockAttempt, DomainError> {
        let path = lock_path(state_id);
        let now = Utc::now();
        let entry = Metadata {
            id: Uuid::new_v4().to_string(),
            path: path.clone(),
            value: payload,
            created_at: now,
            updated_at: now,
        };

        for _ in 0..MAX_LOCK_ATTEMPTS {
            match self.store.create_metadata(&entry).await {
                Ok(()) => {
                    info!(%state_id, "state locked");
                    return Ok(LockAttempt::Acquired);
                }
                Err(StoreError::AlreadyExists { .. }) => {
                    if let Some(existing) = self.store.get_metadata_by_path(&path).await? {
                        debug!(%state_id, "lock already held");
                        return Ok(LockAttempt::AlreadyLocked { existing: existing.value });
                    }
                    // Released between our insert and our read; try again.
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(%state_id, "giving up on contended lock");
        Err(DomainError::ServiceUnavailable(format!("lock for '{state_id}' is contended")))
    }

    /// Release the lock on behalf of `lock_id`. The entry that is checked
    /// against `lock_id` is the one deleted; a lock taken after the check
    /// is never removed.
    pub async fn release_lock(
        &self,
        state_id: &str,
        lock_id: &str,
    ) -> Result<UnlockOutcome, DomainError> {
        let Some(entry) = self.store.get_metadata_by_path(&lock_path(state_id)).await? else {
            return Ok(UnlockOutcome::NotLocked);
        };
        self.release_entry(state_id, entry, lock_id).await
    }

    async fn release_entry(
        &self,
        state_id: &str,
        entry: Metadata,
        lock_id: &str,
    ) -> Result<UnlockOutcome, DomainError> {
        let held = StoredLock::from_raw(entry.value);
        if held.blocks_unlock_by(lock_id) {
            debug!(%state_id, %lock_id, holder = ?held.id(), "unlock refused");
            return Ok(UnlockOutcome::HeldByOther(held));
        }
        match self.store.delete_metadata(&entry.id).await {
            Ok(()) => {
                info!(%state_id, %lock_id, "state unlocked");
                Ok(UnlockOutcome::Released(held))
            }
            // Released by someone else; any newer lock has a new entry ID.
            Err(StoreError::NotFound { .. }) => Ok(UnlockOutcome::NotLocked),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the lock unconditionally. Returns the removed payload, or
    /// `None` when there was no lock.
    pub async fn unlock(&self, state_id: &str) -> Result<Option<String>, DomainError> {
        let Some(entry) = self.store.get_metadata_by_path(&lock_path(state_id)).await? else {
            return Ok(None);
        };
        match self.store.delete_metadata(&entry.id).await {
            Ok(()) => {
                info!(%state_id, "state unlocked");
                Ok(Some(entry.value))
            }
            // Someone else released it first.
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use nahcloud_store::InMemoryStore;

    fn service() -> Service {
        Service::new(Arc::new(InMemoryStore::new()))
    }

    const LOCK_A: &str = r#"{"ID":"A","Operation":"OperationTypeApply","Who":"alice@laptop"}"#;
    const LOCK_B: &str = r#"{"ID":"B","Operation":"OperationTypePlan","Who":"bob@ci"}"#;

    #[test]
    fn paths() {
        assert_eq!(state_path("prod"), "tfstate/prod");
        assert_eq!(lock_path("prod"), "tfstate/prod.lock");
    }

    #[tokio::test]
    async fn set_then_get_returns_exact_bytes() {
        let svc = service();
        let body = "{\"version\": 4,\n \"serial\": 1 }";
        svc.set_state("s1", body.to_string()).await.unwrap();
        assert_eq!(svc.get_state("s1").await.unwrap(), body);

        svc.set_state("s1", "{\"serial\":2}".into()).await.unwrap();
        assert_eq!(svc.get_state("s1").await.unwrap(), "{\"serial\":2}");
    }

    #[tokio::test]
    async fn missing_state_is_not_found() {
        let svc = service();
        assert!(svc.get_state("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn delete_never_created_succeeds() {
        let svc = service();
        svc.delete_state("ghost").await.unwrap();
        assert!(svc.get_state("ghost").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn delete_removes_state() {
        let svc = service();
        svc.set_state("s1", "{}".into()).await.unwrap();
        svc.delete_state("s1").await.unwrap();
        assert!(svc.get_state("s1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn second_lock_sees_first_payload() {
        let svc = service();
        assert_eq!(svc.try_lock("s1", LOCK_A.into()).await.unwrap(), LockAttempt::Acquired);
        assert_eq!(
            svc.try_lock("s1", LOCK_B.into()).await.unwrap(),
            LockAttempt::AlreadyLocked { existing: LOCK_A.into() }
        );

        let held = svc.get_lock("s1").await.unwrap();
        assert_eq!(held.raw(), LOCK_A);
        assert_eq!(held.id(), Some("A"));
    }

    #[tokio::test]
    async fn unlock_without_lock_is_none() {
        let svc = service();
        assert_eq!(svc.unlock("s1").await.unwrap(), None);
        assert!(svc.get_lock("s1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn unlock_returns_prior_payload_and_frees_lock() {
        let svc = service();
        svc.try_lock("s1", LOCK_A.into()).await.unwrap();
        assert_eq!(svc.unlock("s1").await.unwrap().as_deref(), Some(LOCK_A));
        assert_eq!(svc.try_lock("s1", LOCK_B.into()).await.unwrap(), LockAttempt::Acquired);
    }

    #[tokio::test]
    async fn locks_are_per_state() {
        let svc = service();
        assert_eq!(svc.try_lock("a", LOCK_A.into()).await.unwrap(), LockAttempt::Acquired);
        assert_eq!(svc.try_lock("b", LOCK_A.into()).await.unwrap(), LockAttempt::Acquired);
    }

    #[tokio::test]
    async fn state_and_lock_are_independent_entries() {
        let svc = service();
        svc.try_lock("s1", LOCK_A.into()).await.unwrap();
        assert!(svc.get_state("s1").await.unwrap_err().is_not_found());
        svc.set_state("s1", "{}".into()).await.unwrap();
        assert_eq!(svc.get_lock("s1").await.unwrap().raw(), LOCK_A);
    }

    #[tokio::test]
    async fn release_lock_checks_owner() {
        let svc = service();
        assert_eq!(svc.release_lock("s1", "A").await.unwrap(), UnlockOutcome::NotLocked);

        svc.try_lock("s1", LOCK_A.into()).await.unwrap();
        match svc.release_lock("s1", "B").await.unwrap() {
            UnlockOutcome::HeldByOther(held) => assert_eq!(held.raw(), LOCK_A),
            other => panic!("expected HeldByOther, got {other:?}"),
        }
        assert_eq!(svc.get_lock("s1").await.unwrap().raw(), LOCK_A);

        match svc.release_lock("s1", "A").await.unwrap() {
            UnlockOutcome::Released(held) => assert_eq!(held.id(), Some("A")),
            other => panic!("expected Released, got {other:?}"),
        }
        assert!(svc.get_lock("s1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn stale_release_leaves_newer_lock_alone() {
        let svc = service();
        svc.try_lock("s1", LOCK_A.into()).await.unwrap();
        let stale = svc.store.get_metadata_by_path(&lock_path("s1")).await.unwrap().unwrap();

        // A is released and B locks before the stale release deletes anything.
        svc.release_lock("s1", "A").await.unwrap();
        svc.try_lock("s1", LOCK_B.into()).await.unwrap();

        assert_eq!(svc.release_entry("s1", stale, "A").await.unwrap(), UnlockOutcome::NotLocked);
        assert_eq!(svc.get_lock("s1").await.unwrap().raw(), LOCK_B);
    }

    #[tokio::test]
    async fn unparsed_lock_can_be_released_by_anyone() {
        let svc = service();
        svc.try_lock("s1", "not-json".into()).await.unwrap();
        assert_eq!(
            svc.release_lock("s1", "whoever").await.unwrap(),
            UnlockOutcome::Released(StoredLock::Unparsed { raw: "not-json".into() })
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_lock_has_exactly_one_winner() {
        let svc = service();
        let mut handles = Vec::new();
        for n in 0..32 {
            let svc = svc.clone();
            handles.push(tokio::spawn(async move {
                svc.try_lock("race", format!(r#"{{"ID":"{n}"}}"#)).await.unwrap()
            }));
        }

        let mut acquired = 0;
        let mut payloads = Vec::new();
        for h in handles {
            match h.await.unwrap() {
                LockAttempt::Acquired => acquired += 1,
                LockAttempt::AlreadyLocked { existing } => payloads.push(existing),
            }
        }
        assert_eq!(acquired, 1);

        let winner = svc.get_lock("race").await.unwrap().into_raw();
        assert!(payloads.iter().all(|p| *p == winner));
    }

    #[test]
    fn stored_lock_policies() {
        let parsed = StoredLock::from_raw(LOCK_A.into());
        assert!(parsed.is_held_by("A"));
        assert!(!parsed.is_held_by("B"));
        assert!(parsed.blocks_unlock_by("B"));
        assert!(!parsed.blocks_unlock_by("A"));

        let garbage = StoredLock::from_raw("not-json".into());
        assert_eq!(garbage, StoredLock::Unparsed { raw: "not-json".into() });
        assert!(!garbage.is_held_by(""));
        assert!(!garbage.blocks_unlock_by("anything"));
    }
}
