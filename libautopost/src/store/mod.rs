//! Durable state for automation runs
//!
//! Persistence is split in two layers:
//!
//! - [`RunRepository`] is a plain key-value contract (whole-record upserts of
//!   runs keyed by run id, rotation cursors keyed by user and profile). It is
//!   implemented by [`sqlite::SqliteRepository`] (local file),
//!   [`remote::DocumentRepository`] (HTTP document store),
//!   [`memory::MemoryRepository`] (tests and ephemeral hosts), and composed by
//!   [`mirror::MirroredRepository`].
//! - [`StateStore`] is the facade the processor and hosts use. It implements
//!   the run lifecycle operations (`create_run`, `update_status`,
//!   `append_result`, ...) as read-modify-write cycles over a repository and
//!   enforces status and progress invariants.
//!
//! # Example
//!
//! ```no_run
//! use libautopost::{Config, StateStore};
//!
//! # async fn example() -> libautopost::Result<()> {
//! let store = StateStore::from_config(&Config::load()?).await?;
//! for run in store.list_runs_for_user("user-1").await? {
//!     println!("{} {}", run.id, run.status);
//! }
//! # Ok(())
//! # }
//! ```

pub mod memory;
pub mod mirror;
pub mod remote;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::config::{resolve_store_path, Config};
use crate::error::{Result, StoreError};
use crate::types::{ItemError, Progress, PublishResult, Run, RunStatus};

use self::mirror::MirroredRepository;
use self::remote::DocumentRepository;
use self::sqlite::SqliteRepository;

/// Key-value persistence for run records and rotation cursors
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Short name used in log messages
    fn name(&self) -> &str;

    /// Insert or replace the whole run record
    async fn put_run(&self, run: &Run) -> Result<()>;

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>>;

    /// All runs owned by a user, newest first
    async fn list_runs(&self, user_id: &str) -> Result<Vec<Run>>;

    async fn get_author_cursor(
        &self,
        user_id: &str,
        profile_id: &str,
    ) -> Result<Option<RotationCursor>>;

    async fn set_author_cursor(
        &self,
        user_id: &str,
        profile_id: &str,
        cursor: RotationCursor,
    ) -> Result<()>;
}

/// Persisted author rotation state for one (user, profile) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationCursor {
    pub last_author_index: i64,
    /// Millisecond precision, so every backend stores the same instant
    pub updated_at: DateTime<Utc>,
}

impl RotationCursor {
    pub fn new(last_author_index: i64) -> Self {
        Self {
            last_author_index,
            updated_at: Utc::now().trunc_subsecs(3),
        }
    }

    /// The cursor written last; `self` wins a tie
    pub fn newest(self, other: Self) -> Self {
        if other.updated_at > self.updated_at {
            other
        } else {
            self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LockKey {
    Run(String),
    Rotation(String, String),
}

type LockMap = Arc<Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>>;

/// Exclusive hold on one key; the map entry goes away with the last holder
struct KeyGuard {
    key: LockKey,
    locks: LockMap,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

/// Run lifecycle operations over a [`RunRepository`]
#[derive(Clone)]
pub struct StateStore {
    repo: Arc<dyn RunRepository>,
    locks: LockMap,
}

impl StateStore {
    pub fn new(repo: Arc<dyn RunRepository>) -> Self {
        Self {
            repo,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Open the local SQLite store, mirrored to the remote store when configured
    pub async fn from_config(config: &Config) -> Result<Self> {
        let path = resolve_store_path(&config.store.path);
        let local: Arc<dyn RunRepository> = Arc::new(SqliteRepository::open(&path).await?);

        let remote: Option<Arc<dyn RunRepository>> = match &config.remote {
            Some(remote_config) => Some(Arc::new(DocumentRepository::new(remote_config)?)),
            None => None,
        };

        Ok(Self::new(Arc::new(MirroredRepository::new(local, remote))))
    }

    pub fn repository(&self) -> &Arc<dyn RunRepository> {
        &self.repo
    }

    /// Serialize read-modify-write cycles on one key
    async fn lock_key(&self, key: LockKey) -> KeyGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;
        KeyGuard {
            key,
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn modify_run<F>(&self, run_id: &str, apply: F) -> Result<Run>
    where
        F: FnOnce(&mut Run) -> Result<()>,
    {
        let _guard = self.lock_key(LockKey::Run(run_id.to_string())).await;

        let mut run = self
            .repo
            .get_run(run_id)
            .await?
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?;

        apply(&mut run)?;
        run.updated_at = Utc::now();
        self.repo.put_run(&run).await?;
        Ok(run)
    }

    pub async fn create_run(&self, run: &Run) -> Result<()> {
        let _guard = self.lock_key(LockKey::Run(run.id.clone())).await;
        self.repo.put_run(run).await?;
        debug!(run_id = %run.id, user_id = %run.user_id, "Run record created");
        Ok(())
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        self.repo.get_run(run_id).await
    }

    /// Like [`get_run`](Self::get_run) but treats a missing record as an error
    pub async fn require_run(&self, run_id: &str) -> Result<Run> {
        self.get_run(run_id)
            .await?
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()).into())
    }

    pub async fn list_runs_for_user(&self, user_id: &str) -> Result<Vec<Run>> {
        self.repo.list_runs(user_id).await
    }

    /// Move a run to `status`, rejecting transitions the lifecycle forbids
    pub async fn update_status(&self, run_id: &str, status: RunStatus) -> Result<Run> {
        self.modify_run(run_id, |run| {
            if !run.status.can_transition_to(status) {
                return Err(StoreError::InvalidTransition {
                    from: run.status.to_string(),
                    to: status.to_string(),
                }
                .into());
            }
            run.status = status;
            Ok(())
        })
        .await
    }

    /// Atomically take ownership of a pending run (`pending -> running`).
    ///
    /// Fails with the current status when the run is not pending, so callers
    /// can tell an active run from a finished one.
    pub async fn claim_run(&self, run_id: &str) -> std::result::Result<Run, ClaimError> {
        let mut observed = None;
        let result = self
            .modify_run(run_id, |run| {
                if run.status != RunStatus::Pending {
                    observed = Some(run.status);
                    return Err(StoreError::InvalidTransition {
                        from: run.status.to_string(),
                        to: RunStatus::Running.to_string(),
                    }
                    .into());
                }
                run.status = RunStatus::Running;
                Ok(())
            })
            .await;

        match (result, observed) {
            (Ok(run), _) => Ok(run),
            (Err(_), Some(status)) => Err(ClaimError::NotPending(status)),
            (Err(e), None) => Err(ClaimError::Store(e)),
        }
    }

    /// Replace the progress snapshot; `completed` and `failed` may not decrease
    pub async fn update_progress(&self, run_id: &str, progress: &Progress) -> Result<Run> {
        self.modify_run(run_id, |run| {
            if progress.completed < run.progress.completed || progress.failed < run.progress.failed
            {
                return Err(StoreError::ProgressRegression(format!(
                    "completed {} -> {}, failed {} -> {}",
                    run.progress.completed, progress.completed, run.progress.failed, progress.failed
                ))
                .into());
            }
            run.progress = progress.clone();
            Ok(())
        })
        .await
    }

    pub async fn append_result(&self, run_id: &str, result: PublishResult) -> Result<Run> {
        self.modify_run(run_id, |run| {
            run.results.push(result);
            Ok(())
        })
        .await
    }

    pub async fn append_error(&self, run_id: &str, error: ItemError) -> Result<Run> {
        self.modify_run(run_id, |run| {
            run.errors.push(error);
            Ok(())
        })
        .await
    }

    /// Last author index used for a (user, profile) pair; -1 when none was used yet
    pub async fn get_last_author_index(&self, user_id: &str, profile_id: &str) -> Result<i64> {
        Ok(self
            .repo
            .get_author_cursor(user_id, profile_id)
            .await?
            .map_or(-1, |cursor| cursor.last_author_index))
    }

    pub async fn set_last_author_index(
        &self,
        user_id: &str,
        profile_id: &str,
        index: i64,
    ) -> Result<()> {
        let _guard = self
            .lock_key(LockKey::Rotation(user_id.to_string(), profile_id.to_string()))
            .await;
        self.repo
            .set_author_cursor(user_id, profile_id, RotationCursor::new(index))
            .await
    }
}

/// Why [`StateStore::claim_run`] refused a run
#[derive(Debug)]
pub enum ClaimError {
    NotPending(RunStatus),
    Store(crate::error::AutopostError),
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryRepository;
    use super::*;
    use crate::error::AutopostError;
    use crate::types::{Item, PipelineStep, Profile, RunConfig};

    fn store() -> StateStore {
        StateStore::new(Arc::new(MemoryRepository::new()))
    }

    fn new_run() -> Run {
        Run::new(
            "user-1".to_string(),
            "job".to_string(),
            vec![
                Item::new("1", "First", "https://jobs.example/1"),
                Item::new("2", "Second", "https://jobs.example/2"),
            ],
            vec!["blog".to_string()],
            RunConfig::new(vec![Profile::new("blog", "Blog")]),
        )
    }

    #[tokio::test]
    async fn test_create_and_get_run() {
        let store = store();
        let run = new_run();
        store.create_run(&run).await.unwrap();

        let fetched = store.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(fetched, run);
        assert!(store.get_run("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_run() {
        let store = store();
        let result = store.update_status("missing", RunStatus::Running).await;
        assert!(matches!(
            result,
            Err(AutopostError::Store(StoreError::RunNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_status_lifecycle() {
        let store = store();
        let run = new_run();
        store.create_run(&run).await.unwrap();

        store.update_status(&run.id, RunStatus::Running).await.unwrap();
        store.update_status(&run.id, RunStatus::Paused).await.unwrap();
        store.update_status(&run.id, RunStatus::Paused).await.unwrap();
        store.update_status(&run.id, RunStatus::Running).await.unwrap();
        let updated = store
            .update_status(&run.id, RunStatus::Completed)
            .await
            .unwrap();
        assert_eq!(updated.status, RunStatus::Completed);
        assert!(updated.updated_at >= run.updated_at);

        let result = store.update_status(&run.id, RunStatus::Running).await;
        assert!(matches!(
            result,
            Err(AutopostError::Store(StoreError::InvalidTransition { .. }))
        ));
    }

    #[tokio::test]
    async fn test_claim_run_only_once() {
        let store = store();
        let run = new_run();
        store.create_run(&run).await.unwrap();

        let claimed = store.claim_run(&run.id).await.unwrap();
        assert_eq!(claimed.status, RunStatus::Running);

        match store.claim_run(&run.id).await {
            Err(ClaimError::NotPending(status)) => assert_eq!(status, RunStatus::Running),
            other => panic!("Expected NotPending, got {:?}", other.map(|r| r.status)),
        }

        assert!(matches!(
            store.claim_run("missing").await,
            Err(ClaimError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let store = store();
        let run = new_run();
        store.create_run(&run).await.unwrap();

        let mut progress = Progress::new(2);
        progress.completed = 1;
        store.update_progress(&run.id, &progress).await.unwrap();

        progress.failed = 1;
        progress.message = "done".to_string();
        let updated = store.update_progress(&run.id, &progress).await.unwrap();
        assert_eq!(updated.progress.processed(), 2);

        let regressed = Progress::new(2);
        let result = store.update_progress(&run.id, &regressed).await;
        assert!(matches!(
            result,
            Err(AutopostError::Store(StoreError::ProgressRegression(_)))
        ));
    }

    #[tokio::test]
    async fn test_results_and_errors_are_appended_in_order() {
        let store = store();
        let run = new_run();
        store.create_run(&run).await.unwrap();

        for (item, url) in run.items.iter().zip(["https://a/1", "https://a/2"]) {
            store
                .append_result(
                    &run.id,
                    PublishResult {
                        item_id: item.id.clone(),
                        item_title: item.title.clone(),
                        url: url.to_string(),
                        profile_id: "blog".to_string(),
                        published_at: Utc::now(),
                        author: None,
                        scheduled_for: None,
                    },
                )
                .await
                .unwrap();
        }
        store
            .append_error(
                &run.id,
                ItemError::new(&run.items[1], PipelineStep::DetailFetching, "404"),
            )
            .await
            .unwrap();

        let stored = store.require_run(&run.id).await.unwrap();
        let urls: Vec<&str> = stored.results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a/1", "https://a/2"]);
        assert_eq!(stored.errors.len(), 1);
        assert_eq!(stored.errors[0].step, PipelineStep::DetailFetching);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let store = store();
        let run = new_run();
        store.create_run(&run).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            let run_id = run.id.clone();
            let item = run.items[0].clone();
            tasks.push(tokio::spawn(async move {
                store
                    .append_error(
                        &run_id,
                        ItemError::new(&item, PipelineStep::Publishing, format!("e{}", i)),
                    )
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let stored = store.require_run(&run.id).await.unwrap();
        assert_eq!(stored.errors.len(), 20);
        assert_eq!(store.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_lock_entries_are_released() {
        let store = store();
        let run = new_run();
        store.create_run(&run).await.unwrap();
        store.update_status(&run.id, RunStatus::Running).await.unwrap();
        store.set_last_author_index("u", "p", 0).await.unwrap();
        assert_eq!(store.lock_count(), 0);

        let held = store.lock_key(LockKey::Run(run.id.clone())).await;
        assert_eq!(store.lock_count(), 1);

        let waiter = {
            let store = store.clone();
            let run_id = run.id.clone();
            tokio::spawn(async move { store.update_status(&run_id, RunStatus::Paused).await })
        };
        tokio::task::yield_now().await;
        drop(held);

        waiter.await.unwrap().unwrap();
        assert_eq!(store.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_author_index_defaults_to_minus_one() {
        let store = store();
        assert_eq!(store.get_last_author_index("u", "p").await.unwrap(), -1);

        store.set_last_author_index("u", "p", 2).await.unwrap();
        assert_eq!(store.get_last_author_index("u", "p").await.unwrap(), 2);
        assert_eq!(store.get_last_author_index("u", "other").await.unwrap(), -1);
        assert_eq!(store.get_last_author_index("v", "p").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_rotation_keys_with_separators_do_not_collide() {
        let store = store();
        store.set_last_author_index("a:b", "c", 1).await.unwrap();
        store.set_last_author_index("a", "b:c", 2).await.unwrap();

        assert_eq!(store.get_last_author_index("a:b", "c").await.unwrap(), 1);
        assert_eq!(store.get_last_author_index("a", "b:c").await.unwrap(), 2);
    }

    #[test]
    fn test_newest_cursor_wins() {
        let older = RotationCursor::new(0);
        let mut newer = RotationCursor::new(2);
        newer.updated_at = older.updated_at + chrono::Duration::milliseconds(5);

        assert_eq!(older.newest(newer), newer);
        assert_eq!(newer.newest(older), newer);
        assert_eq!(older.newest(older), older);
    }

    #[tokio::test]
    async fn test_list_runs_for_user() {
        let store = store();
        let first = new_run();
        let second = new_run();
        let mut foreign = new_run();
        foreign.user_id = "user-2".to_string();
        for run in [&first, &second, &foreign] {
            store.create_run(run).await.unwrap();
        }

        let runs = store.list_runs_for_user("user-1").await.unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.user_id == "user-1"));
    }
}
