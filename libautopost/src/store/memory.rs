//! In-memory repository
//!
//! Available in all builds (not just tests) so integration tests and
//! ephemeral hosts can run without a database. An availability switch lets
//! tests simulate an outage of one side of a mirrored store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::error::{Result, StoreError};
use crate::store::{RotationCursor, RunRepository};
use crate::types::Run;

pub struct MemoryRepository {
    name: String,
    runs: RwLock<HashMap<String, Run>>,
    rotation: RwLock<HashMap<(String, String), RotationCursor>>,
    available: AtomicBool,
    write_count: AtomicUsize,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            runs: RwLock::new(HashMap::new()),
            rotation: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            write_count: AtomicUsize::new(0),
        }
    }

    /// Make every subsequent call fail (or succeed again)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of successful writes, for verifying mirroring
    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("{} repository is offline", self.name)).into())
        }
    }
}

#[async_trait]
impl RunRepository for MemoryRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put_run(&self, run: &Run) -> Result<()> {
        self.check_available()?;
        self.runs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run.id.clone(), run.clone());
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        self.check_available()?;
        Ok(self
            .runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(run_id)
            .cloned())
    }

    async fn list_runs(&self, user_id: &str) -> Result<Vec<Run>> {
        self.check_available()?;
        let mut runs: Vec<Run> = self
            .runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|run| run.user_id == user_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    async fn get_author_cursor(
        &self,
        user_id: &str,
        profile_id: &str,
    ) -> Result<Option<RotationCursor>> {
        self.check_available()?;
        Ok(self
            .rotation
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(user_id.to_string(), profile_id.to_string()))
            .copied())
    }

    async fn set_author_cursor(
        &self,
        user_id: &str,
        profile_id: &str,
        cursor: RotationCursor,
    ) -> Result<()> {
        self.check_available()?;
        self.rotation
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((user_id.to_string(), profile_id.to_string()), cursor);
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
