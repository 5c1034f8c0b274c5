//! Local store mirrored to an optional remote store
//!
//! Writes go to both sides and succeed when either side accepts them. Reads
//! consult both sides, and when both hold a copy of a run record or rotation
//! cursor the one updated last wins, so a side that missed writes during an
//! outage cannot shadow newer state. An error only reaches the caller when
//! both sides fail.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::error::Result;
use crate::store::{RotationCursor, RunRepository};
use crate::types::Run;

pub struct MirroredRepository {
    local: Arc<dyn RunRepository>,
    remote: Option<Arc<dyn RunRepository>>,
}

impl MirroredRepository {
    pub fn new(local: Arc<dyn RunRepository>, remote: Option<Arc<dyn RunRepository>>) -> Self {
        Self { local, remote }
    }

    pub fn local_only(local: Arc<dyn RunRepository>) -> Self {
        Self::new(local, None)
    }

    fn reconcile_write(
        &self,
        operation: &str,
        local: Result<()>,
        remote: Result<()>,
    ) -> Result<()> {
        match (local, remote) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(e)) => {
                warn!("Remote store failed during {}, kept local copy: {}", operation, e);
                Ok(())
            }
            (Err(e), Ok(())) => {
                warn!("Local store failed during {}, kept remote copy: {}", operation, e);
                Ok(())
            }
            (Err(local_err), Err(remote_err)) => {
                warn!("Remote store also failed during {}: {}", operation, remote_err);
                Err(local_err)
            }
        }
    }

    fn reconcile_read<T>(
        &self,
        key: &str,
        remote: Result<Option<T>>,
        local: Result<Option<T>>,
        newest: impl FnOnce(T, T) -> T,
    ) -> Result<Option<T>> {
        match (remote, local) {
            (Ok(Some(r)), Ok(Some(l))) => Ok(Some(newest(r, l))),
            (Ok(r), Ok(l)) => Ok(r.or(l)),
            (Ok(r), Err(e)) => {
                warn!(key, "Local store read failed: {}", e);
                Ok(r)
            }
            (Err(e), Ok(l)) => {
                warn!(key, "Remote store read failed, using local copy: {}", e);
                Ok(l)
            }
            (Err(remote_err), Err(local_err)) => {
                warn!(key, "Remote store read failed: {}", remote_err);
                Err(local_err)
            }
        }
    }
}

fn newest(a: Run, b: Run) -> Run {
    if b.updated_at > a.updated_at {
        b
    } else {
        a
    }
}

#[async_trait]
impl RunRepository for MirroredRepository {
    fn name(&self) -> &str {
        "mirrored"
    }

    async fn put_run(&self, run: &Run) -> Result<()> {
        let Some(remote) = &self.remote else {
            return self.local.put_run(run).await;
        };
        let local_result = self.local.put_run(run).await;
        let remote_result = remote.put_run(run).await;
        self.reconcile_write("put_run", local_result, remote_result)
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        let Some(remote) = &self.remote else {
            return self.local.get_run(run_id).await;
        };

        let remote_result = remote.get_run(run_id).await;
        let local_result = self.local.get_run(run_id).await;
        self.reconcile_read(run_id, remote_result, local_result, newest)
    }

    async fn list_runs(&self, user_id: &str) -> Result<Vec<Run>> {
        let Some(remote) = &self.remote else {
            return self.local.list_runs(user_id).await;
        };

        let (remote_runs, local_runs) = match (
            remote.list_runs(user_id).await,
            self.local.list_runs(user_id).await,
        ) {
            (Ok(r), Ok(l)) => (r, l),
            (Ok(r), Err(e)) => {
                warn!(user_id, "Local store list failed: {}", e);
                (r, Vec::new())
            }
            (Err(e), Ok(l)) => {
                warn!(user_id, "Remote store list failed, using local runs: {}", e);
                (Vec::new(), l)
            }
            (Err(remote_err), Err(local_err)) => {
                warn!(user_id, "Remote store list failed: {}", remote_err);
                return Err(local_err);
            }
        };

        let mut merged: HashMap<String, Run> = HashMap::new();
        for run in remote_runs.into_iter().chain(local_runs) {
            let run = match merged.remove(&run.id) {
                Some(existing) => newest(existing, run),
                None => run,
            };
            merged.insert(run.id.clone(), run);
        }

        let mut runs: Vec<Run> = merged.into_values().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    async fn get_author_cursor(
        &self,
        user_id: &str,
        profile_id: &str,
    ) -> Result<Option<RotationCursor>> {
        let Some(remote) = &self.remote else {
            return self.local.get_author_cursor(user_id, profile_id).await;
        };

        let remote_result = remote.get_author_cursor(user_id, profile_id).await;
        let local_result = self.local.get_author_cursor(user_id, profile_id).await;
        let key = format!("{}/{}", user_id, profile_id);
        self.reconcile_read(&key, remote_result, local_result, RotationCursor::newest)
    }

    async fn set_author_cursor(
        &self,
        user_id: &str,
        profile_id: &str,
        cursor: RotationCursor,
    ) -> Result<()> {
        let Some(remote) = &self.remote else {
            return self.local.set_author_cursor(user_id, profile_id, cursor).await;
        };
        let local_result = self.local.set_author_cursor(user_id, profile_id, cursor).await;
        let remote_result = remote.set_author_cursor(user_id, profile_id, cursor).await;
        self.reconcile_write("set_author_cursor", local_result, remote_result)
    }
}
