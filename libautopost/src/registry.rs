//! Run creation, validation, and lookup
//!
//! Malformed requests are rejected here, before any run record exists.

use std::collections::HashSet;
use tracing::info;

use crate::error::{AutopostError, Result};
use crate::scheduling::validate_interval;
use crate::store::StateStore;
use crate::types::{Item, Profile, PublishMode, Run, RunConfig};

/// Everything needed to create a run
#[derive(Debug, Clone)]
pub struct CreateRunRequest {
    pub user_id: String,
    pub content_type: String,
    pub items: Vec<Item>,
    pub profile_ids: Vec<String>,
    pub config: RunConfig,
}

#[derive(Clone)]
pub struct RunRegistry {
    store: StateStore,
}

impl RunRegistry {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Validate and persist a new pending run
    pub async fn create(&self, request: CreateRunRequest) -> Result<Run> {
        validate_request(&request)?;

        let run = Run::new(
            request.user_id,
            request.content_type,
            request.items,
            request.profile_ids,
            request.config,
        );
        self.store.create_run(&run).await?;

        info!(
            run_id = %run.id,
            user_id = %run.user_id,
            items = run.items.len(),
            profiles = run.profile_ids.len(),
            "Created automation run"
        );
        Ok(run)
    }

    pub async fn get(&self, run_id: &str) -> Result<Option<Run>> {
        self.store.get_run(run_id).await
    }

    pub async fn require(&self, run_id: &str) -> Result<Run> {
        self.store.require_run(run_id).await
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Run>> {
        self.store.list_runs_for_user(user_id).await
    }
}

fn invalid(message: impl Into<String>) -> AutopostError {
    AutopostError::InvalidInput(message.into())
}

/// Check a run request for problems that would make the run meaningless
pub fn validate_request(request: &CreateRunRequest) -> Result<()> {
    if request.user_id.trim().is_empty() {
        return Err(invalid("User id cannot be empty"));
    }
    if request.content_type.trim().is_empty() {
        return Err(invalid("Content type cannot be empty"));
    }

    validate_items(&request.items)?;

    if request.profile_ids.is_empty() {
        return Err(invalid("At least one target profile must be selected"));
    }

    let mut seen = HashSet::new();
    for profile_id in &request.profile_ids {
        if !seen.insert(profile_id.as_str()) {
            return Err(invalid(format!("Profile '{}' selected more than once", profile_id)));
        }
        let profile = request.config.profile(profile_id).ok_or_else(|| {
            invalid(format!("Profile '{}' is not defined in the run config", profile_id))
        })?;
        validate_profile(profile)?;
    }

    Ok(())
}

fn validate_items(items: &[Item]) -> Result<()> {
    if items.is_empty() {
        return Err(invalid("At least one item must be selected"));
    }

    let mut seen = HashSet::new();
    for item in items {
        if item.id.trim().is_empty() {
            return Err(invalid("Item id cannot be empty"));
        }
        if item.url.trim().is_empty() {
            return Err(invalid(format!("Item '{}' has no url", item.id)));
        }
        if !seen.insert(item.id.as_str()) {
            return Err(invalid(format!("Item '{}' selected more than once", item.id)));
        }
    }
    Ok(())
}

fn validate_profile(profile: &Profile) -> Result<()> {
    if profile.name.trim().is_empty() {
        return Err(invalid(format!("Profile '{}' has no name", profile.id)));
    }

    if profile.mode == PublishMode::Scheduled {
        validate_interval(profile.min_interval, profile.max_interval)
            .map_err(|e| invalid(format!("Profile '{}': {}", profile.id, e)))?;
    }

    if profile.authors.iter().any(|a| a.trim().is_empty()) {
        return Err(invalid(format!("Profile '{}' has an empty author", profile.id)));
    }

    Ok(())
}
