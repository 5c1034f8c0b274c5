//! Core types for Autopost

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_MIN_INTERVAL: u32 = 30;
pub const DEFAULT_MAX_INTERVAL: u32 = 120;

/// A content reference selected for a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub url: String,
}

impl Item {
    pub fn new(id: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: url.into(),
        }
    }
}

/// How a destination should treat a published article
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    #[default]
    Immediate,
    Draft,
    Scheduled,
}

impl PublishMode {
    /// Status string handed to the publish collaborator
    pub fn as_publish_status(&self) -> &'static str {
        match self {
            PublishMode::Immediate => "publish",
            PublishMode::Draft => "draft",
            PublishMode::Scheduled => "future",
        }
    }
}

/// A publishing destination
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub mode: PublishMode,
    /// Lower bound of the scheduling interval, in minutes
    #[serde(default = "default_min_interval")]
    pub min_interval: u32,
    /// Upper bound of the scheduling interval, in minutes
    #[serde(default = "default_max_interval")]
    pub max_interval: u32,
    /// Candidate authors, rotated round-robin when more than one is set
    #[serde(default)]
    pub authors: Vec<String>,
}

fn default_min_interval() -> u32 {
    DEFAULT_MIN_INTERVAL
}

fn default_max_interval() -> u32 {
    DEFAULT_MAX_INTERVAL
}

impl Profile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: None,
            mode: PublishMode::Immediate,
            min_interval: DEFAULT_MIN_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            authors: Vec::new(),
        }
    }

    pub fn scheduled(mut self, min_interval: u32, max_interval: u32) -> Self {
        self.mode = PublishMode::Scheduled;
        self.min_interval = min_interval;
        self.max_interval = max_interval;
        self
    }

    pub fn with_mode(mut self, mode: PublishMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = authors.into_iter().map(Into::into).collect();
        self
    }
}

/// Publish options for a run; opaque to the processor except where noted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    pub profiles: Vec<Profile>,
    #[serde(default = "default_true")]
    pub add_links: bool,
    #[serde(default)]
    pub generate_images: bool,
    /// Free-form options forwarded to the generation and linking collaborators
    #[serde(default)]
    pub options: serde_json::Value,
}

fn default_true() -> bool {
    true
}

impl RunConfig {
    pub fn new(profiles: Vec<Profile>) -> Self {
        Self {
            profiles,
            add_links: true,
            generate_images: false,
            options: serde_json::Value::Null,
        }
    }

    pub fn profile(&self, profile_id: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.id == profile_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// Re-setting the current status is always allowed and treated as a no-op.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (RunStatus::Pending, RunStatus::Running) => true,
            (RunStatus::Running, RunStatus::Paused) => true,
            (RunStatus::Paused, RunStatus::Running) => true,
            (_, next) => next.is_terminal(),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "paused" => Ok(RunStatus::Paused),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            _ => Err(format!("Invalid run status: '{}'", s)),
        }
    }
}

/// Live counters an observer sees while polling a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    #[serde(default)]
    pub current_item_label: String,
    #[serde(default)]
    pub message: String,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub fn processed(&self) -> usize {
        self.completed + self.failed
    }
}

/// Pipeline step an item error is attributed to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    DetailFetching,
    ArticleGeneration,
    Publishing,
    /// Run-fatal failure not tied to a single item
    Run,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::DetailFetching => "detail_fetching",
            PipelineStep::ArticleGeneration => "article_generation",
            PipelineStep::Publishing => "publishing",
            PipelineStep::Run => "run",
        }
    }
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One successful publish of an item to a profile
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishResult {
    pub item_id: String,
    pub item_title: String,
    pub url: String,
    pub profile_id: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// One failed pipeline step for an item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemError {
    pub item_id: String,
    pub item_title: String,
    pub message: String,
    pub step: PipelineStep,
    pub occurred_at: DateTime<Utc>,
}

impl ItemError {
    pub fn new(item: &Item, step: PipelineStep, message: impl Into<String>) -> Self {
        Self {
            item_id: item.id.clone(),
            item_title: item.title.clone(),
            message: message.into(),
            step,
            occurred_at: Utc::now(),
        }
    }
}

/// One execution of the pipeline over a batch of items and profiles
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    pub id: String,
    pub user_id: String,
    pub content_type: String,
    pub items: Vec<Item>,
    pub profile_ids: Vec<String>,
    pub config: RunConfig,
    pub status: RunStatus,
    pub progress: Progress,
    #[serde(default)]
    pub results: Vec<PublishResult>,
    #[serde(default)]
    pub errors: Vec<ItemError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(
        user_id: String,
        content_type: String,
        items: Vec<Item>,
        profile_ids: Vec<String>,
        config: RunConfig,
    ) -> Self {
        let now = Utc::now();
        let total = items.len();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            content_type,
            items,
            profile_ids,
            config,
            status: RunStatus::Pending,
            progress: Progress::new(total),
            results: Vec::new(),
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Target profiles in the order their ids were selected
    pub fn target_profiles(&self) -> Vec<&Profile> {
        self.profile_ids
            .iter()
            .filter_map(|id| self.config.profile(id))
            .collect()
    }
}
