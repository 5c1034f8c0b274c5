//! Interfaces to the external components a run drives
//!
//! Detail retrieval, content generation, link augmentation, image rendering,
//! and publishing live outside this crate. The processor only sees them
//! through the traits below, and awaits each call before moving on.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use libautopost::collaborators::Collaborators;
//! use libautopost::collaborators::mock::{MockDetails, MockGenerator, MockPublisher};
//!
//! let collaborators = Collaborators::new(
//!     Arc::new(MockDetails::new()),
//!     Arc::new(MockGenerator::new()),
//!     Arc::new(MockPublisher::new()),
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::CollaboratorError;
use crate::types::{Item, Profile, RunConfig};

// Mock collaborators are available for all builds (not just tests) to support integration tests
pub mod mock;

pub type CollabResult<T> = std::result::Result<T, CollaboratorError>;

/// Raw detail payload returned by the detail fetcher
pub type DetailPayload = serde_json::Value;

/// Retrieves the full details behind an item's url
#[async_trait]
pub trait DetailFetcher: Send + Sync {
    /// # Errors
    ///
    /// `CollaboratorError::BadInput` when the url or content type cannot be
    /// handled, `CollaboratorError::Upstream` when the source failed.
    async fn fetch_details(&self, url: &str, content_type: &str) -> CollabResult<DetailPayload>;
}

/// Article produced by the generation step
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GeneratedContent {
    pub title: String,
    pub html: String,
    pub slug: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl GeneratedContent {
    /// Empty content counts as a failed generation even without an error
    pub fn is_empty(&self) -> bool {
        self.html.trim().is_empty()
    }
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(
        &self,
        item: &Item,
        details: &DetailPayload,
        config: &RunConfig,
    ) -> CollabResult<GeneratedContent>;
}

/// Best-effort enrichment of generated html with links
#[async_trait]
pub trait LinkAugmenter: Send + Sync {
    async fn augment(
        &self,
        html: &str,
        title: &str,
        profiles: &[Profile],
        config: &RunConfig,
    ) -> CollabResult<String>;
}

#[async_trait]
pub trait ImageRenderer: Send + Sync {
    /// Render a feature image and return its path on disk
    async fn render_feature_image(
        &self,
        title: &str,
        content_type: &str,
        site_label: &str,
    ) -> CollabResult<PathBuf>;
}

/// One publish call for one profile
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishRequest {
    pub profile_id: String,
    pub title: String,
    pub slug: String,
    pub html: String,
    /// `publish`, `draft`, or `future`
    pub status: String,
    pub schedule_time: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub image_path: Option<PathBuf>,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish and return the destination url.
    ///
    /// A non-empty url is the only success signal.
    async fn publish(&self, request: &PublishRequest) -> CollabResult<String>;
}

/// The set of collaborators a processor drives
#[derive(Clone)]
pub struct Collaborators {
    pub details: Arc<dyn DetailFetcher>,
    pub generator: Arc<dyn ContentGenerator>,
    pub linker: Option<Arc<dyn LinkAugmenter>>,
    pub images: Option<Arc<dyn ImageRenderer>>,
    pub publisher: Arc<dyn Publisher>,
}

impl Collaborators {
    pub fn new(
        details: Arc<dyn DetailFetcher>,
        generator: Arc<dyn ContentGenerator>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            details,
            generator,
            linker: None,
            images: None,
            publisher,
        }
    }

    pub fn with_linker(mut self, linker: Arc<dyn LinkAugmenter>) -> Self {
        self.linker = Some(linker);
        self
    }

    pub fn with_image_renderer(mut self, images: Arc<dyn ImageRenderer>) -> Self {
        self.images = Some(images);
        self
    }
}
