//! Autopost - batch publishing runs for content items
//!
//! This library drives automation runs: a batch of items is fetched,
//! turned into articles, and published to one or more destination
//! profiles, with pause/resume/stop control and durable progress.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod logging;
pub mod processor;
pub mod registry;
pub mod rotation;
pub mod scheduling;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{AutopostError, Result};
pub use processor::{ProcessorState, RunHandle, RunProcessor, WaitOutcome};
pub use registry::{CreateRunRequest, RunRegistry};
pub use rotation::AuthorRotator;
pub use scheduling::ScheduleEngine;
pub use store::StateStore;
pub use types::{
    Item, ItemError, PipelineStep, Profile, PublishMode, PublishResult, Run, RunConfig, RunStatus,
};
